//! hostgrid-state: persistence for projects, env vars, and deployments.
//!
//! Backed by [redb](https://docs.rs/redb). The orchestrator only sees the
//! [`ProjectStore`] trait; [`StateStore`] is the redb implementation with
//! on-disk and in-memory backends.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Child records use composite keys (`{project_id}/{key}`,
//! `{project_id}/{seq}`) so a project's children are one range scan, and
//! deployment keys carry a zero-padded sequence so range order is
//! deployment order.
//!
//! Every multi-record change (create with its subdomain index, recording a
//! deployment together with the project's status and current pointer,
//! cascade delete) happens inside a single write transaction.

pub mod error;
pub mod port;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use port::ProjectStore;
pub use store::StateStore;
pub use types::*;

//! hostgrid-orchestrator: project lifecycle over a container runtime.
//!
//! The [`Orchestrator`] turns tenant requests (create, deploy, start, stop,
//! update, delete) into container engine calls and persisted state. The
//! store and the runtime are injected as trait objects, so the same code
//! runs against Docker + redb in production and against
//! `MemoryRuntime` + in-memory redb in tests.
//!
//! # Components
//!
//! - **`orchestrator`**: the lifecycle operations
//! - **`routing`**: reverse-proxy routing labels for tenant containers
//! - **`locks`**: per-project exclusive locks
//! - **`retry`**: deadlines and backoff around runtime calls

pub mod error;
pub mod locks;
pub mod orchestrator;
pub mod retry;
pub mod routing;

pub use error::{OrchestratorError, OrchestratorResult};
pub use locks::{ProjectGuard, ProjectLocks};
pub use orchestrator::{DeleteReport, Orchestrator, OrchestratorConfig, TeardownFailure};
pub use retry::RetryPolicy;
pub use routing::{RouteLabels, route_labels};

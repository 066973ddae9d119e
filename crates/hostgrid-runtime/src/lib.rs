//! hostgrid-runtime: the container engine seam.
//!
//! The orchestrator drives containers only through [`ContainerRuntime`].
//! [`DockerRuntime`] talks to a local Docker daemon via bollard;
//! [`MemoryRuntime`] keeps containers in process and supports fault
//! injection for tests and dry runs.

pub mod docker;
pub mod error;
pub mod memory;
pub mod port;
pub mod types;

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use memory::{MemoryRuntime, Op};
pub use port::ContainerRuntime;
pub use types::*;

pub mod config;
pub mod spec;

pub use config::DaemonConfig;
pub use spec::*;

//! hostgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub routing: RoutingConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

/// How tenant containers are exposed through the shared reverse proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Tenant hosts are `<subdomain>.<base_domain>`.
    pub base_domain: String,
    /// Docker network shared by the proxy and every tenant container.
    pub network: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub kind: RuntimeKind,
    /// Deadline for a single container engine call.
    pub call_timeout_secs: u64,
    /// Deadline for pulling an image (pulls are much slower than other calls).
    pub pull_timeout_secs: u64,
    /// Grace period handed to the engine before it kills a stopping container.
    pub stop_grace_secs: u64,
    pub inspect_attempts: u32,
    pub create_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Docker,
    /// In-process engine that never touches a real daemon.
    Memory,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: PathBuf::from("/var/lib/hostgrid"),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_domain: "localhost".to_string(),
            network: "traefik-net".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kind: RuntimeKind::Docker,
            call_timeout_secs: 30,
            pull_timeout_secs: 600,
            stop_grace_secs: 10,
            inspect_attempts: 3,
            create_attempts: 2,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Path of the redb database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.server.data_dir.join("hostgrid.redb")
    }
}

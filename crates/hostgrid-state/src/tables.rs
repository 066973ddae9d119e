//! redb table definitions for the HostGrid state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Child keys follow `{project_id}/{child}` so one range scan yields
//! all children of a project.

use redb::TableDefinition;

/// Projects keyed by `{project_id}`.
pub const PROJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("projects");

/// Subdomain uniqueness index: `{subdomain}` → `{project_id}`.
pub const SUBDOMAINS: TableDefinition<&str, &str> = TableDefinition::new("subdomains");

/// Environment variables keyed by `{project_id}/{key}`.
pub const ENV_VARS: TableDefinition<&str, &[u8]> = TableDefinition::new("env_vars");

/// Deployment history keyed by `{project_id}/{seq:020}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Separator between a project id and its child key.
pub const CHILD_SEPARATOR: char = '/';

/// Half-open key range `[{project_id}/, {project_id}0)` covering every child
/// of a project (`'0'` is the byte after `'/'`).
pub fn child_range(project_id: &str) -> (String, String) {
    (format!("{project_id}/"), format!("{project_id}0"))
}

pub fn env_key(project_id: &str, key: &str) -> String {
    format!("{project_id}{CHILD_SEPARATOR}{key}")
}

pub fn deployment_key(project_id: &str, seq: u64) -> String {
    format!("{project_id}{CHILD_SEPARATOR}{seq:020}")
}

//! Tenant-declared project spec and its validation rules.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest subdomain accepted (a single DNS label).
pub const MAX_SUBDOMAIN_LEN: usize = 63;

static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("DNS label pattern compiles")
});

/// Reasons a project spec is rejected before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("invalid subdomain {subdomain:?}: {reason}")]
    Subdomain { subdomain: String, reason: &'static str },

    #[error("invalid image reference {0:?}")]
    Image(String),

    #[error("invalid port {0}: must be between 1 and 65535")]
    Port(i64),

    #[error("invalid environment variable key {0:?}")]
    EnvKey(String),
}

/// Project fields as submitted by a tenant (create and update share them).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub name: String,
    pub image: String,
    pub subdomain: String,
    pub port: i64,
}

/// A spec that passed validation. The subdomain is lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidSpec {
    pub name: String,
    pub image: String,
    pub subdomain: String,
    pub port: u16,
}

impl ProjectSpec {
    pub fn validate(&self) -> Result<ValidSpec, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::Empty("name"));
        }
        let image = self.image.trim();
        if image.is_empty() {
            return Err(ValidationError::Empty("image"));
        }
        if image.chars().any(char::is_whitespace) {
            return Err(ValidationError::Image(image.to_string()));
        }
        Ok(ValidSpec {
            name: name.to_string(),
            image: image.to_string(),
            subdomain: validate_subdomain(&self.subdomain)?,
            port: validate_port(self.port)?,
        })
    }
}

/// Check that `subdomain` is a single DNS label and return its canonical
/// (lowercase) form.
pub fn validate_subdomain(subdomain: &str) -> Result<String, ValidationError> {
    let reject = |reason| ValidationError::Subdomain {
        subdomain: subdomain.to_string(),
        reason,
    };

    if subdomain.is_empty() {
        return Err(reject("empty"));
    }
    if subdomain.chars().any(char::is_whitespace) {
        return Err(reject("contains whitespace"));
    }
    if subdomain.len() > MAX_SUBDOMAIN_LEN {
        return Err(reject("longer than 63 characters"));
    }
    let lower = subdomain.to_ascii_lowercase();
    if lower.starts_with('-') || lower.ends_with('-') {
        return Err(reject("starts or ends with a hyphen"));
    }
    if !DNS_LABEL.is_match(&lower) {
        return Err(reject("only letters, digits and hyphens are allowed"));
    }
    Ok(lower)
}

pub fn validate_port(port: i64) -> Result<u16, ValidationError> {
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ValidationError::Port(port)),
    }
}

/// Environment keys end up as `KEY=VALUE` in the container, so `=` and
/// whitespace are not allowed in them.
pub fn validate_env_vars(vars: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    for key in vars.keys() {
        if key.is_empty() || key.contains('=') || key.chars().any(char::is_whitespace) {
            return Err(ValidationError::EnvKey(key.clone()));
        }
    }
    Ok(())
}

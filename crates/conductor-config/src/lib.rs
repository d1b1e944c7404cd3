//! Runtime configuration for one script execution.
//!
//! # Sources
//! - `CONDUCTOR_CONTEXT`: JSON request context injected by the runner.
//! - a context file (JSON or YAML) passed on the command line.
//! - `CONDUCTOR_DRY_RUN=1` / `CONDUCTOR_LOCAL=1`: offline execution.
//! - `CONDUCTOR_API_BASE` / `CONDUCTOR_BEARER_TOKEN`: see [`secrets`].
//!
//! Context documents carry paths and identifiers only. Leaf strings that
//! look like credentials are rejected with `CONFIG_SECRET_DETECTED`;
//! credentials come from the environment.

pub mod secrets;

pub use secrets::ClientSettings;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_CONTEXT: &str = "CONDUCTOR_CONTEXT";
pub const ENV_DRY_RUN: &str = "CONDUCTOR_DRY_RUN";
pub const ENV_LOCAL: &str = "CONDUCTOR_LOCAL";

/// Known secret-like prefixes. A leaf string value starting with one of
/// these aborts loading.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
    "ya29.", // Google OAuth access token
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("failed to read context file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid request context: {0}")]
    Parse(String),

    #[error("CONFIG_SECRET_DETECTED leaf={pointer} value=REDACTED")]
    SecretDetected { pointer: String },
}

// ---------------------------------------------------------------------------
// Execution mode
// ---------------------------------------------------------------------------

/// Whether remote collaborators may be contacted.
///
/// File resolution and manifest handling behave identically in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Normal,
    /// No remote calls, no cloud credentials required.
    DryRun,
}

impl ExecutionMode {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let on = |k: &str| lookup(k).map(|v| v.trim() == "1").unwrap_or(false);
        if on(ENV_DRY_RUN) || on(ENV_LOCAL) {
            ExecutionMode::DryRun
        } else {
            ExecutionMode::Normal
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, ExecutionMode::DryRun)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Normal => "NORMAL",
            ExecutionMode::DryRun => "DRY_RUN",
        }
    }
}

// ---------------------------------------------------------------------------
// Request context
// ---------------------------------------------------------------------------

/// The request a script runs against.
///
/// ```json
/// {
///   "request_root": "requests/REQ-1234",
///   "mount_path": "/mnt/gcs",
///   "request_id": "REQ-1234",
///   "step": "plate_heatmap"
/// }
/// ```
/// Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    pub request_root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Producing step recorded on every published artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Prefix for a relative `request_root` (e.g. a bucket mount point).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<PathBuf>,
    /// Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

impl ContextConfig {
    pub fn new(request_root: impl Into<PathBuf>) -> Self {
        Self {
            request_root: request_root.into(),
            request_id: None,
            step: None,
            mount_path: None,
            bucket: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Parse a JSON or YAML context document.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let json = serde_json::to_value(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        enforce_no_secret_literals(&json)?;
        let cfg: ContextConfig =
            serde_json::from_value(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if cfg.request_root.as_os_str().is_empty() {
            return Err(ConfigError::Parse("request_root is empty".to_string()));
        }
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        // tolerate a UTF-8 BOM from editors on Windows
        Self::parse(raw.trim_start_matches('\u{feff}'))
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = std::env::var(ENV_CONTEXT).map_err(|_| ConfigError::MissingEnv(ENV_CONTEXT))?;
        Self::parse(&raw)
    }

    /// Compact JSON suitable for `CONDUCTOR_CONTEXT`.
    pub fn to_env_value(&self) -> Result<String, ConfigError> {
        serde_json::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// `request_root`, joined onto `mount_path` when relative.
    pub fn resolved_request_root(&self) -> PathBuf {
        match &self.mount_path {
            Some(mount) if self.request_root.is_relative() => mount.join(&self.request_root),
            _ => self.request_root.clone(),
        }
    }

    /// Explicit `request_id`, else the last component of `request_root`.
    pub fn request_id(&self) -> String {
        if let Some(id) = self.request_id.as_deref().filter(|s| !s.trim().is_empty()) {
            return id.trim().to_string();
        }
        self.request_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "request".to_string())
    }
}

fn enforce_no_secret_literals(v: &Value) -> Result<(), ConfigError> {
    let mut leaves = Vec::new();
    collect_string_leaves(v, String::new(), &mut leaves);
    for (pointer, s) in leaves {
        if looks_like_secret(s) {
            return Err(ConfigError::SecretDetected { pointer });
        }
    }
    Ok(())
}

fn collect_string_leaves<'a>(v: &'a Value, pointer: String, out: &mut Vec<(String, &'a str)>) {
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                let token = k.replace('~', "~0").replace('/', "~1");
                collect_string_leaves(child, format!("{pointer}/{token}"), out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_string_leaves(child, format!("{pointer}/{i}"), out);
            }
        }
        Value::String(s) => out.push((pointer, s.as_str())),
        _ => {}
    }
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_json_context() {
        let cfg = ContextConfig::parse(
            r#"{"bucket":"b","mount_path":"/mnt/gcs","request_root":"requests/REQ-1234/",
                "paths":{"results":"requests/REQ-1234/results"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.resolved_request_root(), PathBuf::from("/mnt/gcs/requests/REQ-1234"));
        assert_eq!(cfg.request_id(), "REQ-1234");
        assert_eq!(cfg.bucket.as_deref(), Some("b"));
    }

    #[test]
    fn parses_yaml_context() {
        let cfg = ContextConfig::parse("request_root: /data/req-9\nrequest_id: R9\nstep: qc\n").unwrap();
        assert_eq!(cfg.resolved_request_root(), PathBuf::from("/data/req-9"));
        assert_eq!(cfg.request_id(), "R9");
        assert_eq!(cfg.step.as_deref(), Some("qc"));
    }

    #[test]
    fn absolute_root_ignores_mount() {
        let mut cfg = ContextConfig::new("/abs/req");
        cfg.mount_path = Some(PathBuf::from("/mnt"));
        assert_eq!(cfg.resolved_request_root(), PathBuf::from("/abs/req"));
    }

    #[test]
    fn missing_request_root_is_rejected() {
        assert!(matches!(ContextConfig::parse(r#"{"bucket":"b"}"#), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn secret_literal_is_rejected_without_echoing_it() {
        let err = ContextConfig::parse(r#"{"request_root":"r","token":"ghp_abcdefghijklmnop"}"#).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("CONFIG_SECRET_DETECTED"));
        assert!(msg.contains("/token"));
        assert!(!msg.contains("ghp_abcdefghijklmnop"));
    }

    #[test]
    fn env_value_round_trips() {
        let cfg = ContextConfig::new("/r/REQ-7").with_step("fit");
        let back = ContextConfig::parse(&cfg.to_env_value().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn mode_from_lookup() {
        let env = |pairs: &[(&str, &str)]| {
            let m: HashMap<String, String> =
                pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
            ExecutionMode::from_lookup(move |k| m.get(k).cloned())
        };
        assert_eq!(env(&[]), ExecutionMode::Normal);
        assert_eq!(env(&[(ENV_DRY_RUN, "1")]), ExecutionMode::DryRun);
        assert_eq!(env(&[(ENV_LOCAL, "1")]), ExecutionMode::DryRun);
        assert_eq!(env(&[(ENV_DRY_RUN, "0")]), ExecutionMode::Normal);
    }
}

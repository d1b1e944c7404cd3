//! Workflow-API settings resolved from the environment.
//!
//! # Contract
//! - The bearer token is read from `CONDUCTOR_BEARER_TOKEN` only, never
//!   from a context document.
//! - `Debug` redacts the token.
//! - Error messages name the env var, never its value.

use crate::ConfigError;

pub const ENV_API_BASE: &str = "CONDUCTOR_API_BASE";
pub const ENV_BEARER_TOKEN: &str = "CONDUCTOR_BEARER_TOKEN";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClientSettings {
    /// API base URL, e.g. `https://conductor.example.run.app`.
    pub api_base: Option<String>,
    /// `None` if the env var was absent or empty.
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("api_base", &self.api_base)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl ClientSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            api_base: non_empty(ENV_API_BASE),
            bearer_token: non_empty(ENV_BEARER_TOKEN),
        }
    }

    /// The API base, or an error naming the variable to set.
    pub fn require_api_base(&self) -> Result<&str, ConfigError> {
        self.api_base
            .as_deref()
            .ok_or(ConfigError::MissingEnv(ENV_API_BASE))
    }
}

//! Command handler modules for the `conductor` binary.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod results;
pub mod run;
pub mod submit;

use anyhow::{Context as _, Result};
use conductor_context::{ArtifactKind, Context, ContextConfig, ExecutionMode};
use std::path::Path;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub fn load_config(path: &Path) -> Result<ContextConfig> {
    ContextConfig::from_file(path).with_context(|| format!("load context failed: {}", path.display()))
}

/// Build a [`Context`] from a context file; mode follows the environment.
pub fn load_context(path: &Path) -> Result<Context> {
    let cfg = load_config(path)?;
    Ok(Context::new(&cfg, ExecutionMode::from_env()))
}

/// Parse a CLI `--kind` string into an [`ArtifactKind`].
pub fn parse_kind(kind: &str) -> Result<ArtifactKind> {
    kind.parse::<ArtifactKind>().map_err(anyhow::Error::msg)
}

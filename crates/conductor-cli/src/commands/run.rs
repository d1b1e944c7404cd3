//! `conductor run`: execute a script the way the request runner would.

use anyhow::{Context, Result};
use conductor_config::{ENV_CONTEXT, ENV_DRY_RUN};
use std::path::Path;
use std::process::Command;
use tracing::info;

use super::load_config;

/// Returns the script's exit code (1 if it was killed by a signal).
pub fn run_script(script: &Path, context: &Path, dry_run: bool, args: &[String]) -> Result<i32> {
    // Validate up front so a bad context fails here rather than inside the script.
    let cfg = load_config(context)?;
    let env_value = cfg.to_env_value()?;

    let mut cmd = Command::new(script);
    cmd.args(args).env(ENV_CONTEXT, env_value);
    if dry_run {
        cmd.env(ENV_DRY_RUN, "1");
    }

    info!(
        script = %script.display(),
        request_root = %cfg.resolved_request_root().display(),
        dry_run,
        "running script"
    );
    let status = cmd
        .status()
        .with_context(|| format!("failed to start script: {}", script.display()))?;
    info!(code = ?status.code(), "script finished");

    Ok(status.code().unwrap_or(1))
}

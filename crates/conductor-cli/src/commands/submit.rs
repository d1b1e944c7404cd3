//! `conductor submit`: append a workflow row to the queue API.

use anyhow::{Context, Result};
use conductor_client::{ClientSettings, ExecutionMode, Step, SubmitWorkflowRequest, WorkflowClient};

pub struct SubmitArgs {
    pub project_id: String,
    pub experiment_id: String,
    pub created_by: String,
    pub source_plate_name: String,
    pub source_plate_format: String,
    pub steps: Vec<String>,
}

pub fn submit(args: SubmitArgs, dry_run: bool) -> Result<()> {
    let steps = args
        .steps
        .iter()
        .map(|s| parse_step(s))
        .collect::<Result<Vec<_>>>()?;

    let mode = if dry_run {
        ExecutionMode::DryRun
    } else {
        ExecutionMode::from_env()
    };
    let client = WorkflowClient::from_settings(&ClientSettings::from_env(), mode)
        .context("workflow client setup failed")?;

    let resp = client.submit_workflow(&SubmitWorkflowRequest {
        project_id: args.project_id,
        experiment_id: args.experiment_id,
        created_by: args.created_by,
        source_plate_name: args.source_plate_name,
        source_plate_format: args.source_plate_format,
        steps,
    })?;

    println!("ok={} request_id={} status={}", resp.ok, resp.request_id, resp.status);
    Ok(())
}

/// `operation:method:device`. Empty parts are allowed; the API validates them.
fn parse_step(raw: &str) -> Result<Step> {
    let mut parts = raw.splitn(3, ':');
    let (Some(op), Some(method), Some(device)) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("invalid --step '{}'. expected operation:method:device", raw);
    };
    Ok(Step::new(op, method, device))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_triplet_parses() {
        assert_eq!(parse_step("image:confocal:Operetta").unwrap(), Step::new("image", "confocal", "Operetta"));
        assert_eq!(parse_step("a:b:c:d").unwrap().device, "c:d");
        assert!(parse_step("image:confocal").is_err());
    }
}

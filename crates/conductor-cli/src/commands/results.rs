//! Request-inspection and publishing commands: resolve, publish, manifest,
//! verify.

use anyhow::{Context as _, Result};
use conductor_context::{ArtifactKind, FigurePayload, Payload, PublishOptions, RawArtifactPayload};
use std::path::Path;

use super::{load_context, parse_kind};

pub struct PublishArgs {
    pub title: Option<String>,
    pub description: Option<String>,
    pub step: Option<String>,
    pub by_content: bool,
}

pub fn resolve(context: &Path, name: &str) -> Result<()> {
    let ctx = load_context(context)?;
    let path = ctx.resolve(name)?;
    println!("{}", path.display());
    Ok(())
}

pub fn publish(context: &Path, kind: &str, name: &str, file: &Path, args: PublishArgs) -> Result<()> {
    let kind = parse_kind(kind)?;
    let ctx = load_context(context)?;

    // Figures are checked against the known image formats; everything else is copied as-is.
    let payload: Payload = match kind {
        ArtifactKind::Figure => FigurePayload::from_file(file)?.into(),
        ArtifactKind::Table | ArtifactKind::Artifact => RawArtifactPayload::from_file(file)?.into(),
    };

    let mut opts = PublishOptions::new();
    if let Some(t) = args.title {
        opts = opts.title(t);
    }
    if let Some(d) = args.description {
        opts = opts.description(d);
    }
    if let Some(s) = args.step {
        opts = opts.step(s);
    }
    if args.by_content {
        opts = opts.by_content();
    }

    let record = ctx.publish(kind, name, payload, opts)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub fn manifest(context: &Path) -> Result<()> {
    let ctx = load_context(context)?;
    let manifest = ctx.manifest()?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

pub fn verify(context: &Path) -> Result<()> {
    let ctx = load_context(context)?;
    let report = ctx
        .scan_consistency()
        .with_context(|| format!("scan failed for {}", ctx.request_root().display()))?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_consistent() {
        anyhow::bail!(
            "RESULTS_INCONSISTENT unregistered={} missing={}",
            report.unregistered.len(),
            report.missing.len()
        );
    }
    Ok(())
}

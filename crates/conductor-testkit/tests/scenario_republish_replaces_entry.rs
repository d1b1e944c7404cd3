//! Scenario: publishing an id twice.
//!
//! GREEN when:
//! - the manifest holds one entry for the id, carrying the second
//!   payload's digest and metadata;
//! - the entry keeps its original position among other artifacts;
//! - the payload file on disk is the second payload;
//! - a different id that lands on the same file is refused and the first
//!   artifact's bytes still match its recorded digest.

use conductor_context::{ContextError, PublishError, PublishOptions, TablePayload};
use sha2::{Digest, Sha256};
use conductor_testkit::RequestFixture;
use std::fs;

fn table(rows: &[(&str, &str)]) -> anyhow::Result<TablePayload> {
    let mut t = TablePayload::new(["well", "count"]);
    for (w, c) in rows {
        t.push_row([*w, *c])?;
    }
    Ok(t)
}

#[test]
fn scenario_republish_same_id_replaces_in_place() -> anyhow::Result<()> {
    let fx = RequestFixture::new()?;
    let ctx = fx.context_with_step("qc");

    let first = ctx.publish_table("summary", table(&[("A1", "3")])?, PublishOptions::new().title("v1"))?;
    ctx.publish_table("other", table(&[("B2", "1")])?, PublishOptions::new())?;
    let second = ctx.publish_table(
        "summary",
        table(&[("A1", "4"), ("A2", "7")])?,
        PublishOptions::new().title("v2").extra("rerun", true),
    )?;

    assert_ne!(first.sha256, second.sha256);
    assert_eq!(first.path, second.path);

    let m = ctx.manifest()?;
    assert_eq!(m.len(), 2);
    assert_eq!(m.ids().collect::<Vec<_>>(), vec!["summary", "other"]);

    let entry = m.get("summary").expect("summary entry");
    assert_eq!(entry.sha256, second.sha256);
    assert_eq!(entry.metadata.title.as_deref(), Some("v2"));
    assert_eq!(entry.metadata.extra.get("rerun"), Some(&serde_json::json!(true)));
    assert_eq!(entry.metadata.step.as_deref(), Some("qc"));

    let on_disk = fs::read_to_string(fx.root().join(&entry.path))?;
    assert_eq!(on_disk, "well,count\nA1,4\nA2,7\n");

    // Raw JSON view: one key, no duplicates.
    let json = fx.manifest_json()?;
    let keys: Vec<_> = json["artifacts"].as_object().expect("artifacts object").keys().cloned().collect();
    assert_eq!(keys.iter().filter(|k| *k == "summary").count(), 1);
    Ok(())
}

#[test]
fn scenario_other_id_cannot_overwrite_an_artifact_file() -> anyhow::Result<()> {
    let fx = RequestFixture::new()?;
    let ctx = fx.context();

    let first = ctx.publish_table("summary", table(&[("A1", "3")])?, PublishOptions::new())?;
    let err = ctx
        .publish_table("summary.csv", table(&[("A1", "9")])?, PublishOptions::new())
        .unwrap_err();
    assert!(matches!(
        err,
        ContextError::Publish(PublishError::PathConflict { ref existing_id, .. }) if existing_id == "summary"
    ));

    let on_disk = fs::read(fx.root().join(&first.path))?;
    assert_eq!(hex::encode(Sha256::digest(&on_disk)), first.sha256);
    assert_eq!(ctx.manifest()?.ids().collect::<Vec<_>>(), vec!["summary"]);
    assert!(ctx.scan_consistency()?.is_consistent());
    Ok(())
}

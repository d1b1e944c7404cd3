//! Scenario: an existing `results.json` that does not parse.
//!
//! GREEN when:
//! - publish fails with `CorruptManifest` instead of starting a fresh document;
//! - the corrupt bytes are left exactly as found;
//! - the payload that was written is reported, not deleted.

use conductor_context::{ContextError, PublishError, PublishOptions, RawArtifactPayload};
use conductor_manifest::ManifestError;
use conductor_testkit::RequestFixture;
use std::fs;

#[test]
fn scenario_corrupt_manifest_is_never_overwritten() -> anyhow::Result<()> {
    let fx = RequestFixture::new()?;
    let garbage = b"{\"schema_version\": 1, \"artifacts\": {\"trunc";
    fs::write(fx.manifest_path(), garbage)?;

    let ctx = fx.context();
    let err = ctx
        .publish_artifact("log.txt", RawArtifactPayload::new(b"hello".to_vec()), PublishOptions::new())
        .unwrap_err();

    match &err {
        ContextError::Publish(PublishError::Unregistered { id, path, source }) => {
            assert_eq!(id, "log.txt");
            assert!(path.is_file());
            assert!(matches!(source, ManifestError::Corrupt { .. }));
        }
        other => panic!("expected Unregistered(Corrupt), got {other:?}"),
    }
    assert!(err.to_string().contains("log.txt"));

    assert_eq!(fs::read(fx.manifest_path())?, garbage);
    assert!(matches!(ctx.manifest(), Err(ContextError::Manifest(ManifestError::Corrupt { .. }))));
    Ok(())
}

#[test]
fn scenario_wrong_shape_counts_as_corrupt() -> anyhow::Result<()> {
    let fx = RequestFixture::new()?;
    // valid JSON, wrong structure
    fs::write(fx.manifest_path(), b"[1, 2, 3]")?;

    let res = fx.store().update(|m| m);
    assert!(matches!(res, Err(ManifestError::Corrupt { .. })));
    assert_eq!(fs::read(fx.manifest_path())?, b"[1, 2, 3]");
    Ok(())
}

//! Scenario: the process dies between temp-file write and rename.
//!
//! Simulated with a commit hook that fails after the temp file is synced,
//! which is the last point before the rename.
//!
//! GREEN when:
//! - `results.json` is byte-identical to the pre-update document and parses;
//! - no temp manifest is left beside it and the lock file is released;
//! - the next healthy update proceeds from the preserved document.

use conductor_context::{PublishOptions, RawArtifactPayload};
use conductor_manifest::{ManifestError, MANIFEST_FILE};
use conductor_publish::PublishError;
use conductor_schemas::ArtifactKind;
use conductor_testkit::RequestFixture;
use std::fs;
use std::io;
use std::sync::Arc;

#[test]
fn scenario_failed_commit_leaves_previous_document_intact() -> anyhow::Result<()> {
    let fx = RequestFixture::new()?;
    fx.publisher().publish(
        ArtifactKind::Artifact,
        "before.txt",
        RawArtifactPayload::new(b"before".to_vec()),
        PublishOptions::new(),
    )?;
    let before = fs::read(fx.manifest_path())?;

    let crash = fx.store().with_commit_hook(Arc::new(|tmp: &std::path::Path| -> io::Result<()> {
        // temp document is complete at this point
        assert!(tmp.metadata()?.len() > 0);
        Err(io::Error::new(io::ErrorKind::Interrupted, "simulated crash before rename"))
    }));
    let err = fx
        .publisher_with_store(crash)
        .publish(
            ArtifactKind::Artifact,
            "after.txt",
            RawArtifactPayload::new(b"after".to_vec()),
            PublishOptions::new(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        PublishError::Unregistered {
            source: ManifestError::Io { .. },
            ..
        }
    ));

    assert_eq!(fs::read(fx.manifest_path())?, before);
    let m = fx.store().load()?;
    assert_eq!(m.ids().collect::<Vec<_>>(), vec!["before.txt"]);

    assert_eq!(fx.files_with_prefix(&format!(".{MANIFEST_FILE}."))?, Vec::<String>::new());
    assert!(!fx.store().lock_path().exists());

    fx.publisher().publish(
        ArtifactKind::Artifact,
        "after.txt",
        RawArtifactPayload::new(b"after".to_vec()),
        PublishOptions::new(),
    )?;
    assert_eq!(fx.store().load()?.len(), 2);
    Ok(())
}

#[test]
fn scenario_crash_on_first_publish_leaves_no_manifest() -> anyhow::Result<()> {
    let fx = RequestFixture::new()?;
    let crash = fx
        .store()
        .with_commit_hook(Arc::new(|_: &std::path::Path| -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "simulated crash"))
        }));

    let res = crash.update(|m| m);
    assert!(matches!(res, Err(ManifestError::Io { .. })));
    assert!(!fx.manifest_path().exists());
    // Absent manifest still loads as the empty default.
    assert!(fx.store().load()?.is_empty());
    Ok(())
}

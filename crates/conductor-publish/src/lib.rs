//! Writes artifact payloads under `<request_root>/results/` and records them
//! in `results.json`.
//!
//! A publish is two steps: write the payload file, then register it through
//! [`ManifestStore::update`]. If the second step fails the file stays on
//! disk unregistered and the caller gets [`PublishError::Unregistered`];
//! [`ArtifactPublisher::scan_consistency`] finds such files later. Nothing
//! here deletes or repairs.
//!
//! A payload file belongs to the id that first recorded it. Another id may
//! only land on the same file with identical bytes (content addressing);
//! otherwise the publish fails with [`PublishError::PathConflict`] before
//! the file is touched.

mod consistency;
mod payload;

pub use consistency::{scan_consistency, ConsistencyReport};
pub use payload::{
    content_type_for, FigureFormat, FigurePayload, Payload, RawArtifactPayload, RenderFigure,
    TableFormat, TablePayload,
};

use chrono::Utc;
use conductor_manifest::{ManifestError, ManifestStore};
use conductor_schemas::{
    check_relative_name, ArtifactKind, ArtifactMetadata, ArtifactRecord, Manifest, NameError,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Subtree of the request root that receives payloads.
pub const RESULTS_DIR: &str = "results";

/// Prefix of in-flight payload temp files (skipped by the consistency scan).
pub(crate) const TEMP_PREFIX: &str = ".conductor-";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error("failed to encode {what}: {message}")]
    Encode { what: &'static str, message: String },

    #[error("table row has {got} cells, expected {expected}")]
    RowWidth { expected: usize, got: usize },

    #[error("unsupported figure format '{extension}' for {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot register '{path}': file does not exist")]
    MissingFile { path: String },

    #[error("cannot register '{path}': only files under results/ can be registered")]
    OutsideResults { path: String },

    #[error("invalid file extension '{extension}': {reason}")]
    InvalidExtension { extension: String, reason: &'static str },

    /// Another id already owns `path` with different contents.
    #[error("artifact '{id}' would overwrite {path}, which belongs to '{existing_id}'")]
    PathConflict {
        id: String,
        existing_id: String,
        path: String,
    },

    /// The payload was written but the manifest update failed. The file at
    /// `path` is on disk and not listed in `results.json`.
    #[error("artifact '{id}' written to {} but not registered in the manifest: {source}", path.display())]
    Unregistered {
        id: String,
        path: PathBuf,
        #[source]
        source: ManifestError,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Where the payload bytes land under `results/<kind>/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Addressing {
    /// `results/<kind>/<name>[.<ext>]`
    #[default]
    ByName,
    /// `results/<kind>/<sha256>[.<ext>]`
    ByContent,
}

/// Caller-supplied metadata for one publish.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub title: Option<String>,
    pub description: Option<String>,
    pub step: Option<String>,
    pub extra: BTreeMap<String, Value>,
    pub addressing: Addressing,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn by_content(mut self) -> Self {
        self.addressing = Addressing::ByContent;
        self
    }

    fn into_metadata(self, content_type: String) -> ArtifactMetadata {
        ArtifactMetadata {
            step: self.step,
            content_type,
            title: self.title,
            description: self.description,
            extra: self.extra,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactPublisher {
    request_root: PathBuf,
    store: ManifestStore,
}

impl ArtifactPublisher {
    pub fn new(request_root: impl Into<PathBuf>, store: ManifestStore) -> Self {
        Self {
            request_root: request_root.into(),
            store,
        }
    }

    /// Publisher writing to `<request_root>/results/` and `<request_root>/results.json`.
    pub fn for_request(request_root: impl Into<PathBuf>, request_id: impl Into<String>) -> Self {
        let request_root = request_root.into();
        let store = ManifestStore::for_request(&request_root, request_id);
        Self::new(request_root, store)
    }

    pub fn request_root(&self) -> &Path {
        &self.request_root
    }

    pub fn results_dir(&self) -> PathBuf {
        self.request_root.join(RESULTS_DIR)
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    /// Write `payload` as a `kind` artifact and register it under id `name`.
    ///
    /// Publishing an existing id replaces its manifest entry.
    pub fn publish(
        &self,
        kind: ArtifactKind,
        name: &str,
        payload: impl Into<Payload>,
        options: PublishOptions,
    ) -> Result<ArtifactRecord, PublishError> {
        check_relative_name(name)?;
        let encoded = payload.into().encode()?;
        if let Some(ext) = encoded.extension.as_deref() {
            check_extension(ext)?;
        }
        let sha256 = hex::encode(Sha256::digest(&encoded.bytes));

        let file_name = match options.addressing {
            Addressing::ByName => with_extension(name, encoded.extension.as_deref()),
            Addressing::ByContent => match encoded.extension.as_deref() {
                Some(ext) => format!("{sha256}.{ext}"),
                None => sha256.clone(),
            },
        };
        check_relative_name(&file_name)?;
        let rel = format!("{RESULTS_DIR}/{}/{file_name}", kind.dir_name());
        let abs = self.request_root.join(&rel);

        // Refuse before touching the bytes another id points at. An unreadable
        // manifest is reported by the registration step instead.
        if let Ok(current) = self.store.load() {
            check_path_owner(&current, name, &rel, &sha256)?;
        }
        write_payload(&abs, &encoded.bytes)?;

        let record = ArtifactRecord {
            kind,
            path: rel,
            created_at: Utc::now(),
            sha256,
            size_bytes: encoded.bytes.len() as u64,
            metadata: options.into_metadata(encoded.content_type),
        };
        self.register_record(name, record, abs)
    }

    /// Record a file the script already wrote under `results/`.
    ///
    /// `rel_path` is relative to the request root (e.g.
    /// `results/figure/heatmap.png`).
    pub fn register(
        &self,
        kind: ArtifactKind,
        name: &str,
        rel_path: &str,
        options: PublishOptions,
    ) -> Result<ArtifactRecord, PublishError> {
        check_relative_name(name)?;
        check_relative_name(rel_path)?;
        if !rel_path.starts_with(&format!("{RESULTS_DIR}/")) {
            return Err(PublishError::OutsideResults {
                path: rel_path.to_string(),
            });
        }
        let abs = self.request_root.join(rel_path);
        if !abs.is_file() {
            return Err(PublishError::MissingFile {
                path: rel_path.to_string(),
            });
        }

        let (sha256, size_bytes) = hash_file(&abs)?;
        let ext = abs.extension().map(|e| e.to_string_lossy().into_owned());
        let record = ArtifactRecord {
            kind,
            path: rel_path.to_string(),
            created_at: Utc::now(),
            sha256,
            size_bytes,
            metadata: options.into_metadata(content_type_for(ext.as_deref()).to_string()),
        };
        self.register_record(name, record, abs)
    }

    /// Compare `results/` against `results.json`.
    pub fn scan_consistency(&self) -> Result<ConsistencyReport, PublishError> {
        let manifest = self.store.load()?;
        let report = scan_consistency(&self.request_root, &manifest)?;
        if !report.unregistered.is_empty() {
            warn!(
                count = report.unregistered.len(),
                "files under results/ are not registered in results.json"
            );
        }
        Ok(report)
    }

    fn register_record(
        &self,
        name: &str,
        record: ArtifactRecord,
        abs: PathBuf,
    ) -> Result<ArtifactRecord, PublishError> {
        let entry = record.clone();
        match self.store.try_update(move |mut m| {
            check_path_owner(&m, name, &entry.path, &entry.sha256)?;
            m.upsert(name, entry);
            Ok(m)
        }) {
            Ok(_) => {
                info!(kind = %record.kind, id = name, path = %record.path, "artifact published");
                Ok(record)
            }
            Err(PublishError::Manifest(source)) => {
                warn!(id = name, path = %abs.display(), error = %source, "artifact written but not registered");
                Err(PublishError::Unregistered {
                    id: name.to_string(),
                    path: abs,
                    source,
                })
            }
            Err(err) => Err(err),
        }
    }
}

/// A payload file may be shared by several ids only while they all record
/// the same bytes.
fn check_path_owner(manifest: &Manifest, id: &str, path: &str, sha256: &str) -> Result<(), PublishError> {
    let owner = manifest
        .iter()
        .find(|(other, rec)| *other != id && rec.path == path && rec.sha256 != sha256);
    match owner {
        Some((existing_id, _)) => Err(PublishError::PathConflict {
            id: id.to_string(),
            existing_id: existing_id.to_string(),
            path: path.to_string(),
        }),
        None => Ok(()),
    }
}

/// Extensions become part of a file name under `results/<kind>/`.
fn check_extension(ext: &str) -> Result<(), PublishError> {
    let reason = if ext.is_empty() {
        "extension is empty"
    } else if ext.contains(['/', '\\']) {
        "extension contains a path separator"
    } else if ext.contains('\0') {
        "extension contains a NUL byte"
    } else if ext.split('.').any(str::is_empty) {
        "extension contains an empty segment"
    } else {
        return Ok(());
    };
    Err(PublishError::InvalidExtension {
        extension: ext.to_string(),
        reason,
    })
}

/// Append `.ext` unless `name` already ends with it (case-insensitive).
fn with_extension(name: &str, ext: Option<&str>) -> String {
    let Some(ext) = ext else {
        return name.to_string();
    };
    let has = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
        .unwrap_or(false);
    if has {
        name.to_string()
    } else {
        format!("{name}.{ext}")
    }
}

/// Write through a temp file in the destination directory, then rename.
/// A failure at any point leaves no partial file at `dest`.
fn write_payload(dest: &Path, bytes: &[u8]) -> Result<(), PublishError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|source| PublishError::Io {
        op: "create results directory",
        path: dir.to_path_buf(),
        source,
    })?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)
        .map_err(|source| PublishError::Io {
            op: "create temp payload",
            path: dir.to_path_buf(),
            source,
        })?;
    let write = (|| -> io::Result<()> {
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.as_file().sync_all()
    })();
    write.map_err(|source| PublishError::Io {
        op: "write payload",
        path: dest.to_path_buf(),
        source,
    })?;
    tmp.persist(dest).map_err(|err| PublishError::Io {
        op: "rename payload",
        path: dest.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

fn hash_file(path: &Path) -> Result<(String, u64), PublishError> {
    let io_err = |source| PublishError::Io {
        op: "hash artifact",
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extension_is_appended_once() {
        assert_eq!(with_extension("summary", Some("csv")), "summary.csv");
        assert_eq!(with_extension("summary.CSV", Some("csv")), "summary.CSV");
        assert_eq!(with_extension("heatmap.v2", Some("png")), "heatmap.v2.png");
        assert_eq!(with_extension("blob", None), "blob");
    }

    #[test]
    fn publish_table_writes_file_and_entry() {
        let tmp = tempdir().unwrap();
        let p = ArtifactPublisher::for_request(tmp.path(), "REQ-1");
        let mut t = TablePayload::new(["well", "mean"]);
        t.push_row(["A1", "0.5"]).unwrap();

        let rec = p
            .publish(ArtifactKind::Table, "summary", t, PublishOptions::new().title("Summary"))
            .unwrap();

        assert_eq!(rec.path, "results/table/summary.csv");
        assert_eq!(fs::read_to_string(tmp.path().join(&rec.path)).unwrap(), "well,mean\nA1,0.5\n");
        let m = p.store().load().unwrap();
        assert_eq!(m.get("summary").unwrap().metadata.title.as_deref(), Some("Summary"));
    }

    #[test]
    fn content_addressed_path_uses_digest() {
        let tmp = tempdir().unwrap();
        let p = ArtifactPublisher::for_request(tmp.path(), "REQ-1");
        let payload = RawArtifactPayload::new(b"hello".to_vec()).with_extension("txt");

        let rec = p
            .publish(ArtifactKind::Artifact, "greeting", payload, PublishOptions::new().by_content())
            .unwrap();

        let digest = hex::encode(Sha256::digest(b"hello"));
        assert_eq!(rec.path, format!("results/artifact/{digest}.txt"));
        assert_eq!(rec.sha256, digest);
        assert_eq!(rec.size_bytes, 5);
    }

    #[test]
    fn traversal_names_are_rejected_without_writing() {
        let tmp = tempdir().unwrap();
        let p = ArtifactPublisher::for_request(tmp.path(), "REQ-1");
        let err = p
            .publish(ArtifactKind::Artifact, "../escape", RawArtifactPayload::new(b"x".to_vec()), PublishOptions::new())
            .unwrap_err();
        assert!(matches!(err, PublishError::InvalidName(_)));
        assert!(!p.results_dir().exists());
    }

    #[test]
    fn extension_cannot_leave_kind_dir() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("REQ-1");
        let p = ArtifactPublisher::for_request(&root, "REQ-1");

        for addressing in [PublishOptions::new(), PublishOptions::new().by_content()] {
            let payload = RawArtifactPayload::new(b"x".to_vec()).with_extension("/../../../../escaped.txt");
            let err = p.publish(ArtifactKind::Artifact, "blob", payload, addressing).unwrap_err();
            assert!(matches!(err, PublishError::InvalidExtension { .. }), "{err:?}");
        }
        for ext in ["a\\b", "x\0", "tar..gz", ""] {
            let payload = RawArtifactPayload::new(b"x".to_vec()).with_extension(ext);
            let err = p.publish(ArtifactKind::Artifact, "blob", payload, PublishOptions::new()).unwrap_err();
            assert!(matches!(err, PublishError::InvalidExtension { .. }), "{ext:?}: {err:?}");
        }

        assert!(!tmp.path().join("escaped.txt").exists());
        assert!(!p.results_dir().exists());
        assert!(!p.store().path().exists());

        let ok = RawArtifactPayload::new(b"x".to_vec()).with_extension(".tar.gz");
        let rec = p.publish(ArtifactKind::Artifact, "bundle", ok, PublishOptions::new()).unwrap();
        assert_eq!(rec.path, "results/artifact/bundle.tar.gz");
    }

    #[test]
    fn distinct_ids_cannot_share_a_payload_file() {
        let tmp = tempdir().unwrap();
        let p = ArtifactPublisher::for_request(tmp.path(), "REQ-1");
        let table = |v: &str| {
            let mut t = TablePayload::new(["well", "mean"]);
            t.push_row(["A1", v]).unwrap();
            t
        };

        let first = p.publish(ArtifactKind::Table, "summary", table("1"), PublishOptions::new()).unwrap();
        let err = p
            .publish(ArtifactKind::Table, "summary.csv", table("2"), PublishOptions::new())
            .unwrap_err();
        match err {
            PublishError::PathConflict { id, existing_id, path } => {
                assert_eq!(id, "summary.csv");
                assert_eq!(existing_id, "summary");
                assert_eq!(path, "results/table/summary.csv");
            }
            other => panic!("expected PathConflict, got {other:?}"),
        }

        // First artifact untouched on disk and in the manifest.
        let on_disk = fs::read(tmp.path().join(&first.path)).unwrap();
        assert_eq!(hex::encode(Sha256::digest(&on_disk)), first.sha256);
        let m = p.store().load().unwrap();
        assert_eq!(m.ids().collect::<Vec<_>>(), vec!["summary"]);

        // Registering the same file under another id is refused once its bytes differ.
        fs::write(tmp.path().join(&first.path), b"edited").unwrap();
        let err = p
            .register(ArtifactKind::Table, "copy", &first.path, PublishOptions::new())
            .unwrap_err();
        assert!(matches!(err, PublishError::PathConflict { .. }));

        // Republishing the owning id is still a replace.
        p.publish(ArtifactKind::Table, "summary", table("3"), PublishOptions::new()).unwrap();
        assert!(p.scan_consistency().unwrap().is_consistent());
    }

    #[test]
    fn identical_content_may_share_a_content_addressed_file() {
        let tmp = tempdir().unwrap();
        let p = ArtifactPublisher::for_request(tmp.path(), "REQ-1");
        let payload = || RawArtifactPayload::new(b"same".to_vec()).with_extension("txt");

        let a = p.publish(ArtifactKind::Artifact, "a", payload(), PublishOptions::new().by_content()).unwrap();
        let b = p.publish(ArtifactKind::Artifact, "b", payload(), PublishOptions::new().by_content()).unwrap();
        assert_eq!(a.path, b.path);
        assert_eq!(p.store().load().unwrap().len(), 2);
    }

    #[test]
    fn register_existing_file() {
        let tmp = tempdir().unwrap();
        let p = ArtifactPublisher::for_request(tmp.path(), "REQ-1");
        let rel = "results/figure/heatmap.png";
        fs::create_dir_all(tmp.path().join("results/figure")).unwrap();
        fs::write(tmp.path().join(rel), b"\x89PNG").unwrap();

        let rec = p.register(ArtifactKind::Figure, "heatmap", rel, PublishOptions::new()).unwrap();
        assert_eq!(rec.metadata.content_type, "image/png");
        assert_eq!(rec.size_bytes, 4);

        let missing = p.register(ArtifactKind::Figure, "nope", "results/figure/nope.png", PublishOptions::new());
        assert!(matches!(missing, Err(PublishError::MissingFile { .. })));
        let outside = p.register(ArtifactKind::Figure, "d", "data/x.png", PublishOptions::new());
        assert!(matches!(outside, Err(PublishError::OutsideResults { .. })));
    }

    #[test]
    fn corrupt_manifest_leaves_unregistered_payload() {
        let tmp = tempdir().unwrap();
        let p = ArtifactPublisher::for_request(tmp.path(), "REQ-1");
        fs::write(p.store().path(), b"[]").unwrap();

        let err = p
            .publish(ArtifactKind::Artifact, "blob.bin", RawArtifactPayload::new(vec![1, 2, 3]), PublishOptions::new())
            .unwrap_err();
        match err {
            PublishError::Unregistered { id, path, source } => {
                assert_eq!(id, "blob.bin");
                assert!(path.is_file());
                assert!(matches!(source, ManifestError::Corrupt { .. }));
            }
            other => panic!("expected Unregistered, got {other:?}"),
        }
    }
}

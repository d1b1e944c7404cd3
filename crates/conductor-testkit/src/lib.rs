//! Request-tree fixtures shared by the scenario tests.
//!
//! A [`RequestFixture`] is a throwaway request root (`data/`, `results/`,
//! `results.json`) inside a temp directory that is removed on drop.

use anyhow::{Context as _, Result};
use conductor_config::{ContextConfig, ExecutionMode};
use conductor_context::Context;
use conductor_manifest::{ManifestStore, MANIFEST_FILE};
use conductor_publish::ArtifactPublisher;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const DEFAULT_REQUEST_ID: &str = "REQ-TEST";

pub struct RequestFixture {
    _dir: TempDir,
    root: PathBuf,
    request_id: String,
}

impl RequestFixture {
    pub fn new() -> Result<Self> {
        Self::with_request_id(DEFAULT_REQUEST_ID)
    }

    /// The request root is `<tmp>/<request_id>`, so a context's derived
    /// request id matches.
    pub fn with_request_id(request_id: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join(request_id);
        fs::create_dir_all(root.join("data"))?;
        Ok(Self {
            _dir: dir,
            root,
            request_id: request_id.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Write `contents` to `data/<rel>`, creating parents.
    pub fn write_data(&self, rel: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        self.write_file(&format!("data/{rel}"), contents)
    }

    /// Write `contents` to `<root>/<rel>`, creating parents.
    pub fn write_file(&self, rel: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write fixture {}", path.display()))?;
        Ok(path)
    }

    pub fn config(&self) -> ContextConfig {
        ContextConfig::new(&self.root).with_request_id(&self.request_id)
    }

    pub fn context(&self) -> Context {
        Context::new(&self.config(), ExecutionMode::Normal)
    }

    pub fn context_with_step(&self, step: &str) -> Context {
        Context::new(&self.config().with_step(step), ExecutionMode::Normal)
    }

    pub fn store(&self) -> ManifestStore {
        ManifestStore::for_request(&self.root, &self.request_id)
    }

    pub fn publisher(&self) -> ArtifactPublisher {
        ArtifactPublisher::for_request(&self.root, &self.request_id)
    }

    /// Publisher whose manifest updates go through `store`.
    pub fn publisher_with_store(&self, store: ManifestStore) -> ArtifactPublisher {
        ArtifactPublisher::new(&self.root, store)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// `results.json` parsed as plain JSON (fails if absent or torn).
    pub fn manifest_json(&self) -> Result<serde_json::Value> {
        let path = self.manifest_path();
        let raw = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        serde_json::from_slice(&raw).with_context(|| format!("parse {}", path.display()))
    }

    /// Files in the request root (not recursive) whose names start with `prefix`.
    pub fn files_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }
}

/// An Operetta "object results" export: one row per segmented object.
pub fn operetta_objects_csv(objects: &[(&str, u32, f64)]) -> String {
    let mut out = String::from("Row,Column,Area\n");
    for (row, col, area) in objects {
        out.push_str(&format!("{row},{col},{area}\n"));
    }
    out
}

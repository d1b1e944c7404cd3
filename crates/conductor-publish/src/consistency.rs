//! Detects partial publishes: payloads on disk that `results.json` does not
//! list, and manifest entries whose payload is gone. Report only.

use conductor_schemas::Manifest;
use serde::Serialize;
use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

use crate::{PublishError, RESULTS_DIR, TEMP_PREFIX};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Request-relative paths under `results/` with no manifest entry, sorted.
    pub unregistered: Vec<String>,
    /// Manifest ids whose recorded path does not exist, in manifest order.
    pub missing: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.unregistered.is_empty() && self.missing.is_empty()
    }
}

pub fn scan_consistency(request_root: &Path, manifest: &Manifest) -> Result<ConsistencyReport, PublishError> {
    let registered: BTreeSet<&str> = manifest.iter().map(|(_, r)| r.path.as_str()).collect();

    let mut unregistered = Vec::new();
    let results = request_root.join(RESULTS_DIR);
    if results.is_dir() {
        for entry in WalkDir::new(&results).follow_links(false) {
            let entry = entry.map_err(|err| PublishError::Io {
                op: "scan results",
                path: err.path().map(Path::to_path_buf).unwrap_or_else(|| results.clone()),
                source: io::Error::from(err),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(request_root) else {
                continue;
            };
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !registered.contains(rel.as_str()) {
                unregistered.push(rel);
            }
        }
    }
    unregistered.sort();

    let missing = manifest
        .iter()
        .filter(|(_, r)| !request_root.join(&r.path).is_file())
        .map(|(id, _)| id.to_string())
        .collect();

    Ok(ConsistencyReport { unregistered, missing })
}

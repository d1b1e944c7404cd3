//! Shared data model for a request's published results.
//!
//! `results.json` is one [`Manifest`]: a small request block plus an ordered
//! map from artifact id to [`ArtifactRecord`]. Every crate that reads or
//! writes the manifest goes through these types so the on-disk shape has a
//! single definition.

mod name;

pub use name::{check_relative_name, NameError};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Current `results.json` layout version.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Artifact kind
// ---------------------------------------------------------------------------

/// The closed set of things a script can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Figure,
    Table,
    Artifact,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [ArtifactKind::Figure, ArtifactKind::Table, ArtifactKind::Artifact];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Figure => "figure",
            ArtifactKind::Table => "table",
            ArtifactKind::Artifact => "artifact",
        }
    }

    /// Directory under `results/` holding payloads of this kind.
    pub fn dir_name(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "figure" | "figures" => Ok(ArtifactKind::Figure),
            "table" | "tables" => Ok(ArtifactKind::Table),
            "artifact" | "artifacts" => Ok(ArtifactKind::Artifact),
            other => Err(format!(
                "invalid artifact kind '{other}'. expected one of: figure | table | artifact"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact record
// ---------------------------------------------------------------------------

/// Descriptive metadata attached to one published artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Name of the pipeline step that produced the artifact, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// MIME type of the stored bytes (e.g. `"text/csv"`).
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form caller-supplied fields.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl ArtifactMetadata {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            step: None,
            content_type: content_type.into(),
            title: None,
            description: None,
            extra: BTreeMap::new(),
        }
    }
}

/// One entry of `results.json`. Immutable once written; a re-publish under
/// the same id replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub kind: ArtifactKind,
    /// Location of the payload relative to the request root, `/`-separated
    /// (e.g. `"results/table/summary.csv"`).
    pub path: String,
    pub created_at: DateTime<Utc>,
    /// Lowercase hex SHA-256 of the stored bytes.
    pub sha256: String,
    pub size_bytes: u64,
    pub metadata: ArtifactMetadata,
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The whole `results.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub request: RequestInfo,
    #[serde(default)]
    pub artifacts: IndexMap<String, ArtifactRecord>,
}

impl Manifest {
    /// Empty document for a request that has not published anything yet.
    pub fn empty(request_id: impl Into<String>) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            request: RequestInfo {
                request_id: request_id.into(),
                updated_at: None,
            },
            artifacts: IndexMap::new(),
        }
    }

    /// Insert or replace the record stored under `id`.
    ///
    /// A replaced id keeps its original position. Returns the previous
    /// record, if any.
    pub fn upsert(&mut self, id: impl Into<String>, record: ArtifactRecord) -> Option<ArtifactRecord> {
        self.artifacts.insert(id.into(), record)
    }

    pub fn get(&self, id: &str) -> Option<&ArtifactRecord> {
        self.artifacts.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.artifacts.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArtifactRecord)> {
        self.artifacts.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Records of a single kind, in manifest order.
    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = (&str, &ArtifactRecord)> {
        self.iter().filter(move |(_, r)| r.kind == kind)
    }
}

//! Input-file resolution under `<request_root>/data/**`.
//!
//! Analysis scripts refer to inputs by a logical name (`"Operetta_objectresults"`)
//! rather than by where an instrument export happened to land inside the
//! request tree. [`PathResolver`] maps that name to exactly one file, or
//! fails:
//!
//! - zero matches  -> [`ResolveError::NotFound`]
//! - two or more   -> [`ResolveError::Ambiguous`], listing every candidate
//!
//! There is no tie-breaking. Picking the shallowest or newest file would
//! silently analyse the wrong dataset when an export is duplicated.

use conductor_schemas::{check_relative_name, NameError};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Subtree of the request root that holds input data.
pub const DATA_DIR: &str = "data";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error("could not resolve '{name}': no matching file under {}", searched.display())]
    NotFound { name: String, searched: PathBuf },

    #[error(
        "could not resolve '{name}': {} files match under data/: [{}]",
        candidates.len(),
        join_paths(candidates)
    )]
    Ambiguous { name: String, candidates: Vec<PathBuf> },

    #[error("failed to traverse {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolves logical data-file names for one request root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    request_root: PathBuf,
}

impl PathResolver {
    pub fn new(request_root: impl Into<PathBuf>) -> Self {
        Self {
            request_root: request_root.into(),
        }
    }

    pub fn request_root(&self) -> &Path {
        &self.request_root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.request_root.join(DATA_DIR)
    }

    /// Map `name` to the single matching file.
    ///
    /// `name` may be a stem (`Operetta_objectresults`), a file name
    /// (`Operetta_objectresults.csv`) or a request-relative path
    /// (`data/Operetta_objectresults.csv`). A request-relative path that
    /// exists is returned as is; otherwise only its last segment is searched
    /// for.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ResolveError> {
        check_relative_name(name)?;

        let target = match name.rsplit_once('/') {
            Some((_, last)) => {
                let direct = self.request_root.join(name);
                if direct.is_file() {
                    debug!(name, path = %direct.display(), "resolved direct path");
                    return Ok(direct);
                }
                last
            }
            None => name,
        };

        let mut candidates = self.candidates(target)?;
        match candidates.len() {
            0 => Err(ResolveError::NotFound {
                name: name.to_string(),
                searched: self.data_dir(),
            }),
            1 => {
                let hit = candidates.remove(0);
                debug!(name, path = %hit.display(), "resolved under data/");
                Ok(hit)
            }
            _ => Err(ResolveError::Ambiguous {
                name: name.to_string(),
                candidates,
            }),
        }
    }

    /// Every file under `data/**` matching `target`, sorted.
    ///
    /// A missing `data/` directory is reported as [`ResolveError::NotFound`].
    pub fn candidates(&self, target: &str) -> Result<Vec<PathBuf>, ResolveError> {
        let data = self.data_dir();
        if !data.is_dir() {
            return Err(ResolveError::NotFound {
                name: target.to_string(),
                searched: data,
            });
        }

        let mut hits = Vec::new();
        for entry in WalkDir::new(&data).follow_links(false) {
            let entry = entry.map_err(|err| ResolveError::Io {
                path: err.path().map(Path::to_path_buf).unwrap_or_else(|| data.clone()),
                source: io::Error::from(err),
            })?;
            if entry.file_type().is_file() && file_matches(entry.file_name(), target) {
                hits.push(entry.into_path());
            }
        }
        hits.sort();
        Ok(hits)
    }
}

/// Free-function form of [`PathResolver::resolve`].
pub fn resolve(request_root: &Path, name: &str) -> Result<PathBuf, ResolveError> {
    PathResolver::new(request_root).resolve(name)
}

/// Exact file-name match, or exact stem match (name minus last extension).
fn file_matches(file_name: &OsStr, target: &str) -> bool {
    if file_name == OsStr::new(target) {
        return true;
    }
    Path::new(file_name).file_stem() == Some(OsStr::new(target))
}

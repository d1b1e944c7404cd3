use std::path::{Component, Path};
use thiserror::Error;

/// A caller-supplied relative name was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid name '{name}': {reason}")]
pub struct NameError {
    pub name: String,
    pub reason: &'static str,
}

/// Validate a relative identifier used to address files inside a request.
///
/// Accepts `summary`, `plate_heatmap.png`, `qc/summary.csv`. Rejects empty
/// names, absolute paths, `.`/`..` segments, empty segments, backslashes
/// and NUL bytes. Nothing that passes can escape the directory it is
/// joined onto.
pub fn check_relative_name(name: &str) -> Result<(), NameError> {
    let fail = |reason| {
        Err(NameError {
            name: name.to_string(),
            reason,
        })
    };

    if name.trim().is_empty() {
        return fail("name is empty");
    }
    if name.contains('\0') {
        return fail("name contains a NUL byte");
    }
    if name.contains('\\') {
        return fail("name contains a backslash");
    }
    if name.starts_with('/') {
        return fail("name must be relative");
    }
    if name.split('/').any(|seg| seg.is_empty()) {
        return fail("name contains an empty path segment");
    }
    for comp in Path::new(name).components() {
        match comp {
            Component::Normal(_) => {}
            Component::ParentDir => return fail("name contains a '..' segment"),
            Component::CurDir => return fail("name contains a '.' segment"),
            Component::RootDir | Component::Prefix(_) => return fail("name must be relative"),
        }
    }
    // `Path::components` folds interior "." away; catch it explicitly.
    if name.split('/').any(|seg| seg == ".") {
        return fail("name contains a '.' segment");
    }
    Ok(())
}

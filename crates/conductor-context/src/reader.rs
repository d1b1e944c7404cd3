use serde::de::DeserializeOwned;
use std::path::Path;

use crate::ContextError;

/// A CSV file loaded as strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// All cells of column `name`, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|r| r.get(idx).map(String::as_str).unwrap_or(""))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn reader_for(path: &Path) -> Result<csv::Reader<std::fs::File>, ContextError> {
    let tab = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("tsv"))
        .unwrap_or(false);
    csv::ReaderBuilder::new()
        .delimiter(if tab { b'\t' } else { b',' })
        .flexible(true)
        .from_path(path)
        .map_err(|source| ContextError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn read_table(path: &Path) -> Result<CsvTable, ContextError> {
    let csv_err = |source| ContextError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = reader_for(path)?;
    let headers = rdr
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(str::to_string)
        .collect();
    let mut rows = Vec::new();
    for rec in rdr.records() {
        rows.push(rec.map_err(csv_err)?.iter().map(str::to_string).collect());
    }
    Ok(CsvTable { headers, rows })
}

pub(crate) fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ContextError> {
    let mut rdr = reader_for(path)?;
    rdr.deserialize()
        .map(|r| {
            r.map_err(|source| ContextError::Csv {
                path: path.to_path_buf(),
                source,
            })
        })
        .collect()
}

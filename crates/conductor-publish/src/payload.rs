//! Publishable payloads.
//!
//! Each variant owns its serialization; the call site picks the variant,
//! nothing is inferred from the value at runtime.

use conductor_schemas::ArtifactKind;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::PublishError;

/// Bytes ready to be written, plus how to name and describe them.
#[derive(Debug, Clone)]
pub(crate) struct Encoded {
    pub bytes: Vec<u8>,
    pub extension: Option<String>,
    pub content_type: String,
}

// ---------------------------------------------------------------------------
// Figures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FigureFormat {
    Png,
    Svg,
    Pdf,
    Jpeg,
}

impl FigureFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FigureFormat::Png => "png",
            FigureFormat::Svg => "svg",
            FigureFormat::Pdf => "pdf",
            FigureFormat::Jpeg => "jpg",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            FigureFormat::Png => "image/png",
            FigureFormat::Svg => "image/svg+xml",
            FigureFormat::Pdf => "application/pdf",
            FigureFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(FigureFormat::Png),
            "svg" => Some(FigureFormat::Svg),
            "pdf" => Some(FigureFormat::Pdf),
            "jpg" | "jpeg" => Some(FigureFormat::Jpeg),
            _ => None,
        }
    }
}

/// Anything that can draw itself into an image stream.
pub trait RenderFigure {
    fn render(&self, format: FigureFormat, out: &mut dyn Write) -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FigurePayload {
    format: FigureFormat,
    bytes: Vec<u8>,
}

impl FigurePayload {
    /// Already-encoded image bytes.
    pub fn encoded(format: FigureFormat, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            format,
            bytes: bytes.into(),
        }
    }

    /// Copy an image the script already saved; the format comes from the extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PublishError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = FigureFormat::from_extension(&ext).ok_or_else(|| PublishError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: ext.clone(),
        })?;
        let bytes = fs::read(path).map_err(|source| PublishError::Io {
            op: "read figure",
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { format, bytes })
    }

    pub fn render<R: RenderFigure + ?Sized>(figure: &R, format: FigureFormat) -> Result<Self, PublishError> {
        let mut bytes = Vec::new();
        figure
            .render(format, &mut bytes)
            .map_err(|err| PublishError::Encode {
                what: "figure",
                message: err.to_string(),
            })?;
        Ok(Self { format, bytes })
    }

    pub fn format(&self) -> FigureFormat {
        self.format
    }

    fn encode(&self) -> Encoded {
        Encoded {
            bytes: self.bytes.clone(),
            extension: Some(self.format.extension().to_string()),
            content_type: self.format.content_type().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableFormat {
    #[default]
    Csv,
    /// Array of `{header: cell}` objects.
    Json,
}

/// Rectangular string table. Every row has one cell per header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePayload {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    format: TableFormat,
}

impl TablePayload {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            format: TableFormat::Csv,
        }
    }

    /// Build from serializable records (struct fields become headers).
    pub fn from_records<T: Serialize>(records: &[T]) -> Result<Self, PublishError> {
        let encode_err = |err: csv::Error| PublishError::Encode {
            what: "table",
            message: err.to_string(),
        };

        let mut wtr = csv::Writer::from_writer(Vec::new());
        for r in records {
            wtr.serialize(r).map_err(encode_err)?;
        }
        let raw = wtr.into_inner().map_err(|err| PublishError::Encode {
            what: "table",
            message: err.to_string(),
        })?;

        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(raw.as_slice());
        let headers = rdr
            .headers()
            .map_err(encode_err)?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::with_capacity(records.len());
        for rec in rdr.records() {
            rows.push(rec.map_err(encode_err)?.iter().map(str::to_string).collect());
        }
        Ok(Self {
            headers,
            rows,
            format: TableFormat::Csv,
        })
    }

    pub fn push_row<I, S>(&mut self, row: I) -> Result<(), PublishError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let row: Vec<String> = row.into_iter().map(Into::into).collect();
        if row.len() != self.headers.len() {
            return Err(PublishError::RowWidth {
                expected: self.headers.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn with_format(mut self, format: TableFormat) -> Self {
        self.format = format;
        self
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn format(&self) -> TableFormat {
        self.format
    }

    fn encode(&self) -> Result<Encoded, PublishError> {
        match self.format {
            TableFormat::Csv => {
                let encode_err = |err: csv::Error| PublishError::Encode {
                    what: "table",
                    message: err.to_string(),
                };
                let mut wtr = csv::Writer::from_writer(Vec::new());
                wtr.write_record(&self.headers).map_err(encode_err)?;
                for row in &self.rows {
                    wtr.write_record(row).map_err(encode_err)?;
                }
                let bytes = wtr.into_inner().map_err(|err| PublishError::Encode {
                    what: "table",
                    message: err.to_string(),
                })?;
                Ok(Encoded {
                    bytes,
                    extension: Some("csv".to_string()),
                    content_type: "text/csv".to_string(),
                })
            }
            TableFormat::Json => {
                let objects: Vec<serde_json::Map<String, serde_json::Value>> = self
                    .rows
                    .iter()
                    .map(|row| {
                        self.headers
                            .iter()
                            .cloned()
                            .zip(row.iter().cloned().map(serde_json::Value::String))
                            .collect()
                    })
                    .collect();
                let mut bytes = serde_json::to_vec_pretty(&objects).map_err(|err| PublishError::Encode {
                    what: "table",
                    message: err.to_string(),
                })?;
                bytes.push(b'\n');
                Ok(Encoded {
                    bytes,
                    extension: Some("json".to_string()),
                    content_type: "application/json".to_string(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Raw artifacts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RawArtifactPayload {
    bytes: Vec<u8>,
    extension: Option<String>,
    content_type: Option<String>,
}

impl RawArtifactPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            extension: None,
            content_type: None,
        }
    }

    /// Copy a file from disk, keeping its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PublishError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| PublishError::Io {
            op: "read artifact",
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            bytes,
            extension: path.extension().map(|e| e.to_string_lossy().into_owned()),
            content_type: None,
        })
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = Some(ext.into().trim_start_matches('.').to_string());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn encode(&self) -> Encoded {
        let content_type = self
            .content_type
            .clone()
            .unwrap_or_else(|| content_type_for(self.extension.as_deref()).to_string());
        Encoded {
            bytes: self.bytes.clone(),
            extension: self.extension.clone(),
            content_type,
        }
    }
}

// ---------------------------------------------------------------------------
// Closed payload set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Payload {
    Figure(FigurePayload),
    Table(TablePayload),
    Raw(RawArtifactPayload),
}

impl Payload {
    /// The kind this payload is published as through the `Context` helpers.
    pub fn natural_kind(&self) -> ArtifactKind {
        match self {
            Payload::Figure(_) => ArtifactKind::Figure,
            Payload::Table(_) => ArtifactKind::Table,
            Payload::Raw(_) => ArtifactKind::Artifact,
        }
    }

    pub(crate) fn encode(&self) -> Result<Encoded, PublishError> {
        match self {
            Payload::Figure(f) => Ok(f.encode()),
            Payload::Table(t) => t.encode(),
            Payload::Raw(r) => Ok(r.encode()),
        }
    }
}

impl From<FigurePayload> for Payload {
    fn from(p: FigurePayload) -> Self {
        Payload::Figure(p)
    }
}

impl From<TablePayload> for Payload {
    fn from(p: TablePayload) -> Self {
        Payload::Table(p)
    }
}

impl From<RawArtifactPayload> for Payload {
    fn from(p: RawArtifactPayload) -> Self {
        Payload::Raw(p)
    }
}

/// MIME type guess for a file extension.
pub fn content_type_for(extension: Option<&str>) -> &'static str {
    let Some(ext) = extension else {
        return "application/octet-stream";
    };
    if let Some(fig) = FigureFormat::from_extension(ext) {
        return fig.content_type();
    }
    match ext.to_ascii_lowercase().as_str() {
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "json" => "application/json",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "parquet" => "application/vnd.apache.parquet",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

//! The handle an analysis script works through.
//!
//! ```no_run
//! use conductor_context::{Context, PublishOptions, TablePayload};
//!
//! fn main() -> Result<(), conductor_context::ContextError> {
//!     let ctx = Context::from_env()?;
//!     let objects = ctx.read_csv("Operetta_objectresults")?;
//!
//!     let mut summary = TablePayload::new(["objects"]);
//!     summary.push_row([objects.len().to_string()])?;
//!     ctx.publish_table("summary", summary, PublishOptions::new().title("Object count"))?;
//!     Ok(())
//! }
//! ```
//!
//! Reads go through [`PathResolver`]; writes go through [`ArtifactPublisher`].
//! The context adds nothing but argument shaping and the default `step`.
//! There is no process-wide instance: build one and pass it to the code
//! that needs it. `Context` is `Send + Sync`, so worker threads may publish
//! through a shared reference.

mod reader;

pub use conductor_config::{ConfigError, ContextConfig, ExecutionMode};
pub use conductor_manifest::ManifestError;
pub use conductor_publish::{
    Addressing, ConsistencyReport, FigureFormat, FigurePayload, Payload, PublishError,
    PublishOptions, RawArtifactPayload, RenderFigure, TableFormat, TablePayload,
};
pub use conductor_resolve::ResolveError;
pub use conductor_schemas::{ArtifactKind, ArtifactRecord, Manifest};
pub use reader::CsvTable;

use conductor_publish::ArtifactPublisher;
use conductor_resolve::PathResolver;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse csv {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Context {
    request_id: String,
    step: Option<String>,
    mode: ExecutionMode,
    resolver: PathResolver,
    publisher: ArtifactPublisher,
}

impl Context {
    pub fn new(config: &ContextConfig, mode: ExecutionMode) -> Self {
        let root = config.resolved_request_root();
        let request_id = config.request_id();
        debug!(
            request_root = %root.display(),
            request_id = %request_id,
            mode = mode.as_str(),
            "context ready"
        );
        Self {
            resolver: PathResolver::new(&root),
            publisher: ArtifactPublisher::for_request(&root, request_id.clone()),
            request_id,
            step: config.step.clone(),
            mode,
        }
    }

    /// Context from `CONDUCTOR_CONTEXT` and the dry-run variables.
    pub fn from_env() -> Result<Self, ContextError> {
        let config = ContextConfig::from_env()?;
        Ok(Self::new(&config, ExecutionMode::from_env()))
    }

    pub fn request_root(&self) -> &Path {
        self.resolver.request_root()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn step(&self) -> Option<&str> {
        self.step.as_deref()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode.is_dry_run()
    }

    // ---------------------------------------------------------------------
    // Paths
    // ---------------------------------------------------------------------

    pub fn request_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.request_root().join(rel)
    }

    pub fn data_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.resolver.data_dir().join(rel)
    }

    pub fn results_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.publisher.results_dir().join(rel)
    }

    /// `results/<kind>/` for this request.
    pub fn kind_dir(&self, kind: ArtifactKind) -> PathBuf {
        self.publisher.results_dir().join(kind.dir_name())
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub fn resolve(&self, name: &str) -> Result<PathBuf, ContextError> {
        Ok(self.resolver.resolve(name)?)
    }

    pub fn read_csv(&self, name: &str) -> Result<CsvTable, ContextError> {
        reader::read_table(&self.resolve(name)?)
    }

    /// Deserialize each row into `T` (headers map to field names).
    pub fn read_csv_as<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, ContextError> {
        reader::read_records(&self.resolve(name)?)
    }

    pub fn open_bytes(&self, name: &str) -> Result<Vec<u8>, ContextError> {
        let path = self.resolve(name)?;
        fs::read(&path).map_err(|source| ContextError::Read { path, source })
    }

    pub fn open_text(&self, name: &str) -> Result<String, ContextError> {
        let path = self.resolve(name)?;
        fs::read_to_string(&path).map_err(|source| ContextError::Read { path, source })
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    pub fn publish_figure(
        &self,
        name: &str,
        figure: FigurePayload,
        options: PublishOptions,
    ) -> Result<ArtifactRecord, ContextError> {
        Ok(self
            .publisher
            .publish(ArtifactKind::Figure, name, figure, self.with_defaults(options))?)
    }

    pub fn publish_table(
        &self,
        name: &str,
        table: TablePayload,
        options: PublishOptions,
    ) -> Result<ArtifactRecord, ContextError> {
        Ok(self
            .publisher
            .publish(ArtifactKind::Table, name, table, self.with_defaults(options))?)
    }

    pub fn publish_artifact(
        &self,
        name: &str,
        artifact: RawArtifactPayload,
        options: PublishOptions,
    ) -> Result<ArtifactRecord, ContextError> {
        Ok(self
            .publisher
            .publish(ArtifactKind::Artifact, name, artifact, self.with_defaults(options))?)
    }

    /// Publish any payload under an explicit kind, e.g. a CSV file copied
    /// verbatim as a table.
    pub fn publish(
        &self,
        kind: ArtifactKind,
        name: &str,
        payload: impl Into<Payload>,
        options: PublishOptions,
    ) -> Result<ArtifactRecord, ContextError> {
        Ok(self
            .publisher
            .publish(kind, name, payload, self.with_defaults(options))?)
    }

    /// Register a file already written under `results/`.
    pub fn register_artifact(
        &self,
        kind: ArtifactKind,
        name: &str,
        rel_path: &str,
        options: PublishOptions,
    ) -> Result<ArtifactRecord, ContextError> {
        Ok(self
            .publisher
            .register(kind, name, rel_path, self.with_defaults(options))?)
    }

    pub fn manifest(&self) -> Result<Manifest, ContextError> {
        Ok(self.publisher.store().load()?)
    }

    pub fn scan_consistency(&self) -> Result<ConsistencyReport, ContextError> {
        Ok(self.publisher.scan_consistency()?)
    }

    fn with_defaults(&self, mut options: PublishOptions) -> PublishOptions {
        if options.step.is_none() {
            options.step = self.step.clone();
        }
        options
    }
}

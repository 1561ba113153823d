//! Runs the validate → normalize → write pipeline over a set of capture
//! documents, one transaction per document, strictly one document at a time.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{Config, ErrorPolicy};
use crate::db::{Database, WriteReport};
use crate::error::{LoadError, Result};
use crate::normalize::{normalize, parse_document};

#[derive(Debug)]
pub struct DocumentReport {
    pub path: PathBuf,
    pub server_id: i64,
    /// Rows written per table, parents first.
    pub table_rows: Vec<(&'static str, usize)>,
    pub write: WriteReport,
}

#[derive(Debug, Error)]
#[error("failed to load {path}: {error}")]
pub struct DocumentFailure {
    pub path: PathBuf,
    #[source]
    pub error: LoadError,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub loaded: Vec<DocumentReport>,
    pub failed: Vec<DocumentFailure>,
}

/// Lists `*.json` files in `dir`, sorted by name.
pub fn discover_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(LoadError::Config(format!(
            "directory {} does not exist",
            dir.display()
        )));
    }

    let io_err = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut documents = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            documents.push(path);
        }
    }

    if documents.is_empty() {
        return Err(LoadError::Config(format!(
            "no JSON files found in {}",
            dir.display()
        )));
    }
    documents.sort();
    Ok(documents)
}

/// Reads, validates and writes one document inside its own transaction.
pub fn load_file(db: &Database, path: &Path, batch_size: usize) -> Result<DocumentReport> {
    info!("Loading {}...", path.display());
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc = normalize(&parse_document(&bytes)?)?;
    let write = db.load_document(&doc, batch_size)?;
    info!("✓ Loaded {}", path.display());

    Ok(DocumentReport {
        path: path.to_path_buf(),
        server_id: doc.server.id,
        table_rows: doc.row_counts(),
        write,
    })
}

pub struct Loader {
    db: Database,
    batch_size: usize,
    policy: ErrorPolicy,
}

impl Loader {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            db,
            batch_size: config.batch_size,
            policy: config.on_error,
        }
    }

    /// Loads `paths` in order. Under [`ErrorPolicy::Abort`] the first failure
    /// ends the run; documents already committed stay committed.
    pub async fn run(&self, paths: Vec<PathBuf>) -> Result<RunSummary, DocumentFailure> {
        info!("Found {} JSON file(s) to process", paths.len());
        let mut summary = RunSummary::default();

        for path in paths {
            let batch_size = self.batch_size;
            let job_path = path.clone();
            let result = self
                .db
                .run_blocking(move |db| load_file(db, &job_path, batch_size))
                .await;

            match result {
                Ok(report) => summary.loaded.push(report),
                Err(err) => {
                    let failure = DocumentFailure { path, error: err };
                    match self.policy {
                        ErrorPolicy::Abort => {
                            error!("Error loading {}: {}", failure.path.display(), failure.error);
                            return Err(failure);
                        }
                        ErrorPolicy::Continue => {
                            warn!(
                                "Skipping {} ({}): {}",
                                failure.path.display(),
                                if failure.error.is_connectivity() {
                                    "connectivity"
                                } else {
                                    "data"
                                },
                                failure.error
                            );
                            summary.failed.push(failure);
                        }
                    }
                }
            }
        }

        info!(
            "Run finished: {} loaded, {} failed",
            summary.loaded.len(),
            summary.failed.len()
        );
        Ok(summary)
    }
}

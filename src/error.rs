use rusqlite::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

use crate::validate::ObjectKind;

pub type Result<T, E = LoadError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("extra fields found in {kind}: {extra_fields:?}\nobject: {payload}")]
    SchemaViolation {
        kind: ObjectKind,
        extra_fields: Vec<String>,
        payload: String,
    },
    #[error("missing required field `{field}` in {kind}")]
    MissingField { kind: ObjectKind, field: &'static str },
    #[error("invalid value for `{field}` in {kind}: {value}")]
    InvalidValue {
        kind: ObjectKind,
        field: &'static str,
        value: String,
    },
    #[error("malformed document: {0}")]
    MalformedDocument(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("constraint violation: {0}")]
    ConstraintViolation(#[source] rusqlite::Error),
    #[error("database connectivity failure: {0}")]
    ConnectivityFailure(#[source] rusqlite::Error),
    #[error("database error: {0}")]
    Store(#[source] rusqlite::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("load worker failed: {0}")]
    Worker(String),
}

impl LoadError {
    /// True when the document itself is at fault and reloading it unchanged will fail again.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            LoadError::SchemaViolation { .. }
                | LoadError::MissingField { .. }
                | LoadError::InvalidValue { .. }
                | LoadError::MalformedDocument(_)
                | LoadError::ConstraintViolation(_)
        )
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, LoadError::ConnectivityFailure(_))
    }
}

impl From<rusqlite::Error> for LoadError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(e, _) => Some(e.code),
            _ => None,
        };
        match code {
            Some(ErrorCode::ConstraintViolation) => LoadError::ConstraintViolation(err),
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase,
            ) => LoadError::ConnectivityFailure(err),
            _ => LoadError::Store(err),
        }
    }
}

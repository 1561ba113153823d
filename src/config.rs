use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::db::writer::DEFAULT_BATCH_SIZE;
use crate::error::{LoadError, Result};

/// What a run does after a document fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop at the first failed document.
    Abort,
    /// Log the failure and move on to the next document.
    Continue,
}

impl FromStr for ErrorPolicy {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" | "fail-fast" => Ok(ErrorPolicy::Abort),
            "continue" | "skip" => Ok(ErrorPolicy::Continue),
            other => Err(LoadError::Config(format!(
                "LOADER_ON_ERROR must be `abort` or `continue`, got `{}`",
                other
            ))),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Abort => f.write_str("abort"),
            ErrorPolicy::Continue => f.write_str("continue"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub raw_dir: PathBuf,
    pub batch_size: usize,
    pub on_error: ErrorPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "data/discord.db".to_string(),
            raw_dir: PathBuf::from("raw"),
            batch_size: DEFAULT_BATCH_SIZE,
            on_error: ErrorPolicy::Abort,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> Result<Self> {
        let defaults = Config::default();
        let batch_size = match env::var("LOADER_BATCH_SIZE") {
            Ok(raw) => parse_batch_size(&raw)?,
            Err(_) => defaults.batch_size,
        };
        let on_error = match env::var("LOADER_ON_ERROR") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.on_error,
        };

        Ok(Config {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            raw_dir: env::var("RAW_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.raw_dir),
            batch_size,
            on_error,
        })
    }
}

pub fn parse_batch_size(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(LoadError::Config(format!(
            "LOADER_BATCH_SIZE must be a positive integer, got `{}`",
            raw
        ))),
        Ok(n) => Ok(n),
    }
}

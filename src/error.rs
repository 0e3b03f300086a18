//! Top-level error type for fatal migration failures.
//!
//! Per-row and per-asset failures never surface here: they are captured in
//! `MigrationResult::errors` or logged as warnings. Only conditions that make
//! the whole run meaningless (no source, no target, unwritable cache) do.

use thiserror::Error;

use crate::config::ConfigError;
use crate::idmap::IdMapError;
use crate::mapping::MappingError;
use crate::source::SourceError;
use crate::target::StoreError;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Source store error: {0}")]
    Source(#[from] SourceError),
    #[error("Target store error: {0}")]
    Target(#[from] StoreError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),
    #[error("ID map error: {0}")]
    IdMap(#[from] IdMapError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, MigrateError>;

//! cmsport - legacy database to headless CMS migration engine.
//!
//! Reads rows from a legacy relational store (or a headless-CMS REST API),
//! transforms them into target documents, transfers referenced media and
//! resolves cross-collection references through persisted ID maps so that
//! runs can be repeated and resumed safely.

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod error;
pub mod idmap;
pub mod mapping;
pub mod media;
pub mod migrators;
pub mod models;
pub mod orchestrator;
pub mod report;
pub mod source;
pub mod target;
pub mod utils;
pub mod validation;

pub use error::MigrateError;

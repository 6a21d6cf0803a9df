//! # threadlens common library
//!
//! Shared code for the threadlens services:
//! - Error type used across crates
//! - Configuration file discovery and TOML loading
//! - SQLite pool initialisation
//! - Declarative table schemas (create-if-absent, drift reporting)

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};

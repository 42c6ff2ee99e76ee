//! # WKMP Common Library
//!
//! Shared code for the WKMP recommendation components including:
//! - Catalog database schema, entity ids and queries
//! - Persisted settings (recommendation engine type)
//! - Bootstrap configuration loading and root folder resolution
//! - Common error type

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};

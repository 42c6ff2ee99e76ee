//! Catalog database: schema, entity ids, settings and queries

pub mod catalog;
pub mod init;
pub mod models;
pub mod settings;

pub use init::*;
pub use models::*;

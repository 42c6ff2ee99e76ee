//! Shared fixtures for wkmp-rec integration tests
//!
//! - `TestCatalog`: temporary root folder with an initialized catalog
//! - `seed_sample_catalog`: small catalog with clusters and features
//! - `MockBackends`: scriptable classifiers gated by `Notify`

#![allow(dead_code)]

pub mod catalog;
pub mod mock_classifier;

pub use catalog::{seed_sample_catalog, set_bpm, SampleCatalog, TestCatalog};
pub use mock_classifier::{MockBackends, MockClassifier, MockControl};

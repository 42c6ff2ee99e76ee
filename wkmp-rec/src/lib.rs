//! wkmp-rec - Recommendation engine
//!
//! Serves "similar tracks / releases / artists" queries by consulting one or
//! more similarity backends ([`classifier::Classifier`]) in priority order.
//! Backends are rebuilt from the catalog by [`engine::RecommendationEngine::load`],
//! which can be cancelled from another task while queries keep being served.
//!
//! One engine is constructed next to the catalog pool it reads from and is
//! shared by reference (usually through an `Arc`) with whatever triggers
//! reloads or issues queries.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod types;

pub use config::EngineConfig;
pub use engine::RecommendationEngine;
pub use types::{ClassifierType, LoadPlan, Progress, ProgressCallback};

//! Core types shared by the engine and its backends

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use wkmp_common::db::RecommendationEngineType;

/// Similarity backend kind
///
/// Ordering between kinds is configuration (see [`LoadPlan`]), not identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassifierType {
    /// Tag/cluster co-occurrence, cheap to load
    Clusters,
    /// Audio feature vectors, costly to build
    Features,
}

impl ClassifierType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clusters => "clusters",
            Self::Features => "features",
        }
    }
}

impl fmt::Display for ClassifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load progress reported by a backend
///
/// Within one backend load, `processed_elems` never decreases and never
/// exceeds `total_elems`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub processed_elems: usize,
    pub total_elems: usize,
}

/// Caller-supplied progress sink
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// What one load cycle builds, and how queries fall back afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    /// Backends to build, in build order
    pub build_order: Vec<ClassifierType>,
    /// Query fallback order, highest priority first
    pub priorities: Vec<ClassifierType>,
}

impl LoadPlan {
    pub fn for_engine_type(engine_type: RecommendationEngineType) -> Self {
        match engine_type {
            RecommendationEngineType::Clusters => Self {
                build_order: vec![ClassifierType::Clusters],
                priorities: vec![ClassifierType::Clusters],
            },
            // Clusters loads first: it is fast and serves while features warm up
            RecommendationEngineType::Features => Self {
                build_order: vec![ClassifierType::Clusters, ClassifierType::Features],
                priorities: vec![ClassifierType::Features, ClassifierType::Clusters],
            },
        }
    }
}

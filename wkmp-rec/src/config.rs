//! Engine configuration
//!
//! Built from the `[recommendation]` section of the module TOML file and the
//! resolved root folder. The persisted engine *type* is not part of this: it
//! is read from the catalog at the start of every load cycle.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;
use wkmp_common::config::{RecommendationToml, RootFolderInitializer};
use wkmp_common::{Error, Result};

/// Feature name -> weight. Ordered so vector layouts are stable across runs.
pub type FeatureSettingsMap = BTreeMap<String, f64>;

/// Known audio descriptors and their dimension counts
const FEATURE_DEFS: &[(&str, usize)] = &[
    ("lowlevel.average_loudness", 1),
    ("lowlevel.dynamic_complexity", 1),
    ("lowlevel.erbbands.mean", 40),
    ("lowlevel.gfcc.mean", 13),
    ("lowlevel.mfcc.mean", 13),
    ("lowlevel.spectral_contrast_coeffs.mean", 6),
    ("lowlevel.spectral_contrast_valleys.var", 6),
    ("lowlevel.spectral_energyband_high.mean", 1),
    ("lowlevel.spectral_rolloff.median", 1),
    ("rhythm.bpm", 1),
    ("rhythm.danceability", 1),
    ("tonal.chords_strength.mean", 1),
];

/// Dimension count of a known feature
pub fn feature_dimensions(name: &str) -> Option<usize> {
    FEATURE_DEFS
        .iter()
        .find(|(feature, _)| *feature == name)
        .map(|(_, dimensions)| *dimensions)
}

/// Features used to train the features backend when none are configured
pub fn default_train_feature_settings() -> FeatureSettingsMap {
    [
        "lowlevel.spectral_energyband_high.mean",
        "lowlevel.spectral_rolloff.median",
        "lowlevel.spectral_contrast_valleys.var",
        "lowlevel.erbbands.mean",
        "lowlevel.gfcc.mean",
    ]
    .into_iter()
    .map(|name| (name.to_string(), 1.0))
    .collect()
}

/// Static configuration handed to the classifier factory
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Folder for persisted backend models
    pub cache_dir: PathBuf,
    /// Training features of the features backend
    pub feature_settings: FeatureSettingsMap,
}

impl EngineConfig {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            feature_settings: default_train_feature_settings(),
        }
    }

    /// Combine the TOML section with the root folder layout
    ///
    /// Unknown feature names and non-positive weights are rejected; an empty
    /// weight table keeps the built-in training set.
    pub fn from_toml(toml: &RecommendationToml, root: &RootFolderInitializer) -> Result<Self> {
        let cache_dir = toml.cache_dir.clone().unwrap_or_else(|| root.cache_dir());

        if toml.feature_weights.is_empty() {
            return Ok(Self::new(cache_dir));
        }

        let mut feature_settings = FeatureSettingsMap::new();
        for (name, weight) in &toml.feature_weights {
            if feature_dimensions(name).is_none() {
                return Err(Error::Config(format!("Unknown feature '{}'", name)));
            }
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(Error::Config(format!(
                    "Feature '{}' has invalid weight {}",
                    name, weight
                )));
            }
            feature_settings.insert(name.clone(), *weight);
        }

        if feature_settings != default_train_feature_settings() {
            warn!(
                "Using custom feature training set ({} features)",
                feature_settings.len()
            );
        }

        Ok(Self {
            cache_dir,
            feature_settings,
        })
    }
}

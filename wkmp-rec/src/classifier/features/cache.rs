//! On-disk cache of the features model
//!
//! Holds the normalized track vectors only. They are reused if they were
//! built from the same training settings and the analysed features still
//! have the same fingerprint; release and artist groups are not cached.

use super::model::ObjectVectors;
use crate::config::FeatureSettingsMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use wkmp_common::db::{FeaturesFingerprint, TrackId};

pub const CACHE_FILE_NAME: &str = "features.json";

/// Bumped whenever the serialized layout changes
pub const CACHE_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum FeaturesCacheError {
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Cache version {found} is not supported (expected {expected})")]
    Version { found: u32, expected: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesCache {
    pub version: u32,
    pub built_at: DateTime<Utc>,
    pub fingerprint: FeaturesFingerprint,
    pub feature_settings: FeatureSettingsMap,
    /// Normalized track vectors
    pub tracks: ObjectVectors<TrackId>,
}

impl FeaturesCache {
    pub fn new(
        fingerprint: FeaturesFingerprint,
        feature_settings: FeatureSettingsMap,
        tracks: ObjectVectors<TrackId>,
    ) -> Self {
        Self {
            version: CACHE_VERSION,
            built_at: Utc::now(),
            fingerprint,
            feature_settings,
            tracks,
        }
    }

    pub fn matches(
        &self,
        fingerprint: &FeaturesFingerprint,
        feature_settings: &FeatureSettingsMap,
    ) -> bool {
        &self.fingerprint == fingerprint && &self.feature_settings == feature_settings
    }
}

pub fn cache_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(CACHE_FILE_NAME)
}

/// Read the cache, `Ok(None)` if there is none
pub async fn read_cache(cache_dir: &Path) -> Result<Option<FeaturesCache>, FeaturesCacheError> {
    let path = cache_path(cache_dir);

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut cache: FeaturesCache = serde_json::from_slice(&bytes)?;
    if cache.version != CACHE_VERSION {
        return Err(FeaturesCacheError::Version {
            found: cache.version,
            expected: CACHE_VERSION,
        });
    }

    cache.tracks.reindex();
    debug!("Read features cache built at {}", cache.built_at);
    Ok(Some(cache))
}

/// Write the cache atomically (temp file + rename)
pub async fn write_cache(cache_dir: &Path, cache: &FeaturesCache) -> Result<(), FeaturesCacheError> {
    tokio::fs::create_dir_all(cache_dir).await?;

    let path = cache_path(cache_dir);
    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec(cache)?;

    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, &path).await?;

    debug!("Wrote features cache to {}", path.display());
    Ok(())
}

/// Remove the cache, absent cache is not an error
pub async fn remove_cache(cache_dir: &Path) -> Result<(), FeaturesCacheError> {
    match tokio::fs::remove_file(cache_path(cache_dir)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

//! Audio feature backend
//!
//! Loading reads the analysed features of every track and normalizes them.
//! The track vectors are cached under the cache folder and reused while the
//! analysed features are unchanged. Release and artist centroids are derived
//! from the current catalog links on every load. Queries rank candidates by
//! weighted distance to the centroid of the seeds.

pub mod cache;
pub mod model;

use self::cache::FeaturesCache;
use self::model::{
    dimension_weights, flatten_features, vector_dimensions, DataNormalizer, FeaturesModel,
    ObjectVectors,
};
use super::Classifier;
use crate::config::FeatureSettingsMap;
use crate::types::{Progress, ProgressCallback};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wkmp_common::db::catalog;
use wkmp_common::db::{
    ArtistId, FeaturesFingerprint, ReleaseId, TrackArtistLinkType, TrackId, TrackLinks,
    TrackListId,
};
use wkmp_common::Result;

/// Candidates checked against the catalog per round trip
const EXISTENCE_CHUNK: usize = 256;

pub struct FeaturesClassifier {
    cache_dir: PathBuf,
    feature_settings: FeatureSettingsMap,
    model: OnceLock<FeaturesModel>,
}

impl FeaturesClassifier {
    pub fn new(cache_dir: PathBuf, feature_settings: FeatureSettingsMap) -> Self {
        Self {
            cache_dir,
            feature_settings,
            model: OnceLock::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    async fn cached_tracks(
        &self,
        fingerprint: &FeaturesFingerprint,
        force_reload: bool,
    ) -> Option<ObjectVectors<TrackId>> {
        if force_reload {
            if let Err(e) = cache::remove_cache(&self.cache_dir).await {
                warn!("Cannot remove features cache: {}", e);
            }
            return None;
        }

        match cache::read_cache(&self.cache_dir).await {
            Ok(Some(cached)) if cached.matches(fingerprint, &self.feature_settings) => {
                info!("Using track vectors cached at {}", cached.built_at);
                Some(cached.tracks)
            }
            Ok(Some(_)) => {
                info!("Features cache is stale, rebuilding");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring features cache: {}", e);
                None
            }
        }
    }

    /// Normalized vectors and links of every usable track
    ///
    /// `None` if cancelled or nothing usable was analysed.
    async fn build_tracks(
        &self,
        db: &SqlitePool,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<Option<(ObjectVectors<TrackId>, HashMap<TrackId, TrackLinks>)>> {
        let dimensions = match vector_dimensions(&self.feature_settings) {
            Some(dimensions) if dimensions > 0 => dimensions,
            _ => {
                warn!("No usable training features configured");
                return Ok(None);
            }
        };

        let track_ids = catalog::get_track_ids_with_features(db).await?;
        let total_elems = track_ids.len();
        report(progress, 0, total_elems);

        let mut samples = Vec::with_capacity(total_elems);
        let mut links = HashMap::with_capacity(total_elems);

        for (processed, track) in track_ids.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Features load cancelled after {} tracks", processed);
                return Ok(None);
            }

            if let Some(features) = catalog::get_track_features(db, track).await? {
                if let Some(vector) = flatten_features(track, &features, &self.feature_settings) {
                    samples.push((track, vector));
                    links.insert(track, catalog::get_track_links(db, track).await?);
                }
            }

            report(progress, processed + 1, total_elems);
        }

        if samples.is_empty() {
            warn!("No analysed track has every training feature");
            return Ok(None);
        }

        debug!("Normalizing {} samples of {} dimensions", samples.len(), dimensions);
        let vectors: Vec<Vec<f64>> = samples.iter().map(|(_, vector)| vector.clone()).collect();
        let normalizer = DataNormalizer::compute(&vectors, dimensions);
        for (_, vector) in samples.iter_mut() {
            normalizer.normalize(vector);
        }

        Ok(Some((ObjectVectors::new(samples), links)))
    }

    /// Current links of cached tracks, `None` if cancelled
    async fn read_links(
        &self,
        db: &SqlitePool,
        tracks: &ObjectVectors<TrackId>,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<Option<HashMap<TrackId, TrackLinks>>> {
        let total_elems = tracks.len();
        report(progress, 0, total_elems);

        let mut links = HashMap::with_capacity(total_elems);
        for (processed, (track, _)) in tracks.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Features load cancelled after {} cached tracks", processed);
                return Ok(None);
            }
            links.insert(track, catalog::get_track_links(db, track).await?);
            report(progress, processed + 1, total_elems);
        }

        Ok(Some(links))
    }

    async fn try_load(
        &self,
        db: &SqlitePool,
        force_reload: bool,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<bool> {
        let fingerprint = catalog::get_features_fingerprint(db).await?;

        let (tracks, links) = match self.cached_tracks(&fingerprint, force_reload).await {
            Some(tracks) => match self.read_links(db, &tracks, cancel, progress).await? {
                Some(links) => (tracks, links),
                None => return Ok(false),
            },
            None => match self.build_tracks(db, cancel, progress).await? {
                Some((tracks, links)) => {
                    let cache = FeaturesCache::new(fingerprint, self.feature_settings.clone(), tracks);
                    if let Err(e) = cache::write_cache(&self.cache_dir, &cache).await {
                        warn!("Cannot write features cache: {}", e);
                    }
                    (cache.tracks, links)
                }
                None => return Ok(false),
            },
        };

        if cancel.is_cancelled() {
            return Ok(false);
        }

        let model =
            FeaturesModel::from_tracks(dimension_weights(&self.feature_settings), tracks, &links);
        info!(
            "Features model ready: {} tracks, {} releases, {} artists",
            model.tracks.len(),
            model.releases.len(),
            model.artists.len()
        );

        if self.model.set(model).is_err() {
            warn!("Features classifier was already loaded");
        }
        Ok(true)
    }
}

fn report(progress: Option<&ProgressCallback>, processed_elems: usize, total_elems: usize) {
    if let Some(progress) = progress {
        progress(Progress {
            processed_elems,
            total_elems,
        });
    }
}

/// Keep ranked ids that still exist in the catalog, up to `max_count`
async fn take_existing<Id, F, Fut>(ranked: Vec<Id>, max_count: usize, existing: F) -> Result<Vec<Id>>
where
    Id: Copy + Eq + Hash,
    F: Fn(Vec<Id>) -> Fut,
    Fut: Future<Output = Result<HashSet<Id>>>,
{
    let mut result = Vec::with_capacity(max_count.min(ranked.len()));

    for chunk in ranked.chunks(EXISTENCE_CHUNK) {
        let present = existing(chunk.to_vec()).await?;
        for id in chunk {
            if result.len() == max_count {
                return Ok(result);
            }
            if present.contains(id) {
                result.push(*id);
            }
        }
        if result.len() == max_count {
            break;
        }
    }

    Ok(result)
}

#[async_trait]
impl Classifier for FeaturesClassifier {
    fn name(&self) -> &'static str {
        "Features"
    }

    async fn load(
        &self,
        db: &SqlitePool,
        force_reload: bool,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        match self.try_load(db, force_reload, cancel, progress).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Features load failed: {}", e);
                false
            }
        }
    }

    async fn similar_tracks_from_track_list(
        &self,
        db: &SqlitePool,
        track_list: TrackListId,
        max_count: usize,
    ) -> Vec<TrackId> {
        match catalog::get_track_list_track_ids(db, track_list).await {
            Ok(Some(tracks)) => self.similar_tracks(db, &tracks, max_count).await,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Cannot read track list {}: {}", track_list, e);
                Vec::new()
            }
        }
    }

    async fn similar_tracks(
        &self,
        db: &SqlitePool,
        tracks: &[TrackId],
        max_count: usize,
    ) -> Vec<TrackId> {
        let Some(model) = self.model.get() else {
            return Vec::new();
        };
        if max_count == 0 {
            return Vec::new();
        }
        let Some(target) = model.tracks.centroid(tracks) else {
            return Vec::new();
        };

        let exclude: HashSet<TrackId> = tracks.iter().copied().collect();
        let ranked = model.tracks.ranked(&target, &model.weights, &exclude, |_| true);

        take_existing(ranked, max_count, |chunk| async move {
            catalog::existing_track_ids(db, &chunk).await
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Similar tracks lookup failed: {}", e);
            Vec::new()
        })
    }

    async fn similar_releases(
        &self,
        db: &SqlitePool,
        release: ReleaseId,
        max_count: usize,
    ) -> Vec<ReleaseId> {
        let Some(model) = self.model.get() else {
            return Vec::new();
        };
        if max_count == 0 {
            return Vec::new();
        }
        let Some(target) = model.releases.get(release) else {
            return Vec::new();
        };

        let exclude: HashSet<ReleaseId> = [release].into_iter().collect();
        let ranked = model.releases.ranked(target, &model.weights, &exclude, |_| true);

        take_existing(ranked, max_count, |chunk| async move {
            catalog::existing_release_ids(db, &chunk).await
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Similar releases lookup failed: {}", e);
            Vec::new()
        })
    }

    async fn similar_artists(
        &self,
        db: &SqlitePool,
        artist: ArtistId,
        link_types: &[TrackArtistLinkType],
        max_count: usize,
    ) -> Vec<ArtistId> {
        let Some(model) = self.model.get() else {
            return Vec::new();
        };
        if max_count == 0 {
            return Vec::new();
        }
        let Some(target) = model.artists.get(artist) else {
            return Vec::new();
        };

        let allowed = model.artists_with_roles(link_types);
        let exclude: HashSet<ArtistId> = [artist].into_iter().collect();
        let ranked = model
            .artists
            .ranked(target, &model.weights, &exclude, |id| allowed.contains(&id));

        take_existing(ranked, max_count, |chunk| async move {
            catalog::existing_artist_ids(db, &chunk).await
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Similar artists lookup failed: {}", e);
            Vec::new()
        })
    }
}

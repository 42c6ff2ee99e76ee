//! Similarity backends
//!
//! Every backend implements [`Classifier`]. The set of backends is closed:
//! adding one means a new [`ClassifierType`] variant and a new branch in
//! [`create_classifier`].

pub mod clusters;
pub mod features;

use crate::config::EngineConfig;
use crate::types::{ClassifierType, ProgressCallback};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wkmp_common::db::{ArtistId, ReleaseId, TrackArtistLinkType, TrackId, TrackListId};

pub use clusters::ClustersClassifier;
pub use features::FeaturesClassifier;

/// Capability contract of a similarity backend
///
/// An instance is bound to one load: it is constructed, loaded once, and, if
/// the load succeeded, queried until the next reload replaces it.
///
/// Query operations are read-only and never fail; anything unsatisfiable
/// (unknown seed, database error) yields an empty result. Results hold at most
/// `max_count` ids.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Stable identifier for logs
    fn name(&self) -> &'static str;

    /// Build or refresh the backend's model, returns `true` on success
    ///
    /// Implementations must poll `cancel` and return `false` promptly once it
    /// is cancelled. When `progress` is supplied it is called with
    /// non-decreasing `processed_elems <= total_elems`. With
    /// `force_reload == false` a backend may reuse a previously persisted model
    /// if its inputs did not change.
    async fn load(
        &self,
        db: &SqlitePool,
        force_reload: bool,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> bool;

    /// Extra stop signal, callable from any task at any time
    ///
    /// The engine always cancels the token passed to [`Classifier::load`]
    /// first; backends only override this to react beyond polling it.
    fn request_cancel_load(&self) {}

    async fn similar_tracks_from_track_list(
        &self,
        db: &SqlitePool,
        track_list: TrackListId,
        max_count: usize,
    ) -> Vec<TrackId>;

    async fn similar_tracks(
        &self,
        db: &SqlitePool,
        tracks: &[TrackId],
        max_count: usize,
    ) -> Vec<TrackId>;

    async fn similar_releases(
        &self,
        db: &SqlitePool,
        release: ReleaseId,
        max_count: usize,
    ) -> Vec<ReleaseId>;

    /// `link_types` restricts candidate artists to those roles; empty means any role
    async fn similar_artists(
        &self,
        db: &SqlitePool,
        artist: ArtistId,
        link_types: &[TrackArtistLinkType],
        max_count: usize,
    ) -> Vec<ArtistId>;
}

/// Maps a backend kind to a freshly constructed, unloaded instance
pub type ClassifierFactory = Arc<dyn Fn(ClassifierType) -> Arc<dyn Classifier> + Send + Sync>;

pub fn create_classifier(classifier_type: ClassifierType, config: &EngineConfig) -> Arc<dyn Classifier> {
    match classifier_type {
        ClassifierType::Clusters => Arc::new(ClustersClassifier::new()),
        ClassifierType::Features => Arc::new(FeaturesClassifier::new(
            config.cache_dir.clone(),
            config.feature_settings.clone(),
        )),
    }
}

/// Factory backed by [`create_classifier`]
pub fn default_factory(config: EngineConfig) -> ClassifierFactory {
    Arc::new(move |classifier_type| create_classifier(classifier_type, &config))
}

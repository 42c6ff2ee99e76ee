//! Recommendation engine
//!
//! Owns the serving set (ready classifiers keyed by kind), the query priority
//! order, and the load/cancel coordination.
//!
//! **Locking:**
//! - `serving` (tokio `RwLock`): queries take it shared; the wipe at cycle
//!   start and each success insert take it exclusive, only for the map
//!   mutation.
//! - `control` (std `Mutex`): pending registry and the cycle cancellation
//!   token. Never held across an `.await`, and never taken by queries.
//!
//! Loads run one backend at a time, in build order. A classifier leaves the
//! pending registry when its [`PendingGuard`] drops, which covers success,
//! failure, panic and a dropped load future alike.

use crate::classifier::{default_factory, Classifier, ClassifierFactory};
use crate::config::EngineConfig;
use crate::types::{ClassifierType, LoadPlan, ProgressCallback};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wkmp_common::db::settings;
use wkmp_common::db::{ArtistId, ReleaseId, TrackArtistLinkType, TrackId, TrackListId};
use wkmp_common::Result;

#[derive(Default)]
struct ServingState {
    classifiers: HashMap<ClassifierType, Arc<dyn Classifier>>,
    priorities: Vec<ClassifierType>,
}

/// A classifier whose `load` has been started but not returned
struct PendingClassifier {
    classifier_type: ClassifierType,
    classifier: Weak<dyn Classifier>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ControlState {
    /// Cancelled while a `cancel_load` is being honored
    cycle_token: CancellationToken,
    pending: HashMap<u64, PendingClassifier>,
    next_pending_id: u64,
}

impl ControlState {
    fn register(
        &mut self,
        classifier_type: ClassifierType,
        classifier: &Arc<dyn Classifier>,
    ) -> (u64, CancellationToken) {
        let id = self.next_pending_id;
        self.next_pending_id += 1;

        let cancel = self.cycle_token.child_token();
        self.pending.insert(
            id,
            PendingClassifier {
                classifier_type,
                classifier: Arc::downgrade(classifier),
                cancel: cancel.clone(),
            },
        );
        (id, cancel)
    }
}

/// Removes one pending entry and wakes `cancel_load` waiters on drop
struct PendingGuard<'a> {
    engine: &'a RecommendationEngine,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut control = self.engine.control();
        control.pending.remove(&self.id);
        self.engine.pending_drained.notify_waiters();
    }
}

/// Serves similarity queries from whichever backends are ready
///
/// One instance lives alongside the catalog pool it reads from and is shared
/// by reference (typically in an `Arc`) with everything that queries or
/// reloads it.
pub struct RecommendationEngine {
    db: SqlitePool,
    factory: ClassifierFactory,
    serving: RwLock<ServingState>,
    control: Mutex<ControlState>,
    pending_drained: Notify,
}

impl RecommendationEngine {
    /// Engine backed by the built-in classifiers
    pub fn new(db: SqlitePool, config: EngineConfig) -> Self {
        Self::with_factory(db, default_factory(config))
    }

    pub fn with_factory(db: SqlitePool, factory: ClassifierFactory) -> Self {
        Self {
            db,
            factory,
            serving: RwLock::new(ServingState::default()),
            control: Mutex::new(ControlState::default()),
            pending_drained: Notify::new(),
        }
    }

    fn control(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one load cycle
    ///
    /// Reads the engine type from the catalog, wipes the serving set and
    /// loads every backend of the plan in build order. Backend failures are
    /// logged and leave that kind out of the serving set; only a failure to
    /// read the engine type is returned.
    ///
    /// # Panics
    ///
    /// If a previous cycle still has classifiers loading.
    pub async fn load(&self, force_reload: bool, progress: Option<ProgressCallback>) -> Result<()> {
        info!("Reloading recommendation engines...");

        let engine_type = settings::get_recommendation_engine_type(&self.db).await?;
        let plan = LoadPlan::for_engine_type(engine_type);
        debug!(
            "Engine type {}: build order {:?}, priorities {:?}",
            engine_type, plan.build_order, plan.priorities
        );

        let overlapping = !self.control().pending.is_empty();
        assert!(
            !overlapping,
            "recommendation load started while a previous load is still running"
        );

        {
            let mut serving = self.serving.write().await;
            serving.priorities = plan.priorities.clone();
            serving.classifiers.clear();
        }

        let classifiers: Vec<(ClassifierType, Arc<dyn Classifier>)> = plan
            .build_order
            .iter()
            .map(|classifier_type| (*classifier_type, (self.factory)(*classifier_type)))
            .collect();

        let registrations: Vec<(u64, CancellationToken)> = {
            let mut control = self.control();
            classifiers
                .iter()
                .map(|(classifier_type, classifier)| control.register(*classifier_type, classifier))
                .collect()
        };

        // Guards exist for every classifier before the first load starts
        let steps: Vec<(PendingGuard<'_>, CancellationToken)> = registrations
            .into_iter()
            .map(|(id, cancel)| (PendingGuard { engine: self, id }, cancel))
            .collect();

        for ((classifier_type, classifier), (guard, cancel)) in classifiers.into_iter().zip(steps) {
            self.load_classifier(
                classifier_type,
                classifier,
                cancel,
                guard,
                force_reload,
                progress.as_ref(),
            )
            .await;
        }

        info!("Recommendation engines loaded!");
        Ok(())
    }

    async fn load_classifier(
        &self,
        classifier_type: ClassifierType,
        classifier: Arc<dyn Classifier>,
        cancel: CancellationToken,
        _guard: PendingGuard<'_>,
        force_reload: bool,
        progress: Option<&ProgressCallback>,
    ) {
        let loaded = if cancel.is_cancelled() {
            info!("Skipping classifier '{}': load cancelled", classifier.name());
            false
        } else {
            info!("Initializing classifier '{}'...", classifier.name());
            classifier
                .load(&self.db, force_reload, &cancel, progress)
                .await
        };

        if loaded {
            info!("Classifier '{}' initialization SUCCESS", classifier.name());
            self.serving
                .write()
                .await
                .classifiers
                .insert(classifier_type, classifier);
        } else {
            warn!("Classifier '{}' initialization FAILURE", classifier.name());
        }
    }

    /// Stop the running load cycle and wait until every pending load returned
    ///
    /// Returns immediately when nothing is loading. There is no timeout:
    /// this waits as long as backends take to notice their token.
    pub async fn cancel_load(&self) {
        {
            let control = self.control();
            control.cycle_token.cancel();
            for pending in control.pending.values() {
                debug!("Cancelling classifier load ({})", pending.classifier_type);
                pending.cancel.cancel();
                if let Some(classifier) = pending.classifier.upgrade() {
                    classifier.request_cancel_load();
                }
            }
        }

        loop {
            let notified = self.pending_drained.notified();
            tokio::pin!(notified);
            // Registered before checking, so a drain between check and await is not missed
            notified.as_mut().enable();

            {
                let mut control = self.control();
                if control.pending.is_empty() {
                    control.cycle_token = CancellationToken::new();
                    break;
                }
                debug!("Waiting for {} pending classifier(s)", control.pending.len());
            }

            notified.await;
        }

        debug!("Recommendation load cancelled");
    }

    pub async fn similar_tracks_from_track_list(
        &self,
        track_list: TrackListId,
        max_count: usize,
    ) -> Vec<TrackId> {
        let serving = self.serving.read().await;
        for classifier_type in &serving.priorities {
            let Some(classifier) = serving.classifiers.get(classifier_type) else {
                continue;
            };
            let result = classifier
                .similar_tracks_from_track_list(&self.db, track_list, max_count)
                .await;
            if !result.is_empty() {
                debug!("Similar tracks for list {} from '{}'", track_list, classifier.name());
                return result;
            }
        }
        Vec::new()
    }

    pub async fn similar_tracks(&self, tracks: &[TrackId], max_count: usize) -> Vec<TrackId> {
        let serving = self.serving.read().await;
        for classifier_type in &serving.priorities {
            let Some(classifier) = serving.classifiers.get(classifier_type) else {
                continue;
            };
            let result = classifier.similar_tracks(&self.db, tracks, max_count).await;
            if !result.is_empty() {
                debug!("Similar tracks from '{}'", classifier.name());
                return result;
            }
        }
        Vec::new()
    }

    pub async fn similar_releases(&self, release: ReleaseId, max_count: usize) -> Vec<ReleaseId> {
        let serving = self.serving.read().await;
        for classifier_type in &serving.priorities {
            let Some(classifier) = serving.classifiers.get(classifier_type) else {
                continue;
            };
            let result = classifier
                .similar_releases(&self.db, release, max_count)
                .await;
            if !result.is_empty() {
                debug!("Similar releases for {} from '{}'", release, classifier.name());
                return result;
            }
        }
        Vec::new()
    }

    /// `link_types` restricts candidates to those roles; empty means any role
    pub async fn similar_artists(
        &self,
        artist: ArtistId,
        link_types: &[TrackArtistLinkType],
        max_count: usize,
    ) -> Vec<ArtistId> {
        let serving = self.serving.read().await;
        for classifier_type in &serving.priorities {
            let Some(classifier) = serving.classifiers.get(classifier_type) else {
                continue;
            };
            let result = classifier
                .similar_artists(&self.db, artist, link_types, max_count)
                .await;
            if !result.is_empty() {
                debug!("Similar artists for {} from '{}'", artist, classifier.name());
                return result;
            }
        }
        Vec::new()
    }

    /// Kinds currently in the serving set, in priority order
    pub async fn serving_types(&self) -> Vec<ClassifierType> {
        let serving = self.serving.read().await;
        serving
            .priorities
            .iter()
            .copied()
            .filter(|classifier_type| serving.classifiers.contains_key(classifier_type))
            .collect()
    }

    pub async fn priorities(&self) -> Vec<ClassifierType> {
        self.serving.read().await.priorities.clone()
    }

    /// Classifiers whose load started and has not returned yet
    pub fn pending_count(&self) -> usize {
        self.control().pending.len()
    }
}

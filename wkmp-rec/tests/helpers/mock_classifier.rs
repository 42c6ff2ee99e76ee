//! Scriptable classifiers for engine tests
//!
//! A [`MockControl`] is shared between the test and every instance the
//! factory creates for its kind, so a test can gate, observe and script
//! loads across reload cycles.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use wkmp_common::db::{ArtistId, ReleaseId, TrackArtistLinkType, TrackId, TrackListId};
use wkmp_rec::classifier::{Classifier, ClassifierFactory};
use wkmp_rec::{ClassifierType, Progress, ProgressCallback};

/// Names of the mocks in the order their loads started
pub type LoadLog = Arc<Mutex<Vec<&'static str>>>;

#[derive(Clone)]
pub struct MockControl {
    pub name: &'static str,
    /// Load outcome when not cancelled
    pub succeed: Arc<AtomicBool>,
    /// Block inside `load` until `release` is notified or the token is cancelled
    pub gated: Arc<AtomicBool>,
    /// Notified when a gated load starts waiting
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
    pub result_ids: Arc<Mutex<Vec<i64>>>,
    pub load_calls: Arc<AtomicUsize>,
    pub query_calls: Arc<AtomicUsize>,
    pub cancel_requests: Arc<AtomicUsize>,
    pub observed_cancel: Arc<AtomicBool>,
    pub load_log: LoadLog,
}

impl MockControl {
    pub fn new(name: &'static str, result_ids: Vec<i64>, load_log: &LoadLog) -> Self {
        Self {
            name,
            succeed: Arc::new(AtomicBool::new(true)),
            gated: Arc::new(AtomicBool::new(false)),
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            result_ids: Arc::new(Mutex::new(result_ids)),
            load_calls: Arc::new(AtomicUsize::new(0)),
            query_calls: Arc::new(AtomicUsize::new(0)),
            cancel_requests: Arc::new(AtomicUsize::new(0)),
            observed_cancel: Arc::new(AtomicBool::new(false)),
            load_log: Arc::clone(load_log),
        }
    }

    pub fn set_gated(&self, gated: bool) {
        self.gated.store(gated, Ordering::SeqCst);
    }

    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    pub fn set_results(&self, ids: Vec<i64>) {
        *self.result_ids.lock().unwrap() = ids;
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_requests(&self) -> usize {
        self.cancel_requests.load(Ordering::SeqCst)
    }

    pub fn observed_cancel(&self) -> bool {
        self.observed_cancel.load(Ordering::SeqCst)
    }

    fn results<T: From<i64>>(&self, max_count: usize) -> Vec<T> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.result_ids
            .lock()
            .unwrap()
            .iter()
            .take(max_count)
            .map(|id| T::from(*id))
            .collect()
    }
}

pub struct MockClassifier {
    control: MockControl,
}

#[async_trait]
impl Classifier for MockClassifier {
    fn name(&self) -> &'static str {
        self.control.name
    }

    async fn load(
        &self,
        _db: &SqlitePool,
        _force_reload: bool,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> bool {
        let control = &self.control;
        control.load_calls.fetch_add(1, Ordering::SeqCst);
        control.load_log.lock().unwrap().push(control.name);

        if let Some(progress) = progress {
            progress(Progress {
                processed_elems: 0,
                total_elems: 2,
            });
            progress(Progress {
                processed_elems: 1,
                total_elems: 2,
            });
        }

        if control.gated.load(Ordering::SeqCst) {
            control.started.notify_one();
            tokio::select! {
                _ = control.release.notified() => {}
                _ = cancel.cancelled() => {
                    control.observed_cancel.store(true, Ordering::SeqCst);
                    return false;
                }
            }
        }

        if let Some(progress) = progress {
            progress(Progress {
                processed_elems: 2,
                total_elems: 2,
            });
        }

        control.succeed.load(Ordering::SeqCst)
    }

    fn request_cancel_load(&self) {
        self.control.cancel_requests.fetch_add(1, Ordering::SeqCst);
    }

    async fn similar_tracks_from_track_list(
        &self,
        _db: &SqlitePool,
        _track_list: TrackListId,
        max_count: usize,
    ) -> Vec<TrackId> {
        self.control.results(max_count)
    }

    async fn similar_tracks(
        &self,
        _db: &SqlitePool,
        _tracks: &[TrackId],
        max_count: usize,
    ) -> Vec<TrackId> {
        self.control.results(max_count)
    }

    async fn similar_releases(
        &self,
        _db: &SqlitePool,
        _release: ReleaseId,
        max_count: usize,
    ) -> Vec<ReleaseId> {
        self.control.results(max_count)
    }

    async fn similar_artists(
        &self,
        _db: &SqlitePool,
        _artist: ArtistId,
        _link_types: &[TrackArtistLinkType],
        max_count: usize,
    ) -> Vec<ArtistId> {
        self.control.results(max_count)
    }
}

/// One mock per kind: clusters results are ids 100.., features results 200..
pub struct MockBackends {
    pub clusters: MockControl,
    pub features: MockControl,
    pub load_log: LoadLog,
}

impl MockBackends {
    pub fn new() -> Self {
        let load_log: LoadLog = Arc::new(Mutex::new(Vec::new()));
        Self {
            clusters: MockControl::new("Clusters", vec![101, 102, 103], &load_log),
            features: MockControl::new("Features", vec![201, 202, 203], &load_log),
            load_log,
        }
    }

    pub fn factory(&self) -> ClassifierFactory {
        let clusters = self.clusters.clone();
        let features = self.features.clone();
        Arc::new(move |classifier_type| {
            let control = match classifier_type {
                ClassifierType::Clusters => clusters.clone(),
                ClassifierType::Features => features.clone(),
            };
            Arc::new(MockClassifier { control }) as Arc<dyn Classifier>
        })
    }

    pub fn load_order(&self) -> Vec<&'static str> {
        self.load_log.lock().unwrap().clone()
    }
}

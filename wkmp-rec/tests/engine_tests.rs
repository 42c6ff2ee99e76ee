//! Recommendation engine integration tests
//!
//! Load cycles, query fallback, hot swap and cancellation, driven by mock
//! backends whose loads block on a `Notify` until the test releases them.

mod helpers;

use helpers::{seed_sample_catalog, MockBackends, TestCatalog};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use wkmp_common::db::settings::set_recommendation_engine_type;
use wkmp_common::db::{ArtistId, RecommendationEngineType, ReleaseId, TrackId, TrackListId};
use wkmp_rec::config::FeatureSettingsMap;
use wkmp_rec::{ClassifierType, EngineConfig, Progress, ProgressCallback, RecommendationEngine};

const WAIT: Duration = Duration::from_secs(5);

async fn engine_with(
    catalog: &TestCatalog,
    backends: &MockBackends,
    engine_type: RecommendationEngineType,
) -> Arc<RecommendationEngine> {
    set_recommendation_engine_type(&catalog.pool, engine_type)
        .await
        .unwrap();
    Arc::new(RecommendationEngine::with_factory(
        catalog.pool.clone(),
        backends.factory(),
    ))
}

fn spawn_load(
    engine: &Arc<RecommendationEngine>,
) -> tokio::task::JoinHandle<wkmp_common::Result<()>> {
    let engine = Arc::clone(engine);
    tokio::spawn(async move { engine.load(false, None).await })
}

fn track_ids(ids: &[i64]) -> Vec<TrackId> {
    ids.iter().copied().map(TrackId).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clusters_type_serves_clusters_only() {
    let catalog = TestCatalog::new().await;
    let backends = MockBackends::new();
    backends.clusters.set_results((1..=30).collect());
    let engine = engine_with(&catalog, &backends, RecommendationEngineType::Clusters).await;

    engine.load(false, None).await.unwrap();

    let artists = engine.similar_artists(ArtistId(7), &[], 10).await;
    assert_eq!(artists.len(), 10);
    assert!(artists.iter().all(|artist| (1..=30).contains(&artist.value())));

    assert!(engine.similar_tracks(&[TrackId(1)], 0).await.is_empty());
    assert_eq!(backends.features.load_calls(), 0);
    assert_eq!(engine.serving_types().await, vec![ClassifierType::Clusters]);
    assert_eq!(engine.priorities().await, vec![ClassifierType::Clusters]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_features_type_build_order_differs_from_priority() {
    let catalog = TestCatalog::new().await;
    let backends = MockBackends::new();
    let engine = engine_with(&catalog, &backends, RecommendationEngineType::Features).await;

    engine.load(false, None).await.unwrap();

    assert_eq!(backends.load_order(), vec!["Clusters", "Features"]);
    assert_eq!(
        engine.priorities().await,
        vec![ClassifierType::Features, ClassifierType::Clusters]
    );
    assert_eq!(
        engine.serving_types().await,
        vec![ClassifierType::Features, ClassifierType::Clusters]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_first_non_empty_result_short_circuits() {
    let catalog = TestCatalog::new().await;
    let backends = MockBackends::new();
    let engine = engine_with(&catalog, &backends, RecommendationEngineType::Features).await;
    engine.load(false, None).await.unwrap();

    let tracks = engine.similar_tracks(&[TrackId(1)], 10).await;
    assert_eq!(tracks, track_ids(&[201, 202, 203]));
    assert_eq!(backends.features.query_calls(), 1);
    assert_eq!(backends.clusters.query_calls(), 0);

    // Empty answer from the preferred backend falls through
    backends.features.set_results(Vec::new());
    let releases = engine.similar_releases(ReleaseId(1), 2).await;
    assert_eq!(releases, vec![ReleaseId(101), ReleaseId(102)]);
    assert_eq!(backends.features.query_calls(), 2);
    assert_eq!(backends.clusters.query_calls(), 1);

    backends.clusters.set_results(Vec::new());
    assert!(engine
        .similar_tracks_from_track_list(TrackListId(1), 5)
        .await
        .is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clusters_serve_while_features_load() {
    let catalog = TestCatalog::new().await;
    let backends = MockBackends::new();
    backends.features.set_gated(true);
    let engine = engine_with(&catalog, &backends, RecommendationEngineType::Features).await;

    let loader = spawn_load(&engine);
    timeout(WAIT, backends.features.started.notified())
        .await
        .expect("features load never started");

    assert_eq!(
        engine.similar_tracks(&[TrackId(1)], 10).await,
        track_ids(&[101, 102, 103])
    );
    assert_eq!(engine.serving_types().await, vec![ClassifierType::Clusters]);
    assert_eq!(engine.pending_count(), 1);

    backends.features.release.notify_one();
    timeout(WAIT, loader).await.unwrap().unwrap().unwrap();

    assert_eq!(
        engine.similar_tracks(&[TrackId(1)], 10).await,
        track_ids(&[201, 202, 203])
    );
    assert_eq!(engine.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_features_loading() {
    let catalog = TestCatalog::new().await;
    let backends = MockBackends::new();
    backends.features.set_gated(true);
    let engine = engine_with(&catalog, &backends, RecommendationEngineType::Features).await;

    let loader = spawn_load(&engine);
    timeout(WAIT, backends.features.started.notified())
        .await
        .expect("features load never started");

    timeout(WAIT, engine.cancel_load())
        .await
        .expect("cancel_load did not return");

    assert!(backends.features.observed_cancel());
    assert_eq!(backends.features.cancel_requests(), 1);
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(engine.serving_types().await, vec![ClassifierType::Clusters]);
    timeout(WAIT, loader).await.unwrap().unwrap().unwrap();

    // Cancellation does not leak into the next cycle
    backends.features.set_gated(false);
    engine.load(false, None).await.unwrap();
    assert_eq!(
        engine.serving_types().await,
        vec![ClassifierType::Features, ClassifierType::Clusters]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_skips_backends_not_started() {
    let catalog = TestCatalog::new().await;
    let backends = MockBackends::new();
    backends.clusters.set_gated(true);
    let engine = engine_with(&catalog, &backends, RecommendationEngineType::Features).await;

    let loader = spawn_load(&engine);
    timeout(WAIT, backends.clusters.started.notified())
        .await
        .expect("clusters load never started");
    assert_eq!(engine.pending_count(), 2);

    timeout(WAIT, engine.cancel_load())
        .await
        .expect("cancel_load did not return");

    assert!(backends.clusters.observed_cancel());
    // Both were pending, so both were asked to stop; only one ever ran
    assert_eq!(backends.clusters.cancel_requests(), 1);
    assert_eq!(backends.features.cancel_requests(), 1);
    assert_eq!(backends.features.load_calls(), 0);
    assert!(engine.serving_types().await.is_empty());
    assert_eq!(engine.pending_count(), 0);
    timeout(WAIT, loader).await.unwrap().unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_backend_is_never_served() {
    let catalog = TestCatalog::new().await;
    let backends = MockBackends::new();
    backends.features.set_succeed(false);
    let engine = engine_with(&catalog, &backends, RecommendationEngineType::Features).await;

    engine.load(false, None).await.unwrap();

    assert_eq!(engine.serving_types().await, vec![ClassifierType::Clusters]);
    assert_eq!(
        engine.similar_artists(ArtistId(3), &[], 5).await,
        vec![ArtistId(101), ArtistId(102), ArtistId(103)]
    );
    assert_eq!(backends.features.query_calls(), 0);
    assert_eq!(engine.pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reload_wipes_entire_serving_set() {
    let catalog = TestCatalog::new().await;
    let backends = MockBackends::new();
    let engine = engine_with(&catalog, &backends, RecommendationEngineType::Features).await;
    engine.load(false, None).await.unwrap();
    assert_eq!(engine.serving_types().await.len(), 2);

    // Next cycle rebuilds clusters only; features must still disappear
    set_recommendation_engine_type(&catalog.pool, RecommendationEngineType::Clusters)
        .await
        .unwrap();
    backends.clusters.set_gated(true);

    let loader = spawn_load(&engine);
    timeout(WAIT, backends.clusters.started.notified())
        .await
        .expect("clusters load never started");

    assert!(engine.serving_types().await.is_empty());
    assert_eq!(engine.priorities().await, vec![ClassifierType::Clusters]);
    assert!(engine.similar_tracks(&[TrackId(1)], 5).await.is_empty());
    assert!(engine.similar_releases(ReleaseId(1), 5).await.is_empty());
    assert!(engine.similar_artists(ArtistId(1), &[], 5).await.is_empty());
    assert!(engine
        .similar_tracks_from_track_list(TrackListId(1), 5)
        .await
        .is_empty());

    backends.clusters.release.notify_one();
    timeout(WAIT, loader).await.unwrap().unwrap().unwrap();
    assert_eq!(engine.serving_types().await, vec![ClassifierType::Clusters]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_load_panics() {
    let catalog = TestCatalog::new().await;
    let backends = MockBackends::new();
    backends.features.set_gated(true);
    let engine = engine_with(&catalog, &backends, RecommendationEngineType::Features).await;

    let first = spawn_load(&engine);
    timeout(WAIT, backends.features.started.notified())
        .await
        .expect("features load never started");

    let second = spawn_load(&engine);
    let err = timeout(WAIT, second).await.unwrap().unwrap_err();
    assert!(err.is_panic());

    // The running cycle is unaffected
    assert_eq!(engine.serving_types().await, vec![ClassifierType::Clusters]);
    engine.cancel_load().await;
    timeout(WAIT, first).await.unwrap().unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_load_releases_pending() {
    let catalog = TestCatalog::new().await;
    let backends = MockBackends::new();
    backends.features.set_gated(true);
    let engine = engine_with(&catalog, &backends, RecommendationEngineType::Features).await;

    let loader = spawn_load(&engine);
    timeout(WAIT, backends.features.started.notified())
        .await
        .expect("features load never started");
    assert_eq!(engine.pending_count(), 1);

    loader.abort();
    assert!(loader.await.unwrap_err().is_cancelled());

    assert_eq!(engine.pending_count(), 0);
    timeout(WAIT, engine.cancel_load())
        .await
        .expect("cancel_load did not return");

    backends.features.set_gated(false);
    engine.load(false, None).await.unwrap();
    assert_eq!(engine.serving_types().await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_progress_is_forwarded() {
    let catalog = TestCatalog::new().await;
    let backends = MockBackends::new();
    let engine = engine_with(&catalog, &backends, RecommendationEngineType::Features).await;

    let records: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    let progress: ProgressCallback = Arc::new(move |progress| sink.lock().unwrap().push(progress));

    engine.load(false, Some(progress)).await.unwrap();

    let records = records.lock().unwrap();
    assert_eq!(records.len(), 6);
    for per_backend in records.chunks(3) {
        assert!(per_backend
            .windows(2)
            .all(|pair| pair[0].processed_elems <= pair[1].processed_elems));
        assert!(per_backend
            .iter()
            .all(|record| record.processed_elems <= record.total_elems));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_builtin_backends_end_to_end() {
    let catalog = TestCatalog::new().await;
    let sample = seed_sample_catalog(&catalog.pool).await;
    let [t0, t1, t2, t3] = sample.tracks;

    let mut config = EngineConfig::new(catalog.cache_dir());
    config.feature_settings = [("rhythm.bpm".to_string(), 1.0)]
        .into_iter()
        .collect::<FeatureSettingsMap>();
    let engine = RecommendationEngine::new(catalog.pool.clone(), config);

    engine.load(false, None).await.unwrap();
    assert_eq!(
        engine.similar_artists(sample.artists[0], &[], 10).await,
        vec![sample.artists[1]]
    );
    assert_eq!(engine.similar_tracks(&[t0], 10).await, vec![t2, t1]);

    set_recommendation_engine_type(&catalog.pool, RecommendationEngineType::Features)
        .await
        .unwrap();
    engine.load(false, None).await.unwrap();

    // Features now take precedence
    assert_eq!(engine.similar_tracks(&[t0], 10).await, vec![t1, t3, t2]);
    assert!(catalog.cache_dir().join("features.json").exists());
}

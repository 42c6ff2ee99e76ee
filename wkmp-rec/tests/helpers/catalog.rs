//! On-disk test catalogs

use serde_json::json;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tempfile::TempDir;
use wkmp_common::db::catalog;
use wkmp_common::db::init::init_database;
use wkmp_common::db::{ArtistId, ReleaseId, TrackArtistLinkType, TrackId};

/// Fresh catalog database in a temporary root folder
pub struct TestCatalog {
    pub dir: TempDir,
    pub pool: SqlitePool,
}

impl TestCatalog {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("wkmp.db")).await.unwrap();
        Self { dir, pool }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }
}

/// Ids of the sample catalog
///
/// | track | release | artist (role)    | clusters    | bpm |
/// |-------|---------|------------------|-------------|-----|
/// | t[0]  | r[0]    | a[0] (artist)    | rock, calm  | 100 |
/// | t[1]  | r[0]    | a[0] (artist)    | rock        | 102 |
/// | t[2]  | r[1]    | a[1] (artist)    | rock, calm  | 150 |
/// | t[3]  | r[2]    | a[2] (composer)  | jazz        | 104 |
pub struct SampleCatalog {
    pub tracks: [TrackId; 4],
    pub releases: [ReleaseId; 3],
    pub artists: [ArtistId; 3],
}

pub async fn seed_sample_catalog(pool: &SqlitePool) -> SampleCatalog {
    let releases = [
        catalog::insert_release(pool, "Blue Hours").await.unwrap(),
        catalog::insert_release(pool, "Loud Summer").await.unwrap(),
        catalog::insert_release(pool, "Late Set").await.unwrap(),
    ];
    let artists = [
        catalog::insert_artist(pool, "Mira Vale").await.unwrap(),
        catalog::insert_artist(pool, "The Tin Roofs").await.unwrap(),
        catalog::insert_artist(pool, "Oskar Lind").await.unwrap(),
    ];
    let tracks = [
        catalog::insert_track(pool, "Morning", Some(releases[0])).await.unwrap(),
        catalog::insert_track(pool, "Noon", Some(releases[0])).await.unwrap(),
        catalog::insert_track(pool, "Thunder", Some(releases[1])).await.unwrap(),
        catalog::insert_track(pool, "Smoke Ring", Some(releases[2])).await.unwrap(),
    ];

    let links = [
        (tracks[0], artists[0], TrackArtistLinkType::Artist),
        (tracks[1], artists[0], TrackArtistLinkType::Artist),
        (tracks[2], artists[1], TrackArtistLinkType::Artist),
        (tracks[3], artists[2], TrackArtistLinkType::Composer),
    ];
    for (track, artist, link_type) in links {
        catalog::link_track_artist(pool, track, artist, link_type).await.unwrap();
    }

    let rock = catalog::get_or_create_cluster(pool, "genre", "rock").await.unwrap();
    let jazz = catalog::get_or_create_cluster(pool, "genre", "jazz").await.unwrap();
    let calm = catalog::get_or_create_cluster(pool, "mood", "calm").await.unwrap();
    let memberships = [
        (tracks[0], rock),
        (tracks[0], calm),
        (tracks[1], rock),
        (tracks[2], rock),
        (tracks[2], calm),
        (tracks[3], jazz),
    ];
    for (track, cluster) in memberships {
        catalog::add_track_to_cluster(pool, track, cluster).await.unwrap();
    }

    for (track, bpm) in tracks.iter().zip([100.0, 102.0, 150.0, 104.0]) {
        set_bpm(pool, *track, bpm).await;
    }

    SampleCatalog {
        tracks,
        releases,
        artists,
    }
}

pub async fn set_bpm(pool: &SqlitePool, track: TrackId, bpm: f64) {
    catalog::set_track_features(pool, track, &json!({ "rhythm.bpm": bpm }))
        .await
        .unwrap();
}

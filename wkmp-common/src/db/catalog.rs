//! Catalog queries
//!
//! Read accessors used by the recommendation backends while they build their
//! models and answer queries, plus the write helpers the scanner (and tests)
//! use to populate the catalog.

use crate::db::{
    ArtistId, ClusterId, FeaturesFingerprint, ReleaseId, TrackArtistLinkType, TrackId, TrackLinks,
    TrackListId,
};
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::collections::HashSet;
use tracing::warn;

// ============================================================================
// Writes
// ============================================================================

pub async fn insert_artist(db: &Pool<Sqlite>, name: &str) -> Result<ArtistId> {
    let id = sqlx::query("INSERT INTO artists (name) VALUES (?)")
        .bind(name)
        .execute(db)
        .await?
        .last_insert_rowid();
    Ok(ArtistId(id))
}

pub async fn insert_release(db: &Pool<Sqlite>, name: &str) -> Result<ReleaseId> {
    let id = sqlx::query("INSERT INTO releases (name) VALUES (?)")
        .bind(name)
        .execute(db)
        .await?
        .last_insert_rowid();
    Ok(ReleaseId(id))
}

pub async fn insert_track(
    db: &Pool<Sqlite>,
    name: &str,
    release: Option<ReleaseId>,
) -> Result<TrackId> {
    let id = sqlx::query("INSERT INTO tracks (name, release_id) VALUES (?, ?)")
        .bind(name)
        .bind(release.map(ReleaseId::value))
        .execute(db)
        .await?
        .last_insert_rowid();
    Ok(TrackId(id))
}

pub async fn delete_track(db: &Pool<Sqlite>, track: TrackId) -> Result<()> {
    sqlx::query("DELETE FROM tracks WHERE id = ?")
        .bind(track.value())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn link_track_artist(
    db: &Pool<Sqlite>,
    track: TrackId,
    artist: ArtistId,
    link_type: TrackArtistLinkType,
) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO track_artist_links (track_id, artist_id, link_type) VALUES (?, ?, ?)",
    )
    .bind(track.value())
    .bind(artist.value())
    .bind(link_type.as_str())
    .execute(db)
    .await?;
    Ok(())
}

/// Find or create the cluster `name` of cluster type `cluster_type`
pub async fn get_or_create_cluster(
    db: &Pool<Sqlite>,
    cluster_type: &str,
    name: &str,
) -> Result<ClusterId> {
    sqlx::query("INSERT OR IGNORE INTO cluster_types (name) VALUES (?)")
        .bind(cluster_type)
        .execute(db)
        .await?;

    let cluster_type_id: i64 = sqlx::query_scalar("SELECT id FROM cluster_types WHERE name = ?")
        .bind(cluster_type)
        .fetch_one(db)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO clusters (cluster_type_id, name) VALUES (?, ?)")
        .bind(cluster_type_id)
        .bind(name)
        .execute(db)
        .await?;

    let id: i64 =
        sqlx::query_scalar("SELECT id FROM clusters WHERE cluster_type_id = ? AND name = ?")
            .bind(cluster_type_id)
            .bind(name)
            .fetch_one(db)
            .await?;

    Ok(ClusterId(id))
}

pub async fn add_track_to_cluster(db: &Pool<Sqlite>, track: TrackId, cluster: ClusterId) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO track_clusters (track_id, cluster_id) VALUES (?, ?)")
        .bind(track.value())
        .bind(cluster.value())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn create_track_list(db: &Pool<Sqlite>, name: &str) -> Result<TrackListId> {
    let id = sqlx::query("INSERT INTO track_lists (name) VALUES (?)")
        .bind(name)
        .execute(db)
        .await?
        .last_insert_rowid();
    Ok(TrackListId(id))
}

pub async fn append_to_track_list(
    db: &Pool<Sqlite>,
    track_list: TrackListId,
    track: TrackId,
) -> Result<()> {
    sqlx::query("INSERT INTO track_list_entries (track_list_id, track_id) VALUES (?, ?)")
        .bind(track_list.value())
        .bind(track.value())
        .execute(db)
        .await?;
    Ok(())
}

/// Store the analysed features of a track (replaces any previous analysis)
pub async fn set_track_features(
    db: &Pool<Sqlite>,
    track: TrackId,
    features: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO track_features (track_id, data) VALUES (?, ?)
         ON CONFLICT(track_id) DO UPDATE SET data = excluded.data",
    )
    .bind(track.value())
    .bind(serde_json::to_string(features)?)
    .execute(db)
    .await?;
    Ok(())
}

// ============================================================================
// Reads
// ============================================================================

pub async fn get_all_track_ids(db: &Pool<Sqlite>) -> Result<Vec<TrackId>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM tracks ORDER BY id")
        .fetch_all(db)
        .await?;
    Ok(ids.into_iter().map(TrackId).collect())
}

pub async fn get_all_release_ids(db: &Pool<Sqlite>) -> Result<Vec<ReleaseId>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM releases ORDER BY id")
        .fetch_all(db)
        .await?;
    Ok(ids.into_iter().map(ReleaseId).collect())
}

pub async fn get_all_artist_ids(db: &Pool<Sqlite>) -> Result<Vec<ArtistId>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM artists ORDER BY id")
        .fetch_all(db)
        .await?;
    Ok(ids.into_iter().map(ArtistId).collect())
}

pub async fn get_track_name(db: &Pool<Sqlite>, track: TrackId) -> Result<Option<String>> {
    Ok(sqlx::query_scalar("SELECT name FROM tracks WHERE id = ?")
        .bind(track.value())
        .fetch_optional(db)
        .await?)
}

pub async fn get_release_name(db: &Pool<Sqlite>, release: ReleaseId) -> Result<Option<String>> {
    Ok(sqlx::query_scalar("SELECT name FROM releases WHERE id = ?")
        .bind(release.value())
        .fetch_optional(db)
        .await?)
}

pub async fn get_artist_name(db: &Pool<Sqlite>, artist: ArtistId) -> Result<Option<String>> {
    Ok(sqlx::query_scalar("SELECT name FROM artists WHERE id = ?")
        .bind(artist.value())
        .fetch_optional(db)
        .await?)
}

/// Tracks of a track list in list order, `None` if the list does not exist
pub async fn get_track_list_track_ids(
    db: &Pool<Sqlite>,
    track_list: TrackListId,
) -> Result<Option<Vec<TrackId>>> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM track_lists WHERE id = ?)")
        .bind(track_list.value())
        .fetch_one(db)
        .await?;
    if !exists {
        return Ok(None);
    }

    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT track_id FROM track_list_entries WHERE track_list_id = ? ORDER BY id",
    )
    .bind(track_list.value())
    .fetch_all(db)
    .await?;

    Ok(Some(ids.into_iter().map(TrackId).collect()))
}

pub async fn get_track_ids_with_features(db: &Pool<Sqlite>) -> Result<Vec<TrackId>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT track_id FROM track_features ORDER BY track_id")
        .fetch_all(db)
        .await?;
    Ok(ids.into_iter().map(TrackId).collect())
}

/// Analysed features of a track, `None` if the track was never analysed
pub async fn get_track_features(
    db: &Pool<Sqlite>,
    track: TrackId,
) -> Result<Option<serde_json::Value>> {
    let data: Option<String> = sqlx::query_scalar("SELECT data FROM track_features WHERE track_id = ?")
        .bind(track.value())
        .fetch_optional(db)
        .await?;

    data.map(|data| serde_json::from_str(&data).map_err(Error::from))
        .transpose()
}

/// Rows hashed per round trip by [`get_features_fingerprint`]
const FINGERPRINT_BATCH: i64 = 1000;

/// Fingerprint of the analysed catalog
///
/// Changes whenever tracks are analysed, re-analysed or removed, which is
/// what cached feature models are validated against.
pub async fn get_features_fingerprint(db: &Pool<Sqlite>) -> Result<FeaturesFingerprint> {
    let mut hasher = Sha256::new();
    let mut feature_rows = 0;
    let mut max_track_id = 0;

    loop {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT track_id, data FROM track_features WHERE track_id > ? ORDER BY track_id LIMIT ?",
        )
        .bind(max_track_id)
        .bind(FINGERPRINT_BATCH)
        .fetch_all(db)
        .await?;

        let Some((last, _)) = rows.last() else {
            break;
        };
        max_track_id = *last;
        feature_rows += rows.len() as i64;

        for (track_id, data) in &rows {
            hasher.update(track_id.to_le_bytes());
            hasher.update((data.len() as u64).to_le_bytes());
            hasher.update(data.as_bytes());
        }
    }

    Ok(FeaturesFingerprint {
        feature_rows,
        max_track_id,
        digest: format!("{:x}", hasher.finalize()),
    })
}

pub async fn get_track_links(db: &Pool<Sqlite>, track: TrackId) -> Result<TrackLinks> {
    let release: Option<Option<i64>> = sqlx::query_scalar("SELECT release_id FROM tracks WHERE id = ?")
        .bind(track.value())
        .fetch_optional(db)
        .await?;

    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT artist_id, link_type FROM track_artist_links WHERE track_id = ? ORDER BY id",
    )
    .bind(track.value())
    .fetch_all(db)
    .await?;

    let mut artists = Vec::with_capacity(rows.len());
    for (artist_id, link_type) in rows {
        match link_type.parse() {
            Ok(link_type) => artists.push((ArtistId(artist_id), link_type)),
            Err(e) => warn!("Track {}: {}", track, e),
        }
    }

    Ok(TrackLinks {
        release: release.flatten().map(ReleaseId),
        artists,
    })
}

pub async fn existing_track_ids(db: &Pool<Sqlite>, ids: &[TrackId]) -> Result<HashSet<TrackId>> {
    let raw: Vec<i64> = ids.iter().map(|id| id.value()).collect();
    Ok(existing_ids(db, "tracks", &raw).await?.into_iter().map(TrackId).collect())
}

pub async fn existing_release_ids(
    db: &Pool<Sqlite>,
    ids: &[ReleaseId],
) -> Result<HashSet<ReleaseId>> {
    let raw: Vec<i64> = ids.iter().map(|id| id.value()).collect();
    Ok(existing_ids(db, "releases", &raw).await?.into_iter().map(ReleaseId).collect())
}

pub async fn existing_artist_ids(db: &Pool<Sqlite>, ids: &[ArtistId]) -> Result<HashSet<ArtistId>> {
    let raw: Vec<i64> = ids.iter().map(|id| id.value()).collect();
    Ok(existing_ids(db, "artists", &raw).await?.into_iter().map(ArtistId).collect())
}

async fn existing_ids(db: &Pool<Sqlite>, table: &'static str, ids: &[i64]) -> Result<HashSet<i64>> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT id FROM {} WHERE id IN (", table));
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let found: Vec<i64> = builder.build_query_scalar().fetch_all(db).await?;
    Ok(found.into_iter().collect())
}

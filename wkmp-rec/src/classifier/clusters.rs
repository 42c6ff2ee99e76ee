//! Cluster co-occurrence backend
//!
//! Cluster memberships (genre, mood, ... tags) already live in the catalog, so
//! there is no model to build: loading succeeds immediately and every query is
//! answered with SQL. Candidates are ranked by how many clusters they share
//! with the seeds, ties broken by id.

use super::Classifier;
use crate::types::ProgressCallback;
use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wkmp_common::db::{ArtistId, ReleaseId, TrackArtistLinkType, TrackId, TrackListId};
use wkmp_common::Result;

#[derive(Debug, Default)]
pub struct ClustersClassifier;

impl ClustersClassifier {
    pub fn new() -> Self {
        Self
    }
}

fn sql_limit(max_count: usize) -> i64 {
    i64::try_from(max_count).unwrap_or(i64::MAX)
}

/// Where the seed tracks of a track query come from
///
/// Both forms reach SQLite as a single bound parameter, so the seed count is
/// not limited by the statement's variable limit.
#[derive(Debug, Clone, Copy)]
enum Seeds<'a> {
    Tracks(&'a [TrackId]),
    TrackList(TrackListId),
}

impl Seeds<'_> {
    fn select(&self) -> &'static str {
        match self {
            Self::Tracks(_) => "SELECT value FROM json_each(?)",
            Self::TrackList(_) => "SELECT track_id FROM track_list_entries WHERE track_list_id = ?",
        }
    }
}

async fn query_similar_tracks(
    db: &SqlitePool,
    seeds: Seeds<'_>,
    max_count: usize,
) -> Result<Vec<TrackId>> {
    let sql = format!(
        r#"
        WITH seeds(track_id) AS ({})
        SELECT tc.track_id FROM track_clusters tc
        WHERE tc.cluster_id IN (
            SELECT cluster_id FROM track_clusters
            WHERE track_id IN (SELECT track_id FROM seeds)
        )
        AND tc.track_id NOT IN (SELECT track_id FROM seeds)
        GROUP BY tc.track_id
        ORDER BY COUNT(*) DESC, tc.track_id
        LIMIT ?
        "#,
        seeds.select()
    );

    let query = sqlx::query_scalar::<_, i64>(&sql);
    let query = match seeds {
        Seeds::Tracks(tracks) => {
            let raw: Vec<i64> = tracks.iter().map(|track| track.value()).collect();
            query.bind(serde_json::to_string(&raw)?)
        }
        Seeds::TrackList(track_list) => query.bind(track_list.value()),
    };

    let ids = query.bind(sql_limit(max_count)).fetch_all(db).await?;
    Ok(ids.into_iter().map(TrackId).collect())
}

async fn query_similar_releases(
    db: &SqlitePool,
    release: ReleaseId,
    max_count: usize,
) -> Result<Vec<ReleaseId>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT t.release_id FROM tracks t
        JOIN track_clusters tc ON tc.track_id = t.id
        WHERE tc.cluster_id IN (
            SELECT tc2.cluster_id FROM track_clusters tc2
            JOIN tracks t2 ON t2.id = tc2.track_id
            WHERE t2.release_id = ?
        )
        AND t.release_id IS NOT NULL
        AND t.release_id <> ?
        GROUP BY t.release_id
        ORDER BY COUNT(*) DESC, t.release_id
        LIMIT ?
        "#,
    )
    .bind(release.value())
    .bind(release.value())
    .bind(sql_limit(max_count))
    .fetch_all(db)
    .await?;

    Ok(ids.into_iter().map(ReleaseId).collect())
}

async fn query_similar_artists(
    db: &SqlitePool,
    artist: ArtistId,
    link_types: &[TrackArtistLinkType],
    max_count: usize,
) -> Result<Vec<ArtistId>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT l.artist_id FROM track_artist_links l \
         JOIN track_clusters tc ON tc.track_id = l.track_id \
         WHERE tc.cluster_id IN ( \
             SELECT tc2.cluster_id FROM track_clusters tc2 \
             JOIN track_artist_links l2 ON l2.track_id = tc2.track_id \
             WHERE l2.artist_id = ",
    );
    builder.push_bind(artist.value());
    builder.push(") AND l.artist_id <> ");
    builder.push_bind(artist.value());

    if !link_types.is_empty() {
        builder.push(" AND l.link_type IN (");
        {
            let mut separated = builder.separated(", ");
            for link_type in link_types {
                separated.push_bind(link_type.as_str());
            }
        }
        builder.push(")");
    }

    builder.push(" GROUP BY l.artist_id ORDER BY COUNT(*) DESC, l.artist_id LIMIT ");
    builder.push_bind(sql_limit(max_count));

    let ids: Vec<i64> = builder.build_query_scalar().fetch_all(db).await?;
    Ok(ids.into_iter().map(ArtistId).collect())
}

#[async_trait]
impl Classifier for ClustersClassifier {
    fn name(&self) -> &'static str {
        "Clusters"
    }

    async fn load(
        &self,
        _db: &SqlitePool,
        _force_reload: bool,
        _cancel: &CancellationToken,
        _progress: Option<&ProgressCallback>,
    ) -> bool {
        true
    }

    async fn similar_tracks_from_track_list(
        &self,
        db: &SqlitePool,
        track_list: TrackListId,
        max_count: usize,
    ) -> Vec<TrackId> {
        if max_count == 0 {
            return Vec::new();
        }

        query_similar_tracks(db, Seeds::TrackList(track_list), max_count)
            .await
            .unwrap_or_else(|e| {
                warn!("Similar tracks query for track list {} failed: {}", track_list, e);
                Vec::new()
            })
    }

    async fn similar_tracks(
        &self,
        db: &SqlitePool,
        tracks: &[TrackId],
        max_count: usize,
    ) -> Vec<TrackId> {
        if tracks.is_empty() || max_count == 0 {
            return Vec::new();
        }

        query_similar_tracks(db, Seeds::Tracks(tracks), max_count)
            .await
            .unwrap_or_else(|e| {
                warn!("Similar tracks query failed: {}", e);
                Vec::new()
            })
    }

    async fn similar_releases(
        &self,
        db: &SqlitePool,
        release: ReleaseId,
        max_count: usize,
    ) -> Vec<ReleaseId> {
        if max_count == 0 {
            return Vec::new();
        }

        query_similar_releases(db, release, max_count)
            .await
            .unwrap_or_else(|e| {
                warn!("Similar releases query failed: {}", e);
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
        if max_count == 0 {
            return Vec::new();
        }

        query_similar_artists(db, artist, link_types, max_count)
            .await
            .unwrap_or_else(|e| {
                warn!("Similar artists query failed: {}", e);
                Vec::new()
            })
    }
}

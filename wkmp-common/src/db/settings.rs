//! Settings database operations
//!
//! Accessors for the settings table following the key-value pattern. Values
//! are stored as text and parsed on read.

use crate::db::RecommendationEngineType;
use crate::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::warn;

/// Key of the persisted recommendation engine type
pub const RECOMMENDATION_ENGINE_TYPE_KEY: &str = "recommendation_engine_type";

/// Read the configured recommendation engine type
///
/// Runs in its own short transaction so the value is read from one consistent
/// snapshot. A missing, NULL or unparsable value falls back to
/// [`RecommendationEngineType::Clusters`].
pub async fn get_recommendation_engine_type(db: &Pool<Sqlite>) -> Result<RecommendationEngineType> {
    let mut tx = db.begin().await?;

    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(RECOMMENDATION_ENGINE_TYPE_KEY)
            .fetch_optional(&mut *tx)
            .await?;

    tx.commit().await?;

    match value.flatten() {
        Some(value) => match value.parse() {
            Ok(engine_type) => Ok(engine_type),
            Err(e) => {
                warn!("{}, using {}", e, RecommendationEngineType::default());
                Ok(RecommendationEngineType::default())
            }
        },
        None => Ok(RecommendationEngineType::default()),
    }
}

/// Persist the recommendation engine type
///
/// Takes effect on the next recommendation reload.
pub async fn set_recommendation_engine_type(
    db: &Pool<Sqlite>,
    engine_type: RecommendationEngineType,
) -> Result<()> {
    set_setting(db, RECOMMENDATION_ENGINE_TYPE_KEY, engine_type.as_str()).await
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

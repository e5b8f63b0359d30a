use async_trait::async_trait;
use chrono::{DateTime, Utc};
use contrack_core::{Bookmark, Contest, ContestId, Platform, UserId};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::store::{BookmarkStore, ContestReader, ContestWriter, StoreError, UpsertCounts};

/// Postgres-backed store. Uniqueness and link preservation are enforced by the SQL itself so
/// overlapping writers converge.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::unavailable("connect", e))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("contest and bookmark tables migrated");
        Ok(())
    }
}

fn contest_from_row(row: &PgRow) -> Result<Contest, StoreError> {
    let get = |e: sqlx::Error| StoreError::CorruptRow(e.to_string());
    let platform: String = row.try_get("platform").map_err(get)?;
    Ok(Contest {
        id: ContestId::from_stored(row.try_get::<String, _>("id").map_err(get)?),
        name: row.try_get("name").map_err(get)?,
        platform: platform
            .parse::<Platform>()
            .map_err(|e| StoreError::CorruptRow(e.to_string()))?,
        start_time: row.try_get::<DateTime<Utc>, _>("start_time").map_err(get)?,
        end_time: row.try_get::<DateTime<Utc>, _>("end_time").map_err(get)?,
        duration_seconds: row.try_get("duration_seconds").map_err(get)?,
        url: row.try_get("url").map_err(get)?,
        solution_link: row.try_get("solution_link").map_err(get)?,
    })
}

fn bookmark_from_row(row: &PgRow) -> Result<Bookmark, StoreError> {
    let get = |e: sqlx::Error| StoreError::CorruptRow(e.to_string());
    Ok(Bookmark {
        id: row.try_get::<Uuid, _>("id").map_err(get)?,
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(get)?),
        contest_id: ContestId::from_stored(row.try_get::<String, _>("contest_id").map_err(get)?),
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

#[async_trait]
impl ContestReader for PgStore {
    async fn all_contests(&self) -> Result<Vec<Contest>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, platform, name, start_time, end_time, duration_seconds, url, solution_link
              FROM contests
             ORDER BY start_time, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::unavailable("all_contests", e))?;
        rows.iter().map(contest_from_row).collect()
    }

    async fn contest(&self, id: &ContestId) -> Result<Option<Contest>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, platform, name, start_time, end_time, duration_seconds, url, solution_link
              FROM contests
             WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::unavailable("contest", e))?;
        row.as_ref().map(contest_from_row).transpose()
    }
}

#[async_trait]
impl ContestWriter for PgStore {
    async fn upsert_contests(&self, contests: &[Contest]) -> Result<UpsertCounts, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::unavailable("upsert_contests", e))?;

        let mut counts = UpsertCounts::default();
        for contest in contests {
            // xmax = 0 only for freshly inserted tuples; no row back means nothing changed.
            let row = sqlx::query(
                r#"
                INSERT INTO contests
                    (id, platform, name, start_time, end_time, duration_seconds, url, solution_link)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO UPDATE SET
                    platform = EXCLUDED.platform,
                    name = EXCLUDED.name,
                    start_time = EXCLUDED.start_time,
                    end_time = EXCLUDED.end_time,
                    duration_seconds = EXCLUDED.duration_seconds,
                    url = EXCLUDED.url,
                    solution_link = COALESCE(contests.solution_link, EXCLUDED.solution_link),
                    updated_at = NOW()
                WHERE (contests.platform, contests.name, contests.start_time, contests.end_time,
                       contests.duration_seconds, contests.url)
                      IS DISTINCT FROM
                      (EXCLUDED.platform, EXCLUDED.name, EXCLUDED.start_time, EXCLUDED.end_time,
                       EXCLUDED.duration_seconds, EXCLUDED.url)
                   OR (contests.solution_link IS NULL AND EXCLUDED.solution_link IS NOT NULL)
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(contest.id.as_str())
            .bind(contest.platform.slug())
            .bind(&contest.name)
            .bind(contest.start_time)
            .bind(contest.end_time)
            .bind(contest.duration_seconds)
            .bind(&contest.url)
            .bind(contest.solution_link.as_deref())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StoreError::unavailable("upsert_contests", e))?;

            match row {
                Some(row) => {
                    let inserted: bool = row
                        .try_get("inserted")
                        .map_err(|e| StoreError::CorruptRow(e.to_string()))?;
                    if inserted {
                        counts.inserted += 1;
                    } else {
                        counts.updated += 1;
                    }
                }
                None => counts.unchanged += 1,
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::unavailable("upsert_contests", e))?;
        Ok(counts)
    }

    async fn set_solution_link(&self, id: &ContestId, link: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE contests
               SET solution_link = $2,
                   updated_at = NOW()
             WHERE id = $1
               AND solution_link IS NULL
            "#,
        )
        .bind(id.as_str())
        .bind(link)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::unavailable("set_solution_link", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl BookmarkStore for PgStore {
    async fn insert_bookmark(&self, bookmark: &Bookmark) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO bookmarks (id, user_id, contest_id, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, contest_id) DO NOTHING
            "#,
        )
        .bind(bookmark.id)
        .bind(bookmark.user_id.as_str())
        .bind(bookmark.contest_id.as_str())
        .bind(bookmark.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_foreign_key_violation() => StoreError::UnknownContest(bookmark.contest_id.clone()),
            _ => StoreError::unavailable("insert_bookmark", e),
        })?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_bookmark(&self, user: &UserId, contest: &ContestId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM bookmarks WHERE user_id = $1 AND contest_id = $2")
            .bind(user.as_str())
            .bind(contest.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::unavailable("delete_bookmark", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn bookmarks_for(&self, user: &UserId) -> Result<Vec<Bookmark>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, contest_id, created_at
              FROM bookmarks
             WHERE user_id = $1
             ORDER BY created_at, contest_id
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::unavailable("bookmarks_for", e))?;
        rows.iter().map(bookmark_from_row).collect()
    }
}

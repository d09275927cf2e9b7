// SQLite implementation of the EconomyStore trait
//
// Tables:
// - event_definitions: the global event catalog
// - event_log: one row per successful award (append-only)
// - user_points: running total per (guild, user)

use crate::core::economy::{
    AwardOutcome, EconomyError, EconomyStore, EventDefinition, GuildId, ReconcileReport, UserId,
    UserPoints,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};

fn store_error(e: sqlx::Error) -> EconomyError {
    EconomyError::StoreFailure(e.to_string())
}

pub struct SqliteEconomyStore {
    pool: Pool<Sqlite>,
}

impl SqliteEconomyStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create tables.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_definitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                points INTEGER NOT NULL CHECK (points >= 0),
                max_occurrence INTEGER NOT NULL DEFAULT 0 CHECK (max_occurrence >= 0),
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                definition_id INTEGER REFERENCES event_definitions(id) ON DELETE SET NULL,
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Occurrence checks filter on exactly these columns
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_event_log_definition_guild_user
            ON event_log(definition_id, guild_id, user_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_event_log_guild_user
            ON event_log(guild_id, user_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                points INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (guild_id, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_user_points_rank
            ON user_points(guild_id, points DESC, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn out_of_range(key: &str, column: &str, value: i64) -> EconomyError {
    EconomyError::StoreFailure(format!("event [{key}] has out-of-range {column} {value}"))
}

fn row_to_definition(row: &sqlx::sqlite::SqliteRow) -> Result<EventDefinition, EconomyError> {
    let key: String = row.get("key");
    let points: i64 = row.get("points");
    let max_occurrence: i64 = row.get("max_occurrence");

    let points = u64::try_from(points).map_err(|_| out_of_range(&key, "points", points))?;
    let max_occurrence = u32::try_from(max_occurrence)
        .map_err(|_| out_of_range(&key, "max_occurrence", max_occurrence))?;

    Ok(EventDefinition {
        id: row.get("id"),
        key,
        name: row.get("name"),
        points,
        max_occurrence,
    })
}

#[async_trait]
impl EconomyStore for SqliteEconomyStore {
    async fn seed_definitions(&self, defaults: &[EventDefinition]) -> Result<usize, EconomyError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let mut inserted = 0;

        for definition in defaults {
            let result = sqlx::query(
                r#"
                INSERT INTO event_definitions (key, name, points, max_occurrence)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(key) DO NOTHING
                "#,
            )
            .bind(&definition.key)
            .bind(&definition.name)
            .bind(definition.points as i64)
            .bind(i64::from(definition.max_occurrence))
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

            inserted += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(store_error)?;
        Ok(inserted)
    }

    async fn find_definition(&self, key: &str) -> Result<Option<EventDefinition>, EconomyError> {
        let row = sqlx::query(
            "SELECT id, key, name, points, max_occurrence FROM event_definitions WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.as_ref().map(row_to_definition).transpose()
    }

    async fn list_definitions(&self) -> Result<Vec<EventDefinition>, EconomyError> {
        let rows = sqlx::query(
            "SELECT id, key, name, points, max_occurrence FROM event_definitions ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter().map(row_to_definition).collect()
    }

    async fn record_award(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        definition: &EventDefinition,
    ) -> Result<AwardOutcome, EconomyError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        // The guarded insert must be the first statement: it takes the write
        // lock before the count is read, so a concurrent award for the same
        // key waits here and then sees this row.
        let inserted = sqlx::query(
            r#"
            INSERT INTO event_log (definition_id, guild_id, user_id, created_at)
            SELECT d.id, ?, ?, ?
            FROM event_definitions d
            WHERE d.id = ?
              AND (d.max_occurrence = 0
                   OR (SELECT COUNT(*) FROM event_log l
                       WHERE l.definition_id = d.id
                         AND l.guild_id = ?
                         AND l.user_id = ?) < d.max_occurrence)
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(Utc::now())
        .bind(definition.id)
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?
        .rows_affected();

        let occurrences: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM event_log
            WHERE definition_id = ? AND guild_id = ? AND user_id = ?
            "#,
        )
        .bind(definition.id)
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error)?;

        let points: Option<i64> =
            sqlx::query_scalar("SELECT points FROM event_definitions WHERE id = ?")
                .bind(definition.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(store_error)?;

        if inserted == 0 {
            tx.rollback().await.map_err(store_error)?;
            return Ok(match points {
                Some(_) => AwardOutcome::LimitReached {
                    occurrences: occurrences as u64,
                },
                None => AwardOutcome::DefinitionMissing,
            });
        }

        // The insert above only succeeds while the definition exists.
        let points = points.unwrap_or(0);
        let points_awarded =
            u64::try_from(points).map_err(|_| out_of_range(&definition.key, "points", points))?;

        let new_total: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO user_points (guild_id, user_id, points)
            VALUES (?, ?, ?)
            ON CONFLICT(guild_id, user_id) DO UPDATE SET
                points = points + excluded.points,
                updated_at = CURRENT_TIMESTAMP
            RETURNING points
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(points)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;

        Ok(AwardOutcome::Recorded {
            points_awarded,
            new_total: new_total as u64,
            occurrences: occurrences as u64,
        })
    }

    async fn count_awards(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        definition_id: i64,
    ) -> Result<u64, EconomyError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM event_log
            WHERE definition_id = ? AND guild_id = ? AND user_id = ?
            "#,
        )
        .bind(definition_id)
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(count as u64)
    }

    async fn get_user_points(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<u64>, EconomyError> {
        let points: Option<i64> =
            sqlx::query_scalar("SELECT points FROM user_points WHERE guild_id = ? AND user_id = ?")
                .bind(guild_id as i64)
                .bind(user_id as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

        Ok(points.map(|p| p as u64))
    }

    async fn get_top_users(
        &self,
        guild_id: GuildId,
        limit: usize,
    ) -> Result<Vec<UserPoints>, EconomyError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, points FROM user_points
            WHERE guild_id = ?
            ORDER BY points DESC, id ASC
            LIMIT ?
            "#,
        )
        .bind(guild_id as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(rows
            .iter()
            .map(|row| UserPoints {
                user_id: row.get::<i64, _>("user_id") as u64,
                points: row.get::<i64, _>("points") as u64,
            })
            .collect())
    }

    async fn reconcile_guild(&self, guild_id: GuildId) -> Result<ReconcileReport, EconomyError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        // Write first so the transaction holds the write lock for the whole
        // recomputation. Users that earned points but lost their row get one.
        sqlx::query(
            r#"
            INSERT INTO user_points (guild_id, user_id, points)
            SELECT l.guild_id, l.user_id, 0
            FROM event_log l
            JOIN event_definitions d ON d.id = l.definition_id
            WHERE l.guild_id = ?
            GROUP BY l.guild_id, l.user_id
            HAVING SUM(d.points) > 0
            ON CONFLICT(guild_id, user_id) DO NOTHING
            "#,
        )
        .bind(guild_id as i64)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        let rows = sqlx::query(
            r#"
            SELECT u.id, u.points,
                   COALESCE((SELECT SUM(d.points)
                             FROM event_log l
                             JOIN event_definitions d ON d.id = l.definition_id
                             WHERE l.guild_id = u.guild_id AND l.user_id = u.user_id), 0) AS expected
            FROM user_points u
            WHERE u.guild_id = ?
            "#,
        )
        .bind(guild_id as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(store_error)?;

        let mut report = ReconcileReport {
            users: rows.len(),
            ..ReconcileReport::default()
        };

        for row in &rows {
            let id: i64 = row.get("id");
            let points: i64 = row.get("points");
            let expected: i64 = row.get("expected");
            if points == expected {
                continue;
            }

            sqlx::query(
                "UPDATE user_points SET points = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            )
            .bind(expected)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
            report.corrected += 1;
        }

        let dangling: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM event_log l
            LEFT JOIN event_definitions d ON d.id = l.definition_id
            WHERE l.guild_id = ? AND d.id IS NULL
            "#,
        )
        .bind(guild_id as i64)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error)?;
        report.dangling_entries = dangling as u64;

        tx.commit().await.map_err(store_error)?;
        Ok(report)
    }
}

//! Durable topic log stored in SQLite
//!
//! Events live in `stream_events(topic, event_offset, payload)`; each consumer
//! group's read position lives in `consumer_offsets`. A committed offset is the
//! offset of the next event the group will read.
//!
//! When a group has no committed offset, `auto_offset_reset` decides where it
//! starts: `earliest` reads the whole retained topic, `latest` only events
//! appended after connect.

use super::{Poll, StreamError, StreamMessage, StreamSource};
use etp_common::config::{OffsetReset, StreamConfig};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

pub struct EventLogSource {
    pool: SqlitePool,
    topic: String,
    group_id: String,
    auto_commit: bool,
    position: i64,
}

impl EventLogSource {
    /// Connect to the log named by `config.bootstrap_servers`
    pub async fn connect(config: &StreamConfig) -> Result<Self, StreamError> {
        let options = connect_options(&config.bootstrap_servers)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::from_pool(pool, config).await
    }

    /// Attach to an existing pool (tables are created if missing)
    pub async fn from_pool(pool: SqlitePool, config: &StreamConfig) -> Result<Self, StreamError> {
        init_tables(&pool).await?;

        let committed: Option<(i64,)> = sqlx::query_as(
            "SELECT committed_offset FROM consumer_offsets WHERE group_id = ? AND topic = ?",
        )
        .bind(&config.group_id)
        .bind(&config.topics)
        .fetch_optional(&pool)
        .await?;

        let position = match committed {
            Some((offset,)) => offset,
            None => match config.auto_offset_reset {
                OffsetReset::Earliest => 0,
                OffsetReset::Latest => {
                    let (next,): (i64,) = sqlx::query_as(
                        "SELECT COALESCE(MAX(event_offset) + 1, 0) FROM stream_events WHERE topic = ?",
                    )
                    .bind(&config.topics)
                    .fetch_one(&pool)
                    .await?;
                    next
                }
            },
        };

        info!(
            topic = %config.topics,
            group_id = %config.group_id,
            position,
            auto_commit = config.enable_auto_commit,
            "Event log consumer attached"
        );

        Ok(Self {
            pool,
            topic: config.topics.clone(),
            group_id: config.group_id.clone(),
            auto_commit: config.enable_auto_commit,
            position,
        })
    }

    async fn store_position(&self) -> Result<(), StreamError> {
        sqlx::query(
            r#"
            INSERT INTO consumer_offsets (group_id, topic, committed_offset, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(group_id, topic) DO UPDATE SET
                committed_offset = excluded.committed_offset,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.group_id)
        .bind(&self.topic)
        .bind(self.position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StreamSource for EventLogSource {
    fn name(&self) -> &str {
        &self.topic
    }

    async fn poll(&mut self) -> Result<Poll, StreamError> {
        let next: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT event_offset, payload FROM stream_events
            WHERE topic = ? AND event_offset >= ?
            ORDER BY event_offset
            LIMIT 1
            "#,
        )
        .bind(&self.topic)
        .bind(self.position)
        .fetch_optional(&self.pool)
        .await?;

        let Some((offset, payload)) = next else {
            return Ok(Poll::Idle);
        };

        self.position = offset + 1;
        if self.auto_commit {
            self.store_position().await?;
        }

        Ok(Poll::Message(StreamMessage {
            offset,
            payload: payload.into_bytes(),
        }))
    }

    async fn commit(&mut self) -> Result<(), StreamError> {
        debug!(topic = %self.topic, position = self.position, "Committing read position");
        self.store_position().await
    }

    fn position(&self) -> i64 {
        self.position
    }
}

/// Accept either a `sqlite:` URL or a bare file path
pub(crate) fn connect_options(target: &str) -> Result<SqliteConnectOptions, StreamError> {
    if target.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(target)
            .map_err(|_| StreamError::Unavailable("invalid event log URL".to_string()))
    } else {
        Ok(SqliteConnectOptions::new().filename(target))
    }
}

async fn init_tables(pool: &SqlitePool) -> Result<(), StreamError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stream_events (
            topic TEXT NOT NULL,
            event_offset INTEGER NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (topic, event_offset)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consumer_offsets (
            group_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            committed_offset INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (group_id, topic)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Append one event to a topic, returning its offset
///
/// Producer side of the log; the scorer itself only consumes.
pub async fn append_event(pool: &SqlitePool, topic: &str, payload: &str) -> Result<i64, StreamError> {
    init_tables(pool).await?;

    let (offset,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO stream_events (topic, event_offset, payload)
        VALUES (?, (SELECT COALESCE(MAX(event_offset) + 1, 0) FROM stream_events WHERE topic = ?), ?)
        RETURNING event_offset
        "#,
    )
    .bind(topic)
    .bind(topic)
    .bind(payload)
    .fetch_one(pool)
    .await?;

    Ok(offset)
}

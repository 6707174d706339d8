mod polls;
mod votes;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;
use crate::error::StorageError;
use crate::models::{Poll, Vote, VoterIdentity};

/// Read side of poll definitions, plus the writes the content side performs.
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn create_poll(&self, poll: &Poll) -> Result<(), StorageError>;

    async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>, StorageError>;

    /// Polls attached to a piece of content, oldest first.
    async fn polls_for_content(&self, content_id: &str) -> Result<Vec<Poll>, StorageError>;

    /// Returns false when no poll has that id.
    async fn set_poll_active(&self, poll_id: &str, active: bool) -> Result<bool, StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Append-only vote storage. `insert_vote` is the only write and must reject a
/// second vote for the same (poll, voter) atomically at the storage layer.
#[async_trait]
pub trait VoteLedger: Send + Sync {
    async fn insert_vote(&self, vote: &Vote) -> Result<InsertOutcome, StorageError>;

    async fn has_vote(&self, poll_id: &str, voter: &VoterIdentity) -> Result<bool, StorageError>;

    async fn find_vote(
        &self,
        poll_id: &str,
        voter: &VoterIdentity,
    ) -> Result<Option<Vote>, StorageError>;

    async fn votes_for_poll(&self, poll_id: &str) -> Result<Vec<Vote>, StorageError>;
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &Config) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        // Connect to the database
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        // Initialize schema
        Self::init_schema(&pool).await?;
        info!("Connected to poll database at {}", config.database_url);

        Ok(Self { pool })
    }

    // Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                content_id TEXT NOT NULL,
                question TEXT NOT NULL,
                description TEXT,
                is_multiple_choice BOOLEAN NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                end_date TEXT,
                results_visibility TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS polls_by_content ON polls (content_id, created_at);")
            .execute(pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                id TEXT PRIMARY KEY,
                poll_id TEXT NOT NULL,
                text TEXT NOT NULL,
                position INTEGER NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // The primary key is what turns concurrent double votes into a single winner.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                poll_id TEXT NOT NULL,
                voter_kind TEXT NOT NULL,
                voter_key TEXT NOT NULL,
                cast_at TEXT NOT NULL,
                PRIMARY KEY (poll_id, voter_kind, voter_key),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        // One row per selected option, removed with its vote
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vote_selections (
                poll_id TEXT NOT NULL,
                voter_kind TEXT NOT NULL,
                voter_key TEXT NOT NULL,
                option_id TEXT NOT NULL,
                PRIMARY KEY (poll_id, voter_kind, voter_key, option_id),
                FOREIGN KEY (poll_id, voter_kind, voter_key)
                    REFERENCES votes(poll_id, voter_kind, voter_key) ON DELETE CASCADE,
                FOREIGN KEY (option_id) REFERENCES poll_options(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

// Fixed-width UTC timestamps so lexical order matches time order.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("failed to parse {}: {}", column, e)))
}

use async_trait::async_trait;
use sqlx::Row;
use std::collections::BTreeSet;

use super::{decode_timestamp, encode_timestamp, Database, InsertOutcome, VoteLedger};
use crate::error::StorageError;
use crate::models::{Vote, VoterIdentity};

#[async_trait]
impl VoteLedger for Database {
    async fn insert_vote(&self, vote: &Vote) -> Result<InsertOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;

        // Existence check and insert are one statement; the primary key decides the winner.
        let inserted = sqlx::query(
            r#"
            INSERT INTO votes (poll_id, voter_kind, voter_key, cast_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(poll_id, voter_kind, voter_key) DO NOTHING
            "#,
        )
        .bind(&vote.poll_id)
        .bind(vote.voter.kind())
        .bind(vote.voter.key())
        .bind(encode_timestamp(&vote.cast_at))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // Voter already has a vote for this poll
        if inserted == 0 {
            tx.rollback().await?;
            return Ok(InsertOutcome::Duplicate);
        }

        // Record each selected option
        for option_id in &vote.option_ids {
            sqlx::query(
                r#"
                INSERT INTO vote_selections (poll_id, voter_kind, voter_key, option_id)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&vote.poll_id)
            .bind(vote.voter.kind())
            .bind(vote.voter.key())
            .bind(option_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn has_vote(&self, poll_id: &str, voter: &VoterIdentity) -> Result<bool, StorageError> {
        let found = sqlx::query(
            "SELECT 1 FROM votes WHERE poll_id = ? AND voter_kind = ? AND voter_key = ?",
        )
        .bind(poll_id)
        .bind(voter.kind())
        .bind(voter.key())
        .fetch_optional(&self.pool)
        .await?
        .is_some();
        Ok(found)
    }

    async fn find_vote(
        &self,
        poll_id: &str,
        voter: &VoterIdentity,
    ) -> Result<Option<Vote>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT v.voter_kind, v.voter_key, v.cast_at, s.option_id
            FROM votes v
            JOIN vote_selections s
              ON s.poll_id = v.poll_id AND s.voter_kind = v.voter_kind AND s.voter_key = v.voter_key
            WHERE v.poll_id = ? AND v.voter_kind = ? AND v.voter_key = ?
            "#,
        )
        .bind(poll_id)
        .bind(voter.kind())
        .bind(voter.key())
        .fetch_all(&self.pool)
        .await?;

        Ok(group_votes(poll_id, rows)?.into_iter().next())
    }

    async fn votes_for_poll(&self, poll_id: &str) -> Result<Vec<Vote>, StorageError> {
        // A single statement reads one consistent snapshot of votes and selections.
        let rows = sqlx::query(
            r#"
            SELECT v.voter_kind, v.voter_key, v.cast_at, s.option_id
            FROM votes v
            JOIN vote_selections s
              ON s.poll_id = v.poll_id AND s.voter_kind = v.voter_kind AND s.voter_key = v.voter_key
            WHERE v.poll_id = ?
            ORDER BY v.cast_at, v.voter_kind, v.voter_key
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        group_votes(poll_id, rows)
    }
}

// Rows arrive grouped by voter; fold consecutive rows into one vote each.
fn group_votes(poll_id: &str, rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Vote>, StorageError> {
    let mut votes: Vec<Vote> = Vec::new();

    for row in rows {
        let kind: String = row.try_get("voter_kind")?;
        let key: String = row.try_get("voter_key")?;
        let option_id: String = row.try_get("option_id")?;

        let voter = VoterIdentity::from_parts(&kind, key)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown voter kind: {}", kind)))?;

        if let Some(last) = votes.last_mut().filter(|last| last.voter == voter) {
            last.option_ids.insert(option_id);
            continue;
        }

        let cast_at = decode_timestamp("cast_at", &row.try_get::<String, _>("cast_at")?)?;
        votes.push(Vote {
            poll_id: poll_id.to_string(),
            voter,
            option_ids: BTreeSet::from([option_id]),
            cast_at,
        });
    }

    Ok(votes)
}

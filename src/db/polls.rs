use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use std::collections::HashMap;

use super::{decode_timestamp, encode_timestamp, Database, PollStore};
use crate::error::StorageError;
use crate::models::{Poll, PollOption, ResultsVisibility};

const POLL_COLUMNS: &str = "id, content_id, question, description, is_multiple_choice, is_active, end_date, results_visibility, created_at";

#[async_trait]
impl PollStore for Database {
    async fn create_poll(&self, poll: &Poll) -> Result<(), StorageError> {
        // Poll and options land together or not at all
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO polls (id, content_id, question, description, is_multiple_choice, is_active, end_date, results_visibility, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.content_id)
        .bind(&poll.question)
        .bind(&poll.description)
        .bind(poll.is_multiple_choice)
        .bind(poll.is_active)
        .bind(poll.end_date.as_ref().map(encode_timestamp))
        .bind(poll.results_visibility.as_str())
        .bind(encode_timestamp(&poll.created_at))
        .execute(&mut *tx)
        .await?;

        // Insert poll options
        for option in &poll.options {
            sqlx::query(
                r#"
                INSERT INTO poll_options (id, poll_id, text, position)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&option.id)
            .bind(&poll.id)
            .bind(&option.text)
            .bind(option.ordinal)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>, StorageError> {
        let row = sqlx::query(&format!("SELECT {} FROM polls WHERE id = ?", POLL_COLUMNS))
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        // Get options
        let options = sqlx::query(
            r#"
            SELECT id, poll_id, text, position
            FROM poll_options
            WHERE poll_id = ?
            ORDER BY position
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(decode_option)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(decode_poll(&row, options)?))
    }

    async fn polls_for_content(&self, content_id: &str) -> Result<Vec<Poll>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM polls WHERE content_id = ? ORDER BY created_at, rowid",
            POLL_COLUMNS
        ))
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;

        // Options for every poll of this content in one round trip
        let option_rows = sqlx::query(
            r#"
            SELECT o.id, o.poll_id, o.text, o.position
            FROM poll_options o
            JOIN polls p ON p.id = o.poll_id
            WHERE p.content_id = ?
            ORDER BY o.poll_id, o.position
            "#,
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;

        let mut options_by_poll: HashMap<String, Vec<PollOption>> = HashMap::new();
        for row in &option_rows {
            let poll_id: String = row.try_get("poll_id")?;
            options_by_poll
                .entry(poll_id)
                .or_default()
                .push(decode_option(row)?);
        }

        rows.iter()
            .map(|row| -> Result<Poll, StorageError> {
                let id: String = row.try_get("id")?;
                let options = options_by_poll.remove(&id).unwrap_or_default();
                decode_poll(row, options)
            })
            .collect()
    }

    async fn set_poll_active(&self, poll_id: &str, active: bool) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE polls SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(poll_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn decode_option(row: &SqliteRow) -> Result<PollOption, StorageError> {
    Ok(PollOption {
        id: row.try_get("id")?,
        text: row.try_get("text")?,
        ordinal: row.try_get("position")?,
    })
}

fn decode_poll(row: &SqliteRow, options: Vec<PollOption>) -> Result<Poll, StorageError> {
    let visibility_str: String = row.try_get("results_visibility")?;
    let results_visibility = ResultsVisibility::parse(&visibility_str).ok_or_else(|| {
        StorageError::Corrupt(format!("unknown results visibility: {}", visibility_str))
    })?;

    // Parse dates
    let end_date = match row.try_get::<Option<String>, _>("end_date")? {
        Some(raw) => Some(decode_timestamp("end_date", &raw)?),
        None => None,
    };
    let created_at = decode_timestamp("created_at", &row.try_get::<String, _>("created_at")?)?;

    Ok(Poll {
        id: row.try_get("id")?,
        content_id: row.try_get("content_id")?,
        question: row.try_get("question")?,
        description: row.try_get("description")?,
        options,
        is_multiple_choice: row.try_get("is_multiple_choice")?,
        is_active: row.try_get("is_active")?,
        end_date,
        results_visibility,
        created_at,
    })
}

// src/poll.rs
//! Postgres-backed poll store.
//!
//! Tallies are only ever changed with `tally = tally + 1` inside the same
//! transaction that inserts the vote row, and the (poll_id, voter_id) unique
//! constraint is what rejects a second vote. Nothing here checks-then-acts in
//! Rust.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    NewOption, OptionTally, Poll, PollOption, PollStatus, PollVote, PollWithOptions,
};
use crate::store::{PollStore, StoreError};

#[derive(Clone)]
pub struct PgPollStore {
    pool: PgPool,
}

impl PgPollStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Share-lock the poll row for the rest of the transaction. Concurrent votes
/// can hold it together; closing (an UPDATE) waits for them.
async fn lock_open_poll(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    poll_id: Uuid,
) -> Result<(), StoreError> {
    let status = sqlx::query_scalar::<_, PollStatus>(
        "SELECT status FROM polls WHERE id = $1 FOR SHARE",
    )
    .bind(poll_id)
    .fetch_optional(&mut **tx)
    .await?;

    match status {
        None => Err(StoreError::PollMissing),
        Some(PollStatus::Closed) => Err(StoreError::PollNotOpen),
        Some(PollStatus::Open) => Ok(()),
    }
}

#[async_trait]
impl PollStore for PgPollStore {
    async fn create_poll(
        &self,
        event_id: Uuid,
        options: Vec<NewOption>,
        closes_at: Option<DateTime<Utc>>,
    ) -> Result<PollWithOptions, StoreError> {
        let mut tx = self.pool.begin().await?;

        let poll = sqlx::query_as::<_, Poll>(
            r#"
            INSERT INTO polls (id, event_id, status, closes_at)
            VALUES ($1, $2, 'OPEN', $3)
            RETURNING id, event_id, status, closes_at, winner_option_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(closes_at)
        .fetch_one(&mut *tx)
        .await?;

        let mut created = Vec::with_capacity(options.len());
        for (index, option) in options.into_iter().enumerate() {
            let row = sqlx::query_as::<_, PollOption>(
                r#"
                INSERT INTO poll_options (id, poll_id, label, sort_order, tally)
                VALUES ($1, $2, $3, $4, 0)
                RETURNING id, poll_id, label, sort_order, tally
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(poll.id)
            .bind(&option.label)
            .bind(option.order.unwrap_or(index as i32))
            .fetch_one(&mut *tx)
            .await?;
            created.push(row);
        }

        tx.commit().await?;

        created.sort_by_key(|o| (o.order, o.id));
        Ok(PollWithOptions {
            poll,
            options: created,
        })
    }

    async fn find_by_event(&self, event_id: Uuid) -> Result<Option<PollWithOptions>, StoreError> {
        // Poll row and options must come from the same snapshot.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let poll = sqlx::query_as::<_, Poll>(
            r#"
            SELECT id, event_id, status, closes_at, winner_option_id
            FROM polls
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(poll) = poll else {
            tx.commit().await?;
            return Ok(None);
        };

        let options = sqlx::query_as::<_, PollOption>(
            r#"
            SELECT id, poll_id, label, sort_order, tally
            FROM poll_options
            WHERE poll_id = $1
            ORDER BY sort_order ASC, id ASC
            "#,
        )
        .bind(poll.id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(PollWithOptions { poll, options }))
    }

    async fn record_vote(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        voter_id: Uuid,
    ) -> Result<PollVote, StoreError> {
        let mut tx = self.pool.begin().await?;

        lock_open_poll(&mut tx, poll_id).await?;

        let vote = sqlx::query_as::<_, PollVote>(
            r#"
            INSERT INTO poll_votes (id, poll_id, option_id, voter_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, poll_id, option_id, voter_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(poll_id)
        .bind(option_id)
        .bind(voter_id)
        .fetch_one(&mut *tx)
        .await?;

        let updated = sqlx::query(
            "UPDATE poll_options SET tally = tally + 1 WHERE id = $1 AND poll_id = $2",
        )
        .bind(option_id)
        .bind(poll_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            // Dropping the transaction rolls the vote back.
            return Err(StoreError::PollMissing);
        }

        tx.commit().await?;
        Ok(vote)
    }

    async fn add_option(
        &self,
        poll_id: Uuid,
        label: String,
        order: Option<i32>,
    ) -> Result<PollOption, StoreError> {
        let mut tx = self.pool.begin().await?;

        lock_open_poll(&mut tx, poll_id).await?;

        let option = sqlx::query_as::<_, PollOption>(
            r#"
            INSERT INTO poll_options (id, poll_id, label, sort_order, tally)
            VALUES (
                $1, $2, $3,
                COALESCE($4, (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM poll_options WHERE poll_id = $2)),
                0
            )
            RETURNING id, poll_id, label, sort_order, tally
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(poll_id)
        .bind(&label)
        .bind(order)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(option)
    }

    async fn tallies(&self, poll_id: Uuid) -> Result<Vec<OptionTally>, StoreError> {
        let rows = sqlx::query_as::<_, OptionTally>(
            r#"
            SELECT id, tally
            FROM poll_options
            WHERE poll_id = $1
            ORDER BY sort_order ASC, id ASC
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn mark_closed(
        &self,
        poll_id: Uuid,
        winner_option_id: Uuid,
        closed_at: DateTime<Utc>,
    ) -> Result<Option<Poll>, StoreError> {
        let poll = sqlx::query_as::<_, Poll>(
            r#"
            UPDATE polls
            SET status = 'CLOSED', closes_at = $3, winner_option_id = $2
            WHERE id = $1 AND status = 'OPEN'
            RETURNING id, event_id, status, closes_at, winner_option_id
            "#,
        )
        .bind(poll_id)
        .bind(winner_option_id)
        .bind(closed_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(poll)
    }

    async fn due_for_close(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Poll>, StoreError> {
        let (after_at, after_id) = after.unzip();
        let polls = sqlx::query_as::<_, Poll>(
            r#"
            SELECT id, event_id, status, closes_at, winner_option_id
            FROM polls
            WHERE status = 'OPEN' AND closes_at IS NOT NULL AND closes_at <= $1
              AND ($2::timestamptz IS NULL OR (closes_at, id) > ($2, $3::uuid))
            ORDER BY closes_at ASC, id ASC
            LIMIT $4
            "#,
        )
        .bind(now)
        .bind(after_at)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(polls)
    }
}

//! Storage port for polls, options and votes.
//!
//! Every method is one unit of work against the store. Implementations own
//! atomicity and uniqueness; callers never lock anything themselves.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewOption, OptionTally, Poll, PollOption, PollVote, PollWithOptions};

pub const POLL_EVENT_UNIQUE: &str = "polls_event_id_key";
pub const VOTE_VOTER_UNIQUE: &str = "poll_votes_poll_id_voter_id_key";

/// SQLSTATE numeric_value_out_of_range
const NUMERIC_OUT_OF_RANGE: &str = "22003";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("poll is not open")]
    PollNotOpen,

    /// The poll or option a write referred to is gone.
    #[error("referenced poll or option does not exist")]
    PollMissing,

    /// The next option order does not fit the order column.
    #[error("option order out of range")]
    OrderOutOfRange,

    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or_default().to_string(),
                };
            }
            if db_err.is_foreign_key_violation() {
                return StoreError::PollMissing;
            }
            if db_err.code().as_deref() == Some(NUMERIC_OUT_OF_RANGE) {
                return StoreError::OrderOutOfRange;
            }
        }
        StoreError::Database(err)
    }
}

impl StoreError {
    pub fn is_unique(&self, name: &str) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint } if constraint == name)
    }
}

#[async_trait]
pub trait PollStore: Send + Sync {
    /// Insert a poll and all of its options atomically. `options` must already
    /// carry their final order.
    async fn create_poll(
        &self,
        event_id: Uuid,
        options: Vec<NewOption>,
        closes_at: Option<DateTime<Utc>>,
    ) -> Result<PollWithOptions, StoreError>;

    async fn find_by_event(&self, event_id: Uuid) -> Result<Option<PollWithOptions>, StoreError>;

    /// Insert the vote and bump the option's tally in one transaction. Fails
    /// with `PollNotOpen` if the poll closed first.
    async fn record_vote(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        voter_id: Uuid,
    ) -> Result<PollVote, StoreError>;

    /// Append an option to an open poll. A missing order becomes
    /// `max(order) + 1`, or 0 for a poll without options. Fails with
    /// `OrderOutOfRange` when `max(order)` is already `i32::MAX`.
    async fn add_option(
        &self,
        poll_id: Uuid,
        label: String,
        order: Option<i32>,
    ) -> Result<PollOption, StoreError>;

    async fn tallies(&self, poll_id: Uuid) -> Result<Vec<OptionTally>, StoreError>;

    /// OPEN -> CLOSED. Returns `None` when the poll was no longer open.
    async fn mark_closed(
        &self,
        poll_id: Uuid,
        winner_option_id: Uuid,
        closed_at: DateTime<Utc>,
    ) -> Result<Option<Poll>, StoreError>;

    /// Open polls whose scheduled close has passed, ordered by
    /// `(closes_at, id)` and starting strictly after `after` when given.
    async fn due_for_close(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Poll>, StoreError>;
}

//! In-process poll store for tests and local runs without Postgres.
//!
//! One async mutex plays the part of the database: each method takes it for
//! its whole unit of work, which gives the same all-or-nothing behavior and the
//! same constraint errors as `PgPollStore`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    NewOption, OptionTally, Poll, PollOption, PollStatus, PollVote, PollWithOptions,
};
use crate::store::{PollStore, StoreError, POLL_EVENT_UNIQUE, VOTE_VOTER_UNIQUE};

#[derive(Default)]
struct Tables {
    polls: HashMap<Uuid, Poll>,
    options: Vec<PollOption>,
    votes: Vec<PollVote>,
}

impl Tables {
    fn options_of(&self, poll_id: Uuid) -> Vec<PollOption> {
        let mut options: Vec<PollOption> = self
            .options
            .iter()
            .filter(|o| o.poll_id == poll_id)
            .cloned()
            .collect();
        options.sort_by_key(|o| (o.order, o.id));
        options
    }

    fn open_poll(&self, poll_id: Uuid) -> Result<&Poll, StoreError> {
        match self.polls.get(&poll_id) {
            None => Err(StoreError::PollMissing),
            Some(poll) if !poll.is_open() => Err(StoreError::PollNotOpen),
            Some(poll) => Ok(poll),
        }
    }
}

#[derive(Default)]
pub struct MemoryPollStore {
    tables: Mutex<Tables>,
}

impl MemoryPollStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored votes for an option, counted from the vote rows.
    pub async fn vote_count(&self, option_id: Uuid) -> usize {
        let tables = self.tables.lock().await;
        tables.votes.iter().filter(|v| v.option_id == option_id).count()
    }

    pub async fn votes_by(&self, poll_id: Uuid, voter_id: Uuid) -> usize {
        let tables = self.tables.lock().await;
        tables
            .votes
            .iter()
            .filter(|v| v.poll_id == poll_id && v.voter_id == voter_id)
            .count()
    }
}

#[async_trait]
impl PollStore for MemoryPollStore {
    async fn create_poll(
        &self,
        event_id: Uuid,
        options: Vec<NewOption>,
        closes_at: Option<DateTime<Utc>>,
    ) -> Result<PollWithOptions, StoreError> {
        let mut tables = self.tables.lock().await;

        if tables.polls.values().any(|p| p.event_id == event_id) {
            return Err(StoreError::UniqueViolation {
                constraint: POLL_EVENT_UNIQUE.to_string(),
            });
        }

        let poll = Poll {
            id: Uuid::new_v4(),
            event_id,
            status: PollStatus::Open,
            closes_at,
            winner_option_id: None,
        };

        for (index, option) in options.into_iter().enumerate() {
            tables.options.push(PollOption {
                id: Uuid::new_v4(),
                poll_id: poll.id,
                label: option.label,
                order: option.order.unwrap_or(index as i32),
                tally: 0,
            });
        }
        tables.polls.insert(poll.id, poll.clone());

        let options = tables.options_of(poll.id);
        Ok(PollWithOptions { poll, options })
    }

    async fn find_by_event(&self, event_id: Uuid) -> Result<Option<PollWithOptions>, StoreError> {
        let tables = self.tables.lock().await;

        let poll = tables.polls.values().find(|p| p.event_id == event_id).cloned();
        Ok(poll.map(|poll| {
            let options = tables.options_of(poll.id);
            PollWithOptions { poll, options }
        }))
    }

    async fn record_vote(
        &self,
        poll_id: Uuid,
        option_id: Uuid,
        voter_id: Uuid,
    ) -> Result<PollVote, StoreError> {
        let mut tables = self.tables.lock().await;

        tables.open_poll(poll_id)?;

        if tables
            .votes
            .iter()
            .any(|v| v.poll_id == poll_id && v.voter_id == voter_id)
        {
            return Err(StoreError::UniqueViolation {
                constraint: VOTE_VOTER_UNIQUE.to_string(),
            });
        }

        let option = tables
            .options
            .iter_mut()
            .find(|o| o.id == option_id && o.poll_id == poll_id)
            .ok_or(StoreError::PollMissing)?;
        option.tally += 1;

        let vote = PollVote {
            id: Uuid::new_v4(),
            poll_id,
            option_id,
            voter_id,
        };
        tables.votes.push(vote.clone());
        Ok(vote)
    }

    async fn add_option(
        &self,
        poll_id: Uuid,
        label: String,
        order: Option<i32>,
    ) -> Result<PollOption, StoreError> {
        let mut tables = self.tables.lock().await;

        tables.open_poll(poll_id)?;

        let order = match order {
            Some(order) => order,
            None => match tables
                .options
                .iter()
                .filter(|o| o.poll_id == poll_id)
                .map(|o| o.order)
                .max()
            {
                Some(max) => max.checked_add(1).ok_or(StoreError::OrderOutOfRange)?,
                None => 0,
            },
        };

        let option = PollOption {
            id: Uuid::new_v4(),
            poll_id,
            label,
            order,
            tally: 0,
        };
        tables.options.push(option.clone());
        Ok(option)
    }

    async fn tallies(&self, poll_id: Uuid) -> Result<Vec<OptionTally>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .options_of(poll_id)
            .into_iter()
            .map(|o| OptionTally {
                option_id: o.id,
                tally: o.tally,
            })
            .collect())
    }

    async fn mark_closed(
        &self,
        poll_id: Uuid,
        winner_option_id: Uuid,
        closed_at: DateTime<Utc>,
    ) -> Result<Option<Poll>, StoreError> {
        let mut tables = self.tables.lock().await;

        if !tables
            .options
            .iter()
            .any(|o| o.id == winner_option_id && o.poll_id == poll_id)
        {
            return Err(StoreError::PollMissing);
        }

        let Some(poll) = tables.polls.get_mut(&poll_id) else {
            return Err(StoreError::PollMissing);
        };
        if !poll.is_open() {
            return Ok(None);
        }

        poll.status = PollStatus::Closed;
        poll.closes_at = Some(closed_at);
        poll.winner_option_id = Some(winner_option_id);
        Ok(Some(poll.clone()))
    }

    async fn due_for_close(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Poll>, StoreError> {
        let tables = self.tables.lock().await;

        let mut due: Vec<(DateTime<Utc>, Poll)> = tables
            .polls
            .values()
            .filter(|p| p.is_open())
            .filter_map(|p| p.closes_at.map(|at| (at, p.clone())))
            .filter(|(at, p)| *at <= now && after.map_or(true, |key| (*at, p.id) > key))
            .collect();
        due.sort_by_key(|(at, p)| (*at, p.id));
        due.truncate(limit.max(0) as usize);
        Ok(due.into_iter().map(|(_, p)| p).collect())
    }
}

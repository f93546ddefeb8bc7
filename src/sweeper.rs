//! Closes polls whose scheduled `closes_at` has passed.
//!
//! Each tick runs the regular close operation without an override. A tie
//! leaves the poll open for a human to break; any other failure is retried on
//! the next tick.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::DecisionEngine;
use crate::error::PollError;

/// Polls fetched per page. A tick walks every page, so polls left open by a
/// tie never hide later ones.
pub const BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub closed: usize,
    pub tied: usize,
    pub failed: usize,
}

pub async fn sweep_once(engine: &DecisionEngine) -> Result<SweepReport, PollError> {
    let now = Utc::now();
    let mut report = SweepReport::default();
    let mut after = None;

    loop {
        let page = engine.store().due_for_close(now, after, BATCH_SIZE).await?;
        let Some(last) = page.last() else {
            break;
        };
        after = last.closes_at.map(|at| (at, last.id));
        let full_page = page.len() as i64 == BATCH_SIZE;

        for poll in page {
            match engine.close_poll(poll.event_id, None).await {
                Ok(_) => report.closed += 1,
                Err(PollError::Tie { tied_option_ids }) => {
                    info!(event_id = %poll.event_id, poll_id = %poll.id, tied = tied_option_ids.len(), "scheduled close ended in a tie, left open");
                    report.tied += 1;
                }
                Err(e) => {
                    warn!(event_id = %poll.event_id, poll_id = %poll.id, error = %e, "scheduled close failed");
                    report.failed += 1;
                }
            }
        }

        if !full_page || after.is_none() {
            break;
        }
    }

    Ok(report)
}

/// Spawn the sweeper loop. Returns `None` when `interval` is zero.
pub fn spawn(engine: DecisionEngine, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        info!("scheduled close sweeper disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep_once(&engine).await {
                Ok(report) => debug!(?report, "sweep finished"),
                Err(e) => error!(error = %e, "sweep failed"),
            }
        }
    }))
}

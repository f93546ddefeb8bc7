//! Decision engine: poll lifecycle, voting and winner resolution.
//!
//! The engine holds no poll state of its own. Every operation is a bounded
//! unit of work against the store, so any number of engine instances can
//! serve the same polls.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PollError;
use crate::models::{
    NewOption, PollClosed, PollOption, PollWithOptions, TallyUpdate, VoteReceipt,
};
use crate::services::{ChangeNotifier, EventDirectory, MembershipGate};
use crate::store::{PollStore, POLL_EVENT_UNIQUE, VOTE_VOTER_UNIQUE};

#[derive(Clone)]
pub struct DecisionEngine {
    store: Arc<dyn PollStore>,
    events: Arc<dyn EventDirectory>,
    members: Arc<dyn MembershipGate>,
    notifier: Arc<dyn ChangeNotifier>,
}

impl DecisionEngine {
    pub fn new(
        store: Arc<dyn PollStore>,
        events: Arc<dyn EventDirectory>,
        members: Arc<dyn MembershipGate>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        Self {
            store,
            events,
            members,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn PollStore> {
        &self.store
    }

    /// Create the poll for an event with its initial options.
    ///
    /// Not idempotent: a second call for the same event fails with
    /// `PollExists` carrying the id of the poll already there.
    pub async fn create_poll(
        &self,
        event_id: Uuid,
        options: Vec<NewOption>,
        closes_at: Option<DateTime<Utc>>,
    ) -> Result<PollWithOptions, PollError> {
        if options.is_empty() {
            return Err(PollError::InvalidArgument("At least one option is required"));
        }
        if options.iter().any(|o| o.label.trim().is_empty()) {
            return Err(PollError::InvalidArgument("Option labels must not be empty"));
        }

        if !self.events.event_exists(event_id).await? {
            return Err(PollError::NotFound("Event"));
        }

        if let Some(existing) = self.store.find_by_event(event_id).await? {
            return Err(PollError::PollExists {
                poll_id: existing.poll.id,
            });
        }

        let options = options
            .into_iter()
            .enumerate()
            .map(|(index, o)| NewOption {
                label: o.label.trim().to_string(),
                order: Some(o.order.unwrap_or(index as i32)),
            })
            .collect();

        match self.store.create_poll(event_id, options, closes_at).await {
            Ok(poll) => {
                info!(%event_id, poll_id = %poll.poll.id, options = poll.options.len(), "poll created");
                Ok(poll)
            }
            // Lost the race against another creator.
            Err(e) if e.is_unique(POLL_EVENT_UNIQUE) => {
                let existing = self
                    .store
                    .find_by_event(event_id)
                    .await?
                    .ok_or(PollError::NotFound("Poll"))?;
                Err(PollError::PollExists {
                    poll_id: existing.poll.id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_poll(&self, event_id: Uuid) -> Result<PollWithOptions, PollError> {
        self.store
            .find_by_event(event_id)
            .await?
            .ok_or(PollError::NotFound("Poll"))
    }

    /// Record one member's vote and push the new tallies.
    ///
    /// A second vote by the same member is rejected by the store's
    /// (poll, voter) uniqueness, also when both arrive at once.
    pub async fn submit_vote(
        &self,
        event_id: Uuid,
        option_id: Uuid,
        voter_id: Uuid,
    ) -> Result<VoteReceipt, PollError> {
        self.members.ensure_accepted_member(event_id, voter_id).await?;

        let poll = self.get_poll(event_id).await?;
        if !poll.poll.is_open() {
            return Err(PollError::InvalidState("Poll is closed"));
        }
        if poll.option(option_id).is_none() {
            return Err(PollError::InvalidArgument("Option does not belong to this poll"));
        }

        let poll_id = poll.poll.id;
        match self.store.record_vote(poll_id, option_id, voter_id).await {
            Ok(_) => {}
            Err(e) if e.is_unique(VOTE_VOTER_UNIQUE) => {
                debug!(%event_id, %poll_id, %voter_id, "duplicate vote rejected");
                return Err(PollError::AlreadyVoted);
            }
            Err(e) => return Err(e.into()),
        }

        info!(%event_id, %poll_id, %option_id, %voter_id, "vote recorded");

        let tallies = self.store.tallies(poll_id).await?;
        let update = TallyUpdate {
            event_id,
            poll_id,
            tallies: tallies.clone(),
        };
        if let Err(e) = self.notifier.publish_tally_update(update).await {
            warn!(%event_id, %poll_id, error = %e, "failed to publish tally update");
        }

        Ok(VoteReceipt { poll_id, tallies })
    }

    /// Append an option to an open poll. Without an explicit order it goes
    /// after the current last option.
    pub async fn add_option(
        &self,
        event_id: Uuid,
        label: String,
        order: Option<i32>,
        member_id: Uuid,
    ) -> Result<PollOption, PollError> {
        self.members.ensure_accepted_member(event_id, member_id).await?;

        let label = label.trim().to_string();
        if label.is_empty() {
            return Err(PollError::InvalidArgument("Option label must not be empty"));
        }

        let poll = self.get_poll(event_id).await?;
        if !poll.poll.is_open() {
            return Err(PollError::InvalidState("Poll is closed"));
        }

        let option = self.store.add_option(poll.poll.id, label, order).await?;
        info!(%event_id, poll_id = %poll.poll.id, option_id = %option.id, order = option.order, "option added");

        match self.store.tallies(poll.poll.id).await {
            Ok(tallies) => {
                let update = TallyUpdate {
                    event_id,
                    poll_id: poll.poll.id,
                    tallies,
                };
                if let Err(e) = self.notifier.publish_tally_update(update).await {
                    warn!(%event_id, error = %e, "failed to publish tally update");
                }
            }
            Err(e) => warn!(%event_id, error = %e, "failed to read tallies after adding option"),
        }

        Ok(option)
    }

    /// Close the poll and decide its winner.
    ///
    /// Idempotent: an already closed poll comes back unchanged and no side
    /// effects run again. An unresolved tie leaves the poll open.
    pub async fn close_poll(
        &self,
        event_id: Uuid,
        final_option_id: Option<Uuid>,
    ) -> Result<PollWithOptions, PollError> {
        let mut poll = self.get_poll(event_id).await?;
        if !poll.poll.is_open() {
            debug!(%event_id, poll_id = %poll.poll.id, "poll already closed");
            return Ok(poll);
        }

        let winner_id = resolve_winner(&poll.options, final_option_id)?;

        let Some(closed) = self
            .store
            .mark_closed(poll.poll.id, winner_id, Utc::now())
            .await?
        else {
            // Someone else closed it between our read and our write.
            debug!(%event_id, poll_id = %poll.poll.id, "poll closed concurrently");
            return self.get_poll(event_id).await;
        };
        poll.poll = closed;

        info!(%event_id, poll_id = %poll.poll.id, winner_option_id = %winner_id, "poll closed");

        let winner_label = poll
            .option(winner_id)
            .map(|o| o.label.clone())
            .unwrap_or_default();
        if let Err(e) = self.events.set_location(event_id, &winner_label).await {
            warn!(%event_id, error = %e, "failed to write event location");
        }

        let notice = PollClosed {
            event_id,
            poll_id: poll.poll.id,
            winner_option_id: winner_id,
        };
        if let Err(e) = self.notifier.publish_poll_closed(notice).await {
            warn!(%event_id, error = %e, "failed to publish poll closed");
        }

        Ok(poll)
    }
}

/// Pick the winning option.
///
/// An explicit `final_option_id` always wins, whatever the tallies. Otherwise
/// the single option with the highest tally wins; several options sharing the
/// highest tally is a `Tie`.
pub fn resolve_winner(
    options: &[PollOption],
    final_option_id: Option<Uuid>,
) -> Result<Uuid, PollError> {
    let Some(highest) = options.iter().map(|o| o.tally).max() else {
        return Err(PollError::InvalidArgument("No options to determine a winner"));
    };

    if let Some(final_id) = final_option_id {
        return options
            .iter()
            .find(|o| o.id == final_id)
            .map(|o| o.id)
            .ok_or(PollError::InvalidArgument("Final option does not belong to this poll"));
    }

    let top: Vec<Uuid> = options
        .iter()
        .filter(|o| o.tally == highest)
        .map(|o| o.id)
        .collect();

    match top.as_slice() {
        [winner] => Ok(*winner),
        _ => Err(PollError::Tie {
            tied_option_ids: top,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(label: &str, order: i32, tally: i32) -> PollOption {
        PollOption {
            id: Uuid::new_v4(),
            poll_id: Uuid::nil(),
            label: label.to_string(),
            order,
            tally,
        }
    }

    #[test]
    fn test_highest_tally_wins() {
        let options = vec![option("Downtown", 0, 1), option("Uptown", 1, 2)];
        let winner = resolve_winner(&options, None).unwrap();
        assert_eq!(winner, options[1].id);
    }

    #[test]
    fn test_tie_lists_tied_options_in_order() {
        let options = vec![
            option("Downtown", 0, 1),
            option("Uptown", 1, 1),
            option("Harbor", 2, 0),
        ];
        match resolve_winner(&options, None) {
            Err(PollError::Tie { tied_option_ids }) => {
                assert_eq!(tied_option_ids, vec![options[0].id, options[1].id]);
            }
            other => panic!("expected tie, got {other:?}"),
        }
    }

    #[test]
    fn test_all_zero_tallies_is_a_tie() {
        let options = vec![option("Downtown", 0, 0), option("Uptown", 1, 0)];
        assert!(matches!(
            resolve_winner(&options, None),
            Err(PollError::Tie { .. })
        ));
    }

    #[test]
    fn test_single_option_without_votes_wins() {
        let options = vec![option("Downtown", 0, 0)];
        assert_eq!(resolve_winner(&options, None).unwrap(), options[0].id);
    }

    #[test]
    fn test_final_option_overrides_tally() {
        let options = vec![option("Downtown", 0, 5), option("Uptown", 1, 0)];
        let winner = resolve_winner(&options, Some(options[1].id)).unwrap();
        assert_eq!(winner, options[1].id);
    }

    #[test]
    fn test_unknown_final_option_is_rejected() {
        let options = vec![option("Downtown", 0, 1)];
        assert!(matches!(
            resolve_winner(&options, Some(Uuid::new_v4())),
            Err(PollError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_no_options_is_rejected() {
        assert!(matches!(
            resolve_winner(&[], None),
            Err(PollError::InvalidArgument(_))
        ));
    }
}

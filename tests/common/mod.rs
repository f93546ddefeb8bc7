//! Shared test doubles for the collaborators around the engine.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use poll_engine::memory::MemoryPollStore;
use poll_engine::models::{NewOption, PollClosed, TallyUpdate};
use poll_engine::services::{ChangeNotifier, EventDirectory, GateError, MembershipGate};
use poll_engine::DecisionEngine;
use uuid::Uuid;

/// Events with an optional location, like the real directory's table.
#[derive(Default)]
pub struct FakeDirectory {
    pub locations: Mutex<HashMap<Uuid, Option<String>>>,
    pub fail_writes: Mutex<bool>,
}

impl FakeDirectory {
    pub fn add_event(&self, event_id: Uuid) {
        self.locations.lock().unwrap().insert(event_id, None);
    }

    pub fn location(&self, event_id: Uuid) -> Option<String> {
        self.locations.lock().unwrap().get(&event_id).cloned().flatten()
    }
}

#[async_trait]
impl EventDirectory for FakeDirectory {
    async fn event_exists(&self, event_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.locations.lock().unwrap().contains_key(&event_id))
    }

    async fn set_location(&self, event_id: Uuid, label: &str) -> anyhow::Result<()> {
        if *self.fail_writes.lock().unwrap() {
            anyhow::bail!("event directory unavailable");
        }
        self.locations
            .lock()
            .unwrap()
            .insert(event_id, Some(label.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeGate {
    pub accepted: Mutex<HashSet<(Uuid, Uuid)>>,
}

impl FakeGate {
    pub fn accept(&self, event_id: Uuid, member_id: Uuid) {
        self.accepted.lock().unwrap().insert((event_id, member_id));
    }
}

#[async_trait]
impl MembershipGate for FakeGate {
    async fn ensure_accepted_member(
        &self,
        event_id: Uuid,
        member_id: Uuid,
    ) -> Result<(), GateError> {
        if self.accepted.lock().unwrap().contains(&(event_id, member_id)) {
            Ok(())
        } else {
            Err(GateError::NotAccepted)
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub tally_updates: Mutex<Vec<TallyUpdate>>,
    pub closed: Mutex<Vec<PollClosed>>,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl ChangeNotifier for RecordingNotifier {
    async fn publish_tally_update(&self, update: TallyUpdate) -> anyhow::Result<()> {
        if *self.fail.lock().unwrap() {
            anyhow::bail!("notifier down");
        }
        self.tally_updates.lock().unwrap().push(update);
        Ok(())
    }

    async fn publish_poll_closed(&self, closed: PollClosed) -> anyhow::Result<()> {
        if *self.fail.lock().unwrap() {
            anyhow::bail!("notifier down");
        }
        self.closed.lock().unwrap().push(closed);
        Ok(())
    }
}

pub struct Harness {
    pub engine: DecisionEngine,
    pub store: Arc<MemoryPollStore>,
    pub directory: Arc<FakeDirectory>,
    pub gate: Arc<FakeGate>,
    pub notifier: Arc<RecordingNotifier>,
    pub event_id: Uuid,
}

impl Harness {
    /// Engine over the in-memory store with one known event.
    pub fn new() -> Self {
        let store = Arc::new(MemoryPollStore::new());
        let directory = Arc::new(FakeDirectory::default());
        let gate = Arc::new(FakeGate::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let event_id = Uuid::new_v4();
        directory.add_event(event_id);

        let engine = DecisionEngine::new(
            store.clone(),
            directory.clone(),
            gate.clone(),
            notifier.clone(),
        );

        Self {
            engine,
            store,
            directory,
            gate,
            notifier,
            event_id,
        }
    }

    /// A fresh accepted member of the harness event.
    pub fn member(&self) -> Uuid {
        let member_id = Uuid::new_v4();
        self.gate.accept(self.event_id, member_id);
        member_id
    }
}

pub fn options(labels: &[&str]) -> Vec<NewOption> {
    labels
        .iter()
        .map(|label| NewOption {
            label: label.to_string(),
            order: None,
        })
        .collect()
}

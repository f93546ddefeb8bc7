// services.rs
//! Ports to the systems around the poll engine, and their Postgres adapters.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{PollClosed, TallyUpdate};

pub const ACCEPTED_STATUS: &str = "ACCEPTED";

/// Owner of the event entity. The engine reads existence and writes the
/// decided location back.
#[async_trait]
pub trait EventDirectory: Send + Sync {
    async fn event_exists(&self, event_id: Uuid) -> anyhow::Result<bool>;

    async fn set_location(&self, event_id: Uuid, label: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("member is not an accepted participant of this event")]
    NotAccepted,

    #[error("membership lookup failed: {0}")]
    Lookup(#[from] anyhow::Error),
}

#[async_trait]
pub trait MembershipGate: Send + Sync {
    async fn ensure_accepted_member(&self, event_id: Uuid, member_id: Uuid)
        -> Result<(), GateError>;
}

/// Fan-out for live updates. Fire-and-forget from the engine's side; an error
/// is logged, never propagated.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn publish_tally_update(&self, update: TallyUpdate) -> anyhow::Result<()>;

    async fn publish_poll_closed(&self, closed: PollClosed) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgEventDirectory {
    pool: PgPool,
}

impl PgEventDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventDirectory for PgEventDirectory {
    async fn event_exists(&self, event_id: Uuid) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM events WHERE id = $1)",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to look up event")?;

        Ok(exists)
    }

    async fn set_location(&self, event_id: Uuid, label: &str) -> anyhow::Result<()> {
        let result = sqlx::query("UPDATE events SET location = $2 WHERE id = $1")
            .bind(event_id)
            .bind(label)
            .execute(&self.pool)
            .await
            .context("Failed to update event location")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("event {} no longer exists", event_id);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgMembershipGate {
    pool: PgPool,
}

impl PgMembershipGate {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipGate for PgMembershipGate {
    async fn ensure_accepted_member(
        &self,
        event_id: Uuid,
        member_id: Uuid,
    ) -> Result<(), GateError> {
        let accepted = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM event_members
                WHERE event_id = $1 AND member_id = $2 AND status = $3
            )
            "#,
        )
        .bind(event_id)
        .bind(member_id)
        .bind(ACCEPTED_STATUS)
        .fetch_one(&self.pool)
        .await
        .context("Failed to look up event membership")?;

        if accepted {
            Ok(())
        } else {
            Err(GateError::NotAccepted)
        }
    }
}

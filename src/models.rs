// models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "poll_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum PollStatus {
    Open,
    Closed,
}

/// One poll per event. `closes_at` starts as the scheduled close and is
/// replaced by the actual close time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: Uuid,
    pub event_id: Uuid,
    pub status: PollStatus,
    pub closes_at: Option<DateTime<Utc>>,
    pub winner_option_id: Option<Uuid>,
}

impl Poll {
    pub fn is_open(&self) -> bool {
        self.status == PollStatus::Open
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub label: String,
    #[sqlx(rename = "sort_order")]
    pub order: i32,
    pub tally: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PollVote {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub option_id: Uuid,
    pub voter_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollWithOptions {
    #[serde(flatten)]
    pub poll: Poll,
    pub options: Vec<PollOption>,
}

impl PollWithOptions {
    pub fn option(&self, option_id: Uuid) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == option_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOption {
    pub label: String,
    pub order: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub options: Vec<NewOption>,
    pub closes_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_id: Uuid,
    pub voter_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOptionRequest {
    pub label: String,
    pub order: Option<i32>,
    pub member_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosePollRequest {
    pub final_option_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OptionTally {
    #[sqlx(rename = "id")]
    pub option_id: Uuid,
    pub tally: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub poll_id: Uuid,
    pub tallies: Vec<OptionTally>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyUpdate {
    pub event_id: Uuid,
    pub poll_id: Uuid,
    pub tallies: Vec<OptionTally>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollClosed {
    pub event_id: Uuid,
    pub poll_id: Uuid,
    pub winner_option_id: Uuid,
}

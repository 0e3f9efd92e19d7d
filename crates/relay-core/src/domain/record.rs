//! Outbox record model: identity, classification, payload and lifecycle status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::StoreError;

/// Identifier of an outbox record.
///
/// Opaque to the relay: the producer chooses it (UUID, ULID, ...) and it never
/// changes after the row is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a record.
///
/// State transitions:
/// - Pending -> Published (delivery acknowledged, applied at reconcile time)
/// - Pending -> Failed (delivery returned an error)
/// - Failed -> Published / Failed (only when the claim policy reclaims failed rows)
/// - Failed -> Pending (operator requeue only)
///
/// Published is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Published,
    Failed,
}

impl RecordStatus {
    /// Column value stored in the outbox table.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Published => "published",
            RecordStatus::Failed => "failed",
        }
    }

    /// Can a relay reconcile move a record from `self` to `next`?
    pub fn can_reconcile_to(self, next: RecordStatus) -> bool {
        matches!(
            (self, next),
            (RecordStatus::Pending, RecordStatus::Published)
                | (RecordStatus::Pending, RecordStatus::Failed)
                | (RecordStatus::Failed, RecordStatus::Published)
                | (RecordStatus::Failed, RecordStatus::Failed)
        )
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecordStatus::Pending),
            "published" => Ok(RecordStatus::Published),
            "failed" => Ok(RecordStatus::Failed),
            other => Err(StoreError::Decode(format!("unknown record status '{other}'"))),
        }
    }
}

/// Which statuses a claim may pick up.
///
/// `Unpublished` follows the claim query contract (`status <> 'published'`),
/// which retries failed records at the polling interval.
/// `PendingOnly` leaves failed records alone until an operator requeues them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimPolicy {
    #[default]
    Unpublished,
    PendingOnly,
}

impl ClaimPolicy {
    pub fn is_claimable(self, status: RecordStatus) -> bool {
        match self {
            ClaimPolicy::Unpublished => status != RecordStatus::Published,
            ClaimPolicy::PendingOnly => status == RecordStatus::Pending,
        }
    }
}

impl FromStr for ClaimPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpublished" => Ok(ClaimPolicy::Unpublished),
            "pending_only" => Ok(ClaimPolicy::PendingOnly),
            other => Err(format!(
                "invalid claim policy '{other}', expected unpublished or pending_only"
            )),
        }
    }
}

/// One row of the outbox table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: RecordId,
    pub aggregate_type: String,
    pub event_type: String,
    pub content: serde_json::Value,
    pub status: RecordStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// A freshly produced record, as the producer would insert it.
    pub fn pending(
        id: impl Into<RecordId>,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        content: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            content,
            status: RecordStatus::Pending,
            published_at: None,
            created_at,
        }
    }

    /// `published_at` is set exactly when the record is published.
    pub fn is_consistent(&self) -> bool {
        (self.status == RecordStatus::Published) == self.published_at.is_some()
    }

    pub fn mark_published(&mut self, at: DateTime<Utc>) {
        self.status = RecordStatus::Published;
        self.published_at = Some(at);
    }

    pub fn mark_failed(&mut self) {
        self.status = RecordStatus::Failed;
        self.published_at = None;
    }

    pub fn requeue(&mut self) {
        self.status = RecordStatus::Pending;
        self.published_at = None;
    }
}

//! Outcome model: what happened to each record of one relay iteration.
//!
//! Delivery attempts run concurrently; each reports back independently and the
//! results are folded here after the join barrier. Nothing in this module
//! touches storage or the broker.

use serde::Serialize;

use super::record::RecordId;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    Failed { reason: String },
}

/// Published / failed partition of a claimed batch.
///
/// Every id lands in exactly one of the two sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub published: Vec<RecordId>,
    pub failed: Vec<RecordId>,
}

impl BatchOutcome {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            published: Vec::with_capacity(n),
            failed: Vec::with_capacity(n),
        }
    }

    pub fn record(&mut self, id: RecordId, result: &DeliveryResult) {
        match result {
            DeliveryResult::Delivered => self.published.push(id),
            DeliveryResult::Failed { .. } => self.failed.push(id),
        }
    }

    pub fn len(&self) -> usize {
        self.published.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Summary of one committed iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IterationReport {
    pub claimed: usize,
    pub outcome: BatchOutcome,
}

impl IterationReport {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }
}

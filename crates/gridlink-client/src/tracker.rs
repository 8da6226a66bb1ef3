//! Outstanding transaction tracking.
//!
//! Every outbound command is tagged with a fresh [`TransactionId`]. The id
//! stays in the outstanding set until the matching response is processed,
//! the waiter times out, or the entry is abandoned or expired. Removal
//! happens exactly once; later completions are no-ops.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gridlink_core::TransactionId;
use gridlink_telemetry::Metrics;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::TrackerError;

// ============================================================================
// PendingTransaction
// ============================================================================

/// Ticket returned by [`TransactionTracker::begin`].
///
/// Holding the ticket keeps the completion receiver alive, so a response
/// that arrives before the caller starts waiting is not lost. Dropping it
/// turns the transaction into fire-and-forget.
#[derive(Debug)]
pub struct PendingTransaction {
    id: TransactionId,
    rx: oneshot::Receiver<Value>,
}

impl PendingTransaction {
    pub fn id(&self) -> &TransactionId {
        &self.id
    }
}

#[derive(Debug)]
struct Outstanding {
    created_at: Instant,
    tx: oneshot::Sender<Value>,
}

// ============================================================================
// TransactionTracker
// ============================================================================

#[derive(Debug, Default)]
pub struct TransactionTracker {
    outstanding: DashMap<TransactionId, Outstanding>,
}

impl TransactionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new outstanding transaction.
    pub fn begin(&self) -> PendingTransaction {
        self.begin_with(TransactionId::new)
    }

    /// Draw ids from `next_id` until one is not outstanding.
    pub(crate) fn begin_with(
        &self,
        mut next_id: impl FnMut() -> TransactionId,
    ) -> PendingTransaction {
        let (tx, rx) = oneshot::channel();
        let outstanding = Outstanding {
            created_at: Instant::now(),
            tx,
        };

        loop {
            let id = next_id();
            match self.outstanding.entry(id.clone()) {
                Entry::Occupied(_) => {
                    warn!(transaction_id = %id, "Transaction id collision, regenerating");
                }
                Entry::Vacant(slot) => {
                    slot.insert(outstanding);
                    Metrics::transaction_started();
                    return PendingTransaction { id, rx };
                }
            }
        }
    }

    /// Complete a transaction with its response body.
    ///
    /// Returns `false` if the id is not outstanding (unknown, already
    /// completed, timed out or expired).
    pub fn complete(&self, id: &TransactionId, body: Value) -> bool {
        let Some((_, outstanding)) = self.outstanding.remove(id) else {
            return false;
        };
        Metrics::transaction_finished();
        Metrics::transaction_completed();
        // Receiver may be gone for fire-and-forget commands
        let _ = outstanding.tx.send(body);
        true
    }

    /// Suspend until the transaction completes or `timeout` elapses.
    ///
    /// On timeout the id is removed, so a late response is a no-op.
    pub async fn await_completion(
        &self,
        ticket: PendingTransaction,
        timeout: Duration,
    ) -> Result<Value, TrackerError> {
        let PendingTransaction { id, rx } = ticket;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(TrackerError::Dropped(id)),
            Err(_) => {
                if self.outstanding.remove(&id).is_some() {
                    Metrics::transaction_finished();
                }
                debug!(transaction_id = %id, ?timeout, "Transaction timed out");
                Err(TrackerError::Timeout { id, timeout })
            }
        }
    }

    /// Remove a transaction without notification.
    ///
    /// Used when publishing fails after `begin`.
    pub fn abandon(&self, id: &TransactionId) -> bool {
        let removed = self.outstanding.remove(id).is_some();
        if removed {
            Metrics::transaction_finished();
        }
        removed
    }

    /// Drop fire-and-forget transactions older than `max_age`.
    ///
    /// Entries whose ticket is still held are left to their waiter's timeout.
    pub fn expire(&self, max_age: Duration) -> Vec<TransactionId> {
        let stale: Vec<TransactionId> = self
            .outstanding
            .iter()
            .filter(|entry| {
                entry.value().tx.is_closed() && entry.value().created_at.elapsed() >= max_age
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for id in stale {
            if self.outstanding.remove(&id).is_some() {
                Metrics::transaction_finished();
                expired.push(id);
            }
        }

        if !expired.is_empty() {
            Metrics::transactions_expired(expired.len());
        }
        expired
    }

    /// Drop every outstanding transaction. Waiters see [`TrackerError::Dropped`].
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<TransactionId> = self.outstanding.iter().map(|e| e.key().clone()).collect();
        let mut cancelled = 0;
        for id in ids {
            if self.outstanding.remove(&id).is_some() {
                Metrics::transaction_finished();
                cancelled += 1;
            }
        }
        cancelled
    }

    #[must_use]
    pub fn is_outstanding(&self, id: &TransactionId) -> bool {
        self.outstanding.contains_key(id)
    }

    #[must_use]
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}

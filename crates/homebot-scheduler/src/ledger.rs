//! Per-owner record of the last delivered day.
//!
//! This is the authority on duplicate prevention: cancelling a task cannot
//! stop a callback that is already running, so every run must win
//! [`DeliveryLedger::try_mark_sent`] before it dispatches.

use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::OwnerId;

/// The last day an owner was notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRecord {
    pub last_sent: NaiveDate,
    /// Value replaced by `last_sent`; restored by a rollback.
    pub previous: Option<NaiveDate>,
}

/// Check-and-set ledger keyed by owner.
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    records: DashMap<OwnerId, SendRecord>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `date` for `owner`.
    ///
    /// Returns `false` if `date` (or a later day) is already recorded.
    pub fn try_mark_sent(&self, owner: OwnerId, date: NaiveDate) -> bool {
        match self.records.entry(owner) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get().last_sent;
                if current >= date {
                    debug!(%owner, %date, last_sent = %current, "already marked");
                    return false;
                }
                occupied.insert(SendRecord {
                    last_sent: date,
                    previous: Some(current),
                });
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SendRecord {
                    last_sent: date,
                    previous: None,
                });
                true
            }
        }
    }

    /// Undo a claim on `date` after a failed delivery.
    ///
    /// Only clears the mark if it still equals `date`, so a later day recorded
    /// in the meantime is left alone. Returns whether anything changed.
    pub fn rollback(&self, owner: OwnerId, date: NaiveDate) -> bool {
        match self.records.entry(owner) {
            Entry::Occupied(mut occupied) if occupied.get().last_sent == date => {
                match occupied.get().previous {
                    Some(previous) => {
                        occupied.insert(SendRecord {
                            last_sent: previous,
                            previous: None,
                        });
                    }
                    None => {
                        occupied.remove();
                    }
                }
                debug!(%owner, %date, "rolled back delivery mark");
                true
            }
            _ => false,
        }
    }

    /// Last day recorded for `owner`.
    pub fn last_sent(&self, owner: OwnerId) -> Option<NaiveDate> {
        self.records.get(&owner).map(|record| record.last_sent)
    }

    /// Full record for `owner`.
    pub fn record(&self, owner: OwnerId) -> Option<SendRecord> {
        self.records.get(&owner).map(|record| *record)
    }

    /// Number of owners with a record.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

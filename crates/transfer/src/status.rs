use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};

use serde::Serialize;
use tracing::warn;

use crate::{TransferId, TransferRegistry};

/// Lifecycle state shown to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Pending,
    Uploading,
    Completed,
    Failed,
}

/// Consumer-facing view of one transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatus {
    /// Assigned when the transfer starts; `None` while pending.
    pub transfer_id: Option<TransferId>,
    pub display_name: String,
    pub progress: u8,
    pub state: TransferState,
    /// Failure reason, set only when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl TransferStatus {
    /// A freshly selected source that has not started yet.
    pub fn pending(display_name: impl Into<String>) -> Self {
        Self {
            transfer_id: None,
            display_name: display_name.into(),
            progress: 0,
            state: TransferState::Pending,
            error_detail: None,
        }
    }

    /// A transfer that is already in flight.
    pub fn uploading(transfer_id: impl Into<TransferId>, display_name: impl Into<String>) -> Self {
        Self {
            transfer_id: Some(transfer_id.into()),
            display_name: display_name.into(),
            progress: 0,
            state: TransferState::Uploading,
            error_detail: None,
        }
    }

    /// `true` once completed or failed. Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TransferState::Completed | TransferState::Failed)
    }

    /// Moves a pending status to uploading under `transfer_id`.
    pub fn begin(&mut self, transfer_id: impl Into<TransferId>) -> bool {
        if self.state != TransferState::Pending {
            return false;
        }
        self.transfer_id = Some(transfer_id.into());
        self.state = TransferState::Uploading;
        true
    }

    /// Records a progress percentage. Ignored once terminal.
    pub fn set_progress(&mut self, progress: u8) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.progress = progress.min(100);
        true
    }

    /// Marks the status completed. Returns `false` if already terminal.
    pub fn complete(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = TransferState::Completed;
        true
    }

    /// Marks the status failed. Returns `false` if already terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.state = TransferState::Failed;
        self.error_detail = Some(error.into());
        true
    }
}

/// Handle to a staged status.
///
/// Stays valid for the life of the board; a slot whose status was cleared
/// simply no longer matches anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusSlot(u64);

struct Entry {
    slot: Option<StatusSlot>,
    status: TransferStatus,
}

/// Ordered list of transfer statuses (thread-safe).
///
/// A read-mostly projection for display. It outlives registry entries:
/// completed and failed statuses stay visible after their record is evicted.
#[derive(Default)]
pub struct StatusBoard {
    inner: RwLock<Vec<Entry>>,
    next_slot: AtomicU64,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Entry>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Entry>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut TransferStatus) -> bool) -> bool {
        self.write()
            .iter_mut()
            .map(|e| &mut e.status)
            .find(|s| s.transfer_id.as_deref() == Some(id))
            .is_some_and(f)
    }

    fn update_slot(&self, slot: StatusSlot, f: impl FnOnce(&mut TransferStatus) -> bool) -> bool {
        self.write()
            .iter_mut()
            .find(|e| e.slot == Some(slot))
            .is_some_and(|e| f(&mut e.status))
    }

    /// Adds a pending status and returns its slot.
    pub fn stage(&self, display_name: impl Into<String>) -> StatusSlot {
        let slot = StatusSlot(self.next_slot.fetch_add(1, Ordering::Relaxed));
        self.write().push(Entry {
            slot: Some(slot),
            status: TransferStatus::pending(display_name),
        });
        slot
    }

    /// Promotes the pending status in `slot` to uploading.
    ///
    /// Returns `false` (and logs) when the slot is gone or no longer pending.
    pub fn begin(&self, slot: StatusSlot, transfer_id: &str) -> bool {
        let begun = self.update_slot(slot, |s| s.begin(transfer_id));
        if !begun {
            warn!(transfer = %transfer_id, ?slot, "staged status missing or not pending");
        }
        begun
    }

    /// Fails the status in `slot` (used when a staged start is rejected).
    pub fn fail_slot(&self, slot: StatusSlot, error: impl Into<String>) -> bool {
        self.update_slot(slot, |s| s.fail(error))
    }

    /// Adds an uploading status for a transfer that was started directly.
    pub fn track(&self, transfer_id: &str, display_name: impl Into<String>) {
        self.write().push(Entry {
            slot: None,
            status: TransferStatus::uploading(transfer_id, display_name),
        });
    }

    pub fn set_progress(&self, transfer_id: &str, progress: u8) -> bool {
        self.update(transfer_id, |s| s.set_progress(progress))
    }

    pub fn complete(&self, transfer_id: &str) -> bool {
        self.update(transfer_id, |s| s.complete())
    }

    pub fn fail(&self, transfer_id: &str, error: impl Into<String>) -> bool {
        self.update(transfer_id, |s| s.fail(error))
    }

    /// Returns the status of `transfer_id`.
    pub fn get(&self, transfer_id: &str) -> Option<TransferStatus> {
        self.read()
            .iter()
            .map(|e| &e.status)
            .find(|s| s.transfer_id.as_deref() == Some(transfer_id))
            .cloned()
    }

    /// Returns the status in `slot`.
    pub fn slot(&self, slot: StatusSlot) -> Option<TransferStatus> {
        self.read()
            .iter()
            .find(|e| e.slot == Some(slot))
            .map(|e| e.status.clone())
    }

    /// Drops every status. The registry is unaffected.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Returns every status in insertion order.
    pub fn snapshot(&self) -> Vec<TransferStatus> {
        self.filter(|_| true)
    }

    fn filter(&self, pred: impl Fn(&TransferStatus) -> bool) -> Vec<TransferStatus> {
        self.read()
            .iter()
            .map(|e| &e.status)
            .filter(|s| pred(s))
            .cloned()
            .collect()
    }

    pub fn completed(&self) -> Vec<TransferStatus> {
        self.filter(|s| s.state == TransferState::Completed)
    }

    pub fn failed(&self) -> Vec<TransferStatus> {
        self.filter(|s| s.state == TransferState::Failed)
    }

    /// Pending and uploading statuses.
    pub fn in_progress(&self) -> Vec<TransferStatus> {
        self.filter(|s| !s.is_terminal())
    }

    /// Re-surfaces registry entries missing from the board as uploading.
    ///
    /// Used after the consumer view is rebuilt while transfers are still in
    /// flight. Progress restarts at 0 until the server reports again.
    /// Returns the number of statuses added.
    pub fn restore_from_registry(&self, registry: &TransferRegistry) -> usize {
        let mut restored = 0;
        for id in registry.list() {
            let Some(source) = registry.lookup(&id) else {
                continue;
            };
            if self.get(&id).is_some() {
                continue;
            }
            self.track(&id, source.name());
            restored += 1;
        }
        restored
    }
}

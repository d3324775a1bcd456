use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::{SourceHandle, TransferError, TransferId};

/// An in-flight transfer: its source and how far it has been sent.
struct TransferRecord {
    source: SourceHandle,
    /// Bytes handed to the connection so far. Never exceeds `source.size()`.
    offset: u64,
}

/// In-memory map of in-flight transfers (thread-safe).
///
/// The single source of truth for what is still in flight. One registry is
/// owned per client session; each entry is mutated only by the state machine
/// driving that transfer, and the map lock makes `advance`/`close` for the
/// same id mutually exclusive.
#[derive(Default)]
pub struct TransferRegistry {
    entries: Mutex<HashMap<TransferId, TransferRecord>>,
}

impl TransferRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TransferId, TransferRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new transfer at offset 0.
    pub fn open(&self, id: &str, source: SourceHandle) -> Result<(), TransferError> {
        let mut entries = self.entries();
        if entries.contains_key(id) {
            return Err(TransferError::DuplicateTransfer(id.to_string()));
        }
        trace!(transfer = %id, size = source.size(), "registered");
        entries.insert(id.to_string(), TransferRecord { source, offset: 0 });
        Ok(())
    }

    /// Moves the send offset of `id` forward to `new_offset`.
    ///
    /// The offset may not move backwards or past the end of the source.
    pub fn advance(&self, id: &str, new_offset: u64) -> Result<(), TransferError> {
        let mut entries = self.entries();
        let record = entries
            .get_mut(id)
            .ok_or_else(|| TransferError::UnknownTransfer(id.to_string()))?;

        let size = record.source.size();
        if new_offset < record.offset || new_offset > size {
            return Err(TransferError::OffsetOutOfRange {
                id: id.to_string(),
                offset: new_offset,
                current: record.offset,
                size,
            });
        }
        record.offset = new_offset;
        Ok(())
    }

    /// Removes `id`. Returns `true` if it was registered.
    pub fn close(&self, id: &str) -> bool {
        let removed = self.entries().remove(id).is_some();
        if removed {
            trace!(transfer = %id, "evicted");
        }
        removed
    }

    /// Returns all registered transfer ids, oldest first.
    ///
    /// Ids start with a millisecond timestamp, so lexical order within equal
    /// prefix lengths is start order.
    pub fn list(&self) -> Vec<TransferId> {
        let mut ids: Vec<TransferId> = self.entries().keys().cloned().collect();
        ids.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        ids
    }

    /// Returns the source registered for `id`.
    pub fn lookup(&self, id: &str) -> Option<SourceHandle> {
        self.entries().get(id).map(|r| r.source.clone())
    }

    /// Returns the current send offset for `id`.
    pub fn offset(&self, id: &str) -> Option<u64> {
        self.entries().get(id).map(|r| r.offset)
    }

    /// Returns `true` if `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemorySource;
    use std::sync::Arc;

    fn source(len: usize) -> SourceHandle {
        Arc::new(MemorySource::new("test.bin", vec![0u8; len]))
    }

    #[test]
    fn open_starts_at_zero() {
        let registry = TransferRegistry::new();
        registry.open("t1", source(100)).unwrap();
        assert_eq!(registry.offset("t1"), Some(0));
        assert!(registry.contains("t1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn open_rejects_duplicate() {
        let registry = TransferRegistry::new();
        registry.open("t1", source(100)).unwrap();
        let err = registry.open("t1", source(5)).unwrap_err();
        assert!(matches!(err, TransferError::DuplicateTransfer(id) if id == "t1"));
        // The original entry is untouched.
        assert_eq!(registry.lookup("t1").unwrap().size(), 100);
    }

    #[test]
    fn advance_moves_offset() {
        let registry = TransferRegistry::new();
        registry.open("t1", source(100)).unwrap();
        registry.advance("t1", 40).unwrap();
        registry.advance("t1", 100).unwrap();
        assert_eq!(registry.offset("t1"), Some(100));
    }

    #[test]
    fn advance_unknown_fails() {
        let registry = TransferRegistry::new();
        let err = registry.advance("ghost", 1).unwrap_err();
        assert!(matches!(err, TransferError::UnknownTransfer(_)));
    }

    #[test]
    fn advance_rejects_backwards_and_overrun() {
        let registry = TransferRegistry::new();
        registry.open("t1", source(100)).unwrap();
        registry.advance("t1", 50).unwrap();

        assert!(matches!(
            registry.advance("t1", 10),
            Err(TransferError::OffsetOutOfRange { current: 50, .. })
        ));
        assert!(matches!(
            registry.advance("t1", 101),
            Err(TransferError::OffsetOutOfRange { size: 100, .. })
        ));
        assert_eq!(registry.offset("t1"), Some(50));
    }

    #[test]
    fn close_is_idempotent() {
        let registry = TransferRegistry::new();
        registry.open("t1", source(1)).unwrap();
        assert!(registry.close("t1"));
        assert!(!registry.close("t1"));
        assert!(registry.lookup("t1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn list_is_in_start_order() {
        let registry = TransferRegistry::new();
        registry.open("1700000000002-bbbbbbbbb", source(1)).unwrap();
        registry.open("999999999999-zzzzzzzzz", source(1)).unwrap();
        registry.open("1700000000001-aaaaaaaaa", source(1)).unwrap();
        assert_eq!(
            registry.list(),
            vec![
                "999999999999-zzzzzzzzz".to_string(),
                "1700000000001-aaaaaaaaa".to_string(),
                "1700000000002-bbbbbbbbb".to_string(),
            ]
        );
    }

    #[test]
    fn concurrent_transfers_do_not_interfere() {
        use std::thread;

        let registry = Arc::new(TransferRegistry::new());
        let mut handles = vec![];
        for i in 0..8 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let id = format!("t{i}");
                r.open(&id, source(1000)).unwrap();
                for step in 1..=10 {
                    r.advance(&id, step * 100).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(registry.len(), 8);
        for i in 0..8 {
            assert_eq!(registry.offset(&format!("t{i}")), Some(1000));
        }
    }
}

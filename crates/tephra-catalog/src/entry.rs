//! Versioned catalog entry chains.

use std::sync::Arc;

use tephra_types::{TxnId, TxnTimestamp};

/// One committed version of a named catalog object.
pub struct EntryRecord<T> {
    pub inner: Option<Arc<T>>,
    pub txn_id: TxnId,
    pub commit_ts: TxnTimestamp,
}

impl<T> Clone for EntryRecord<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            txn_id: self.txn_id,
            commit_ts: self.commit_ts,
        }
    }
}

impl<T> EntryRecord<T> {
    /// Whether this record is a tombstone (the object was dropped).
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        self.inner.is_none()
    }
}

/// Newest-first chain of versions for one name.
///
/// A create pushes a live record; a drop pushes a tombstone. Readers walk
/// from the head to the first record with `commit_ts <= begin_ts`.
pub struct EntryList<T> {
    records: Vec<EntryRecord<T>>,
}

impl<T> Default for EntryList<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<T> EntryList<T> {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a live version committed at `commit_ts`.
    pub fn push_live(&mut self, inner: Arc<T>, txn_id: TxnId, commit_ts: TxnTimestamp) {
        debug_assert!(self
            .records
            .first()
            .map_or(true, |head| head.commit_ts <= commit_ts));
        self.records.insert(
            0,
            EntryRecord {
                inner: Some(inner),
                txn_id,
                commit_ts,
            },
        );
    }

    /// Push a tombstone committed at `commit_ts`.
    pub fn push_dropped(&mut self, txn_id: TxnId, commit_ts: TxnTimestamp) {
        self.records.insert(
            0,
            EntryRecord {
                inner: None,
                txn_id,
                commit_ts,
            },
        );
    }

    /// The version visible to a snapshot at `begin_ts`, or `None` if the
    /// object does not exist (or is dropped) at that time.
    #[must_use]
    pub fn visible(&self, begin_ts: TxnTimestamp) -> Option<&Arc<T>> {
        self.records
            .iter()
            .find(|r| r.commit_ts <= begin_ts)
            .and_then(|r| r.inner.as_ref())
    }

    /// The newest version regardless of snapshot; used by replay, which
    /// applies strictly ordered history.
    #[must_use]
    pub fn latest(&self) -> Option<&EntryRecord<T>> {
        self.records.first()
    }

    /// The newest record (live or tombstone) committed at or before
    /// `begin_ts`; used by snapshot persistence.
    #[must_use]
    pub fn record_visible(&self, begin_ts: TxnTimestamp) -> Option<&EntryRecord<T>> {
        self.records.iter().find(|r| r.commit_ts <= begin_ts)
    }

    /// The newest live version, skipping a head tombstone.
    #[must_use]
    pub fn latest_live(&self) -> Option<&Arc<T>> {
        self.records.first().and_then(|r| r.inner.as_ref())
    }

    /// Whether the chain holds no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_follows_commit_ts() {
        let mut list: EntryList<&str> = EntryList::new();
        list.push_live(Arc::new("v1"), 1, 10);
        list.push_live(Arc::new("v2"), 2, 20);

        assert!(list.visible(5).is_none());
        assert_eq!(**list.visible(10).expect("v1"), "v1");
        assert_eq!(**list.visible(15).expect("v1"), "v1");
        assert_eq!(**list.visible(25).expect("v2"), "v2");
    }

    #[test]
    fn drop_hides_entry_for_later_snapshots() {
        let mut list: EntryList<&str> = EntryList::new();
        list.push_live(Arc::new("v1"), 1, 10);
        list.push_dropped(3, 30);

        assert_eq!(**list.visible(20).expect("v1"), "v1");
        assert!(list.visible(30).is_none());
        assert!(list.latest().expect("tombstone").is_dropped());
        assert!(list.latest_live().is_none());
    }
}

use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::OnceLock;

use crate::types::LogId;
use crate::LogRecord;

/// Max number of records in a node.
pub(crate) const MAX_LENGTH: usize = 64;

/// A fixed-capacity block of contiguous records in [`AtomicLogBuffer`].
///
/// Only the writer mutates a node: it fills `records` in order, flips
/// `deleted`, and sets `prev` once when a newer node is linked in front.
/// A record slot is published by storing `pos` with `Release`, readers only
/// look at slots below `pos`.
///
/// [`AtomicLogBuffer`]: crate::buffer::AtomicLogBuffer
pub(crate) struct Node {
    pub(crate) first_log_id: LogId,

    records: [OnceLock<LogRecord>; MAX_LENGTH],

    /// Number of published records.
    pos: AtomicUsize,

    /// Accumulated `LogRecord::size()` of the records.
    size: AtomicU64,

    deleted: AtomicBool,

    /// Toward the older node.
    pub(crate) next: AtomicPtr<Node>,

    /// Toward the newer node.
    pub(crate) prev: AtomicPtr<Node>,
}

impl Node {
    pub(crate) fn new(first_log_id: LogId) -> Self {
        Self {
            first_log_id,
            records: std::array::from_fn(|_| OnceLock::new()),
            pos: AtomicUsize::new(0),
            size: AtomicU64::new(0),
            deleted: AtomicBool::new(false),
            next: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pos.load(Ordering::Acquire)
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len() >= MAX_LENGTH
    }

    /// The log id after the last published record.
    pub(crate) fn end_log_id(&self) -> LogId {
        self.first_log_id + self.len() as u64
    }

    pub(crate) fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Returns false if it is already deleted.
    pub(crate) fn mark_deleted(&self) -> bool {
        !self.deleted.swap(true, Ordering::AcqRel)
    }

    /// Returns the published record at `index`.
    pub(crate) fn get(&self, index: usize) -> Option<&LogRecord> {
        if index >= self.len() {
            return None;
        }
        self.records[index].get()
    }

    /// Appends a record. Must only be called by the single writer, on a node
    /// that is not full.
    pub(crate) fn push(&self, rec: LogRecord) {
        let index = self.pos.load(Ordering::Relaxed);
        assert!(index < MAX_LENGTH, "push to a full node");
        debug_assert_eq!(rec.log_id, self.first_log_id + index as u64);

        let size = rec.size();
        let res = self.records[index].set(rec);
        assert!(res.is_ok(), "record slot {} is written twice", index);

        self.size.fetch_add(size, Ordering::AcqRel);
        self.pos.store(index + 1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::Node;
    use super::MAX_LENGTH;
    use crate::LogRecord;

    #[test]
    fn test_node_push_and_get() {
        let node = Node::new(10);
        assert_eq!(node.len(), 0);
        assert_eq!(node.end_log_id(), 10);
        assert!(node.get(0).is_none());

        node.push(LogRecord::new(10, 1, 0, "a"));
        node.push(LogRecord::new(11, 1, 0, "bc"));

        assert_eq!(node.len(), 2);
        assert_eq!(node.end_log_id(), 12);
        assert_eq!(node.size(), 17 + 18);
        assert_eq!(node.get(1).map(|r| r.payload.clone()), Some(b"bc".to_vec()));
        assert!(node.get(2).is_none());
    }

    #[test]
    fn test_node_full_and_deleted() {
        let node = Node::new(0);
        for i in 0..MAX_LENGTH as u64 {
            assert!(!node.is_full());
            node.push(LogRecord::new(i, 1, 0, ""));
        }
        assert!(node.is_full());

        assert!(!node.is_deleted());
        assert!(node.mark_deleted());
        assert!(!node.mark_deleted());
        assert!(node.is_deleted());
    }
}

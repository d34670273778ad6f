//! An in-memory buffer of the most recent WAL records.
//!
//! The buffer is a singly linked list of fixed-capacity [`Node`]s, from the
//! newest (`head`) to the oldest live one (`tail`). Exactly one writer pushes
//! records; any number of readers iterate concurrently without locks.
//!
//! When the buffered bytes exceed the capacity, the tail node is marked
//! deleted and `tail` moves to the next newer node. Deleted nodes stay
//! linked behind `tail` until a garbage collection frees them, which only
//! happens when no reader is registered:
//!
//! 1. The collector detaches the chain behind the current `tail`.
//! 2. It re-checks the reader count. A reader registered later can not reach
//!    the detached chain, a reader registered earlier blocks the free and the
//!    chain is attached back.
//!
//! At most one collection runs at a time; a concurrent attempt is skipped.

mod iterator;
pub(crate) mod node;

use std::fmt;
use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub use iterator::BufferIterator;
use log::debug;

use crate::buffer::node::Node;
use crate::num::format_pad9_u64;
use crate::types::LogId;
use crate::LogRecord;

/// Garbage collection runs when more deleted nodes than this are pending.
const DIRTY_NODES_GC_THRESHOLD: usize = 5;

/// A single-writer, multi-reader lock-free buffer of recent records.
pub struct AtomicLogBuffer {
    /// The newest node.
    head: AtomicPtr<Node>,

    /// The oldest live node.
    tail: AtomicPtr<Node>,

    capacity: u64,

    /// Bytes of the live records.
    size: AtomicU64,

    first_log_id: AtomicU64,

    /// Number of registered readers.
    refs: AtomicUsize,

    /// Deleted nodes not yet freed.
    dirty_nodes: AtomicUsize,

    gc_running: AtomicBool,

    /// Set while the writer is inside `push()` or `reset()`.
    writing: AtomicBool,
}

// SAFETY: Nodes are only freed by the garbage collection protocol described
// in the module doc, and all shared state is atomic.
unsafe impl Send for AtomicLogBuffer {}
unsafe impl Sync for AtomicLogBuffer {}

impl fmt::Debug for AtomicLogBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AtomicLogBuffer{}", self.stat())
    }
}

impl AtomicLogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            capacity: capacity as u64,
            size: AtomicU64::new(0),
            first_log_id: AtomicU64::new(0),
            refs: AtomicUsize::new(0),
            dirty_nodes: AtomicUsize::new(0),
            gc_running: AtomicBool::new(false),
            writing: AtomicBool::new(false),
        }
    }

    /// The id of the oldest buffered record, 0 if empty.
    pub fn first_log_id(&self) -> LogId {
        self.first_log_id.load(Ordering::SeqCst)
    }

    /// The id of the newest buffered record, 0 if empty.
    pub fn last_log_id(&self) -> LogId {
        let _r = ReadRef::new(self);

        let head = self.head.load(Ordering::SeqCst);

        // SAFETY: a registered reader never observes a freed node.
        match unsafe { head.as_ref() } {
            Some(h) if !h.is_deleted() && h.len() > 0 => h.end_log_id() - 1,
            _ => 0,
        }
    }

    /// Bytes of the live records.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    /// Appends a record after the last one.
    ///
    /// There must be only one writer: the caller serializes `push()` and
    /// [`reset()`](Self::reset). Readers are never blocked.
    pub fn push(&self, rec: LogRecord) {
        let _w = WriteGuard::new(self);

        let rec_size = rec.size();

        let head = self.head.load(Ordering::SeqCst);

        // SAFETY: head is never behind tail, thus never freed.
        let head_ref = unsafe { head.as_ref() };

        let need_new = match head_ref {
            None => true,
            Some(h) => h.is_full() || h.is_deleted(),
        };

        let head = if need_new {
            let restart = head_ref.map_or(true, |h| h.is_deleted());

            let node = Box::into_raw(Box::new(Node::new(rec.log_id)));

            // SAFETY: just allocated and not yet shared.
            unsafe { &*node }.next.store(head, Ordering::SeqCst);
            if let Some(h) = head_ref {
                h.prev.store(node, Ordering::SeqCst);
            }
            self.head.store(node, Ordering::SeqCst);

            if restart {
                self.tail.store(node, Ordering::SeqCst);
                self.first_log_id.store(rec.log_id, Ordering::SeqCst);
            }

            node
        } else {
            head
        };

        let mut evicted = false;
        while self.size.load(Ordering::SeqCst) + rec_size > self.capacity {
            if !self.evict_tail() {
                break;
            }
            evicted = true;
        }

        // SAFETY: head is never freed.
        unsafe { &*head }.push(rec);
        self.size.fetch_add(rec_size, Ordering::SeqCst);

        drop(_w);

        if evicted && self.refs.load(Ordering::SeqCst) == 0 {
            self.maybe_gc();
        }
    }

    /// Marks the tail node deleted and moves `tail` to the newer node.
    ///
    /// The only node is never evicted. Returns false if nothing is evicted.
    fn evict_tail(&self) -> bool {
        let tail = self.tail.load(Ordering::SeqCst);
        let head = self.head.load(Ordering::SeqCst);

        if tail.is_null() || tail == head {
            return false;
        }

        // SAFETY: tail is live and only the writer moves it.
        let t = unsafe { &*tail };
        let newer = t.prev.load(Ordering::SeqCst);

        // SAFETY: a node newer than tail is live.
        let Some(n) = (unsafe { newer.as_ref() }) else {
            return false;
        };

        t.mark_deleted();
        self.tail.store(newer, Ordering::SeqCst);
        self.first_log_id.store(n.first_log_id, Ordering::SeqCst);

        let size = self.size.load(Ordering::SeqCst);
        self.size.store(size.saturating_sub(t.size()), Ordering::SeqCst);

        self.dirty_nodes.fetch_add(1, Ordering::SeqCst);

        debug!(
            "AtomicLogBuffer evicted node [{}, {}), first log id now {}",
            t.first_log_id,
            t.end_log_id(),
            n.first_log_id
        );

        true
    }

    /// Marks every buffered node deleted. The memory is released later by
    /// garbage collection.
    ///
    /// Must be serialized with [`push()`](Self::push) by the caller.
    pub fn reset(&self) {
        let _w = WriteGuard::new(self);

        let tail = self.tail.load(Ordering::SeqCst);
        let mut p = self.head.load(Ordering::SeqCst);
        let mut count = 0;

        // Nodes from head to tail are never freed; the walk stops at tail.
        // SAFETY: see above.
        while let Some(n) = unsafe { p.as_ref() } {
            if n.mark_deleted() {
                count += 1;
            }
            if p == tail {
                break;
            }
            p = n.next.load(Ordering::SeqCst);
        }

        self.size.store(0, Ordering::SeqCst);
        self.first_log_id.store(0, Ordering::SeqCst);
        self.dirty_nodes.fetch_add(count, Ordering::SeqCst);

        debug!("AtomicLogBuffer reset, {} nodes deleted", count);
    }

    /// Creates an iterator of records in `[start, end]`.
    ///
    /// It is invalid if `start` is not in this buffer.
    pub fn iterator(self: &Arc<Self>, start: LogId, end: LogId) -> BufferIterator {
        BufferIterator::new(self.clone(), start, end)
    }

    /// Finds the node containing `log_id`.
    ///
    /// The caller must be a registered reader.
    fn seek(&self, log_id: LogId) -> Option<ptr::NonNull<Node>> {
        let head = self.head.load(Ordering::SeqCst);

        // SAFETY: the caller is a registered reader.
        let h = unsafe { head.as_ref() }?;
        if h.is_deleted() || log_id >= h.end_log_id() {
            return None;
        }

        let tail = self.tail.load(Ordering::SeqCst);

        // SAFETY: the caller is a registered reader.
        let stop = unsafe { tail.as_ref() }
            .map_or(ptr::null_mut(), |t| t.next.load(Ordering::SeqCst));

        let mut p = head;
        while p != stop {
            // SAFETY: the caller is a registered reader.
            let n = unsafe { p.as_ref() }?;
            if n.is_deleted() {
                return None;
            }
            if log_id >= n.first_log_id {
                return ptr::NonNull::new(p);
            }
            p = n.next.load(Ordering::SeqCst);
        }

        None
    }

    fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    fn release_ref(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "AtomicLogBuffer reader count underflow");

        if prev == 1 {
            self.maybe_gc();
        }
    }

    fn maybe_gc(&self) {
        if self.dirty_nodes.load(Ordering::SeqCst) > DIRTY_NODES_GC_THRESHOLD {
            self.try_gc();
        }
    }

    /// Frees the deleted nodes behind tail if no reader can reach them.
    ///
    /// Returns the number of freed nodes.
    fn try_gc(&self) -> usize {
        if self
            .gc_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }

        let mut freed = 0;

        let tail = self.tail.load(Ordering::SeqCst);

        // SAFETY: tail is live and only this collector frees nodes.
        if let Some(t) = unsafe { tail.as_ref() } {
            let garbage = t.next.swap(ptr::null_mut(), Ordering::SeqCst);

            if !garbage.is_null() {
                if self.refs.load(Ordering::SeqCst) == 0 {
                    // SAFETY: detached, and no reader registered before the
                    // detach is still alive.
                    freed = unsafe { Self::free_chain(garbage) };

                    let _ = self.dirty_nodes.fetch_update(
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                        |n| Some(n.saturating_sub(freed)),
                    );

                    debug!("AtomicLogBuffer gc freed {} nodes", freed);
                } else {
                    t.next.store(garbage, Ordering::SeqCst);
                }
            }
        }

        self.gc_running.store(false, Ordering::Release);

        freed
    }

    /// Frees the chain of nodes starting from `p` by following `next`.
    ///
    /// # Safety
    ///
    /// The chain must not be reachable by any other thread.
    unsafe fn free_chain(mut p: *mut Node) -> usize {
        let mut n = 0;
        while !p.is_null() {
            let node = Box::from_raw(p);
            p = node.next.load(Ordering::SeqCst);
            n += 1;
        }
        n
    }

    pub fn stat(&self) -> BufferStat {
        BufferStat {
            first_log_id: self.first_log_id(),
            last_log_id: self.last_log_id(),
            size: self.size(),
            capacity: self.capacity,
            dirty_nodes: self.dirty_nodes.load(Ordering::SeqCst) as u64,
            readers: self.refs.load(Ordering::SeqCst) as u64,
        }
    }
}

impl Drop for AtomicLogBuffer {
    fn drop(&mut self) {
        // SAFETY: no reader is alive since they hold an `Arc` to self.
        unsafe { Self::free_chain(*self.head.get_mut()) };
    }
}

/// Registers a reader for the duration of a borrow.
struct ReadRef<'a> {
    buffer: &'a AtomicLogBuffer,
}

impl<'a> ReadRef<'a> {
    fn new(buffer: &'a AtomicLogBuffer) -> Self {
        buffer.add_ref();
        Self { buffer }
    }
}

impl Drop for ReadRef<'_> {
    fn drop(&mut self) {
        self.buffer.release_ref();
    }
}

/// Asserts there is only one writer at a time.
struct WriteGuard<'a> {
    buffer: &'a AtomicLogBuffer,
}

impl<'a> WriteGuard<'a> {
    fn new(buffer: &'a AtomicLogBuffer) -> Self {
        let busy = buffer.writing.swap(true, Ordering::AcqRel);
        assert!(!busy, "concurrent writers on AtomicLogBuffer");
        Self { buffer }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.buffer.writing.store(false, Ordering::Release);
    }
}

/// Statistics of an [`AtomicLogBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStat {
    pub first_log_id: LogId,
    pub last_log_id: LogId,
    /// Bytes of the live records
    pub size: u64,
    pub capacity: u64,
    /// Deleted nodes not yet freed
    pub dirty_nodes: u64,
    /// Registered readers
    pub readers: u64,
}

impl fmt::Display for BufferStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{[{}, {}], size: {}/{}, dirty_nodes: {}, readers: {}}}",
            format_pad9_u64(self.first_log_id),
            format_pad9_u64(self.last_log_id),
            format_pad9_u64(self.size),
            format_pad9_u64(self.capacity),
            self.dirty_nodes,
            self.readers
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::AtomicLogBuffer;
    use super::BufferIterator;
    use crate::api::log_iterator::LogIterator;
    use crate::buffer::node::MAX_LENGTH;
    use crate::LogRecord;

    fn rec(id: u64) -> LogRecord {
        LogRecord::new(id, id / 10, 7, format!("{:04}", id))
    }

    fn read_ids(mut it: BufferIterator) -> Vec<u64> {
        let mut ids = vec![];
        while it.valid() {
            assert_eq!(it.log_msg(), format!("{:04}", it.log_id()).as_bytes());
            ids.push(it.log_id());
            it.next();
        }
        ids
    }

    #[test]
    fn test_push_and_iterate() {
        let buf = Arc::new(AtomicLogBuffer::new(1024 * 1024));
        assert_eq!(buf.first_log_id(), 0);
        assert_eq!(buf.last_log_id(), 0);
        assert!(!buf.iterator(1, 1).valid());

        for id in 1..=200 {
            buf.push(rec(id));
        }

        assert_eq!(buf.first_log_id(), 1);
        assert_eq!(buf.last_log_id(), 200);
        assert_eq!(buf.size(), 200 * 20);

        assert_eq!(read_ids(buf.iterator(1, 200)), (1..=200).collect::<Vec<_>>());
        assert_eq!(read_ids(buf.iterator(60, 70)), (60..=70).collect::<Vec<_>>());
        assert_eq!(read_ids(buf.iterator(190, 1000)), (190..=200).collect::<Vec<_>>());

        let it = buf.iterator(63, 63);
        assert_eq!(it.log_term(), 6);
        assert_eq!(it.log_source(), 7);

        assert!(!buf.iterator(201, 300).valid());
        assert!(!buf.iterator(0, 3).valid());
        assert!(!buf.iterator(5, 4).valid());
    }

    #[test]
    fn test_evict_by_capacity() {
        // Each record is 20 bytes, a full node is 1280 bytes
        let buf = Arc::new(AtomicLogBuffer::new(3 * 1280));

        let mut prev_first = 0;
        for id in 1..=1000 {
            buf.push(rec(id));
            let first = buf.first_log_id();
            assert!(first >= prev_first);
            prev_first = first;
            assert!(buf.size() <= 3 * 1280);
        }

        let first = buf.first_log_id();
        assert!(first > 1);
        assert_eq!(buf.last_log_id(), 1000);

        assert!(!buf.iterator(first - 1, first - 1).valid());
        assert!(!buf.iterator(1, 1).valid());
        assert_eq!(
            read_ids(buf.iterator(first, 1000)),
            (first..=1000).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_single_node_is_not_evicted() {
        let buf = Arc::new(AtomicLogBuffer::new(10));

        for id in 1..=3 {
            buf.push(rec(id));
        }

        // Over capacity, but the only node is kept
        assert_eq!(buf.size(), 60);
        assert_eq!(buf.first_log_id(), 1);
        assert_eq!(read_ids(buf.iterator(1, 3)), vec![1, 2, 3]);

        for id in 4..=MAX_LENGTH as u64 + 1 {
            buf.push(rec(id));
        }

        // The second node evicts the first one
        assert_eq!(buf.first_log_id(), MAX_LENGTH as u64 + 1);
        assert!(!buf.iterator(1, 1).valid());
    }

    #[test]
    fn test_reset() {
        let buf = Arc::new(AtomicLogBuffer::new(1024 * 1024));

        for id in 1..=100 {
            buf.push(rec(id));
        }

        buf.reset();
        assert_eq!(buf.first_log_id(), 0);
        assert_eq!(buf.last_log_id(), 0);
        assert_eq!(buf.size(), 0);
        assert!(!buf.iterator(50, 60).valid());
        assert_eq!(buf.stat().dirty_nodes, 2);

        // Re-fill from 61 with different payload
        for id in 61..=70 {
            buf.push(LogRecord::new(id, 9, 0, "new"));
        }

        assert_eq!(buf.first_log_id(), 61);
        assert_eq!(buf.last_log_id(), 70);
        assert!(!buf.iterator(60, 60).valid());

        let it = buf.iterator(61, 61);
        assert!(it.valid());
        assert_eq!(it.log_msg(), b"new");
        assert_eq!(it.log_term(), 9);
    }

    #[test]
    fn test_iterator_stops_at_newer_generation() {
        let buf = Arc::new(AtomicLogBuffer::new(1024 * 1024));

        for id in 1..=MAX_LENGTH as u64 {
            buf.push(rec(id));
        }

        let mut it = buf.iterator(60, 100);

        buf.reset();
        for id in 61..=70 {
            buf.push(LogRecord::new(id, 9, 0, "new"));
        }

        // The old iterator reads its own node but does not step into the
        // node that reuses the ids
        let mut ids = vec![];
        while it.valid() {
            assert_ne!(it.log_msg(), b"new");
            ids.push(it.log_id());
            it.next();
        }
        assert_eq!(ids, vec![60, 61, 62, 63, 64]);
    }

    #[test]
    fn test_gc_after_last_reader_released() {
        let buf = Arc::new(AtomicLogBuffer::new(1280));

        for id in 1..=64 {
            buf.push(rec(id));
        }

        // A reader pins the oldest node
        let mut it = buf.iterator(1, 1000);
        assert_eq!(buf.stat().readers, 1);

        for id in 65..=64 * 10 {
            buf.push(rec(id));
        }

        let stat = buf.stat();
        assert_eq!(stat.dirty_nodes, 9);
        assert_eq!(stat.first_log_id, 64 * 9 + 1);

        // Evicted records are still readable by the pinned reader
        for want in 1..=64 {
            assert!(it.valid());
            assert_eq!(it.log_id(), want);
            it.next();
        }

        drop(it);

        let stat = buf.stat();
        assert_eq!(stat.readers, 0);
        assert_eq!(stat.dirty_nodes, 0);

        assert_eq!(
            read_ids(buf.iterator(64 * 9 + 1, 640)),
            (64 * 9 + 1..=640).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_gc_by_writer_without_reader() {
        let buf = Arc::new(AtomicLogBuffer::new(1280));

        for id in 1..=64 * 20 {
            buf.push(rec(id));
        }

        let stat = buf.stat();
        assert!(stat.dirty_nodes <= 6, "dirty nodes: {}", stat.dirty_nodes);
        assert_eq!(stat.last_log_id, 64 * 20);
    }
}

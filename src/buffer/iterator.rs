use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::api::log_iterator::LogIterator;
use crate::buffer::node::Node;
use crate::buffer::node::MAX_LENGTH;
use crate::buffer::AtomicLogBuffer;
use crate::types::LogId;
use crate::LogRecord;

/// Iterates records in `[curr, end]` held by an [`AtomicLogBuffer`].
///
/// The iterator is a registered reader of the buffer from creation to drop,
/// so the node it points to is never freed under it, even after eviction.
/// It becomes invalid when it reaches `end`, the newest published record, or
/// a record whose id is not the expected one.
pub struct BufferIterator {
    buffer: Arc<AtomicLogBuffer>,
    node: Option<NonNull<Node>>,
    index: usize,
    curr: LogId,
    end: LogId,
}

// SAFETY: `Node` is only accessed through atomics and `OnceLock`, and the
// pointed node is kept alive by the reader registration.
unsafe impl Send for BufferIterator {}

impl fmt::Debug for BufferIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferIterator")
            .field("curr", &self.curr)
            .field("end", &self.end)
            .field("valid", &self.valid())
            .finish()
    }
}

impl BufferIterator {
    pub(crate) fn new(buffer: Arc<AtomicLogBuffer>, start: LogId, end: LogId) -> Self {
        buffer.add_ref();

        let node = if start <= end {
            buffer.seek(start)
        } else {
            None
        };

        let index = match node {
            // SAFETY: registered reader.
            Some(n) => (start - unsafe { n.as_ref() }.first_log_id) as usize,
            None => 0,
        };

        Self {
            buffer,
            node,
            index,
            curr: start,
            end,
        }
    }

    fn node(&self) -> Option<&Node> {
        // SAFETY: the node is pinned by the reader registration.
        self.node.map(|p| unsafe { p.as_ref() })
    }
}

impl LogIterator for BufferIterator {
    fn valid(&self) -> bool {
        self.current().is_some()
    }

    fn next(&mut self) {
        if self.node.is_none() {
            return;
        }

        self.curr += 1;
        self.index += 1;

        if self.index < MAX_LENGTH {
            return;
        }

        let newer = self.node().map(|n| n.prev.load(Ordering::SeqCst));

        self.index = 0;
        self.node = newer.and_then(NonNull::new);

        // The newer node may belong to another generation after a reset.
        if self.node().map(|n| n.first_log_id) != Some(self.curr) {
            self.node = None;
        }
    }

    fn current(&self) -> Option<&LogRecord> {
        if self.curr > self.end {
            return None;
        }

        let rec = self.node()?.get(self.index)?;
        if rec.log_id != self.curr {
            return None;
        }
        Some(rec)
    }
}

impl Drop for BufferIterator {
    fn drop(&mut self) {
        self.node = None;
        self.buffer.release_ref();
    }
}

//! A cursor over a contiguous range of WAL records.

use std::io;

use crate::types::ClusterId;
use crate::types::LogId;
use crate::types::TermId;
use crate::LogRecord;

/// A cursor over records in an inclusive id range.
///
/// A cursor starts positioned at the first record of the range. It is
/// released when dropped, there is no explicit close.
///
/// The field accessors return zero values when the cursor is not
/// [`valid`](Self::valid).
pub trait LogIterator: Send {
    /// Returns true if the cursor is positioned at a record.
    fn valid(&self) -> bool;

    /// Moves to the next record.
    fn next(&mut self);

    /// Returns the record the cursor is positioned at.
    fn current(&self) -> Option<&LogRecord>;

    /// Returns the error that invalidated this cursor, if any.
    fn error(&self) -> Option<&io::Error> {
        None
    }

    fn log_id(&self) -> LogId {
        self.current().map_or(0, |r| r.log_id)
    }

    fn log_term(&self) -> TermId {
        self.current().map_or(0, |r| r.term)
    }

    fn log_source(&self) -> ClusterId {
        self.current().map_or(0, |r| r.cluster_id)
    }

    fn log_msg(&self) -> &[u8] {
        self.current().map_or(&[], |r| r.payload.as_slice())
    }
}

impl<I: LogIterator + ?Sized> LogIterator for Box<I> {
    fn valid(&self) -> bool {
        (**self).valid()
    }

    fn next(&mut self) {
        (**self).next()
    }

    fn current(&self) -> Option<&LogRecord> {
        (**self).current()
    }

    fn error(&self) -> Option<&io::Error> {
        (**self).error()
    }
}

/// Adapts a [`LogIterator`] into an [`Iterator`] of owned records.
pub struct Records<I> {
    it: I,
    started: bool,
}

impl<I: LogIterator> Records<I> {
    pub fn new(it: I) -> Self {
        Self { it, started: false }
    }

    /// Returns the underlying cursor.
    pub fn into_inner(self) -> I {
        self.it
    }
}

impl<I: LogIterator> Iterator for Records<I> {
    type Item = LogRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.started {
            self.it.next();
        }
        self.started = true;
        self.it.current().cloned()
    }
}

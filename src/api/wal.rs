//! Define the interface of a write-ahead log for a consensus layer.
//!
//! A WAL durably stores a contiguous run of records, each identified by a
//! monotonically increasing log id. The consensus layer:
//! - appends replicated records in id order,
//! - reads back ranges of records to replicate or replay them,
//! - rolls back conflicting suffixes,
//! - and drops old records that are no longer needed.
//!
//! Mutating methods must be called by one writer at a time. Reading methods
//! may be called from any thread concurrently with the writer.

use std::io;

use crate::api::log_iterator::LogIterator;
use crate::errors::WalError;
use crate::types::ClusterId;
use crate::types::LogId;
use crate::types::TermId;
use crate::LogRecord;

/// Define the interface of a write-ahead log.
pub trait Wal: Send + Sync {
    /// The id of the oldest stored record, 0 if the WAL is empty.
    fn first_log_id(&self) -> LogId;

    /// The id of the newest stored record, 0 if the WAL is empty.
    fn last_log_id(&self) -> LogId;

    /// The term of the newest stored record, 0 if the WAL is empty.
    fn last_log_term(&self) -> TermId;

    /// Append one record after the last one.
    ///
    /// `log_id` must be greater than 0, and `last_log_id() + 1` unless the
    /// WAL is empty.
    ///
    /// Returns `Ok(false)` if the pre-processor rejected the record, in which
    /// case nothing is written. When it returns `Ok(true)` the record is
    /// written to the segment file, synced if so configured, and visible to
    /// new iterators.
    fn append_log(
        &self,
        log_id: LogId,
        term: TermId,
        cluster_id: ClusterId,
        msg: &[u8],
    ) -> Result<bool, WalError>;

    /// Append a batch of records in order.
    ///
    /// Stops at the first record that is rejected or fails; the records
    /// before it stay appended.
    fn append_logs<I>(&self, records: I) -> Result<bool, WalError>
    where
        I: IntoIterator<Item = LogRecord>,
        Self: Sized,
    {
        for rec in records {
            let ok = self.append_log(
                rec.log_id,
                rec.term,
                rec.cluster_id,
                &rec.payload,
            )?;
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Remove every record after `log_id`.
    ///
    /// `log_id` must be in `[first_log_id() - 1, last_log_id()]`. Rolling
    /// back to `first_log_id() - 1` empties the WAL.
    fn rollback_to_log(&self, log_id: LogId) -> Result<(), WalError>;

    /// Remove every record and every segment file.
    fn reset(&self) -> Result<(), io::Error>;

    /// Remove old segment files whose modification time is older than the
    /// configured TTL. The two newest segments are always kept.
    fn clean_wal(&self) -> Result<(), io::Error>;

    /// Remove segment files whose records are all before `log_id`. The
    /// newest segment is always kept.
    fn clean_wal_before(&self, log_id: LogId) -> Result<(), io::Error>;

    /// Returns a cursor over records in `[first, last]`.
    ///
    /// `last` is capped at `last_log_id()`. The cursor is invalid if `first`
    /// is not stored.
    fn iterator(&self, first: LogId, last: LogId) -> Box<dyn LogIterator>;

    /// Hard-link the segment currently being written to `path`.
    fn link_current_wal(&self, path: &str) -> Result<(), io::Error>;
}

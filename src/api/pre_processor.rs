use crate::types::ClusterId;
use crate::types::LogId;
use crate::types::TermId;

/// A hook invoked before a record is written to the WAL.
///
/// It is called on the writer thread with the record about to be appended.
/// Returning false aborts the append and nothing is written, which lets the
/// caller apply the record to its own state first and only log it on
/// success.
pub trait PreProcessor: Send {
    fn pre_process(
        &mut self,
        log_id: LogId,
        term: TermId,
        cluster_id: ClusterId,
        msg: &[u8],
    ) -> bool;
}

/// Any `FnMut(log_id, term, cluster_id, msg) -> bool` closure is a
/// pre-processor.
impl<F> PreProcessor for F
where F: FnMut(LogId, TermId, ClusterId, &[u8]) -> bool + Send
{
    fn pre_process(
        &mut self,
        log_id: LogId,
        term: TermId,
        cluster_id: ClusterId,
        msg: &[u8],
    ) -> bool {
        self(log_id, term, cluster_id, msg)
    }
}

/// A pre-processor that accepts every record.
pub fn accept_all(_: LogId, _: TermId, _: ClusterId, _: &[u8]) -> bool {
    true
}

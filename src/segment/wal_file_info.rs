use std::fmt;
use std::time::SystemTime;

use crate::num::format_pad9_u64;
use crate::types::LogId;
use crate::types::TermId;

/// Metadata of one segment file.
///
/// `first_log_id` is part of the file name and never changes. The other
/// fields follow the file as records are appended or truncated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalFileInfo {
    pub(crate) path: String,
    pub(crate) first_log_id: LogId,
    pub(crate) last_log_id: LogId,
    pub(crate) last_log_term: TermId,
    pub(crate) mtime: SystemTime,
    pub(crate) size: u64,
}

impl WalFileInfo {
    pub(crate) fn new(path: impl ToString, first_log_id: LogId) -> Self {
        Self {
            path: path.to_string(),
            first_log_id,
            last_log_id: 0,
            last_log_term: 0,
            mtime: SystemTime::now(),
            size: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn first_log_id(&self) -> LogId {
        self.first_log_id
    }

    pub fn last_log_id(&self) -> LogId {
        self.last_log_id
    }

    pub fn last_log_term(&self) -> TermId {
        self.last_log_term
    }

    pub fn mtime(&self) -> SystemTime {
        self.mtime
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns true if this segment holds at least one record.
    pub(crate) fn has_records(&self) -> bool {
        self.last_log_id >= self.first_log_id && self.size > 0
    }

    /// Records an appended record of `size` bytes.
    pub(crate) fn append(&mut self, log_id: LogId, term: TermId, size: u64) {
        self.last_log_id = log_id;
        self.last_log_term = term;
        self.size += size;
        self.mtime = SystemTime::now();
    }
}

impl fmt::Display for WalFileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WalFile({}){{[{}, {}], last_term: {}, size: {}}}",
            self.path,
            format_pad9_u64(self.first_log_id),
            format_pad9_u64(self.last_log_id),
            self.last_log_term,
            format_pad9_u64(self.size),
        )
    }
}

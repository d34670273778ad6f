use std::fmt;
use std::fmt::Formatter;

use crate::buffer::BufferStat;
use crate::num::format_pad9_u64;
use crate::segment::wal_file_info::WalFileInfo;
use crate::types::LogId;
use crate::types::TermId;

/// Statistics about a WAL, including its segment files and in-memory buffer.
#[derive(Debug, Clone)]
pub struct Stat {
    pub first_log_id: LogId,
    pub last_log_id: LogId,
    pub last_log_term: TermId,
    /// Segment files, oldest first; the last one is being written
    pub files: Vec<WalFileStat>,
    pub buffer: BufferStat,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let lb = if f.alternate() { "\n" } else { "" };
        let idt = if f.alternate() { "  " } else { "" };
        write!(
            f,
            "Stat{{{lb} log: [{}, {}], last_term: {},{lb} files: [{lb}{idt}{}{lb} ],{lb} buffer: {}{lb}}}",
            format_pad9_u64(self.first_log_id),
            format_pad9_u64(self.last_log_id),
            self.last_log_term,
            self.files
                .iter()
                .map(|c| format!("{}", c))
                .collect::<Vec<String>>()
                .join(&format!(",{lb}{idt}")),
            self.buffer,
        )
    }
}

/// Statistics about a single segment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalFileStat {
    pub path: String,
    pub first_log_id: LogId,
    /// 0 if the file has no record yet
    pub last_log_id: LogId,
    pub last_log_term: TermId,
    /// Size of the file in bytes
    pub size: u64,
}

impl From<&WalFileInfo> for WalFileStat {
    fn from(info: &WalFileInfo) -> Self {
        Self {
            path: info.path.clone(),
            first_log_id: info.first_log_id,
            last_log_id: info.last_log_id,
            last_log_term: info.last_log_term,
            size: info.size,
        }
    }
}

impl fmt::Display for WalFileStat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WalFileStat({}){{[{}, {}], last_term: {}, size: {}}}",
            self.path,
            format_pad9_u64(self.first_log_id),
            format_pad9_u64(self.last_log_id),
            self.last_log_term,
            format_pad9_u64(self.size)
        )
    }
}

//! A write-ahead log for a replicated state machine:
//! a durable, append-only log of `(log_id, term, cluster_id, payload)`
//! records backed by rolling segment files, with the most recent records
//! kept in a lock-free in-memory buffer for tailing reads.
//!
//! ## Features
//!
//! - Strictly contiguous log ids, checked on append
//! - Crash recovery: a torn tail of the newest segment is truncated on open
//! - Rollback to a log id, reset, and TTL or id based retention of segments
//! - Single writer with any number of concurrent readers; readers of recent
//!   records never block
//!
//! ## Example
//!
//! ```rust
//! # use std::io;
//! # use std::sync::Arc;
//! use raft_wal::{Config, FileBasedWal, LogIterator};
//!
//! # fn main() -> Result<(), io::Error> {
//! let temp_dir = tempfile::tempdir()?;
//! let config = Arc::new(Config::new(temp_dir.path().to_string_lossy()));
//!
//! let wal = FileBasedWal::open(config)?;
//!
//! // Append log entries: (log_id, term, cluster_id, payload)
//! wal.append_log(1, 1, 0, b"first entry")?;
//! wal.append_log(2, 1, 0, b"second entry")?;
//!
//! let mut it = wal.iterator(1, 2);
//! while it.valid() {
//!     println!("{}: {:?}", it.log_id(), it.log_msg());
//!     it.next();
//! }
//!
//! // Remove log 2
//! wal.rollback_to_log(1)?;
//! assert_eq!(wal.last_log_id(), 1);
//! # Ok(())
//! # }
//! ```

mod buffer;
mod config;
mod log_record;
mod segment;
mod wal;

pub(crate) mod file_lock;
pub(crate) mod num;
pub(crate) mod offset_reader;
pub(crate) mod testing;

pub mod types;
pub use codeq;

pub mod api;
pub mod dump_writer;
pub mod errors;

pub use api::log_iterator::LogIterator;
pub use api::log_iterator::Records;
pub use api::pre_processor::PreProcessor;
pub use api::wal::Wal;
pub use buffer::AtomicLogBuffer;
pub use buffer::BufferIterator;
pub use buffer::BufferStat;
pub use config::Config;
pub use errors::WalError;
pub use log_record::LogRecord;
pub use log_record::RecordHeader;
pub use segment::wal_file_info::WalFileInfo;

pub use self::wal::dump::Dump;
pub use self::wal::file_based_wal::FileBasedWal;
pub use self::wal::file_iterator::WalFileIterator;
pub use self::wal::stat::Stat;
pub use self::wal::stat::WalFileStat;

#[cfg(test)]
mod tests;

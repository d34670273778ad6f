/// Monotonically increasing id of a WAL record.
pub type LogId = u64;

/// Consensus term a record was written in; opaque to the WAL.
pub type TermId = u64;

/// Id of the cluster (or source) a record came from.
pub type ClusterId = u64;

pub use codeq::config::Crc32fast;

/// Position and length of a record in a segment file.
pub type Segment = codeq::Segment<Crc32fast>;

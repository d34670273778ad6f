//! On-disk framing of a single WAL record.
//!
//! Every record is encoded big-endian as:
//!
//! ```text
//! | log_id: u64 | term: u64 | msg_len: u32 | cluster_id: u64 | payload | msg_len: u32 |
//! ```
//!
//! The trailing `msg_len` repeats the one in the header. A record whose two
//! lengths disagree was not completely written.

use std::fmt;
use std::io;
use std::io::Read;
use std::mem::size_of;

use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use codeq::Decode;
use codeq::Encode;

use crate::types::ClusterId;
use crate::types::LogId;
use crate::types::TermId;

/// Byte offset of `log_id` from the start of a record.
pub(crate) const LOG_ID_OFFSET: u64 = 0;

/// Byte offset of `term` from the start of a record.
pub(crate) const TERM_OFFSET: u64 = LOG_ID_OFFSET + size_of::<LogId>() as u64;

/// Byte offset of the header `msg_len` from the start of a record.
pub(crate) const HEAD_LEN_OFFSET: u64 = TERM_OFFSET + size_of::<TermId>() as u64;

/// Byte offset of `cluster_id` from the start of a record.
pub(crate) const CLUSTER_ID_OFFSET: u64 =
    HEAD_LEN_OFFSET + size_of::<u32>() as u64;

/// Size of the fixed fields preceding the payload.
pub(crate) const HEADER_SIZE: u64 =
    CLUSTER_ID_OFFSET + size_of::<ClusterId>() as u64;

/// Size of the trailing length copy.
pub(crate) const FOOTER_SIZE: u64 = size_of::<u32>() as u64;

/// A single record stored in the WAL.
#[derive(Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub log_id: LogId,
    pub term: TermId,
    pub cluster_id: ClusterId,
    pub payload: Vec<u8>,
}

impl fmt::Debug for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LogRecord{{id: {}, term: {}, cluster: {}, payload: {:?}}}",
            self.log_id,
            self.term,
            self.cluster_id,
            String::from_utf8_lossy(&self.payload)
        )
    }
}

impl LogRecord {
    pub fn new(
        log_id: LogId,
        term: TermId,
        cluster_id: ClusterId,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            log_id,
            term,
            cluster_id,
            payload: payload.into(),
        }
    }

    /// Size accounted for this record in the in-memory buffer.
    pub fn size(&self) -> u64 {
        (size_of::<LogId>() + size_of::<TermId>() + self.payload.len()) as u64
    }

    /// Size of this record when framed on disk.
    pub fn encoded_size(&self) -> u64 {
        HEADER_SIZE + self.payload.len() as u64 + FOOTER_SIZE
    }

    pub(crate) fn header(&self) -> Result<RecordHeader, io::Error> {
        let msg_len = u32::try_from(self.payload.len()).map_err(|_e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "payload of log {} is too large: {} bytes",
                    self.log_id,
                    self.payload.len()
                ),
            )
        })?;

        Ok(RecordHeader {
            log_id: self.log_id,
            term: self.term,
            msg_len,
            cluster_id: self.cluster_id,
        })
    }
}

impl Encode for LogRecord {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        let header = self.header()?;

        let mut n = header.encode(&mut w)?;

        w.write_all(&self.payload)?;
        n += self.payload.len();

        w.write_u32::<BigEndian>(header.msg_len)?;
        n += FOOTER_SIZE as usize;

        Ok(n)
    }
}

impl Decode for LogRecord {
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let header = RecordHeader::decode(&mut r)?;

        let len = header.msg_len as u64;
        let mut payload = Vec::new();
        let n = (&mut r).take(len).read_to_end(&mut payload)?;
        if n as u64 != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("payload of log {}: expect {} bytes, got {}", header.log_id, len, n),
            ));
        }

        let foot_len = r.read_u32::<BigEndian>()?;
        header.verify_footer(foot_len)?;

        Ok(Self {
            log_id: header.log_id,
            term: header.term,
            cluster_id: header.cluster_id,
            payload,
        })
    }
}

/// The fixed-size fields of a record, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub log_id: LogId,
    pub term: TermId,
    pub msg_len: u32,
    pub cluster_id: ClusterId,
}

impl RecordHeader {
    /// Size of the complete framed record this header belongs to.
    pub fn encoded_size(&self) -> u64 {
        HEADER_SIZE + self.msg_len as u64 + FOOTER_SIZE
    }

    /// Reads a complete framed record but keeps only the header.
    ///
    /// The payload is skipped and the footer length is verified.
    pub(crate) fn read_framed<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let header = Self::decode(&mut r)?;

        let want = header.msg_len as u64;
        let mut payload = (&mut r).take(want);
        let got = io::copy(&mut payload, &mut io::sink())?;
        if got < want {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "payload of log {} is incomplete: {} < {}",
                    header.log_id, got, want
                ),
            ));
        }

        let foot_len = r.read_u32::<BigEndian>()?;
        header.verify_footer(foot_len)?;

        Ok(header)
    }

    pub(crate) fn verify_footer(&self, foot_len: u32) -> Result<(), io::Error> {
        if foot_len != self.msg_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "length mismatch of log {}: head {}, foot {}",
                    self.log_id, self.msg_len, foot_len
                ),
            ));
        }
        Ok(())
    }
}

/// A framed record read with its payload skipped.
///
/// Decoding it consumes the whole record and verifies the footer, without
/// allocating the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FramedHeader(pub(crate) RecordHeader);

impl Decode for FramedHeader {
    fn decode<R: io::Read>(r: R) -> Result<Self, io::Error> {
        RecordHeader::read_framed(r).map(FramedHeader)
    }
}

impl Encode for RecordHeader {
    fn encode<W: io::Write>(&self, mut w: W) -> Result<usize, io::Error> {
        w.write_u64::<BigEndian>(self.log_id)?;
        w.write_u64::<BigEndian>(self.term)?;
        w.write_u32::<BigEndian>(self.msg_len)?;
        w.write_u64::<BigEndian>(self.cluster_id)?;
        Ok(HEADER_SIZE as usize)
    }
}

impl Decode for RecordHeader {
    fn decode<R: io::Read>(mut r: R) -> Result<Self, io::Error> {
        let log_id = r.read_u64::<BigEndian>()?;
        let term = r.read_u64::<BigEndian>()?;
        let msg_len = r.read_u32::<BigEndian>()?;
        let cluster_id = r.read_u64::<BigEndian>()?;

        Ok(Self {
            log_id,
            term,
            msg_len,
            cluster_id,
        })
    }
}

use std::cmp::min;
use std::collections::VecDeque;
use std::fs::File;
use std::io;

use codeq::error_context_ext::ErrorContextExt;
use log::debug;
use log::error;

use crate::api::log_iterator::LogIterator;
use crate::log_record::FramedHeader;
use crate::segment::headers_iter;
use crate::segment::read_record_at;
use crate::segment::wal_file_info::WalFileInfo;
use crate::types::LogId;
use crate::Config;
use crate::LogRecord;

/// A segment opened for reading, with its range at the time the iterator was
/// created.
#[derive(Debug)]
struct OpenedFile {
    f: File,
    path: String,
    first_log_id: LogId,
    last_log_id: LogId,
    size: u64,
}

/// Reads a range of records from segment files.
///
/// It serves ranges that are no longer in the in-memory buffer. All segments
/// from the one containing the first id up to the one containing the last id
/// are opened when the iterator is created, so a segment removed later is
/// still readable through the open handle.
///
/// Locating the first id scans the record headers of its segment from the
/// start. Each step then reads one whole record at a known offset.
#[derive(Debug)]
pub struct WalFileIterator {
    /// Segments still to read, oldest first.
    files: VecDeque<OpenedFile>,
    offset: u64,
    curr: LogId,
    last: LogId,
    current: Option<LogRecord>,
    error: Option<io::Error>,
}

impl WalFileIterator {
    /// Creates an iterator that is never valid.
    pub(crate) fn empty() -> Self {
        Self {
            files: VecDeque::new(),
            offset: 0,
            curr: 0,
            last: 0,
            current: None,
            error: None,
        }
    }

    /// Creates an iterator of `[first, last]` over `infos`, the segments
    /// sorted by first log id.
    pub(crate) fn new(
        config: &Config,
        infos: &[WalFileInfo],
        first: LogId,
        last: LogId,
    ) -> Self {
        let mut it = Self::empty();
        it.curr = first;
        it.last = last;

        if let Err(e) = it.init(config, infos) {
            error!(
                "Failed to read WAL files for range [{}, {}]: {}",
                first, last, e
            );
            it.files.clear();
            it.current = None;
            it.error = Some(e);
        }

        it
    }

    fn init(
        &mut self,
        config: &Config,
        infos: &[WalFileInfo],
    ) -> Result<(), io::Error> {
        let infos = infos.iter().filter(|i| i.has_records()).collect::<Vec<_>>();

        let (Some(oldest), Some(newest)) = (infos.first(), infos.last()) else {
            return Ok(());
        };

        if self.curr < oldest.first_log_id
            || self.curr > newest.last_log_id
            || self.curr > self.last
        {
            debug!(
                "Log id {} is not in WAL files [{}, {}]",
                self.curr, oldest.first_log_id, newest.last_log_id
            );
            return Ok(());
        }

        self.last = min(self.last, newest.last_log_id);

        for info in infos.iter().rev() {
            if info.first_log_id > self.last {
                continue;
            }

            let f = File::open(&info.path)
                .context(|| format!("open WAL file {} to read", info.path))?;

            self.files.push_front(OpenedFile {
                f,
                path: info.path.clone(),
                first_log_id: info.first_log_id,
                last_log_id: info.last_log_id,
                size: info.size,
            });

            if info.first_log_id <= self.curr {
                break;
            }
        }

        let Some(front) = self.files.front() else {
            return Ok(());
        };

        let mut found = None;
        for res in headers_iter(config, &front.f, front.size, &front.path) {
            let (start, _size, FramedHeader(header)) = res?;
            if header.log_id == self.curr {
                found = Some(start);
                break;
            }
        }

        let Some(offset) = found else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("log id {} not found in {}", self.curr, front.path),
            ));
        };

        self.offset = offset;
        self.load()
    }

    /// Reads the record of `curr` at `offset` of the front segment.
    fn load(&mut self) -> Result<(), io::Error> {
        let Some(front) = self.files.front() else {
            self.current = None;
            return Ok(());
        };

        let rec = read_record_at(&front.f, self.offset).context(|| {
            format!(
                "read log {} at offset {} of {}",
                self.curr, self.offset, front.path
            )
        })?;

        if rec.log_id != self.curr {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "expect log id {} but {} at offset {} of {}",
                    self.curr, rec.log_id, self.offset, front.path
                ),
            ));
        }

        self.current = Some(rec);
        Ok(())
    }
}

impl LogIterator for WalFileIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) {
        let Some(rec) = self.current.take() else {
            return;
        };

        self.offset += rec.encoded_size();
        self.curr += 1;

        if self.curr > self.last {
            self.files.clear();
            return;
        }

        let exhausted = self.files.front().is_some_and(|f| f.last_log_id < self.curr);
        if exhausted {
            self.files.pop_front();
            self.offset = 0;

            if let Some(front) = self.files.front() {
                if front.first_log_id != self.curr {
                    let e = io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "expect WAL file {} to start at {} but {}",
                            front.path, self.curr, front.first_log_id
                        ),
                    );
                    error!("{}", e);
                    self.files.clear();
                    self.error = Some(e);
                    return;
                }
            }
        }

        if let Err(e) = self.load() {
            error!("WAL file iterator stopped: {}", e);
            self.files.clear();
            self.error = Some(e);
        }
    }

    fn current(&self) -> Option<&LogRecord> {
        self.current.as_ref()
    }

    fn error(&self) -> Option<&io::Error> {
        self.error.as_ref()
    }
}

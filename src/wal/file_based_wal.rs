use std::cmp::min;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::SystemTime;

use codeq::error_context_ext::ErrorContextExt;
use codeq::Encode;
use log::debug;
use log::error;
use log::info;
use log::warn;

use crate::api::log_iterator::LogIterator;
use crate::api::pre_processor::accept_all;
use crate::api::pre_processor::PreProcessor;
use crate::api::wal::Wal;
use crate::buffer::AtomicLogBuffer;
use crate::errors::InvalidLogId;
use crate::errors::LogIdNonContiguous;
use crate::errors::RollbackOutOfRange;
use crate::errors::WalError;
use crate::errors::WalStopped;
use crate::file_lock::FileLock;
use crate::segment;
use crate::segment::wal_file_info::WalFileInfo;
use crate::types::ClusterId;
use crate::types::LogId;
use crate::types::TermId;
use crate::wal::dump::Dump;
use crate::wal::file_iterator::WalFileIterator;
use crate::wal::stat::Stat;
use crate::wal::stat::WalFileStat;
use crate::Config;
use crate::LogRecord;

/// The segment file being appended to.
#[derive(Debug)]
struct CurrentFile {
    f: File,
    first_log_id: LogId,
}

/// State owned by the single writer.
struct Writer {
    current: Option<CurrentFile>,
    pre_processor: Box<dyn PreProcessor>,
}

impl fmt::Debug for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

/// A write-ahead log stored in rolling segment files, with the most recent
/// records also kept in an [`AtomicLogBuffer`] for lock-free tailing reads.
///
/// - Records are appended with strictly contiguous log ids. A record is
///   written to the segment file before it is visible in the buffer.
/// - A segment is rolled when it would exceed `Config::file_size()`.
/// - Readers are served from the buffer and fall back to the segment files
///   for ranges that have been evicted.
///
/// Mutating operations are serialized by an internal writer lock; reads can
/// be issued from any thread.
#[derive(Debug)]
pub struct FileBasedWal {
    config: Arc<Config>,

    /// Acquire the dir exclusive lock when writing to the WAL.
    _dir_lock: FileLock,

    /// Segments by first log id. The last one is being written.
    files: Mutex<BTreeMap<LogId, WalFileInfo>>,

    /// Serializes append, rollback, reset and cleaning. Locked before
    /// `files`.
    writer: Mutex<Writer>,

    first_log_id: AtomicU64,
    last_log_id: AtomicU64,
    last_log_term: AtomicU64,

    stopped: AtomicBool,

    buffer: Arc<AtomicLogBuffer>,
}

impl FileBasedWal {
    /// Opens a WAL in `config.dir`, accepting every appended record.
    pub fn open(config: Arc<Config>) -> Result<Self, io::Error> {
        Self::open_with_pre_processor(config, accept_all)
    }

    /// Opens a WAL in `config.dir`.
    ///
    /// This operation:
    /// 1. Creates the directory if absent and acquires an exclusive lock on
    ///    it.
    /// 2. Loads the segment files, skipping the ones that are corrupted.
    /// 3. Re-scans the newest segment and truncates a torn tail.
    /// 4. Keeps only the newest contiguous run of segments.
    /// 5. Re-opens the newest segment for appending.
    ///
    /// `pre_processor` is called with every record before it is written.
    pub fn open_with_pre_processor<P>(
        config: Arc<Config>,
        pre_processor: P,
    ) -> Result<Self, io::Error>
    where
        P: PreProcessor + 'static,
    {
        fs::create_dir_all(&config.dir)
            .context(|| format!("create WAL dir '{}'", config.dir))?;

        let dir_lock = FileLock::new(&config)
            .context(|| format!("open FileBasedWal in '{}'", config.dir))?;

        let mut infos = segment::load_wal_files(&config)?;

        if let Some(newest) = infos.pop() {
            if let Some(newest) = segment::scan_last_wal(&config, newest)? {
                infos.push(newest);
            }
        }

        let infos = segment::retain_newest_contiguous(infos);

        let first_log_id = infos.first().map_or(0, |i| i.first_log_id);
        let (last_log_id, last_log_term) =
            infos.last().map_or((0, 0), |i| (i.last_log_id, i.last_log_term));

        let current = match infos.last() {
            Some(newest) => Some(CurrentFile {
                f: segment::open_for_append(&newest.path)?,
                first_log_id: newest.first_log_id,
            }),
            None => None,
        };

        info!(
            "FileBasedWal opened in '{}': log [{}, {}], last term: {}, {} files",
            config.dir,
            first_log_id,
            last_log_id,
            last_log_term,
            infos.len()
        );

        let files = infos.into_iter().map(|i| (i.first_log_id, i)).collect();

        let buffer = Arc::new(AtomicLogBuffer::new(config.buffer_size()));

        Ok(Self {
            config,
            _dir_lock: dir_lock,
            files: Mutex::new(files),
            writer: Mutex::new(Writer {
                current,
                pre_processor: Box::new(pre_processor),
            }),
            first_log_id: AtomicU64::new(first_log_id),
            last_log_id: AtomicU64::new(last_log_id),
            last_log_term: AtomicU64::new(last_log_term),
            stopped: AtomicBool::new(false),
            buffer,
        })
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    /// The in-memory buffer of the recent records.
    pub fn buffer(&self) -> &Arc<AtomicLogBuffer> {
        &self.buffer
    }

    pub fn first_log_id(&self) -> LogId {
        self.first_log_id.load(Ordering::SeqCst)
    }

    pub fn last_log_id(&self) -> LogId {
        self.last_log_id.load(Ordering::SeqCst)
    }

    pub fn last_log_term(&self) -> TermId {
        self.last_log_term.load(Ordering::SeqCst)
    }

    /// Stops accepting appends and rollbacks.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        info!("FileBasedWal in '{}' stopped", self.config.dir);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Dump the segment files of this WAL for debugging purposes.
    pub fn dump(&self) -> Dump {
        Dump::new(self.config.clone())
    }

    pub fn stat(&self) -> Stat {
        let files = self.lock_files();

        Stat {
            first_log_id: self.first_log_id(),
            last_log_id: self.last_log_id(),
            last_log_term: self.last_log_term(),
            files: files.values().map(WalFileStat::from).collect(),
            buffer: self.buffer.stat(),
        }
    }

    /// Append one record after the last one.
    ///
    /// Returns `Ok(false)` if the pre-processor rejected it.
    pub fn append_log(
        &self,
        log_id: LogId,
        term: TermId,
        cluster_id: ClusterId,
        msg: &[u8],
    ) -> Result<bool, WalError> {
        let mut writer = self.lock_writer();
        self.append_with(&mut writer, LogRecord::new(log_id, term, cluster_id, msg))
    }

    /// Append a batch of records in order, stopping at the first one that is
    /// rejected or fails.
    pub fn append_logs<I>(&self, records: I) -> Result<bool, WalError>
    where I: IntoIterator<Item = LogRecord> {
        let mut writer = self.lock_writer();

        for rec in records {
            if !self.append_with(&mut writer, rec)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn append_with(
        &self,
        writer: &mut Writer,
        rec: LogRecord,
    ) -> Result<bool, WalError> {
        if self.is_stopped() {
            let e = WalStopped::new("append");
            error!("{}: log id {}", e, rec.log_id);
            return Err(e.into());
        }

        if rec.log_id == 0 {
            let e = InvalidLogId::new(rec.log_id);
            error!("{}", e);
            return Err(e.into());
        }

        let last = self.last_log_id();

        if last != 0 && rec.log_id != last + 1 {
            let e = LogIdNonContiguous::new(last, rec.log_id);
            error!("{}", e);
            return Err(e.into());
        }

        let accepted = writer.pre_processor.pre_process(
            rec.log_id,
            rec.term,
            rec.cluster_id,
            &rec.payload,
        );
        if !accepted {
            debug!("Pre-processor rejected log {}", rec.log_id);
            return Ok(false);
        }

        let mut buf = Vec::with_capacity(rec.encoded_size() as usize);
        rec.encode(&mut buf)?;

        self.write_record(writer, &rec, &buf)?;

        let (log_id, term) = (rec.log_id, rec.term);
        self.buffer.push(rec);

        // Published last, so that a reader never sees a log id that is not
        // yet in the buffer.
        if self.first_log_id() == 0 {
            self.first_log_id.store(log_id, Ordering::SeqCst);
        }
        self.last_log_id.store(log_id, Ordering::SeqCst);
        self.last_log_term.store(term, Ordering::SeqCst);

        Ok(true)
    }

    /// Writes an encoded record to the current segment, rolling to a new one
    /// if needed.
    fn write_record(
        &self,
        writer: &mut Writer,
        rec: &LogRecord,
        buf: &[u8],
    ) -> Result<(), io::Error> {
        let mut files = self.lock_files();

        let need_roll = match &writer.current {
            None => true,
            Some(cur) => match files.get(&cur.first_log_id) {
                None => true,
                Some(info) => {
                    info.has_records()
                        && info.size + buf.len() as u64
                            > self.config.file_size() as u64
                }
            },
        };

        if need_roll {
            self.roll(writer, &mut files, rec.log_id)?;
        }

        let Some(cur) = writer.current.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "no WAL file is open for append",
            ));
        };

        let Some(info) = files.get_mut(&cur.first_log_id) else {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("WAL file of {} is not tracked", cur.first_log_id),
            ));
        };

        let sync = self.config.sync();
        let res = cur.f.write_all(buf).and_then(|_| {
            if sync {
                cur.f.sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(e) = res {
            error!(
                "Failed to write log {} to {}: {}; truncate it back to {} bytes",
                rec.log_id, info.path, e, info.size
            );
            if let Err(te) = cur.f.set_len(info.size) {
                error!("Failed to truncate {}: {}", info.path, te);
            }
            return Err(e).context(|| format!("append log {}", rec.log_id));
        }

        info.append(rec.log_id, rec.term, buf.len() as u64);

        Ok(())
    }

    /// Closes the current segment and creates a new one starting at
    /// `first_log_id`.
    fn roll(
        &self,
        writer: &mut Writer,
        files: &mut BTreeMap<LogId, WalFileInfo>,
        first_log_id: LogId,
    ) -> Result<(), io::Error> {
        if let Some(cur) = writer.current.take() {
            Self::close_file(cur)?;
        }

        let (f, info) = segment::create_wal_file(&self.config, first_log_id)?;
        info!("Roll to new WAL file: {}", info);

        files.insert(first_log_id, info);
        writer.current = Some(CurrentFile { f, first_log_id });

        Ok(())
    }

    fn close_file(cur: CurrentFile) -> Result<(), io::Error> {
        cur.f
            .sync_all()
            .context(|| format!("sync WAL file of {}", cur.first_log_id))
    }

    /// Remove every record after `log_id`.
    ///
    /// Segments starting after `log_id` are removed and the segment holding
    /// `log_id` is truncated right after it. The in-memory buffer is reset, and
    /// the next append starts a new segment.
    pub fn rollback_to_log(&self, log_id: LogId) -> Result<(), WalError> {
        let mut writer = self.lock_writer();

        if self.is_stopped() {
            let e = WalStopped::new("rollback");
            error!("{}: to log id {}", e, log_id);
            return Err(e.into());
        }

        let first = self.first_log_id();
        let last = self.last_log_id();

        if log_id > last || log_id + 1 < first {
            let e = RollbackOutOfRange::new(log_id, first, last);
            error!("{}", e);
            return Err(e.into());
        }

        info!("Rollback WAL to {}, current log: [{}, {}]", log_id, first, last);

        let mut files = self.lock_files();

        if let Err(e) = self.rollback_files(&mut writer, &mut files, log_id) {
            error!(
                "Failed to rollback WAL to {}: {}; stop accepting writes",
                log_id, e
            );
            self.stop();
            return Err(e.into());
        }

        match files.values().next_back() {
            Some(info) => {
                self.last_log_id.store(info.last_log_id, Ordering::SeqCst);
                self.last_log_term.store(info.last_log_term, Ordering::SeqCst);
            }
            None => {
                info!("Rollback removes all WAL files");
                self.first_log_id.store(0, Ordering::SeqCst);
                self.last_log_id.store(0, Ordering::SeqCst);
                self.last_log_term.store(0, Ordering::SeqCst);
            }
        }

        self.buffer.reset();

        Ok(())
    }

    /// Removes the segments after `log_id`, newest first, and truncates the
    /// one holding `log_id`.
    ///
    /// A segment stays tracked until its file is removed, so the tracked
    /// segments remain contiguous if this fails midway.
    fn rollback_files(
        &self,
        writer: &mut Writer,
        files: &mut BTreeMap<LogId, WalFileInfo>,
        log_id: LogId,
    ) -> Result<(), io::Error> {
        if let Some(cur) = writer.current.take() {
            Self::close_file(cur)?;
        }

        let removing = files.range(log_id + 1..).map(|(k, _)| *k).collect::<Vec<_>>();

        for first in removing.into_iter().rev() {
            let Some(info) = files.get(&first) else {
                continue;
            };

            info!("Rollback removes WAL file: {}", info);
            fs::remove_file(&info.path)
                .context(|| format!("remove WAL file {}", info.path))?;

            files.remove(&first);
        }

        if let Some(info) = files.values_mut().next_back() {
            if info.last_log_id > log_id {
                self.truncate_after(info, log_id)?;
            }
        }

        Ok(())
    }

    /// Truncates a segment right after the record of `log_id`.
    fn truncate_after(
        &self,
        info: &mut WalFileInfo,
        log_id: LogId,
    ) -> Result<(), io::Error> {
        let (end, term) = segment::find_record_end(&self.config, info, log_id)?;

        let f = OpenOptions::new()
            .write(true)
            .open(&info.path)
            .context(|| format!("open WAL file {} to truncate", info.path))?;

        f.set_len(end)
            .context(|| format!("truncate WAL file {}", info.path))?;
        f.sync_all()?;

        warn!(
            "Rollback truncates WAL file {} from {} to {} bytes, last log id: {} -> {}",
            info.path, info.size, end, info.last_log_id, log_id
        );

        info.size = end;
        info.last_log_id = log_id;
        info.last_log_term = term;
        info.mtime = SystemTime::now();

        Ok(())
    }

    /// Remove every record and every segment file in the WAL dir.
    pub fn reset(&self) -> Result<(), io::Error> {
        let mut writer = self.lock_writer();

        writer.current = None;

        let mut files = self.lock_files();

        self.buffer.reset();

        files.clear();
        self.first_log_id.store(0, Ordering::SeqCst);
        self.last_log_id.store(0, Ordering::SeqCst);
        self.last_log_term.store(0, Ordering::SeqCst);

        for (_first, path) in segment::list_wal_files(&self.config)? {
            info!("Reset removes WAL file: {}", path);
            fs::remove_file(&path)
                .context(|| format!("remove WAL file {}", path))?;
        }

        Ok(())
    }

    /// Remove expired segment files, oldest first.
    ///
    /// A segment is expired if it has not been modified for
    /// `Config::ttl_secs()`. The two newest segments are always kept, and
    /// removal stops at the first segment that is not expired.
    pub fn clean_wal(&self) -> Result<(), io::Error> {
        let ttl = Duration::from_secs(self.config.ttl_secs());
        let now = SystemTime::now();

        let _writer = self.lock_writer();
        let mut files = self.lock_files();

        let n = files.len();
        if n <= 2 {
            return Ok(());
        }

        let candidates = files.keys().take(n - 2).copied().collect::<Vec<_>>();

        for first in candidates {
            let Some(info) = files.get(&first) else {
                continue;
            };

            let age = now.duration_since(info.mtime).unwrap_or_default();
            if age <= ttl {
                break;
            }

            info!(
                "Clean expired WAL file: {}, not modified for {:?}",
                info, age
            );
            fs::remove_file(&info.path)
                .context(|| format!("remove WAL file {}", info.path))?;

            files.remove(&first);
        }

        self.reload_first_log_id(&files);
        Ok(())
    }

    /// Remove segment files whose records are all before `log_id`.
    ///
    /// The newest segment is always kept.
    pub fn clean_wal_before(&self, log_id: LogId) -> Result<(), io::Error> {
        let _writer = self.lock_writer();
        let mut files = self.lock_files();

        let Some((&newest, newest_info)) = files.last_key_value() else {
            return Ok(());
        };

        if newest_info.last_log_id < log_id {
            warn!(
                "Skip cleaning WAL before {}: it is after the last log {}",
                log_id, newest_info.last_log_id
            );
            return Ok(());
        }

        let candidates = files
            .iter()
            .take_while(|(first, info)| **first != newest && info.last_log_id < log_id)
            .map(|(first, _)| *first)
            .collect::<Vec<_>>();

        for first in candidates {
            let Some(info) = files.remove(&first) else {
                continue;
            };

            info!("Clean WAL file before {}: {}", log_id, info);
            fs::remove_file(&info.path)
                .context(|| format!("remove WAL file {}", info.path))?;
        }

        self.reload_first_log_id(&files);
        Ok(())
    }

    fn reload_first_log_id(&self, files: &BTreeMap<LogId, WalFileInfo>) {
        let first = files
            .values()
            .find(|i| i.has_records())
            .map_or(0, |i| i.first_log_id);

        self.first_log_id.store(first, Ordering::SeqCst);
        debug!("WAL first log id: {}", first);
    }

    /// Returns a cursor over records in `[first, last]`.
    ///
    /// `last` is capped at the last log id. Records still in the in-memory
    /// buffer are read from it; otherwise they are read from segment files.
    pub fn iterator(&self, first: LogId, last: LogId) -> Box<dyn LogIterator> {
        let last = min(last, self.last_log_id());

        if first == 0 || first > last || first < self.first_log_id() {
            return Box::new(WalFileIterator::empty());
        }

        let it = self.buffer.iterator(first, last);
        if it.valid() {
            return Box::new(it);
        }
        drop(it);

        let infos = self.lock_files().values().cloned().collect::<Vec<_>>();
        Box::new(WalFileIterator::new(&self.config, &infos, first, last))
    }

    /// Hard-link the segment currently being written to `path`.
    pub fn link_current_wal(&self, path: &str) -> Result<(), io::Error> {
        let files = self.lock_files();

        let Some((_, info)) = files.last_key_value() else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no WAL file in '{}' to link", self.config.dir),
            ));
        };

        fs::hard_link(&info.path, path)
            .context(|| format!("link WAL file {} to {}", info.path, path))?;

        info!("Linked WAL file {} to {}", info.path, path);
        Ok(())
    }

    fn lock_files(&self) -> MutexGuard<'_, BTreeMap<LogId, WalFileInfo>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Wal for FileBasedWal {
    fn first_log_id(&self) -> LogId {
        FileBasedWal::first_log_id(self)
    }

    fn last_log_id(&self) -> LogId {
        FileBasedWal::last_log_id(self)
    }

    fn last_log_term(&self) -> TermId {
        FileBasedWal::last_log_term(self)
    }

    fn append_log(
        &self,
        log_id: LogId,
        term: TermId,
        cluster_id: ClusterId,
        msg: &[u8],
    ) -> Result<bool, WalError> {
        FileBasedWal::append_log(self, log_id, term, cluster_id, msg)
    }

    fn append_logs<I>(&self, records: I) -> Result<bool, WalError>
    where I: IntoIterator<Item = LogRecord> {
        FileBasedWal::append_logs(self, records)
    }

    fn rollback_to_log(&self, log_id: LogId) -> Result<(), WalError> {
        FileBasedWal::rollback_to_log(self, log_id)
    }

    fn reset(&self) -> Result<(), io::Error> {
        FileBasedWal::reset(self)
    }

    fn clean_wal(&self) -> Result<(), io::Error> {
        FileBasedWal::clean_wal(self)
    }

    fn clean_wal_before(&self, log_id: LogId) -> Result<(), io::Error> {
        FileBasedWal::clean_wal_before(self, log_id)
    }

    fn iterator(&self, first: LogId, last: LogId) -> Box<dyn LogIterator> {
        FileBasedWal::iterator(self, first, last)
    }

    fn link_current_wal(&self, path: &str) -> Result<(), io::Error> {
        FileBasedWal::link_current_wal(self, path)
    }
}

impl Drop for FileBasedWal {
    fn drop(&mut self) {
        let writer = self.writer.get_mut().unwrap_or_else(PoisonError::into_inner);

        if let Some(cur) = writer.current.take() {
            if let Err(e) = Self::close_file(cur) {
                warn!("Failed to sync WAL file on close: {}", e);
            }
        }

        info!("FileBasedWal in '{}' closed", self.config.dir);
    }
}

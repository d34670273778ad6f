//! Segment files of the WAL.
//!
//! A segment is a file named after the id of its first record, holding a
//! contiguous run of framed records. This module discovers segments in the
//! WAL directory and recovers their metadata:
//! - Every segment is checked in O(1) by reading its first log id and the
//!   fixed fields of the last record, located backward from the end of file.
//! - The newest segment is re-scanned record by record, and a torn tail left
//!   by an unclean shutdown is truncated.

pub(crate) mod record_iterator;
pub(crate) mod wal_file_info;

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::BufReader;

use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use codeq::error_context_ext::ErrorContextExt;
use codeq::Decode;
use log::error;
use log::info;
use log::warn;

use crate::file_lock::FileLock;
use crate::log_record::FramedHeader;
use crate::log_record::FOOTER_SIZE;
use crate::log_record::HEADER_SIZE;
use crate::log_record::HEAD_LEN_OFFSET;
use crate::log_record::LOG_ID_OFFSET;
use crate::log_record::TERM_OFFSET;
use crate::offset_reader::PositionedReader;
use crate::segment::record_iterator::RecordIterator;
use crate::segment::wal_file_info::WalFileInfo;
use crate::types::LogId;
use crate::types::TermId;
use crate::Config;
use crate::LogRecord;

/// Lists `(first_log_id, path)` of every segment file in the WAL dir, sorted
/// by first log id.
///
/// Files that do not look like a segment are ignored.
pub(crate) fn list_wal_files(
    config: &Config,
) -> Result<Vec<(LogId, String)>, io::Error> {
    let entries = fs::read_dir(&config.dir)
        .context(|| format!("read WAL dir '{}'", config.dir))?;

    let mut files = vec![];

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();

        let fn_str = file_name.to_string_lossy();
        if fn_str == FileLock::LOCK_FILE_NAME {
            continue;
        }

        match Config::parse_wal_file_name(&fn_str) {
            Ok(first_log_id) => {
                let path = entry.path().to_string_lossy().to_string();
                files.push((first_log_id, path));
            }
            Err(err) => {
                warn!("Ignore invalid WAL file name: '{}': {}", fn_str, err);
            }
        }
    }

    files.sort();

    Ok(files)
}

/// Loads the metadata of every segment in the WAL dir, sorted by first log
/// id.
///
/// A segment whose first record does not match its name is removed. A
/// segment with a damaged last record is removed too, unless it is the newest
/// one: the newest segment is always re-scanned by [`scan_last_wal`], which
/// truncates the damaged tail. A removed segment breaks the contiguity of the
/// ones before it, see [`retain_newest_contiguous`].
pub(crate) fn load_wal_files(
    config: &Config,
) -> Result<Vec<WalFileInfo>, io::Error> {
    let mut loaded = vec![];

    for (first_log_id, path) in list_wal_files(config)? {
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Skip WAL file {}: can not read metadata: {}", path, e);
                continue;
            }
        };

        let mtime = match meta.modified() {
            Ok(t) => t,
            Err(e) => {
                warn!("Skip WAL file {}: can not read mtime: {}", path, e);
                continue;
            }
        };

        let mut info = WalFileInfo::new(&path, first_log_id);
        info.mtime = mtime;
        info.size = meta.len();

        if info.size == 0 {
            warn!("WAL file {} is empty", path);
            loaded.push((info, Ok(())));
            continue;
        }

        let f = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Skip WAL file {}: can not open: {}", path, e);
                continue;
            }
        };

        match read_head_log_id(&f) {
            Ok(head) if head != first_log_id => {
                error!(
                    "Skip WAL file {}: first log id in file {} does not match the name",
                    path, head
                );
                remove_skipped(&path);
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                loaded.push((info, Err(e)));
                continue;
            }
        }

        let tail = read_tail(&f, info.size).map(|(last_log_id, term)| {
            info.last_log_id = last_log_id;
            info.last_log_term = term;
        });

        loaded.push((info, tail));
    }

    let n = loaded.len();
    let mut infos = Vec::with_capacity(n);

    for (i, (info, tail)) in loaded.into_iter().enumerate() {
        if let Err(e) = tail {
            if i + 1 < n {
                error!("Skip corrupted WAL file {}: {}", info.path, e);
                remove_skipped(&info.path);
                continue;
            }
            warn!(
                "Tail of the newest WAL file {} is damaged: {}; re-scan it",
                info.path, e
            );
        }
        infos.push(info);
    }

    Ok(infos)
}

fn remove_skipped(path: &str) {
    match fs::remove_file(path) {
        Ok(()) => warn!("Removed skipped WAL file {}", path),
        Err(e) => error!("Failed to remove skipped WAL file {}: {}", path, e),
    }
}

fn read_head_log_id(f: &File) -> Result<LogId, io::Error> {
    PositionedReader::new(f, LOG_ID_OFFSET).read_u64::<BigEndian>()
}

/// Reads the `(log_id, term)` of the last record in a segment of `size`
/// bytes, without scanning the records before it.
///
/// The footer length locates the start of the last record, where the header
/// length must repeat it.
pub(crate) fn read_tail(
    f: &File,
    size: u64,
) -> Result<(LogId, TermId), io::Error> {
    if size < HEADER_SIZE + FOOTER_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("segment of {} bytes is shorter than a record", size),
        ));
    }

    let foot_len = PositionedReader::new(f, size - FOOTER_SIZE)
        .read_u32::<BigEndian>()?;

    let record_size = HEADER_SIZE + foot_len as u64 + FOOTER_SIZE;
    if record_size > size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "last record of {} bytes exceeds segment size {}",
                record_size, size
            ),
        ));
    }

    let start = size - record_size;

    let head_len = PositionedReader::new(f, start + HEAD_LEN_OFFSET)
        .read_u32::<BigEndian>()?;
    if head_len != foot_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "length mismatch of the last record at offset {}: head {}, foot {}",
                start, head_len, foot_len
            ),
        ));
    }

    let log_id = PositionedReader::new(f, start + LOG_ID_OFFSET)
        .read_u64::<BigEndian>()?;
    let term =
        PositionedReader::new(f, start + TERM_OFFSET).read_u64::<BigEndian>()?;

    Ok((log_id, term))
}

/// Returns an iterator of the framed record headers in a segment file.
pub(crate) fn headers_iter<'a>(
    config: &Config,
    f: &'a File,
    size: u64,
    path: &str,
) -> RecordIterator<BufReader<PositionedReader<'a>>, FramedHeader> {
    let br = BufReader::with_capacity(
        config.read_buffer_size(),
        PositionedReader::new(f, 0),
    );
    RecordIterator::new(br, size, path)
}

/// Re-scans the newest segment record by record to rebuild its exact last
/// log id and term.
///
/// The scan stops at the first record that is damaged or out of sequence,
/// and the file is truncated there. If no valid record is found the file is
/// removed and `None` is returned.
pub(crate) fn scan_last_wal(
    config: &Config,
    mut info: WalFileInfo,
) -> Result<Option<WalFileInfo>, io::Error> {
    let f = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&info.path)
        .context(|| format!("open last WAL file {}", info.path))?;

    let file_size = f.metadata()?.len();

    let mut expected = info.first_log_id;
    let mut valid_end = 0;
    let mut last = None;

    for res in headers_iter(config, &f, file_size, &info.path) {
        let (start, size, FramedHeader(header)) = match res {
            Ok(x) => x,
            Err(e) => {
                warn!("Stop scanning {} at offset {}: {}", info.path, valid_end, e);
                break;
            }
        };

        if header.log_id != expected {
            warn!(
                "Stop scanning {} at offset {}: expect log id {} but {}",
                info.path, start, expected, header.log_id
            );
            break;
        }

        last = Some((header.log_id, header.term));
        valid_end = start + size;
        expected += 1;
    }

    let Some((last_log_id, last_log_term)) = last else {
        warn!(
            "No valid record in the newest WAL file {} of {} bytes, remove it",
            info.path, file_size
        );
        drop(f);
        fs::remove_file(&info.path)
            .context(|| format!("remove WAL file {}", info.path))?;
        return Ok(None);
    };

    if valid_end < file_size {
        warn!(
            "Truncate WAL file {} from {} to {} bytes, last valid log id: {}",
            info.path, file_size, valid_end, last_log_id
        );
        f.set_len(valid_end)
            .context(|| format!("truncate WAL file {}", info.path))?;
        f.sync_all()?;
    }

    info.last_log_id = last_log_id;
    info.last_log_term = last_log_term;
    info.size = valid_end;

    Ok(Some(info))
}

/// Keeps only the newest contiguous run of segments.
///
/// A segment that does not start right after the last log id of the previous
/// one, or follows an empty one, marks a break; every segment before the last
/// break is removed.
pub(crate) fn retain_newest_contiguous(
    mut infos: Vec<WalFileInfo>,
) -> Vec<WalFileInfo> {
    let mut keep_from = 0;

    for i in 1..infos.len() {
        let prev = &infos[i - 1];
        let curr = &infos[i];

        if !prev.has_records() || curr.first_log_id != prev.last_log_id + 1 {
            warn!(
                "Gap between WAL files: {} ends at {}, {} starts at {}",
                prev.path, prev.last_log_id, curr.path, curr.first_log_id
            );
            keep_from = i;
        }
    }

    for discarded in infos.drain(..keep_from) {
        warn!(
            "Discard WAL file {} before the newest contiguous run: [{}, {}]",
            discarded.path, discarded.first_log_id, discarded.last_log_id
        );

        if let Err(e) = fs::remove_file(&discarded.path) {
            error!("Failed to remove WAL file {}: {}", discarded.path, e);
        }
    }

    infos
}

/// Finds the record of `log_id` in a segment and returns the offset right
/// after it, along with its term.
pub(crate) fn find_record_end(
    config: &Config,
    info: &WalFileInfo,
    log_id: LogId,
) -> Result<(u64, TermId), io::Error> {
    let f = File::open(&info.path)
        .context(|| format!("open WAL file {}", info.path))?;

    for res in headers_iter(config, &f, info.size, &info.path) {
        let (start, size, FramedHeader(header)) = res?;
        if header.log_id == log_id {
            return Ok((start + size, header.term));
        }
    }

    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("log id {} not found in {}", log_id, info.path),
    ))
}

/// Creates a new segment file for appending.
///
/// A leftover file with the same name, which was not recognized as a valid
/// segment, is overwritten.
pub(crate) fn create_wal_file(
    config: &Config,
    first_log_id: LogId,
) -> Result<(File, WalFileInfo), io::Error> {
    let path = config.wal_path(first_log_id);

    let f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .context(|| format!("create WAL file {}", path))?;

    info!("Created WAL file: {}", path);

    Ok((f, WalFileInfo::new(path, first_log_id)))
}

/// Opens an existing segment file for appending at its end.
pub(crate) fn open_for_append(path: &str) -> Result<File, io::Error> {
    OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .context(|| format!("open WAL file {} for append", path))
}

/// Reads every record in a segment file, stopping at the first error.
#[allow(clippy::type_complexity)]
pub(crate) fn dump_records(
    config: &Config,
    path: &str,
) -> Result<Vec<Result<(u64, u64, LogRecord), io::Error>>, io::Error> {
    let f = File::open(path).context(|| format!("open WAL file {}", path))?;
    let size = f.metadata()?.len();

    let br = BufReader::with_capacity(
        config.read_buffer_size(),
        PositionedReader::new(&f, 0),
    );
    let it = RecordIterator::<_, LogRecord>::new(br, size, path);

    Ok(it.collect())
}

/// Reads one complete record starting at `offset`.
pub(crate) fn read_record_at(
    f: &File,
    offset: u64,
) -> Result<LogRecord, io::Error> {
    LogRecord::decode(PositionedReader::new(f, offset))
}

use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::dump_writer;
use crate::segment;
use crate::types::Segment;
use crate::Config;
use crate::LogRecord;

/// Dumps every record in the segment files of a WAL dir.
///
/// It reads the files directly and does not lock the dir, so it can inspect
/// a WAL that is in use by another process.
pub struct Dump {
    config: Arc<Config>,
}

impl Dump {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn write_to_string(&self) -> Result<String, io::Error> {
        let mut buf = Vec::new();
        self.write(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    pub fn write<W: io::Write>(&self, mut w: W) -> Result<(), io::Error> {
        writeln!(&mut w, "FileBasedWal:")?;
        self.write_with(w, dump_writer::multiline_string)
    }

    /// Writes every record with `write_record`, which receives the segment
    /// file name, the index of the record in the file, and the record or the
    /// error at which reading the file stopped.
    pub fn write_with<W: io::Write, D>(
        &self,
        mut w: W,
        write_record: D,
    ) -> Result<(), io::Error>
    where
        D: Fn(
            &mut W,
            &str,
            u64,
            Result<(Segment, LogRecord), io::Error>,
        ) -> Result<(), io::Error>,
    {
        let config = self.config.as_ref();

        for (_first_log_id, path) in segment::list_wal_files(config)? {
            let file_name = Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.clone());

            let records = segment::dump_records(config, &path)?;
            for (i, res) in records.into_iter().enumerate() {
                let res = res.map(|(start, size, rec)| {
                    (Segment::new(start, size), rec)
                });
                write_record(&mut w, &file_name, i as u64, res)?;
            }
        }
        Ok(())
    }
}

use std::fs::File;
use std::fs::OpenOptions;
use std::io;

use fs2::FileExt;
use log::info;

use crate::Config;

/// Exclusive lock of a WAL directory, held for the lifetime of a
/// `FileBasedWal`, so that a single process appends to the segments.
#[derive(Debug)]
pub(crate) struct FileLock {
    path: String,
    f: File,
}

impl FileLock {
    pub const LOCK_FILE_NAME: &'static str = "LOCK";

    pub(crate) fn new(config: &Config) -> Result<Self, io::Error> {
        let path = Self::lock_path(config);

        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        f.try_lock_exclusive().map_err(|e| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                format!(
                    "WAL directory '{}' is locked by another owner; error:({})",
                    config.dir, e
                ),
            )
        })?;

        info!("WAL directory lock acquired: {}", path);

        Ok(Self { path, f })
    }

    pub(crate) fn lock_path(config: &Config) -> String {
        format!("{}/{}", config.dir, Self::LOCK_FILE_NAME)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.f.unlock();
        info!("WAL directory lock released: {}", self.path);
    }
}

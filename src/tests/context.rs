use std::io;
use std::sync::Arc;

use tempfile::TempDir;

use crate::Config;
use crate::FileBasedWal;

pub(crate) fn new_testing() -> Result<(TestContext, FileBasedWal), io::Error> {
    let ctx = TestContext::new()?;
    let wal = ctx.new_wal()?;

    Ok((ctx, wal))
}

pub(crate) struct TestContext {
    pub(crate) config: Config,

    _temp_dir: TempDir,
}

impl TestContext {
    pub(crate) fn new() -> Result<TestContext, io::Error> {
        let temp_dir = tempfile::tempdir()?;

        let config = Config {
            dir: temp_dir.path().to_str().unwrap().to_string(),
            ..Default::default()
        };

        Ok(TestContext {
            config,
            _temp_dir: temp_dir,
        })
    }

    pub(crate) fn config(&self) -> Config {
        self.config.clone()
    }

    pub(crate) fn arc_config(&self) -> Arc<Config> {
        Arc::new(self.config.clone())
    }

    pub(crate) fn new_wal(&self) -> Result<FileBasedWal, io::Error> {
        FileBasedWal::open(self.arc_config())
    }

    /// First log ids of the segment files on disk.
    pub(crate) fn wal_files_on_disk(&self) -> Result<Vec<u64>, io::Error> {
        let files = crate::segment::list_wal_files(&self.config)?;
        Ok(files.into_iter().map(|(first, _path)| first).collect())
    }
}

/// Appends [`record`](crate::testing::record)s of `ids` to `wal`.
pub(crate) fn append_range(
    wal: &FileBasedWal,
    ids: impl IntoIterator<Item = u64>,
) -> Result<(), io::Error> {
    for id in ids {
        let rec = crate::testing::record(id);
        let ok = wal.append_log(rec.log_id, rec.term, rec.cluster_id, &rec.payload)?;
        assert!(ok, "append log {}", id);
    }
    Ok(())
}

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use raft_wal::Config;
use raft_wal::FileBasedWal;
use raft_wal::LogRecord;
use raft_wal::Records;
use raft_wal::Wal;
use tempfile::TempDir;

/// The expected content of the WAL.
#[derive(Default)]
struct Model {
    records: BTreeMap<u64, LogRecord>,
}

impl Model {
    fn append<W: Wal>(&mut self, wal: &W, rec: LogRecord) -> io::Result<()> {
        let ok = wal.append_log(
            rec.log_id,
            rec.term,
            rec.cluster_id,
            &rec.payload,
        )?;
        assert!(ok);
        self.records.insert(rec.log_id, rec);
        Ok(())
    }

    fn rollback<W: Wal>(&mut self, wal: &W, log_id: u64) -> io::Result<()> {
        wal.rollback_to_log(log_id)?;
        let _removed = self.records.split_off(&(log_id + 1));
        Ok(())
    }

    fn clean_before<W: Wal>(&mut self, wal: &W, log_id: u64) -> io::Result<()> {
        wal.clean_wal_before(log_id)?;
        let first = wal.first_log_id();
        self.records = self.records.split_off(&first);
        Ok(())
    }

    fn assert_matches<W: Wal>(&self, wal: &W) {
        let first = self.records.keys().next().copied().unwrap_or_default();
        let last = self.records.keys().last().copied().unwrap_or_default();

        assert_eq!(first, wal.first_log_id());
        assert_eq!(last, wal.last_log_id());

        let got = Records::new(wal.iterator(first, last)).collect::<Vec<_>>();
        let want = self.records.values().cloned().collect::<Vec<_>>();
        assert_eq!(want, got);
    }
}

fn record(round: u64, log_id: u64) -> LogRecord {
    LogRecord::new(log_id, round, log_id % 5, format!("data-{}-{}", round, log_id))
}

#[test]
fn test_massive_load() -> io::Result<()> {
    let temp_dir = TempDir::new()?;

    let config = Arc::new(Config {
        file_size: Some(4 * 1024),
        buffer_size: Some(2 * 1024),
        ..Config::new(temp_dir.path().to_string_lossy())
    });

    let mut model = Model::default();
    let mut log_id = 0u64;
    let mut purge_id = 0u64;

    // Reopen 3 times
    for round in 1..=3 {
        let wal = FileBasedWal::open(config.clone())?;
        model.assert_matches(&wal);

        for i in 1u64..500 {
            log_id += 1;
            model.append(&wal, record(round, log_id))?;

            if i % 13 == 0 {
                purge_id += 7;
                model.clean_before(&wal, purge_id)?;
            }

            // Replace the last few records with new ones
            if i % 97 == 0 {
                log_id -= 3;
                model.rollback(&wal, log_id)?;
            }

            if i % 50 == 0 {
                model.assert_matches(&wal);
            }
        }

        model.assert_matches(&wal);
    }

    let wal = FileBasedWal::open(config.clone())?;
    model.assert_matches(&wal);
    assert!(wal.first_log_id() > 1);

    Ok(())
}

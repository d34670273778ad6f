use std::io;
use std::sync::Arc;
use std::sync::Mutex;

use pretty_assertions::assert_eq;

use crate::errors::WalError;
use crate::testing::payload;
use crate::testing::read_all;
use crate::testing::record;
use crate::tests::context::append_range;
use crate::tests::context::new_testing;
use crate::tests::context::TestContext;
use crate::FileBasedWal;
use crate::LogRecord;

#[test]
fn test_append_contiguous() -> Result<(), io::Error> {
    let (_ctx, wal) = new_testing()?;

    assert_eq!(
        (0, 0, 0),
        (wal.first_log_id(), wal.last_log_id(), wal.last_log_term())
    );

    append_range(&wal, 1..=12)?;

    assert_eq!(1, wal.first_log_id());
    assert_eq!(12, wal.last_log_id());
    assert_eq!(1, wal.last_log_term());

    // Gap
    let err = wal.append_log(14, 1, 1, b"x").unwrap_err();
    assert!(matches!(err, WalError::NonContiguous(_)), "{}", err);
    assert!(!err.is_io());

    // Duplicate
    let err = wal.append_log(12, 1, 1, b"x").unwrap_err();
    assert!(matches!(err, WalError::NonContiguous(_)), "{}", err);

    assert_eq!(12, wal.last_log_id());
    assert_eq!(
        (1..=12).map(record).collect::<Vec<_>>(),
        read_all(wal.iterator(1, 12))
    );

    Ok(())
}

#[test]
fn test_append_starts_from_any_id() -> Result<(), io::Error> {
    let (ctx, wal) = new_testing()?;

    append_range(&wal, 100..=102)?;

    assert_eq!(100, wal.first_log_id());
    assert_eq!(102, wal.last_log_id());
    assert_eq!(10, wal.last_log_term());
    assert_eq!(vec![100], ctx.wal_files_on_disk()?);

    assert!(!wal.iterator(99, 102).valid());
    assert_eq!(payload(101), wal.iterator(101, 101).log_msg());

    Ok(())
}

#[test]
fn test_append_rejects_log_id_zero() -> Result<(), io::Error> {
    let (ctx, wal) = new_testing()?;

    for _ in 0..2 {
        let err = wal.append_log(0, 1, 1, b"zero").unwrap_err();
        assert!(matches!(err, WalError::InvalidLogId(_)), "{}", err);
        assert!(!err.is_io());

        assert_eq!((0, 0), (wal.first_log_id(), wal.last_log_id()));
        assert!(ctx.wal_files_on_disk()?.is_empty());
    }

    assert!(wal.append_log(7, 1, 1, b"seven")?);
    assert_eq!((7, 7), (wal.first_log_id(), wal.last_log_id()));

    // Log id 0 is rejected on a non-empty WAL too
    let err = wal.append_log(0, 1, 1, b"zero").unwrap_err();
    assert!(matches!(err, WalError::InvalidLogId(_)), "{}", err);

    drop(wal);

    let wal = ctx.new_wal()?;
    assert_eq!((7, 7), (wal.first_log_id(), wal.last_log_id()));
    assert_eq!(b"seven", wal.iterator(7, 7).log_msg());

    Ok(())
}

#[test]
fn test_append_logs_batch() -> Result<(), io::Error> {
    let (_ctx, wal) = new_testing()?;

    assert!(wal.append_logs((1..=5).map(record))?);
    assert_eq!(5, wal.last_log_id());

    // The batch stops at the first non-contiguous record
    let batch = vec![record(6), record(8), record(9)];
    let err = wal.append_logs(batch).unwrap_err();
    assert!(matches!(err, WalError::NonContiguous(_)));
    assert_eq!(6, wal.last_log_id());

    Ok(())
}

#[test]
fn test_pre_processor_rejects() -> Result<(), io::Error> {
    let ctx = TestContext::new()?;

    let seen = Arc::new(Mutex::new(vec![]));

    let wal = {
        let seen = seen.clone();
        FileBasedWal::open_with_pre_processor(
            ctx.arc_config(),
            move |log_id: u64, _term: u64, _cluster: u64, msg: &[u8]| {
                seen.lock().unwrap().push((log_id, msg.to_vec()));
                log_id != 3
            },
        )?
    };

    append_range(&wal, 1..=2)?;
    let size = wal.stat().files[0].size;

    let rec = record(3);
    assert!(!wal.append_log(3, rec.term, rec.cluster_id, &rec.payload)?);

    assert_eq!(2, wal.last_log_id());
    assert_eq!(size, wal.stat().files[0].size);
    assert!(!wal.iterator(3, 3).valid());

    assert_eq!(
        vec![(1, payload(1)), (2, payload(2)), (3, payload(3))],
        seen.lock().unwrap().clone()
    );

    // A rejected record in a batch stops it
    assert!(!wal.append_logs([record(3), record(4)])?);
    assert_eq!(2, wal.last_log_id());

    Ok(())
}

#[test]
fn test_stopped_wal_rejects_writes() -> Result<(), io::Error> {
    let (_ctx, wal) = new_testing()?;

    append_range(&wal, 1..=3)?;

    wal.stop();
    assert!(wal.is_stopped());

    let err = wal.append_log(4, 1, 1, b"x").unwrap_err();
    assert!(matches!(err, WalError::Stopped(_)));

    let err = wal.rollback_to_log(2).unwrap_err();
    assert!(matches!(err, WalError::Stopped(_)));

    // Reads still work
    assert_eq!(3, wal.last_log_id());
    assert_eq!(vec![record(2)], read_all(wal.iterator(2, 2)));

    Ok(())
}

#[test]
fn test_roll_segment_files() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;
    // Two 41-byte records per file
    ctx.config.file_size = Some(100);

    let wal = ctx.new_wal()?;
    append_range(&wal, 1..=9)?;

    let stat = wal.stat();
    let got = stat
        .files
        .iter()
        .map(|f| (f.first_log_id, f.last_log_id, f.size))
        .collect::<Vec<_>>();
    assert_eq!(
        vec![(1, 2, 82), (3, 4, 82), (5, 6, 82), (7, 8, 82), (9, 9, 41)],
        got
    );
    assert!(stat.files[2].path.ends_with("0000000000000000005.wal"));

    assert_eq!(vec![1, 3, 5, 7, 9], ctx.wal_files_on_disk()?);

    Ok(())
}

#[test]
fn test_record_larger_than_file_size() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;
    ctx.config.file_size = Some(100);

    let wal = ctx.new_wal()?;

    let big = vec![b'x'; 200];
    assert!(wal.append_log(1, 1, 1, &big)?);
    assert!(wal.append_log(2, 1, 1, &big)?);
    assert!(wal.append_log(3, 1, 1, b"small")?);

    // Each big record occupies a file by itself
    assert_eq!(vec![1, 2, 3], ctx.wal_files_on_disk()?);

    let got = read_all(wal.iterator(1, 3));
    assert_eq!(LogRecord::new(2, 1, 1, big.clone()), got[1]);
    assert_eq!(3, got.len());

    Ok(())
}

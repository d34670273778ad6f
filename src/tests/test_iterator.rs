use std::fs;
use std::io;

use pretty_assertions::assert_eq;

use crate::testing::read_all;
use crate::testing::record;
use crate::tests::context::append_range;
use crate::tests::context::TestContext;
use crate::LogIterator;
use crate::Records;

#[test]
fn test_fall_back_to_files_after_eviction() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;
    ctx.config.buffer_size = Some(4 * 1024);
    ctx.config.file_size = Some(8 * 1024);

    let wal = ctx.new_wal()?;

    let mut prev_first = 0;
    for id in 1..=1000 {
        append_range(&wal, id..=id)?;

        let first = wal.buffer().first_log_id();
        assert!(first >= prev_first);
        prev_first = first;
    }

    let buffer_first = wal.buffer().first_log_id();
    assert!(buffer_first > 1);
    assert_eq!(1000, wal.buffer().last_log_id());

    // Evicted from the buffer
    assert!(!wal.buffer().iterator(1, 1).valid());
    assert!(!wal.buffer().iterator(buffer_first - 1, 1000).valid());

    // But still readable from files
    assert_eq!(vec![record(1)], read_all(wal.iterator(1, 1)));
    assert_eq!(
        (1..=1000).map(record).collect::<Vec<_>>(),
        read_all(wal.iterator(1, 1000))
    );

    // Served by the buffer
    assert!(wal.buffer().iterator(buffer_first, 1000).valid());
    assert_eq!(
        (buffer_first..=1000).map(record).collect::<Vec<_>>(),
        read_all(wal.iterator(buffer_first, 2000))
    );

    Ok(())
}

#[test]
fn test_file_iterator_range() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;
    ctx.config.file_size = Some(100);

    {
        let wal = ctx.new_wal()?;
        append_range(&wal, 1..=10)?;
    }

    // Re-opened WAL has an empty buffer
    let wal = ctx.new_wal()?;

    assert_eq!(
        (3..=8).map(record).collect::<Vec<_>>(),
        read_all(wal.iterator(3, 8))
    );

    // `last` is capped at the last log id
    assert_eq!(
        (8..=10).map(record).collect::<Vec<_>>(),
        read_all(wal.iterator(8, 100))
    );

    assert!(!wal.iterator(11, 20).valid());
    assert!(!wal.iterator(0, 5).valid());
    assert!(!wal.iterator(5, 4).valid());

    let ids = Records::new(wal.iterator(4, 6))
        .map(|r| r.log_id)
        .collect::<Vec<_>>();
    assert_eq!(vec![4, 5, 6], ids);

    Ok(())
}

#[test]
fn test_file_iterator_survives_removed_files() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;
    ctx.config.file_size = Some(100);

    {
        let wal = ctx.new_wal()?;
        append_range(&wal, 1..=10)?;
    }

    let wal = ctx.new_wal()?;

    let mut it = wal.iterator(1, 10);
    assert_eq!(1, it.log_id());

    wal.clean_wal_before(9)?;
    assert_eq!(vec![9], ctx.wal_files_on_disk()?);

    // Files are opened when the iterator is created
    let mut got = vec![];
    while let Some(rec) = it.current() {
        got.push(rec.clone());
        it.next();
    }
    assert_eq!((1..=10).map(record).collect::<Vec<_>>(), got);

    Ok(())
}

#[test]
fn test_file_iterator_stops_at_corrupted_record() -> Result<(), io::Error> {
    let mut ctx = TestContext::new()?;
    ctx.config.file_size = Some(200);

    {
        let wal = ctx.new_wal()?;
        append_range(&wal, 1..=6)?;
    }

    // Damage the footer of log 2 in 1.wal
    let path = ctx.config.wal_path(1);
    let mut data = fs::read(&path)?;
    data[41 + 37] = 0xff;
    data[41 + 38] = 0xff;
    fs::write(&path, data)?;

    let wal = ctx.new_wal()?;
    assert_eq!(1, wal.first_log_id());

    let mut it = wal.iterator(1, 6);
    assert!(it.valid());
    assert_eq!(1, it.log_id());

    it.next();
    assert!(!it.valid());
    assert!(it.error().is_some());

    // A range in the next file is not affected
    assert_eq!(
        (5..=6).map(record).collect::<Vec<_>>(),
        read_all(wal.iterator(5, 6))
    );

    // Locating a log after the damaged one fails
    let it = wal.iterator(3, 6);
    assert!(!it.valid());
    assert_eq!(
        Some(io::ErrorKind::InvalidData),
        it.error().map(|e| e.kind())
    );

    Ok(())
}

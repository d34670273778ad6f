use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use raft_wal::Config;
use raft_wal::FileBasedWal;
use raft_wal::LogIterator;

/// Appends records to a WAL and reports the throughput.
///
/// Usage:
/// cargo run --release --bin raft-wal-bench -- --dir /tmp/wal-bench -n 100000
#[derive(Clone, Debug, PartialEq, Eq, clap::Parser)]
#[clap(about = "benchmark appending to a WAL", author)]
pub struct Args {
    /// WAL dir, it must not hold a WAL yet
    #[arg(long, value_name = "PATH")]
    dir: PathBuf,

    /// Number of records to append
    #[arg(short, default_value_t = 100_000)]
    n: u64,

    /// Payload size of each record in bytes
    #[arg(long, default_value_t = 100)]
    size: usize,

    /// Sync every append to disk
    #[arg(long)]
    sync: bool,

    /// Number of records between two progress reports
    #[arg(long, default_value_t = 10_000, value_parser = clap::value_parser!(u64).range(1..))]
    step: u64,
}

fn main() -> Result<(), io::Error> {
    let args = Args::parse();

    fs::create_dir_all(&args.dir)?;

    let config = Config {
        sync: Some(args.sync),
        ..Config::new(args.dir.to_string_lossy())
    };

    let wal = FileBasedWal::open(Arc::new(config))?;

    let first = wal.last_log_id() + 1;
    let payload = vec![b'x'; args.size];

    let started = Instant::now();
    let mut step_started = Instant::now();

    for log_id in first..first + args.n {
        wal.append_log(log_id, 1, 0, &payload)?;

        let appended = log_id - first + 1;
        if appended % args.step == 0 {
            let elapsed = step_started.elapsed();
            println!(
                "appended: {}, elapsed: {:?}, {:?}/op, {} ops/ms",
                appended,
                elapsed,
                elapsed / (args.step as u32),
                args.step / (elapsed.as_millis() as u64 + 1)
            );
            step_started = Instant::now();
        }
    }

    let elapsed = started.elapsed();
    let total_bytes = args.n * (args.size as u64 + 32);
    println!(
        "total: {} records, {:?}, {} ops/s, {:.2} MiB/s",
        args.n,
        elapsed,
        args.n * 1000 / (elapsed.as_millis() as u64 + 1),
        total_bytes as f64 / 1024.0 / 1024.0 / elapsed.as_secs_f64()
    );

    let started = Instant::now();
    let mut it = wal.iterator(first, first + args.n - 1);
    let mut read = 0u64;
    while it.valid() {
        read += 1;
        it.next();
    }
    println!("read back: {} records, {:?}", read, started.elapsed());

    println!("{:#}", wal.stat());

    Ok(())
}

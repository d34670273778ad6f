use std::io;
use std::io::stdout;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use raft_wal::Config;
use raft_wal::Dump;

#[derive(Clone, Debug, PartialEq, Eq, clap::Parser)]
#[clap(about = "dump the segment files of a WAL dir", author)]
pub struct Args {
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

fn main() -> Result<(), io::Error> {
    let args = Args::parse();

    let config = Config::new(args.path.to_string_lossy());

    Dump::new(Arc::new(config)).write(stdout())?;

    Ok(())
}

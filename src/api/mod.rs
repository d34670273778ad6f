//! Interfaces a consensus layer programs against.

pub mod log_iterator;
pub mod pre_processor;
pub mod wal;

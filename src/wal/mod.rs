pub(crate) mod dump;
pub(crate) mod file_based_wal;
pub(crate) mod file_iterator;
pub(crate) mod stat;

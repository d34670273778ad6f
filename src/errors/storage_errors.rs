#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(thiserror::Error)]
#[error("Invalid WAL file name: {bad_file_name}: {reason}")]
pub struct InvalidWalFileName {
    pub bad_file_name: String,
    pub reason: String,
}

impl InvalidWalFileName {
    pub fn new(bad_file_name: impl ToString, reason: impl ToString) -> Self {
        Self {
            bad_file_name: bad_file_name.to_string(),
            reason: reason.to_string(),
        }
    }
}

use std::format;

use crate::errors::InvalidWalFileName;

/// Configuration for the file based WAL.
///
/// This struct holds the WAL directory and the policy that controls segment
/// rolling, the in-memory buffer capacity, durability and retention.
///
/// Optional parameters are `Option<T>` in this struct, and default values is
/// evaluated when a getter method is called.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Base directory for storing WAL segment files
    pub dir: String,

    /// Maximum size of a segment file in bytes before rolling to a new one
    pub file_size: Option<usize>,

    /// Capacity in bytes of the in-memory log buffer
    pub buffer_size: Option<usize>,

    /// Whether every append is synced to disk before returning
    pub sync: Option<bool>,

    /// Segments not modified for this many seconds are removed by
    /// `clean_wal()`
    pub ttl_secs: Option<u64>,

    /// Size of the read buffer used when scanning segment files
    pub read_buffer_size: Option<usize>,
}

impl Config {
    /// Creates a new Config with the specified directory and default values for
    /// other fields
    pub fn new(dir: impl ToString) -> Self {
        Self {
            dir: dir.to_string(),
            ..Default::default()
        }
    }

    /// Creates a new Config with all the policy parameters
    pub fn new_full(
        dir: impl ToString,
        file_size: Option<usize>,
        buffer_size: Option<usize>,
        sync: Option<bool>,
        ttl_secs: Option<u64>,
    ) -> Self {
        Self {
            dir: dir.to_string(),
            file_size,
            buffer_size,
            sync,
            ttl_secs,
            read_buffer_size: None,
        }
    }

    /// Returns the maximum size of a segment file (defaults to 16MB)
    pub fn file_size(&self) -> usize {
        self.file_size.unwrap_or(16 * 1024 * 1024)
    }

    /// Returns the capacity of the in-memory buffer (defaults to 8MB)
    pub fn buffer_size(&self) -> usize {
        self.buffer_size.unwrap_or(8 * 1024 * 1024)
    }

    /// Returns whether to sync on every append (defaults to false)
    pub fn sync(&self) -> bool {
        self.sync.unwrap_or(false)
    }

    /// Returns the retention TTL in seconds (defaults to 4 hours)
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs.unwrap_or(14_400)
    }

    /// Returns the size of the scan read buffer (defaults to 64KB)
    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size.unwrap_or(64 * 1024)
    }

    /// Returns the full path of the segment starting at `first_log_id`
    pub fn wal_path(&self, first_log_id: u64) -> String {
        let file_name = Self::wal_file_name(first_log_id);
        format!("{}/{}", self.dir, file_name)
    }

    /// Generates the file name for a segment starting at `first_log_id`
    ///
    /// The file name format is "{zero_padded_first_log_id}.wal", 19 digits so
    /// that names sort in log id order.
    pub(crate) fn wal_file_name(first_log_id: u64) -> String {
        format!("{:019}.wal", first_log_id)
    }

    /// Parses a segment file name and returns the first log id in it.
    ///
    /// Any non-empty run of ascii digits followed by ".wal" is accepted.
    pub(crate) fn parse_wal_file_name(
        file_name: &str,
    ) -> Result<u64, InvalidWalFileName> {
        let stem = file_name.strip_suffix(".wal").ok_or_else(|| {
            InvalidWalFileName::new(file_name, "has no '.wal' suffix")
        })?;

        if stem.is_empty() || !stem.chars().all(|c| c.is_ascii_digit()) {
            return Err(InvalidWalFileName::new(
                file_name,
                "stem is not all digits",
            ));
        }

        stem.parse::<u64>().map_err(|e| {
            InvalidWalFileName::new(
                file_name,
                format!("cannot parse as u64: {}", e),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn test_wal_file_name() {
        assert_eq!(Config::wal_file_name(0), "0000000000000000000.wal");
        assert_eq!(Config::wal_file_name(1_024), "0000000000000001024.wal");

        let config = Config::new("/tmp/foo");
        assert_eq!(config.wal_path(7), "/tmp/foo/0000000000000000007.wal");
    }

    #[test]
    fn test_parse_wal_file_name() {
        assert_eq!(
            Config::parse_wal_file_name("0000000000000001024.wal"),
            Ok(1024)
        );
        assert_eq!(Config::parse_wal_file_name("17.wal"), Ok(17));

        assert!(Config::parse_wal_file_name("17.wall").is_err());
        assert!(Config::parse_wal_file_name(".wal").is_err());
        assert!(Config::parse_wal_file_name("r-17.wal").is_err());
        assert!(Config::parse_wal_file_name("LOCK").is_err());
        assert!(
            Config::parse_wal_file_name("99999999999999999999999.wal").is_err()
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::new("x");
        assert_eq!(config.file_size(), 16 * 1024 * 1024);
        assert_eq!(config.buffer_size(), 8 * 1024 * 1024);
        assert!(!config.sync());
        assert_eq!(config.ttl_secs(), 14_400);
    }
}

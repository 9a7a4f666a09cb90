//! Registry hive access for Shimcache/Amcache/SRUM (spec §4.6, §4.7): a thin
//! `Parser` over the `Registry` collaborator (spec §6), grounded on the
//! donor's `notatin`-backed `file/hve/mod.rs` `Parser`.

use std::path::Path;

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;

pub mod amcache;
pub mod registry;
pub mod shimcache;
pub mod srum;

use registry::{Key, Opener, Registry};

pub struct Parser {
    registry: Box<dyn Registry>,
}

impl Parser {
    pub fn load(path: &Path, opener: Opener) -> Result<Self> {
        Ok(Self { registry: opener(path)? })
    }

    /// Resolve `path`, turning an absent key into an error (most call sites
    /// treat a missing key in a hive they expected to contain it as fatal).
    fn key(&mut self, path: &str) -> Result<Box<dyn Key>> {
        self.registry
            .get_key(path)?
            .ok_or_else(|| anyhow!("registry key '{path}' not found"))
    }
}

/// FILETIME (100ns intervals since 1601-01-01) to a naive UTC datetime
/// (spec §4.6). The epoch offset is the number of such intervals between
/// 1601-01-01 and 1970-01-01.
pub fn win32_ts_to_datetime(ts_win32: u64) -> Result<NaiveDateTime> {
    const EPOCH_DIFF_100NS: u64 = 116_444_736_000_000_000;
    let unix_100ns = ts_win32
        .checked_sub(EPOCH_DIFF_100NS)
        .ok_or_else(|| anyhow!("FILETIME {ts_win32} predates the Unix epoch"))?;
    let unix_ms = (unix_100ns / 10_000) as i64;
    NaiveDateTime::from_timestamp_millis(unix_ms)
        .ok_or_else(|| anyhow!("FILETIME {ts_win32} out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win32_epoch_converts_to_unix_epoch() {
        let dt = win32_ts_to_datetime(116_444_736_000_000_000).unwrap();
        assert_eq!(dt.and_utc().timestamp(), 0);
    }

    #[test]
    fn pre_epoch_filetime_is_an_error() {
        assert!(win32_ts_to_datetime(0).is_err());
    }
}

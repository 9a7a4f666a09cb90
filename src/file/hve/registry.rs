//! Registry (HVE) collaborator interface (spec §6): the Shimcache/Amcache/
//! SRUM decoders read a hive through this trait instead of depending on a
//! concrete hive-parsing crate directly, mirroring the Reader/Decoders split
//! in `file/reader.rs`. No implementation lives in this crate.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// A single registry value, already detached from its key.
pub trait Value {
    fn as_string(&self) -> Option<String>;
    fn as_u32(&self) -> Option<u32>;
    fn as_u64(&self) -> Option<u64>;
    fn as_i64(&self) -> Option<i64>;
    fn as_binary(&self) -> Option<Vec<u8>>;
    fn as_multi_string(&self) -> Option<Vec<String>>;
}

/// A resolved registry key. `path` echoes the backslash-joined path it was
/// resolved at, so a caller can address `{key.path()}\{name}` to descend
/// into a named subkey without the registry re-walking from its root.
pub trait Key {
    fn path(&self) -> &str;
    fn name(&self) -> &str;
    fn subkey_names(&self) -> Vec<String>;
    /// Names of every value directly under this key, for callers (e.g. the
    /// SRUM registry glue) that enumerate a key's values rather than
    /// looking one up by a known name.
    fn value_names(&self) -> Vec<String>;
    fn last_modified(&self) -> DateTime<Utc>;
    fn get_value(&self, name: &str) -> Option<Box<dyn Value>>;
}

/// A loaded hive. Resolves a backslash-separated key path, returning `None`
/// when any component along the path is absent.
pub trait Registry {
    fn get_key(&mut self, path: &str) -> Result<Option<Box<dyn Key>>>;
}

/// A hive constructor: opens `path` and returns a boxed `Registry`.
pub type Opener = fn(&Path) -> Result<Box<dyn Registry>>;

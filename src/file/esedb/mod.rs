//! ESEDB collaborator interface (spec §6): used by the SRUM analyser to read
//! `SRUDB.dat` without this crate depending on a concrete ESE-database
//! parsing crate, mirroring the Reader/Registry split. Grounded on the
//! donor's `libesedb`-backed `file/esedb/mod.rs`.

use std::path::Path;

use anyhow::Result;
use serde_json::Map as JsonMap;
use serde_json::Value as Json;

pub mod srum;

/// One ESE table row, tagged with a `Table` entry identifying its source
/// table (spec §6).
pub type Record = JsonMap<String, Json>;

/// A loaded ESE database.
pub trait Database {
    fn records(&mut self) -> Result<Vec<Record>>;
}

/// An ESE database constructor: opens `path` and returns a boxed `Database`.
pub type Opener = fn(&Path) -> Result<Box<dyn Database>>;

pub struct Parser {
    database: Box<dyn Database>,
    entries: Vec<Record>,
}

impl Parser {
    pub fn load(path: &Path, opener: Opener) -> Result<Self> {
        Ok(Self { database: opener(path)?, entries: Vec::new() })
    }

    /// Parse every table's records, caching them for `parse_sru_db_id_map_table`.
    pub fn parse(&mut self) -> Result<Vec<Record>> {
        let entries = self.database.records()?;
        self.entries = entries.clone();
        Ok(entries)
    }
}

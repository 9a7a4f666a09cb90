//! `SruDbIdMapTable` resolution (spec §6, §4.7): maps a SRUM record's
//! numeric `AppId`/`UserId` reference onto its blob, keyed by `IdIndex`.
//! Grounded on the donor's `file/esedb/srum.rs`.

use std::collections::HashMap;

use anyhow::{Context, Result};

#[derive(Debug)]
pub struct SruDbIdMapTableEntry {
    pub id_type: i8,
    pub id_index: i32,
    pub id_blob: Option<Vec<u8>>,
    pub id_blob_as_string: Option<String>,
}

impl super::Parser {
    pub fn parse_sru_db_id_map_table(&self) -> Result<HashMap<String, SruDbIdMapTableEntry>> {
        let table_entries = self.entries.iter().filter(|entry| {
            entry
                .get("Table")
                .and_then(|v| v.as_str())
                .is_some_and(|name| name == "SruDbIdMapTable")
        });

        let mut mapped_table_entries = HashMap::new();

        for table_entry in table_entries {
            let id_blob: Option<Vec<u8>> = match table_entry.get("IdBlob") {
                Some(value) if !value.is_null() => Some(
                    serde_json::from_value(value.clone())
                        .with_context(|| "unable to get IdBlob from SruDbIdMapTable")?,
                ),
                _ => None,
            };

            let mut entry = SruDbIdMapTableEntry {
                id_type: serde_json::from_value(table_entry["IdType"].clone())
                    .with_context(|| "unable to get IdType from SruDbIdMapTable")?,
                id_index: serde_json::from_value(table_entry["IdIndex"].clone())
                    .with_context(|| "unable to get IdIndex from SruDbIdMapTable")?,
                id_blob,
                id_blob_as_string: None,
            };

            // Id type 3 is a Windows SID, kept binary; everything else is a
            // name string, possibly NUL-padded.
            if entry.id_type != 3 {
                if let Some(id_blob) = &entry.id_blob {
                    let s = String::from_utf8_lossy(id_blob).replace('\u{0000}', "");
                    entry.id_blob_as_string = Some(s);
                }
            }

            mapped_table_entries.insert(entry.id_index.to_string(), entry);
        }
        Ok(mapped_table_entries)
    }
}

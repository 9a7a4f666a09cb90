//! Amcache (`Root\InventoryApplication[File]` / legacy `Root\Programs`,`Root\File`)
//! decoder (spec §4.6, Amcache enrichment). Grounded on the donor's
//! `file/hve/amcache.rs`.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use super::registry::Key;
use super::win32_ts_to_datetime;

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub file_id: Option<String>,
    pub key_last_modified_ts: DateTime<Utc>,
    pub file_last_modified_ts: Option<DateTime<Utc>>,
    pub link_date: Option<DateTime<Utc>>,
    pub path: String,
    pub program_id: Option<String>,
    pub sha1_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProgramEntry {
    pub install_date: Option<DateTime<Utc>>,
    pub uninstall_date: Option<DateTime<Utc>>,
    pub last_modified_ts: DateTime<Utc>,
    pub program_id: String,
    pub program_name: String,
    pub version: String,
    pub root_directory_path: Option<String>,
    pub uninstall_string: Option<String>,
}

#[derive(Debug)]
pub struct AmcacheArtefact {
    pub file_entries: Vec<FileEntry>,
    pub program_entries: Vec<ProgramEntry>,
}

fn string_value(key: &dyn Key, name: &str) -> Result<Option<String>> {
    let Some(value) = key.get_value(name) else { return Ok(None) };
    match value.as_string() {
        Some(s) => Ok(Some(s)),
        None => bail!("value '{name}' in key '{}' was not a string", key.path()),
    }
}

/// FileId/sha1_hash extraction: FileId is the file's SHA-1 hash with a
/// "0000" prefix.
fn sha1_from_file_id(file_id: &Option<String>) -> Option<String> {
    file_id.as_ref().and_then(|id| {
        if id.len() == 44 && &id[..4] == "0000" { Some(String::from(&id[4..])) } else { None }
    })
}

fn win_reg_str_ts_to_date_time(ts_str: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(ts_str, "%m/%d/%Y %H:%M:%S")?;
    Ok(Utc.from_utc_datetime(&naive))
}

fn unix_ts_from_key(key: &dyn Key, name: &str) -> Result<Option<DateTime<Utc>>> {
    let Some(value) = key.get_value(name) else { return Ok(None) };
    if let Some(num) = value.as_u32() {
        if num == 0 {
            return Ok(None);
        }
        return Ok(Some(
            DateTime::from_timestamp(num as i64, 0).ok_or_else(|| anyhow!("unix timestamp out of range"))?,
        ));
    }
    if let Some(num) = value.as_u64() {
        if num == 0 {
            return Ok(None);
        }
        return Ok(Some(
            DateTime::from_timestamp(num as i64, 0).ok_or_else(|| anyhow!("unix timestamp out of range"))?,
        ));
    }
    bail!("value '{name}' in key '{}' was not a u32 or u64", key.path());
}

impl super::Parser {
    pub fn parse_amcache(&mut self) -> Result<AmcacheArtefact> {
        let mut program_entries: Vec<ProgramEntry> = Vec::new();
        let mut file_entries: Vec<FileEntry> = Vec::new();

        let is_new_format = self.registry.get_key(r"Root\InventoryApplicationFile")?.is_some();

        if is_new_format {
            let key_inventory_application = self.key(r"Root\InventoryApplication")?;
            for name in key_inventory_application.subkey_names() {
                let path = format!("{}\\{name}", key_inventory_application.path());
                let key = self.key(&path)?;

                let last_modified_ts = key.last_modified();
                let program_id = key.name().to_string();
                let program_name = string_value(&*key, "Name")?
                    .ok_or_else(|| anyhow!("could not get Name for program {program_id}"))?;
                let version = string_value(&*key, "Version")?
                    .ok_or_else(|| anyhow!("could not get Version for program {program_id}"))?;
                let install_date = match string_value(&*key, "InstallDate")?.as_deref() {
                    Some("") | None => None,
                    Some(v) => Some(win_reg_str_ts_to_date_time(v)?),
                };
                let root_directory_path = string_value(&*key, "RootDirPath")?;
                let uninstall_string = string_value(&*key, "UninstallString")?;

                program_entries.push(ProgramEntry {
                    install_date,
                    last_modified_ts,
                    program_id,
                    program_name,
                    root_directory_path,
                    uninstall_string,
                    uninstall_date: None,
                    version,
                });
            }

            let key_inventory_application_file = self.key(r"Root\InventoryApplicationFile")?;
            for name in key_inventory_application_file.subkey_names() {
                let path = format!("{}\\{name}", key_inventory_application_file.path());
                let key = self.key(&path)?;

                let program_id = string_value(&*key, "ProgramId")?;
                let file_id = string_value(&*key, "FileId")?;
                let file_path = string_value(&*key, "LowerCaseLongPath")?
                    .ok_or_else(|| anyhow!("could not get LowerCaseLongPath for file {}", key.name()))?;
                let link_date_str = string_value(&*key, "LinkDate")?
                    .ok_or_else(|| anyhow!("could not get LinkDate for file {}", key.name()))?;
                let link_date = if !link_date_str.is_empty() {
                    win_reg_str_ts_to_date_time(&link_date_str).ok()
                } else {
                    None
                };
                let sha1_hash = sha1_from_file_id(&file_id);
                let key_last_modified_ts = key.last_modified();

                file_entries.push(FileEntry {
                    program_id,
                    file_id,
                    path: file_path,
                    sha1_hash,
                    link_date,
                    key_last_modified_ts,
                    file_last_modified_ts: None,
                });
            }
        } else {
            let key_programs = self.key(r"Root\Programs")?;
            for name in key_programs.subkey_names() {
                let path = format!("{}\\{name}", key_programs.path());
                let key = self.key(&path)?;

                let last_modified_ts = key.last_modified();
                let program_id = key.name().to_string();
                let program_name = string_value(&*key, "0")?
                    .ok_or_else(|| anyhow!("could not get '0' (program_name) for {program_id}"))?;
                let version = string_value(&*key, "1")?
                    .ok_or_else(|| anyhow!("could not get '1' (version) for {program_id}"))?;
                let install_date = unix_ts_from_key(&*key, "a")?;
                let uninstall_date = unix_ts_from_key(&*key, "b")?;

                program_entries.push(ProgramEntry {
                    install_date,
                    last_modified_ts,
                    program_id,
                    program_name,
                    root_directory_path: None,
                    uninstall_date,
                    uninstall_string: None,
                    version,
                });
            }

            let key_file = self.key(r"Root\File")?;
            for volume_name in key_file.subkey_names() {
                let volume_path = format!("{}\\{volume_name}", key_file.path());
                let key_volume = self.key(&volume_path)?;
                for file_name in key_volume.subkey_names() {
                    let file_path_key = format!("{}\\{file_name}", key_volume.path());
                    let key_file_entry = self.key(&file_path_key)?;

                    let program_id = string_value(&*key_file_entry, "100")?;
                    let file_id = string_value(&*key_file_entry, "101")?;
                    let path = string_value(&*key_file_entry, "15")?.ok_or_else(|| {
                        anyhow!("could not get '15' (path) for file {}", key_file_entry.name())
                    })?;
                    let link_date = unix_ts_from_key(&*key_file_entry, "f")?;
                    let file_last_modified_ts = match key_file_entry.get_value("17").and_then(|v| v.as_u64())
                    {
                        Some(ts) => Some(win32_ts_to_datetime(ts)?.and_utc()),
                        None => None,
                    };
                    let sha1_hash = sha1_from_file_id(&file_id);
                    let key_last_modified_ts = key_file_entry.last_modified();

                    file_entries.push(FileEntry {
                        program_id,
                        file_id,
                        path,
                        sha1_hash,
                        link_date,
                        key_last_modified_ts,
                        file_last_modified_ts,
                    });
                }
            }
        }

        Ok(AmcacheArtefact { file_entries, program_entries })
    }
}

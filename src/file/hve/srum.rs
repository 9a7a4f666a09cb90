//! SOFTWARE hive SRUM registry glue (spec §4.7): reads the SRUM parameters,
//! extension, and per-user profile subkeys into `serde_json::Value` maps for
//! `analyse::srum` to enrich ESE records with. Grounded on the donor's
//! `analyse/srum.rs` call sites (`registry_parser.parse_srum_entries()`).

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value as Json};

use super::registry::{Key, Value};

#[derive(Debug)]
pub struct SrumRegInfo {
    pub global_parameters: Json,
    pub extensions: Json,
    pub user_info: Json,
}

/// Convert a registry value into its JSON representation, matching the
/// variant ordering the hive exposes (binary, then integer widths, then
/// string forms).
fn value_to_json(value: &dyn Value) -> Result<Json> {
    if let Some(s) = value.as_string() {
        return Ok(Json::String(s));
    }
    if let Some(list) = value.as_multi_string() {
        return Ok(json!(list));
    }
    if let Some(n) = value.as_u32() {
        return Ok(json!(n));
    }
    if let Some(n) = value.as_u64() {
        return Ok(json!(n));
    }
    if let Some(n) = value.as_i64() {
        return Ok(json!(n));
    }
    if let Some(bytes) = value.as_binary() {
        return serde_json::to_value(bytes)
            .context("unable to convert a binary SRUM registry value into a JSON array");
    }
    Ok(Json::Null)
}

fn string_value_from_key(key: &dyn Key, value_name: &str) -> Result<Option<String>> {
    match key.get_value(value_name) {
        Some(value) => Ok(Some(
            value.as_string().ok_or_else(|| anyhow!("value '{value_name}' in key '{}' was not a string", key.path()))?,
        )),
        None => Ok(None),
    }
}

impl super::Parser {
    pub fn parse_srum_entries(&mut self) -> Result<SrumRegInfo> {
        let key_srum_parameters =
            self.key(r"Microsoft\Windows NT\CurrentVersion\SRUM\Parameters")?;

        let mut global_parameters = json!({
            "Tier1Period": 60,
            "Tier2Period": 3600,
            "Tier2MaxEntries": 1440,
            "Tier2LongTermPeriod": 604800,
            "Tier2LongTermMaxEntries": 260
        });
        for name in key_srum_parameters.value_names() {
            if let Some(value) = key_srum_parameters.get_value(&name) {
                global_parameters[&name] = value_to_json(&*value)?;
            }
        }

        let key_srum_extensions =
            self.key(r"Microsoft\Windows NT\CurrentVersion\SRUM\Extensions")?;
        let mut extensions = json!({});
        for name in key_srum_extensions.subkey_names() {
            let path = format!("{}\\{name}", key_srum_extensions.path());
            let key = self.key(&path)?;
            let upper = name.to_uppercase();
            let mut entry = json!({});
            for value_name in key.value_names() {
                if let Some(value) = key.get_value(&value_name) {
                    entry[&value_name] = value_to_json(&*value)?;
                }
            }
            extensions[upper] = entry;
        }

        let key_profile_list =
            self.key(r"Microsoft\Windows NT\CurrentVersion\ProfileList")?;
        let mut user_info = json!({});
        for name in key_profile_list.subkey_names() {
            let path = format!("{}\\{name}", key_profile_list.path());
            let key = self.key(&path)?;

            let sid = match key.get_value("Sid").and_then(|v| v.as_binary()) {
                Some(bytes) => Json::String(bytes.iter().map(|byte| format!("{byte:02}")).collect()),
                None => Json::Null,
            };

            let profile_image_path = string_value_from_key(&*key, "ProfileImagePath")?
                .ok_or_else(|| anyhow!("could not get ProfileImagePath for {}", key.name()))?
                .replace('\\', "//");
            let username = match Path::new(&profile_image_path).file_name() {
                Some(filename) => Json::String(filename.to_str().unwrap_or_default().to_string()),
                None => Json::Null,
            };

            let guid_user = key.name().to_string();
            user_info[&guid_user] = json!({
                "GUID": guid_user,
                "SID": sid,
                "Username": username,
            });
        }

        Ok(SrumRegInfo { global_parameters, extensions, user_info })
    }
}

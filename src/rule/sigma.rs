//! Sigma YAML → τ compiler: header normalisation, rule collections, and
//! multi-document files (spec §4.3). Leaf modifier expansion and the
//! `condition:` grammar live in `super::detection`, shared with the
//! Chainsaw-native loader.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;

use crate::rule::{detection, Aggregate, Level, Status};
use crate::tau::{self, Detection};
use crate::value::Value;

/// A compiled Sigma rule (spec §3).
#[derive(Clone, Debug)]
pub struct Rule {
    pub name: String,
    pub description: String,
    pub authors: Vec<String>,
    pub level: Level,
    pub status: Status,
    pub falsepositives: Option<Vec<String>>,
    pub id: Option<String>,
    pub logsource: Option<LogSource>,
    pub references: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub aggregate: Option<Aggregate>,
    pub detection: Detection,
}

impl Rule {
    /// Self-inspection used by the hunt executor's precondition matching
    /// (spec §4.5: "matched ... against each Sigma rule's header").
    pub fn header_find(&self, key: &str) -> Option<Value> {
        match key {
            "title" => Some(Value::String(self.name.clone())),
            "level" => Some(Value::String(self.level.to_string())),
            "status" => Some(Value::String(self.status.to_string())),
            "id" => self.id.clone().map(Value::String),
            "logsource.category" => {
                self.logsource.as_ref()?.category.clone().map(Value::String)
            }
            "logsource.definition" => {
                self.logsource.as_ref()?.definition.clone().map(Value::String)
            }
            "logsource.product" => self.logsource.as_ref()?.product.clone().map(Value::String),
            "logsource.service" => self.logsource.as_ref()?.service.clone().map(Value::String),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct LogSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// The normalised header shared by every document in a rule collection.
#[derive(Clone)]
struct Base {
    description: String,
    status: Status,
    falsepositives: Option<Vec<String>>,
    id: Option<String>,
    logsource: Option<LogSource>,
    references: Option<Vec<String>>,
    tags: Option<Vec<String>>,
    authors: Vec<String>,
}

#[derive(Clone, Deserialize)]
struct RawHeader {
    title: String,
    description: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    falsepositives: Option<Vec<String>>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    logsource: Option<LogSource>,
    #[serde(default)]
    references: Option<Vec<String>>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Clone, Deserialize)]
struct RawDocument {
    #[serde(default)]
    detection: Option<serde_yaml::Mapping>,
    #[serde(default, flatten)]
    header: Option<RawHeader>,
    #[serde(default)]
    level: Option<String>,
}

fn normalise_status(status: Option<&str>) -> Status {
    match status {
        Some("stable") => Status::Stable,
        _ => Status::Experimental,
    }
}

fn normalise_level(level: Option<&str>) -> Level {
    match level {
        Some("critical") => Level::Critical,
        Some("high") => Level::High,
        Some("medium") => Level::Medium,
        Some("low") => Level::Low,
        _ => Level::Info,
    }
}

fn normalise_authors(author: Option<&str>) -> Vec<String> {
    match author {
        Some(author) => author.split(',').map(|a| a.trim().to_string()).collect(),
        None => vec!["unknown".to_string()],
    }
}

impl RawHeader {
    fn as_base(&self) -> Base {
        Base {
            description: self.description.clone(),
            status: normalise_status(self.status.as_deref()),
            falsepositives: self.falsepositives.clone(),
            id: self.id.clone(),
            logsource: self.logsource.clone(),
            references: self.references.clone(),
            tags: self.tags.clone(),
            authors: normalise_authors(self.author.as_deref()),
        }
    }
}

/// Load every rule found in `path` (spec §4.3 File shape): the file may
/// hold multiple YAML documents separated by `---`; if the first declares
/// `action: global` it is a rule collection whose later documents inherit
/// its header and extend its detection. Documents that fail to parse are
/// silently skipped; a file with no valid detections yields zero rules.
pub fn load(path: &Path) -> Result<Vec<Rule>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading rule '{}'", path.display()))?;
    let splitter = Regex::new(r"---\s*\n").expect("static regex");

    let mut documents: Vec<RawDocument> =
        splitter.split(&text).filter(|p| !p.is_empty()).filter_map(|p| serde_yaml::from_str(p).ok()).collect();

    if documents.is_empty() {
        return Ok(vec![]);
    }

    let main = documents.remove(0);
    let Some(header) = main.header.clone() else {
        bail!("rule '{}': missing header", path.display());
    };
    let name = header.title.clone();
    let base = header.as_base();
    let collection_level = main.level.clone();

    let mut rules = Vec::new();
    let mut is_single = documents.is_empty();

    if main.header.as_ref().and_then(|h| h.action.as_deref()) == Some("global") {
        for doc in documents {
            match doc.detection {
                Some(extension) => {
                    let merged = match &main.detection {
                        Some(base_det) => merge_detection(base_det, Some(&extension))?,
                        None => merge_detection(&extension, None)?,
                    };
                    let level = normalise_level(doc.level.as_deref().or(collection_level.as_deref()));
                    rules.push(compile_rule(&name, &base, level, &merged)?);
                }
                None => is_single = true,
            }
        }
    } else {
        is_single = true;
    }

    if is_single {
        if let Some(det) = &main.detection {
            let level = normalise_level(collection_level.as_deref());
            rules.push(compile_rule(&name, &base, level, det)?);
        }
    }

    Ok(rules)
}

fn compile_rule(
    name: &str,
    base: &Base,
    level: Level,
    detection: &serde_yaml::Mapping,
) -> Result<Rule> {
    let (raw_detection, aggregate) = detection::compile(name, detection)?;
    let compiled = tau::compile(raw_detection)?;
    Ok(Rule {
        name: name.to_string(),
        description: base.description.clone(),
        authors: base.authors.clone(),
        level,
        status: base.status.clone(),
        falsepositives: base.falsepositives.clone(),
        id: base.id.clone(),
        logsource: base.logsource.clone(),
        references: base.references.clone(),
        tags: base.tags.clone(),
        aggregate,
        detection: compiled,
    })
}

/// Merge a rule-collection extension's `detection:` block into the base
/// document's: the extension's `condition` wins if present, and its
/// identifier blocks extend (or, per key, merge into) the base's
/// (spec §4.3, rule collections).
fn merge_detection(
    base: &serde_yaml::Mapping,
    extra: Option<&serde_yaml::Mapping>,
) -> Result<serde_yaml::Mapping> {
    let Some(extra) = extra else { return Ok(base.clone()) };

    let mut merged = base.clone();
    if let Some(condition) = extra.get("condition") {
        merged.insert(Yaml::String("condition".to_string()), condition.clone());
    }

    for (key, value) in extra {
        let key_str = key.as_str().unwrap_or_default();
        if key_str == "condition" {
            continue;
        }
        match merged.get(key).cloned() {
            Some(Yaml::Mapping(mut existing)) => {
                if let Yaml::Mapping(addition) = value {
                    for (k, v) in addition {
                        existing.insert(k.clone(), v.clone());
                    }
                    merged.insert(key.clone(), Yaml::Mapping(existing));
                } else {
                    bail!("rule collection: cannot merge identifier '{key_str}'");
                }
            }
            Some(Yaml::Sequence(sequence)) => {
                if let Yaml::Mapping(addition) = value {
                    let extended = sequence
                        .into_iter()
                        .map(|mut entry| {
                            if let Some(existing) = entry.as_mapping_mut() {
                                for (k, v) in addition {
                                    existing.insert(k.clone(), v.clone());
                                }
                            }
                            entry
                        })
                        .collect();
                    merged.insert(key.clone(), Yaml::Sequence(extended));
                } else {
                    bail!("rule collection: cannot merge identifier '{key_str}'");
                }
            }
            None => {
                merged.insert(key.clone(), value.clone());
            }
            Some(_) => bail!("rule collection: cannot merge identifier '{key_str}'"),
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Kind};
    use rustc_hash::FxHashMap;

    fn write_rule(text: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    fn doc(pairs: Vec<(&str, crate::value::Value)>) -> Document {
        let mut map = FxHashMap::default();
        for (k, v) in pairs {
            map.insert(k.to_string(), v);
        }
        Document::new(Kind::Json, crate::value::Value::Object(map))
    }

    #[test]
    fn loads_a_single_document_rule() {
        let file = write_rule(
            "title: Suspicious PowerShell\ndescription: test\nlevel: high\nauthors: dev\ndetection:\n  selection:\n    CommandLine|contains: ' -enc '\n  condition: selection\n",
        );
        let rules = load(file.path()).unwrap();
        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.level, Level::High);
        assert!(tau::matches(
            &rule.detection,
            &doc(vec![(
                "CommandLine",
                crate::value::Value::String("powershell -enc AAA".into())
            )])
        ));
    }

    #[test]
    fn malformed_document_is_silently_skipped() {
        let file = write_rule("not: [valid, yaml, :::\n");
        let rules = load(file.path()).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn missing_status_defaults_to_experimental() {
        let file = write_rule(
            "title: t\ndescription: d\ndetection:\n  selection:\n    EventID: 1\n  condition: selection\n",
        );
        let rules = load(file.path()).unwrap();
        assert_eq!(rules[0].status, Status::Experimental);
        assert_eq!(rules[0].level, Level::Info);
    }

    #[test]
    fn rule_collection_merges_extension_into_base() {
        let file = write_rule(
            "title: base\ndescription: d\naction: global\ndetection:\n  A:\n    X: i1\n  condition: A\n---\ndetection:\n  B:\n    Y: i2\n  condition: A and B\n",
        );
        let rules = load(file.path()).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(tau::matches(
            &rules[0].detection,
            &doc(vec![
                ("X", crate::value::Value::String("1".into())),
                ("Y", crate::value::Value::String("2".into())),
            ])
        ));
    }
}

//! Chainsaw-native rule schema → τ compiler (spec §3, §4.2).

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;

use crate::file::reader::Kind as FileKind;
use crate::rule::{detection, Aggregate, Level, Status};
use crate::tau::arena::Arena;
use crate::tau::expr::{BoolOp, Node};
use crate::tau::{self, kv, Detection};

/// A compiled Chainsaw-native rule.
#[derive(Clone, Debug)]
pub struct Rule {
    pub name: String,
    pub group: Option<String>,
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub kind: FileKind,
    pub level: Level,
    pub status: Status,
    pub timestamp: String,
    pub fields: Vec<Field>,
    pub filter: Detection,
    pub aggregate: Option<Aggregate>,
}

/// One entry of a rule's field mapper (spec §3, §4.4). `cast` and
/// `container` are mutually exclusive.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Field {
    pub name: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub cast: Option<Cast>,
    #[serde(default)]
    pub container: Option<Container>,
}

fn default_visible() -> bool {
    true
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cast {
    Int,
    Str,
    Flt,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Container {
    pub field: String,
    pub format: Format,
    #[serde(default)]
    pub kv_params: Option<KvParams>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Json,
    Kv,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct KvParams {
    pub delimiter: String,
    pub separator: String,
    #[serde(default)]
    pub trim: bool,
}

#[derive(Deserialize)]
struct Raw {
    #[serde(alias = "title")]
    name: String,
    group: Option<String>,
    description: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    kind: FileKind,
    level: Level,
    status: Status,
    timestamp: String,
    #[serde(default)]
    fields: Vec<Field>,
    filter: Yaml,
    #[serde(default)]
    aggregate: Option<Aggregate>,
}

/// Load and compile a Chainsaw-native rule from `path` (spec §4.2).
pub fn load(path: &Path) -> Result<Rule> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading rule '{}'", path.display()))?;
    let raw: Raw = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing rule '{}'", path.display()))?;

    for field in &raw.fields {
        if field.cast.is_some() && field.container.is_some() {
            bail!(
                "rule '{}': field '{}' cannot carry both 'cast' and 'container'",
                raw.name,
                field.name
            );
        }
    }

    let (raw_detection, filter_aggregate) = compile_filter(&raw.name, &raw.filter)?;
    let filter = tau::compile(raw_detection)?;
    let aggregate = raw.aggregate.or(filter_aggregate);

    Ok(Rule {
        name: raw.name,
        group: raw.group,
        description: raw.description,
        authors: raw.authors,
        kind: raw.kind,
        level: raw.level,
        status: raw.status,
        timestamp: raw.timestamp,
        fields: raw.fields,
        filter,
        aggregate,
    })
}

/// `filter` is either a scalar τ-KV string (one clause per line, AND
/// combined) or a mapping with `condition:` and named identifier blocks
/// using the same conventions as Sigma (spec §4.2, §4.3).
///
/// Shared with the hunt executor (spec §4.5), which compiles a mapping
/// group's `filter:` and a precondition's `filter:` through this same path.
pub(crate) fn compile_filter(name: &str, filter: &Yaml) -> Result<(Detection, Option<Aggregate>)> {
    match filter {
        Yaml::String(text) => {
            let clauses = kv::parse_kv(text).with_context(|| format!("rule '{name}': filter"))?;
            let mut tree = Arena::new();
            let children = clauses
                .iter()
                .map(|c| kv::lower(&mut tree, c))
                .collect::<Result<Vec<_>>>()?;
            let expression = match children.len() {
                1 => children[0],
                _ => tree.push(Node::BooleanGroup(BoolOp::And, children)),
            };
            Ok((Detection::new(tree, expression), None))
        }
        Yaml::Mapping(map) => detection::compile(name, map),
        other => bail!("rule '{name}': 'filter' must be a string or mapping, found {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Kind as DocKind};
    use crate::value::Value;
    use rustc_hash::FxHashMap;

    fn doc(pairs: Vec<(&str, Value)>) -> Document {
        let mut map = FxHashMap::default();
        for (k, v) in pairs {
            map.insert(k.to_string(), v);
        }
        Document::new(DocKind::Json, Value::Object(map))
    }

    #[test]
    fn scalar_filter_ands_every_clause() {
        let filter: Yaml =
            serde_yaml::from_str("\"EventID: 4104\\nImage: i*\\\\powershell.exe\"").unwrap();
        let (det, agg) = compile_filter("t", &filter).unwrap();
        assert!(agg.is_none());
        let compiled = tau::compile(det).unwrap();
        assert!(tau::matches(
            &compiled,
            &doc(vec![
                ("EventID", Value::Int64(4104)),
                ("Image", Value::String("C:\\powershell.exe".into())),
            ])
        ));
        assert!(!tau::matches(&compiled, &doc(vec![("EventID", Value::Int64(1))])));
    }

    #[test]
    fn field_rejects_cast_and_container_together() {
        let field = Field {
            name: "Image".into(),
            from: "Image".into(),
            to: "Image".into(),
            visible: true,
            cast: Some(Cast::Str),
            container: Some(Container {
                field: "Data".into(),
                format: Format::Json,
                kv_params: None,
            }),
        };
        assert!(field.cast.is_some() && field.container.is_some());
    }

    #[test]
    fn mapping_filter_compiles_via_shared_detection_compiler() {
        let filter: Yaml =
            serde_yaml::from_str("condition: selection\nselection:\n  EventID: 1\n").unwrap();
        let (det, _) = compile_filter("t", &filter).unwrap();
        let compiled = tau::compile(det).unwrap();
        assert!(tau::matches(&compiled, &doc(vec![("EventID", Value::Int64(1))])));
    }
}

//! Hunt executor (spec §4.5): pairs compiled rules with field mappers,
//! drives artefact documents through the Reader facade, evaluates each
//! hunt's filter and any rule preconditions, and records individual hits or
//! aggregation state. Grounded on the donor's `src/hunt.rs`.
//!
//! The donor's `preprocess` pass (a memory optimisation that shortens every
//! known field lookup to a byte-indexed cache before hunting starts) has no
//! observable contract in the specification and is not reproduced here.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHasher};
use serde::Deserialize;
use serde_yaml::Value as Yaml;
use smallvec::{smallvec, SmallVec};
use uuid::Uuid;

use crate::document::Document;
use crate::file::reader::{open, Decoders, Kind as FileKind, Reader};
use crate::mapper::Mapper;
use crate::rule::chainsaw::{compile_filter, Field};
use crate::rule::{Aggregate, Kind as RuleKind, Rule};
use crate::tau::{self, Detection, Pattern};

/// `{ for: {header_field: value}, filter }` — a hunt group precondition,
/// matched against each Sigma rule's header before its filter runs
/// (spec §4.5).
#[derive(Clone, Deserialize)]
pub struct Precondition {
    #[serde(rename = "for")]
    for_: HashMap<String, String>,
    filter: Yaml,
}

#[derive(Clone, Default, Deserialize)]
pub struct Extensions {
    #[serde(default)]
    preconditions: Option<Vec<Precondition>>,
}

/// One hunt within a mapping: its own field mapper, timestamp field, and
/// filter (spec §3 Mapping).
#[derive(Clone, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub fields: Vec<Field>,
    pub filter: Yaml,
    pub name: String,
    pub timestamp: String,
}

/// A mapping file: one or more groups sharing an artefact `kind`, the rule
/// kind they hunt with, and optional exclusions/preconditions (spec §3).
#[derive(Deserialize)]
pub struct Mapping {
    #[serde(default)]
    pub exclusions: HashSet<String>,
    #[serde(default)]
    pub extensions: Option<Extensions>,
    pub groups: Vec<Group>,
    pub kind: FileKind,
    pub rules: RuleKind,
}

/// A single non-aggregating rule firing against one document.
#[derive(Clone, Debug)]
pub struct Hit {
    pub hunt: Uuid,
    pub rule: Uuid,
    pub timestamp: NaiveDateTime,
}

/// The payload a detection carries (spec §3 Detections/Kind).
#[derive(Debug)]
pub enum Kind {
    Aggregate { documents: Vec<Document> },
    Individual { document: Document },
    Cached { kind: FileKind, path: PathBuf, offset: usize, size: usize },
}

/// One or more hits sharing a single document/aggregate group, plus its
/// payload (spec §3 Detections).
#[derive(Debug)]
pub struct Detections {
    pub hits: SmallVec<[Hit; 1]>,
    pub kind: Kind,
}

enum HuntKind {
    Group {
        exclusions: HashSet<Uuid>,
        filter: Detection,
        kind: RuleKind,
        preconditions: FxHashMap<Uuid, Detection>,
    },
    Rule {
        aggregate: Option<Aggregate>,
        filter: Detection,
    },
}

/// A single hunt: either a Chainsaw rule hunting on its own, or a mapping
/// group hunting every rule of its kind (spec §4.5 Build).
struct Hunt {
    id: Uuid,
    #[allow(dead_code)]
    group: String,
    kind: HuntKind,
    mapper: Mapper,
    timestamp: String,
    file: FileKind,
}

impl Hunt {
    fn is_aggregation(&self) -> bool {
        match &self.kind {
            HuntKind::Group { .. } => true,
            HuntKind::Rule { aggregate, .. } => aggregate.is_some(),
        }
    }
}

/// Resolve a `NaiveDateTime` window bound to UTC, honouring an explicit
/// timezone override or a "local time" flag (spec §4.5).
fn localise(ts: Option<NaiveDateTime>, timezone: Option<Tz>, local: bool) -> Result<Option<DateTime<Utc>>> {
    let Some(timestamp) = ts else { return Ok(None) };
    let resolved = if let Some(timezone) = timezone {
        timezone
            .from_local_datetime(&timestamp)
            .single()
            .ok_or_else(|| anyhow!("failed to localise timestamp '{timestamp}'"))?
            .with_timezone(&Utc)
    } else if local {
        Utc.from_local_datetime(&timestamp)
            .single()
            .ok_or_else(|| anyhow!("failed to localise timestamp '{timestamp}'"))?
    } else {
        Utc.from_utc_datetime(&timestamp)
    };
    Ok(Some(resolved))
}

#[derive(Default)]
pub struct HunterBuilder {
    mappings: Option<Vec<PathBuf>>,
    rules: Option<Vec<Rule>>,
    decoders: Option<Decoders>,

    from: Option<NaiveDateTime>,
    load_unknown: Option<bool>,
    local: Option<bool>,
    skip_errors: Option<bool>,
    timezone: Option<Tz>,
    to: Option<NaiveDateTime>,
}

impl HunterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decoders(mut self, decoders: Decoders) -> Self {
        self.decoders = Some(decoders);
        self
    }

    pub fn from(mut self, from: NaiveDateTime) -> Self {
        self.from = Some(from);
        self
    }

    pub fn load_unknown(mut self, load_unknown: bool) -> Self {
        self.load_unknown = Some(load_unknown);
        self
    }

    pub fn local(mut self, local: bool) -> Self {
        self.local = Some(local);
        self
    }

    pub fn mappings(mut self, mappings: Vec<PathBuf>) -> Self {
        self.mappings = Some(mappings);
        self
    }

    pub fn rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn skip_errors(mut self, skip_errors: bool) -> Self {
        self.skip_errors = Some(skip_errors);
        self
    }

    pub fn timezone(mut self, timezone: Tz) -> Self {
        self.timezone = Some(timezone);
        self
    }

    pub fn to(mut self, to: NaiveDateTime) -> Self {
        self.to = Some(to);
        self
    }

    /// Resolve rules and mappings into the hunt list (spec §4.5 Build):
    /// rules sort by name for stable id assignment, every Chainsaw rule
    /// becomes its own hunt, and every mapping group becomes a hunt against
    /// every loaded rule of the mapping's kind. A Chainsaw-kind mapping is a
    /// hard error — Chainsaw rules carry their own filter and don't pair
    /// with a mapping.
    pub fn build(self) -> Result<Hunter> {
        let mut hunts = vec![];

        cs_trace!("[*] Assigning rule ids...");
        let mut rules = self.rules.unwrap_or_default();
        rules.sort_by(|x, y| x.name().cmp(y.name()));
        let rules: BTreeMap<Uuid, Rule> = rules
            .into_iter()
            .map(|rule| {
                let id = Uuid::new_v4();
                if let Rule::Chainsaw(chainsaw) = &rule {
                    hunts.push(Hunt {
                        id,
                        group: chainsaw.group.clone().unwrap_or_default(),
                        kind: HuntKind::Rule {
                            aggregate: chainsaw.aggregate.clone(),
                            filter: chainsaw.filter.clone(),
                        },
                        mapper: Mapper::from(chainsaw.fields.clone()),
                        timestamp: chainsaw.timestamp.clone(),
                        file: chainsaw.kind,
                    });
                }
                (id, rule)
            })
            .collect();

        if let Some(mut mappings) = self.mappings {
            cs_trace!("[*] Loading mappings...");
            mappings.sort();
            for path in mappings {
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("reading mapping '{}'", path.display()))?;
                let mut mapping: Mapping = serde_yaml::from_str(&text)
                    .with_context(|| format!("parsing mapping '{}'", path.display()))?;

                if mapping.rules == RuleKind::Chainsaw {
                    bail!(
                        "mapping '{}': chainsaw rules carry their own filter and cannot be paired with a mapping",
                        path.display()
                    );
                }

                let preconditions = resolve_preconditions(&mapping, &rules)?;

                let mut exclusions = HashSet::new();
                for (id, rule) in &rules {
                    if mapping.exclusions.contains(rule.name()) {
                        exclusions.insert(*id);
                    }
                }

                let file = match mapping.kind {
                    // The reader facade exposes jsonl documents as json once
                    // decoded (`Kind::document_kind`); hunts key on that.
                    FileKind::Jsonl => FileKind::Json,
                    other => other,
                };

                mapping.groups.sort_by(|x, y| x.name.cmp(&y.name));
                for group in mapping.groups {
                    let (raw, _) = compile_filter(&group.name, &group.filter)?;
                    let filter = tau::compile(raw)?;
                    hunts.push(Hunt {
                        id: Uuid::new_v4(),
                        group: group.name,
                        kind: HuntKind::Group {
                            exclusions: exclusions.clone(),
                            filter,
                            kind: mapping.rules.clone(),
                            preconditions: preconditions.clone(),
                        },
                        mapper: Mapper::from(group.fields),
                        timestamp: group.timestamp,
                        file,
                    });
                }
            }
        }

        let from = localise(self.from, self.timezone, self.local.unwrap_or_default())?;
        let to = localise(self.to, self.timezone, self.local.unwrap_or_default())?;

        Ok(Hunter {
            inner: HunterInner {
                decoders: self.decoders,
                hunts,
                load_unknown: self.load_unknown.unwrap_or_default(),
                rules,
                skip_errors: self.skip_errors.unwrap_or_default(),
                from,
                to,
            },
        })
    }
}

/// Compile every precondition's filter and attach it to whichever Sigma
/// rule's header matches its `for:` fields (spec §4.5).
fn resolve_preconditions(mapping: &Mapping, rules: &BTreeMap<Uuid, Rule>) -> Result<FxHashMap<Uuid, Detection>> {
    let mut preconditions = FxHashMap::default();
    let Some(extensions) = &mapping.extensions else { return Ok(preconditions) };
    let Some(raw) = &extensions.preconditions else { return Ok(preconditions) };

    for precondition in raw {
        if precondition.for_.is_empty() {
            continue;
        }
        let (detection, _) = compile_filter("precondition", &precondition.filter)?;
        let compiled = tau::compile(detection)?;
        for (id, rule) in rules {
            let Rule::Sigma(sigma) = rule else { continue };
            let matched = precondition.for_.iter().all(|(field, value)| {
                sigma
                    .header_find(field)
                    .and_then(|v| v.to_display_string())
                    .as_deref()
                    == Some(value.as_str())
            });
            if matched {
                preconditions.insert(*id, compiled.clone());
            }
        }
    }
    Ok(preconditions)
}

struct HunterInner {
    decoders: Option<Decoders>,
    hunts: Vec<Hunt>,
    load_unknown: bool,
    rules: BTreeMap<Uuid, Rule>,
    skip_errors: bool,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

/// Drives one or more artefact files through every registered hunt,
/// producing detections (spec §4.5).
pub struct Hunter {
    inner: HunterInner,
}

impl Hunter {
    pub fn builder() -> HunterBuilder {
        HunterBuilder::new()
    }

    /// The set of file extensions this hunter's rules and hunts care about.
    pub fn extensions(&self) -> HashSet<String> {
        let mut extensions = HashSet::new();
        for rule in self.inner.rules.values() {
            if let Some(exts) = rule.types().extensions() {
                extensions.extend(exts.iter().map(|e| e.to_string()));
            }
        }
        for hunt in &self.inner.hunts {
            if let Some(exts) = hunt.file.extensions() {
                extensions.extend(exts.iter().map(|e| e.to_string()));
            }
        }
        extensions
    }

    pub fn hunts(&self) -> usize {
        self.inner.hunts.len()
    }

    pub fn rules(&self) -> &BTreeMap<Uuid, Rule> {
        &self.inner.rules
    }

    /// Whether any hunt accumulates state across documents rather than
    /// firing immediately.
    pub fn is_aggregation(&self) -> bool {
        self.inner.hunts.iter().any(Hunt::is_aggregation)
    }

    /// `true` when `timestamp` falls outside the configured time window
    /// (spec §4.5 step 2: boundaries are exclusive).
    fn skip(&self, timestamp: NaiveDateTime) -> bool {
        if self.inner.from.is_none() && self.inner.to.is_none() {
            return false;
        }
        let localised = Utc.from_utc_datetime(&timestamp);
        if let Some(from) = self.inner.from {
            if localised <= from {
                return true;
            }
        }
        if let Some(to) = self.inner.to {
            if localised >= to {
                return true;
            }
        }
        false
    }

    /// Resolve `file` to a reader via the registered decoders and hunt
    /// through it. `cache` is an open file to mirror every individual hit's
    /// document to as JSON (spec §4.5 step 3); `None` keeps hits inline.
    pub fn hunt(&self, file: &Path, cache: &Option<fs::File>) -> Result<Vec<Detections>> {
        let decoders = self
            .inner
            .decoders
            .as_ref()
            .ok_or_else(|| anyhow!("no decoders registered with this hunter"))?;
        let reader = open(file, decoders, self.inner.load_unknown, self.inner.skip_errors)?;
        self.hunt_reader(reader, file, cache)
    }

    fn hunt_reader(&self, reader: Box<dyn Reader>, file: &Path, cache: &Option<fs::File>) -> Result<Vec<Detections>> {
        let kind = reader.kind();

        let aggregates: Mutex<FxHashMap<(Uuid, Uuid), (&Aggregate, FxHashMap<u64, Vec<Uuid>>)>> =
            Mutex::new(FxHashMap::default());
        let documents: Mutex<FxHashMap<Uuid, (Document, NaiveDateTime)>> = Mutex::new(FxHashMap::default());

        let mut detections = reader
            .par_bridge()
            .filter_map(|document| self.hunt_document(document, kind, &aggregates, &documents))
            .collect::<Result<Vec<Detections>>>()?;

        // Aggregates finalise once the whole file is seen: a group fires
        // when its size matches `aggregate.count`, reporting the earliest
        // member timestamp (spec §4.5 Aggregation hash).
        let aggregates = aggregates.into_inner().expect("aggregate cache poisoned");
        let documents = documents.into_inner().expect("document cache poisoned");
        for ((hunt_id, rule_id), (aggregate, groups)) in aggregates {
            for ids in groups.values() {
                if !aggregate.count.matches(&crate::value::Value::Int64(ids.len() as i64)) {
                    continue;
                }
                let mut group_documents = Vec::with_capacity(ids.len());
                let mut timestamps = Vec::with_capacity(ids.len());
                for id in ids {
                    let (document, timestamp) = documents.get(id).expect("aggregated document missing");
                    group_documents.push(document.clone());
                    timestamps.push(*timestamp);
                }
                timestamps.sort();
                detections.push(Detections {
                    hits: smallvec![Hit { hunt: hunt_id, rule: rule_id, timestamp: timestamps[0] }],
                    kind: Kind::Aggregate { documents: group_documents },
                });
            }
        }

        // Cache-to-disk (spec §4.5 step 3): mirror each individual hit's
        // document to a JSON side file and replace its inline payload with
        // an offset/size reference. Aggregate detections already carry a
        // small, bounded document set and are kept inline either way.
        if let Some(cache_file) = cache {
            let mut writer = cache_file;
            let mut offset = 0usize;
            for detection in &mut detections {
                if let Kind::Individual { document } = &detection.kind {
                    let json = serde_json::to_string(&serde_json::Value::from(document.data.clone()))?;
                    writer.write_all(json.as_bytes())?;
                    let size = json.as_bytes().len();
                    detection.kind = Kind::Cached { kind, path: file.to_path_buf(), offset, size };
                    offset += size;
                }
            }
        }

        Ok(detections)
    }

    #[allow(clippy::type_complexity)]
    fn hunt_document<'a>(
        &'a self,
        document: Document,
        kind: FileKind,
        aggregates: &Mutex<FxHashMap<(Uuid, Uuid), (&'a Aggregate, FxHashMap<u64, Vec<Uuid>>)>>,
        documents: &Mutex<FxHashMap<Uuid, (Document, NaiveDateTime)>>,
    ) -> Option<Result<Detections>> {
        let document_id = Uuid::new_v4();
        let mut hits: SmallVec<[Hit; 1]> = smallvec![];

        for hunt in &self.inner.hunts {
            if hunt.file != kind {
                continue;
            }

            let mapped = hunt.mapper.apply(&document);

            let raw_timestamp = match mapped.find(&hunt.timestamp).and_then(|v| v.to_display_string()) {
                Some(raw) => raw,
                None => continue,
            };
            let timestamp = match NaiveDateTime::parse_from_str(&raw_timestamp, "%Y-%m-%dT%H:%M:%S%.fZ") {
                Ok(timestamp) => timestamp,
                Err(e) => {
                    if self.inner.skip_errors {
                        cs_eyellowln!("failed to parse timestamp '{}' - {}", raw_timestamp, e);
                        continue;
                    }
                    return Some(Err(anyhow!("failed to parse timestamp '{}' - {}", raw_timestamp, e)));
                }
            };

            if self.skip(timestamp) {
                continue;
            }

            match &hunt.kind {
                HuntKind::Group { exclusions, filter, kind: rule_kind, preconditions } => {
                    if !tau::matches(filter, &mapped) {
                        continue;
                    }
                    for (rule_id, rule) in &self.inner.rules {
                        if !rule.is_kind(rule_kind) || exclusions.contains(rule_id) {
                            continue;
                        }
                        if let Some(precondition) = preconditions.get(rule_id) {
                            if !tau::matches(precondition, &mapped) {
                                continue;
                            }
                        }
                        if !rule.solve(&mapped) {
                            continue;
                        }
                        record_hit(
                            aggregates,
                            documents,
                            &document,
                            &mapped,
                            hunt.id,
                            *rule_id,
                            rule.aggregate(),
                            timestamp,
                            document_id,
                            &mut hits,
                        );
                    }
                }
                HuntKind::Rule { aggregate, filter } => {
                    if !tau::matches(filter, &mapped) {
                        continue;
                    }
                    record_hit(
                        aggregates,
                        documents,
                        &document,
                        &mapped,
                        hunt.id,
                        hunt.id,
                        aggregate,
                        timestamp,
                        document_id,
                        &mut hits,
                    );
                }
            }
        }

        if hits.is_empty() {
            return None;
        }

        Some(Ok(Detections { hits, kind: Kind::Individual { document } }))
    }
}

/// Either push an immediate `Hit`, or — for an aggregating rule — hash its
/// aggregate fields and accumulate the matching document id, stashing the
/// document itself for later retrieval once the group fires (spec §4.5
/// Aggregation hash). A document missing any aggregate field is excluded
/// from the group entirely.
#[allow(clippy::too_many_arguments)]
fn record_hit<'a>(
    aggregates: &Mutex<FxHashMap<(Uuid, Uuid), (&'a Aggregate, FxHashMap<u64, Vec<Uuid>>)>>,
    documents: &Mutex<FxHashMap<Uuid, (Document, NaiveDateTime)>>,
    document: &Document,
    mapped: &Document,
    hunt_id: Uuid,
    rule_id: Uuid,
    aggregate: &'a Option<Aggregate>,
    timestamp: NaiveDateTime,
    document_id: Uuid,
    hits: &mut SmallVec<[Hit; 1]>,
) {
    let Some(aggregate) = aggregate else {
        hits.push(Hit { hunt: hunt_id, rule: rule_id, timestamp });
        return;
    };

    let mut hasher = FxHasher::default();
    for field in &aggregate.fields {
        match mapped.find(field).and_then(|v| v.to_display_string()) {
            Some(value) => value.hash(&mut hasher),
            None => return,
        }
    }
    let group_id = hasher.finish();

    documents
        .lock()
        .expect("document cache poisoned")
        .entry(document_id)
        .or_insert_with(|| (document.clone(), timestamp));

    aggregates
        .lock()
        .expect("aggregate cache poisoned")
        .entry((hunt_id, rule_id))
        .or_insert_with(|| (aggregate, FxHashMap::default()))
        .1
        .entry(group_id)
        .or_default()
        .push(document_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Kind as DocKind;
    use crate::rule::chainsaw::{Container, Format, KvParams};
    use crate::rule::sigma;
    use crate::value::Value;
    use rustc_hash::FxHashMap as Map;

    fn json_doc(pairs: Vec<(&str, Value)>) -> Document {
        let mut map = Map::default();
        for (k, v) in pairs {
            map.insert(k.to_string(), v);
        }
        Document::new(DocKind::Json, Value::Object(map))
    }

    struct FixedReader {
        kind: FileKind,
        documents: std::vec::IntoIter<Document>,
    }

    impl Iterator for FixedReader {
        type Item = Document;
        fn next(&mut self) -> Option<Document> {
            self.documents.next()
        }
    }

    impl Reader for FixedReader {
        fn kind(&self) -> FileKind {
            self.kind
        }
    }

    fn reader(documents: Vec<Document>) -> Box<dyn Reader> {
        Box::new(FixedReader { kind: FileKind::Json, documents: documents.into_iter() })
    }

    fn chainsaw_rule(name: &str, field: &str, value: i64, aggregate: Option<Aggregate>) -> Rule {
        let filter: Yaml = serde_yaml::from_str(&format!("condition: s\ns:\n  {field}: {value}\n")).unwrap();
        let (raw, _) = compile_filter(name, &filter).unwrap();
        let filter = tau::compile(raw).unwrap();
        Rule::Chainsaw(crate::rule::chainsaw::Rule {
            name: name.to_string(),
            group: None,
            description: None,
            authors: vec![],
            kind: FileKind::Json,
            level: crate::rule::Level::Medium,
            status: crate::rule::Status::Stable,
            timestamp: "Timestamp".to_string(),
            fields: vec![],
            filter,
            aggregate,
        })
    }

    fn ts(event_id: i64, stamp: &str) -> Document {
        json_doc(vec![
            ("Timestamp", Value::String(stamp.to_string())),
            ("EventID", Value::Int64(event_id)),
        ])
    }

    #[test]
    fn chainsaw_rule_fires_an_individual_detection() {
        let rule = chainsaw_rule("r", "EventID", 4104, None);
        let hunter = Hunter::builder().rules(vec![rule]).build().unwrap();
        let doc = ts(4104, "2024-01-01T00:00:00.000000Z");
        let detections = hunter.hunt_reader(reader(vec![doc]), Path::new("a.json"), &None).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].hits.len(), 1);
        assert!(matches!(detections[0].kind, Kind::Individual { .. }));
    }

    #[test]
    fn aggregate_fires_once_group_reaches_threshold_and_reports_earliest_timestamp() {
        let aggregate = Aggregate { count: Pattern::Ge(3), fields: vec!["User".to_string()] };
        let rule = chainsaw_rule("agg", "EventID", 1, Some(aggregate));
        let hunter = Hunter::builder().rules(vec![rule]).build().unwrap();

        let docs = vec![
            json_doc(vec![("Timestamp", Value::String("2024-01-01T10:00:00.000000Z".into())), ("EventID", Value::Int64(1)), ("User", Value::String("alice".into()))]),
            json_doc(vec![("Timestamp", Value::String("2024-01-01T10:05:00.000000Z".into())), ("EventID", Value::Int64(1)), ("User", Value::String("alice".into()))]),
            json_doc(vec![("Timestamp", Value::String("2024-01-01T10:10:00.000000Z".into())), ("EventID", Value::Int64(1)), ("User", Value::String("alice".into()))]),
            json_doc(vec![("Timestamp", Value::String("2024-01-01T10:00:00.000000Z".into())), ("EventID", Value::Int64(1)), ("User", Value::String("bob".into()))]),
            json_doc(vec![("Timestamp", Value::String("2024-01-01T10:05:00.000000Z".into())), ("EventID", Value::Int64(1)), ("User", Value::String("bob".into()))]),
        ];

        let detections = hunter.hunt_reader(reader(docs), Path::new("a.json"), &None).unwrap();
        assert_eq!(detections.len(), 1);
        match &detections[0].kind {
            Kind::Aggregate { documents } => assert_eq!(documents.len(), 3),
            other => panic!("expected an aggregate detection, got {other:?}"),
        }
        assert_eq!(
            detections[0].hits[0].timestamp,
            NaiveDateTime::parse_from_str("2024-01-01T10:00:00.000000Z", "%Y-%m-%dT%H:%M:%S%.fZ").unwrap()
        );
    }

    #[test]
    fn time_window_excludes_boundary_timestamps() {
        let rule = chainsaw_rule("r", "EventID", 1, None);
        let from = NaiveDateTime::parse_from_str("2024-01-01T10:00:00.000000Z", "%Y-%m-%dT%H:%M:%S%.fZ").unwrap();
        let to = NaiveDateTime::parse_from_str("2024-01-01T11:00:00.000000Z", "%Y-%m-%dT%H:%M:%S%.fZ").unwrap();
        let hunter = Hunter::builder().rules(vec![rule]).from(from).to(to).build().unwrap();

        let docs = vec![
            ts(1, "2024-01-01T10:00:00.000000Z"),
            ts(1, "2024-01-01T11:00:00.000000Z"),
            ts(1, "2024-01-01T10:30:00.000000Z"),
        ];
        let detections = hunter.hunt_reader(reader(docs), Path::new("a.json"), &None).unwrap();
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn mapping_with_chainsaw_rules_is_rejected_at_build_time() {
        let path = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            path.path(),
            "kind: json\nrules: chainsaw\ngroups:\n  - name: g\n    timestamp: Timestamp\n    filter: \"EventID: 1\"\n    fields: []\n",
        )
        .unwrap();
        let err = Hunter::builder().mappings(vec![path.path().to_path_buf()]).build().unwrap_err();
        assert!(err.to_string().contains("chainsaw"));
    }

    #[test]
    fn sigma_mapping_pairs_every_rule_with_each_group() {
        let rule_text = "title: t\ndescription: d\nlevel: high\ndetection:\n  selection:\n    EventID: 4104\n  condition: selection\n";
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), rule_text).unwrap();
        let rules = sigma::load(file.path()).unwrap().into_iter().map(Rule::Sigma).collect();

        let mapping = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            mapping.path(),
            "kind: json\nrules: sigma\ngroups:\n  - name: g\n    timestamp: Timestamp\n    filter: \"EventID: *\"\n    fields: []\n",
        )
        .unwrap();

        let hunter = Hunter::builder()
            .rules(rules)
            .mappings(vec![mapping.path().to_path_buf()])
            .build()
            .unwrap();
        assert_eq!(hunter.hunts(), 1);

        let doc = ts(4104, "2024-01-01T00:00:00.000000Z");
        let detections = hunter.hunt_reader(reader(vec![doc]), Path::new("a.json"), &None).unwrap();
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn field_container_mapping_resolves_through_the_mapper() {
        let mut field = Field { name: "User".into(), from: "User".into(), to: "Name".into(), visible: true, cast: None, container: None };
        field.container = Some(Container {
            field: "Data".into(),
            format: Format::Kv,
            kv_params: Some(KvParams { delimiter: ";".into(), separator: "=".into(), trim: true }),
        });
        let filter: Yaml = serde_yaml::from_str("condition: s\ns:\n  User: alice\n").unwrap();
        let (raw, _) = compile_filter("c", &filter).unwrap();
        let filter = tau::compile(raw).unwrap();
        let rule = Rule::Chainsaw(crate::rule::chainsaw::Rule {
            name: "c".into(),
            group: None,
            description: None,
            authors: vec![],
            kind: FileKind::Json,
            level: crate::rule::Level::Medium,
            status: crate::rule::Status::Stable,
            timestamp: "Timestamp".into(),
            fields: vec![field],
            filter,
            aggregate: None,
        });
        let hunter = Hunter::builder().rules(vec![rule]).build().unwrap();
        let doc = json_doc(vec![
            ("Timestamp", Value::String("2024-01-01T00:00:00.000000Z".into())),
            ("Data", Value::String("Name=alice;Other=1".into())),
        ]);
        let detections = hunter.hunt_reader(reader(vec![doc]), Path::new("a.json"), &None).unwrap();
        assert_eq!(detections.len(), 1);
    }
}

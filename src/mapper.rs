//! Field mapper (spec §4.4): remaps a rule's field lookups onto the
//! underlying document, with optional cast or container (JSON/KV) value
//! extraction. Grounded on the donor's `hunt.rs` `Mapper`/`Mapped`/`Cache`.

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;

use crate::document::Document;
use crate::rule::chainsaw::{Cast, Container, Field, Format};
use crate::value::Value;

enum MapperKind {
    None,
    Fast(FxHashMap<String, String>),
    Full(FxHashMap<String, (String, Option<Container>, Option<Cast>)>),
}

/// Built once per rule/group from its `fields` table, then handed a fresh
/// document view (`Mapper::view`) per record.
pub struct Mapper {
    fields: Vec<Field>,
    kind: MapperKind,
}

impl Mapper {
    /// Picks the cheapest mode that satisfies `fields` (spec §4.4): `None`
    /// when every entry is an identity rename, `Fast` when renames are the
    /// only thing declared, `Full` as soon as any cast or container appears.
    pub fn from(fields: Vec<Field>) -> Self {
        let mut fast = false;
        let mut full = false;
        for field in &fields {
            if field.cast.is_some() || field.container.is_some() {
                full = true;
                break;
            }
            if field.from != field.to {
                fast = true;
            }
        }
        let kind = if full {
            cs_trace!("[*] Using mapper in full mode");
            let mut map = FxHashMap::default();
            for field in &fields {
                map.insert(field.from.clone(), (field.to.clone(), field.container.clone(), field.cast));
            }
            MapperKind::Full(map)
        } else if fast {
            cs_trace!("[*] Using mapper in fast mode");
            let mut map = FxHashMap::default();
            for field in &fields {
                map.insert(field.from.clone(), field.to.clone());
            }
            MapperKind::Fast(map)
        } else {
            cs_trace!("[*] Using mapper in bypass mode");
            MapperKind::None
        };
        Self { fields, kind }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Wrap `document` in a view that resolves lookups through this mapper.
    pub fn view<'a>(&'a self, document: &'a Document) -> Mapped<'a> {
        Mapped { mapper: self, document, containers: OnceCell::new() }
    }

    /// Materialise this mapper's remapping into a standalone `Document`, so
    /// the τ solver (which reads a concrete `Document`) sees the rule's own
    /// field names. Bypass mode short-circuits to a plain clone; otherwise
    /// every declared `from` key is overridden (or removed, if unresolved)
    /// on top of the document's own top-level fields.
    pub fn apply(&self, document: &Document) -> Document {
        if matches!(self.kind, MapperKind::None) {
            return document.clone();
        }
        let view = self.view(document);
        let mut merged = match &document.data {
            Value::Object(map) => map.clone(),
            _ => FxHashMap::default(),
        };
        for field in &self.fields {
            match view.find(&field.from) {
                Some(value) => {
                    merged.insert(field.from.clone(), value);
                }
                None => {
                    merged.remove(&field.from);
                }
            }
        }
        Document::new(document.kind, Value::Object(merged))
    }
}

enum ContainerData {
    Json(Json),
    Kv(FxHashMap<String, String>),
}

impl ContainerData {
    fn find(&self, key: &str) -> Option<Value> {
        match self {
            ContainerData::Json(json) => json.get(key).cloned().map(Value::from),
            ContainerData::Kv(map) => map.get(key).map(|v| Value::String(v.clone())),
        }
    }
}

/// A single record's remapped view. Container fields are parsed at most
/// once per view, cached behind a `OnceCell` keyed by the container's field
/// name, so a rule set with several `Full`-mode entries sharing one
/// container only pays the parse cost once.
pub struct Mapped<'a> {
    mapper: &'a Mapper,
    document: &'a Document,
    containers: OnceCell<FxHashMap<String, ContainerData>>,
}

impl<'a> Mapped<'a> {
    /// Resolve `key` per the mapper's mode (spec §4.4).
    pub fn find(&self, key: &str) -> Option<Value> {
        match &self.mapper.kind {
            MapperKind::None => self.document.find(key),
            MapperKind::Fast(map) => match map.get(key) {
                Some(to) => self.document.find(to),
                None => self.document.find(key),
            },
            MapperKind::Full(map) => match map.get(key) {
                Some((to, Some(container), None)) => {
                    self.containers().get(&container.field)?.find(to)
                }
                Some((to, None, Some(cast))) => self.document.find(to).map(|v| apply_cast(v, *cast)),
                Some((to, None, None)) => self.document.find(to),
                _ => self.document.find(key),
            },
        }
    }

    fn containers(&self) -> &FxHashMap<String, ContainerData> {
        self.containers.get_or_init(|| {
            let mut parsed = FxHashMap::default();
            for field in &self.mapper.fields {
                let Some(container) = &field.container else { continue };
                if parsed.contains_key(&container.field) {
                    continue;
                }
                if let Some(data) = parse_container(self.document, container) {
                    parsed.insert(container.field.clone(), data);
                }
            }
            parsed
        })
    }
}

fn parse_container(document: &Document, container: &Container) -> Option<ContainerData> {
    let raw = document.find(&container.field)?;
    let text = raw.as_str()?;
    match container.format {
        Format::Json => serde_json::from_str::<Json>(text).ok().map(ContainerData::Json),
        Format::Kv => {
            let params = container.kv_params.as_ref()?;
            let mut map = FxHashMap::default();
            for item in text.split(params.delimiter.as_str()) {
                let cleaned = if params.trim { item.trim() } else { item };
                if let Some((k, v)) = cleaned.split_once(params.separator.as_str()) {
                    map.insert(k.to_string(), v.to_string());
                }
            }
            Some(ContainerData::Kv(map))
        }
    }
}

fn apply_cast(value: Value, cast: Cast) -> Value {
    match cast {
        Cast::Int => value.cast_int(),
        Cast::Flt => value.cast_float(),
        Cast::Str => value.cast_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Kind;
    use crate::rule::chainsaw::KvParams;

    fn field(name: &str, from: &str, to: &str) -> Field {
        Field { name: name.into(), from: from.into(), to: to.into(), visible: true, cast: None, container: None }
    }

    fn doc(pairs: Vec<(&str, Value)>) -> Document {
        let mut map = FxHashMap::default();
        for (k, v) in pairs {
            map.insert(k.to_string(), v);
        }
        Document::new(Kind::Json, Value::Object(map))
    }

    #[test]
    fn none_mode_delegates_verbatim() {
        let mapper = Mapper::from(vec![field("User", "User", "User")]);
        let document = doc(vec![("User", Value::String("alice".into()))]);
        let view = mapper.view(&document);
        assert_eq!(view.find("User"), Some(Value::String("alice".into())));
    }

    #[test]
    fn apply_materialises_a_plain_document_for_the_solver() {
        let mapper = Mapper::from(vec![field("User", "User", "EventData.TargetUserName")]);
        let mut inner = FxHashMap::default();
        inner.insert("TargetUserName".to_string(), Value::String("bob".into()));
        let document = doc(vec![("EventData", Value::Object(inner))]);
        let mapped = mapper.apply(&document);
        assert_eq!(mapped.find("User"), Some(Value::String("bob".into())));
    }

    #[test]
    fn fast_mode_renames_lookups() {
        let mapper = Mapper::from(vec![field("User", "User", "EventData.TargetUserName")]);
        let mut inner = FxHashMap::default();
        inner.insert("TargetUserName".to_string(), Value::String("bob".into()));
        let document = doc(vec![("EventData", Value::Object(inner))]);
        let view = mapper.view(&document);
        assert_eq!(view.find("User"), Some(Value::String("bob".into())));
        assert_eq!(view.find("Other"), None);
    }

    #[test]
    fn full_mode_applies_int_cast() {
        let mut f = field("Pid", "Pid", "ProcessId");
        f.cast = Some(Cast::Int);
        let mapper = Mapper::from(vec![f]);
        let document = doc(vec![("ProcessId", Value::String("4104".into()))]);
        let view = mapper.view(&document);
        assert_eq!(view.find("Pid"), Some(Value::Int64(4104)));
    }

    #[test]
    fn full_mode_extracts_kv_container_once() {
        let mut a = field("User", "User", "Name");
        a.container = Some(Container {
            field: "Data".into(),
            format: Format::Kv,
            kv_params: Some(KvParams { delimiter: ";".into(), separator: "=".into(), trim: true }),
        });
        let mut b = field("Host", "Host", "Computer");
        b.container = a.container.clone();
        let mapper = Mapper::from(vec![a, b]);
        let document = doc(vec![("Data", Value::String(" Name=alice ; Computer=WIN10 ".into()))]);
        let view = mapper.view(&document);
        assert_eq!(view.find("User"), Some(Value::String("alice".into())));
        assert_eq!(view.find("Host"), Some(Value::String("WIN10".into())));
        assert_eq!(view.containers().len(), 1);
    }

    #[test]
    fn full_mode_extracts_json_container() {
        let mut f = field("User", "User", "Name");
        f.container = Some(Container { field: "Data".into(), format: Format::Json, kv_params: None });
        let mapper = Mapper::from(vec![f]);
        let document = doc(vec![("Data", Value::String(r#"{"Name":"alice"}"#.into()))]);
        let view = mapper.view(&document);
        assert_eq!(view.find("User"), Some(Value::String("alice".into())));
    }
}

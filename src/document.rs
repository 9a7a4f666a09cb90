use std::fmt;

use crate::value::Value;

/// The format a `Document`'s payload originated from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Evtx,
    Hve,
    Json,
    Xml,
    Mft,
    Esedb,
    Unknown,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Evtx => "evtx",
            Kind::Hve => "hve",
            Kind::Json => "json",
            Kind::Xml => "xml",
            Kind::Mft => "mft",
            Kind::Esedb => "esedb",
            Kind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A polymorphic record: a format tag plus a `Value` payload (spec §3).
///
/// `find` traverses `Object` children by dotted-key segment. EVTX documents
/// carry two fixed aliases so rules can use the conventional Sigma field
/// names without the caller needing to know about `*_attributes` siblings.
#[derive(Clone, Debug)]
pub struct Document {
    pub kind: Kind,
    pub data: Value,
}

const EVTX_ALIASES: &[(&str, &str)] = &[
    ("Event.System.Provider", "Event.System.Provider_attributes.Name"),
    (
        "Event.System.TimeCreated",
        "Event.System.TimeCreated_attributes.SystemTime",
    ),
];

impl Document {
    pub fn new(kind: Kind, data: Value) -> Self {
        Self { kind, data }
    }

    pub fn find(&self, key: &str) -> Option<Value> {
        if self.kind == Kind::Evtx {
            for (alias, real) in EVTX_ALIASES {
                if key == *alias {
                    return find_path(&self.data, real);
                }
            }
        }
        find_path(&self.data, key)
    }
}

/// Traverses a dotted-key path through nested `Object` values.
pub fn find_path(value: &Value, key: &str) -> Option<Value> {
    let mut current = value;
    for segment in key.split('.') {
        let object = current.as_object()?;
        current = object.get(segment)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn obj(pairs: Vec<(&str, Value)>) -> Value {
        let mut map = FxHashMap::default();
        for (k, v) in pairs {
            map.insert(k.to_string(), v);
        }
        Value::Object(map)
    }

    #[test]
    fn finds_nested_dotted_key() {
        let data = obj(vec![("a", obj(vec![("b", Value::Int64(1))]))]);
        let doc = Document::new(Kind::Json, data);
        assert_eq!(doc.find("a.b"), Some(Value::Int64(1)));
        assert_eq!(doc.find("a.c"), None);
    }

    #[test]
    fn evtx_provider_alias_resolves_to_attributes_sibling() {
        let provider_attrs = obj(vec![("Name", Value::String("Microsoft-Windows-Security-Auditing".into()))]);
        let system = obj(vec![("Provider_attributes", provider_attrs)]);
        let event = obj(vec![("System", system)]);
        let data = obj(vec![("Event", event)]);
        let doc = Document::new(Kind::Evtx, data);
        assert_eq!(
            doc.find("Event.System.Provider"),
            Some(Value::String("Microsoft-Windows-Security-Auditing".into()))
        );
    }
}

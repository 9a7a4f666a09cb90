use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as Json};

/// A tagged-sum value tree shared by every document kind (spec §3).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    String(String),
    Array(Vec<Value>),
    Object(FxHashMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&FxHashMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Best-effort conversion to `i64` (spec §3: direct numeric, or string parse).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            Value::UInt64(u) => i64::try_from(*u).ok(),
            Value::Float64(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Best-effort conversion to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            Value::Int64(i) => Some(*i as f64),
            Value::UInt64(u) => Some(*u as f64),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Stringification used by Search/Pattern matching and the mapper's `Str` cast.
    pub fn to_display_string(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int64(i) => Some(i.to_string()),
            Value::UInt64(u) => Some(u.to_string()),
            Value::Float64(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Mapper casts (spec §4.4). Failure to parse returns the value unchanged.
    pub fn cast_int(self) -> Value {
        match &self {
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Int64(i),
                Err(_) => self,
            },
            _ => self,
        }
    }

    pub fn cast_float(self) -> Value {
        match &self {
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => Value::Float64(f),
                Err(_) => self,
            },
            _ => self,
        }
    }

    pub fn cast_str(self) -> Value {
        match &self {
            Value::Int64(i) => Value::String(i.to_string()),
            Value::UInt64(u) => Value::String(u.to_string()),
            Value::Float64(f) => Value::String(f.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            _ => self,
        }
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => {
                if n.is_u64() && n.as_i64().is_none() {
                    Self::UInt64(n.as_u64().unwrap())
                } else if let Some(i) = n.as_i64() {
                    Self::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float64(f)
                } else {
                    Self::Null
                }
            }
            Json::String(s) => Self::String(s),
            Json::Array(a) => Self::Array(a.into_iter().map(Value::from).collect()),
            Json::Object(o) => {
                Self::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for Json {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Float64(f) => {
                Number::from_f64(f).map(Self::Number).unwrap_or(Self::Null)
            }
            Value::Int64(i) => Self::Number(Number::from(i)),
            Value::UInt64(u) => Self::Number(Number::from(u)),
            Value::String(s) => Self::String(s),
            Value::Array(a) => Self::Array(a.into_iter().map(Json::from).collect()),
            Value::Object(o) => {
                Self::Object(o.into_iter().map(|(k, v)| (k, Json::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_unsigned_overflow() {
        let json: Json = serde_json::from_str(&u64::MAX.to_string()).unwrap();
        let value = Value::from(json.clone());
        assert_eq!(value, Value::UInt64(u64::MAX));
        let back: Json = value.into();
        assert_eq!(back, json);
    }

    #[test]
    fn cast_int_leaves_unparsable_strings_untouched() {
        let v = Value::String("not a number".to_string());
        assert_eq!(v.clone().cast_int(), v);
    }

    #[test]
    fn cast_str_stringifies_numeric_and_bool() {
        assert_eq!(Value::Int64(5).cast_str(), Value::String("5".to_string()));
        assert_eq!(Value::Bool(true).cast_str(), Value::String("true".to_string()));
    }
}

use regex::Regex;

use crate::value::Value;

/// A leaf predicate applied to a single `Value` (spec §3/§4.1).
#[derive(Clone, Debug)]
pub enum Pattern {
    Eq(i64),
    Gt(i64),
    Ge(i64),
    Lt(i64),
    Le(i64),
    FEq(f64),
    FGt(f64),
    FGe(f64),
    FLt(f64),
    FLe(f64),
    Any,
    Regex(Regex),
    Contains(String),
    EndsWith(String),
    Exact(String),
    StartsWith(String),
}

impl Pattern {
    /// Evaluate this pattern against `value`. Total: never panics.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Pattern::Eq(n) => value.as_i64().is_some_and(|v| v == *n),
            Pattern::Gt(n) => value.as_i64().is_some_and(|v| v > *n),
            Pattern::Ge(n) => value.as_i64().is_some_and(|v| v >= *n),
            Pattern::Lt(n) => value.as_i64().is_some_and(|v| v < *n),
            Pattern::Le(n) => value.as_i64().is_some_and(|v| v <= *n),
            Pattern::FEq(n) => value.as_f64().is_some_and(|v| v == *n),
            Pattern::FGt(n) => value.as_f64().is_some_and(|v| v > *n),
            Pattern::FGe(n) => value.as_f64().is_some_and(|v| v >= *n),
            Pattern::FLt(n) => value.as_f64().is_some_and(|v| v < *n),
            Pattern::FLe(n) => value.as_f64().is_some_and(|v| v <= *n),
            Pattern::Any => !value.is_null(),
            Pattern::Regex(re) => value.to_display_string().is_some_and(|s| re.is_match(&s)),
            Pattern::Contains(s) => value.to_display_string().is_some_and(|v| v.contains(s)),
            Pattern::EndsWith(s) => value.to_display_string().is_some_and(|v| v.ends_with(s)),
            Pattern::Exact(s) => value.to_display_string().is_some_and(|v| &v == s),
            Pattern::StartsWith(s) => value.to_display_string().is_some_and(|v| v.starts_with(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_patterns_are_false_on_non_numeric_values() {
        assert!(!Pattern::Gt(5).matches(&Value::String("nope".into())));
    }

    #[test]
    fn any_requires_non_null() {
        assert!(!Pattern::Any.matches(&Value::Null));
        assert!(Pattern::Any.matches(&Value::Bool(false)));
    }

    #[test]
    fn contains_and_exact() {
        let v = Value::String("powershell -enc".into());
        assert!(Pattern::Contains("-enc".into()).matches(&v));
        assert!(!Pattern::Exact("-enc".into()).matches(&v));
        assert!(Pattern::Exact("powershell -enc".into()).matches(&v));
    }
}

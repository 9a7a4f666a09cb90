use crate::document::Document;
use crate::tau::arena::NodeId;
use crate::tau::expr::{BoolOp, CastMod, CmpOp, Node, Tree};
use crate::value::Value;

#[derive(Copy, Clone, Debug)]
enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    fn compare(self, op: CmpOp, other: Numeric) -> bool {
        match (self, other) {
            (Numeric::Int(a), Numeric::Int(b)) => match op {
                CmpOp::Eq => a == b,
                CmpOp::Gt => a > b,
                CmpOp::Ge => a >= b,
                CmpOp::Lt => a < b,
                CmpOp::Le => a <= b,
            },
            _ => {
                let a = self.as_f64();
                let b = other.as_f64();
                match op {
                    CmpOp::Eq => a == b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                }
            }
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(i) => i as f64,
            Numeric::Float(f) => f,
        }
    }
}

fn value_to_numeric(value: &Value) -> Option<Numeric> {
    match value {
        Value::Int64(i) => Some(Numeric::Int(*i)),
        Value::UInt64(u) => i64::try_from(*u).ok().map(Numeric::Int),
        Value::Float64(f) => Some(Numeric::Float(*f)),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Some(Numeric::Int(i))
            } else {
                trimmed.parse::<f64>().ok().map(Numeric::Float)
            }
        }
        _ => None,
    }
}

fn cast_capable(field: Option<Value>, modifier: CastMod) -> bool {
    let Some(field) = field else { return false };
    match modifier {
        CastMod::Str => true,
        CastMod::Int => value_to_numeric(&field).is_some_and(|n| matches!(n, Numeric::Int(_)))
            || matches!(field, Value::Int64(_) | Value::UInt64(_)),
        CastMod::Flt => value_to_numeric(&field).is_some(),
    }
}

fn eval_numeric(tree: &Tree, id: NodeId, document: &Document) -> Option<Numeric> {
    match tree.get(id) {
        Node::Integer(n) => Some(Numeric::Int(*n)),
        Node::Float(f) => Some(Numeric::Float(*f)),
        Node::Boolean(b) => Some(Numeric::Int(*b as i64)),
        Node::Field(name) => document.find(name).as_ref().and_then(value_to_numeric),
        Node::Cast(field, modifier) => {
            let value = document.find(field)?;
            let casted = match modifier {
                CastMod::Int => value.cast_int(),
                CastMod::Flt => value.cast_float(),
                CastMod::Str => value.cast_str(),
            };
            value_to_numeric(&casted)
        }
        _ => None,
    }
}

fn field_name(tree: &Tree, id: NodeId) -> Option<&str> {
    match tree.get(id) {
        Node::Field(name) => Some(name.as_str()),
        _ => None,
    }
}

/// Evaluate a compiled τ expression against a `Document`. Total: returns a
/// bool for any well-formed tree and never panics (spec §4.1, §8).
pub fn solve(tree: &Tree, id: NodeId, document: &Document) -> bool {
    match tree.get(id) {
        Node::BooleanGroup(BoolOp::And, children) => {
            children.iter().all(|c| solve(tree, *c, document))
        }
        Node::BooleanGroup(BoolOp::Or, children) => {
            children.iter().any(|c| solve(tree, *c, document))
        }
        Node::Negate(inner) => !solve(tree, *inner, document),
        Node::Field(name) => document.find(name).is_some_and(|v| !v.is_null()),
        Node::Cast(field, modifier) => cast_capable(document.find(field), *modifier),
        Node::BooleanExpression(lhs, op, rhs) => {
            match (eval_numeric(tree, *lhs, document), eval_numeric(tree, *rhs, document)) {
                (Some(a), Some(b)) => a.compare(*op, b),
                _ => false,
            }
        }
        Node::Nested(field, inner) => match document.find(field) {
            Some(value) if value.as_object().is_some() => {
                let nested = Document::new(document.kind, value);
                solve(tree, *inner, &nested)
            }
            _ => false,
        },
        Node::Match(pattern, inner) => {
            let Some(name) = field_name(tree, *inner) else { return false };
            match document.find(name) {
                Some(Value::Array(items)) => items.iter().any(|v| pattern.matches(v)),
                Some(value) => pattern.matches(&value),
                None => pattern.matches(&Value::Null),
            }
        }
        Node::Search(search, field, cast_to_str) => match document.find(field) {
            None => false,
            Some(Value::Array(items)) => items.iter().any(|v| search.matches(v, *cast_to_str)),
            Some(value) => search.matches(&value, *cast_to_str),
        },
        Node::Matrix(fields, rows) => {
            let values: Vec<Option<Value>> = fields.iter().map(|f| document.find(f)).collect();
            rows.iter().any(|row| {
                row.patterns.len() == fields.len()
                    && row.patterns.iter().zip(&values).all(|(pattern, value)| match value {
                        Some(v) => pattern.matches(v),
                        None => pattern.matches(&Value::Null),
                    })
            })
        }
        Node::Boolean(b) => *b,
        Node::Integer(n) => *n != 0,
        Node::Float(f) => *f != 0.0,
        Node::Null => false,
        Node::Identifier(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Kind;
    use crate::tau::arena::Arena;
    use crate::tau::pattern::Pattern;
    use rustc_hash::FxHashMap;

    fn doc(pairs: Vec<(&str, Value)>) -> Document {
        let mut map = FxHashMap::default();
        for (k, v) in pairs {
            map.insert(k.to_string(), v);
        }
        Document::new(Kind::Json, Value::Object(map))
    }

    #[test]
    fn and_short_circuits_on_false() {
        let mut tree: Tree = Arena::new();
        let a = tree.push(Node::Boolean(false));
        let b = tree.push(Node::Field("missing".into()));
        let group = tree.push(Node::BooleanGroup(BoolOp::And, vec![a, b]));
        assert!(!solve(&tree, group, &doc(vec![])));
    }

    #[test]
    fn empty_and_is_true_empty_or_is_false() {
        let mut tree: Tree = Arena::new();
        let and = tree.push(Node::BooleanGroup(BoolOp::And, vec![]));
        let or = tree.push(Node::BooleanGroup(BoolOp::Or, vec![]));
        assert!(solve(&tree, and, &doc(vec![])));
        assert!(!solve(&tree, or, &doc(vec![])));
    }

    #[test]
    fn match_short_circuits_on_array_element() {
        let mut tree: Tree = Arena::new();
        let field = tree.push(Node::Field("Tags".into()));
        let m = tree.push(Node::Match(Pattern::Exact("b".into()), field));
        let document = doc(vec![(
            "Tags",
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())]),
        )]);
        assert!(solve(&tree, m, &document));
    }

    #[test]
    fn nested_requires_object_value() {
        let mut tree: Tree = Arena::new();
        let inner = tree.push(Node::Field("b".into()));
        let nested = tree.push(Node::Nested("a".into(), inner));
        assert!(!solve(&tree, nested, &doc(vec![("a", Value::Int64(1))])));
        let mut inner_obj = FxHashMap::default();
        inner_obj.insert("b".to_string(), Value::Int64(1));
        assert!(solve(&tree, nested, &doc(vec![("a", Value::Object(inner_obj))])));
    }
}

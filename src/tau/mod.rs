//! The τ intermediate representation: an arena-indexed expression tree,
//! its leaf predicates, the optimiser passes that prepare a compiled
//! `Detection` for evaluation, and the solver that evaluates it against a
//! `Document` (spec §3, §4.1).

pub mod arena;
pub mod expr;
pub mod kv;
pub mod optimiser;
pub mod pattern;
pub mod search;
pub mod solve;

pub use arena::{Arena, NodeId};
pub use expr::{BoolOp, CastMod, CmpOp, Detection, MatrixRow, Node, Tree};
pub use pattern::Pattern;
pub use search::{AhoCorasickSearch, MatchType, Search, SearchAlternative};
pub use solve::solve;

use anyhow::Result;

/// Compile a raw `Detection` (as produced by a rule parser) into its final,
/// identifier-free, solver-ready form by running the full optimiser
/// pipeline (spec §4.1).
pub fn compile(mut detection: Detection) -> Result<Detection> {
    optimiser::optimise(&mut detection)?;
    Ok(detection)
}

/// Evaluate a compiled detection against a document.
pub fn matches(detection: &Detection, document: &crate::document::Document) -> bool {
    solve(&detection.tree, detection.expression, document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Kind};
    use crate::value::Value;
    use rustc_hash::FxHashMap;

    #[test]
    fn compile_resolves_identifiers_before_matching() {
        let mut tree: Tree = Arena::new();
        let field = tree.push(Node::Field("EventID".into()));
        let four = tree.push(Node::Integer(4104));
        let selection = tree.push(Node::BooleanExpression(field, CmpOp::Eq, four));
        let reference = tree.push(Node::Identifier("selection".into()));

        let mut detection = Detection::new(tree, reference);
        detection.identifiers.insert("selection".to_string(), selection);

        let compiled = compile(detection).unwrap();
        assert!(compiled.identifiers.is_empty());

        let mut map = FxHashMap::default();
        map.insert("EventID".to_string(), Value::Int64(4104));
        let document = Document::new(Kind::Json, Value::Object(map));
        assert!(matches(&compiled, &document));
    }
}

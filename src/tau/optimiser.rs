use anyhow::{anyhow, bail, Result};
use rustc_hash::FxHashMap;

use crate::tau::arena::NodeId;
use crate::tau::expr::{BoolOp, Detection, MatrixRow, Node, Tree};
use crate::tau::pattern::Pattern;

/// Substitute every `Identifier(name)` by its referenced sub-expression,
/// recursively. Rejects cyclic identifier references (spec §4.1, §9).
pub fn coalesce(detection: &mut Detection) -> Result<()> {
    let identifiers = detection.identifiers.clone();
    let mut memo: FxHashMap<NodeId, NodeId> = FxHashMap::default();
    let mut visiting: Vec<String> = Vec::new();
    let root = resolve(&mut detection.tree, detection.expression, &identifiers, &mut memo, &mut visiting)?;
    detection.expression = root;
    detection.identifiers.clear();
    Ok(())
}

fn resolve(
    tree: &mut Tree,
    id: NodeId,
    identifiers: &FxHashMap<String, NodeId>,
    memo: &mut FxHashMap<NodeId, NodeId>,
    visiting: &mut Vec<String>,
) -> Result<NodeId> {
    if let Some(resolved) = memo.get(&id) {
        return Ok(*resolved);
    }
    let node = tree.get(id).clone();
    let resolved = match node {
        Node::Identifier(name) => {
            if visiting.contains(&name) {
                bail!("cyclic identifier reference detected at '{name}'");
            }
            let target = *identifiers
                .get(&name)
                .ok_or_else(|| anyhow!("unknown identifier reference '{name}'"))?;
            visiting.push(name);
            let out = resolve(tree, target, identifiers, memo, visiting)?;
            visiting.pop();
            out
        }
        Node::BooleanGroup(op, children) => {
            let mut resolved_children = Vec::with_capacity(children.len());
            for child in children {
                resolved_children.push(resolve(tree, child, identifiers, memo, visiting)?);
            }
            tree.push(Node::BooleanGroup(op, resolved_children))
        }
        Node::BooleanExpression(lhs, op, rhs) => {
            let lhs = resolve(tree, lhs, identifiers, memo, visiting)?;
            let rhs = resolve(tree, rhs, identifiers, memo, visiting)?;
            tree.push(Node::BooleanExpression(lhs, op, rhs))
        }
        Node::Negate(inner) => {
            let inner = resolve(tree, inner, identifiers, memo, visiting)?;
            tree.push(Node::Negate(inner))
        }
        Node::Nested(field, inner) => {
            let inner = resolve(tree, inner, identifiers, memo, visiting)?;
            tree.push(Node::Nested(field, inner))
        }
        Node::Match(pattern, inner) => {
            let inner = resolve(tree, inner, identifiers, memo, visiting)?;
            tree.push(Node::Match(pattern, inner))
        }
        _ => id,
    };
    memo.insert(id, resolved);
    Ok(resolved)
}

/// `Not Not x -> x`; constant folding; empty-group collapse; singleton
/// unwrap; same-op flattening (spec §4.1).
pub fn shake(tree: &mut Tree, id: NodeId) -> NodeId {
    match tree.get(id).clone() {
        Node::Negate(inner) => {
            let inner = shake(tree, inner);
            match tree.get(inner) {
                Node::Negate(x) => *x,
                Node::Boolean(b) => tree.push(Node::Boolean(!b)),
                _ => tree.push(Node::Negate(inner)),
            }
        }
        Node::BooleanGroup(op, children) => {
            let shaken: Vec<NodeId> = children.into_iter().map(|c| shake(tree, c)).collect();

            let mut flat = Vec::with_capacity(shaken.len());
            for child in shaken {
                if let Node::BooleanGroup(inner_op, inner_children) = tree.get(child) {
                    if *inner_op == op {
                        flat.extend(inner_children.clone());
                        continue;
                    }
                }
                flat.push(child);
            }

            let short_circuit = matches!(op, BoolOp::Or);
            let identity = !short_circuit;
            let mut kept = Vec::with_capacity(flat.len());
            for child in flat {
                if let Node::Boolean(b) = tree.get(child) {
                    if *b == short_circuit {
                        return tree.push(Node::Boolean(short_circuit));
                    }
                    continue;
                }
                kept.push(child);
            }

            if kept.is_empty() {
                return tree.push(Node::Boolean(identity));
            }
            if kept.len() == 1 {
                return kept[0];
            }
            tree.push(Node::BooleanGroup(op, kept))
        }
        Node::Nested(field, inner) => {
            let inner = shake(tree, inner);
            tree.push(Node::Nested(field, inner))
        }
        Node::Match(pattern, inner) => {
            let inner = shake(tree, inner);
            tree.push(Node::Match(pattern, inner))
        }
        _ => id,
    }
}

fn variant_rank(tree: &Tree, id: NodeId) -> u8 {
    match tree.get(id) {
        Node::BooleanGroup(..) => 0,
        Node::BooleanExpression(..) => 1,
        Node::Negate(..) => 2,
        Node::Nested(..) => 3,
        Node::Match(..) => 4,
        Node::Search(..) => 5,
        Node::Matrix(..) => 6,
        Node::Field(..) => 7,
        Node::Cast(..) => 8,
        Node::Boolean(..) => 9,
        Node::Integer(..) => 10,
        Node::Float(..) => 11,
        Node::Null => 12,
        Node::Identifier(..) => 13,
    }
}

/// Sort group children by variant tag for stable, byte-reproducible output
/// (spec §4.1).
pub fn rewrite(tree: &mut Tree, id: NodeId) -> NodeId {
    match tree.get(id).clone() {
        Node::BooleanGroup(op, children) => {
            let mut children: Vec<NodeId> = children.into_iter().map(|c| rewrite(tree, c)).collect();
            children.sort_by_key(|c| variant_rank(tree, *c));
            tree.push(Node::BooleanGroup(op, children))
        }
        Node::Negate(inner) => {
            let inner = rewrite(tree, inner);
            tree.push(Node::Negate(inner))
        }
        Node::Nested(field, inner) => {
            let inner = rewrite(tree, inner);
            tree.push(Node::Nested(field, inner))
        }
        Node::Match(pattern, inner) => {
            let inner = rewrite(tree, inner);
            tree.push(Node::Match(pattern, inner))
        }
        _ => id,
    }
}

fn as_single_field_row(tree: &Tree, id: NodeId) -> Option<Vec<(String, Pattern)>> {
    match tree.get(id) {
        Node::BooleanGroup(BoolOp::And, children) => {
            let mut row = Vec::with_capacity(children.len());
            for child in children {
                if let Node::Match(pattern, inner) = tree.get(*child) {
                    if let Node::Field(name) = tree.get(*inner) {
                        row.push((name.clone(), pattern.clone()));
                        continue;
                    }
                }
                return None;
            }
            Some(row)
        }
        Node::Match(pattern, inner) => match tree.get(*inner) {
            Node::Field(name) => Some(vec![(name.clone(), pattern.clone())]),
            _ => None,
        },
        _ => None,
    }
}

/// Coalesce equal-shape `Match` sibling predicates of an `Or` group into a
/// single `Matrix` node. Purely an optimisation: the row-matching semantics
/// in `solve` are equivalent to the original nested And/Or structure, so
/// this never changes what the expression matches (spec §4.1, §8).
pub fn matrix(tree: &mut Tree, id: NodeId) -> NodeId {
    match tree.get(id).clone() {
        Node::BooleanGroup(BoolOp::Or, children) => {
            let children: Vec<NodeId> = children.into_iter().map(|c| matrix(tree, c)).collect();

            let rows: Option<Vec<Vec<(String, Pattern)>>> =
                children.iter().map(|c| as_single_field_row(tree, *c)).collect();

            if let Some(rows) = rows {
                if rows.len() >= 2 {
                    let fields: Vec<String> = rows[0].iter().map(|(n, _)| n.clone()).collect();
                    let uniform = rows.iter().all(|row| {
                        row.len() == fields.len()
                            && fields.iter().all(|f| row.iter().any(|(n, _)| n == f))
                    });
                    if uniform {
                        let matrix_rows: Vec<MatrixRow> = rows
                            .iter()
                            .map(|row| {
                                let patterns = fields
                                    .iter()
                                    .map(|f| row.iter().find(|(n, _)| n == f).unwrap().1.clone())
                                    .collect();
                                MatrixRow { patterns, ignore_case: false }
                            })
                            .collect();
                        return tree.push(Node::Matrix(fields, matrix_rows));
                    }
                }
            }

            tree.push(Node::BooleanGroup(BoolOp::Or, children))
        }
        Node::BooleanGroup(op, children) => {
            let children: Vec<NodeId> = children.into_iter().map(|c| matrix(tree, c)).collect();
            tree.push(Node::BooleanGroup(op, children))
        }
        Node::Negate(inner) => {
            let inner = matrix(tree, inner);
            tree.push(Node::Negate(inner))
        }
        Node::Nested(field, inner) => {
            let inner = matrix(tree, inner);
            tree.push(Node::Nested(field, inner))
        }
        _ => id,
    }
}

/// Runs the full pipeline in the mandated order: coalesce, shake, rewrite,
/// matrix (spec §4.1; call order grounded on the donor's `rule::load`).
pub fn optimise(detection: &mut Detection) -> Result<()> {
    coalesce(detection)?;
    detection.expression = shake(&mut detection.tree, detection.expression);
    detection.expression = rewrite(&mut detection.tree, detection.expression);
    detection.expression = matrix(&mut detection.tree, detection.expression);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tau::arena::Arena;
    use crate::tau::expr::CmpOp;

    #[test]
    fn coalesce_rejects_cycles() {
        let mut tree: Tree = Arena::new();
        let a_ref = tree.push(Node::Identifier("B".into()));
        let b_ref = tree.push(Node::Identifier("A".into()));
        let mut detection = Detection::new(tree, a_ref);
        detection.identifiers.insert("A".into(), a_ref);
        detection.identifiers.insert("B".into(), b_ref);
        assert!(coalesce(&mut detection).is_err());
    }

    #[test]
    fn shake_removes_double_negation_and_folds_constants() {
        let mut tree: Tree = Arena::new();
        let t = tree.push(Node::Boolean(true));
        let not_t = tree.push(Node::Negate(t));
        let not_not_t = tree.push(Node::Negate(not_t));
        let shaken = shake(&mut tree, not_not_t);
        assert!(matches!(tree.get(shaken), Node::Boolean(true)));
    }

    #[test]
    fn shake_unwraps_singleton_group() {
        let mut tree: Tree = Arena::new();
        let field = tree.push(Node::Field("X".into()));
        let group = tree.push(Node::BooleanGroup(BoolOp::And, vec![field]));
        let shaken = shake(&mut tree, group);
        assert_eq!(shaken, field);
    }

    #[test]
    fn shake_flattens_same_op_children() {
        let mut tree: Tree = Arena::new();
        let a = tree.push(Node::Field("A".into()));
        let b = tree.push(Node::Field("B".into()));
        let c = tree.push(Node::Field("C".into()));
        let inner = tree.push(Node::BooleanGroup(BoolOp::And, vec![a, b]));
        let outer = tree.push(Node::BooleanGroup(BoolOp::And, vec![inner, c]));
        let shaken = shake(&mut tree, outer);
        match tree.get(shaken) {
            Node::BooleanGroup(BoolOp::And, children) => assert_eq!(children.len(), 3),
            other => panic!("expected flattened group, got {other:?}"),
        }
    }

    #[test]
    fn matrix_merges_equal_shape_match_rows() {
        let mut tree: Tree = Arena::new();
        let f1 = tree.push(Node::Field("X".into()));
        let f2 = tree.push(Node::Field("X".into()));
        let row1 = tree.push(Node::Match(Pattern::Exact("a".into()), f1));
        let row2 = tree.push(Node::Match(Pattern::Exact("b".into()), f2));
        let or = tree.push(Node::BooleanGroup(BoolOp::Or, vec![row1, row2]));
        let merged = matrix(&mut tree, or);
        assert!(matches!(tree.get(merged), Node::Matrix(..)));
    }

    #[test]
    fn cmp_op_is_used_in_boolean_expression() {
        let mut tree: Tree = Arena::new();
        let lhs = tree.push(Node::Integer(1));
        let rhs = tree.push(Node::Integer(1));
        let expr = tree.push(Node::BooleanExpression(lhs, CmpOp::Eq, rhs));
        assert!(matches!(tree.get(expr), Node::BooleanExpression(_, CmpOp::Eq, _)));
    }
}

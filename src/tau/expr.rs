use rustc_hash::FxHashMap;

use crate::tau::arena::{Arena, NodeId};
use crate::tau::pattern::Pattern;
use crate::tau::search::Search;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CastMod {
    Int,
    Str,
    Flt,
}

/// One row of a `Matrix` node: a pattern per field, plus whether the row
/// matches case-insensitively.
#[derive(Clone, Debug)]
pub struct MatrixRow {
    pub patterns: Vec<Pattern>,
    pub ignore_case: bool,
}

/// A τ-IR node (spec §3). Children are referenced by `NodeId` into the
/// owning `Arena`, never by `Box` (Design Notes §9).
#[derive(Clone, Debug)]
pub enum Node {
    BooleanGroup(BoolOp, Vec<NodeId>),
    BooleanExpression(NodeId, CmpOp, NodeId),
    Negate(NodeId),
    Nested(String, NodeId),
    Match(Pattern, NodeId),
    Search(Search, String, bool),
    Matrix(Vec<String>, Vec<MatrixRow>),
    Field(String),
    Cast(String, CastMod),
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Null,
    /// Unresolved reference to a named sub-expression. Only valid before
    /// `coalesce` runs; a `Detection` is otherwise guaranteed identifier-free.
    Identifier(String),
}

pub type Tree = Arena<Node>;

/// A Sigma/Chainsaw "detection": the compiled expression plus a table of
/// named sub-expressions awaiting coalescing (spec §3). After
/// `optimiser::coalesce`, `identifiers` is empty.
#[derive(Clone, Debug)]
pub struct Detection {
    pub tree: Tree,
    pub expression: NodeId,
    pub identifiers: FxHashMap<String, NodeId>,
}

impl Detection {
    pub fn new(tree: Tree, expression: NodeId) -> Self {
        Self { tree, expression, identifiers: FxHashMap::default() }
    }
}

//! Free-form `key: value` grammar used by Chainsaw-native `filter:` scalar
//! strings, and as the leaf-value grammar Sigma modifier expansion lowers
//! into. Grounded on the donor's `ext::tau::parse_kv`/`parse_field`
//! consumption surface.
//!
//! One clause per line: `key: value`. `key` may be wrapped in `not(...)` to
//! negate the clause, and/or prefixed with `int(...)` or `str(...)` to force
//! a numeric or string cast before matching. `value` is classified by a
//! leading sigil:
//!
//!   i<literal>     case-insensitive literal, `*`/`?` become wildcards
//!   ?<regex>       a regular expression
//!   <number>       a bare integer or float literal
//!
//! Anything else is a parse error.

use anyhow::{anyhow, bail, Result};
use regex::Regex;

use crate::tau::arena::NodeId;
use crate::tau::expr::{CastMod, Node, Tree};
use crate::tau::pattern::Pattern;
use crate::tau::search::{MatchType, Search, SearchAlternative};

/// One parsed `key: value` clause before it is lowered into the arena.
#[derive(Clone, Debug, PartialEq)]
pub struct KvClause {
    pub field: String,
    pub cast: Option<CastMod>,
    pub negate: bool,
    pub value: KvValue,
}

#[derive(Clone, Debug, PartialEq)]
pub enum KvValue {
    /// A case-insensitive literal, optionally containing `*`/`?` wildcards.
    Literal(String),
    Regex(String),
    Integer(i64),
    Float(f64),
}

/// Parse every non-blank line of `text` as a `KvClause`.
pub fn parse_kv(text: &str) -> Result<Vec<KvClause>> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).map(parse_line).collect()
}

fn parse_line(line: &str) -> Result<KvClause> {
    let (key_part, value_part) =
        line.split_once(':').ok_or_else(|| anyhow!("missing ':' in clause '{line}'"))?;
    let (field, cast, negate) = parse_field(key_part.trim())?;
    let value = parse_value(value_part.trim())?;
    Ok(KvClause { field, cast, negate, value })
}

/// Parse the key side: `not(int(EventID))`, `str(Image)`, `EventID`, ...
fn parse_field(mut key: &str) -> Result<(String, Option<CastMod>, bool)> {
    let mut negate = false;
    if let Some(inner) = strip_wrapper(key, "not(") {
        negate = true;
        key = inner;
    }
    let cast = if let Some(inner) = strip_wrapper(key, "int(") {
        key = inner;
        Some(CastMod::Int)
    } else if let Some(inner) = strip_wrapper(key, "str(") {
        key = inner;
        Some(CastMod::Str)
    } else {
        None
    };
    if key.is_empty() {
        bail!("empty field name");
    }
    Ok((key.to_string(), cast, negate))
}

fn strip_wrapper<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = s.strip_prefix(prefix)?;
    rest.strip_suffix(')')
}

/// Classify a sigil-prefixed value string (`i<literal>`, `?<regex>`, or a
/// bare number). Shared with the Sigma compiler, which produces these sigil
/// forms itself via modifier expansion before handing them back here.
pub fn parse_value(value: &str) -> Result<KvValue> {
    if let Some(literal) = value.strip_prefix('i') {
        return Ok(KvValue::Literal(literal.to_string()));
    }
    if let Some(pattern) = value.strip_prefix('?') {
        return Ok(KvValue::Regex(pattern.to_string()));
    }
    if let Ok(i) = value.parse::<i64>() {
        return Ok(KvValue::Integer(i));
    }
    if let Ok(f) = value.parse::<f64>() {
        return Ok(KvValue::Float(f));
    }
    bail!("value '{value}' is neither an 'i' literal, a '?' regex, nor numeric")
}

/// Split a wildcard literal (`*`/`?`) into the matching `Search`/`Pattern`
/// leaf. A literal with no wildcards becomes an `Exact` match; a leading or
/// trailing `*` becomes `StartsWith`/`EndsWith`/`Contains`; anything with an
/// interior wildcard is compiled to a regex. `ignore_case` is honoured for
/// every branch, not just the regex fallback, since the `i` sigil marks the
/// whole literal case-insensitive.
fn literal_to_search(literal: &str, ignore_case: bool) -> Result<Search> {
    let alternative = |kind, value: &str| SearchAlternative { kind, value: value.to_string() };
    if !literal.contains(['*', '?']) {
        return Search::aho_corasick(vec![alternative(MatchType::Exact, literal)], ignore_case)
            .map_err(|e| anyhow!("invalid literal '{literal}': {e}"));
    }
    if let Some(rest) = literal.strip_prefix('*').filter(|r| !r.contains(['*', '?'])) {
        return Search::aho_corasick(vec![alternative(MatchType::EndsWith, rest)], ignore_case)
            .map_err(|e| anyhow!("invalid literal '{literal}': {e}"));
    }
    if let Some(rest) = literal.strip_suffix('*').filter(|r| !r.contains(['*', '?'])) {
        return Search::aho_corasick(vec![alternative(MatchType::StartsWith, rest)], ignore_case)
            .map_err(|e| anyhow!("invalid literal '{literal}': {e}"));
    }
    if literal.starts_with('*') && literal.ends_with('*') {
        let middle = &literal[1..literal.len() - 1];
        if !middle.contains(['*', '?']) {
            return Search::aho_corasick(vec![alternative(MatchType::Contains, middle)], ignore_case)
                .map_err(|e| anyhow!("invalid literal '{literal}': {e}"));
        }
    }
    let mut pattern = String::with_capacity(literal.len() * 2);
    for ch in literal.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            _ => pattern.push_str(&regex::escape(&ch.to_string())),
        }
    }
    Search::regex(&pattern, ignore_case).map_err(|e| anyhow!("invalid wildcard literal '{literal}': {e}"))
}

/// Lower one clause into the arena, returning the `NodeId` of the (possibly
/// `Negate`-wrapped) predicate.
pub fn lower(tree: &mut Tree, clause: &KvClause) -> Result<NodeId> {
    let field_ref = match clause.cast {
        None => tree.push(Node::Field(clause.field.clone())),
        Some(modifier) => tree.push(Node::Cast(clause.field.clone(), modifier)),
    };
    let predicate = match &clause.value {
        KvValue::Integer(i) => {
            let lit = tree.push(Node::Integer(*i));
            tree.push(Node::BooleanExpression(field_ref, crate::tau::expr::CmpOp::Eq, lit))
        }
        KvValue::Float(f) => {
            let lit = tree.push(Node::Float(*f));
            tree.push(Node::BooleanExpression(field_ref, crate::tau::expr::CmpOp::Eq, lit))
        }
        KvValue::Regex(pattern) => {
            let search = Search::regex(pattern, true)
                .map_err(|e| anyhow!("invalid regex '{pattern}': {e}"))?;
            tree.push(Node::Search(search, clause.field.clone(), true))
        }
        KvValue::Literal(literal) => {
            let search = literal_to_search(literal, true)?;
            tree.push(Node::Search(search, clause.field.clone(), true))
        }
    };
    if clause.negate {
        Ok(tree.push(Node::Negate(predicate)))
    } else {
        Ok(predicate)
    }
}

/// Lower a literal directly into a `Pattern`, for contexts (e.g. Sigma
/// keyword lists, `Matrix` rows) that need a leaf predicate rather than a
/// standalone `Search` node.
pub fn literal_to_pattern(literal: &str) -> Pattern {
    if !literal.contains(['*', '?']) {
        return Pattern::Exact(literal.to_string());
    }
    if literal.starts_with('*') && !literal[1..].contains(['*', '?']) {
        return Pattern::EndsWith(literal[1..].to_string());
    }
    if literal.ends_with('*') && !literal[..literal.len() - 1].contains(['*', '?']) {
        return Pattern::StartsWith(literal[..literal.len() - 1].to_string());
    }
    let mut pattern = String::with_capacity(literal.len() * 2);
    for ch in literal.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            _ => pattern.push_str(&regex::escape(&ch.to_string())),
        }
    }
    match Regex::new(&pattern) {
        Ok(re) => Pattern::Regex(re),
        Err(_) => Pattern::Exact(literal.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_clause() {
        let clauses = parse_kv("EventID: 4104").unwrap();
        assert_eq!(clauses, vec![KvClause {
            field: "EventID".into(),
            cast: None,
            negate: false,
            value: KvValue::Integer(4104),
        }]);
    }

    #[test]
    fn parses_negated_cast_clause() {
        let clauses = parse_kv("not(int(EventID)): 4104").unwrap();
        let clause = &clauses[0];
        assert!(clause.negate);
        assert_eq!(clause.cast, Some(CastMod::Int));
        assert_eq!(clause.field, "EventID");
    }

    #[test]
    fn parses_wildcard_literal_and_regex() {
        let clauses = parse_kv("Image: i*\\\\cmd.exe\n?CommandLine: ^powershell").unwrap();
        assert!(matches!(clauses[0].value, KvValue::Literal(_)));
    }

    #[test]
    fn rejects_unclassifiable_value() {
        assert!(parse_kv("Image: cmd.exe").is_err());
    }

    #[test]
    fn literal_with_only_leading_wildcard_is_endswith() {
        let search = literal_to_search("*.exe", true).unwrap();
        assert!(matches!(search, Search::AhoCorasick(_)));
        assert!(search.matches(&crate::value::Value::String("cmd.exe".into()), false));
        assert!(!search.matches(&crate::value::Value::String("cmd.exe.bak".into()), false));
    }

    #[test]
    fn literal_with_both_wildcards_is_contains() {
        let search = literal_to_search("*cmd*", true).unwrap();
        assert!(matches!(search, Search::AhoCorasick(_)));
        assert!(search.matches(&crate::value::Value::String("the cmd ran".into()), false));
        assert!(!search.matches(&crate::value::Value::String("notepad".into()), false));
    }

    #[test]
    fn case_insensitive_literal_matches_regardless_of_case() {
        let search = literal_to_search(" -enc ", true).unwrap();
        assert!(search.matches(&crate::value::Value::String("powershell -ENC cmd".into()), false));
    }

    #[test]
    fn interior_wildcard_compiles_to_regex() {
        match literal_to_search("cmd*.ex?", true).unwrap() {
            Search::Regex(..) => {}
            other => panic!("expected Regex, got {other:?}"),
        }
    }
}

//! Shared `detection:` block compiler: identifier blocks, modifier
//! expansion, and the `condition:` grammar (spec §4.3), reused by both the
//! Chainsaw-native loader (whose mapping filters "use the same YAML
//! conventions as Sigma", spec §4.2) and the Sigma loader.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;
use serde_yaml::Value as Yaml;

use crate::rule::{parse_numeric_pattern, Aggregate};
use crate::tau::arena::{Arena, NodeId};
use crate::tau::expr::{BoolOp, Node, Tree};
use crate::tau::kv::{self, KvValue};
use crate::tau::Detection;

lazy_static! {
    static ref SUPPORTED_MODIFIERS: std::collections::HashSet<&'static str> =
        ["all", "base64", "base64offset", "contains", "endswith", "startswith", "re"]
            .into_iter()
            .collect();
}

/// Compile a `detection:`-shaped YAML mapping (one `condition:` string plus
/// named identifier blocks) into a τ `Detection` and an optional detached
/// aggregation. `rule_name` is used only for error messages.
pub fn compile(rule_name: &str, detection: &serde_yaml::Mapping) -> Result<(Detection, Option<Aggregate>)> {
    let mut tree: Tree = Arena::new();
    let mut blocks: HashMap<String, Vec<NodeId>> = HashMap::new();
    let mut condition_text: Option<String> = None;

    for (key, value) in detection {
        let key = key.as_str().ok_or_else(|| anyhow!("non-string key in detection block"))?;
        if key == "condition" {
            let text = value
                .as_str()
                .ok_or_else(|| anyhow!("rule '{rule_name}': 'condition' must be a string"))?;
            condition_text = Some(text.to_string());
            continue;
        }
        // `timeframe` configures aggregation windowing, which this engine's
        // `Aggregate` doesn't model; ignored rather than rejected so rules
        // that carry one still compile (matches upstream's own stopgap).
        if key == "timeframe" {
            continue;
        }
        let nodes = compile_identifier(rule_name, &mut tree, value)
            .with_context(|| format!("rule '{rule_name}': identifier '{key}'"))?;
        blocks.insert(key.to_string(), nodes);
    }

    let condition_text =
        condition_text.ok_or_else(|| anyhow!("rule '{rule_name}' has no 'condition'"))?;
    let (condition_text, aggregate) = detach_aggregation(&condition_text)?;
    let expression = resolve_condition(&mut tree, &condition_text, &blocks)
        .with_context(|| format!("rule '{rule_name}': condition '{condition_text}'"))?;

    Ok((Detection::new(tree, expression), aggregate))
}

/// Compile one identifier's value into the set of alternative nodes it
/// contributes. A mapping is a single AND-of-fields node; a sequence of
/// mappings is one node per entry (the condition OR's over them when the
/// identifier is referenced bare, ANDs when wrapped `all(name)`) (spec
/// §4.3: "Each identifier block is either a mapping ... or a sequence of
/// mappings").
fn compile_identifier(rule_name: &str, tree: &mut Tree, value: &Yaml) -> Result<Vec<NodeId>> {
    match value {
        Yaml::Mapping(map) => Ok(vec![compile_map_clause(rule_name, tree, map)?]),
        Yaml::Sequence(seq) => seq
            .iter()
            .map(|entry| match entry {
                Yaml::Mapping(map) => compile_map_clause(rule_name, tree, map),
                other => bail!("rule '{rule_name}': identifier sequence entries must be mappings, found {other:?}"),
            })
            .collect(),
        other => bail!("rule '{rule_name}': unsupported identifier shape: {other:?}"),
    }
}

/// A mapping identifier block is an AND across its `field|modifiers: value`
/// pairs (spec §4.3). A field whose value is a sequence is itself an OR
/// across the sequence's values (standard Sigma "field: [a, b]" sugar).
fn compile_map_clause(rule_name: &str, tree: &mut Tree, map: &serde_yaml::Mapping) -> Result<NodeId> {
    let mut children = Vec::with_capacity(map.len());
    for (key, value) in map {
        let key = key.as_str().ok_or_else(|| anyhow!("non-string field key"))?;
        let (field, modifiers) = split_modifiers(key);
        for m in &modifiers {
            if *m != "all" && !SUPPORTED_MODIFIERS.contains(m) {
                bail!("rule '{rule_name}': unsupported modifier '{m}' on field '{field}'");
            }
        }
        children.push(compile_field_value(rule_name, tree, field, &modifiers, value)?);
    }
    Ok(match children.len() {
        1 => children.into_iter().next().unwrap(),
        _ => tree.push(Node::BooleanGroup(BoolOp::And, children)),
    })
}

/// Split `field|mod1|mod2` into the bare field name and its modifier list.
fn split_modifiers(key: &str) -> (&str, Vec<&str>) {
    let mut parts = key.split('|');
    let field = parts.next().unwrap_or(key);
    (field, parts.collect())
}

/// Compile one `field|modifiers: value` pair, where `value` may be a scalar,
/// a sequence (OR'd), null (field-presence test), or an integer/float.
fn compile_field_value(
    rule_name: &str,
    tree: &mut Tree,
    field: &str,
    modifiers: &[&str],
    value: &Yaml,
) -> Result<NodeId> {
    let all = modifiers.contains(&"all");
    match value {
        Yaml::Sequence(seq) => {
            let children = seq
                .iter()
                .map(|v| compile_scalar(rule_name, tree, field, modifiers, v))
                .collect::<Result<Vec<_>>>()?;
            let op = if all { BoolOp::And } else { BoolOp::Or };
            Ok(match children.len() {
                1 => children.into_iter().next().unwrap(),
                _ => tree.push(Node::BooleanGroup(op, children)),
            })
        }
        other => compile_scalar(rule_name, tree, field, modifiers, other),
    }
}

fn compile_scalar(
    rule_name: &str,
    tree: &mut Tree,
    field: &str,
    modifiers: &[&str],
    value: &Yaml,
) -> Result<NodeId> {
    if let Yaml::Null = value {
        return Ok(tree.push(Node::Field(field.to_string())));
    }
    let sigil = apply_modifiers(rule_name, modifiers, value)?;
    let clause = kv::parse_value(&sigil)
        .with_context(|| format!("rule '{rule_name}': field '{field}'"))?;
    match clause {
        KvValue::Integer(i) => {
            let lhs = tree.push(Node::Field(field.to_string()));
            let rhs = tree.push(Node::Integer(i));
            Ok(tree.push(Node::BooleanExpression(lhs, crate::tau::expr::CmpOp::Eq, rhs)))
        }
        KvValue::Float(f) => {
            let lhs = tree.push(Node::Field(field.to_string()));
            let rhs = tree.push(Node::Float(f));
            Ok(tree.push(Node::BooleanExpression(lhs, crate::tau::expr::CmpOp::Eq, rhs)))
        }
        KvValue::Regex(pattern) => {
            let search = crate::tau::search::Search::regex(&pattern, true)
                .map_err(|e| anyhow!("rule '{rule_name}': invalid regex '{pattern}': {e}"))?;
            Ok(tree.push(Node::Search(search, field.to_string(), true)))
        }
        KvValue::Literal(literal) => {
            let search = literal_to_search(&literal, true)
                .with_context(|| format!("rule '{rule_name}': field '{field}'"))?;
            Ok(tree.push(Node::Search(search, field.to_string(), true)))
        }
    }
}

/// Mirror of `kv::literal_to_search`'s wildcard classification, local to
/// this module since it also has to reject unclassifiable modifier output.
/// `ignore_case` is honoured for every branch, not just the regex fallback.
fn literal_to_search(literal: &str, ignore_case: bool) -> Result<crate::tau::search::Search> {
    use crate::tau::search::{MatchType, Search, SearchAlternative};
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
    if literal.starts_with('*') && literal.ends_with('*') && literal.len() >= 2 {
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
    Search::regex(&pattern, ignore_case)
        .map_err(|e| anyhow!("invalid wildcard literal '{literal}': {e}"))
}

/// Expand a leaf value through its modifier chain into the sigil form
/// `tau::kv::parse_value` understands (`i...`, `?...`, or bare numeric)
/// (spec §4.3 Value transformation).
fn apply_modifiers(rule_name: &str, modifiers: &[&str], value: &Yaml) -> Result<String> {
    let mut text = match value {
        Yaml::String(s) => s.clone(),
        Yaml::Number(n) => n.to_string(),
        Yaml::Bool(b) => b.to_string(),
        other => bail!("rule '{rule_name}': unsupported leaf value {other:?}"),
    };
    for m in modifiers {
        match *m {
            "all" => {}
            "base64" => text = BASE64.encode(text.as_bytes()),
            "base64offset" => return Ok(base64_offset_sigil(&text)),
            "contains" => return Ok(format!("i*{text}*")),
            "endswith" => return Ok(format!("i*{text}")),
            "startswith" => return Ok(format!("i{text}*")),
            "re" => {
                Regex::new(&text)
                    .map_err(|e| anyhow!("rule '{rule_name}': invalid regex '{text}': {e}"))?;
                return Ok(format!("?{text}"));
            }
            other => bail!("rule '{rule_name}': unsupported modifier '{other}'"),
        }
    }
    Ok(format!("i{text}"))
}

/// `base64offset` expands a value into an OR over the three byte-shifted
/// Base64 encodings an attacker's own encoder might have produced
/// (spec §4.3, scenario 6). We fold the three alternatives into a single
/// regex alternation sigil since `parse_value` only accepts one leaf.
fn base64_offset_sigil(text: &str) -> String {
    let variants = [
        BASE64.encode(text.as_bytes()),
        strip_offset(&BASE64.encode(format!(" {text}").as_bytes()), 2, end_trim(format!(" {text}").len())),
        strip_offset(&BASE64.encode(format!("  {text}").as_bytes()), 3, end_trim(format!("  {text}").len())),
    ];
    let escaped: Vec<String> = variants.iter().map(|v| regex::escape(v)).collect();
    format!("?{}", escaped.join("|"))
}

fn strip_offset(encoded: &str, start_trim: usize, trailing: usize) -> String {
    let end = encoded.len().saturating_sub(trailing);
    let start = start_trim.min(end);
    encoded[start..end].to_string()
}

fn end_trim(padded_len: usize) -> usize {
    match padded_len % 3 {
        0 => 0,
        1 => 3,
        _ => 2,
    }
}

/// Detach a trailing ` | count(field) [by group] op N` aggregation clause
/// (spec §4.3).
fn detach_aggregation(condition: &str) -> Result<(String, Option<Aggregate>)> {
    let Some((head, tail)) = condition.split_once(" | ") else {
        return Ok((condition.to_string(), None));
    };
    if tail.trim_start().contains("avg ")
        || tail.contains("max ")
        || tail.contains("min ")
        || tail.contains("near ")
        || tail.contains("sum ")
    {
        bail!("only 'count' aggregation is supported, found: '{tail}'");
    }
    lazy_static! {
        static ref RE_COUNT: Regex = Regex::new(
            r"^count\(\s*([A-Za-z0-9_.]*)\s*\)(?:\s+by\s+([A-Za-z0-9_.]+))?\s*(>=|<=|==|>|<|=)\s*(\d+)$"
        )
        .unwrap();
    }
    let tail = tail.trim();
    let caps = RE_COUNT
        .captures(tail)
        .ok_or_else(|| anyhow!("unsupported aggregation clause: '{tail}'"))?;
    let mut fields = Vec::new();
    if let Some(field) = caps.get(1).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
        fields.push(field.to_string());
    }
    if let Some(group) = caps.get(2) {
        fields.push(group.as_str().to_string());
    }
    let op = &caps[3];
    let n = &caps[4];
    let count = parse_numeric_pattern(&format!("{op}{n}"))?;
    Ok((head.trim().to_string(), Some(Aggregate { count, fields })))
}

lazy_static! {
    static ref RE_OF_PREFIX: Regex =
        Regex::new(r"(?i)\b(all|1)\s+of\s+([A-Za-z0-9_]+)\*").unwrap();
    static ref RE_OF_SINGLE: Regex =
        Regex::new(r"(?i)\b(all|1)\s+of\s+([A-Za-z0-9_]+)\b(?!\()").unwrap();
}

/// Rewrite `all of them` / `1 of them` / `all of prefix*` / `1 of prefix*`
/// / `all of id` / `1 of id` into the atomic call-syntax tokens `CondParser`
/// understands, then parse and compile (spec §4.3 Condition rewriting).
fn resolve_condition(
    tree: &mut Tree,
    condition: &str,
    blocks: &HashMap<String, Vec<NodeId>>,
) -> Result<NodeId> {
    let mut text = normalise_case(condition);

    for forbidden in [" | ", " avg ", " max ", " min ", " near ", " sum "] {
        if text.contains(forbidden) {
            bail!("unsupported condition construct: '{forbidden}'");
        }
    }

    let all_them = text.trim() == "all of them";
    let one_them = text.trim() == "1 of them";
    if all_them || one_them {
        let mut names: Vec<&String> = blocks.keys().collect();
        names.sort();
        if names.is_empty() {
            bail!("'of them' with no identifiers");
        }
        let joiner = if all_them { " and " } else { " or " };
        text = names
            .iter()
            .map(|n| format!("({n})"))
            .collect::<Vec<_>>()
            .join(joiner);
    } else {
        text = rewrite_of_prefix(&text, blocks)?;
        text = rewrite_of_single(&text);
    }

    let tokens = tokenize(&text);
    let mut parser = CondParser { tokens: &tokens, pos: 0, tree, blocks };
    let expr = parser.parse_or()?;
    if parser.pos != tokens.len() {
        bail!("trailing tokens in condition: {:?}", &tokens[parser.pos..]);
    }
    if text.contains(" of ") || text.contains('*') {
        bail!("unresolved 'of'/wildcard construct in condition: '{text}'");
    }
    Ok(expr)
}

fn normalise_case(condition: &str) -> String {
    let mut out = String::with_capacity(condition.len());
    for word in condition.split_inclusive(char::is_whitespace) {
        let trimmed = word.trim_end();
        let lower = trimmed.to_ascii_lowercase();
        if matches!(lower.as_str(), "and" | "or" | "not") {
            out.push_str(&lower);
            out.push_str(&word[trimmed.len()..]);
        } else {
            out.push_str(word);
        }
    }
    out
}

fn rewrite_of_prefix(text: &str, blocks: &HashMap<String, Vec<NodeId>>) -> Result<String> {
    let mut out = String::new();
    let mut last = 0;
    for caps in RE_OF_PREFIX.captures_iter(text) {
        let m = caps.get(0).unwrap();
        out.push_str(&text[last..m.start()]);
        let kind = caps[1].to_ascii_lowercase();
        let prefix = &caps[2];
        let mut names: Vec<&String> =
            blocks.keys().filter(|n| n.starts_with(prefix)).collect();
        names.sort();
        if names.is_empty() {
            bail!("'{kind} of {prefix}*' matched no identifiers");
        }
        let joiner = if kind == "all" { " and " } else { " or " };
        out.push('(');
        out.push_str(&names.iter().map(|n| format!("({n})")).collect::<Vec<_>>().join(joiner));
        out.push(')');
        last = m.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn rewrite_of_single(text: &str) -> String {
    let mut out = String::new();
    let mut last = 0;
    for caps in RE_OF_SINGLE.captures_iter(text) {
        let m = caps.get(0).unwrap();
        out.push_str(&text[last..m.start()]);
        let kind = caps[1].to_ascii_lowercase();
        let name = &caps[2];
        if kind == "all" {
            out.push_str(&format!("all({name})"));
        } else {
            out.push_str(&format!("of({name},1)"));
        }
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Ident(String),
    All(String),
    OfN(String, usize),
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            c if c.is_whitespace() => {}
            _ => {
                let start = i;
                let mut end = i + c.len_utf8();
                while let Some(&(j, c2)) = chars.peek() {
                    if c2 == '(' || c2 == ')' || c2.is_whitespace() {
                        break;
                    }
                    end = j + c2.len_utf8();
                    chars.next();
                }
                let word = &text[start..end];
                tokens.push(classify_word(word));
            }
        }
    }
    tokens
}

fn classify_word(word: &str) -> Token {
    match word {
        "and" => return Token::And,
        "or" => return Token::Or,
        "not" => return Token::Not,
        _ => {}
    }
    if let Some(inner) = word.strip_prefix("all(").and_then(|s| s.strip_suffix(')')) {
        return Token::All(inner.to_string());
    }
    if let Some(inner) = word.strip_prefix("of(").and_then(|s| s.strip_suffix(')')) {
        if let Some((name, n)) = inner.split_once(',') {
            if let Ok(n) = n.parse::<usize>() {
                return Token::OfN(name.to_string(), n);
            }
        }
    }
    Token::Ident(word.trim_matches(|c| c == '(' || c == ')').to_string())
}

struct CondParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    tree: &'a mut Tree,
    blocks: &'a HashMap<String, Vec<NodeId>>,
}

impl<'a> CondParser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_or(&mut self) -> Result<NodeId> {
        let mut children = vec![self.parse_and()?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.pos += 1;
            children.push(self.parse_and()?);
        }
        Ok(match children.len() {
            1 => children.into_iter().next().unwrap(),
            _ => self.tree.push(Node::BooleanGroup(BoolOp::Or, children)),
        })
    }

    fn parse_and(&mut self) -> Result<NodeId> {
        let mut children = vec![self.parse_not()?];
        while matches!(self.peek(), Some(Token::And)) {
            self.pos += 1;
            children.push(self.parse_not()?);
        }
        Ok(match children.len() {
            1 => children.into_iter().next().unwrap(),
            _ => self.tree.push(Node::BooleanGroup(BoolOp::And, children)),
        })
    }

    fn parse_not(&mut self) -> Result<NodeId> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.pos += 1;
            let inner = self.parse_not()?;
            return Ok(self.tree.push(Node::Negate(inner)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<NodeId> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::LParen) => {
                self.pos += 1;
                let expr = self.parse_or()?;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => self.pos += 1,
                    _ => bail!("unbalanced parentheses in condition"),
                }
                Ok(expr)
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                self.or_block(&name)
            }
            Some(Token::All(name)) => {
                self.pos += 1;
                self.and_block(&name)
            }
            Some(Token::OfN(name, _n)) => {
                self.pos += 1;
                self.or_block(&name)
            }
            other => bail!("unexpected token in condition: {other:?}"),
        }
    }

    fn lookup(&self, name: &str) -> Result<&Vec<NodeId>> {
        self.blocks.get(name).ok_or_else(|| anyhow!("undefined identifier '{name}'"))
    }

    fn or_block(&mut self, name: &str) -> Result<NodeId> {
        let nodes = self.lookup(name)?.clone();
        Ok(match nodes.len() {
            1 => nodes[0],
            _ => self.tree.push(Node::BooleanGroup(BoolOp::Or, nodes)),
        })
    }

    fn and_block(&mut self, name: &str) -> Result<NodeId> {
        let nodes = self.lookup(name)?.clone();
        Ok(match nodes.len() {
            1 => nodes[0],
            _ => self.tree.push(Node::BooleanGroup(BoolOp::And, nodes)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Kind};
    use crate::value::Value;
    use rustc_hash::FxHashMap;
    use serde_yaml::Value as Yaml;

    fn doc(pairs: Vec<(&str, Value)>) -> Document {
        let mut map = FxHashMap::default();
        for (k, v) in pairs {
            map.insert(k.to_string(), v);
        }
        Document::new(Kind::Json, Value::Object(map))
    }

    fn yaml(text: &str) -> Yaml {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn all_of_them_requires_every_identifier() {
        let detection: serde_yaml::Mapping = match yaml(
            "condition: all of them\nA:\n  X: i1\nB:\n  Y: i2\n",
        ) {
            Yaml::Mapping(m) => m,
            _ => unreachable!(),
        };
        let (det, agg) = compile("t", &detection).unwrap();
        assert!(agg.is_none());
        let compiled = crate::tau::compile(det).unwrap();
        assert!(crate::tau::matches(
            &compiled,
            &doc(vec![("X", Value::String("1".into())), ("Y", Value::String("2".into()))])
        ));
        assert!(!crate::tau::matches(&compiled, &doc(vec![("X", Value::String("1".into()))])));
    }

    #[test]
    fn contains_modifier_lowers_to_aho_corasick_search() {
        let detection: serde_yaml::Mapping = match yaml(
            "condition: selection\nselection:\n  CommandLine|contains: ' -Nop '\n",
        ) {
            Yaml::Mapping(m) => m,
            _ => unreachable!(),
        };
        let (det, _) = compile("t", &detection).unwrap();
        let compiled = crate::tau::compile(det).unwrap();
        assert!(crate::tau::matches(
            &compiled,
            &doc(vec![("CommandLine", Value::String("powershell -NOP -enc".into()))])
        ));
        assert!(!crate::tau::matches(
            &compiled,
            &doc(vec![("CommandLine", Value::String("notepad".into()))])
        ));
    }

    #[test]
    fn detaches_count_aggregation() {
        let (cond, agg) = detach_aggregation("selection | count(User) by Host >= 3").unwrap();
        assert_eq!(cond, "selection");
        let agg = agg.unwrap();
        assert_eq!(agg.fields, vec!["User".to_string(), "Host".to_string()]);
        assert!(matches!(agg.count, crate::tau::Pattern::Ge(3)));
    }

    #[test]
    fn rejects_unsupported_aggregation_function() {
        assert!(detach_aggregation("selection | avg(User) > 3").is_err());
    }
}

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::file::reader::Kind as FileKind;
use crate::tau::{self, Pattern};

pub use self::chainsaw::Rule as Chainsaw;
pub use self::sigma::Rule as Sigma;

pub mod chainsaw;
pub mod detection;
pub mod sigma;

/// A compiled detection rule, of either origin (spec §3).
#[derive(Clone, Debug)]
pub enum Rule {
    Chainsaw(Chainsaw),
    Sigma(Sigma),
}

impl Rule {
    #[inline]
    pub fn aggregate(&self) -> &Option<Aggregate> {
        match self {
            Self::Chainsaw(c) => &c.aggregate,
            Self::Sigma(s) => &s.aggregate,
        }
    }

    #[inline]
    pub fn is_kind(&self, kind: &Kind) -> bool {
        match self {
            Self::Chainsaw(_) => kind == &Kind::Chainsaw,
            Self::Sigma(_) => kind == &Kind::Sigma,
        }
    }

    #[inline]
    pub fn level(&self) -> &Level {
        match self {
            Self::Chainsaw(c) => &c.level,
            Self::Sigma(s) => &s.level,
        }
    }

    #[inline]
    pub fn types(&self) -> &FileKind {
        match self {
            Self::Chainsaw(c) => &c.kind,
            Self::Sigma(_) => &FileKind::Unknown,
        }
    }

    #[inline]
    pub fn name(&self) -> &String {
        match self {
            Self::Chainsaw(c) => &c.name,
            Self::Sigma(s) => &s.name,
        }
    }

    #[inline]
    pub fn authors(&self) -> &[String] {
        match self {
            Self::Chainsaw(c) => &c.authors,
            Self::Sigma(s) => &s.authors,
        }
    }

    #[inline]
    pub fn status(&self) -> &Status {
        match self {
            Self::Chainsaw(c) => &c.status,
            Self::Sigma(s) => &s.status,
        }
    }

    /// Evaluate this rule's compiled filter against a document (spec §4.1).
    #[inline]
    pub fn solve(&self, document: &Document) -> bool {
        match self {
            Self::Chainsaw(c) => tau::matches(&c.filter, document),
            Self::Sigma(s) => tau::matches(&s.detection, document),
        }
    }
}

/// `{ count: Pattern (numeric), fields: [string] }` (spec §3).
#[derive(Clone, Debug)]
pub struct Aggregate {
    pub count: Pattern,
    pub fields: Vec<String>,
}

impl<'de> Deserialize<'de> for Aggregate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            count: String,
            fields: Vec<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        let count = parse_numeric_pattern(&raw.count).map_err(serde::de::Error::custom)?;
        Ok(Aggregate { count, fields: raw.fields })
    }
}

/// Parse a numeric comparison such as `>=3` or `2` into a `Pattern`.
pub(crate) fn parse_numeric_pattern(s: &str) -> anyhow::Result<Pattern> {
    let (op, rest) = if let Some(rest) = s.strip_prefix(">=") {
        (">=", rest)
    } else if let Some(rest) = s.strip_prefix("<=") {
        ("<=", rest)
    } else if let Some(rest) = s.strip_prefix('>') {
        (">", rest)
    } else if let Some(rest) = s.strip_prefix('<') {
        ("<", rest)
    } else if let Some(rest) = s.strip_prefix("==") {
        ("==", rest)
    } else {
        ("==", s)
    };
    let n: i64 = rest
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("'{s}' is not a numeric comparison"))?;
    Ok(match op {
        ">=" => Pattern::Ge(n),
        "<=" => Pattern::Le(n),
        ">" => Pattern::Gt(n),
        "<" => Pattern::Lt(n),
        _ => Pattern::Eq(n),
    })
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Chainsaw,
    Sigma,
}

impl Default for Kind {
    fn default() -> Self {
        Self::Chainsaw
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chainsaw => write!(f, "chainsaw"),
            Self::Sigma => write!(f, "sigma"),
        }
    }
}

impl FromStr for Kind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "chainsaw" => Self::Chainsaw,
            "sigma" => Self::Sigma,
            _ => anyhow::bail!("unknown kind, must be: chainsaw, or sigma"),
        })
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::Info => write!(f, "info"),
        }
    }
}

impl FromStr for Level {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            "info" => Self::Info,
            _ => anyhow::bail!("unknown level, must be: critical, high, medium, low or info"),
        })
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Stable,
    Experimental,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Experimental => write!(f, "experimental"),
        }
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "stable" => Self::Stable,
            "experimental" => Self::Experimental,
            _ => anyhow::bail!("unknown status, must be: stable or experimental"),
        })
    }
}

/// Load every rule of `kind` from `path`, applying the caller's kind/level/
/// status filters (spec §4.2/§4.3).
pub fn load(
    kind: Kind,
    path: &Path,
    kinds: &Option<HashSet<Kind>>,
    levels: &Option<HashSet<Level>>,
    statuses: &Option<HashSet<Status>>,
) -> anyhow::Result<Vec<Rule>> {
    if let Some(ext) = path.extension() {
        if ext != "yml" && ext != "yaml" {
            anyhow::bail!("rule must have a yaml file extension");
        }
    }
    let mut rules = match kind {
        Kind::Chainsaw => {
            if let Some(kinds) = kinds.as_ref() {
                if !kinds.contains(&Kind::Chainsaw) {
                    return Ok(vec![]);
                }
            }
            vec![Rule::Chainsaw(chainsaw::load(path)?)]
        }
        Kind::Sigma => {
            if let Some(kinds) = kinds.as_ref() {
                if !kinds.contains(&Kind::Sigma) {
                    return Ok(vec![]);
                }
            }
            sigma::load(path)?.into_iter().map(Rule::Sigma).collect()
        }
    };
    if let Some(levels) = levels.as_ref() {
        rules.retain(|r| levels.contains(r.level()));
    }
    if let Some(statuses) = statuses.as_ref() {
        rules.retain(|r| statuses.contains(r.status()));
    }
    Ok(rules)
}

/// Load and compile `path`, returning the pre-solve detections for
/// inspection rather than wrapping them in a `Rule` (used by `chainsaw lint`).
pub fn lint(kind: &Kind, path: &Path) -> anyhow::Result<Vec<tau::Detection>> {
    if let Some(ext) = path.extension() {
        if ext != "yml" && ext != "yaml" {
            anyhow::bail!("rule must have a yaml file extension");
        }
    }
    match kind {
        Kind::Chainsaw => Ok(vec![chainsaw::load(path)?.filter]),
        Kind::Sigma => Ok(sigma::load(path)?.into_iter().map(|r| r.detection).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_patterns() {
        assert!(matches!(parse_numeric_pattern(">=3").unwrap(), Pattern::Ge(3)));
        assert!(matches!(parse_numeric_pattern("2").unwrap(), Pattern::Eq(2)));
    }

    #[test]
    fn level_display_round_trips_from_str() {
        for level in [Level::Critical, Level::High, Level::Medium, Level::Low, Level::Info] {
            let parsed: Level = level.to_string().parse().unwrap();
            assert_eq!(parsed, level);
        }
    }
}

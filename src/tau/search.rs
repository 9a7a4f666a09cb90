use aho_corasick::AhoCorasick;
use regex::RegexBuilder;

use crate::value::Value;

/// The match discipline of one literal alternative inside an `AhoCorasick` search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchType {
    Contains,
    EndsWith,
    Exact,
    StartsWith,
}

#[derive(Clone, Debug)]
pub struct SearchAlternative {
    pub kind: MatchType,
    pub value: String,
}

/// A leaf predicate applied to a `Value` as a string, or per array element
/// (spec §3/§4.1).
#[derive(Clone, Debug)]
pub enum Search {
    Any,
    Regex(regex::Regex, bool),
    AhoCorasick(AhoCorasickSearch),
    Contains(String),
    EndsWith(String),
    Exact(String),
    StartsWith(String),
}

impl Search {
    pub fn regex(pattern: &str, ignore_case: bool) -> Result<Search, regex::Error> {
        let re = RegexBuilder::new(pattern).case_insensitive(ignore_case).build()?;
        Ok(Search::Regex(re, ignore_case))
    }

    pub fn aho_corasick(
        entries: Vec<SearchAlternative>,
        ignore_case: bool,
    ) -> Result<Search, aho_corasick::BuildError> {
        Ok(Search::AhoCorasick(AhoCorasickSearch::new(entries, ignore_case)?))
    }

    /// True iff `field` (the raw found value) matches. A missing field is
    /// handled by the caller (§4.1: absent field is always `false`, even for
    /// `Any`); this method assumes `field` exists.
    pub fn matches(&self, value: &Value, cast_to_str: bool) -> bool {
        let haystack = if cast_to_str {
            value.to_display_string()
        } else {
            match value {
                Value::String(s) => Some(s.clone()),
                _ => value.to_display_string(),
            }
        };
        let Some(haystack) = haystack else { return false };
        match self {
            Search::Any => true,
            Search::Regex(re, _) => re.is_match(&haystack),
            Search::AhoCorasick(matcher) => matcher.is_match(&haystack),
            Search::Contains(s) => haystack.contains(s.as_str()),
            Search::EndsWith(s) => haystack.ends_with(s.as_str()),
            Search::Exact(s) => haystack == *s,
            Search::StartsWith(s) => haystack.starts_with(s.as_str()),
        }
    }
}

/// Multiple typed literal alternatives sharing one compiled automaton;
/// a match is an OR over the alternatives (spec §4.1 Search semantics).
#[derive(Clone, Debug)]
pub struct AhoCorasickSearch {
    alternatives: Vec<SearchAlternative>,
    automaton: AhoCorasick,
}

impl AhoCorasickSearch {
    pub fn new(
        alternatives: Vec<SearchAlternative>,
        ignore_case: bool,
    ) -> Result<Self, aho_corasick::BuildError> {
        let patterns: Vec<&str> = alternatives.iter().map(|a| a.value.as_str()).collect();
        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(ignore_case)
            .build(&patterns)?;
        Ok(Self { alternatives, automaton })
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        for mat in self.automaton.find_iter(haystack) {
            let alt = &self.alternatives[mat.pattern().as_usize()];
            let satisfied = match alt.kind {
                MatchType::Contains => true,
                MatchType::StartsWith => mat.start() == 0,
                MatchType::EndsWith => mat.end() == haystack.len(),
                MatchType::Exact => mat.start() == 0 && mat.end() == haystack.len(),
            };
            if satisfied {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_lowering_matches_case_insensitively() {
        let search = Search::aho_corasick(
            vec![SearchAlternative { kind: MatchType::Contains, value: " -Nop ".to_string() }],
            true,
        )
        .unwrap();
        assert!(search.matches(&Value::String("powershell -NOP -enc".into()), false));
        assert!(!search.matches(&Value::String("notepad".into()), false));
    }

    #[test]
    fn startswith_alternative_rejects_interior_match() {
        let search = Search::aho_corasick(
            vec![SearchAlternative { kind: MatchType::StartsWith, value: "cmd".to_string() }],
            false,
        )
        .unwrap();
        assert!(search.matches(&Value::String("cmd.exe".into()), false));
        assert!(!search.matches(&Value::String("x.cmd.exe".into()), false));
    }
}

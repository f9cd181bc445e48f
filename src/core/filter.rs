//! User rules applied to raw content before normalization.
//!
//! Blacklist text rules are case-insensitive substrings, regex rules are
//! case-sensitive. Whitelisted comments are kept but never merged.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::RegexSet;
use tracing::warn;

use crate::core::comment::Comment;
use crate::infra::config::{BlacklistRule, Config, RuleKind};

/// A user rule that failed to compile
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid rule `{pattern}`: {message}")]
pub struct InvalidRule {
    pub pattern: String,
    pub message: String,
}

/// Compile regex patterns one by one so a bad rule only costs itself
fn compile_set<'a>(
    patterns: impl IntoIterator<Item = &'a str>,
    invalid: &mut Vec<InvalidRule>,
) -> Option<RegexSet> {
    let mut valid = Vec::new();
    for p in patterns {
        match regex::Regex::new(p) {
            Ok(_) => valid.push(p),
            Err(e) => {
                warn!(pattern = p, error = %e, "skipping invalid rule");
                invalid.push(InvalidRule { pattern: p.to_string(), message: e.to_string() });
            }
        }
    }
    if valid.is_empty() {
        return None;
    }
    // Every member compiled on its own; a failure here is a size limit
    match RegexSet::new(&valid) {
        Ok(set) => Some(set),
        Err(e) => {
            warn!(error = %e, "rule set too large, ignoring it");
            None
        }
    }
}

/// Compiled blacklist
#[derive(Debug, Clone, Default)]
pub struct BlacklistFilter {
    text: Option<AhoCorasick>,
    regex: Option<RegexSet>,
    invalid: Vec<InvalidRule>,
}

impl BlacklistFilter {
    pub fn new(rules: &[BlacklistRule]) -> Self {
        let mut invalid = Vec::new();

        let needles: Vec<String> = rules
            .iter()
            .filter(|r| r.enabled && r.kind == RuleKind::Text && !r.pattern.is_empty())
            .map(|r| r.pattern.to_lowercase())
            .collect();

        let text = if needles.is_empty() {
            None
        } else {
            match AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .match_kind(MatchKind::LeftmostFirst)
                .build(&needles)
            {
                Ok(ac) => Some(ac),
                Err(e) => {
                    warn!(error = %e, "cannot build text rule automaton");
                    None
                }
            }
        };

        let regex = compile_set(
            rules
                .iter()
                .filter(|r| r.enabled && r.kind == RuleKind::Regex)
                .map(|r| r.pattern.as_str()),
            &mut invalid,
        );

        Self { text, regex, invalid }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.blacklist)
    }

    pub fn is_blocked(&self, content: &str) -> bool {
        if let Some(ac) = &self.text
            && ac.is_match(&content.to_lowercase())
        {
            return true;
        }
        self.regex.as_ref().is_some_and(|set| set.is_match(content))
    }

    /// Rules skipped at compile time
    pub fn invalid_rules(&self) -> &[InvalidRule] {
        &self.invalid
    }
}

/// Compiled whitelist; matching comments skip clustering
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    set: Option<RegexSet>,
}

impl Whitelist {
    pub fn new(patterns: &[String]) -> Self {
        let mut invalid = Vec::new();
        Self { set: compile_set(patterns.iter().map(String::as_str), &mut invalid) }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.whitelist)
    }

    pub fn is_exempt(&self, content: &str) -> bool {
        self.set.as_ref().is_some_and(|s| s.is_match(content))
    }
}

/// Split into (kept, blocked count)
pub fn partition(comments: Vec<Comment>, filter: &BlacklistFilter) -> (Vec<Comment>, usize) {
    let before = comments.len();
    let kept: Vec<Comment> = comments
        .into_iter()
        .filter(|c| !filter.is_blocked(&c.content))
        .collect();
    let blocked = before - kept.len();
    (kept, blocked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::comment::sample;

    fn rule(kind: RuleKind, pattern: &str) -> BlacklistRule {
        BlacklistRule { kind, pattern: pattern.to_string(), enabled: true }
    }

    #[test]
    fn test_regex_prefix_rule() {
        let f = BlacklistFilter::new(&[rule(RuleKind::Regex, "^广告")]);
        assert!(f.is_blocked("广告：xxx"));
        assert!(!f.is_blocked("不是广告"));
    }

    #[test]
    fn test_text_rules_ignore_case() {
        let f = BlacklistFilter::new(&[rule(RuleKind::Text, "SPAM"), rule(RuleKind::Text, "")]);
        assert!(f.is_blocked("buy spam now"));
        assert!(f.is_blocked("SpAm"));
        assert!(!f.is_blocked("spa m"));
        assert!(!f.is_blocked(""));
    }

    #[test]
    fn test_regex_rules_are_case_sensitive() {
        let f = BlacklistFilter::new(&[rule(RuleKind::Regex, "abc")]);
        assert!(f.is_blocked("xabcx"));
        assert!(!f.is_blocked("ABC"));
    }

    #[test]
    fn test_invalid_and_disabled_rules_skipped() {
        let mut off = rule(RuleKind::Text, "hidden");
        off.enabled = false;
        let f = BlacklistFilter::new(&[rule(RuleKind::Regex, "(unclosed"), rule(RuleKind::Regex, "ok$"), off]);

        assert_eq!(f.invalid_rules().len(), 1);
        assert_eq!(f.invalid_rules()[0].pattern, "(unclosed");
        assert!(f.is_blocked("this is ok"));
        assert!(!f.is_blocked("hidden"));
    }

    #[test]
    fn test_partition_counts_blocked() {
        let f = BlacklistFilter::new(&[rule(RuleKind::Regex, "^广告")]);
        let (kept, blocked) = partition(vec![sample(1, 0, "广告：xxx"), sample(2, 10, "hello")], &f);
        assert_eq!(blocked, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, 2);
    }

    #[test]
    fn test_whitelist() {
        let w = Whitelist::new(&["^前方高能".to_string(), "[".to_string()]);
        assert!(w.is_exempt("前方高能！"));
        assert!(!w.is_exempt("高能"));
        assert!(!Whitelist::default().is_exempt("anything"));
    }
}

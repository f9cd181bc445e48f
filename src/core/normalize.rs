//! Comparison-text canonicalization.
//!
//! Passes run in a fixed order (force-list, width, phonetic, trailing
//! filler, whitespace). Each is toggled independently; a disabled pass
//! leaves the text as is. The original comment content is never touched.

use pinyin::ToPinyin;
use regex::Regex;
use tracing::warn;

use crate::infra::config::Config;

/// Characters treated as trailing filler
const ENDING_CHARS: &[char] = &[
    '.', '。', ',', '，', '/', '?', '？', '!', '！', '…', '~', '～', '@', '^', '、', '+', '=',
    '-', '_', '♂', '♀',
];

/// Start of the supplementary private use area that phonetic codes map into
const PHONETIC_BASE: u32 = 0xF_0000;
/// Number of code points available there (U+F0000..=U+FFFFD)
const PHONETIC_SPAN: u64 = 0xFFFE;

/// Ordered, independently toggleable text passes
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    force: Vec<(Regex, String)>,
    width: bool,
    pinyin: bool,
    ending: bool,
    space: bool,
}

impl TextNormalizer {
    /// Build from a config snapshot. Force-list patterns that fail to
    /// compile are skipped.
    pub fn from_config(cfg: &Config) -> Self {
        let force = cfg
            .forcelist
            .iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(re) => Some((re, rule.replacement.clone())),
                Err(e) => {
                    warn!(pattern = %rule.pattern, error = %e, "skipping invalid force-list rule");
                    None
                }
            })
            .collect();

        Self {
            force,
            width: cfg.trim_width,
            pinyin: cfg.trim_pinyin,
            ending: cfg.trim_ending,
            space: cfg.trim_space,
        }
    }

    /// Normalizer with every pass disabled
    pub fn identity() -> Self {
        Self { force: Vec::new(), width: false, pinyin: false, ending: false, space: false }
    }

    pub fn normalize(&self, content: &str) -> String {
        let mut s = self.apply_force(content);

        if self.width {
            s = fold_width(&s);
        }
        if self.pinyin {
            s = fold_phonetic(&s);
        }
        if self.ending {
            s = fold_ending(&s);
        }
        if self.space {
            s.retain(|c| !c.is_whitespace());
        }

        s
    }

    fn apply_force(&self, content: &str) -> String {
        for (re, replacement) in &self.force {
            if re.is_match(content) {
                return re
                    .replace_all(content, replacement.as_str())
                    .into_owned();
            }
        }
        content.to_string()
    }
}

/// Full-width ASCII variants to ASCII; ideographic space to space
pub fn fold_width(s: &str) -> String {
    s.chars()
        .map(|c| match c as u32 {
            0xFF01..=0xFF5E => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            0x3000 => ' ',
            _ => c,
        })
        .collect()
}

/// Replace each Han character with one code point keyed by its toneless
/// syllable, so homophones compare equal character for character
pub fn fold_phonetic(s: &str) -> String {
    s.chars()
        .map(|c| match c.to_pinyin() {
            Some(py) => phonetic_code(py.plain()),
            None => c,
        })
        .collect()
}

fn phonetic_code(syllable: &str) -> char {
    let h = xxhash_rust::xxh64::xxh64(syllable.as_bytes(), 0) % PHONETIC_SPAN;
    // PHONETIC_BASE + h stays inside U+F0000..=U+FFFFD
    char::from_u32(PHONETIC_BASE + h as u32).unwrap_or('\u{FFFD}')
}

/// Strip a trailing run of punctuation, filler and whitespace. Text made
/// only of filler is kept whole.
pub fn fold_ending(s: &str) -> String {
    let trimmed = s.trim_end_matches(|c: char| c.is_whitespace() || ENDING_CHARS.contains(&c));
    if trimmed.is_empty() { s.to_string() } else { trimmed.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::ForceRule;

    #[test]
    fn test_width_folding() {
        assert_eq!(fold_width("ＡＢＣ１２３！"), "ABC123!");
        assert_eq!(fold_width("a\u{3000}b"), "a b");
        assert_eq!(fold_width("中文"), "中文");
    }

    #[test]
    fn test_phonetic_folding_homophones() {
        // 在/再 share the syllable "zai"
        assert_eq!(fold_phonetic("在吗"), fold_phonetic("再吗"));
        assert_ne!(fold_phonetic("在吗"), fold_phonetic("好吗"));
        assert_eq!(fold_phonetic("在吗").chars().count(), 2);
        assert_eq!(fold_phonetic("abc"), "abc");
    }

    #[test]
    fn test_ending_folding() {
        assert_eq!(fold_ending("好耶！！！"), "好耶");
        assert_eq!(fold_ending("hello~~~ "), "hello");
        assert_eq!(fold_ending("？？？"), "？？？");
    }

    #[test]
    fn test_passes_compose_in_order() {
        let cfg = Config::default();
        let n = TextNormalizer::from_config(&cfg);
        // width folds "！" to "!", ending strips it, space removes the gap
        assert_eq!(n.normalize("ha ha！"), "haha");
    }

    #[test]
    fn test_disabled_passes_are_noops() {
        let cfg = Config {
            trim_width: false,
            trim_pinyin: false,
            trim_ending: false,
            trim_space: false,
            ..Config::default()
        };
        let n = TextNormalizer::from_config(&cfg);
        assert_eq!(n.normalize("ha ha！"), "ha ha！");
        assert_eq!(TextNormalizer::identity().normalize("ｘ ！"), "ｘ ！");
    }

    #[test]
    fn test_force_list_first_match_wins() {
        let cfg = Config {
            forcelist: vec![
                ForceRule { pattern: "(".into(), replacement: "broken".into() },
                ForceRule { pattern: "^23{2,}$".into(), replacement: "2333".into() },
                ForceRule { pattern: "^2".into(), replacement: "two".into() },
            ],
            ..Config::default()
        };
        let n = TextNormalizer::from_config(&cfg);
        assert_eq!(n.normalize("233333"), "2333");
        assert_eq!(n.normalize("2"), "two");
    }
}

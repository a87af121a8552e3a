//! Glob-style series-name matching (`*`, `?`, `[seq]`, `[!seq]`).

use regex::Regex;

use crate::{Error, Result};

/// Compiled series-name pattern. Matches the whole name.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    /// Compile a glob pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        let translated = translate(pattern);
        let regex = Regex::new(&translated).map_err(|e| {
            Error::Configuration(format!("invalid series pattern '{pattern}': {e}"))
        })?;
        Ok(Self { source: pattern.to_string(), regex })
    }

    /// Original glob text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True if `name` matches in full.
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push_str("(?s)^");
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // Find the closing bracket; a leading '!' or ']' is part of the set.
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str("\\[");
                    continue;
                }
                let mut set: String = chars[i..j].iter().collect();
                i = j + 1;
                let negated = set.starts_with('!');
                if negated {
                    set.remove(0);
                }
                let escaped = set.replace('\\', "\\\\").replace('[', "\\[").replace('&', "\\&");
                out.push('[');
                if negated {
                    out.push('^');
                } else if escaped.starts_with('^') {
                    out.push('\\');
                }
                out.push_str(&escaped);
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_and_question() {
        let p = NamePattern::new("antidepressant_*_rate").unwrap();
        assert!(p.matches("antidepressant_any_all_total_rate"));
        assert!(!p.matches("antidepressant_any_all_total_rate_x"));
        let q = NamePattern::new("imd_?").unwrap();
        assert!(q.matches("imd_3"));
        assert!(!q.matches("imd_10"));
    }

    #[test]
    fn test_literal_regex_characters_are_escaped() {
        let p = NamePattern::new("diagnosis_18+_rate").unwrap();
        assert!(p.matches("diagnosis_18+_rate"));
        assert!(!p.matches("diagnosis_188_rate"));
        let dot = NamePattern::new("a.b").unwrap();
        assert!(!dot.matches("axb"));
    }

    #[test]
    fn test_character_sets() {
        let p = NamePattern::new("group_[0-2]").unwrap();
        assert!(p.matches("group_1"));
        assert!(!p.matches("group_5"));
        let n = NamePattern::new("group_[!0]").unwrap();
        assert!(n.matches("group_1"));
        assert!(!n.matches("group_0"));
    }

    #[test]
    fn test_unclosed_bracket_is_literal() {
        let p = NamePattern::new("x[").unwrap();
        assert!(p.matches("x["));
    }
}

//! Key matching against the scan buffer.
//!
//! Three key forms: plain substring, plain whole-word, and JS-style
//! `/pattern/flags` regex literals. Whole-word boundaries follow the
//! frontend convention: the adjacent character must not be a word
//! character (`[A-Za-z0-9_]`), which differs from `\b` for keys that
//! start or end with punctuation.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};

use crate::types::{LoreEntry, SelectiveLogic};

/// Scan text with a pre-lowered copy so case-insensitive keys do not
/// re-lower the buffer per check.
#[derive(Debug, Clone, Default)]
pub struct ScanText {
    pub raw: String,
    lower: String,
}

impl ScanText {
    pub fn new(raw: String) -> Self {
        let lower = raw.to_lowercase();
        Self { raw, lower }
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    pub case_sensitive: bool,
    pub whole_words: bool,
}

impl MatchOptions {
    pub fn for_entry(entry: &LoreEntry) -> Self {
        Self {
            case_sensitive: entry.case_sensitive.unwrap_or(false),
            whole_words: entry.match_whole_words.unwrap_or(false),
        }
    }
}

/// Per-build regex cache. Failed compiles are cached too so each bad key
/// warns at most once.
#[derive(Default)]
pub struct KeyMatcher {
    compiled: HashMap<String, Option<Regex>>,
    pub warnings: Vec<String>,
}

impl KeyMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test a single key against the scan text.
    pub fn key_matches(&mut self, key: &str, scan: &ScanText, opts: MatchOptions) -> bool {
        let key = key.trim();
        if key.is_empty() || scan.is_empty() {
            return false;
        }

        if let Some((pattern, flags)) = parse_js_regex(key) {
            match self.compile(key, pattern, flags, opts) {
                Some(re) => return re.is_match(&scan.raw),
                // Degraded: the literal source text is matched as a plain
                // substring.
                None => return substring_match(&key.to_lowercase(), &scan.lower, false),
            }
        }

        if opts.case_sensitive {
            substring_match(key, &scan.raw, opts.whole_words)
        } else {
            substring_match(&key.to_lowercase(), &scan.lower, opts.whole_words)
        }
    }

    /// Combine primary and secondary key results per the selective logic.
    pub fn selective_matches(
        &mut self,
        entry: &LoreEntry,
        scan: &ScanText,
        opts: MatchOptions,
    ) -> bool {
        let primary = entry
            .keys
            .iter()
            .any(|k| self.key_matches(k, scan, opts));
        if !primary {
            return false;
        }
        if !entry.selective || entry.secondary_keys.is_empty() {
            return true;
        }

        let hits: Vec<bool> = entry
            .secondary_keys
            .iter()
            .map(|k| self.key_matches(k, scan, opts))
            .collect();
        let any = hits.iter().any(|h| *h);
        let all = hits.iter().all(|h| *h);

        match entry.selective_logic {
            SelectiveLogic::AndAny => any,
            SelectiveLogic::AndAll => all,
            SelectiveLogic::NotAny => !any,
            SelectiveLogic::NotAll => !all,
        }
    }

    fn compile(
        &mut self,
        key: &str,
        pattern: &str,
        flags: &str,
        opts: MatchOptions,
    ) -> Option<&Regex> {
        if !self.compiled.contains_key(key) {
            let mut builder = RegexBuilder::new(pattern);
            builder.case_insensitive(flags.contains('i') || !opts.case_sensitive);
            builder.multi_line(flags.contains('m'));
            builder.dot_matches_new_line(flags.contains('s'));
            let compiled = match builder.build() {
                Ok(re) => Some(re),
                Err(err) => {
                    self.warnings.push(format!(
                        "lore key {key:?} is not a supported regex, falling back to \
                         substring match: {err}"
                    ));
                    None
                }
            };
            self.compiled.insert(key.to_string(), compiled);
        }
        self.compiled.get(key).and_then(|o| o.as_ref())
    }
}

/// `/pattern/flags` form. Flags `g`, `y` and `u` are dropped during
/// translation; anything else unknown disqualifies the literal.
fn parse_js_regex(key: &str) -> Option<(&str, &str)> {
    if !key.starts_with('/') || key.len() < 2 {
        return None;
    }
    let close = key.rfind('/')?;
    if close == 0 {
        return None;
    }
    let pattern = &key[1..close];
    let flags = &key[close + 1..];
    if flags.chars().all(|c| matches!(c, 'i' | 'm' | 's' | 'g' | 'y' | 'u')) {
        Some((pattern, flags))
    } else {
        None
    }
}

fn substring_match(needle: &str, haystack: &str, whole_words: bool) -> bool {
    if !whole_words {
        return haystack.contains(needle);
    }
    let mut search = 0;
    while let Some(found) = haystack[search..].find(needle) {
        let at = search + found;
        let end = at + needle.len();
        let left_ok = haystack[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !is_word_char(c));
        let right_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !is_word_char(c));
        if left_ok && right_ok {
            return true;
        }
        search = at + needle.len().max(1);
    }
    false
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LoreEntry;

    fn scan(text: &str) -> ScanText {
        ScanText::new(text.to_string())
    }

    fn opts() -> MatchOptions {
        MatchOptions {
            case_sensitive: false,
            whole_words: false,
        }
    }

    #[test]
    fn plain_substring_default_case_insensitive() {
        let mut m = KeyMatcher::new();
        assert!(m.key_matches("Dragon", &scan("a DRAGON appears"), opts()));
        assert!(!m.key_matches("dragon", &scan("a wyvern appears"), opts()));
    }

    #[test]
    fn case_sensitive_flag() {
        let mut m = KeyMatcher::new();
        let cs = MatchOptions {
            case_sensitive: true,
            whole_words: false,
        };
        assert!(!m.key_matches("Dragon", &scan("a dragon appears"), cs));
        assert!(m.key_matches("Dragon", &scan("a Dragon appears"), cs));
    }

    #[test]
    fn whole_word_uses_non_word_boundary() {
        let mut m = KeyMatcher::new();
        let ww = MatchOptions {
            case_sensitive: false,
            whole_words: true,
        };
        assert!(m.key_matches("cat", &scan("a cat, sleeping"), ww));
        assert!(!m.key_matches("cat", &scan("concatenate"), ww));
        // Punctuation keys still match adjacent to words.
        assert!(m.key_matches("...", &scan("wait... what"), ww));
        // At the very start and end of the buffer.
        assert!(m.key_matches("cat", &scan("cat"), ww));
    }

    #[test]
    fn js_regex_literal() {
        let mut m = KeyMatcher::new();
        assert!(m.key_matches("/drag[oa]n/i", &scan("the DRAGAN flies"), opts()));
        assert!(!m.key_matches("/^start/", &scan("not at start"), opts()));
        assert!(m.warnings.is_empty());
    }

    #[test]
    fn bad_regex_degrades_to_substring_with_one_warning() {
        let mut m = KeyMatcher::new();
        // Lookbehind is not supported by the regex crate.
        let key = "/(?<=foo)bar/";
        assert!(!m.key_matches(key, &scan("foo bar"), opts()));
        assert!(m.key_matches(key, &scan("contains /(?<=foo)bar/ literally"), opts()));
        assert_eq!(m.warnings.len(), 1);
    }

    #[test]
    fn selective_logic_combinations() {
        let mut m = KeyMatcher::new();
        let mut entry = LoreEntry::new(1, "c").with_keys(["dragon"]);
        entry.selective = true;
        entry.secondary_keys = vec!["fire".into(), "gold".into()];

        let both = scan("the dragon hoards fire and gold");
        let one = scan("the dragon breathes fire");
        let none = scan("the dragon sleeps");

        entry.selective_logic = SelectiveLogic::AndAny;
        assert!(m.selective_matches(&entry, &one, opts()));
        assert!(!m.selective_matches(&entry, &none, opts()));

        entry.selective_logic = SelectiveLogic::AndAll;
        assert!(m.selective_matches(&entry, &both, opts()));
        assert!(!m.selective_matches(&entry, &one, opts()));

        entry.selective_logic = SelectiveLogic::NotAny;
        assert!(m.selective_matches(&entry, &none, opts()));
        assert!(!m.selective_matches(&entry, &one, opts()));

        entry.selective_logic = SelectiveLogic::NotAll;
        assert!(m.selective_matches(&entry, &one, opts()));
        assert!(!m.selective_matches(&entry, &both, opts()));
    }

    #[test]
    fn no_primary_hit_short_circuits_secondaries() {
        let mut m = KeyMatcher::new();
        let mut entry = LoreEntry::new(1, "c").with_keys(["dragon"]);
        entry.selective = true;
        entry.selective_logic = SelectiveLogic::NotAny;
        entry.secondary_keys = vec!["x".into()];
        assert!(!m.selective_matches(&entry, &scan("no match here"), opts()));
    }
}

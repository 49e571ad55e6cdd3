//! Transcript normalization

use std::fmt;

/// A final transcript, normalized for matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    text: String,
    /// Trimmed, lower-cased transcript with punctuation intact
    raw: String,
}

impl Utterance {
    pub fn new(raw: &str) -> Self {
        Self {
            text: normalize(raw),
            raw: raw.trim().to_lowercase(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether at least one word-like token survived normalization
    pub fn has_words(&self) -> bool {
        self.text.chars().any(char::is_alphanumeric)
    }
}

impl fmt::Display for Utterance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Lower-case, strip punctuation, collapse whitespace.
///
/// Apostrophes are dropped in place ("what's" becomes "whats"); every other
/// non-alphanumeric character separates words.
pub fn normalize(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\'' || c == '\u{2019}' {
            continue;
        }
        if c.is_alphanumeric() {
            cleaned.extend(c.to_lowercase());
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

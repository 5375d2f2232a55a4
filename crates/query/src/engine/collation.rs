use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::canonical_combining_class;

pub use crate::consts::{CODEPOINT_URI, HTML_ASCII_CASE_URI, SIMPLE_ACCENT_URI, SIMPLE_CASE_URI};

/// String ordering used by comparisons, `order by`, `distinct-values` and the
/// substring functions.
pub trait Collation: Send + Sync {
    fn uri(&self) -> &str;
    fn compare(&self, a: &str, b: &str) -> Ordering;
    /// Equal keys compare equal. Substring matching works on keys.
    fn key(&self, s: &str) -> String {
        s.to_string()
    }
}

pub struct CodepointCollation;

impl Collation for CodepointCollation {
    fn uri(&self) -> &str {
        CODEPOINT_URI
    }
    fn compare(&self, a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }
}

/// Collation that orders strings by a folded key.
pub struct FoldingCollation {
    uri: &'static str,
    fold: fn(&str) -> String,
}

impl FoldingCollation {
    /// ASCII-only case folding, as HTML attribute matching does it.
    pub const fn html_ascii_case() -> Self {
        Self {
            uri: HTML_ASCII_CASE_URI,
            fold: str::to_ascii_lowercase,
        }
    }

    pub const fn simple_case() -> Self {
        Self {
            uri: SIMPLE_CASE_URI,
            fold: str::to_lowercase,
        }
    }

    /// NFD with combining marks removed.
    pub const fn simple_accent() -> Self {
        Self {
            uri: SIMPLE_ACCENT_URI,
            fold: strip_accents,
        }
    }
}

fn strip_accents(s: &str) -> String {
    s.nfd().filter(|&ch| canonical_combining_class(ch) == 0).collect()
}

impl Collation for FoldingCollation {
    fn uri(&self) -> &str {
        self.uri
    }
    fn compare(&self, a: &str, b: &str) -> Ordering {
        (self.fold)(a).cmp(&(self.fold)(b))
    }
    fn key(&self, s: &str) -> String {
        (self.fold)(s)
    }
}

/// Collations known to an evaluation, by URI.
pub struct CollationRegistry {
    by_uri: HashMap<String, Arc<dyn Collation>>,
}

impl Default for CollationRegistry {
    fn default() -> Self {
        let builtin: [Arc<dyn Collation>; 4] = [
            Arc::new(CodepointCollation),
            Arc::new(FoldingCollation::html_ascii_case()),
            Arc::new(FoldingCollation::simple_case()),
            Arc::new(FoldingCollation::simple_accent()),
        ];
        let mut reg = Self { by_uri: HashMap::new() };
        for c in builtin {
            reg.insert(c);
        }
        reg
    }
}

impl CollationRegistry {
    pub fn insert(&mut self, c: Arc<dyn Collation>) {
        self.by_uri.insert(c.uri().to_string(), c);
    }

    pub fn get(&self, uri: &str) -> Option<Arc<dyn Collation>> {
        self.by_uri.get(uri).cloned()
    }

    pub fn codepoint(&self) -> Arc<dyn Collation> {
        self.get(CODEPOINT_URI).unwrap_or_else(|| Arc::new(CodepointCollation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folding_collations_compare_keys() {
        let reg = CollationRegistry::default();
        let case = reg.get(SIMPLE_CASE_URI).unwrap();
        assert_eq!(case.compare("ABC", "abc"), Ordering::Equal);
        let accent = reg.get(SIMPLE_ACCENT_URI).unwrap();
        assert_eq!(accent.compare("café", "cafe"), Ordering::Equal);
        let html = reg.get(HTML_ASCII_CASE_URI).unwrap();
        assert_ne!(html.compare("Ä", "ä"), Ordering::Equal);
        assert!(reg.get("urn:unknown").is_none());
    }
}

//! Technical term counting.

use regex::Regex;
use std::collections::BTreeMap;

/// Terms tracked when no list is configured.
pub const DEFAULT_TERMS: &[&str] = &[
    "IPMI",
    "BMC",
    "Redfish",
    "ipmitool",
    "API",
    "HTTP",
    "REST",
    "JSON",
    "XML",
    "SNMP",
    "SSH",
    "Telnet",
    "CLI",
    "GUI",
    "firmware",
    "BIOS",
    "UEFI",
    "sensor",
    "temperature",
    "voltage",
    "power",
    "fan",
    "CPU",
    "memory",
    "storage",
];

/// Occurrence counts keyed by term.
pub type TermCounts = BTreeMap<String, usize>;

/// Case-insensitive, word-bounded term matcher.
#[derive(Debug, Clone)]
pub struct TermCounter {
    terms: Vec<(String, Regex)>,
}

impl TermCounter {
    /// Build a counter for the given terms. Blank and duplicate terms are skipped.
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut compiled: Vec<(String, Regex)> = Vec::new();
        for term in terms {
            let term = term.as_ref().trim();
            if term.is_empty() || compiled.iter().any(|(t, _)| t.eq_ignore_ascii_case(term)) {
                continue;
            }
            match Regex::new(&format!("(?i){}", regex::escape(term))) {
                Ok(re) => compiled.push((term.to_string(), re)),
                Err(e) => log::warn!("skipping term '{}': {}", term, e),
            }
        }
        Self { terms: compiled }
    }

    /// Counter over [`DEFAULT_TERMS`].
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_TERMS)
    }

    /// Number of tracked terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Check if no terms are tracked.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Count occurrences of every term. Terms that never occur are omitted.
    pub fn count(&self, text: &str) -> TermCounts {
        let mut counts = TermCounts::new();
        for (term, re) in &self.terms {
            let n = re
                .find_iter(text)
                .filter(|m| is_word_bounded(text, m.start(), m.end()))
                .count();
            if n > 0 {
                counts.insert(term.clone(), n);
            }
        }
        counts
    }
}

impl Default for TermCounter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Sum of all occurrences.
pub fn total(counts: &TermCounts) -> usize {
    counts.values().sum()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_word_bounded(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
}

//! Markdown well-formedness checks.

use crate::parser::{LineRole, MarkdownMap, Position};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn unspaced_heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^ {0,3}#{1,6}[^#\s]").unwrap())
}

fn table_separator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\|?\s*:?-{3,}:?\s*(\|\s*:?-{3,}:?\s*)*\|?\s*$").unwrap())
}

fn list_item_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s*)([-*+]|\d+[.)])\s+\S").unwrap())
}

/// Kind of malformed construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkupIssue {
    /// Heading more than one level deeper than the previous heading
    HeadingJump,
    /// `#Title` with no space after the marker
    HeadingMissingSpace,
    /// Table rows without a header separator
    OrphanTableRow,
    /// Indented list item with no parent list
    OrphanListItem,
}

impl MarkupIssue {
    /// Human-readable description.
    pub fn describe(&self) -> &'static str {
        match self {
            MarkupIssue::HeadingJump => "heading level jump",
            MarkupIssue::HeadingMissingSpace => "heading without space after '#'",
            MarkupIssue::OrphanTableRow => "table rows without header separator",
            MarkupIssue::OrphanListItem => "nested list item without parent list",
        }
    }
}

/// A malformed construct located in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupProblem {
    /// Page number (1-indexed)
    pub page: u32,
    /// Line number within the page (1-indexed)
    pub line: usize,
    /// What is wrong
    pub kind: MarkupIssue,
    /// The offending line
    pub snippet: String,
}

/// Scanner state carried across pages.
#[derive(Default)]
struct MarkupScanner {
    last_heading: Option<u8>,
    in_list: bool,
    table: Vec<(u32, usize, String)>,
    problems: Vec<MarkupProblem>,
}

impl MarkupScanner {
    fn scan(&mut self, map: &MarkdownMap) {
        let mut page = None;
        for (at, line, role) in map.lines() {
            if page != Some(at.page) {
                self.flush_table();
                page = Some(at.page);
            }

            match role {
                LineRole::Code => {
                    self.flush_table();
                    self.in_list = false;
                    continue;
                }
                LineRole::Heading(level) => {
                    self.flush_table();
                    if let Some(prev) = self.last_heading {
                        if level > prev + 1 {
                            self.push(at, MarkupIssue::HeadingJump, line);
                        }
                    }
                    self.last_heading = Some(level);
                    self.in_list = false;
                    continue;
                }
                LineRole::HeadingContinuation => continue,
                LineRole::Text => {}
            }

            let trimmed = line.trim();
            if trimmed.starts_with('|') {
                self.table.push((at.page, at.line, line.to_string()));
                continue;
            }
            self.flush_table();

            if unspaced_heading_regex().is_match(line) {
                self.push(at, MarkupIssue::HeadingMissingSpace, line);
                continue;
            }

            if let Some(caps) = list_item_regex().captures(line) {
                let indent = caps.get(1).map_or(0, |m| m.as_str().len());
                if indent >= 2 && !self.in_list {
                    self.push(at, MarkupIssue::OrphanListItem, line);
                }
                self.in_list = true;
                continue;
            }

            // Blank lines and indented continuations keep a list open
            if !trimmed.is_empty() && !line.starts_with([' ', '\t']) {
                self.in_list = false;
            }
        }
        self.flush_table();
    }

    fn flush_table(&mut self) {
        if self.table.is_empty() {
            return;
        }
        let rows = std::mem::take(&mut self.table);
        let has_separator = rows
            .get(1)
            .is_some_and(|(_, _, l)| table_separator_regex().is_match(l.trim()));
        if !has_separator {
            let (page, line, snippet) = &rows[0];
            self.push(Position { page: *page, line: *line }, MarkupIssue::OrphanTableRow, snippet);
        }
    }

    fn push(&mut self, at: Position, kind: MarkupIssue, snippet: &str) {
        self.problems.push(MarkupProblem {
            page: at.page,
            line: at.line,
            kind,
            snippet: snippet.to_string(),
        });
    }
}

/// Find malformed constructs in a parsed document.
pub fn check_markup(map: &MarkdownMap) -> Vec<MarkupProblem> {
    let mut scanner = MarkupScanner::default();
    scanner.scan(map);
    scanner.problems
}

/// Score 1.0 minus `penalty` per problem, floored at 0.
pub fn formatting_score(problems: usize, penalty: f64) -> f64 {
    (1.0 - penalty * problems as f64).max(0.0)
}

//! Markdown outline parsing.
//!
//! Block structure comes from pulldown-cmark. The pages of a document are
//! parsed as one stream, so a code block opened on one page can close on the
//! next; every element is located by page and line.

use crate::model::{ContentDigest, CrossReference, NodeId, Outline, OutlineNode, Page};
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

fn anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*\{#([A-Za-z0-9_.:\-]+)\}$").unwrap())
}

fn parser_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH
}

/// Page and line of a Markdown element, both 1-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub page: u32,
    pub line: usize,
}

/// An ATX or setext heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    /// Level 1-6
    pub level: u8,
    /// Title text without markup or `{#anchor}` suffix
    pub title: String,
    /// Explicit `{#anchor}`, if any
    pub anchor: Option<String>,
    /// First line of the heading
    pub start: Position,
    /// Last line (the underline of a setext heading)
    pub end: Position,
    span: Range<usize>,
}

/// A fenced or indented code block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub start: Position,
    pub end: Position,
    /// Opened with ``` or ~~~
    pub fenced: bool,
    /// Whether a matching closing fence was found. Indented blocks are always closed.
    pub closed: bool,
    span: Range<usize>,
}

/// A link to an anchor inside the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorLink {
    /// Anchor without the leading `#`
    pub target: String,
    pub at: Position,
    offset: usize,
}

/// What a source line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRole {
    /// Paragraphs, lists, tables and blank lines
    Text,
    /// First line of a heading of the given level
    Heading(u8),
    /// Further lines of a heading
    HeadingContinuation,
    /// Inside a code block, fences included
    Code,
}

#[derive(Debug, Clone)]
struct SourceLine {
    at: Position,
    start: usize,
    len: usize,
    role: LineRole,
}

/// Summary of fenced code blocks in a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FenceSummary {
    /// Closed code blocks
    pub complete: usize,
    /// Whether a block was left open
    pub unclosed: bool,
}

impl FenceSummary {
    /// Check that every opened block was closed.
    pub fn is_balanced(&self) -> bool {
        !self.unclosed
    }
}

/// Headings, code blocks and anchor links of a paged Markdown text.
#[derive(Debug, Clone, Default)]
pub struct MarkdownMap {
    text: String,
    lines: Vec<SourceLine>,
    headings: Vec<Heading>,
    code_blocks: Vec<CodeBlock>,
    links: Vec<AnchorLink>,
}

impl MarkdownMap {
    /// Parse pages given as (page number, text).
    pub fn parse<'a, I>(pages: I) -> Self
    where
        I: IntoIterator<Item = (u32, &'a str)>,
    {
        let mut text = String::new();
        let mut lines = Vec::new();
        for (page, page_text) in pages {
            let mut offset = text.len();
            for (idx, line) in page_text.split_inclusive('\n').enumerate() {
                let content = line.trim_end_matches(['\n', '\r']);
                lines.push(SourceLine {
                    at: Position { page, line: idx + 1 },
                    start: offset,
                    len: content.len(),
                    role: LineRole::Text,
                });
                offset += line.len();
            }
            text.push_str(page_text);
            if !text.ends_with('\n') {
                text.push('\n');
            }
            // Blank line between pages
            text.push('\n');
        }

        let mut map = Self {
            lines,
            ..Self::default()
        };
        map.collect_elements(&text);
        map.text = text;
        map.assign_roles();
        map
    }

    /// Parse a single text as page 1.
    pub fn parse_text(text: &str) -> Self {
        Self::parse([(1, text)])
    }

    fn collect_elements(&mut self, text: &str) {
        let mut heading: Option<(u8, String, Range<usize>)> = None;

        for (event, range) in Parser::new_ext(text, parser_options()).into_offset_iter() {
            match event {
                Event::Start(Tag::Heading { level, .. }) => {
                    heading = Some((level as u8, String::new(), range));
                }
                Event::End(TagEnd::Heading(_)) => {
                    if let Some((level, raw, span)) = heading.take() {
                        let (title, anchor) = split_anchor(raw.trim());
                        self.headings.push(Heading {
                            level,
                            title,
                            anchor,
                            start: self.position(span.start),
                            end: self.position(last_byte(&span)),
                            span,
                        });
                    }
                }
                Event::Text(t) | Event::Code(t) => {
                    if let Some((_, raw, _)) = heading.as_mut() {
                        raw.push_str(&t);
                    }
                }
                Event::SoftBreak | Event::HardBreak => {
                    if let Some((_, raw, _)) = heading.as_mut() {
                        raw.push(' ');
                    }
                }
                Event::Start(Tag::CodeBlock(kind)) => {
                    let fenced = matches!(kind, CodeBlockKind::Fenced(_));
                    self.code_blocks.push(CodeBlock {
                        start: self.position(range.start),
                        end: self.position(last_byte(&range)),
                        fenced,
                        closed: !fenced || fence_closed(&text[range.clone()]),
                        span: range,
                    });
                }
                Event::Start(Tag::Link { dest_url, .. }) => {
                    if let Some(target) = dest_url.strip_prefix('#').filter(|t| !t.is_empty()) {
                        self.links.push(AnchorLink {
                            target: target.to_string(),
                            at: self.position(range.start),
                            offset: range.start,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn line_index(&self, offset: usize) -> Option<usize> {
        self.lines.partition_point(|l| l.start <= offset).checked_sub(1)
    }

    fn position(&self, offset: usize) -> Position {
        self.line_index(offset)
            .map(|i| self.lines[i].at)
            .unwrap_or(Position { page: 1, line: 1 })
    }

    /// Indices of the lines a byte span touches.
    fn line_range(&self, span: &Range<usize>) -> Range<usize> {
        match (self.line_index(span.start), self.line_index(last_byte(span))) {
            (Some(first), Some(last)) if last >= first => first..last + 1,
            _ => 0..0,
        }
    }

    fn assign_roles(&mut self) {
        let code: Vec<Range<usize>> = self.code_blocks.iter().map(|b| self.line_range(&b.span)).collect();
        for range in code {
            for line in &mut self.lines[range] {
                line.role = LineRole::Code;
            }
        }
        let headings: Vec<(u8, Range<usize>)> = self
            .headings
            .iter()
            .map(|h| (h.level, self.line_range(&h.span)))
            .collect();
        for (level, range) in headings {
            for (i, line) in self.lines[range].iter_mut().enumerate() {
                line.role = if i == 0 {
                    LineRole::Heading(level)
                } else {
                    LineRole::HeadingContinuation
                };
            }
        }
    }

    /// Headings in document order.
    pub fn headings(&self) -> &[Heading] {
        &self.headings
    }

    /// Code blocks in document order.
    pub fn code_blocks(&self) -> &[CodeBlock] {
        &self.code_blocks
    }

    /// Internal `(#anchor)` links in document order.
    pub fn links(&self) -> &[AnchorLink] {
        &self.links
    }

    /// Every source line with its position and role.
    pub fn lines(&self) -> impl Iterator<Item = (Position, &str, LineRole)> + '_ {
        self.lines
            .iter()
            .map(|l| (l.at, &self.text[l.start..l.start + l.len], l.role))
    }

    /// Fenced code blocks: how many closed, and whether one was left open.
    pub fn fences(&self) -> FenceSummary {
        let fenced = self.code_blocks.iter().filter(|b| b.fenced);
        FenceSummary {
            complete: fenced.clone().filter(|b| b.closed).count(),
            unclosed: fenced.clone().any(|b| !b.closed),
        }
    }

    /// Text between a heading and the next one.
    fn section_body(&self, index: usize) -> &str {
        let start = self.headings[index].span.end;
        let end = self
            .headings
            .get(index + 1)
            .map_or(self.text.len(), |h| h.span.start);
        self.text.get(start..end.max(start)).unwrap_or("")
    }

    /// Build the heading outline with section digests and cross-references.
    pub fn outline(&self) -> Outline {
        let mut outline = Outline::new();
        let mut stack: Vec<(u8, NodeId)> = Vec::new();
        let mut ids = Vec::with_capacity(self.headings.len());

        for (index, heading) in self.headings.iter().enumerate() {
            while stack.last().is_some_and(|(l, _)| *l >= heading.level) {
                stack.pop();
            }
            let parent = stack.last().map(|(_, id)| *id);

            let anchor = heading.anchor.clone().unwrap_or_else(|| slugify(&heading.title));
            let mut node = OutlineNode::new(heading.level, heading.title.clone()).with_page(heading.start.page);
            if !anchor.is_empty() {
                node = node.with_anchor(anchor);
            }
            node.digest = ContentDigest::from_content(self.section_body(index));

            let id = outline.add_node(parent, node);
            stack.push((heading.level, id));
            ids.push(id);
        }

        for link in &self.links {
            let owner = self
                .headings
                .partition_point(|h| h.span.start <= link.offset)
                .checked_sub(1)
                .and_then(|i| ids.get(i).copied());
            outline.add_reference(CrossReference {
                from: owner,
                target: link.target.clone(),
                page: Some(link.at.page),
            });
        }
        outline
    }
}

fn last_byte(range: &Range<usize>) -> usize {
    range.end.saturating_sub(1).max(range.start)
}

fn split_anchor(raw: &str) -> (String, Option<String>) {
    match anchor_regex().captures(raw) {
        Some(caps) => {
            let start = caps.get(0).map_or(raw.len(), |m| m.start());
            let anchor = caps.get(1).map(|m| m.as_str().to_string());
            (raw[..start].trim().to_string(), anchor)
        }
        None => (raw.to_string(), None),
    }
}

fn strip_container(line: &str) -> &str {
    line.trim_start_matches(|c: char| c == '>' || c.is_whitespace())
}

/// Whether a fenced block's source ends with a fence closing its opener.
fn fence_closed(block: &str) -> bool {
    let mut lines = block.trim_end().lines();
    let Some(opener) = lines.next().map(strip_container) else {
        return false;
    };
    let Some(ch) = opener.chars().next() else {
        return false;
    };
    let len = opener.chars().take_while(|c| *c == ch).count();
    lines.next_back().is_some_and(|closer| {
        let closer = strip_container(closer).trim_end();
        closer.chars().count() >= len && closer.chars().all(|c| c == ch)
    })
}

/// Count fenced code blocks and detect an unterminated one.
pub fn scan_fences(text: &str) -> FenceSummary {
    MarkdownMap::parse_text(text).fences()
}

/// Turn a heading title into a link anchor (GitHub style).
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = false;
    for c in title.trim().chars() {
        if c.is_alphanumeric() || c == '_' {
            slug.extend(c.to_lowercase());
            last_dash = false;
        } else if (c.is_whitespace() || c == '-') && !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Parse a single heading line into (level, title, explicit anchor).
pub fn parse_heading(line: &str) -> Option<(u8, String, Option<String>)> {
    MarkdownMap::parse_text(line)
        .headings
        .into_iter()
        .next()
        .filter(|h| h.start.line == 1)
        .map(|h| (h.level, h.title, h.anchor))
}

/// Parse the heading outline of a sequence of pages.
pub fn parse_outline(pages: &[Page]) -> Outline {
    MarkdownMap::parse(pages.iter().map(|p| (p.number, p.text.as_str()))).outline()
}

/// Parse the heading outline of a single Markdown text.
pub fn parse_outline_text(text: &str) -> Outline {
    MarkdownMap::parse_text(text).outline()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heading() {
        assert_eq!(
            parse_heading("## Sensor List"),
            Some((2, "Sensor List".to_string(), None))
        );
        assert_eq!(
            parse_heading("# Power Control {#power}"),
            Some((1, "Power Control".to_string(), Some("power".to_string())))
        );
        assert_eq!(
            parse_heading("### Closed ###"),
            Some((3, "Closed".to_string(), None))
        );
        assert_eq!(parse_heading("#NoSpace"), None);
        assert_eq!(parse_heading("####### Too deep"), None);
        assert_eq!(parse_heading("    # indented code"), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Power Control"), "power-control");
        assert_eq!(slugify("  IPMI / BMC: Setup! "), "ipmi-bmc-setup");
        assert_eq!(slugify("传感器 列表"), "传感器-列表");
    }

    #[test]
    fn test_outline_tree() {
        let outline = parse_outline_text(
            "# Intro\ntext\n## Overview\nmore\n## Scope\n# Methods\n### Deep\n",
        );
        assert_eq!(outline.len(), 5);
        assert_eq!(outline.roots().len(), 2);

        let intro = outline.node(NodeId(0)).unwrap();
        assert_eq!(intro.children, vec![NodeId(1), NodeId(2)]);
        assert_eq!(intro.digest.excerpt, "text");

        // Level jump still nests under the nearest shallower heading
        let deep = outline.node(NodeId(4)).unwrap();
        assert_eq!(deep.parent, Some(NodeId(3)));
    }

    #[test]
    fn test_setext_headings() {
        let outline = parse_outline_text("Sensors\n=======\n\nFan speed.\n\nReadings\n--------\n");
        assert_eq!(outline.len(), 2);
        let sensors = outline.node(NodeId(0)).unwrap();
        assert_eq!((sensors.level, sensors.title.as_str()), (1, "Sensors"));
        assert_eq!(outline.node(NodeId(1)).unwrap().parent, Some(NodeId(0)));

        let map = MarkdownMap::parse_text("Sensors\n=======\n");
        let roles: Vec<LineRole> = map.lines().map(|(_, _, role)| role).collect();
        assert_eq!(roles, vec![LineRole::Heading(1), LineRole::HeadingContinuation]);
    }

    #[test]
    fn test_headings_inside_code_ignored() {
        let outline = parse_outline_text("# Real\n```bash\n# not a heading\n```\n");
        assert_eq!(outline.len(), 1);
        assert!(outline
            .node(NodeId(0))
            .unwrap()
            .digest
            .excerpt
            .contains("# not a heading"));

        // Indented code and fences nested in list items
        let outline = parse_outline_text("# Real\n\n    # indented\n\n- step\n\n  ```\n  # in list\n  ```\n");
        assert_eq!(outline.len(), 1);
    }

    #[test]
    fn test_cross_references() {
        let outline = parse_outline_text(
            "# Setup {#setup}\nSee [power](#power-control).\n# Power Control\nBack to [setup](#setup).\n",
        );
        assert_eq!(outline.references().len(), 2);
        assert_eq!(outline.references()[0].from, Some(NodeId(0)));
        assert_eq!(outline.references()[1].from, Some(NodeId(1)));
        assert!(outline.broken_references().is_empty());

        let broken = parse_outline_text("# A\n[missing](#nowhere)\n");
        assert_eq!(broken.broken_references().len(), 1);

        // Links inside code are not links
        let code = parse_outline_text("# A\n```\n[x](#nowhere)\n```\n");
        assert!(code.references().is_empty());
    }

    #[test]
    fn test_scan_fences() {
        let summary = scan_fences("```bash\nipmitool power status\n```\n~~~\nx\n~~~\n");
        assert_eq!(summary.complete, 2);
        assert!(summary.is_balanced());

        let summary = scan_fences("```\nopen forever\n");
        assert_eq!(summary.complete, 0);
        assert!(!summary.is_balanced());

        // A tilde line does not close a backtick fence
        let summary = scan_fences("```\n~~~\n```\n");
        assert_eq!(summary.complete, 1);
        assert!(summary.is_balanced());

        // Indented code is not a fence
        let summary = scan_fences("Text.\n\n    ipmitool mc info\n");
        assert_eq!(summary, FenceSummary::default());
    }

    #[test]
    fn test_fence_in_list_item() {
        let summary = scan_fences("1. Run:\n\n   ```\n   ipmitool mc reset cold\n   ```\n");
        assert_eq!(summary.complete, 1);
        assert!(summary.is_balanced());
    }

    #[test]
    fn test_fence_spans_pages() {
        let map = MarkdownMap::parse([(1, "# A\n```\nline one\n"), (2, "line two\n```\n# B\n")]);
        assert_eq!(map.fences(), FenceSummary { complete: 1, unclosed: false });
        let block = &map.code_blocks()[0];
        assert_eq!(block.start, Position { page: 1, line: 2 });
        assert_eq!(block.end, Position { page: 2, line: 2 });
        assert_eq!(map.headings().len(), 2);
        assert_eq!(map.headings()[1].start, Position { page: 2, line: 3 });
    }

    #[test]
    fn test_pages_keep_numbers() {
        let pages = vec![Page::new(1, "# A\n"), Page::new(2, "## B\n")];
        let outline = parse_outline(&pages);
        assert_eq!(outline.node(NodeId(1)).unwrap().page, Some(2));
        assert_eq!(outline.node(NodeId(1)).unwrap().parent, Some(NodeId(0)));
    }
}

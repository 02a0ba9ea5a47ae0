//! Markdown parsing for outlines and code blocks.

mod markdown;

pub use markdown::{
    parse_heading, parse_outline, parse_outline_text, scan_fences, slugify, AnchorLink, CodeBlock, FenceSummary,
    Heading, LineRole, MarkdownMap, Position,
};

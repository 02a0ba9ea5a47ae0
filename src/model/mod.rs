//! Document model types shared by every stage.
//!
//! Source and candidate documents use the same representation: an ordered
//! list of pages (text plus optional bitmap) and a heading outline stored as
//! an arena.

mod document;
mod outline;
mod page;

pub use document::{Document, Metadata, PAGE_SEPARATOR};
pub use outline::{ContentDigest, CrossReference, NodeId, Outline, OutlineNode};
pub use page::Page;

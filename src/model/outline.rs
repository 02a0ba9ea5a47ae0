//! Heading outline stored as an arena of nodes.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Index of a node inside its [`Outline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Number of words kept in a digest excerpt.
const EXCERPT_WORDS: usize = 48;

/// Compact fingerprint of the content under a heading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDigest {
    /// Leading words of the normalized content
    pub excerpt: String,

    /// Hex MD5 of the full normalized content
    pub checksum: String,
}

impl ContentDigest {
    /// Build a digest from raw section content.
    pub fn from_content(content: &str) -> Self {
        let words: Vec<&str> = content.split_whitespace().collect();
        if words.is_empty() {
            return Self::default();
        }

        let normalized = words.join(" ");
        let mut hasher = Md5::new();
        hasher.update(normalized.as_bytes());
        let checksum = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>();

        let excerpt = words
            .iter()
            .take(EXCERPT_WORDS)
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        Self { excerpt, checksum }
    }

    /// Check if the section had no content.
    pub fn is_empty(&self) -> bool {
        self.excerpt.is_empty()
    }
}

/// A heading or content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineNode {
    /// Heading level (1 = top level)
    pub level: u8,

    /// Heading title
    pub title: String,

    /// Digest of the content under the heading
    pub digest: ContentDigest,

    /// Page the heading appears on (1-indexed)
    pub page: Option<u32>,

    /// Anchor other nodes may link to
    pub anchor: Option<String>,

    /// Parent node
    pub parent: Option<NodeId>,

    /// Ordered children
    pub children: Vec<NodeId>,
}

impl OutlineNode {
    /// Create a detached node.
    pub fn new(level: u8, title: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            digest: ContentDigest::default(),
            page: None,
            anchor: None,
            parent: None,
            children: Vec::new(),
        }
    }

    /// Set the content digest.
    pub fn with_digest(mut self, digest: ContentDigest) -> Self {
        self.digest = digest;
        self
    }

    /// Set the page number.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Set the anchor.
    pub fn with_anchor(mut self, anchor: impl Into<String>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }
}

/// An internal link from one place in the document to an anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReference {
    /// Node whose section contains the link (None before the first heading)
    pub from: Option<NodeId>,

    /// Target anchor without the leading `#`
    pub target: String,

    /// Page the link appears on
    pub page: Option<u32>,
}

/// Document outline: a forest of heading nodes plus internal links.
///
/// Nodes live in a flat arena and refer to each other by [`NodeId`], so
/// cloning an outline is a plain vector copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outline {
    nodes: Vec<OutlineNode>,
    roots: Vec<NodeId>,
    references: Vec<CrossReference>,
}

impl Outline {
    /// Create an empty outline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the outline has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a node under `parent` (or as a root) and return its id.
    ///
    /// A parent id that does not exist makes the node a root.
    pub fn add_node(&mut self, parent: Option<NodeId>, mut node: OutlineNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        let parent = parent.filter(|p| p.0 < self.nodes.len());
        node.parent = parent;
        node.children.clear();
        self.nodes.push(node);

        match parent {
            Some(p) => self.nodes[p.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Record an internal link.
    pub fn add_reference(&mut self, reference: CrossReference) {
        self.references.push(reference);
    }

    /// Get a node by id.
    pub fn node(&self, id: NodeId) -> Option<&OutlineNode> {
        self.nodes.get(id.0)
    }

    /// Mutable access to a node (content digests are filled in after parsing).
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut OutlineNode> {
        self.nodes.get_mut(id.0)
    }

    /// Top-level nodes in document order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// All recorded internal links.
    pub fn references(&self) -> &[CrossReference] {
        &self.references
    }

    /// Iterate over nodes in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &OutlineNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Node ids in depth-first preorder.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(node) = self.node(id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
    }

    /// Tree depth of a node (roots have depth 1).
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = Some(id);
        while let Some(c) = current {
            depth += 1;
            current = self.node(c).and_then(|n| n.parent);
        }
        depth
    }

    /// Maximum tree depth.
    pub fn max_depth(&self) -> usize {
        (0..self.nodes.len())
            .map(|i| self.depth(NodeId(i)))
            .max()
            .unwrap_or(0)
    }

    /// Distinct heading levels in ascending order.
    pub fn levels(&self) -> Vec<u8> {
        let mut levels: Vec<u8> = self.nodes.iter().map(|n| n.level).collect();
        levels.sort_unstable();
        levels.dedup();
        levels
    }

    /// Ids of nodes with the given heading level, in preorder.
    pub fn nodes_at_level(&self, level: u8) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.node(*id).is_some_and(|n| n.level == level))
            .collect()
    }

    /// Find the node carrying an anchor.
    pub fn find_anchor(&self, anchor: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.anchor.as_deref() == Some(anchor))
            .map(NodeId)
    }

    /// Links whose target anchor does not exist.
    pub fn broken_references(&self) -> Vec<&CrossReference> {
        self.references
            .iter()
            .filter(|r| self.find_anchor(&r.target).is_none())
            .collect()
    }
}

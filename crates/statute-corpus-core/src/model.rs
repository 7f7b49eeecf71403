//! Core data models used throughout Statute Corpus.
//!
//! A parsed statute is a tree of [`StructureNode`]s (document → section →
//! subsection → paragraph → …). The chunker walks that tree and emits
//! [`Chunk`]s, which are the records handed to the external indexer and
//! serialized into a corpus version's chunk stream.

use serde::{Deserialize, Serialize};

/// Structural level of a node. Declaration order is nesting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Document,
    Section,
    Subsection,
    Paragraph,
    Subparagraph,
    Clause,
    Subclause,
}

impl NodeKind {
    /// Nesting depth of this kind (`Document` is 0).
    pub fn depth(self) -> usize {
        self as usize
    }

    /// Every level below the document root must carry a label.
    pub fn requires_label(self) -> bool {
        !matches!(self, NodeKind::Document)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Document => "document",
            NodeKind::Section => "section",
            NodeKind::Subsection => "subsection",
            NodeKind::Paragraph => "paragraph",
            NodeKind::Subparagraph => "subparagraph",
            NodeKind::Clause => "clause",
            NodeKind::Subclause => "subclause",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item of a node's ordered content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeContent {
    /// A literal text fragment owned directly by the node.
    Text(String),
    /// A structural child, at its point of occurrence.
    Child(StructureNode),
}

/// A labeled node in the statute hierarchy.
///
/// Own text and children are kept in a single ordered list so that text
/// following a node's children (e.g. the closing words of a subsection
/// after its paragraphs) keeps its document position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureNode {
    kind: NodeKind,
    label: Option<String>,
    heading: Option<String>,
    content: Vec<NodeContent>,
}

impl StructureNode {
    pub fn new(
        kind: NodeKind,
        label: Option<String>,
        heading: Option<String>,
        content: Vec<NodeContent>,
    ) -> Self {
        Self {
            kind,
            label,
            heading,
            content,
        }
    }

    /// Convenience constructor for a labeled node with no content yet.
    pub fn labeled(kind: NodeKind, label: &str) -> Self {
        Self::new(kind, Some(label.to_string()), None, Vec::new())
    }

    pub fn with_heading(mut self, heading: &str) -> Self {
        self.heading = Some(heading.to_string());
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.content.push(NodeContent::Text(text.to_string()));
        self
    }

    pub fn with_child(mut self, child: StructureNode) -> Self {
        self.content.push(NodeContent::Child(child));
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn heading(&self) -> Option<&str> {
        self.heading.as_deref()
    }

    pub fn content(&self) -> &[NodeContent] {
        &self.content
    }

    /// Text fragments owned directly by this node, in document order.
    pub fn text_segments(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|item| match item {
            NodeContent::Text(text) => Some(text.as_str()),
            NodeContent::Child(_) => None,
        })
    }

    /// Structural children, in document order.
    pub fn children(&self) -> impl Iterator<Item = &StructureNode> {
        self.content.iter().filter_map(|item| match item {
            NodeContent::Child(child) => Some(child),
            NodeContent::Text(_) => None,
        })
    }

    pub fn has_children(&self) -> bool {
        self.children().next().is_some()
    }

    /// True when no text exists anywhere in this subtree.
    pub fn is_empty(&self) -> bool {
        self.content.iter().all(|item| match item {
            NodeContent::Text(text) => text.is_empty(),
            NodeContent::Child(child) => child.is_empty(),
        })
    }

    /// Full text of the subtree: every non-empty segment in document
    /// order, joined by `\n`. Labels and headings are not included.
    pub fn full_text(&self) -> String {
        let mut segments = Vec::new();
        self.collect_segments(&mut segments);
        segments.join("\n")
    }

    fn collect_segments<'a>(&'a self, out: &mut Vec<&'a str>) {
        for item in &self.content {
            match item {
                NodeContent::Text(text) if !text.is_empty() => out.push(text),
                NodeContent::Text(_) => {}
                NodeContent::Child(child) => child.collect_segments(out),
            }
        }
    }
}

/// A parsed source document: the structure tree plus document-level
/// metadata read from the markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    /// Logical source name (e.g. `"ITA"`).
    pub source: String,
    /// Consolidation date recorded in the markup, if any (ISO 8601).
    pub consolidation_date: Option<String>,
    pub root: StructureNode,
}

impl ParsedDocument {
    /// Top-level structural nodes (usually sections).
    pub fn sections(&self) -> impl Iterator<Item = &StructureNode> {
        self.root.children()
    }
}

/// One `(kind, label)` step of a chunk's structural path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub kind: NodeKind,
    pub label: String,
}

impl PathSegment {
    pub fn new(kind: NodeKind, label: &str) -> Self {
        Self {
            kind,
            label: label.to_string(),
        }
    }
}

/// Render a citation for a structural path: the section label bare, every
/// deeper label in parentheses, e.g. `118(1)(a)`.
pub fn render_reference(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment.kind {
            NodeKind::Document => {}
            NodeKind::Section => out.push_str(&segment.label),
            _ => {
                out.push('(');
                out.push_str(&segment.label);
                out.push(')');
            }
        }
    }
    out
}

/// An atomic retrievable unit of statute text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Logical source name the chunk was cut from.
    pub source: String,
    /// Position in the document's chunk stream, starting at 0.
    pub sequence_index: usize,
    /// Citation unique within the document's stream, e.g. `118(1)(a)`.
    pub reference: String,
    /// Reference of the enclosing structural node, `None` at section level.
    pub parent_reference: Option<String>,
    pub path: Vec<PathSegment>,
    /// Nearest marginal note along the path.
    pub heading: Option<String>,
    /// Full citation including the source abbreviation, e.g.
    /// `ITA s.118(1)(a)`. Set once the chunk is attributed to a source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    /// Title of the source document, e.g. `Income Tax Act`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    pub token_estimate: usize,
    pub over_budget: bool,
    /// Byte length of the overlap prefix at the start of `text`.
    pub overlap_bytes: usize,
    /// SHA-256 of `text`.
    pub hash: String,
    pub text: String,
}

impl Chunk {
    /// Stable identifier for the indexer: source name plus sequence index.
    pub fn chunk_id(&self) -> String {
        format!("{}-{:05}", self.source, self.sequence_index)
    }

    /// True when `overlap_bytes` falls on a character boundary of `text`.
    pub fn has_valid_overlap(&self) -> bool {
        self.text.is_char_boundary(self.overlap_bytes)
    }

    /// The chunk's own content, without the overlap prefix. The whole text
    /// when `overlap_bytes` is out of range.
    pub fn body(&self) -> &str {
        self.text.get(self.overlap_bytes..).unwrap_or(&self.text)
    }

    /// The overlap prefix copied from the previous chunk (empty for none).
    pub fn overlap(&self) -> &str {
        self.text
            .get(..self.overlap_bytes)
            .unwrap_or("")
            .trim_end_matches('\n')
    }

    /// Human-readable citation, e.g. `ITA s.118(1)(a)`.
    pub fn cite(&self, abbreviation: &str) -> String {
        if self.path.is_empty() {
            format!("{} {}", abbreviation, self.reference)
        } else {
            format!("{} s.{}", abbreviation, self.reference)
        }
    }

    /// Record the source's citation prefix, title and document type.
    pub fn attribute(
        &mut self,
        abbreviation: &str,
        title: Option<&str>,
        document_type: Option<&str>,
    ) {
        self.citation = Some(self.cite(abbreviation));
        self.title = title.map(str::to_string);
        self.document_type = document_type.map(str::to_string);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_text_interleaves_own_text_with_children() {
        let node = StructureNode::labeled(NodeKind::Subsection, "1")
            .with_text("In computing tax payable,")
            .with_child(StructureNode::labeled(NodeKind::Paragraph, "a").with_text("the amount"))
            .with_text("is deducted.");
        assert_eq!(
            node.full_text(),
            "In computing tax payable,\nthe amount\nis deducted."
        );
        assert_eq!(node.text_segments().count(), 2);
        assert_eq!(node.children().count(), 1);
    }

    #[test]
    fn test_empty_segments_are_not_joined() {
        let node = StructureNode::labeled(NodeKind::Paragraph, "a")
            .with_text("")
            .with_text("only");
        assert_eq!(node.full_text(), "only");
    }

    #[test]
    fn test_navigation_node_is_empty() {
        let node = StructureNode::labeled(NodeKind::Section, "2").with_heading("Tax payable");
        assert!(node.is_empty());
        assert!(!node.has_children());
    }

    #[test]
    fn test_reference_rendering() {
        let path = vec![
            PathSegment::new(NodeKind::Section, "118"),
            PathSegment::new(NodeKind::Subsection, "1"),
            PathSegment::new(NodeKind::Paragraph, "a"),
        ];
        assert_eq!(render_reference(&path), "118(1)(a)");
        assert_eq!(render_reference(&path[..1]), "118");
        assert_eq!(render_reference(&[]), "");
    }

    #[test]
    fn test_kind_order_is_nesting_order() {
        assert!(NodeKind::Document < NodeKind::Section);
        assert!(NodeKind::Paragraph < NodeKind::Subparagraph);
        assert_eq!(NodeKind::Subclause.depth(), 6);
        assert!(!NodeKind::Document.requires_label());
        assert!(NodeKind::Section.requires_label());
    }

    #[test]
    fn test_chunk_body_and_citation() {
        let chunk = Chunk {
            source: "ITA".to_string(),
            sequence_index: 3,
            reference: "118(2)".to_string(),
            parent_reference: Some("118".to_string()),
            path: vec![
                PathSegment::new(NodeKind::Section, "118"),
                PathSegment::new(NodeKind::Subsection, "2"),
            ],
            heading: None,
            citation: None,
            title: None,
            document_type: None,
            token_estimate: 4,
            over_budget: false,
            overlap_bytes: 5,
            hash: String::new(),
            text: "tail\nbody".to_string(),
        };
        assert_eq!(chunk.body(), "body");
        assert_eq!(chunk.overlap(), "tail");
        assert_eq!(chunk.chunk_id(), "ITA-00003");
        assert_eq!(chunk.cite("ITA"), "ITA s.118(2)");
    }

    fn sample_chunk(text: &str, overlap_bytes: usize) -> Chunk {
        Chunk {
            source: "ITA".to_string(),
            sequence_index: 0,
            reference: "118".to_string(),
            parent_reference: None,
            path: vec![PathSegment::new(NodeKind::Section, "118")],
            heading: None,
            citation: None,
            title: None,
            document_type: None,
            token_estimate: 1,
            over_budget: false,
            overlap_bytes,
            hash: String::new(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_attribute_sets_source_metadata() {
        let mut chunk = sample_chunk("body", 0);
        chunk.attribute("ITA", Some("Income Tax Act"), Some("act"));
        assert_eq!(chunk.citation.as_deref(), Some("ITA s.118"));
        assert_eq!(chunk.title.as_deref(), Some("Income Tax Act"));
        assert_eq!(chunk.document_type.as_deref(), Some("act"));
    }

    #[test]
    fn test_bad_overlap_offsets_do_not_panic() {
        let past_end = sample_chunk("ab", 10);
        assert!(!past_end.has_valid_overlap());
        assert_eq!(past_end.body(), "ab");
        assert_eq!(past_end.overlap(), "");

        // Byte 1 falls inside the two-byte 'é'.
        let mid_char = sample_chunk("é\nbody", 1);
        assert!(!mid_char.has_valid_overlap());
        assert_eq!(mid_char.body(), "é\nbody");
        assert_eq!(mid_char.overlap(), "");
    }
}

//! Consolidated-statute parser.
//!
//! Maps a [`MarkupElement`] tree onto the structure model. The same rule
//! is applied at every level, whatever the depth: read the node's label
//! and heading, then walk its content in document order, turning `Text`
//! elements into text segments and structural elements into child nodes.
//! Elements that are neither are transparent: their own text and
//! structural descendants attach to the nearest structural ancestor.
//!
//! # Example
//!
//! ```rust
//! use statute_corpus_core::parser::parse_document;
//!
//! let xml = br#"<Statute><Body>
//!   <Section><Label>118</Label><MarginalNote>Personal credits</MarginalNote>
//!     <Subsection><Label>(1)</Label><Text>For the purpose of computing tax payable</Text></Subsection>
//!   </Section>
//! </Body></Statute>"#;
//! let doc = parse_document("ITA", xml).unwrap();
//! let section = doc.sections().next().unwrap();
//! assert_eq!(section.label(), Some("118"));
//! assert_eq!(section.heading(), Some("Personal credits"));
//! ```

use crate::error::{DocumentError, StructuralIntegrityError};
use crate::markup::{read_xml, MarkupElement, MarkupNode};
use crate::model::{render_reference, NodeContent, NodeKind, ParsedDocument, PathSegment, StructureNode};

/// Element names that drive extraction.
#[derive(Debug, Clone)]
pub struct ElementRules {
    /// Element name → structural kind.
    pub structural: Vec<(String, NodeKind)>,
    pub label: String,
    pub heading: String,
    pub text: String,
    /// Subtrees dropped entirely.
    pub ignored: Vec<String>,
    /// Block holding document-level metadata; never contributes text.
    pub identification: String,
    pub document_label: String,
    pub document_heading: String,
    /// Root attribute carrying the consolidation date.
    pub date_attribute: String,
}

impl Default for ElementRules {
    /// Rules for the Justice Laws consolidated XML format.
    fn default() -> Self {
        let structural = [
            ("Section", NodeKind::Section),
            ("Subsection", NodeKind::Subsection),
            ("Paragraph", NodeKind::Paragraph),
            ("Subparagraph", NodeKind::Subparagraph),
            ("Clause", NodeKind::Clause),
            ("Subclause", NodeKind::Subclause),
        ];
        Self {
            structural: structural
                .iter()
                .map(|(name, kind)| (name.to_string(), *kind))
                .collect(),
            label: "Label".to_string(),
            heading: "MarginalNote".to_string(),
            text: "Text".to_string(),
            ignored: vec!["HistoricalNote".to_string(), "Footnote".to_string()],
            identification: "Identification".to_string(),
            document_label: "ConsolidatedNumber".to_string(),
            document_heading: "ShortTitle".to_string(),
            date_attribute: "current-date".to_string(),
        }
    }
}

impl ElementRules {
    fn kind_of(&self, name: &str) -> Option<NodeKind> {
        self.structural
            .iter()
            .find(|(element, _)| element == name)
            .map(|(_, kind)| *kind)
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.ignored.iter().any(|ignored| ignored == name)
    }
}

/// Parse one source document with the default rules.
pub fn parse_document(source: &str, input: &[u8]) -> Result<ParsedDocument, DocumentError> {
    parse_document_with(source, input, &ElementRules::default())
}

/// Parse one source document with custom rules.
pub fn parse_document_with(
    source: &str,
    input: &[u8],
    rules: &ElementRules,
) -> Result<ParsedDocument, DocumentError> {
    let tree = read_xml(input).map_err(|error| DocumentError::Parse {
        document: source.to_string(),
        error,
    })?;
    build_document(source, &tree, rules)
}

/// Build the structure model from an already-read markup tree.
pub fn build_document(
    source: &str,
    root: &MarkupElement,
    rules: &ElementRules,
) -> Result<ParsedDocument, DocumentError> {
    let identification = root.child(&rules.identification);
    let label = identification
        .and_then(|block| block.descendant(&rules.document_label))
        .map(|element| collapse_whitespace(&element.text_content()))
        .filter(|label| !label.is_empty());
    let heading = identification
        .and_then(|block| block.descendant(&rules.document_heading))
        .map(|element| collapse_whitespace(&element.text_content()))
        .filter(|heading| !heading.is_empty());

    let mut content = Vec::new();
    collect_content(root, rules, &[], &mut content).map_err(|error| {
        DocumentError::Structure {
            document: source.to_string(),
            error,
        }
    })?;

    Ok(ParsedDocument {
        source: source.to_string(),
        consolidation_date: root
            .attribute(&rules.date_attribute)
            .map(|date| date.trim().to_string())
            .filter(|date| !date.is_empty()),
        root: StructureNode::new(NodeKind::Document, label, heading, content),
    })
}

fn build_node(
    kind: NodeKind,
    element: &MarkupElement,
    rules: &ElementRules,
    parent_path: &[PathSegment],
) -> Result<StructureNode, StructuralIntegrityError> {
    let label = element
        .child(&rules.label)
        .map(|label| clean_label(&label.text_content()))
        .filter(|label| !label.is_empty());
    let heading = element
        .child(&rules.heading)
        .map(|heading| collapse_whitespace(&heading.text_content()))
        .filter(|heading| !heading.is_empty());

    let mut path = parent_path.to_vec();
    match &label {
        Some(label) => path.push(PathSegment::new(kind, label)),
        None if kind.requires_label() => {
            return Err(StructuralIntegrityError {
                kind,
                parent_reference: render_reference(parent_path),
                offset: element.offset,
            });
        }
        None => {}
    }

    let mut content = Vec::new();
    collect_content(element, rules, &path, &mut content)?;
    Ok(StructureNode::new(kind, label, heading, content))
}

fn collect_content(
    element: &MarkupElement,
    rules: &ElementRules,
    path: &[PathSegment],
    content: &mut Vec<NodeContent>,
) -> Result<(), StructuralIntegrityError> {
    for child in element.elements() {
        let name = child.name.as_str();
        if name == rules.label
            || name == rules.heading
            || name == rules.identification
            || rules.is_ignored(name)
        {
            continue;
        }
        if let Some(kind) = rules.kind_of(name) {
            content.push(NodeContent::Child(build_node(kind, child, rules, path)?));
        } else if name == rules.text {
            let mut raw = String::new();
            flatten_text(child, rules, &mut raw);
            let text = collapse_whitespace(&raw);
            if !text.is_empty() {
                content.push(NodeContent::Text(text));
            }
        } else {
            collect_content(child, rules, path, content)?;
        }
    }
    Ok(())
}

/// Inline markup inside a text element (defined terms, cross references)
/// is flattened; ignored subtrees such as footnotes are skipped.
fn flatten_text(element: &MarkupElement, rules: &ElementRules, out: &mut String) {
    for node in &element.children {
        match node {
            MarkupNode::Text(text) => out.push_str(text),
            MarkupNode::Element(inner) if rules.is_ignored(&inner.name) => {}
            MarkupNode::Element(inner) => flatten_text(inner, rules, out),
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Labels are published as `(1)` or `(a)`; the parentheses are dropped.
fn clean_label(text: &str) -> String {
    collapse_whitespace(text)
        .trim_matches(|c| c == '(' || c == ')')
        .trim()
        .to_string()
}

//! Generic markup tree.
//!
//! [`read_xml`] turns raw bytes into a format-neutral [`MarkupElement`]
//! tree (local names only, namespace prefixes dropped). The statute
//! parser works on this tree, never on reader events, so the extraction
//! rules do not depend on the markup library.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupNode {
    Element(MarkupElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupElement {
    /// Local element name.
    pub name: String,
    /// `(local name, value)` pairs in document order.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<MarkupNode>,
    /// Byte offset of the start tag in the input.
    pub offset: u64,
}

impl MarkupElement {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
            offset: 0,
        }
    }

    /// Attribute value by local name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Child elements, in document order.
    pub fn elements(&self) -> impl Iterator<Item = &MarkupElement> {
        self.children.iter().filter_map(|node| match node {
            MarkupNode::Element(element) => Some(element),
            MarkupNode::Text(_) => None,
        })
    }

    /// First direct child element with the given name.
    pub fn child(&self, name: &str) -> Option<&MarkupElement> {
        self.elements().find(|element| element.name == name)
    }

    /// First descendant element with the given name (depth-first).
    pub fn descendant(&self, name: &str) -> Option<&MarkupElement> {
        for element in self.elements() {
            if element.name == name {
                return Some(element);
            }
            if let Some(found) = element.descendant(name) {
                return Some(found);
            }
        }
        None
    }

    /// All character data below this element, concatenated.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.push_text(&mut out);
        out
    }

    fn push_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                MarkupNode::Text(text) => out.push_str(text),
                MarkupNode::Element(element) => element.push_text(out),
            }
        }
    }

    fn append_text(&mut self, text: &str) {
        if let Some(MarkupNode::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(MarkupNode::Text(text.to_string()));
        }
    }
}

/// Read a well-formed XML document into a [`MarkupElement`] tree.
///
/// Comments, processing instructions and the doctype are dropped. Any
/// well-formedness violation is reported with its byte offset and line.
pub fn read_xml(input: &[u8]) -> Result<MarkupElement, ParseError> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut stack: Vec<MarkupElement> = Vec::new();
    let mut root: Option<MarkupElement> = None;

    loop {
        let position = reader.buffer_position() as u64;
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::at(input, reader.error_position() as u64, e.to_string()))?;

        match event {
            Event::Start(start) => {
                stack.push(open_element(&start, position, input)?);
            }
            Event::Empty(start) => {
                let element = open_element(&start, position, input)?;
                close_element(element, &mut stack, &mut root, input)?;
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    ParseError::at(input, position, "end tag without a matching start tag")
                })?;
                close_element(element, &mut stack, &mut root, input)?;
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| ParseError::at(input, position, e.to_string()))?;
                append_character_data(&text, &mut stack, position, input)?;
            }
            Event::CData(data) => {
                let text = std::str::from_utf8(&data)
                    .map_err(|e| ParseError::at(input, position, e.to_string()))?;
                append_character_data(text, &mut stack, position, input)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::at(
            input,
            input.len() as u64,
            format!("unexpected end of input: <{}> is not closed", open.name),
        ));
    }

    root.ok_or_else(|| ParseError::at(input, 0, "document has no root element"))
}

fn open_element(start: &BytesStart, offset: u64, input: &[u8]) -> Result<MarkupElement, ParseError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| ParseError::at(input, offset, e.to_string()))?;
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| ParseError::at(input, offset, e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(MarkupElement {
        name,
        attributes,
        children: Vec::new(),
        offset,
    })
}

fn close_element(
    element: MarkupElement,
    stack: &mut [MarkupElement],
    root: &mut Option<MarkupElement>,
    input: &[u8],
) -> Result<(), ParseError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(MarkupNode::Element(element));
        return Ok(());
    }
    if root.is_some() {
        return Err(ParseError::at(
            input,
            element.offset,
            format!("second root element <{}>", element.name),
        ));
    }
    *root = Some(element);
    Ok(())
}

fn append_character_data(
    text: &str,
    stack: &mut [MarkupElement],
    offset: u64,
    input: &[u8],
) -> Result<(), ParseError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.append_text(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(ParseError::at(input, offset, "text outside the root element")),
    }
}

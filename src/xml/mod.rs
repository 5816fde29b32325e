#![forbid(unsafe_code)]

//! Minimal element tree used as the DOM for query serialization.
//!
//! Only elements and attributes are modeled; text content is ignored on
//! parse and never produced on write. Attribute order is preserved so a
//! serialized tree is byte-stable across save/load cycles.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::types::{Result, XqlError};

/// One XML element with ordered attributes and child elements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlNode {
    /// Creates an element with no attributes or children.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Element tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets an attribute, replacing an existing value with the same key.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    /// Builder-style variant of [`XmlNode::set_attr`].
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Returns an attribute value when present.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Attributes in insertion order.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Appends a child and returns a mutable handle to it.
    pub fn push_child(&mut self, child: XmlNode) -> &mut XmlNode {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Child elements in document order.
    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    /// Serializes the element and its subtree, indented by two spaces.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        write_node(&mut writer, self)?;
        String::from_utf8(writer.into_inner().into_inner())
            .map_err(|err| XqlError::XmlParse(err.to_string()))
    }

    /// Parses a document and returns its root element.
    pub fn parse(text: &str) -> Result<XmlNode> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(true);
        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root = None;
        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(start) => stack.push(node_from_start(&start)?),
                Event::Empty(start) => {
                    let node = node_from_start(&start)?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| XqlError::XmlParse("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }
        if !stack.is_empty() {
            return Err(XqlError::XmlParse("unterminated element".into()));
        }
        root.ok_or_else(|| XqlError::XmlParse("document has no root element".into()))
    }
}

fn xml_err(err: quick_xml::Error) -> XqlError {
    XqlError::XmlParse(err.to_string())
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(node);
            Ok(())
        }
        None => Err(XqlError::XmlParse("multiple root elements".into())),
    }
}

fn node_from_start(start: &BytesStart<'_>) -> Result<XmlNode> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|err| XqlError::XmlParse(err.to_string()))?
        .to_owned();
    let mut node = XmlNode::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|err| XqlError::XmlParse(err.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| XqlError::XmlParse(err.to_string()))?
            .to_owned();
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        node.set_attr(key, value);
    }
    Ok(node)
}

fn write_node(writer: &mut Writer<Cursor<Vec<u8>>>, node: &XmlNode) -> Result<()> {
    let mut start = BytesStart::new(node.name.as_str());
    for (key, value) in &node.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if node.children.is_empty() {
        writer.write_event(Event::Empty(start)).map_err(xml_err)?;
        return Ok(());
    }
    writer.write_event(Event::Start(start)).map_err(xml_err)?;
    for child in &node.children {
        write_node(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(node.name.as_str())))
        .map_err(xml_err)?;
    Ok(())
}

//! Arena-backed XQL item tree.
//!
//! Every node lives in a [`Document`] and is addressed by a [`NodeId`]. The
//! primary tree is expressed through each node's slots (owning, top-down)
//! plus a non-owning `parent` back-link. Cross-links registered with
//! [`Document::add_ref`] are a second relation over the same arena, so a node
//! may be referenced from several places without ownership cycles.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{debug, warn};

use super::dml::{DmlKind, DmlSlots};
use crate::types::{Result, XqlError};
use crate::xml::XmlNode;

/// Stable handle to a node inside a [`Document`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub(crate) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structural variant of an item.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Shape {
    /// No children, attributes only.
    Atom,
    /// One optional child.
    Bin,
    /// Ordered children.
    List,
    /// Exactly two children, left then right.
    Dual,
    /// Statement node with named slots.
    Dml(DmlKind),
}

/// Returns the shape used for a known XQL tag.
pub fn shape_for_tag(tag: &str) -> Option<Shape> {
    let shape = match tag {
        "field" | "const" | "column" | "table" => Shape::Atom,
        "target" | "where" | "having" | "value" | "func" | "query" | "not" | "exists"
        | "isnull" | "join" => Shape::Bin,
        "setlist" | "targetlist" | "valuelist" | "sourcelist" | "dest" | "and" | "or"
        | "group" | "order" | "arglist" | "union" | "unionall" | "intersect" | "minus" => {
            Shape::List
        }
        "eq" | "ne" | "lt" | "le" | "gt" | "ge" | "like" | "in" | "set" => Shape::Dual,
        _ => return DmlKind::from_tag(tag).map(Shape::Dml),
    };
    Some(shape)
}

#[derive(Clone, Debug)]
pub(crate) enum Children {
    Atom,
    Bin(Option<NodeId>),
    List(Vec<NodeId>),
    Dual(Option<NodeId>, Option<NodeId>),
    Dml(DmlKind, Box<DmlSlots>),
}

/// A single node: tag, attributes, and shape-specific children.
#[derive(Clone, Debug)]
pub struct Item {
    tag: String,
    attrs: BTreeMap<String, String>,
    parent: Option<NodeId>,
    ids: Option<HashMap<String, NodeId>>,
    refs: HashMap<String, NodeId>,
    pub(crate) children: Children,
}

impl Item {
    fn new(tag: &str, shape: Shape) -> Self {
        let children = match shape {
            Shape::Atom => Children::Atom,
            Shape::Bin => Children::Bin(None),
            Shape::List => Children::List(Vec::new()),
            Shape::Dual => Children::Dual(None, None),
            Shape::Dml(kind) => Children::Dml(kind, Box::default()),
        };
        Self {
            tag: tag.to_owned(),
            attrs: BTreeMap::new(),
            parent: None,
            ids: None,
            refs: HashMap::new(),
            children,
        }
    }

    /// Structural variant of this node.
    pub fn shape(&self) -> Shape {
        match &self.children {
            Children::Atom => Shape::Atom,
            Children::Bin(_) => Shape::Bin,
            Children::List(_) => Shape::List,
            Children::Dual(..) => Shape::Dual,
            Children::Dml(kind, _) => Shape::Dml(*kind),
        }
    }
}

/// Owner of an XQL item tree (or several detached trees).
///
/// The document also owns the symbol generator used for synthetic ids, so
/// generated ids are deterministic per document.
#[derive(Clone, Debug, Default)]
pub struct Document {
    nodes: Vec<Item>,
    gensym: HashMap<String, u32>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes ever allocated in this document.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when no node has been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a fresh symbol `<prefix><n>`, counting from 1 per prefix.
    pub fn gensym(&mut self, prefix: &str) -> String {
        let counter = self.gensym.entry(prefix.to_owned()).or_insert(0);
        *counter += 1;
        format!("{prefix}{counter}")
    }

    /// Advances the counter for `<prefix><n>` so later symbols skip `n`.
    fn reserve_symbol(&mut self, id: &str) {
        let prefix = id.trim_end_matches(|c: char| c.is_ascii_digit());
        if prefix.is_empty() || prefix.len() == id.len() {
            return;
        }
        let Ok(n) = id[prefix.len()..].parse::<u32>() else {
            return;
        };
        let counter = self.gensym.entry(prefix.to_owned()).or_insert(0);
        *counter = (*counter).max(n);
    }

    /// Allocates a node of the given tag and shape.
    pub fn new_item(&mut self, tag: &str, shape: Shape) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Item::new(tag, shape));
        id
    }

    /// Allocates a node whose shape is chosen from its tag.
    ///
    /// Unknown tags become atoms.
    pub fn new_tagged(&mut self, tag: &str) -> NodeId {
        let shape = shape_for_tag(tag).unwrap_or(Shape::Atom);
        self.new_item(tag, shape)
    }

    /// Allocates a childless node.
    pub fn new_atom(&mut self, tag: &str) -> NodeId {
        self.new_item(tag, Shape::Atom)
    }

    /// Allocates a single-child node, optionally filled.
    pub fn new_bin(&mut self, tag: &str, child: Option<NodeId>) -> Result<NodeId> {
        let id = self.new_item(tag, Shape::Bin);
        if let Some(child) = child {
            self.add(id, child)?;
        }
        Ok(id)
    }

    /// Allocates an empty ordered list node.
    pub fn new_list(&mut self, tag: &str) -> NodeId {
        self.new_item(tag, Shape::List)
    }

    /// Allocates a two-child node from its operands.
    pub fn new_dual(&mut self, tag: &str, left: NodeId, right: NodeId) -> Result<NodeId> {
        let id = self.new_item(tag, Shape::Dual);
        self.add(id, left)?;
        self.add(id, right)?;
        Ok(id)
    }

    /// Allocates an empty statement node.
    pub fn new_dml(&mut self, kind: DmlKind) -> NodeId {
        self.new_item(kind.tag(), Shape::Dml(kind))
    }

    /// Borrows a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not allocated by this document.
    pub fn item(&self, id: NodeId) -> &Item {
        &self.nodes[id.0]
    }

    fn item_mut(&mut self, id: NodeId) -> &mut Item {
        &mut self.nodes[id.0]
    }

    /// Node kind.
    pub fn tag(&self, id: NodeId) -> &str {
        &self.item(id).tag
    }

    /// Renames the node kind.
    pub fn set_tag(&mut self, id: NodeId, tag: &str) {
        self.item_mut(id).tag = tag.to_owned();
    }

    /// Structural variant of a node.
    pub fn shape(&self, id: NodeId) -> Shape {
        self.item(id).shape()
    }

    /// Sets an attribute, replacing a previous value.
    ///
    /// The `id` attribute is routed through [`Document::add_id`] so it is
    /// registered at the tree root.
    pub fn set_attrib(&mut self, id: NodeId, key: &str, value: &str) {
        if key == "id" {
            self.add_id(id, value);
        } else {
            self.item_mut(id)
                .attrs
                .insert(key.to_owned(), value.to_owned());
        }
    }

    /// Returns an attribute value, or the empty string when absent.
    pub fn get_attrib(&self, id: NodeId, key: &str) -> &str {
        self.item(id).attrs.get(key).map(String::as_str).unwrap_or("")
    }

    /// Iterates attributes in key order.
    pub fn attribs(&self, id: NodeId) -> impl Iterator<Item = (&str, &str)> {
        self.item(id)
            .attrs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Non-owning back-link to the structural parent.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.item(id).parent
    }

    /// Walks parent links up to the node that has none.
    pub fn find_root(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.item(current).parent {
            current = parent;
        }
        current
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, of: NodeId) -> bool {
        let mut current = Some(of);
        while let Some(node) = current {
            if node == candidate {
                return true;
            }
            current = self.item(node).parent;
        }
        false
    }

    /// Children in rendering order (statement slots follow the fixed
    /// serialization order).
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match &self.item(id).children {
            Children::Atom => Vec::new(),
            Children::Bin(child) => child.iter().copied().collect(),
            Children::List(children) => children.clone(),
            Children::Dual(left, right) => left.iter().chain(right.iter()).copied().collect(),
            Children::Dml(_, slots) => slots.dom_order().collect(),
        }
    }

    /// Single child of a Bin node.
    pub fn bin_child(&self, id: NodeId) -> Option<NodeId> {
        match &self.item(id).children {
            Children::Bin(child) => *child,
            _ => None,
        }
    }

    /// Left and right operands of a Dual node.
    pub fn dual_operands(&self, id: NodeId) -> (Option<NodeId>, Option<NodeId>) {
        match &self.item(id).children {
            Children::Dual(left, right) => (*left, *right),
            _ => (None, None),
        }
    }

    /// Attaches `child` under `parent` according to the parent's shape.
    ///
    /// A child that already has a parent is moved. On rejection nothing
    /// changes: the child keeps its previous position (or stays detached)
    /// and remains the caller's responsibility.
    pub fn add(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if self.is_ancestor_or_self(child, parent) {
            return Err(self.reject(parent, child));
        }
        let accepted = match &self.item(parent).children {
            Children::Atom => false,
            Children::Bin(_) | Children::List(_) => true,
            Children::Dual(_, right) => right.is_none(),
            Children::Dml(kind, _) => kind.slot_for(self.tag(child)).is_some(),
        };
        if !accepted {
            return Err(self.reject(parent, child));
        }

        self.detach(child);
        let child_tag = self.item(child).tag.clone();
        let released = match &mut self.item_mut(parent).children {
            Children::Atom => None,
            Children::Bin(slot) => slot.replace(child),
            Children::List(children) => {
                children.push(child);
                None
            }
            Children::Dual(left, right) => {
                if left.is_none() {
                    *left = Some(child);
                } else {
                    *right = Some(child);
                }
                None
            }
            Children::Dml(kind, slots) => match kind.slot_for(&child_tag) {
                Some(slot) => slots.get_mut(slot).replace(child),
                None => None,
            },
        };
        if let Some(old) = released {
            debug!(parent = %parent, released = %old, "replaced child");
            self.item_mut(old).parent = None;
        }
        self.item_mut(child).parent = Some(parent);
        Ok(())
    }

    fn reject(&self, parent: NodeId, child: NodeId) -> XqlError {
        let parent_tag = self.tag(parent).to_owned();
        let child_tag = self.tag(child).to_owned();
        warn!(parent = %parent_tag, child = %child_tag, "child rejected");
        XqlError::Rejected {
            parent: parent_tag,
            child: child_tag,
        }
    }

    /// Unlinks a node from its parent, leaving it as a detached root.
    pub fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.item(child).parent else {
            return;
        };
        match &mut self.item_mut(parent).children {
            Children::Atom => {}
            Children::Bin(slot) => {
                if *slot == Some(child) {
                    *slot = None;
                }
            }
            Children::List(children) => children.retain(|c| *c != child),
            Children::Dual(left, right) => {
                if *left == Some(child) {
                    *left = right.take();
                } else if *right == Some(child) {
                    *right = None;
                }
            }
            Children::Dml(_, slots) => slots.clear_node(child),
        }
        self.item_mut(child).parent = None;
    }

    /// Registers `node` under `id` at the root of its tree and records the
    /// `id` attribute on the node.
    ///
    /// Ids shaped like generated symbols reserve their number, so
    /// [`Document::gensym`] never hands them out again.
    pub fn add_id(&mut self, node: NodeId, id: &str) {
        self.reserve_symbol(id);
        let root = self.find_root(node);
        self.item_mut(root)
            .ids
            .get_or_insert_with(HashMap::new)
            .insert(id.to_owned(), node);
        self.item_mut(node)
            .attrs
            .insert("id".to_owned(), id.to_owned());
    }

    /// Searches the subtree of `node` for an id registration.
    ///
    /// The node's own registrations are checked first, then children in
    /// child order.
    pub fn find_id(&self, node: NodeId, id: &str) -> Option<NodeId> {
        if let Some(found) = self.item(node).ids.as_ref().and_then(|ids| ids.get(id)) {
            return Some(*found);
        }
        self.search_order(node)
            .into_iter()
            .find_map(|child| self.find_id(child, id))
    }

    /// Resolves an id relative to the root of `node`'s tree.
    pub fn lookup_id(&self, node: NodeId, id: &str) -> Option<NodeId> {
        self.find_id(self.find_root(node), id)
    }

    /// Resolves `id` from the tree root and records a cross-link on `node`.
    ///
    /// Returns `false` (and logs) when the id is unknown.
    pub fn add_ref(&mut self, node: NodeId, id: &str) -> bool {
        match self.lookup_id(node, id) {
            Some(target) => {
                self.item_mut(node).refs.insert(id.to_owned(), target);
                true
            }
            None => {
                warn!(node = %node, id, "reference to unknown id");
                false
            }
        }
    }

    /// Searches the subtree of `node` for a recorded cross-link.
    pub fn find_ref(&self, node: NodeId, reference: &str) -> Option<NodeId> {
        if let Some(found) = self.item(node).refs.get(reference) {
            return Some(*found);
        }
        self.search_order(node)
            .into_iter()
            .find_map(|child| self.find_ref(child, reference))
    }

    fn search_order(&self, node: NodeId) -> Vec<NodeId> {
        match &self.item(node).children {
            Children::Dml(_, slots) => slots.search_order().collect(),
            _ => self.children(node),
        }
    }

    /// Produces an XML element for `node` and its subtree.
    pub fn to_dom(&self, node: NodeId) -> XmlNode {
        let item = self.item(node);
        let mut element = XmlNode::new(item.tag.as_str());
        for (key, value) in &item.attrs {
            element.set_attr(key.as_str(), value.as_str());
        }
        for child in self.children(node) {
            element.push_child(self.to_dom(child));
        }
        element
    }

    /// Appends the element for `node` to `parent` and returns it.
    pub fn to_dom_into<'a>(&self, node: NodeId, parent: &'a mut XmlNode) -> &'a mut XmlNode {
        parent.push_child(self.to_dom(node))
    }

    /// Rebuilds a detached tree from an XML element.
    ///
    /// `id` attributes are re-registered and `source` attributes are turned
    /// back into cross-links once the whole tree is attached. Children the
    /// parent rejects are logged and dropped.
    pub fn from_dom(&mut self, element: &XmlNode) -> Result<NodeId> {
        let root = self.build_from_dom(element)?;
        self.link_sources(root);
        Ok(root)
    }

    fn build_from_dom(&mut self, element: &XmlNode) -> Result<NodeId> {
        let shape = match shape_for_tag(element.name()) {
            Some(shape) => shape,
            None if element.children().is_empty() => Shape::Atom,
            None => Shape::List,
        };
        let node = self.new_item(element.name(), shape);
        for child in element.children() {
            let child_id = self.build_from_dom(child)?;
            if let Err(err) = self.add(node, child_id) {
                debug!(error = %err, "dropping child while loading");
            }
        }
        for (key, value) in element.attrs() {
            self.set_attrib(node, key, value);
        }
        Ok(node)
    }

    fn link_sources(&mut self, node: NodeId) {
        let source = self.get_attrib(node, "source").to_owned();
        if !source.is_empty() {
            self.add_ref(node, &source);
        }
        for child in self.children(node) {
            self.link_sources(child);
        }
    }

    /// Serializes a subtree to indented XML text.
    pub fn to_xml_string(&self, node: NodeId) -> Result<String> {
        self.to_dom(node).to_xml_string()
    }

    /// Parses XML text into a new detached tree.
    pub fn parse_xml(&mut self, text: &str) -> Result<NodeId> {
        let element = XmlNode::parse(text)?;
        self.from_dom(&element)
    }

    pub(crate) fn dml_parts(&self, id: NodeId) -> Option<(DmlKind, &DmlSlots)> {
        match &self.item(id).children {
            Children::Dml(kind, slots) => Some((*kind, slots.as_ref())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_attribute_is_empty_string() {
        let mut doc = Document::new();
        let field = doc.new_atom("field");
        assert_eq!(doc.get_attrib(field, "name"), "");
        doc.set_attrib(field, "name", "a");
        doc.set_attrib(field, "name", "b");
        assert_eq!(doc.get_attrib(field, "name"), "b");
    }

    #[test]
    fn atom_rejects_children() {
        let mut doc = Document::new();
        let field = doc.new_atom("field");
        let other = doc.new_atom("const");
        let err = doc.add(field, other).unwrap_err();
        assert!(matches!(err, XqlError::Rejected { .. }));
        assert_eq!(doc.parent(other), None);
    }

    #[test]
    fn bin_replaces_and_releases_previous_child() {
        let mut doc = Document::new();
        let first = doc.new_atom("field");
        let second = doc.new_atom("const");
        let bin = doc.new_bin("value", Some(first)).unwrap();
        doc.add(bin, second).unwrap();
        assert_eq!(doc.bin_child(bin), Some(second));
        assert_eq!(doc.parent(first), None);
        assert_eq!(doc.parent(second), Some(bin));
    }

    #[test]
    fn dual_fills_left_then_right_then_rejects() {
        let mut doc = Document::new();
        let a = doc.new_atom("field");
        let b = doc.new_atom("const");
        let c = doc.new_atom("const");
        let eq = doc.new_dual("eq", a, b).unwrap();
        assert_eq!(doc.dual_operands(eq), (Some(a), Some(b)));
        assert!(doc.add(eq, c).is_err());
        assert_eq!(doc.parent(c), None);
    }

    #[test]
    fn list_preserves_insertion_order() {
        let mut doc = Document::new();
        let list = doc.new_list("and");
        let ids: Vec<_> = (0..4).map(|_| doc.new_atom("field")).collect();
        for id in &ids {
            doc.add(list, *id).unwrap();
        }
        assert_eq!(doc.children(list), ids);
    }

    #[test]
    fn ids_register_at_root_and_refs_resolve() {
        let mut doc = Document::new();
        let list = doc.new_list("valuelist");
        let value = doc.new_bin("value", None).unwrap();
        doc.add(list, value).unwrap();
        doc.add_id(value, "v1");
        assert_eq!(doc.find_id(list, "v1"), Some(value));

        let column = doc.new_atom("column");
        let order = doc.new_list("order");
        doc.add(list, order).unwrap();
        doc.add(order, column).unwrap();
        assert!(doc.add_ref(column, "v1"));
        assert_eq!(doc.find_ref(list, "v1"), Some(value));
        assert!(!doc.add_ref(column, "missing"));
        assert_eq!(doc.find_id(list, "missing"), None);
    }

    #[test]
    fn adding_an_ancestor_is_rejected() {
        let mut doc = Document::new();
        let outer = doc.new_list("and");
        let inner = doc.new_list("or");
        doc.add(outer, inner).unwrap();
        assert!(doc.add(inner, outer).is_err());
        assert_eq!(doc.find_root(inner), outer);
    }
}

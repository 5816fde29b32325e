//! Statement nodes (SELECT, INSERT, UPDATE, DELETE) and their builders.
//!
//! A statement keeps its children in named slots instead of a flat list.
//! Inbound children are routed to a slot by tag; the builder methods below
//! synthesize the intermediate containers (`targetlist`, `valuelist`,
//! `where`, ...) on first use and merge into them afterwards.

use tracing::{debug, warn};

use super::item::{Document, NodeId, Shape};
use crate::types::{Result, XqlError};

/// Statement flavor of a DML node.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DmlKind {
    /// `<select>`
    Select,
    /// `<insert>`
    Insert,
    /// `<update>`
    Update,
    /// `<delete>`
    Delete,
}

/// Named child position of a statement node.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Slot {
    /// `target` or `targetlist`.
    Target,
    /// Projected values.
    ValueList,
    /// Row condition.
    Where,
    /// Group condition.
    Having,
    /// GROUP BY columns.
    Group,
    /// ORDER BY or a set operation.
    Trailer,
    /// INSERT column list.
    Dest,
    /// INSERT values or sub-select.
    Source,
    /// UPDATE assignments.
    SetList,
}

impl DmlKind {
    /// XML tag of this statement kind.
    pub fn tag(self) -> &'static str {
        match self {
            DmlKind::Select => "select",
            DmlKind::Insert => "insert",
            DmlKind::Update => "update",
            DmlKind::Delete => "delete",
        }
    }

    /// Statement kind for a tag, if the tag names one.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "select" => Some(DmlKind::Select),
            "insert" => Some(DmlKind::Insert),
            "update" => Some(DmlKind::Update),
            "delete" => Some(DmlKind::Delete),
            _ => None,
        }
    }

    /// Slot that receives a child with the given tag, or `None` when the
    /// statement kind does not accept it.
    pub fn slot_for(self, tag: &str) -> Option<Slot> {
        match (self, tag) {
            (DmlKind::Select, "targetlist") => Some(Slot::Target),
            (DmlKind::Select, "valuelist") => Some(Slot::ValueList),
            (DmlKind::Select, "having") => Some(Slot::Having),
            (DmlKind::Select, "group") => Some(Slot::Group),
            (DmlKind::Select, "order" | "union" | "unionall" | "intersect" | "minus") => {
                Some(Slot::Trailer)
            }
            (DmlKind::Select | DmlKind::Update | DmlKind::Delete, "where") => Some(Slot::Where),
            (DmlKind::Insert | DmlKind::Update | DmlKind::Delete, "target") => Some(Slot::Target),
            (DmlKind::Insert, "dest") => Some(Slot::Dest),
            (DmlKind::Insert, "sourcelist") => Some(Slot::Source),
            (DmlKind::Update, "setlist") => Some(Slot::SetList),
            _ => None,
        }
    }
}

/// Slot storage of a statement node.
#[derive(Clone, Debug, Default)]
pub struct DmlSlots {
    target: Option<NodeId>,
    valuelist: Option<NodeId>,
    where_: Option<NodeId>,
    having: Option<NodeId>,
    group: Option<NodeId>,
    trailer: Option<NodeId>,
    dest: Option<NodeId>,
    source: Option<NodeId>,
    setlist: Option<NodeId>,
}

impl DmlSlots {
    /// Current occupant of a slot.
    pub fn get(&self, slot: Slot) -> Option<NodeId> {
        match slot {
            Slot::Target => self.target,
            Slot::ValueList => self.valuelist,
            Slot::Where => self.where_,
            Slot::Having => self.having,
            Slot::Group => self.group,
            Slot::Trailer => self.trailer,
            Slot::Dest => self.dest,
            Slot::Source => self.source,
            Slot::SetList => self.setlist,
        }
    }

    pub(crate) fn get_mut(&mut self, slot: Slot) -> &mut Option<NodeId> {
        match slot {
            Slot::Target => &mut self.target,
            Slot::ValueList => &mut self.valuelist,
            Slot::Where => &mut self.where_,
            Slot::Having => &mut self.having,
            Slot::Group => &mut self.group,
            Slot::Trailer => &mut self.trailer,
            Slot::Dest => &mut self.dest,
            Slot::Source => &mut self.source,
            Slot::SetList => &mut self.setlist,
        }
    }

    pub(crate) fn clear_node(&mut self, node: NodeId) {
        for slot in SERIALIZE_ORDER {
            let entry = self.get_mut(slot);
            if *entry == Some(node) {
                *entry = None;
            }
        }
    }

    /// Occupied slots in serialization order.
    pub(crate) fn dom_order(&self) -> impl Iterator<Item = NodeId> + '_ {
        SERIALIZE_ORDER.into_iter().filter_map(|slot| self.get(slot))
    }

    /// Occupied slots in id-search order.
    pub(crate) fn search_order(&self) -> impl Iterator<Item = NodeId> + '_ {
        SEARCH_ORDER.into_iter().filter_map(|slot| self.get(slot))
    }
}

const SERIALIZE_ORDER: [Slot; 9] = [
    Slot::Target,
    Slot::ValueList,
    Slot::SetList,
    Slot::Where,
    Slot::Having,
    Slot::Group,
    Slot::Trailer,
    Slot::Dest,
    Slot::Source,
];

const SEARCH_ORDER: [Slot; 9] = [
    Slot::Target,
    Slot::ValueList,
    Slot::Where,
    Slot::Having,
    Slot::Group,
    Slot::Trailer,
    Slot::Dest,
    Slot::Source,
    Slot::SetList,
];

impl Document {
    /// Statement kind of `dml`, or a rejection if it is not a statement.
    pub fn dml_kind(&self, dml: NodeId) -> Result<DmlKind> {
        match self.shape(dml) {
            Shape::Dml(kind) => Ok(kind),
            _ => Err(XqlError::Rejected {
                parent: self.tag(dml).to_owned(),
                child: "statement content".to_owned(),
            }),
        }
    }

    /// Occupant of a statement slot.
    pub fn dml_slot(&self, dml: NodeId, slot: Slot) -> Option<NodeId> {
        self.dml_parts(dml).and_then(|(_, slots)| slots.get(slot))
    }

    fn unsupported(&self, dml: NodeId, what: &str) -> XqlError {
        let parent = self.tag(dml).to_owned();
        warn!(statement = %parent, what, "operation not supported by statement kind");
        XqlError::Rejected {
            parent,
            child: what.to_owned(),
        }
    }

    /// Returns the list in `slot`, creating it with `tag` on first use.
    fn slot_list(&mut self, dml: NodeId, slot: Slot, tag: &str) -> Result<NodeId> {
        if let Some(existing) = self.dml_slot(dml, slot) {
            if self.tag(existing) == tag {
                return Ok(existing);
            }
            return Err(self.unsupported(dml, tag));
        }
        let list = self.new_list(tag);
        self.add(dml, list)?;
        Ok(list)
    }

    /// Wraps `expr` in a `value` node with a generated id and appends it to
    /// the select's value list.
    fn push_value(&mut self, dml: NodeId, expr: NodeId, alias: Option<&str>) -> Result<NodeId> {
        let list = self.slot_list(dml, Slot::ValueList, "valuelist")?;
        let value = self.new_bin("value", Some(expr))?;
        self.add(list, value)?;
        let id = self.gensym("v");
        self.add_id(value, &id);
        if let Some(alias) = alias {
            self.set_attrib(value, "alias", alias);
        }
        Ok(value)
    }

    /// Adds a table target and returns its generated id.
    ///
    /// SELECT statements collect targets in a `targetlist`; the other kinds
    /// hold a single target and refuse a second one.
    pub fn add_target_from_text(
        &mut self,
        dml: NodeId,
        name: &str,
        join: Option<NodeId>,
    ) -> Result<String> {
        let kind = self.dml_kind(dml)?;
        let target = self.new_bin("target", join)?;
        self.set_attrib(target, "name", name);
        match kind {
            DmlKind::Select => {
                let list = self.slot_list(dml, Slot::Target, "targetlist")?;
                self.add(list, target)?;
            }
            _ => {
                if self.dml_slot(dml, Slot::Target).is_some() {
                    warn!(statement = kind.tag(), "statement already has a target");
                    return Err(XqlError::Rejected {
                        parent: kind.tag().to_owned(),
                        child: "target".to_owned(),
                    });
                }
                self.add(dml, target)?;
            }
        }
        let id = self.gensym("t");
        self.add_id(target, &id);
        debug!(statement = kind.tag(), target = %id, table = name, "target added");
        Ok(id)
    }

    /// Adds a field of `target_id`.
    ///
    /// For SELECT the field is wrapped in a `value` node appended to the value
    /// list (and echoed into `group` when `group` is set); the value node is
    /// returned. For INSERT the field joins the destination column list and
    /// the field node itself is returned.
    pub fn add_field_from_text(
        &mut self,
        dml: NodeId,
        target_id: &str,
        name: &str,
        alias: Option<&str>,
        group: bool,
    ) -> Result<NodeId> {
        let kind = self.dml_kind(dml)?;
        let field = self.new_field(target_id, name);
        match kind {
            DmlKind::Select => {
                let value = self.push_value(dml, field, alias)?;
                self.add_ref(field, target_id);
                if group {
                    let value_id = self.get_attrib(value, "id").to_owned();
                    let list = self.slot_list(dml, Slot::Group, "group")?;
                    let column = self.new_atom("column");
                    self.set_attrib(column, "source", &value_id);
                    self.add(list, column)?;
                    self.add_ref(column, &value_id);
                }
                Ok(value)
            }
            DmlKind::Insert => {
                let list = self.slot_list(dml, Slot::Dest, "dest")?;
                self.add(list, field)?;
                self.add_ref(field, target_id);
                Ok(field)
            }
            DmlKind::Update | DmlKind::Delete => Err(self.unsupported(dml, "field")),
        }
    }

    /// Adds a constant to the projection (SELECT) or the source values
    /// (INSERT).
    pub fn add_const_from_text(
        &mut self,
        dml: NodeId,
        value: &str,
        sql_type: &str,
        null: bool,
    ) -> Result<NodeId> {
        let constant = self.new_const(value, sql_type, null);
        self.add_expression(dml, constant, "const")
    }

    /// Adds a function call node to the projection or the source values.
    pub fn add_func(&mut self, dml: NodeId, func: NodeId) -> Result<NodeId> {
        self.add_expression(dml, func, "func")
    }

    /// Adds a sub-statement to the projection or as the INSERT source.
    pub fn add_query(&mut self, dml: NodeId, query: NodeId) -> Result<NodeId> {
        self.dml_kind(query)?;
        let wrapper = self.new_bin("query", Some(query))?;
        self.add_expression(dml, wrapper, "query")
    }

    fn add_expression(&mut self, dml: NodeId, expr: NodeId, what: &str) -> Result<NodeId> {
        match self.dml_kind(dml)? {
            DmlKind::Select => self.push_value(dml, expr, None),
            DmlKind::Insert => {
                let list = self.slot_list(dml, Slot::Source, "sourcelist")?;
                self.add(list, expr)?;
                Ok(expr)
            }
            DmlKind::Update | DmlKind::Delete => Err(self.unsupported(dml, what)),
        }
    }

    /// Appends a row condition to WHERE, folding with `combinator`.
    ///
    /// The first condition becomes the sole child of a new `where` node. A
    /// later condition is appended when the current top-level condition
    /// already has the combinator tag; otherwise the current top-level
    /// condition and the new one are wrapped in a fresh combinator list.
    pub fn add_row_condition(&mut self, dml: NodeId, cond: NodeId, combinator: &str) -> Result<()> {
        match self.dml_kind(dml)? {
            DmlKind::Insert => Err(self.unsupported(dml, "where")),
            _ => self.fold_condition(dml, Slot::Where, "where", cond, combinator),
        }
    }

    /// Appends a group condition to HAVING with the same folding rule as
    /// [`Document::add_row_condition`]. Only SELECT has a HAVING clause.
    pub fn add_group_condition(
        &mut self,
        dml: NodeId,
        cond: NodeId,
        combinator: &str,
    ) -> Result<()> {
        match self.dml_kind(dml)? {
            DmlKind::Select => self.fold_condition(dml, Slot::Having, "having", cond, combinator),
            _ => Err(self.unsupported(dml, "having")),
        }
    }

    fn fold_condition(
        &mut self,
        dml: NodeId,
        slot: Slot,
        clause: &str,
        cond: NodeId,
        combinator: &str,
    ) -> Result<()> {
        let Some(clause_node) = self.dml_slot(dml, slot) else {
            let clause_node = self.new_bin(clause, Some(cond))?;
            return self.add(dml, clause_node);
        };
        let Some(top) = self.bin_child(clause_node) else {
            return self.add(clause_node, cond);
        };
        if self.tag(top) == combinator && self.shape(top) == Shape::List {
            return self.add(top, cond);
        }
        let folded = self.new_list(combinator);
        self.add(folded, top)?;
        self.add(folded, cond)?;
        self.add(clause_node, folded)
    }

    /// Appends an ORDER BY entry for the projected column at `column`
    /// (zero-based).
    pub fn add_order(&mut self, dml: NodeId, column: usize, ascending: bool) -> Result<()> {
        if self.dml_kind(dml)? != DmlKind::Select {
            return Err(self.unsupported(dml, "order"));
        }
        let value = self
            .dml_slot(dml, Slot::ValueList)
            .and_then(|list| self.children(list).get(column).copied())
            .ok_or_else(|| XqlError::Rejected {
                parent: "order".to_owned(),
                child: format!("column {column}"),
            })?;
        let value_id = self.get_attrib(value, "id").to_owned();
        let order = self.slot_list(dml, Slot::Trailer, "order")?;
        let entry = self.new_atom("column");
        self.set_attrib(entry, "num", &column.to_string());
        if !value_id.is_empty() {
            self.set_attrib(entry, "source", &value_id);
        }
        self.set_attrib(entry, "dir", if ascending { "asc" } else { "desc" });
        self.add(order, entry)?;
        if !value_id.is_empty() {
            self.add_ref(entry, &value_id);
        }
        Ok(())
    }

    /// Appends a `set` assignment to an UPDATE.
    pub fn add_set(&mut self, dml: NodeId, set: NodeId) -> Result<()> {
        if self.dml_kind(dml)? != DmlKind::Update || self.tag(set) != "set" {
            return Err(self.unsupported(dml, self.tag(set).to_owned().as_str()));
        }
        let list = self.slot_list(dml, Slot::SetList, "setlist")?;
        self.add(list, set)
    }

    /// Appends `field = constant` to an UPDATE.
    pub fn add_set_const(
        &mut self,
        dml: NodeId,
        field: &str,
        value: &str,
        sql_type: &str,
        null: bool,
    ) -> Result<NodeId> {
        if self.dml_kind(dml)? != DmlKind::Update {
            return Err(self.unsupported(dml, "set"));
        }
        let left = self.new_atom("field");
        self.set_attrib(left, "name", field);
        let right = self.new_const(value, sql_type, null);
        let set = self.new_dual("set", left, right)?;
        self.add_set(dml, set)?;
        Ok(set)
    }

    /// `<field source=.. name=..>` atom.
    pub fn new_field(&mut self, source: &str, name: &str) -> NodeId {
        let field = self.new_atom("field");
        if !source.is_empty() {
            self.set_attrib(field, "source", source);
        }
        self.set_attrib(field, "name", name);
        field
    }

    /// `<const value=.. type=..>` atom; `null` marks an SQL NULL.
    pub fn new_const(&mut self, value: &str, sql_type: &str, null: bool) -> NodeId {
        let constant = self.new_atom("const");
        if !null {
            self.set_attrib(constant, "value", value);
        }
        if !sql_type.is_empty() {
            self.set_attrib(constant, "type", sql_type);
        }
        if null {
            self.set_attrib(constant, "null", "t");
        }
        constant
    }

    /// Named parameter constant, rendered as a placeholder.
    pub fn new_param(&mut self, name: &str, sql_type: &str) -> NodeId {
        let constant = self.new_atom("const");
        self.set_attrib(constant, "param", name);
        if !sql_type.is_empty() {
            self.set_attrib(constant, "type", sql_type);
        }
        constant
    }

    /// Function call with its arguments collected in an `arglist`.
    pub fn new_func(&mut self, name: &str, args: &[NodeId]) -> Result<NodeId> {
        let arglist = self.new_list("arglist");
        for arg in args {
            self.add(arglist, *arg)?;
        }
        let func = self.new_bin("func", Some(arglist))?;
        self.set_attrib(func, "name", name);
        Ok(func)
    }

    /// Binary condition such as `eq` or `like`.
    pub fn new_condition(&mut self, op: &str, left: NodeId, right: NodeId) -> Result<NodeId> {
        if super::item::shape_for_tag(op) != Some(Shape::Dual) {
            return Err(XqlError::Rejected {
                parent: op.to_owned(),
                child: self.tag(left).to_owned(),
            });
        }
        self.new_dual(op, left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cond(doc: &mut Document, name: &str) -> NodeId {
        let left = doc.new_field("t1", name);
        let right = doc.new_const("1", "int", false);
        doc.new_condition("eq", left, right).unwrap()
    }

    #[test]
    fn first_condition_sits_directly_under_where() {
        let mut doc = Document::new();
        let select = doc.new_dml(DmlKind::Select);
        let c1 = cond(&mut doc, "a");
        doc.add_row_condition(select, c1, "and").unwrap();
        let clause = doc.dml_slot(select, Slot::Where).unwrap();
        assert_eq!(doc.tag(clause), "where");
        assert_eq!(doc.bin_child(clause), Some(c1));
    }

    #[test]
    fn same_combinator_appends_without_nesting() {
        let mut doc = Document::new();
        let select = doc.new_dml(DmlKind::Select);
        let conds: Vec<_> = ["a", "b", "c"].iter().map(|n| cond(&mut doc, n)).collect();
        for c in &conds {
            doc.add_row_condition(select, *c, "and").unwrap();
        }
        let clause = doc.dml_slot(select, Slot::Where).unwrap();
        let top = doc.bin_child(clause).unwrap();
        assert_eq!(doc.tag(top), "and");
        assert_eq!(doc.children(top), conds);
    }

    #[test]
    fn different_combinator_wraps_previous_top() {
        let mut doc = Document::new();
        let select = doc.new_dml(DmlKind::Select);
        let c1 = cond(&mut doc, "a");
        let c2 = cond(&mut doc, "b");
        let c3 = cond(&mut doc, "c");
        doc.add_row_condition(select, c1, "and").unwrap();
        doc.add_row_condition(select, c2, "and").unwrap();
        doc.add_row_condition(select, c3, "or").unwrap();

        let clause = doc.dml_slot(select, Slot::Where).unwrap();
        let top = doc.bin_child(clause).unwrap();
        assert_eq!(doc.tag(top), "or");
        let children = doc.children(top);
        assert_eq!(children.len(), 2);
        assert_eq!(doc.tag(children[0]), "and");
        assert_eq!(doc.children(children[0]), vec![c1, c2]);
        assert_eq!(children[1], c3);
    }

    #[test]
    fn insert_has_no_where_clause() {
        let mut doc = Document::new();
        let insert = doc.new_dml(DmlKind::Insert);
        let c1 = cond(&mut doc, "a");
        assert!(doc.add_row_condition(insert, c1, "and").is_err());
        assert_eq!(doc.parent(c1), None);
    }

    #[test]
    fn single_target_statements_refuse_a_second_target() {
        let mut doc = Document::new();
        let update = doc.new_dml(DmlKind::Update);
        assert_eq!(doc.add_target_from_text(update, "T", None).unwrap(), "t1");
        assert!(doc.add_target_from_text(update, "U", None).is_err());
    }

    #[test]
    fn select_targets_and_values_get_generated_ids() {
        let mut doc = Document::new();
        let select = doc.new_dml(DmlKind::Select);
        let t1 = doc.add_target_from_text(select, "T", None).unwrap();
        let t2 = doc.add_target_from_text(select, "U", None).unwrap();
        assert_eq!((t1.as_str(), t2.as_str()), ("t1", "t2"));

        let value = doc
            .add_field_from_text(select, "t1", "a", Some("x"), true)
            .unwrap();
        assert_eq!(doc.get_attrib(value, "id"), "v1");
        assert_eq!(doc.get_attrib(value, "alias"), "x");
        let group = doc.dml_slot(select, Slot::Group).unwrap();
        let column = doc.children(group)[0];
        assert_eq!(doc.get_attrib(column, "source"), "v1");
        let target = doc.lookup_id(select, "t1").unwrap();
        assert_eq!(doc.find_ref(select, "t1"), Some(target));
    }

    #[test]
    fn insert_routes_fields_and_constants() {
        let mut doc = Document::new();
        let insert = doc.new_dml(DmlKind::Insert);
        doc.add_target_from_text(insert, "T", None).unwrap();
        doc.add_field_from_text(insert, "t1", "a", None, false).unwrap();
        doc.add_const_from_text(insert, "5", "int", false).unwrap();
        let dest = doc.dml_slot(insert, Slot::Dest).unwrap();
        let source = doc.dml_slot(insert, Slot::Source).unwrap();
        assert_eq!(doc.children(dest).len(), 1);
        assert_eq!(doc.tag(doc.children(source)[0]), "const");
    }

    #[test]
    fn order_refers_to_projected_value() {
        let mut doc = Document::new();
        let select = doc.new_dml(DmlKind::Select);
        doc.add_target_from_text(select, "T", None).unwrap();
        doc.add_field_from_text(select, "t1", "a", None, false)
            .unwrap();
        doc.add_order(select, 0, false).unwrap();
        assert!(doc.add_order(select, 3, true).is_err());
        let order = doc.dml_slot(select, Slot::Trailer).unwrap();
        let entry = doc.children(order)[0];
        assert_eq!(doc.get_attrib(entry, "dir"), "desc");
        assert_eq!(doc.get_attrib(entry, "source"), "v1");
    }

    #[test]
    fn update_collects_assignments() {
        let mut doc = Document::new();
        let update = doc.new_dml(DmlKind::Update);
        doc.add_target_from_text(update, "T", None).unwrap();
        doc.add_set_const(update, "a", "1", "int", false).unwrap();
        doc.add_set_const(update, "b", "", "text", true).unwrap();
        let setlist = doc.dml_slot(update, Slot::SetList).unwrap();
        assert_eq!(doc.children(setlist).len(), 2);
        let select = doc.new_dml(DmlKind::Select);
        assert!(doc.add_set_const(select, "a", "1", "int", false).is_err());
    }

    #[test]
    fn raw_add_dispatches_by_tag() {
        let mut doc = Document::new();
        let delete = doc.new_dml(DmlKind::Delete);
        let valuelist = doc.new_list("valuelist");
        assert!(doc.add(delete, valuelist).is_err());
        let target = doc.new_bin("target", None).unwrap();
        doc.add(delete, target).unwrap();
        assert_eq!(doc.dml_slot(delete, Slot::Target), Some(target));
    }

    fn leaves(doc: &Document, node: NodeId, out: &mut Vec<NodeId>) {
        match doc.tag(node) {
            "and" | "or" => {
                for child in doc.children(node) {
                    leaves(doc, child, out);
                }
            }
            _ => out.push(node),
        }
    }

    proptest! {
        #[test]
        fn folding_keeps_conditions_in_order(
            ops in proptest::collection::vec(prop_oneof![Just("and"), Just("or")], 1..12)
        ) {
            let mut doc = Document::new();
            let select = doc.new_dml(DmlKind::Select);
            let mut conds = Vec::new();
            for (index, op) in ops.iter().enumerate() {
                let c = cond(&mut doc, &format!("c{index}"));
                doc.add_row_condition(select, c, op).unwrap();
                conds.push(c);
            }
            let clause = doc.dml_slot(select, Slot::Where).unwrap();
            let top = doc.bin_child(clause).unwrap();
            let mut found = Vec::new();
            leaves(&doc, top, &mut found);
            prop_assert_eq!(found, conds);
            if ops.len() > 1 {
                prop_assert_eq!(doc.tag(top), ops[ops.len() - 1]);
            }
        }
    }
}

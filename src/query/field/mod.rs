//! Query field objects and their capability traits.
//!
//! Every field is a [`QueryField`] handle owned by its query. The handle
//! carries the attributes shared by all kinds (id, name, alias, flags) and a
//! [`FieldKind`] with the kind-specific references:
//!
//! * [`QueryFieldAll`]: `target.*`
//! * [`QueryFieldField`]: `target.column`
//! * [`QueryFieldFunc`]: `function(arg, ...)` over other fields
//! * [`QueryFieldValue`]: a constant or parameter
//!
//! Fields register as [`QueryListener`]s when created and deregister when
//! dropped.

mod all;
mod func;
mod table_field;
mod value;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

pub use all::QueryFieldAll;
pub use func::QueryFieldFunc;
pub use table_field::QueryFieldField;
pub use value::QueryFieldValue;

use super::{ListenerId, Query, QueryListener, QueryTarget};
use crate::dict::{Dict, DictFunction, ServerInfo};
use crate::object_ref::{DictObject, ObjectRef, ObjectType, RefHelper, RefKind, Replacements};
use crate::render::{RenderContext, RenderOptions};
use crate::types::{FieldXmlId, Result, XqlError};
use crate::xml::XmlNode;

/// Save and reload through the XML element tree.
pub trait XmlStorage {
    /// Serializes the object.
    fn save_to_xml(&self) -> Result<XmlNode>;
    /// Replaces the object's content with the element's. Nothing changes
    /// when loading fails.
    fn load_from_xml(&self, node: &XmlNode) -> Result<()>;
}

/// A field of an entity (query or table).
pub trait EntityField {
    /// Entity the field belongs to.
    fn entity(&self) -> Option<Arc<Query>>;
    /// SQL type name of the values the field produces, when known.
    fn dict_type(&self) -> Option<String>;
}

/// SQL and human-readable rendering.
pub trait Renderer {
    /// SQL text. `ctx` supplies parameter values and collects the
    /// parameters used.
    fn render_as_sql(&self, ctx: Option<&mut RenderContext>, options: RenderOptions)
        -> Result<String>;
    /// Human-readable description, available even when inactive.
    fn render_as_str(&self) -> String;
    /// Whether the object renders without error.
    fn is_valid(&self) -> bool {
        self.render_as_sql(None, RenderOptions::empty()).is_ok()
    }
}

/// Objects holding references to other objects.
pub trait Referer {
    /// Resolves every reference. Returns `true` when all are active.
    fn activate(&self) -> bool;
    /// Releases every resolved object, keeping the symbolic names.
    fn deactivate(&self);
    /// Returns `true` when every reference is resolved.
    fn is_active(&self) -> bool;
    /// Objects currently resolved.
    fn ref_objects(&self) -> Vec<DictObject>;
    /// Retargets resolved references through `replacements`.
    fn replace_refs(&self, replacements: &Replacements);
}

/// Attributes common to every field kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldAttrs {
    /// Field name.
    pub name: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Alias rendered after `AS`.
    pub alias: Option<String>,
    /// Whether the field is part of the select list.
    pub visible: bool,
    /// Whether the field was added internally.
    pub internal: bool,
}

impl Default for FieldAttrs {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            alias: None,
            visible: true,
            internal: false,
        }
    }
}

/// Kind-specific content of a field.
#[derive(Clone, Debug)]
pub enum FieldKind {
    /// `target.*`
    All(QueryFieldAll),
    /// A column of a target.
    Field(QueryFieldField),
    /// A function call.
    Func(QueryFieldFunc),
    /// A constant or parameter.
    Value(QueryFieldValue),
}

impl FieldKind {
    /// XML tag of the kind.
    pub fn tag(&self) -> &'static str {
        match self {
            FieldKind::All(_) => all::TAG,
            FieldKind::Field(_) => table_field::TAG,
            FieldKind::Func(_) => func::TAG,
            FieldKind::Value(_) => value::TAG,
        }
    }

    fn activate(&mut self) -> bool {
        match self {
            FieldKind::All(k) => k.activate(),
            FieldKind::Field(k) => k.activate(),
            FieldKind::Func(k) => k.activate(),
            FieldKind::Value(_) => true,
        }
    }

    fn refs(&self) -> Vec<&ObjectRef> {
        match self {
            FieldKind::All(k) => vec![k.target_ref()],
            FieldKind::Field(k) => k.refs(),
            FieldKind::Func(k) => k.refs(),
            FieldKind::Value(_) => Vec::new(),
        }
    }

    fn refs_mut(&mut self) -> Vec<&mut ObjectRef> {
        match self {
            FieldKind::All(k) => vec![k.target_ref_mut()],
            FieldKind::Field(k) => k.refs_mut(),
            FieldKind::Func(k) => k.refs_mut(),
            FieldKind::Value(_) => Vec::new(),
        }
    }

    fn references_target(&self, target: &Arc<QueryTarget>) -> bool {
        match self {
            FieldKind::All(k) => ref_names_target(k.target_ref(), target),
            FieldKind::Field(k) => ref_names_target(k.target_ref(), target),
            FieldKind::Func(_) | FieldKind::Value(_) => false,
        }
    }

    fn rebind_helpers(&mut self, query: &Weak<Query>) {
        match self {
            FieldKind::All(k) => k.target_ref_mut().set_helper(Some(RefHelper::Query(query.clone()))),
            FieldKind::Field(k) => k.target_ref_mut().set_helper(Some(RefHelper::Query(query.clone()))),
            FieldKind::Func(k) => k.rebind_helpers(query),
            FieldKind::Value(_) => {}
        }
    }

    fn is_equal(&self, other: &FieldKind) -> bool {
        match (self, other) {
            (FieldKind::Value(a), FieldKind::Value(b)) => a == b,
            (FieldKind::Field(a), FieldKind::Field(b)) => {
                a.plugin() == b.plugin() && refs_equal_all(&self.refs(), &other.refs())
            }
            (FieldKind::All(_), FieldKind::All(_)) | (FieldKind::Func(_), FieldKind::Func(_)) => {
                refs_equal_all(&self.refs(), &other.refs())
            }
            _ => false,
        }
    }
}

/// A field of a [`Query`].
pub struct QueryField {
    query: Weak<Query>,
    dict: Weak<Dict>,
    query_serial: u32,
    serial: AtomicU32,
    listener: ListenerId,
    attrs: RwLock<FieldAttrs>,
    kind: RwLock<FieldKind>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for QueryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryField")
            .field("id", &self.xml_id().to_string())
            .field("kind", &self.kind.read().tag())
            .field("name", &self.attrs.read().name)
            .finish()
    }
}

impl QueryField {
    fn register(
        query: &Arc<Query>,
        serial: Option<u32>,
        attrs: FieldAttrs,
        kind: FieldKind,
    ) -> Arc<Self> {
        let serial = query.reserve_field_serial(serial);
        let listener = query.next_listener_id();
        let field = Arc::new(Self {
            query: Arc::downgrade(query),
            dict: query.weak_dict(),
            query_serial: query.serial(),
            serial: AtomicU32::new(serial),
            listener,
            attrs: RwLock::new(attrs),
            kind: RwLock::new(kind),
            destroyed: AtomicBool::new(false),
        });
        let weak: Weak<dyn QueryListener> = Arc::downgrade(&field) as Weak<dyn QueryListener>;
        query.add_listener_with_id(listener, weak);
        query.push_field(Arc::clone(&field));
        field
    }

    fn target_ref(query: &Arc<Query>, target: &Arc<QueryTarget>) -> ObjectRef {
        let mut r = ObjectRef::with_weak_dict(query.weak_dict());
        r.set_helper(Some(RefHelper::Query(Arc::downgrade(query))));
        r.set_ref_object(DictObject::Target(Arc::clone(target)));
        r
    }

    /// `target.*`
    pub fn new_all(query: &Arc<Query>, target: &Arc<QueryTarget>) -> Arc<Self> {
        let kind = QueryFieldAll::with_target(Self::target_ref(query, target));
        Self::register(query, None, FieldAttrs::default(), FieldKind::All(kind))
    }

    /// `target.column` for a resolved column (table field or sub-query field).
    /// The field is named after the column.
    pub fn new_field(query: &Arc<Query>, target: &Arc<QueryTarget>, column: DictObject) -> Arc<Self> {
        let attrs = FieldAttrs {
            name: Some(column.name()),
            ..FieldAttrs::default()
        };
        let mut field_ref = ObjectRef::with_weak_dict(query.weak_dict());
        field_ref.set_ref_object_type(column, ObjectType::EntityField);
        let kind = QueryFieldField::with_refs(Self::target_ref(query, target), field_ref);
        Self::register(query, None, attrs, FieldKind::Field(kind))
    }

    /// `target.column` bound by column name, resolved on activation.
    pub fn new_field_by_name(query: &Arc<Query>, target: &Arc<QueryTarget>, column: &str) -> Arc<Self> {
        let attrs = FieldAttrs {
            name: Some(column.to_owned()),
            ..FieldAttrs::default()
        };
        let mut field_ref = ObjectRef::with_weak_dict(query.weak_dict());
        field_ref.set_ref_name(ObjectType::EntityField, RefKind::ByName, column);
        let kind = QueryFieldField::with_refs(Self::target_ref(query, target), field_ref);
        Self::register(query, None, attrs, FieldKind::Field(kind))
    }

    /// `function(args...)`; the argument count must match the function's
    /// arity.
    pub fn new_func(
        query: &Arc<Query>,
        function: &Arc<DictFunction>,
        args: &[Arc<QueryField>],
    ) -> Result<Arc<Self>> {
        if function.arg_types().len() != args.len() {
            return Err(XqlError::WrongArgCount {
                function: function.name().to_owned(),
                expected: function.arg_types().len(),
                found: args.len(),
            });
        }
        let mut func_ref = ObjectRef::with_weak_dict(query.weak_dict());
        func_ref.set_ref_object(DictObject::Function(Arc::clone(function)));
        let attrs = FieldAttrs {
            name: Some(function.name().to_owned()),
            ..FieldAttrs::default()
        };
        let kind = QueryFieldFunc::with_refs(func_ref, Self::arg_refs(query, args));
        Ok(Self::register(query, None, attrs, FieldKind::Func(kind)))
    }

    /// `function(args...)` bound by function name, resolved on activation.
    pub fn new_func_by_name(query: &Arc<Query>, function: &str, args: &[Arc<QueryField>]) -> Arc<Self> {
        let mut func_ref = ObjectRef::with_weak_dict(query.weak_dict());
        func_ref.set_ref_name(ObjectType::Function, RefKind::ByName, function);
        let attrs = FieldAttrs {
            name: Some(function.to_owned()),
            ..FieldAttrs::default()
        };
        let kind = QueryFieldFunc::with_refs(func_ref, Self::arg_refs(query, args));
        Self::register(query, None, attrs, FieldKind::Func(kind))
    }

    fn arg_refs(query: &Arc<Query>, args: &[Arc<QueryField>]) -> Vec<ObjectRef> {
        args.iter()
            .map(|arg| {
                let mut r = ObjectRef::with_weak_dict(query.weak_dict());
                r.set_helper(Some(RefHelper::Query(Arc::downgrade(query))));
                r.set_ref_object(DictObject::QueryField(Arc::clone(arg)));
                r
            })
            .collect()
    }

    /// A constant (or, once flagged, a parameter) of the given SQL type.
    pub fn new_value(query: &Arc<Query>, sql_type: &str) -> Arc<Self> {
        let kind = QueryFieldValue::new(sql_type);
        Self::register(query, None, FieldAttrs::default(), FieldKind::Value(kind))
    }

    /// Loads a field element and adds the field to `query`.
    pub fn from_xml(query: &Arc<Query>, node: &XmlNode) -> Result<Arc<Self>> {
        let (serial, attrs, kind) = parse_field(query, node)?;
        Ok(Self::register(query, Some(serial), attrs, kind))
    }

    /// Copies the field into `query`, keeping its serial. Resolved
    /// references stay resolved; the rest keep their symbolic binding.
    pub fn copy_into(&self, query: &Arc<Query>) -> Arc<Self> {
        let attrs = self.attrs.read().clone();
        let mut kind = self.kind.read().clone();
        kind.rebind_helpers(&Arc::downgrade(query));
        Self::register(query, Some(self.serial()), attrs, kind)
    }

    /// Same kind, same attributes, and references bound to the same objects.
    pub fn is_equal(&self, other: &QueryField) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        *self.attrs.read() == *other.attrs.read() && self.kind.read().is_equal(&other.kind.read())
    }

    /// XML id, `QU<n>:QF<m>`.
    pub fn xml_id(&self) -> FieldXmlId {
        FieldXmlId {
            query: self.query_serial,
            field: self.serial(),
        }
    }

    /// Serial `m` of `QF<m>`.
    pub fn serial(&self) -> u32 {
        self.serial.load(Ordering::Acquire)
    }

    /// Owning query, if it is still alive.
    pub fn query(&self) -> Option<Arc<Query>> {
        self.query.upgrade()
    }

    /// `true` once the owning query or the referenced target went away.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Field name.
    pub fn name(&self) -> Option<String> {
        self.attrs.read().name.clone()
    }

    /// Renames the field.
    pub fn set_name(&self, name: Option<&str>) {
        self.attrs.write().name = name.map(str::to_owned);
    }

    /// Description.
    pub fn description(&self) -> Option<String> {
        self.attrs.read().description.clone()
    }

    /// Sets or clears the description.
    pub fn set_description(&self, description: Option<&str>) {
        self.attrs.write().description = description.map(str::to_owned);
    }

    /// Alias.
    pub fn alias(&self) -> Option<String> {
        self.attrs.read().alias.clone()
    }

    /// Sets or clears the alias.
    pub fn set_alias(&self, alias: Option<&str>) {
        self.attrs.write().alias = alias.map(str::to_owned);
    }

    /// Whether the field is rendered.
    pub fn is_visible(&self) -> bool {
        self.attrs.read().visible
    }

    /// Shows or hides the field.
    pub fn set_visible(&self, visible: bool) {
        self.attrs.write().visible = visible;
    }

    /// Whether the field was added internally.
    pub fn is_internal(&self) -> bool {
        self.attrs.read().internal
    }

    /// Marks the field as internal.
    pub fn set_internal(&self, internal: bool) {
        self.attrs.write().internal = internal;
    }

    /// Snapshot of the common attributes.
    pub fn attrs(&self) -> FieldAttrs {
        self.attrs.read().clone()
    }

    /// Read access to the kind-specific content.
    pub fn kind(&self) -> RwLockReadGuard<'_, FieldKind> {
        self.kind.read()
    }

    /// Write access to the kind-specific content.
    pub fn kind_mut(&self) -> RwLockWriteGuard<'_, FieldKind> {
        self.kind.write()
    }

    /// Value provider of a `target.column` field.
    pub fn set_value_provider(&self, provider: Option<&Arc<QueryField>>) {
        if let FieldKind::Field(k) = &mut *self.kind.write() {
            k.set_value_provider(self.dict.clone(), provider);
        }
    }

    fn server_info(&self) -> Option<ServerInfo> {
        self.dict.upgrade().and_then(|dict| dict.server_info())
    }

    pub(crate) fn renumber_refs(&self, old_prefix: &str, new_prefix: &str) {
        for r in self.kind.write().refs_mut() {
            r.renumber(old_prefix, new_prefix);
        }
    }

    fn destroy(&self, query: &Query) {
        self.destroyed.store(true, Ordering::Release);
        self.deactivate();
        query.remove_field(self);
    }
}

impl Drop for QueryField {
    fn drop(&mut self) {
        if let Some(query) = self.query.upgrade() {
            query.remove_listener(self.listener);
        }
    }
}

impl QueryListener for QueryField {
    fn target_removed(&self, query: &Query, target: &Arc<QueryTarget>) {
        let hit = self.kind.read().references_target(target);
        if hit {
            debug!(field = %self.xml_id(), target = %target.xml_id(), "target removed, destroying field");
            self.destroy(query);
        }
    }

    fn query_destroyed(&self, _query: &Query) {
        self.destroyed.store(true, Ordering::Release);
        self.deactivate();
    }
}

impl Referer for QueryField {
    fn activate(&self) -> bool {
        self.kind.write().activate()
    }

    fn deactivate(&self) {
        for r in self.kind.write().refs_mut() {
            r.deactivate();
        }
    }

    fn is_active(&self) -> bool {
        self.kind.read().refs().iter().all(|r| r.is_active())
    }

    fn ref_objects(&self) -> Vec<DictObject> {
        self.kind
            .read()
            .refs()
            .iter()
            .filter_map(|r| r.ref_object().cloned())
            .collect()
    }

    fn replace_refs(&self, replacements: &Replacements) {
        for r in self.kind.write().refs_mut() {
            r.replace_ref_object(replacements);
        }
    }
}

impl Renderer for QueryField {
    fn render_as_sql(
        &self,
        ctx: Option<&mut RenderContext>,
        options: RenderOptions,
    ) -> Result<String> {
        let name = self.name();
        let server = self.server_info();
        match &*self.kind.read() {
            FieldKind::All(k) => k.render_as_sql(),
            FieldKind::Field(k) => k.render_as_sql(options, server),
            FieldKind::Func(k) => k.render_as_sql(ctx, options),
            FieldKind::Value(k) => k.render_as_sql(name.as_deref(), ctx, options),
        }
    }

    fn render_as_str(&self) -> String {
        match &*self.kind.read() {
            FieldKind::All(k) => k.render_as_str(),
            FieldKind::Field(k) => k.render_as_str(),
            FieldKind::Func(k) => k.render_as_str(),
            FieldKind::Value(k) => k.render_as_str(),
        }
    }
}

impl EntityField for QueryField {
    fn entity(&self) -> Option<Arc<Query>> {
        self.query.upgrade()
    }

    fn dict_type(&self) -> Option<String> {
        match &*self.kind.read() {
            FieldKind::All(_) => None,
            FieldKind::Field(k) => match k.field_ref().ref_object()? {
                DictObject::TableField(column) => Some(column.sql_type().to_owned()),
                DictObject::QueryField(inner) if !std::ptr::eq(Arc::as_ptr(inner), self) => {
                    inner.dict_type()
                }
                _ => None,
            },
            FieldKind::Func(k) => k
                .func_ref()
                .ref_object()
                .and_then(DictObject::as_function)
                .map(|f| f.ret_type().to_owned()),
            FieldKind::Value(k) => Some(k.sql_type().to_owned()),
        }
    }
}

impl XmlStorage for QueryField {
    fn save_to_xml(&self) -> Result<XmlNode> {
        let kind = self.kind.read();
        let attrs = self.attrs.read();
        let mut node = XmlNode::new(kind.tag()).with_attr("id", self.xml_id().to_string());
        if let Some(name) = &attrs.name {
            node.set_attr("name", name.as_str());
        }
        if let Some(description) = &attrs.description {
            node.set_attr("descr", description.as_str());
        }
        if let Some(alias) = &attrs.alias {
            node.set_attr("alias", alias.as_str());
        }
        if !attrs.visible {
            node.set_attr("is_visible", "f");
        }
        if attrs.internal {
            node.set_attr("is_internal", "t");
        }
        match &*kind {
            FieldKind::All(k) => k.save(&mut node),
            FieldKind::Field(k) => k.save(&mut node),
            FieldKind::Func(k) => k.save(&mut node),
            FieldKind::Value(k) => k.save(&mut node),
        }
        Ok(node)
    }

    fn load_from_xml(&self, node: &XmlNode) -> Result<()> {
        let query = self
            .query
            .upgrade()
            .ok_or_else(|| XqlError::unresolved("query", None))?;
        let expected = self.kind.read().tag();
        if node.name() != expected {
            return Err(XqlError::WrongTag {
                expected,
                found: node.name().to_owned(),
            });
        }
        let (serial, attrs, kind) = parse_field(&query, node)?;
        query.reserve_field_serial(Some(serial));
        self.serial.store(serial, Ordering::Release);
        *self.attrs.write() = attrs;
        *self.kind.write() = kind;
        Ok(())
    }
}

/// Parses a field element without touching the query's field list.
fn parse_field(query: &Arc<Query>, node: &XmlNode) -> Result<(u32, FieldAttrs, FieldKind)> {
    let tag = match node.name() {
        all::TAG => all::TAG,
        table_field::TAG => table_field::TAG,
        func::TAG => func::TAG,
        value::TAG => value::TAG,
        other => {
            return Err(XqlError::WrongTag {
                expected: "gda_query_f*",
                found: other.to_owned(),
            })
        }
    };
    let id = node.attr("id").ok_or(XqlError::MissingAttributes { tag })?;
    let serial = FieldXmlId::parse(id)?.field;
    let attrs = FieldAttrs {
        name: node.attr("name").map(str::to_owned),
        description: node.attr("descr").map(str::to_owned),
        alias: node.attr("alias").map(str::to_owned),
        visible: node.attr("is_visible") != Some("f"),
        internal: node.attr("is_internal") == Some("t"),
    };
    let env = LoadEnv {
        dict: query.weak_dict(),
        query: Arc::downgrade(query),
    };
    let kind = match tag {
        all::TAG => FieldKind::All(QueryFieldAll::load(&env, node)?),
        table_field::TAG => FieldKind::Field(QueryFieldField::load(&env, node)?),
        func::TAG => FieldKind::Func(QueryFieldFunc::load(&env, node)?),
        _ => FieldKind::Value(QueryFieldValue::load(node)?),
    };
    Ok((serial, attrs, kind))
}

/// What kind loaders need to build references.
pub(crate) struct LoadEnv {
    dict: Weak<Dict>,
    query: Weak<Query>,
}

impl LoadEnv {
    fn new_ref(&self) -> ObjectRef {
        ObjectRef::with_weak_dict(self.dict.clone())
    }

    /// Reference scoped to the query (target aliases, field names).
    fn query_scoped_ref(&self) -> ObjectRef {
        let mut r = self.new_ref();
        r.set_helper(Some(RefHelper::Query(self.query.clone())));
        r
    }
}

/// Binds `r` from `<id_attr>` (by XML id) or `<name_attr>` (by name).
/// Returns `false` when neither attribute is present.
fn load_ref(r: &mut ObjectRef, node: &XmlNode, ty: ObjectType, id_attr: &str, name_attr: &str) -> bool {
    if let Some(id) = node.attr(id_attr) {
        r.set_ref_name(ty, RefKind::ByXmlId, id);
        true
    } else if let Some(name) = node.attr(name_attr) {
        r.set_ref_name(ty, RefKind::ByName, name);
        true
    } else {
        false
    }
}

/// Writes `r` as `<id_attr>` when resolved or bound by XML id, and as
/// `<name_attr>` when bound by name and unresolved.
fn save_ref(node: &mut XmlNode, r: &ObjectRef, id_attr: &str, name_attr: &str) {
    if let Some(object) = r.ref_object() {
        node.set_attr(id_attr, object.xml_id());
        return;
    }
    match r.ref_name() {
        Some((name, _, RefKind::ByXmlId)) => node.set_attr(id_attr, name),
        Some((name, _, RefKind::ByName)) => node.set_attr(name_attr, name),
        None => {}
    }
}

/// Whether `r` designates `target`, resolved or not.
fn ref_names_target(r: &ObjectRef, target: &Arc<QueryTarget>) -> bool {
    match r.ref_object() {
        Some(object) => object
            .as_target()
            .is_some_and(|resolved| Arc::ptr_eq(resolved, target)),
        None => match r.ref_name() {
            Some((name, _, RefKind::ByXmlId)) => name == target.xml_id(),
            Some((name, _, RefKind::ByName)) => name == target.alias(),
            None => false,
        },
    }
}

fn refs_equal(a: &ObjectRef, b: &ObjectRef) -> bool {
    match (a.ref_object(), b.ref_object()) {
        (Some(x), Some(y)) => x.ptr_eq(y),
        _ => a.ref_name() == b.ref_name(),
    }
}

fn refs_equal_all(a: &[&ObjectRef], b: &[&ObjectRef]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| refs_equal(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<Dict>, Arc<Query>, Arc<QueryTarget>) {
        let dict = Dict::new();
        let items = dict.add_table("items");
        items.add_field("name", "varchar");
        items.add_field("Qty", "int");
        let query = Query::new(&dict);
        let target = query.add_target(DictObject::Table(items), Some("i"));
        (dict, query, target)
    }

    #[test]
    fn fields_get_query_scoped_ids() {
        let (_dict, query, target) = setup();
        let all = QueryField::new_all(&query, &target);
        let name = QueryField::new_field_by_name(&query, &target, "name");
        assert_eq!(all.xml_id().to_string(), "QU1:QF1");
        assert_eq!(name.xml_id().to_string(), "QU1:QF2");
        assert_eq!(query.fields().len(), 2);
        assert_eq!(query.listener_count(), 2);
    }

    #[test]
    fn removing_the_target_destroys_dependent_fields() {
        let (_dict, query, target) = setup();
        let all = QueryField::new_all(&query, &target);
        let value = QueryField::new_value(&query, "int");
        assert!(query.remove_target(&target));
        assert!(all.is_destroyed());
        assert!(!value.is_destroyed());
        let remaining: Vec<_> = query.fields().iter().map(|f| f.serial()).collect();
        assert_eq!(remaining, vec![value.serial()]);
    }

    #[test]
    fn dropping_a_field_deregisters_its_listener() {
        let (_dict, query, target) = setup();
        let all = QueryField::new_all(&query, &target);
        assert_eq!(query.listener_count(), 1);
        assert!(query.remove_field(&all));
        drop(all);
        assert_eq!(query.listener_count(), 0);
    }

    #[test]
    fn destroying_the_query_releases_fields() {
        let (_dict, query, target) = setup();
        let all = QueryField::new_all(&query, &target);
        assert!(all.activate());
        query.destroy();
        assert!(all.is_destroyed());
        assert!(all.ref_objects().is_empty());
        assert!(query.fields().is_empty());
    }

    #[test]
    fn malformed_ids_fail_the_load() {
        let (_dict, query, _target) = setup();
        let node = XmlNode::new("gda_query_fall")
            .with_attr("id", "QU1-QF1")
            .with_attr("target", "QU1:T1");
        let err = QueryField::from_xml(&query, &node).unwrap_err();
        assert!(matches!(err, XqlError::MalformedId { .. }));
        let node = XmlNode::new("gda_query_fall").with_attr("id", "QU1:QF1");
        let err = QueryField::from_xml(&query, &node).unwrap_err();
        assert!(matches!(err, XqlError::MissingAttributes { .. }));
        assert!(query.fields().is_empty());
    }

    #[test]
    fn copies_compare_equal_to_their_source() {
        let (dict, query, target) = setup();
        let name = QueryField::new_field_by_name(&query, &target, "name");
        name.set_alias(Some("n"));
        let other = Query::new(&dict);
        let copy = name.copy_into(&other);
        assert_eq!(copy.xml_id().to_string(), "QU2:QF1");
        assert!(name.is_equal(&copy));
        copy.set_visible(false);
        assert!(!name.is_equal(&copy));
    }

    #[test]
    fn load_from_xml_keeps_kind() {
        let (_dict, query, target) = setup();
        let all = QueryField::new_all(&query, &target);
        let node = XmlNode::new("gda_query_fval")
            .with_attr("id", "QU1:QF7")
            .with_attr("type", "int");
        assert!(matches!(
            all.load_from_xml(&node),
            Err(XqlError::WrongTag { .. })
        ));
        assert_eq!(all.serial(), 1);
    }
}

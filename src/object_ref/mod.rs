#![forbid(unsafe_code)]

//! Deferred, re-resolvable references to dictionary objects.
//!
//! An [`ObjectRef`] stores a symbolic binding (a name or an XML id, scoped to
//! an [`ObjectType`]) and, once [`ObjectRef::activate`] succeeds, a shared
//! handle to the resolved object. Failed lookups are never cached: every
//! activation of an inactive reference performs a fresh lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{trace, warn};

use crate::dict::{Dict, DictAggregate, DictField, DictFunction, DictTable};
use crate::query::field::QueryField;
use crate::query::{Query, QueryTarget};

/// Kind of object a reference resolves to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ObjectType {
    /// A dictionary table.
    Table,
    /// A column of a dictionary table.
    TableField,
    /// A live query.
    Query,
    /// A target of a query.
    Target,
    /// A table field or a query field, whichever the id or helper yields.
    EntityField,
    /// A server function.
    Function,
    /// A server aggregate.
    Aggregate,
    /// A field of a query.
    QueryField,
}

impl ObjectType {
    fn label(self) -> &'static str {
        match self {
            ObjectType::Table => "table",
            ObjectType::TableField => "table field",
            ObjectType::Query => "query",
            ObjectType::Target => "target",
            ObjectType::EntityField => "field",
            ObjectType::Function => "function",
            ObjectType::Aggregate => "aggregate",
            ObjectType::QueryField => "query field",
        }
    }
}

/// How the symbolic name of a reference is interpreted.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RefKind {
    /// The name is an XML id such as `TV1` or `QU1:QF2`.
    ByXmlId,
    /// The name is looked up by object name.
    ByName,
}

/// A resolved dictionary or query object.
#[derive(Clone)]
pub enum DictObject {
    /// Table.
    Table(Arc<DictTable>),
    /// Table column.
    TableField(Arc<DictField>),
    /// Function.
    Function(Arc<DictFunction>),
    /// Aggregate.
    Aggregate(Arc<DictAggregate>),
    /// Query.
    Query(Arc<Query>),
    /// Query target.
    Target(Arc<QueryTarget>),
    /// Query field.
    QueryField(Arc<QueryField>),
}

/// Identity of a [`DictObject`], usable as a map key.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ObjectKey(usize);

impl DictObject {
    /// Type of the object; both field kinds report their concrete type.
    pub fn object_type(&self) -> ObjectType {
        match self {
            DictObject::Table(_) => ObjectType::Table,
            DictObject::TableField(_) => ObjectType::TableField,
            DictObject::Function(_) => ObjectType::Function,
            DictObject::Aggregate(_) => ObjectType::Aggregate,
            DictObject::Query(_) => ObjectType::Query,
            DictObject::Target(_) => ObjectType::Target,
            DictObject::QueryField(_) => ObjectType::QueryField,
        }
    }

    /// XML id of the object.
    pub fn xml_id(&self) -> String {
        match self {
            DictObject::Table(t) => t.xml_id(),
            DictObject::TableField(f) => f.xml_id(),
            DictObject::Function(f) => f.xml_id(),
            DictObject::Aggregate(a) => a.xml_id(),
            DictObject::Query(q) => q.xml_id(),
            DictObject::Target(t) => t.xml_id(),
            DictObject::QueryField(f) => f.xml_id().to_string(),
        }
    }

    /// Current name of the object. Targets are named by their alias.
    pub fn name(&self) -> String {
        match self {
            DictObject::Table(t) => t.name(),
            DictObject::TableField(f) => f.name(),
            DictObject::Function(f) => f.name().to_owned(),
            DictObject::Aggregate(a) => a.name().to_owned(),
            DictObject::Query(q) => q.name().unwrap_or_default(),
            DictObject::Target(t) => t.alias(),
            DictObject::QueryField(f) => f.name().unwrap_or_default(),
        }
    }

    /// Pointer identity of the underlying object.
    pub fn key(&self) -> ObjectKey {
        let ptr = match self {
            DictObject::Table(o) => Arc::as_ptr(o) as *const (),
            DictObject::TableField(o) => Arc::as_ptr(o) as *const (),
            DictObject::Function(o) => Arc::as_ptr(o) as *const (),
            DictObject::Aggregate(o) => Arc::as_ptr(o) as *const (),
            DictObject::Query(o) => Arc::as_ptr(o) as *const (),
            DictObject::Target(o) => Arc::as_ptr(o) as *const (),
            DictObject::QueryField(o) => Arc::as_ptr(o) as *const (),
        };
        ObjectKey(ptr as usize)
    }

    /// `true` when both handles point at the same object.
    pub fn ptr_eq(&self, other: &DictObject) -> bool {
        self.key() == other.key()
    }

    /// The target, if this is one.
    pub fn as_target(&self) -> Option<&Arc<QueryTarget>> {
        match self {
            DictObject::Target(t) => Some(t),
            _ => None,
        }
    }

    /// The query field, if this is one.
    pub fn as_query_field(&self) -> Option<&Arc<QueryField>> {
        match self {
            DictObject::QueryField(f) => Some(f),
            _ => None,
        }
    }

    /// The function, if this is one.
    pub fn as_function(&self) -> Option<&Arc<DictFunction>> {
        match self {
            DictObject::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Entity owning a field object: the table of a table field or the
    /// query of a query field.
    pub fn owning_entity(&self) -> Option<DictObject> {
        match self {
            DictObject::TableField(f) => f.table().map(DictObject::Table),
            DictObject::QueryField(f) => f.query().map(DictObject::Query),
            _ => None,
        }
    }
}

impl fmt::Debug for DictObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.object_type(), self.xml_id())
    }
}

/// Old-object to new-object mapping applied when an object graph is copied.
#[derive(Clone, Debug, Default)]
pub struct Replacements {
    map: HashMap<ObjectKey, DictObject>,
}

impl Replacements {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `old` is replaced by `new`.
    pub fn insert(&mut self, old: &DictObject, new: DictObject) {
        self.map.insert(old.key(), new);
    }

    /// Replacement for `old`, if any.
    pub fn get(&self, old: &DictObject) -> Option<&DictObject> {
        self.map.get(&old.key())
    }

    /// Number of recorded replacements.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Context object used to resolve names that are only unique within a
/// query or target.
#[derive(Clone, Debug)]
pub enum RefHelper {
    /// Targets are looked up by alias inside this query.
    Query(Weak<Query>),
    /// Fields are looked up by name inside the entity this target represents.
    Target(Weak<QueryTarget>),
}

/// A deferred binding from a symbolic name to a dictionary object.
#[derive(Clone)]
pub struct ObjectRef {
    dict: Weak<Dict>,
    requested: Option<ObjectType>,
    kind: RefKind,
    name: Option<String>,
    object: Option<DictObject>,
    obj_name: Option<String>,
    helper: Option<RefHelper>,
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("type", &self.requested)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("object", &self.object)
            .finish()
    }
}

impl ObjectRef {
    /// Creates an empty reference resolving against `dict`.
    pub fn new(dict: &Arc<Dict>) -> Self {
        Self::with_weak_dict(Arc::downgrade(dict))
    }

    pub(crate) fn with_weak_dict(dict: Weak<Dict>) -> Self {
        Self {
            dict,
            requested: None,
            kind: RefKind::ByXmlId,
            name: None,
            object: None,
            obj_name: None,
            helper: None,
        }
    }

    /// Binds the reference to a symbolic name, dropping any resolved object.
    ///
    /// Rebinding to the exact same (type, kind, name) keeps the current
    /// resolution.
    pub fn set_ref_name(&mut self, ty: ObjectType, kind: RefKind, name: &str) {
        if name.is_empty() {
            warn!(?ty, "ignoring empty reference name");
            return;
        }
        if self.requested == Some(ty) && self.kind == kind && self.name.as_deref() == Some(name) {
            return;
        }
        self.requested = Some(ty);
        self.kind = kind;
        self.name = Some(name.to_owned());
        self.object = None;
        self.obj_name = None;
    }

    /// Symbolic name with its type and kind, whatever the activation state.
    pub fn ref_name(&self) -> Option<(&str, ObjectType, RefKind)> {
        let name = self.name.as_deref()?;
        Some((name, self.requested?, self.kind))
    }

    /// Symbolic name only.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// How the symbolic name is interpreted.
    pub fn kind(&self) -> RefKind {
        self.kind
    }

    /// Object type requested by the last `set_ref_name`.
    pub fn requested_type(&self) -> Option<ObjectType> {
        self.requested
    }

    /// Resolved object, if active.
    pub fn ref_object(&self) -> Option<&DictObject> {
        self.object.as_ref()
    }

    /// Name the resolved object carried when it was last resolved or set.
    pub fn ref_object_name(&self) -> Option<&str> {
        self.obj_name.as_deref()
    }

    /// Installs the context used for alias and field-name lookups.
    pub fn set_helper(&mut self, helper: Option<RefHelper>) {
        self.helper = helper;
    }

    /// Injects a resolved object, back-filling the symbolic binding from it.
    pub fn set_ref_object(&mut self, object: DictObject) {
        let ty = object.object_type();
        self.set_ref_object_type(object, ty);
    }

    /// Like [`ObjectRef::set_ref_object`] with an explicit requested type.
    pub fn set_ref_object_type(&mut self, object: DictObject, ty: ObjectType) {
        self.requested = Some(ty);
        self.kind = RefKind::ByXmlId;
        self.name = Some(object.xml_id());
        self.obj_name = Some(object.name());
        self.object = Some(object);
    }

    /// Drops the resolved object and the binding.
    pub fn clear(&mut self) {
        self.requested = None;
        self.kind = RefKind::ByXmlId;
        self.name = None;
        self.object = None;
        self.obj_name = None;
    }

    /// A reference without a symbolic name has nothing to resolve and counts
    /// as active.
    pub fn is_active(&self) -> bool {
        self.name.is_none() || self.object.is_some()
    }

    /// Resolves the reference now. Returns `true` when it is active
    /// afterwards. Failure leaves the reference unchanged.
    pub fn activate(&mut self) -> bool {
        let (Some(name), Some(ty)) = (self.name.clone(), self.requested) else {
            return true;
        };
        if self.object.is_some() {
            return true;
        }
        match self.lookup(ty, &name) {
            Some(object) => {
                trace!(ty = ty.label(), name = %name, "reference resolved");
                self.obj_name = Some(object.name());
                self.object = Some(object);
                true
            }
            None => {
                trace!(ty = ty.label(), name = %name, "reference unresolved");
                false
            }
        }
    }

    /// Releases the resolved object, keeping the symbolic binding.
    pub fn deactivate(&mut self) {
        self.object = None;
    }

    /// Swaps the resolved object for its replacement, if any. Inactive
    /// references are left alone.
    pub fn replace_ref_object(&mut self, replacements: &Replacements) {
        let Some(current) = &self.object else {
            return;
        };
        if let Some(new) = replacements.get(current).cloned() {
            self.name = Some(match self.kind {
                RefKind::ByXmlId => new.xml_id(),
                RefKind::ByName => self.name.clone().unwrap_or_else(|| new.name()),
            });
            self.obj_name = Some(new.name());
            self.object = Some(new);
        }
    }

    /// Rewrites an unresolved by-id binding that points into a renumbered
    /// query (`QU<old>:...` becomes `QU<new>:...`).
    pub(crate) fn renumber(&mut self, old_prefix: &str, new_prefix: &str) {
        if self.object.is_some() || self.kind != RefKind::ByXmlId {
            return;
        }
        let renamed = self
            .name
            .as_deref()
            .and_then(|name| name.strip_prefix(old_prefix))
            .map(|rest| format!("{new_prefix}{rest}"));
        if renamed.is_some() {
            self.name = renamed;
        }
    }

    /// Label of the requested type, for error messages.
    pub(crate) fn type_label(&self) -> &'static str {
        self.requested.map(ObjectType::label).unwrap_or("object")
    }

    fn lookup(&self, ty: ObjectType, name: &str) -> Option<DictObject> {
        let dict = self.dict.upgrade()?;
        let by_id = self.kind == RefKind::ByXmlId;
        match ty {
            ObjectType::Table => {
                let found = if by_id {
                    dict.table_by_xml_id(name)
                } else {
                    dict.table_by_name(name)
                };
                found.map(DictObject::Table)
            }
            ObjectType::TableField => {
                let found = if by_id {
                    dict.field_by_xml_id(name)
                } else {
                    dict.field_by_name(name)
                };
                found.map(DictObject::TableField)
            }
            ObjectType::Query => {
                if !by_id {
                    return None;
                }
                dict.query_by_xml_id(name).map(DictObject::Query)
            }
            ObjectType::Target => {
                if by_id {
                    let (query_id, _) = name.split_once(':')?;
                    dict.query_by_xml_id(query_id)?
                        .target_by_xml_id(name)
                        .map(DictObject::Target)
                } else {
                    match &self.helper {
                        Some(RefHelper::Query(query)) => query
                            .upgrade()?
                            .target_by_alias(name)
                            .map(DictObject::Target),
                        _ => {
                            warn!(name, "target lookup by alias needs a query helper");
                            None
                        }
                    }
                }
            }
            ObjectType::QueryField => {
                if by_id {
                    query_field_by_xml_id(&dict, name)
                } else {
                    match &self.helper {
                        Some(RefHelper::Query(query)) => query
                            .upgrade()?
                            .field_by_name(name)
                            .map(DictObject::QueryField),
                        _ => None,
                    }
                }
            }
            ObjectType::EntityField => {
                if by_id {
                    if name.starts_with("TV") {
                        dict.field_by_xml_id(name).map(DictObject::TableField)
                    } else if name.starts_with("QU") {
                        query_field_by_xml_id(&dict, name)
                    } else {
                        None
                    }
                } else {
                    match &self.helper {
                        Some(RefHelper::Target(target)) => {
                            target.upgrade()?.field_by_name(name)
                        }
                        _ => {
                            warn!(name, "field lookup by name needs a target helper");
                            None
                        }
                    }
                }
            }
            ObjectType::Function => {
                let found = if by_id {
                    dict.function_by_xml_id(name)
                } else {
                    dict.function_by_name(name)
                };
                found.map(DictObject::Function)
            }
            ObjectType::Aggregate => {
                let found = if by_id {
                    dict.aggregate_by_xml_id(name)
                } else {
                    dict.aggregate_by_name(name)
                };
                found.map(DictObject::Aggregate)
            }
        }
    }
}

fn query_field_by_xml_id(dict: &Dict, name: &str) -> Option<DictObject> {
    let (query_id, _) = name.split_once(':')?;
    dict.query_by_xml_id(query_id)?
        .field_by_xml_id(name)
        .map(DictObject::QueryField)
}

#![forbid(unsafe_code)]

//! Query objects built on the dictionary.
//!
//! A [`Query`] owns its targets (the entities it selects from) and its
//! fields. Fields observe the query through the [`QueryListener`] registry:
//! removing a target destroys the fields that reference it, and destroying
//! the query releases every field.

/// Query field objects (`target.*`, `target.column`, `func(...)`, values).
pub mod field;

/// Targets: the entities a query selects from.
pub mod target;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

pub use field::{EntityField, FieldKind, QueryField, Referer, Renderer, XmlStorage};
pub use target::QueryTarget;

use crate::dict::Dict;
use crate::object_ref::{DictObject, ObjectRef, Replacements};
use crate::render::{RenderContext, RenderOptions};
use crate::types::{Result, XqlError};
use crate::xml::XmlNode;

/// XML tag of a serialized query.
pub const QUERY_TAG: &str = "gda_query";

/// Identifier of a registered listener.
pub type ListenerId = u64;

/// Lifecycle notifications a query sends to its observers.
pub trait QueryListener: Send + Sync {
    /// `target` was removed from `query`.
    fn target_removed(&self, query: &Query, target: &Arc<QueryTarget>);
    /// `query` is being destroyed.
    fn query_destroyed(&self, query: &Query);
}

/// A query: targets, fields, and the observers tied to its lifetime.
pub struct Query {
    dict: Weak<Dict>,
    serial: u32,
    name: RwLock<Option<String>>,
    targets: RwLock<Vec<Arc<QueryTarget>>>,
    fields: RwLock<Vec<Arc<QueryField>>>,
    next_target: AtomicU32,
    next_field: AtomicU32,
    listeners: Mutex<Vec<(ListenerId, Weak<dyn QueryListener>)>>,
    next_listener: AtomicU64,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.xml_id())
            .field("targets", &self.targets.read().len())
            .field("fields", &self.fields.read().len())
            .finish()
    }
}

impl Query {
    /// Creates an empty query registered in `dict`.
    pub fn new(dict: &Arc<Dict>) -> Arc<Self> {
        Self::with_serial(dict, None)
    }

    fn with_serial(dict: &Arc<Dict>, wanted: Option<u32>) -> Arc<Self> {
        let serial = dict.next_query_serial(wanted);
        let query = Arc::new(Self {
            dict: Arc::downgrade(dict),
            serial,
            name: RwLock::new(None),
            targets: RwLock::new(Vec::new()),
            fields: RwLock::new(Vec::new()),
            next_target: AtomicU32::new(0),
            next_field: AtomicU32::new(0),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        });
        dict.register_query(serial, &query);
        query
    }

    /// XML id, `QU<n>`.
    pub fn xml_id(&self) -> String {
        format!("QU{}", self.serial)
    }

    /// Serial `n` of `QU<n>`.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Owning dictionary, if it is still alive.
    pub fn dict(&self) -> Option<Arc<Dict>> {
        self.dict.upgrade()
    }

    pub(crate) fn weak_dict(&self) -> Weak<Dict> {
        self.dict.clone()
    }

    /// Query name.
    pub fn name(&self) -> Option<String> {
        self.name.read().clone()
    }

    /// Renames the query.
    pub fn set_name(&self, name: Option<&str>) {
        *self.name.write() = name.map(str::to_owned);
    }

    /// `true` once [`Query::destroy`] ran.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    // ---- targets -------------------------------------------------------

    /// Adds a target representing `entity` (a table or another query).
    ///
    /// Without an alias the target is named `t<serial>`.
    pub fn add_target(
        self: &Arc<Self>,
        entity: DictObject,
        alias: Option<&str>,
    ) -> Arc<QueryTarget> {
        let mut entity_ref = ObjectRef::with_weak_dict(self.weak_dict());
        entity_ref.set_ref_object(entity);
        self.push_target(None, entity_ref, alias)
    }

    pub(crate) fn push_target(
        self: &Arc<Self>,
        wanted: Option<u32>,
        entity: ObjectRef,
        alias: Option<&str>,
    ) -> Arc<QueryTarget> {
        let serial = reserve(&self.next_target, wanted);
        let alias = alias.map_or_else(|| format!("t{serial}"), str::to_owned);
        let target = Arc::new(QueryTarget::new(self, serial, alias, entity));
        self.targets.write().push(Arc::clone(&target));
        target
    }

    /// Targets in creation order.
    pub fn targets(&self) -> Vec<Arc<QueryTarget>> {
        self.targets.read().clone()
    }

    /// Target whose XML id is `xml_id`.
    pub fn target_by_xml_id(&self, xml_id: &str) -> Option<Arc<QueryTarget>> {
        self.targets
            .read()
            .iter()
            .find(|t| t.xml_id() == xml_id)
            .cloned()
    }

    /// Target whose alias is `alias`.
    pub fn target_by_alias(&self, alias: &str) -> Option<Arc<QueryTarget>> {
        self.targets
            .read()
            .iter()
            .find(|t| t.alias() == alias)
            .cloned()
    }

    /// Removes a target and notifies listeners. Fields referencing the
    /// target destroy themselves in response.
    pub fn remove_target(&self, target: &Arc<QueryTarget>) -> bool {
        let removed = {
            let mut targets = self.targets.write();
            let position = targets.iter().position(|t| Arc::ptr_eq(t, target));
            position.map(|index| targets.remove(index))
        };
        let Some(removed) = removed else {
            return false;
        };
        debug!(query = %self.xml_id(), target = %removed.xml_id(), "target removed");
        for listener in self.live_listeners() {
            listener.target_removed(self, &removed);
        }
        true
    }

    // ---- fields --------------------------------------------------------

    /// Fields in creation order.
    pub fn fields(&self) -> Vec<Arc<QueryField>> {
        self.fields.read().clone()
    }

    /// Field whose XML id is `xml_id`.
    pub fn field_by_xml_id(&self, xml_id: &str) -> Option<Arc<QueryField>> {
        self.fields
            .read()
            .iter()
            .find(|f| f.xml_id().to_string() == xml_id)
            .cloned()
    }

    /// First field named `name`.
    pub fn field_by_name(&self, name: &str) -> Option<Arc<QueryField>> {
        self.fields
            .read()
            .iter()
            .find(|f| f.name().as_deref() == Some(name))
            .cloned()
    }

    pub(crate) fn reserve_field_serial(&self, wanted: Option<u32>) -> u32 {
        reserve(&self.next_field, wanted)
    }

    pub(crate) fn push_field(&self, field: Arc<QueryField>) {
        self.fields.write().push(field);
    }

    /// Removes a field from the query. Returns `false` if it was not there.
    pub fn remove_field(&self, field: &QueryField) -> bool {
        let removed = {
            let mut fields = self.fields.write();
            let position = fields
                .iter()
                .position(|f| std::ptr::eq(Arc::as_ptr(f), field));
            position.map(|index| fields.remove(index))
        };
        removed.is_some()
    }

    // ---- listeners -----------------------------------------------------

    pub(crate) fn next_listener_id(&self) -> ListenerId {
        self.next_listener.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Registers an observer under a previously reserved id.
    pub(crate) fn add_listener_with_id(&self, id: ListenerId, listener: Weak<dyn QueryListener>) {
        self.listeners.lock().push((id, listener));
    }

    /// Registers an observer and returns its id.
    pub fn add_listener(&self, listener: Weak<dyn QueryListener>) -> ListenerId {
        let id = self.next_listener_id();
        self.add_listener_with_id(id, listener);
        id
    }

    /// Drops a registration made by `add_listener`.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Number of registered observers (dead ones included until pruned).
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn live_listeners(&self) -> Vec<Arc<dyn QueryListener>> {
        let mut listeners = self.listeners.lock();
        listeners.retain(|(_, l)| l.strong_count() > 0);
        listeners.iter().filter_map(|(_, l)| l.upgrade()).collect()
    }

    /// Notifies observers that the query is gone and releases its content.
    /// Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(query = %self.xml_id(), "query destroyed");
        for listener in self.live_listeners() {
            listener.query_destroyed(self);
        }
        let fields = std::mem::take(&mut *self.fields.write());
        let targets = std::mem::take(&mut *self.targets.write());
        drop(fields);
        drop(targets);
        if let Some(dict) = self.dict.upgrade() {
            dict.unregister_query(self.serial);
        }
    }

    // ---- activation ----------------------------------------------------

    /// Activates every target and field; all of them are attempted.
    pub fn activate(&self) -> bool {
        let mut active = true;
        for target in self.targets() {
            let ok = target.activate();
            active = active && ok;
        }
        for field in self.fields() {
            let ok = field.activate();
            active = active && ok;
        }
        active
    }

    /// Deactivates every target and field.
    pub fn deactivate(&self) {
        for target in self.targets() {
            target.deactivate();
        }
        for field in self.fields() {
            field.deactivate();
        }
    }

    /// Returns `true` when every target and field is active.
    pub fn is_active(&self) -> bool {
        self.targets().iter().all(|t| t.is_active())
            && self.fields().iter().all(|f| f.is_active())
    }

    // ---- rendering -----------------------------------------------------

    /// Renders `SELECT <visible fields> FROM <targets>`.
    pub fn render_as_sql(
        &self,
        ctx: Option<&mut RenderContext>,
        options: RenderOptions,
    ) -> Result<String> {
        let mut ctx = ctx;
        let sep = if options.contains(RenderOptions::PRETTY) {
            "\n"
        } else {
            " "
        };
        let mut columns = Vec::new();
        for field in self.fields().into_iter().filter(|f| f.is_visible()) {
            let mut sql = field.render_as_sql(ctx.as_deref_mut(), options)?;
            if let Some(alias) = field.alias() {
                sql.push_str(&format!(" AS {alias}"));
            }
            columns.push(sql);
        }
        let mut sql = if columns.is_empty() {
            "SELECT *".to_owned()
        } else {
            format!("SELECT {}", columns.join(", "))
        };
        let targets = self
            .targets()
            .iter()
            .map(|t| t.render_as_sql(ctx.as_deref_mut(), options))
            .collect::<Result<Vec<_>>>()?;
        if !targets.is_empty() {
            sql.push_str(&format!("{sep}FROM {}", targets.join(", ")));
        }
        Ok(sql)
    }

    // ---- XML -----------------------------------------------------------

    /// Serializes the query, its targets, and its fields.
    pub fn save_to_xml(&self) -> Result<XmlNode> {
        let mut node = XmlNode::new(QUERY_TAG).with_attr("id", self.xml_id());
        if let Some(name) = self.name() {
            node.set_attr("name", name);
        }
        for target in self.targets() {
            node.push_child(target.save_to_xml());
        }
        for field in self.fields() {
            node.push_child(field.save_to_xml()?);
        }
        Ok(node)
    }

    /// Loads a `<gda_query>` element as a new query in `dict`.
    ///
    /// The query keeps the serial from its `id` attribute when it is free;
    /// otherwise it gets a fresh serial and every internal reference is
    /// renumbered to match.
    pub fn load_from_xml(dict: &Arc<Dict>, node: &XmlNode) -> Result<Arc<Self>> {
        if node.name() != QUERY_TAG {
            return Err(XqlError::WrongTag {
                expected: QUERY_TAG,
                found: node.name().to_owned(),
            });
        }
        let id = node
            .attr("id")
            .ok_or(XqlError::MissingAttributes { tag: QUERY_TAG })?;
        let wanted: u32 = id
            .strip_prefix("QU")
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| XqlError::MalformedId { id: id.to_owned() })?;

        let query = Self::with_serial(dict, Some(wanted));
        query.set_name(node.attr("name"));
        for child in node.children() {
            match child.name() {
                target::TARGET_TAG => {
                    QueryTarget::load_from_xml(&query, child)?;
                }
                _ => {
                    QueryField::from_xml(&query, child)?;
                }
            }
        }
        if query.serial != wanted {
            query.renumber_refs(&format!("QU{wanted}:"), &format!("QU{}:", query.serial));
        }
        Ok(query)
    }

    fn renumber_refs(&self, old_prefix: &str, new_prefix: &str) {
        for target in self.targets() {
            target.renumber_refs(old_prefix, new_prefix);
        }
        for field in self.fields() {
            field.renumber_refs(old_prefix, new_prefix);
        }
    }

    /// Duplicates the query. References to the query's own targets and
    /// fields are retargeted to their copies.
    pub fn new_copy(self: &Arc<Self>) -> Result<Arc<Self>> {
        let dict = self
            .dict
            .upgrade()
            .ok_or_else(|| XqlError::unresolved("dictionary", None))?;
        let copy = Self::new(&dict);
        copy.set_name(self.name().as_deref());

        let mut replacements = Replacements::new();
        replacements.insert(
            &DictObject::Query(Arc::clone(self)),
            DictObject::Query(Arc::clone(&copy)),
        );
        for target in self.targets() {
            let new_target = copy.push_target(
                Some(target.serial()),
                target.entity_ref(),
                Some(target.alias().as_str()),
            );
            replacements.insert(
                &DictObject::Target(target),
                DictObject::Target(new_target),
            );
        }
        for field in self.fields() {
            let new_field = field.copy_into(&copy);
            replacements.insert(
                &DictObject::QueryField(field),
                DictObject::QueryField(new_field),
            );
        }
        copy.renumber_refs(&format!("{}:", self.xml_id()), &format!("{}:", copy.xml_id()));
        for field in copy.fields() {
            field.replace_refs(&replacements);
        }
        debug!(from = %self.xml_id(), to = %copy.xml_id(), "query copied");
        Ok(copy)
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Next serial from `counter`, or `wanted` (moving the counter past it).
fn reserve(counter: &AtomicU32, wanted: Option<u32>) -> u32 {
    match wanted {
        Some(serial) => {
            counter.fetch_max(serial, Ordering::AcqRel);
            serial
        }
        None => counter.fetch_add(1, Ordering::AcqRel) + 1,
    }
}

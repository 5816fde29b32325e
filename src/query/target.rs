use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::Query;
use crate::object_ref::{DictObject, ObjectRef, ObjectType, RefKind};
use crate::render::{needs_quotes, quote_identifier, RenderContext, RenderOptions};
use crate::types::{Result, XqlError};
use crate::xml::XmlNode;

pub(crate) const TARGET_TAG: &str = "gda_query_target";

/// An entity (table or sub-query) a query selects from, under an alias.
pub struct QueryTarget {
    query: Weak<Query>,
    query_serial: u32,
    serial: u32,
    alias: Mutex<String>,
    entity: Mutex<ObjectRef>,
}

impl std::fmt::Debug for QueryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryTarget")
            .field("id", &self.xml_id())
            .field("alias", &*self.alias.lock())
            .finish()
    }
}

impl QueryTarget {
    pub(crate) fn new(query: &Arc<Query>, serial: u32, alias: String, entity: ObjectRef) -> Self {
        Self {
            query: Arc::downgrade(query),
            query_serial: query.serial(),
            serial,
            alias: Mutex::new(alias),
            entity: Mutex::new(entity),
        }
    }

    /// XML id, `QU<n>:T<m>`.
    pub fn xml_id(&self) -> String {
        format!("QU{}:T{}", self.query_serial, self.serial)
    }

    /// Serial `n` of `T<n>`.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Owning query, if it is still alive.
    pub fn query(&self) -> Option<Arc<Query>> {
        self.query.upgrade()
    }

    /// Alias used in the FROM clause.
    pub fn alias(&self) -> String {
        self.alias.lock().clone()
    }

    /// Changes the alias.
    pub fn set_alias(&self, alias: &str) {
        *self.alias.lock() = alias.to_owned();
    }

    /// Snapshot of the entity reference.
    pub fn entity_ref(&self) -> ObjectRef {
        self.entity.lock().clone()
    }

    /// Entity this target represents, resolving the reference if needed.
    pub fn represented_entity(&self) -> Option<DictObject> {
        let mut entity = self.entity.lock();
        entity.activate();
        entity.ref_object().cloned()
    }

    /// Name of the represented entity, falling back to the symbolic name.
    pub fn entity_name(&self) -> Option<String> {
        let entity = self.entity.lock();
        match entity.ref_object() {
            Some(object) => Some(object.name()),
            None => entity.name().map(str::to_owned),
        }
    }

    /// Field of the represented entity with the given name: a table column
    /// or a field of a sub-query.
    pub fn field_by_name(&self, name: &str) -> Option<DictObject> {
        match self.represented_entity()? {
            DictObject::Table(table) => table.field_by_name(name).map(DictObject::TableField),
            DictObject::Query(query) => query.field_by_name(name).map(DictObject::QueryField),
            _ => None,
        }
    }

    /// Resolves the entity reference.
    pub fn activate(&self) -> bool {
        self.entity.lock().activate()
    }

    /// Releases the resolved entity.
    pub fn deactivate(&self) {
        self.entity.lock().deactivate();
    }

    /// Returns `true` when the entity is resolved.
    pub fn is_active(&self) -> bool {
        self.entity.lock().is_active()
    }

    /// `<entity> AS <alias>`; sub-queries are parenthesized.
    pub fn render_as_sql(
        &self,
        ctx: Option<&mut RenderContext>,
        options: RenderOptions,
    ) -> Result<String> {
        let source = match self.represented_entity() {
            Some(DictObject::Query(query)) => format!("({})", query.render_as_sql(ctx, options)?),
            Some(object) => self.identifier(&object.name()),
            None => {
                let entity = self.entity.lock();
                match (entity.name(), entity.kind()) {
                    (Some(name), RefKind::ByName) => self.identifier(name),
                    (name, _) => return Err(XqlError::unresolved("entity", name)),
                }
            }
        };
        Ok(format!("{source} AS {}", self.alias()))
    }

    pub(crate) fn save_to_xml(&self) -> XmlNode {
        let mut node = XmlNode::new(TARGET_TAG).with_attr("id", self.xml_id());
        let entity = self.entity.lock();
        match (entity.ref_object(), entity.name(), entity.kind()) {
            (Some(object), _, _) => node.set_attr("entity_ref", object.xml_id()),
            (None, Some(name), RefKind::ByXmlId) => node.set_attr("entity_ref", name),
            (None, Some(name), RefKind::ByName) => node.set_attr("entity_name", name),
            (None, None, _) => {}
        }
        node.set_attr("alias", self.alias());
        node
    }

    pub(crate) fn load_from_xml(query: &Arc<Query>, node: &XmlNode) -> Result<Arc<QueryTarget>> {
        let id = node
            .attr("id")
            .ok_or(XqlError::MissingAttributes { tag: TARGET_TAG })?;
        let serial = id
            .split_once(":T")
            .and_then(|(_, digits)| digits.parse::<u32>().ok())
            .ok_or_else(|| XqlError::MalformedId { id: id.to_owned() })?;

        let mut entity = ObjectRef::with_weak_dict(query.weak_dict());
        match (node.attr("entity_ref"), node.attr("entity_name")) {
            (Some(xml_id), _) => {
                let ty = if xml_id.starts_with("QU") {
                    ObjectType::Query
                } else {
                    ObjectType::Table
                };
                entity.set_ref_name(ty, RefKind::ByXmlId, xml_id);
            }
            (None, Some(name)) => entity.set_ref_name(ObjectType::Table, RefKind::ByName, name),
            (None, None) => return Err(XqlError::MissingAttributes { tag: TARGET_TAG }),
        }
        Ok(query.push_target(Some(serial), entity, node.attr("alias")))
    }

    pub(crate) fn renumber_refs(&self, old_prefix: &str, new_prefix: &str) {
        self.entity.lock().renumber(old_prefix, new_prefix);
    }

    fn identifier(&self, name: &str) -> String {
        let server = self
            .query()
            .and_then(|q| q.dict())
            .and_then(|d| d.server_info())
            .unwrap_or_default();
        if server.quote_non_lc_identifiers && needs_quotes(name) {
            quote_identifier(name)
        } else {
            name.to_owned()
        }
    }
}

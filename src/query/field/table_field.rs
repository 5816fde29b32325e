use std::sync::{Arc, Weak};

use tracing::warn;

use super::{load_ref, save_ref, LoadEnv, QueryField};
use crate::dict::{Dict, ServerInfo};
use crate::object_ref::{DictObject, ObjectRef, ObjectType, RefHelper, RefKind};
use crate::render::{needs_quotes, quote_identifier, RenderOptions};
use crate::types::{Result, XqlError};
use crate::xml::XmlNode;

pub(super) const TAG: &str = "gda_query_ffield";

/// `target.column`: one column of the entity a target represents.
///
/// The column must belong to that entity; activation fails otherwise.
#[derive(Clone, Debug)]
pub struct QueryFieldField {
    target: ObjectRef,
    field: ObjectRef,
    value_provider: Option<ObjectRef>,
    plugin: Option<String>,
}

impl QueryFieldField {
    pub(super) fn with_refs(target: ObjectRef, field: ObjectRef) -> Self {
        Self {
            target,
            field,
            value_provider: None,
            plugin: None,
        }
    }

    /// Reference to the owning target.
    pub fn target_ref(&self) -> &ObjectRef {
        &self.target
    }

    /// Reference to the column.
    pub fn field_ref(&self) -> &ObjectRef {
        &self.field
    }

    /// Reference to the field that provides values, if any.
    pub fn value_provider_ref(&self) -> Option<&ObjectRef> {
        self.value_provider.as_ref()
    }

    /// Name of the plugin used to display values, if any.
    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    /// Sets or clears the display plugin.
    pub fn set_plugin(&mut self, plugin: Option<&str>) {
        self.plugin = plugin.map(str::to_owned);
    }

    pub(super) fn set_value_provider(&mut self, dict: Weak<Dict>, provider: Option<&Arc<QueryField>>) {
        self.value_provider = provider.map(|field| {
            let mut r = ObjectRef::with_weak_dict(dict);
            r.set_ref_object(DictObject::QueryField(Arc::clone(field)));
            r
        });
    }

    pub(super) fn refs(&self) -> Vec<&ObjectRef> {
        let mut refs = vec![&self.target, &self.field];
        refs.extend(self.value_provider.as_ref());
        refs
    }

    pub(super) fn refs_mut(&mut self) -> Vec<&mut ObjectRef> {
        let mut refs = vec![&mut self.target, &mut self.field];
        refs.extend(self.value_provider.as_mut());
        refs
    }

    pub(super) fn target_ref_mut(&mut self) -> &mut ObjectRef {
        &mut self.target
    }

    pub(super) fn activate(&mut self) -> bool {
        if !self.target.activate() {
            return false;
        }
        let Some(target) = self.target.ref_object().and_then(|o| o.as_target()).cloned() else {
            return false;
        };
        self.field
            .set_helper(Some(RefHelper::Target(Arc::downgrade(&target))));
        if !self.field.activate() {
            return false;
        }

        let owner = self.field.ref_object().and_then(DictObject::owning_entity);
        let coherent = match (owner, target.represented_entity()) {
            (Some(owner), Some(entity)) => owner.ptr_eq(&entity),
            _ => false,
        };
        if !coherent {
            warn!(
                target = %target.xml_id(),
                field = self.field.name().unwrap_or_default(),
                "field does not belong to the target's entity"
            );
            self.field.deactivate();
            return false;
        }

        match &mut self.value_provider {
            Some(provider) => provider.activate(),
            None => true,
        }
    }

    fn target_alias(&self) -> Option<String> {
        match self.target.ref_object().and_then(|o| o.as_target()) {
            Some(target) => Some(target.alias()),
            None => self.target.name().map(str::to_owned),
        }
    }

    fn column_name(&self) -> Option<String> {
        match self.field.ref_object() {
            Some(object) => Some(object.name()),
            None => self
                .field
                .ref_object_name()
                .or(self.field.name())
                .map(str::to_owned),
        }
    }

    pub(super) fn render_as_sql(&self, options: RenderOptions, server: Option<ServerInfo>) -> Result<String> {
        let name = self
            .column_name()
            .ok_or_else(|| XqlError::unresolved("field", None))?;
        let quote = server.map_or(true, |s| s.quote_non_lc_identifiers);
        let name = if quote && needs_quotes(&name) {
            quote_identifier(&name)
        } else {
            name
        };
        let prefixed = server.map_or(true, |s| s.supports_prefixed_fields)
            && !options.contains(RenderOptions::NO_TARGET_ALIAS);
        match self.target_alias() {
            Some(alias) if prefixed => Ok(format!("{alias}.{name}")),
            _ => Ok(name),
        }
    }

    pub(super) fn render_as_str(&self) -> String {
        let target = self.target.ref_object().and_then(|o| o.as_target());
        match (target, self.field.ref_object()) {
            (Some(target), Some(field)) => format!(
                "{}({}).{}",
                target.entity_name().unwrap_or_default(),
                target.alias(),
                field.name()
            ),
            _ => format!(
                "{}.{}",
                self.target_alias().as_deref().unwrap_or("?"),
                self.field.name().unwrap_or("?")
            ),
        }
    }

    pub(super) fn save(&self, node: &mut XmlNode) {
        save_ref(node, &self.target, "target", "target_name");
        save_ref(node, &self.field, "object", "object_name");
        if let Some(provider) = &self.value_provider {
            save_ref(node, provider, "value_prov", "value_prov");
        }
        if let Some(plugin) = &self.plugin {
            node.set_attr("plugin", plugin.as_str());
        }
    }

    pub(super) fn load(env: &LoadEnv, node: &XmlNode) -> Result<Self> {
        let mut target = env.query_scoped_ref();
        let mut field = env.new_ref();
        if !load_ref(&mut target, node, ObjectType::Target, "target", "target_name")
            || !load_ref(&mut field, node, ObjectType::EntityField, "object", "object_name")
        {
            return Err(XqlError::MissingAttributes { tag: TAG });
        }
        let value_provider = node.attr("value_prov").map(|id| {
            let mut r = env.new_ref();
            r.set_ref_name(ObjectType::QueryField, RefKind::ByXmlId, id);
            r
        });
        Ok(Self {
            target,
            field,
            value_provider,
            plugin: node.attr("plugin").map(str::to_owned),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::dict::{Dict, ServerInfo};
    use crate::object_ref::DictObject;
    use crate::query::{EntityField, FieldKind, Query, QueryField, Referer, Renderer, XmlStorage};
    use crate::render::RenderOptions;
    use crate::xml::XmlNode;

    #[test]
    fn renders_prefixed_and_quoted_names() {
        let dict = Dict::new();
        let items = dict.add_table("items");
        items.add_field("Qty", "int");
        items.add_field("name", "varchar");
        let query = Query::new(&dict);
        let target = query.add_target(DictObject::Table(items), Some("i"));
        let qty = QueryField::new_field_by_name(&query, &target, "Qty");
        let name = QueryField::new_field_by_name(&query, &target, "name");
        assert!(qty.activate());
        assert!(name.activate());

        assert_eq!(qty.render_as_sql(None, RenderOptions::empty()).unwrap(), "i.\"Qty\"");
        assert_eq!(
            name.render_as_sql(None, RenderOptions::NO_TARGET_ALIAS).unwrap(),
            "name"
        );
        assert_eq!(qty.render_as_str(), "items(i).Qty");
        assert_eq!(qty.dict_type().as_deref(), Some("int"));

        dict.set_server_info(Some(ServerInfo {
            supports_prefixed_fields: false,
            quote_non_lc_identifiers: false,
        }));
        assert_eq!(qty.render_as_sql(None, RenderOptions::empty()).unwrap(), "Qty");
    }

    #[test]
    fn column_of_another_table_is_rejected() {
        let dict = Dict::new();
        let items = dict.add_table("items");
        let orders = dict.add_table("orders");
        let total = orders.add_field("total", "numeric");
        let query = Query::new(&dict);
        let target = query.add_target(DictObject::Table(items), Some("i"));
        let field = QueryField::new_field(&query, &target, DictObject::TableField(total));
        assert!(!field.activate());
        assert!(!field.is_active());
        match &*field.kind() {
            FieldKind::Field(kind) => {
                assert!(kind.target_ref().is_active());
                assert!(!kind.field_ref().is_active());
            }
            other => panic!("unexpected field kind {other:?}"),
        };
    }

    #[test]
    fn unresolved_column_keeps_its_name_binding() {
        let dict = Dict::new();
        let items = dict.add_table("items");
        let query = Query::new(&dict);
        let target = query.add_target(DictObject::Table(items.clone()), Some("i"));
        let node = XmlNode::new(super::TAG)
            .with_attr("id", "QU1:QF1")
            .with_attr("name", "price")
            .with_attr("target", target.xml_id())
            .with_attr("object_name", "price");
        let field = QueryField::from_xml(&query, &node).unwrap();
        assert!(!field.activate());
        assert_eq!(field.save_to_xml().unwrap(), node);

        items.add_field("price", "numeric");
        assert!(field.activate());
        assert_eq!(field.render_as_sql(None, RenderOptions::empty()).unwrap(), "i.price");
        assert_eq!(field.save_to_xml().unwrap().attr("object"), Some("TV1:FI1"));
    }
}

use std::sync::Weak;

use tracing::warn;

use super::{load_ref, save_ref, LoadEnv, Renderer};
use crate::object_ref::{DictObject, ObjectRef, ObjectType, RefHelper};
use crate::query::Query;
use crate::render::{RenderContext, RenderOptions};
use crate::types::{Result, XqlError};
use crate::xml::XmlNode;

pub(super) const TAG: &str = "gda_query_ffunc";
const ARG_TAG: &str = "gda_query_field_ref";

/// `function(arg, ...)` where every argument is another field of the query.
#[derive(Clone, Debug)]
pub struct QueryFieldFunc {
    func: ObjectRef,
    args: Vec<ObjectRef>,
}

impl QueryFieldFunc {
    pub(super) fn with_refs(func: ObjectRef, args: Vec<ObjectRef>) -> Self {
        Self { func, args }
    }

    /// Reference to the dictionary function.
    pub fn func_ref(&self) -> &ObjectRef {
        &self.func
    }

    /// Argument references, in call order.
    pub fn arg_refs(&self) -> &[ObjectRef] {
        &self.args
    }

    pub(super) fn refs(&self) -> Vec<&ObjectRef> {
        std::iter::once(&self.func).chain(&self.args).collect()
    }

    pub(super) fn refs_mut(&mut self) -> Vec<&mut ObjectRef> {
        std::iter::once(&mut self.func)
            .chain(self.args.iter_mut())
            .collect()
    }

    pub(super) fn rebind_helpers(&mut self, query: &Weak<Query>) {
        for arg in &mut self.args {
            arg.set_helper(Some(RefHelper::Query(query.clone())));
        }
    }

    /// Every reference is attempted even after a failure.
    pub(super) fn activate(&mut self) -> bool {
        let mut active = self.func.activate() && self.arity_matches();
        for arg in &mut self.args {
            let ok = arg.activate();
            active = active && ok;
        }
        active
    }

    /// Compares the resolved function's arity with the argument count. An
    /// unresolved function has nothing to compare against.
    fn arity_matches(&mut self) -> bool {
        let Some(function) = self.func.ref_object().and_then(DictObject::as_function) else {
            return true;
        };
        if function.arg_types().len() == self.args.len() {
            return true;
        }
        warn!(
            function = function.name(),
            expected = function.arg_types().len(),
            found = self.args.len(),
            "argument count mismatch"
        );
        self.func.deactivate();
        false
    }

    fn function_name(&self) -> Option<String> {
        match self.func.ref_object() {
            Some(function) => Some(function.name()),
            None => self.func.name().map(str::to_owned),
        }
    }

    pub(super) fn render_as_sql(
        &self,
        ctx: Option<&mut RenderContext>,
        options: RenderOptions,
    ) -> Result<String> {
        let name = self
            .function_name()
            .ok_or_else(|| XqlError::unresolved("function", None))?;
        let mut ctx = ctx;
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            let field = arg
                .ref_object()
                .and_then(DictObject::as_query_field)
                .ok_or_else(|| XqlError::unresolved("field", arg.name()))?;
            args.push(field.render_as_sql(ctx.as_deref_mut(), options)?);
        }
        Ok(format!("{name} ({})", args.join(", ")))
    }

    pub(super) fn render_as_str(&self) -> String {
        let Some(name) = self.function_name() else {
            return "Non-activated function".to_owned();
        };
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| match arg.ref_object().and_then(DictObject::as_query_field) {
                Some(field) => field.render_as_str(),
                None => arg.name().unwrap_or("?").to_owned(),
            })
            .collect();
        format!("{name} ({})", args.join(", "))
    }

    pub(super) fn save(&self, node: &mut XmlNode) {
        save_ref(node, &self.func, "func", "func_name");
        for arg in &self.args {
            let mut child = XmlNode::new(ARG_TAG);
            save_ref(&mut child, arg, "object", "object_name");
            node.push_child(child);
        }
    }

    pub(super) fn load(env: &LoadEnv, node: &XmlNode) -> Result<Self> {
        let mut func = env.new_ref();
        if !load_ref(&mut func, node, ObjectType::Function, "func", "func_name") {
            return Err(XqlError::MissingAttributes { tag: TAG });
        }
        let mut args = Vec::new();
        for child in node.children() {
            if child.name() != ARG_TAG {
                return Err(XqlError::WrongTag {
                    expected: ARG_TAG,
                    found: child.name().to_owned(),
                });
            }
            let mut arg = env.query_scoped_ref();
            if !load_ref(&mut arg, child, ObjectType::QueryField, "object", "object_name") {
                return Err(XqlError::MissingAttributes { tag: ARG_TAG });
            }
            args.push(arg);
        }

        func.activate();
        if let Some(function) = func.ref_object().and_then(DictObject::as_function) {
            if function.arg_types().len() != args.len() {
                return Err(XqlError::WrongArgCount {
                    function: function.name().to_owned(),
                    expected: function.arg_types().len(),
                    found: args.len(),
                });
            }
        }
        Ok(Self { func, args })
    }
}

#[cfg(test)]
mod tests {
    use crate::dict::Dict;
    use crate::object_ref::DictObject;
    use crate::query::{EntityField, Query, QueryField, Referer, Renderer, XmlStorage};
    use crate::render::RenderOptions;
    use crate::types::XqlError;
    use crate::xml::XmlNode;

    #[test]
    fn renders_name_space_and_arguments() {
        let dict = Dict::new();
        let lower = dict.add_function("lower", &["varchar"], "varchar");
        let items = dict.add_table("items");
        items.add_field("name", "varchar");
        let query = Query::new(&dict);
        let target = query.add_target(DictObject::Table(items), Some("i"));
        let name = QueryField::new_field_by_name(&query, &target, "name");
        assert!(name.activate());
        let func = QueryField::new_func(&query, &lower, &[name.clone()]).unwrap();
        assert!(func.activate());
        assert_eq!(
            func.render_as_sql(None, RenderOptions::empty()).unwrap(),
            "lower (i.name)"
        );
        assert_eq!(func.render_as_str(), "lower (items(i).name)");
        assert_eq!(func.dict_type().as_deref(), Some("varchar"));
    }

    #[test]
    fn arity_is_checked_on_creation_and_load() {
        let dict = Dict::new();
        let lower = dict.add_function("lower", &["varchar"], "varchar");
        let query = Query::new(&dict);
        let err = QueryField::new_func(&query, &lower, &[]).unwrap_err();
        assert!(matches!(err, XqlError::WrongArgCount { expected: 1, found: 0, .. }));

        let node = XmlNode::new(super::TAG)
            .with_attr("id", "QU1:QF3")
            .with_attr("func", "PR1");
        let err = QueryField::from_xml(&query, &node).unwrap_err();
        assert!(matches!(err, XqlError::WrongArgCount { .. }));
        assert!(query.fields().is_empty());
    }

    #[test]
    fn all_arguments_are_attempted() {
        let dict = Dict::new();
        let query = Query::new(&dict);
        let value = QueryField::new_value(&query, "int");
        value.set_name(Some("n"));
        let mut node = XmlNode::new(super::TAG)
            .with_attr("id", "QU1:QF2")
            .with_attr("func_name", "abs");
        node.push_child(XmlNode::new(super::ARG_TAG).with_attr("object_name", "n"));
        let func = QueryField::from_xml(&query, &node).unwrap();

        assert!(!func.activate());
        let resolved = func.ref_objects();
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].ptr_eq(&DictObject::QueryField(value)));
        assert_eq!(func.save_to_xml().unwrap().attr("func_name"), Some("abs"));

        dict.add_function("abs", &["int"], "int");
        assert!(func.activate());
        assert_eq!(func.save_to_xml().unwrap().attr("func"), Some("PR1"));
    }
}

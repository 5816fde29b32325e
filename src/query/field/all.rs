use super::{load_ref, save_ref, LoadEnv};
use crate::object_ref::{ObjectRef, ObjectType};
use crate::types::{Result, XqlError};
use crate::xml::XmlNode;

pub(super) const TAG: &str = "gda_query_fall";

/// `target.*`: every column of one target.
#[derive(Clone, Debug)]
pub struct QueryFieldAll {
    target: ObjectRef,
}

impl QueryFieldAll {
    pub(super) fn with_target(target: ObjectRef) -> Self {
        Self { target }
    }

    /// Reference to the target whose columns are selected.
    pub fn target_ref(&self) -> &ObjectRef {
        &self.target
    }

    pub(super) fn target_ref_mut(&mut self) -> &mut ObjectRef {
        &mut self.target
    }

    pub(super) fn activate(&mut self) -> bool {
        self.target.activate()
    }

    pub(super) fn render_as_sql(&self) -> Result<String> {
        match self.target.ref_object().and_then(|o| o.as_target()) {
            Some(target) => Ok(format!("{}.*", target.alias())),
            None => Err(XqlError::unresolved("target", self.target.name())),
        }
    }

    pub(super) fn render_as_str(&self) -> String {
        match self.target.ref_object().and_then(|o| o.as_target()) {
            Some(target) => format!(
                "{}({}).*",
                target.entity_name().unwrap_or_default(),
                target.alias()
            ),
            None => match self.target.name() {
                Some(name) => format!("{name}.*"),
                None => "Non-activated field".to_owned(),
            },
        }
    }

    pub(super) fn save(&self, node: &mut XmlNode) {
        save_ref(node, &self.target, "target", "target_name");
    }

    pub(super) fn load(env: &LoadEnv, node: &XmlNode) -> Result<Self> {
        let mut target = env.query_scoped_ref();
        if !load_ref(&mut target, node, ObjectType::Target, "target", "target_name") {
            return Err(XqlError::MissingAttributes { tag: TAG });
        }
        Ok(Self { target })
    }
}

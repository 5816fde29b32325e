use crate::render::{RenderContext, RenderOptions};
use crate::types::{Result, Value, XqlError};
use crate::xml::XmlNode;

pub(super) const TAG: &str = "gda_query_fval";

/// Text rendered for a parameter whose value is not known yet.
const UNBOUND: &str = "##";

/// A constant, or a parameter when flagged as such.
///
/// Parameters are looked up by field name in the [`RenderContext`].
#[derive(Clone, Debug, PartialEq)]
pub struct QueryFieldValue {
    sql_type: String,
    value: Option<Value>,
    default: Option<Value>,
    is_param: bool,
    null_ok: bool,
}

impl QueryFieldValue {
    pub(super) fn new(sql_type: &str) -> Self {
        Self {
            sql_type: sql_type.to_owned(),
            value: None,
            default: None,
            is_param: false,
            null_ok: false,
        }
    }

    /// SQL type name of the value.
    pub fn sql_type(&self) -> &str {
        &self.sql_type
    }

    /// Current value.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Replaces the current value.
    pub fn set_value(&mut self, value: Option<Value>) {
        self.value = value;
    }

    /// Value used when no other is given.
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Replaces the default value.
    pub fn set_default_value(&mut self, value: Option<Value>) {
        self.default = value;
    }

    /// Returns `true` for parameters.
    pub fn is_parameter(&self) -> bool {
        self.is_param
    }

    /// Marks the value as a parameter.
    pub fn set_parameter(&mut self, is_param: bool) {
        self.is_param = is_param;
    }

    /// Returns `true` when NULL is accepted.
    pub fn null_allowed(&self) -> bool {
        self.null_ok
    }

    /// Allows or refuses NULL.
    pub fn set_null_allowed(&mut self, null_ok: bool) {
        self.null_ok = null_ok;
    }

    pub(super) fn render_as_sql(
        &self,
        name: Option<&str>,
        ctx: Option<&mut RenderContext>,
        options: RenderOptions,
    ) -> Result<String> {
        if !self.is_param {
            return Ok(self.value.as_ref().map_or_else(|| "NULL".to_owned(), Value::to_sql));
        }

        if let (Some(style), Some(name)) = (options.placeholder_style(), name) {
            return Ok(match ctx {
                Some(ctx) => ctx.placeholder(name, style),
                None => RenderContext::new().placeholder(name, style),
            });
        }

        let found = match (&ctx, name) {
            (Some(ctx), Some(name)) => ctx.value(name),
            _ => None,
        };
        match found {
            Some(value) => Ok(value.to_sql()),
            None if self.null_ok || ctx.is_none() => Ok(UNBOUND.to_owned()),
            None => Err(XqlError::NoValue {
                name: name.unwrap_or_default().to_owned(),
            }),
        }
    }

    pub(super) fn render_as_str(&self) -> String {
        if self.is_param {
            return UNBOUND.to_owned();
        }
        self.value
            .as_ref()
            .map_or_else(|| "NULL".to_owned(), Value::to_sql)
    }

    pub(super) fn save(&self, node: &mut XmlNode) {
        node.set_attr("type", self.sql_type.as_str());
        if let Some(text) = self.value.as_ref().and_then(Value::to_text) {
            node.set_attr("value", text);
        }
        if let Some(text) = self.default.as_ref().and_then(Value::to_text) {
            node.set_attr("default", text);
        }
        if self.is_param {
            node.set_attr("is_param", "t");
        }
        if self.null_ok {
            node.set_attr("nullok", "t");
        }
    }

    pub(super) fn load(node: &XmlNode) -> Result<Self> {
        let sql_type = node
            .attr("type")
            .ok_or(XqlError::MissingAttributes { tag: TAG })?;
        Ok(Self {
            sql_type: sql_type.to_owned(),
            value: node.attr("value").map(|text| Value::from_text(sql_type, text)),
            default: node.attr("default").map(|text| Value::from_text(sql_type, text)),
            is_param: node.attr("is_param") == Some("t"),
            null_ok: node.attr("nullok") == Some("t"),
        })
    }
}

//! Shared SQL rendering options and parameter bookkeeping.

use std::collections::HashMap;

use bitflags::bitflags;
use serde::Serialize;

use crate::types::Value;

bitflags! {
    /// Flags controlling SQL text generation.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct RenderOptions: u32 {
        /// Do not prefix fields with their target alias.
        const NO_TARGET_ALIAS = 1 << 0;
        /// Break statements into one clause per line.
        const PRETTY = 1 << 1;
        /// Render parameters as `:name`.
        const PARAMS_AS_COLON = 1 << 2;
        /// Render parameters as `$n`.
        const PARAMS_AS_DOLLAR = 1 << 3;
        /// Render parameters as `?n`.
        const PARAMS_AS_QMARK = 1 << 4;
    }
}

/// Placeholder syntax selected by [`RenderOptions`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlaceholderStyle {
    /// `:name`
    Colon,
    /// `$1`, `$2`, ...
    Dollar,
    /// `?1`, `?2`, ...
    QMark,
}

impl RenderOptions {
    /// Placeholder style, if parameters should not be inlined.
    ///
    /// Colon wins over dollar, which wins over question mark.
    pub fn placeholder_style(self) -> Option<PlaceholderStyle> {
        if self.contains(RenderOptions::PARAMS_AS_COLON) {
            Some(PlaceholderStyle::Colon)
        } else if self.contains(RenderOptions::PARAMS_AS_DOLLAR) {
            Some(PlaceholderStyle::Dollar)
        } else if self.contains(RenderOptions::PARAMS_AS_QMARK) {
            Some(PlaceholderStyle::QMark)
        } else {
            None
        }
    }

    /// Options for a placeholder style name as used in config and the CLI.
    pub fn from_placeholder_name(name: &str) -> Option<Self> {
        match name {
            "colon" => Some(RenderOptions::PARAMS_AS_COLON),
            "dollar" => Some(RenderOptions::PARAMS_AS_DOLLAR),
            "qmark" => Some(RenderOptions::PARAMS_AS_QMARK),
            "inline" | "none" => Some(RenderOptions::empty()),
            _ => None,
        }
    }
}

/// Parameter values available while rendering, plus the parameters a
/// rendering actually used (in first-use order).
#[derive(Clone, Debug, Default)]
pub struct RenderContext {
    values: HashMap<String, Value>,
    used: Vec<String>,
}

impl RenderContext {
    /// Creates a context without values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style value binding.
    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_value(name, value);
        self
    }

    /// Binds a parameter value.
    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Value bound to a parameter.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Placeholder text for `name`, recording it as used.
    ///
    /// Positional styles number distinct parameters from 1, so a parameter
    /// used twice gets the same position.
    pub fn placeholder(&mut self, name: &str, style: PlaceholderStyle) -> String {
        let position = match self.used.iter().position(|used| used == name) {
            Some(index) => index + 1,
            None => {
                self.used.push(name.to_owned());
                self.used.len()
            }
        };
        match style {
            PlaceholderStyle::Colon => format!(":{name}"),
            PlaceholderStyle::Dollar => format!("${position}"),
            PlaceholderStyle::QMark => format!("?{position}"),
        }
    }

    /// Parameters referenced by placeholders so far.
    pub fn used_params(&self) -> &[String] {
        &self.used
    }

    pub(crate) fn into_used(self) -> Vec<String> {
        self.used
    }
}

/// Rendered SQL text and the ordered placeholder names it refers to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Statement {
    /// SQL text.
    pub sql: String,
    /// Parameter names in placeholder order.
    pub params: Vec<String>,
}

/// Whether an identifier must be double-quoted to keep its spelling.
///
/// Names that are not entirely lower case, or that start with a digit, are
/// folded or rejected by most servers when left bare.
pub fn needs_quotes(name: &str) -> bool {
    name.to_lowercase() != name || name.starts_with(|c: char| c.is_ascii_digit())
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

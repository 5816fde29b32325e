#![forbid(unsafe_code)]

//! Shared error, identifier, and scalar value types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by loading, rendering, and building query objects.
///
/// Structural rejections and reference misses are also logged; everything the
/// caller must act on is returned through this type.
#[derive(Debug, Error)]
pub enum XqlError {
    /// The XML text could not be parsed.
    #[error("XML parse error: {0}")]
    XmlParse(String),
    /// The XML element handed to a loader carries the wrong tag.
    #[error("XML Tag is not <{expected}> (got <{found}>)")]
    WrongTag {
        /// Tag the loader handles.
        expected: &'static str,
        /// Tag found in the document.
        found: String,
    },
    /// An `id` attribute does not follow the `QUxxx:QFyyy` layout.
    #[error("XML ID '{id}' for a query field should be QUxxx:QFyyy where xxx and yyy are numbers")]
    MalformedId {
        /// Offending identifier.
        id: String,
    },
    /// A required reference attribute is absent.
    #[error("Missing required attributes for <{tag}>")]
    MissingAttributes {
        /// Element tag being loaded.
        tag: &'static str,
    },
    /// A function call does not match the arity of the dictionary function.
    #[error("Wrong number of arguments for function {function} (expected {expected}, got {found})")]
    WrongArgCount {
        /// Function name.
        function: String,
        /// Arity declared in the dictionary.
        expected: usize,
        /// Arity found in the document.
        found: usize,
    },
    /// A reference could not be resolved while rendering.
    #[error("Can't find {kind} '{name}'")]
    UnresolvedReference {
        /// Kind of object that was looked up.
        kind: &'static str,
        /// Symbolic name of the reference.
        name: String,
    },
    /// Generic rendering failure.
    #[error("render error: {0}")]
    Render(String),
    /// A parameter has no value and no fallback is allowed.
    #[error("No specified value for parameter '{name}'")]
    NoValue {
        /// Parameter name.
        name: String,
    },
    /// A child was not accepted by its intended parent.
    #[error("<{parent}> does not accept a <{child}> child")]
    Rejected {
        /// Parent tag.
        parent: String,
        /// Child tag.
        child: String,
    },
    /// An I/O error while reading or writing documents.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl XqlError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            XqlError::XmlParse(_) => "XmlParse",
            XqlError::WrongTag { .. } => "XmlLoad",
            XqlError::MalformedId { .. } => "XmlLoad",
            XqlError::MissingAttributes { .. } => "XmlLoad",
            XqlError::WrongArgCount { .. } => "XmlLoad",
            XqlError::UnresolvedReference { .. } => "Render",
            XqlError::Render(_) => "Render",
            XqlError::NoValue { .. } => "Render",
            XqlError::Rejected { .. } => "Rejected",
            XqlError::Io(_) => "Io",
        }
    }

    pub(crate) fn unresolved(kind: &'static str, name: Option<&str>) -> Self {
        XqlError::UnresolvedReference {
            kind,
            name: name.unwrap_or_default().to_owned(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, XqlError>;

/// XML identifier of a query field, `QU<query>:QF<field>`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct FieldXmlId {
    /// Serial of the owning query.
    pub query: u32,
    /// Serial of the field within the query.
    pub field: u32,
}

impl FieldXmlId {
    /// Parses an identifier of the form `QUxxx:QFyyy`.
    ///
    /// Anything that does not split into exactly two colon-separated parts,
    /// each with its two-letter prefix and a numeric suffix, is rejected.
    pub fn parse(id: &str) -> Result<Self> {
        let malformed = || XqlError::MalformedId { id: id.to_owned() };
        let mut parts = id.split(':');
        let (Some(query), Some(field), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };
        let query = numeric_suffix(query, "QU").ok_or_else(malformed)?;
        let field = numeric_suffix(field, "QF").ok_or_else(malformed)?;
        Ok(Self { query, field })
    }
}

fn numeric_suffix(part: &str, prefix: &str) -> Option<u32> {
    let digits = part.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl fmt::Display for FieldXmlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QU{}:QF{}", self.query, self.field)
    }
}

/// Scalar value carried by constants and parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
}

impl Value {
    /// Renders the value as a SQL literal.
    pub fn to_sql(&self) -> String {
        match self {
            Value::Null => "NULL".to_owned(),
            Value::Bool(true) => "TRUE".to_owned(),
            Value::Bool(false) => "FALSE".to_owned(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::String(s) => quote_literal(s),
        }
    }

    /// Plain textual form, as stored in XML attributes.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(if *b { "t" } else { "f" }.to_owned()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::String(s) => Some(s.clone()),
        }
    }

    /// Parses the textual form of a value for the given SQL type name.
    ///
    /// Unknown type names keep the text as a string.
    pub fn from_text(sql_type: &str, text: &str) -> Value {
        match sql_type.to_ascii_lowercase().as_str() {
            "int" | "integer" | "int4" | "int8" | "bigint" | "smallint" => text
                .parse()
                .map(Value::Int)
                .unwrap_or_else(|_| Value::String(text.to_owned())),
            "float" | "double" | "real" | "numeric" | "float8" => text
                .parse()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::String(text.to_owned())),
            "bool" | "boolean" => Value::Bool(matches!(text, "t" | "true" | "TRUE" | "1")),
            _ => Value::String(text.to_owned()),
        }
    }
}

/// Wraps a string in single quotes, doubling embedded quotes.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

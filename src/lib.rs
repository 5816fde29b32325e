//! XQL query objects: an XML-serializable query tree, dictionary-backed query
//! fields with lazily resolved references, and SQL rendering for both.
//!
//! Two layers live here:
//!
//! * [`xql`]: the structural query tree (`select`, `insert`, `update`,
//!   `delete` with their clauses) stored in a [`xql::Document`] arena.
//! * [`query`]: query objects built on a [`dict::Dict`] catalog, whose fields
//!   reference tables, columns, functions and other fields through
//!   [`object_ref::ObjectRef`] handles.

#![forbid(unsafe_code)]

pub mod dict;
pub mod object_ref;
pub mod provider;
pub mod query;
pub mod render;
pub mod types;
pub mod xml;
pub mod xql;

pub use dict::{Dict, ServerInfo};
pub use object_ref::{DictObject, ObjectRef, ObjectType, RefKind};
pub use query::{Query, QueryField, QueryTarget};
pub use render::{RenderContext, RenderOptions, Statement};
pub use types::{Result, Value, XqlError};
pub use xml::XmlNode;
pub use xql::{Document, DmlKind, NodeId};

#![forbid(unsafe_code)]

//! XQL: an XML-shaped intermediate representation of SQL statements.
//!
//! Items come in five shapes (atom, bin, list, dual, statement) and live in
//! a [`Document`] arena. Trees serialize to and from [`crate::xml::XmlNode`]
//! and render to SQL text.

pub mod dml;
pub mod item;
pub mod sql;

pub use dml::{DmlKind, DmlSlots, Slot};
pub use item::{shape_for_tag, Document, Item, NodeId, Shape};
pub use sql::render_statement;

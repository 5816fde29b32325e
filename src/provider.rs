//! Hand-off point between rendered statements and a database backend.
//!
//! Rendering produces a [`Statement`]: SQL text plus the ordered names of the
//! parameters its placeholders stand for. A backend implements [`Executor`]
//! and receives the statement together with the bound values.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::render::{RenderContext, Statement};
use crate::types::{Result, Value, XqlError};

/// What a backend reports after running a statement.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ExecOutcome {
    /// Result set of a `SELECT`.
    Rows {
        /// Column names in select-list order.
        columns: Vec<String>,
        /// One entry per row, aligned with `columns`.
        rows: Vec<Vec<Value>>,
    },
    /// Number of rows touched by `INSERT`, `UPDATE` or `DELETE`.
    Affected(u64),
}

impl ExecOutcome {
    /// Rows as column-name maps.
    pub fn records(&self) -> Vec<BTreeMap<String, Value>> {
        match self {
            ExecOutcome::Rows { columns, rows } => rows
                .iter()
                .map(|row| columns.iter().cloned().zip(row.iter().cloned()).collect())
                .collect(),
            ExecOutcome::Affected(_) => Vec::new(),
        }
    }
}

/// A backend able to run rendered statements.
pub trait Executor {
    /// Backend-specific failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs `statement` with `params` bound positionally, in the order of
    /// `statement.params`.
    fn execute(&mut self, statement: &Statement, params: &[Value]) -> std::result::Result<ExecOutcome, Self::Error>;
}

/// Values for the parameters of `statement`, taken from `ctx` in
/// placeholder order.
pub fn bind_params(statement: &Statement, ctx: &RenderContext) -> Result<Vec<Value>> {
    statement
        .params
        .iter()
        .map(|name| {
            ctx.value(name)
                .cloned()
                .ok_or_else(|| XqlError::NoValue { name: name.clone() })
        })
        .collect()
}

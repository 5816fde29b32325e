#![forbid(unsafe_code)]

//! In-memory dictionary of database objects that references resolve against.
//!
//! The dictionary is shared (`Arc<Dict>`) between every query and reference
//! built on it. Catalog state sits behind `parking_lot` locks so lookups may
//! run from any thread; names are mutable, XML ids are not.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::Query;

/// Identifier rules of the server the dictionary describes.
///
/// When no capabilities are set on a [`Dict`], renderers behave as if both
/// flags were `true`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    /// `target.field` notation is understood.
    pub supports_prefixed_fields: bool,
    /// Identifiers that are not lower case must be double-quoted.
    pub quote_non_lc_identifiers: bool,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            supports_prefixed_fields: true,
            quote_non_lc_identifiers: true,
        }
    }
}

/// A table known to the dictionary (`TV<n>`).
#[derive(Debug)]
pub struct DictTable {
    serial: u32,
    name: RwLock<String>,
    fields: RwLock<Vec<Arc<DictField>>>,
}

impl DictTable {
    /// XML id, `TV<n>`.
    pub fn xml_id(&self) -> String {
        format!("TV{}", self.serial)
    }

    /// Current table name.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Renames the table; by-name references bound to the old name no
    /// longer resolve on their next activation.
    pub fn set_name(&self, name: &str) {
        *self.name.write() = name.to_owned();
    }

    /// Adds a column and returns it.
    pub fn add_field(self: &Arc<Self>, name: &str, sql_type: &str) -> Arc<DictField> {
        let mut fields = self.fields.write();
        let field = Arc::new(DictField {
            serial: fields.len() as u32 + 1,
            name: RwLock::new(name.to_owned()),
            sql_type: sql_type.to_owned(),
            table: Arc::downgrade(self),
        });
        fields.push(Arc::clone(&field));
        field
    }

    /// Columns in creation order.
    pub fn fields(&self) -> Vec<Arc<DictField>> {
        self.fields.read().clone()
    }

    /// Column by name.
    pub fn field_by_name(&self, name: &str) -> Option<Arc<DictField>> {
        self.fields
            .read()
            .iter()
            .find(|field| *field.name.read() == name)
            .cloned()
    }

    /// Column by XML id (`TV<n>:FI<m>`).
    pub fn field_by_xml_id(&self, xml_id: &str) -> Option<Arc<DictField>> {
        self.fields
            .read()
            .iter()
            .find(|field| field.xml_id() == xml_id)
            .cloned()
    }
}

/// A table column (`TV<n>:FI<m>`).
#[derive(Debug)]
pub struct DictField {
    serial: u32,
    name: RwLock<String>,
    sql_type: String,
    table: Weak<DictTable>,
}

impl DictField {
    /// XML id, `TV<n>:FI<m>`.
    pub fn xml_id(&self) -> String {
        match self.table.upgrade() {
            Some(table) => format!("{}:FI{}", table.xml_id(), self.serial),
            None => format!("FI{}", self.serial),
        }
    }

    /// Column name.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Renames the column.
    pub fn set_name(&self, name: &str) {
        *self.name.write() = name.to_owned();
    }

    /// SQL type name of the column.
    pub fn sql_type(&self) -> &str {
        &self.sql_type
    }

    /// Owning table, if it is still alive.
    pub fn table(&self) -> Option<Arc<DictTable>> {
        self.table.upgrade()
    }
}

/// A server function (`PR<n>`).
#[derive(Debug)]
pub struct DictFunction {
    serial: u32,
    name: String,
    arg_types: Vec<String>,
    ret_type: String,
}

impl DictFunction {
    /// XML id, `PR<n>`.
    pub fn xml_id(&self) -> String {
        format!("PR{}", self.serial)
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Argument type names; the length is the function's arity.
    pub fn arg_types(&self) -> &[String] {
        &self.arg_types
    }

    /// Return type name.
    pub fn ret_type(&self) -> &str {
        &self.ret_type
    }
}

/// A server aggregate (`AG<n>`).
#[derive(Debug)]
pub struct DictAggregate {
    serial: u32,
    name: String,
    arg_type: String,
    ret_type: String,
}

impl DictAggregate {
    /// XML id, `AG<n>`.
    pub fn xml_id(&self) -> String {
        format!("AG{}", self.serial)
    }

    /// Aggregate name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Argument type name.
    pub fn arg_type(&self) -> &str {
        &self.arg_type
    }

    /// Return type name.
    pub fn ret_type(&self) -> &str {
        &self.ret_type
    }
}

#[derive(Default)]
struct Catalog {
    tables: Vec<Arc<DictTable>>,
    functions: Vec<Arc<DictFunction>>,
    aggregates: Vec<Arc<DictAggregate>>,
    queries: Vec<(u32, Weak<Query>)>,
    next_table: u32,
    next_function: u32,
    next_aggregate: u32,
    next_query: u32,
}

/// Catalog of tables, functions, aggregates, and live queries.
#[derive(Default)]
pub struct Dict {
    catalog: RwLock<Catalog>,
    server: RwLock<Option<ServerInfo>>,
}

impl std::fmt::Debug for Dict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let catalog = self.catalog.read();
        f.debug_struct("Dict")
            .field("tables", &catalog.tables.len())
            .field("functions", &catalog.functions.len())
            .field("aggregates", &catalog.aggregates.len())
            .field("queries", &catalog.queries.len())
            .finish()
    }
}

impl Dict {
    /// Creates an empty shared dictionary.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Server capabilities, if a connection described them.
    pub fn server_info(&self) -> Option<ServerInfo> {
        *self.server.read()
    }

    /// Sets or clears the server capabilities.
    pub fn set_server_info(&self, info: Option<ServerInfo>) {
        *self.server.write() = info;
    }

    /// Registers a table.
    pub fn add_table(&self, name: &str) -> Arc<DictTable> {
        let mut catalog = self.catalog.write();
        catalog.next_table += 1;
        let table = Arc::new(DictTable {
            serial: catalog.next_table,
            name: RwLock::new(name.to_owned()),
            fields: RwLock::new(Vec::new()),
        });
        catalog.tables.push(Arc::clone(&table));
        debug!(table = name, id = %table.xml_id(), "table registered");
        table
    }

    /// Unregisters a table. Returns `false` when it was not registered.
    pub fn remove_table(&self, table: &Arc<DictTable>) -> bool {
        let mut catalog = self.catalog.write();
        let before = catalog.tables.len();
        catalog.tables.retain(|t| !Arc::ptr_eq(t, table));
        before != catalog.tables.len()
    }

    /// All tables in creation order.
    pub fn tables(&self) -> Vec<Arc<DictTable>> {
        self.catalog.read().tables.clone()
    }

    /// Table whose XML id is `xml_id`.
    pub fn table_by_xml_id(&self, xml_id: &str) -> Option<Arc<DictTable>> {
        self.catalog
            .read()
            .tables
            .iter()
            .find(|t| t.xml_id() == xml_id)
            .cloned()
    }

    /// Table named `name`.
    pub fn table_by_name(&self, name: &str) -> Option<Arc<DictTable>> {
        self.catalog
            .read()
            .tables
            .iter()
            .find(|t| *t.name.read() == name)
            .cloned()
    }

    /// Table column by XML id; the table part is resolved first.
    pub fn field_by_xml_id(&self, xml_id: &str) -> Option<Arc<DictField>> {
        let (table_id, _) = xml_id.split_once(':')?;
        self.table_by_xml_id(table_id)?.field_by_xml_id(xml_id)
    }

    /// Table column by `table.field` name.
    pub fn field_by_name(&self, qualified: &str) -> Option<Arc<DictField>> {
        let (table, field) = qualified.split_once('.')?;
        self.table_by_name(table)?.field_by_name(field)
    }

    /// Registers a function signature.
    pub fn add_function(&self, name: &str, arg_types: &[&str], ret_type: &str) -> Arc<DictFunction> {
        let mut catalog = self.catalog.write();
        catalog.next_function += 1;
        let function = Arc::new(DictFunction {
            serial: catalog.next_function,
            name: name.to_owned(),
            arg_types: arg_types.iter().map(|t| (*t).to_owned()).collect(),
            ret_type: ret_type.to_owned(),
        });
        catalog.functions.push(Arc::clone(&function));
        function
    }

    /// Function whose XML id is `xml_id`.
    pub fn function_by_xml_id(&self, xml_id: &str) -> Option<Arc<DictFunction>> {
        self.catalog
            .read()
            .functions
            .iter()
            .find(|f| f.xml_id() == xml_id)
            .cloned()
    }

    /// All overloads with the given name.
    pub fn functions_by_name(&self, name: &str) -> Vec<Arc<DictFunction>> {
        self.catalog
            .read()
            .functions
            .iter()
            .filter(|f| f.name == name)
            .cloned()
            .collect()
    }

    /// The function with the given name, only when it is not overloaded.
    pub fn function_by_name(&self, name: &str) -> Option<Arc<DictFunction>> {
        single(self.functions_by_name(name))
    }

    /// Registers an aggregate signature.
    pub fn add_aggregate(&self, name: &str, arg_type: &str, ret_type: &str) -> Arc<DictAggregate> {
        let mut catalog = self.catalog.write();
        catalog.next_aggregate += 1;
        let aggregate = Arc::new(DictAggregate {
            serial: catalog.next_aggregate,
            name: name.to_owned(),
            arg_type: arg_type.to_owned(),
            ret_type: ret_type.to_owned(),
        });
        catalog.aggregates.push(Arc::clone(&aggregate));
        aggregate
    }

    /// Aggregate whose XML id is `xml_id`.
    pub fn aggregate_by_xml_id(&self, xml_id: &str) -> Option<Arc<DictAggregate>> {
        self.catalog
            .read()
            .aggregates
            .iter()
            .find(|a| a.xml_id() == xml_id)
            .cloned()
    }

    /// The aggregate with the given name, only when it is not overloaded.
    pub fn aggregate_by_name(&self, name: &str) -> Option<Arc<DictAggregate>> {
        let matches = self
            .catalog
            .read()
            .aggregates
            .iter()
            .filter(|a| a.name == name)
            .cloned()
            .collect();
        single(matches)
    }

    /// Reserves a serial for a new query, skipping serials still in use.
    pub(crate) fn next_query_serial(&self, wanted: Option<u32>) -> u32 {
        let mut catalog = self.catalog.write();
        catalog.queries.retain(|(_, q)| q.strong_count() > 0);
        let taken = |catalog: &Catalog, serial: u32| catalog.queries.iter().any(|(s, _)| *s == serial);
        let serial = match wanted {
            Some(serial) if serial > 0 && !taken(&*catalog, serial) => serial,
            _ => {
                let mut serial = catalog.next_query + 1;
                while taken(&*catalog, serial) {
                    serial += 1;
                }
                serial
            }
        };
        catalog.next_query = catalog.next_query.max(serial);
        serial
    }

    pub(crate) fn register_query(&self, serial: u32, query: &Arc<Query>) {
        self.catalog
            .write()
            .queries
            .push((serial, Arc::downgrade(query)));
    }

    pub(crate) fn unregister_query(&self, serial: u32) {
        self.catalog.write().queries.retain(|(s, _)| *s != serial);
    }

    /// Live query by XML id (`QU<n>`).
    pub fn query_by_xml_id(&self, xml_id: &str) -> Option<Arc<Query>> {
        let serial: u32 = xml_id.strip_prefix("QU")?.parse().ok()?;
        self.catalog
            .read()
            .queries
            .iter()
            .find(|(s, _)| *s == serial)
            .and_then(|(_, q)| q.upgrade())
    }

    /// Live queries in registration order.
    pub fn queries(&self) -> Vec<Arc<Query>> {
        self.catalog
            .read()
            .queries
            .iter()
            .filter_map(|(_, q)| q.upgrade())
            .collect()
    }
}

fn single<T>(mut items: Vec<T>) -> Option<T> {
    if items.len() == 1 {
        items.pop()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_and_fields_resolve_by_id_and_name() {
        let dict = Dict::new();
        let items = dict.add_table("items");
        let qty = items.add_field("qty", "int");
        assert_eq!(items.xml_id(), "TV1");
        assert_eq!(qty.xml_id(), "TV1:FI1");
        assert!(Arc::ptr_eq(&dict.field_by_xml_id("TV1:FI1").unwrap(), &qty));
        assert!(Arc::ptr_eq(&dict.field_by_name("items.qty").unwrap(), &qty));
        assert!(dict.field_by_name("items.price").is_none());

        items.set_name("stock");
        assert!(dict.table_by_name("items").is_none());
        assert!(dict.table_by_name("stock").is_some());
    }

    #[test]
    fn overloaded_functions_do_not_resolve_by_name() {
        let dict = Dict::new();
        dict.add_function("abs", &["int"], "int");
        assert!(dict.function_by_name("abs").is_some());
        dict.add_function("abs", &["float"], "float");
        assert!(dict.function_by_name("abs").is_none());
        assert_eq!(dict.functions_by_name("abs").len(), 2);
        assert_eq!(dict.function_by_xml_id("PR2").unwrap().arg_types(), ["float"]);

        dict.add_aggregate("count", "any", "int");
        assert_eq!(dict.aggregate_by_name("count").unwrap().xml_id(), "AG1");
    }

    #[test]
    fn missing_server_info_means_permissive_defaults() {
        let dict = Dict::new();
        assert_eq!(dict.server_info(), None);
        assert_eq!(
            dict.server_info().unwrap_or_default(),
            ServerInfo {
                supports_prefixed_fields: true,
                quote_non_lc_identifiers: true,
            }
        );
    }
}

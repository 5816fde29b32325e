#![allow(missing_docs)]

use std::sync::Arc;

use xql::dict::{DictFunction, DictTable};
use xql::query::{FieldKind, Referer, Renderer, XmlStorage};
use xql::{Dict, DictObject, Query, QueryField, RenderContext, RenderOptions, XmlNode, XqlError};

struct Catalog {
    dict: Arc<Dict>,
    items: Arc<DictTable>,
    orders: Arc<DictTable>,
    lower: Arc<DictFunction>,
}

/// `items(name varchar, Qty int)` as TV1, `orders(total numeric)` as TV2 and
/// `lower(varchar)` as PR1.
fn catalog() -> Catalog {
    let dict = Dict::new();
    let items = dict.add_table("items");
    items.add_field("name", "varchar");
    items.add_field("Qty", "int");
    let orders = dict.add_table("orders");
    orders.add_field("total", "numeric");
    let lower = dict.add_function("lower", &["varchar"], "varchar");
    Catalog {
        dict,
        items,
        orders,
        lower,
    }
}

/// `SELECT i.name, i."Qty", lower(i.name) AS lname FROM items AS i` plus a
/// hidden `limit` parameter.
fn item_query(cat: &Catalog) -> Arc<Query> {
    let query = Query::new(&cat.dict);
    let target = query.add_target(DictObject::Table(cat.items.clone()), Some("i"));
    let name = QueryField::new_field_by_name(&query, &target, "name");
    QueryField::new_field_by_name(&query, &target, "Qty");
    let lname = QueryField::new_func(&query, &cat.lower, &[name]).unwrap();
    lname.set_alias(Some("lname"));
    let limit = QueryField::new_value(&query, "int");
    limit.set_name(Some("limit"));
    limit.set_visible(false);
    if let FieldKind::Value(value) = &mut *limit.kind_mut() {
        value.set_parameter(true);
    }
    query
}

const ITEM_SQL: &str = "SELECT i.name, i.\"Qty\", lower (i.name) AS lname FROM items AS i";

#[test]
fn query_renders_visible_fields() {
    let cat = catalog();
    let query = item_query(&cat);
    assert!(query.activate());
    assert!(query.is_active());
    assert_eq!(
        query.render_as_sql(None, RenderOptions::empty()).unwrap(),
        ITEM_SQL
    );
    let ids: Vec<String> = query
        .fields()
        .iter()
        .map(|f| f.xml_id().to_string())
        .collect();
    assert_eq!(ids, ["QU1:QF1", "QU1:QF2", "QU1:QF3", "QU1:QF4"]);
}

#[test]
fn saved_query_reloads_into_a_fresh_catalog() {
    let cat = catalog();
    let query = item_query(&cat);
    assert!(query.activate());
    let text = query.save_to_xml().unwrap().to_xml_string().unwrap();

    let other = catalog();
    let node = XmlNode::parse(&text).unwrap();
    let loaded = Query::load_from_xml(&other.dict, &node).unwrap();
    assert_eq!(loaded.xml_id(), "QU1");
    assert!(!loaded.is_active());
    assert_eq!(loaded.save_to_xml().unwrap().to_xml_string().unwrap(), text);

    assert!(loaded.activate());
    assert_eq!(
        loaded.render_as_sql(None, RenderOptions::empty()).unwrap(),
        ITEM_SQL
    );
    let qty = loaded.field_by_name("Qty").unwrap();
    let resolved = qty.ref_objects();
    assert!(resolved
        .iter()
        .any(|o| o.xml_id() == "TV1:FI2" && o.name() == "Qty"));
}

#[test]
fn loading_over_a_live_query_renumbers_ids() {
    let cat = catalog();
    let query = item_query(&cat);
    let node = query.save_to_xml().unwrap();

    let loaded = Query::load_from_xml(&cat.dict, &node).unwrap();
    assert_eq!(loaded.xml_id(), "QU2");
    assert_eq!(loaded.targets()[0].xml_id(), "QU2:T1");
    assert!(loaded.activate());

    let target = loaded.targets()[0].clone();
    let name = loaded.field_by_name("name").unwrap();
    assert!(name
        .ref_objects()
        .iter()
        .any(|o| o.ptr_eq(&DictObject::Target(target.clone()))));
    let saved = loaded.save_to_xml().unwrap();
    assert_eq!(saved.children()[1].attr("target"), Some("QU2:T1"));
    assert_eq!(
        loaded.render_as_sql(None, RenderOptions::empty()).unwrap(),
        ITEM_SQL
    );
}

#[test]
fn removing_a_target_destroys_its_fields() {
    let cat = catalog();
    let query = Query::new(&cat.dict);
    let items = query.add_target(DictObject::Table(cat.items.clone()), Some("i"));
    let orders = query.add_target(DictObject::Table(cat.orders.clone()), Some("o"));
    QueryField::new_all(&query, &items);
    let total = QueryField::new_field_by_name(&query, &orders, "total");
    assert!(query.activate());
    assert_eq!(
        query.render_as_sql(None, RenderOptions::empty()).unwrap(),
        "SELECT i.*, o.total FROM items AS i, orders AS o"
    );

    assert!(query.remove_target(&orders));
    assert!(total.is_destroyed());
    assert_eq!(query.fields().len(), 1);
    assert_eq!(
        query.render_as_sql(None, RenderOptions::empty()).unwrap(),
        "SELECT i.* FROM items AS i"
    );
    assert!(!query.remove_target(&orders));
}

#[test]
fn copies_point_at_their_own_targets_and_fields() {
    let cat = catalog();
    let query = item_query(&cat);
    assert!(query.activate());
    let copy = query.new_copy().unwrap();
    assert_eq!(copy.xml_id(), "QU2");
    assert_eq!(copy.fields().len(), 4);

    let original_target = query.targets()[0].clone();
    let copy_target = copy.targets()[0].clone();
    assert_eq!(copy_target.xml_id(), "QU2:T1");
    assert_eq!(copy_target.alias(), "i");

    let copy_name = copy.field_by_name("name").unwrap();
    let refs = copy_name.ref_objects();
    assert!(refs
        .iter()
        .any(|o| o.ptr_eq(&DictObject::Target(copy_target.clone()))));
    assert!(!refs
        .iter()
        .any(|o| o.ptr_eq(&DictObject::Target(original_target.clone()))));

    let copy_func = copy.field_by_name("lower").unwrap();
    let args = copy_func.ref_objects();
    assert!(args
        .iter()
        .any(|o| o.ptr_eq(&DictObject::QueryField(copy_name.clone()))));
    assert_eq!(copy_func.xml_id().to_string(), "QU2:QF3");
    assert_eq!(
        copy.render_as_sql(None, RenderOptions::empty()).unwrap(),
        ITEM_SQL
    );
}

#[test]
fn activation_is_retried_once_the_column_exists() {
    let cat = catalog();
    let query = Query::new(&cat.dict);
    let target = query.add_target(DictObject::Table(cat.items.clone()), Some("i"));
    let stock = QueryField::new_field_by_name(&query, &target, "stock");
    assert!(!query.activate());
    assert!(!stock.is_active());
    assert_eq!(stock.render_as_str(), "i.stock");

    cat.items.add_field("stock", "int");
    assert!(query.activate());
    assert_eq!(
        query.render_as_sql(None, RenderOptions::empty()).unwrap(),
        "SELECT i.stock FROM items AS i"
    );
}

#[test]
fn function_arity_mismatch_aborts_the_load() {
    let cat = catalog();
    let text = r#"<gda_query id="QU1">
  <gda_query_target id="QU1:T1" entity_ref="TV1" alias="i"/>
  <gda_query_ffunc id="QU1:QF1" name="lower" func="PR1"/>
</gda_query>"#;
    let node = XmlNode::parse(text).unwrap();
    let err = Query::load_from_xml(&cat.dict, &node).unwrap_err();
    assert!(matches!(
        err,
        XqlError::WrongArgCount {
            expected: 1,
            found: 0,
            ..
        }
    ));
    assert!(cat.dict.queries().is_empty());
}

#[test]
fn parameter_fields_use_placeholders_or_context_values() {
    let cat = catalog();
    let query = Query::new(&cat.dict);
    let target = query.add_target(DictObject::Table(cat.items.clone()), Some("i"));
    QueryField::new_field_by_name(&query, &target, "name");
    let limit = QueryField::new_value(&query, "int");
    limit.set_name(Some("lim"));
    if let FieldKind::Value(value) = &mut *limit.kind_mut() {
        value.set_parameter(true);
    }
    assert!(query.activate());

    let mut ctx = RenderContext::new();
    let sql = query
        .render_as_sql(Some(&mut ctx), RenderOptions::PARAMS_AS_DOLLAR)
        .unwrap();
    assert_eq!(sql, "SELECT i.name, $1 FROM items AS i");
    assert_eq!(ctx.used_params(), ["lim".to_owned()]);

    let mut ctx = RenderContext::new().with_value("lim", 5_i64);
    let sql = query
        .render_as_sql(Some(&mut ctx), RenderOptions::empty())
        .unwrap();
    assert_eq!(sql, "SELECT i.name, 5 FROM items AS i");

    let mut empty = RenderContext::new();
    let err = query
        .render_as_sql(Some(&mut empty), RenderOptions::empty())
        .unwrap_err();
    assert!(matches!(err, XqlError::NoValue { ref name } if name == "lim"));
}

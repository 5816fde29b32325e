#![allow(missing_docs)]

use xql::render::{RenderContext, RenderOptions};
use xql::xql::{render_statement, Document, DmlKind, NodeId, Slot};
use xql::{XmlNode, XqlError};

/// `SELECT t1.a FROM T AS t1 WHERE t1.a = 1 AND t1.b > :lim`
fn filtered_select(doc: &mut Document) -> NodeId {
    let select = doc.new_dml(DmlKind::Select);
    let target = doc.add_target_from_text(select, "T", None).unwrap();
    doc.add_field_from_text(select, &target, "a", None, false)
        .unwrap();

    let left = doc.new_field(&target, "a");
    let right = doc.new_const("1", "int", false);
    let first = doc.new_condition("eq", left, right).unwrap();
    doc.add_row_condition(select, first, "and").unwrap();

    let left = doc.new_field(&target, "b");
    let right = doc.new_param("lim", "int");
    let second = doc.new_condition("gt", left, right).unwrap();
    doc.add_row_condition(select, second, "and").unwrap();
    select
}

#[test]
fn built_select_serializes_slots_in_order() {
    let mut doc = Document::new();
    let select = filtered_select(&mut doc);

    let dom = doc.to_dom(select);
    let tags: Vec<&str> = dom.children().iter().map(XmlNode::name).collect();
    assert_eq!(tags, ["targetlist", "valuelist", "where"]);

    let where_clause = &dom.children()[2];
    assert_eq!(where_clause.children().len(), 1);
    let and = &where_clause.children()[0];
    assert_eq!(and.name(), "and");
    assert_eq!(and.children().len(), 2);

    let target = &dom.children()[0].children()[0];
    assert_eq!(target.attr("id"), Some("t1"));
    let value = &dom.children()[1].children()[0];
    assert_eq!(value.attr("id"), Some("v1"));
    assert_eq!(value.children()[0].attr("source"), Some("t1"));
}

#[test]
fn built_select_renders_with_placeholders() {
    let mut doc = Document::new();
    let select = filtered_select(&mut doc);
    let statement = render_statement(
        &doc,
        select,
        RenderOptions::PARAMS_AS_COLON,
        RenderContext::new(),
    )
    .unwrap();
    assert_eq!(
        statement.sql,
        "SELECT t1.a FROM \"T\" AS t1 WHERE t1.a = 1 AND t1.b > :lim"
    );
    assert_eq!(statement.params, vec!["lim".to_owned()]);
}

#[test]
fn xml_text_round_trips_and_relinks_sources() {
    let mut doc = Document::new();
    let select = filtered_select(&mut doc);
    let text = doc.to_xml_string(select).unwrap();

    let mut reloaded = Document::new();
    let root = reloaded.parse_xml(&text).unwrap();
    assert_eq!(reloaded.to_xml_string(root).unwrap(), text);

    let target = reloaded.lookup_id(root, "t1").unwrap();
    assert_eq!(reloaded.tag(target), "target");
    assert_eq!(reloaded.find_ref(root, "t1"), Some(target));
    assert_eq!(reloaded.dml_kind(root).unwrap(), DmlKind::Select);

    let statement = render_statement(
        &reloaded,
        root,
        RenderOptions::empty(),
        RenderContext::new().with_value("lim", 10_i64),
    )
    .unwrap();
    assert_eq!(
        statement.sql,
        "SELECT t1.a FROM \"T\" AS t1 WHERE t1.a = 1 AND t1.b > 10"
    );
}

#[test]
fn statement_refuses_unknown_children() {
    let mut doc = Document::new();
    let select = filtered_select(&mut doc);
    let bogus = doc.new_list("bogus");
    let err = doc.add(select, bogus).unwrap_err();
    assert!(matches!(err, XqlError::Rejected { ref parent, ref child }
        if parent == "select" && child == "bogus"));
    assert_eq!(doc.parent(bogus), None);
    assert_eq!(doc.to_dom(select).children().len(), 3);
}

#[test]
fn loading_drops_children_a_statement_cannot_hold() {
    let text = r#"<select>
  <bogus><field name="x"/></bogus>
  <targetlist>
    <target id="t1" name="items"/>
  </targetlist>
  <setlist/>
</select>"#;
    let mut doc = Document::new();
    let root = doc.parse_xml(text).unwrap();
    let tags: Vec<String> = doc
        .children(root)
        .into_iter()
        .map(|child| doc.tag(child).to_owned())
        .collect();
    assert_eq!(tags, ["targetlist"]);
    assert_eq!(doc.to_sql(root).unwrap(), "SELECT * FROM items AS t1");
}

#[test]
fn hand_written_update_renders_without_aliases() {
    let text = r#"<update>
  <target id="t1" name="items"/>
  <setlist>
    <set><field name="qty"/><const value="0" type="int"/></set>
  </setlist>
  <where>
    <eq><field name="id" source="t1"/><const param="id" type="int"/></eq>
  </where>
</update>"#;
    let mut doc = Document::new();
    let root = doc.parse_xml(text).unwrap();
    assert!(doc.dml_slot(root, Slot::SetList).is_some());
    let statement = render_statement(
        &doc,
        root,
        RenderOptions::PARAMS_AS_QMARK,
        RenderContext::new(),
    )
    .unwrap();
    assert_eq!(statement.sql, "UPDATE items SET qty = 0 WHERE id = ?1");
    assert_eq!(statement.params, vec!["id".to_owned()]);
}

#[test]
fn insert_from_subquery() {
    let mut doc = Document::new();
    let inner = doc.new_dml(DmlKind::Select);
    let source = doc.add_target_from_text(inner, "archive", None).unwrap();
    doc.add_field_from_text(inner, &source, "name", None, false)
        .unwrap();

    let insert = doc.new_dml(DmlKind::Insert);
    doc.add_target_from_text(insert, "items", None).unwrap();
    doc.add_field_from_text(insert, "t2", "name", None, false)
        .unwrap();
    doc.add_query(insert, inner).unwrap();
    assert_eq!(
        doc.to_sql(insert).unwrap(),
        "INSERT INTO items (name) SELECT t1.name FROM archive AS t1"
    );
}

#[test]
fn builders_on_a_loaded_select_issue_fresh_ids() {
    let text = r#"<select>
  <targetlist>
    <target id="t1" name="items"/>
  </targetlist>
  <valuelist>
    <value id="v1">
      <field name="a" source="t1"/>
    </value>
  </valuelist>
</select>"#;
    let mut doc = Document::new();
    let select = doc.parse_xml(text).unwrap();
    let orders = doc.add_target_from_text(select, "orders", None).unwrap();
    assert_eq!(orders, "t2");
    let value = doc
        .add_field_from_text(select, &orders, "b", None, false)
        .unwrap();
    assert_eq!(doc.get_attrib(value, "id"), "v2");

    let targets = doc.dml_slot(select, Slot::Target).unwrap();
    let ids: Vec<&str> = doc
        .children(targets)
        .into_iter()
        .map(|target| doc.get_attrib(target, "id"))
        .collect();
    assert_eq!(ids, ["t1", "t2"]);
    assert_eq!(
        doc.to_sql(select).unwrap(),
        "SELECT t1.a, t2.b FROM items AS t1, orders AS t2"
    );
}

#[test]
fn subqueries_inside_update_keep_their_aliases() {
    let text = r#"<update>
  <target id="t1" name="items"/>
  <setlist>
    <set><field name="qty"/><const value="0" type="int"/></set>
  </setlist>
  <where>
    <exists>
      <query>
        <select>
          <targetlist>
            <target id="t2" name="orders"/>
            <target id="t3" name="lines"/>
          </targetlist>
          <where>
            <eq><field name="id" source="t2"/><field name="id" source="t3"/></eq>
          </where>
        </select>
      </query>
    </exists>
  </where>
</update>"#;
    let mut doc = Document::new();
    let root = doc.parse_xml(text).unwrap();
    assert_eq!(
        doc.to_sql(root).unwrap(),
        "UPDATE items SET qty = 0 WHERE EXISTS \
         (SELECT * FROM orders AS t2, lines AS t3 WHERE t2.id = t3.id)"
    );
}

#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

const SELECT_DOC: &str = r#"<select>
  <targetlist>
    <target id="t1" name="items"/>
  </targetlist>
  <valuelist>
    <value id="v1">
      <field name="name" source="t1"/>
    </value>
  </valuelist>
  <where>
    <gt>
      <field name="qty" source="t1"/>
      <const param="min" type="int"/>
    </gt>
  </where>
</select>"#;

const QUERY_DOC: &str = r#"<gda_query id="QU1">
  <gda_query_target id="QU1:T1" entity_name="items" alias="i"/>
  <gda_query_fall id="QU1:QF1" target="QU1:T1"/>
</gda_query>"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write fixture");
        path
    }

    /// `xql` with the config pointed into the workspace so the user's own
    /// config file never leaks into a test.
    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("xql");
        cmd.env("XQL_CONFIG", self.dir.path().join("config.toml"));
        cmd
    }
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).expect("utf8 stdout")
}

#[test]
fn renders_select_with_inline_param() {
    let ws = Workspace::new();
    let doc = ws.file("select.xml", SELECT_DOC);
    let out = stdout_of(ws.cmd().arg("render").arg(&doc).args(["--param", "min=5"]));
    assert_eq!(out, "SELECT t1.name FROM items AS t1 WHERE t1.qty > 5\n");
}

#[test]
fn renders_placeholders_as_json() {
    let ws = Workspace::new();
    let doc = ws.file("select.xml", SELECT_DOC);
    let out = stdout_of(
        ws.cmd()
            .args(["--format", "json", "render", "--placeholder", "dollar"])
            .arg(&doc),
    );
    let json: Value = serde_json::from_str(&out).expect("valid json");
    assert_eq!(
        json["sql"],
        "SELECT t1.name FROM items AS t1 WHERE t1.qty > $1"
    );
    assert_eq!(json["params"], serde_json::json!(["min"]));
}

#[test]
fn text_output_lists_placeholder_params() {
    let ws = Workspace::new();
    let doc = ws.file("select.xml", SELECT_DOC);
    let out = stdout_of(
        ws.cmd()
            .arg("render")
            .arg(&doc)
            .args(["--placeholder", "colon", "--pretty"]),
    );
    assert_eq!(
        out,
        "SELECT t1.name\nFROM items AS t1\nWHERE t1.qty > :min\n-- params: min\n"
    );
}

#[test]
fn config_supplies_style_and_defaults() {
    let ws = Workspace::new();
    let doc = ws.file("select.xml", SELECT_DOC);
    ws.file("config.toml", "[render]\nno_target_alias = true\n\n[params]\nmin = 3\n");
    let out = stdout_of(ws.cmd().arg("render").arg(&doc));
    assert_eq!(out, "SELECT name FROM items WHERE qty > 3\n");

    let out = stdout_of(ws.cmd().arg("render").arg(&doc).args(["--param", "min=7"]));
    assert_eq!(out, "SELECT name FROM items WHERE qty > 7\n");

    let other = ws.file("other.toml", "[render]\nplaceholder = \"qmark\"\n");
    let out = stdout_of(ws.cmd().arg("--config").arg(&other).arg("render").arg(&doc));
    assert_eq!(out, "SELECT t1.name FROM items AS t1 WHERE t1.qty > ?1\n-- params: min\n");
}

#[test]
fn invalid_config_is_reported() {
    let ws = Workspace::new();
    let doc = ws.file("select.xml", SELECT_DOC);
    ws.file("config.toml", "[render]\nplaceholder = \"percent\"\n");
    let output = ws.cmd().arg("render").arg(&doc).assert().code(1).get_output().stderr.clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("error: placeholder style 'percent' is invalid"));
}

#[test]
fn missing_param_value_fails() {
    let ws = Workspace::new();
    let doc = ws.file("select.xml", SELECT_DOC);
    let output = ws.cmd().arg("render").arg(&doc).assert().code(1).get_output().stderr.clone();
    assert!(String::from_utf8_lossy(&output).starts_with("error:"));
}

#[test]
fn renders_query_documents() {
    let ws = Workspace::new();
    let doc = ws.file("query.xml", QUERY_DOC);
    let out = stdout_of(ws.cmd().arg("render").arg(&doc));
    assert_eq!(out, "SELECT i.* FROM items AS i\n");
}

#[test]
fn check_reports_round_trips() {
    let ws = Workspace::new();
    let select = ws.file("select.xml", SELECT_DOC);
    let out = stdout_of(ws.cmd().arg("check").arg(&select));
    assert_eq!(out, "<select>: ok\n");

    let query = ws.file("query.xml", QUERY_DOC);
    let out = stdout_of(ws.cmd().args(["--format", "json", "check"]).arg(&query));
    let json: Value = serde_json::from_str(&out).expect("valid json");
    assert_eq!(json["root"], "gda_query");
    assert_eq!(json["round_trip"], true);
}

#[test]
fn check_flags_documents_that_change() {
    let ws = Workspace::new();
    let doc = ws.file(
        "reordered.xml",
        r#"<select><targetlist><target name="items" id="t1"/></targetlist></select>"#,
    );
    let output = ws.cmd().arg("check").arg(&doc).assert().code(2).get_output().stdout.clone();
    assert_eq!(String::from_utf8_lossy(&output), "<select>: changed\n");
}

#[test]
fn missing_file_is_an_error() {
    let ws = Workspace::new();
    let output = ws
        .cmd()
        .arg("render")
        .arg(ws.dir.path().join("absent.xml"))
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).starts_with("error:"));
}

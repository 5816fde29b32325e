//! SQL text generation for XQL trees.

use tracing::trace;

use super::dml::Slot;
use super::item::{Document, NodeId};
use crate::render::{needs_quotes, quote_identifier, RenderContext, RenderOptions, Statement};
use crate::types::{Result, Value, XqlError};

/// Renders the statement rooted at `root`.
///
/// Parameter constants are rendered with the placeholder style selected by
/// `options`, or inlined from `ctx` when no style is selected.
pub fn render_statement(
    doc: &Document,
    root: NodeId,
    options: RenderOptions,
    mut ctx: RenderContext,
) -> Result<Statement> {
    let sql = SqlWriter {
        doc,
        base: options,
        options,
        ctx: &mut ctx,
    }
    .node(root)?;
    trace!(%sql, "rendered statement");
    Ok(Statement {
        sql,
        params: ctx.into_used(),
    })
}

struct SqlWriter<'a> {
    doc: &'a Document,
    /// Options the caller asked for; every SELECT starts from these.
    base: RenderOptions,
    options: RenderOptions,
    ctx: &'a mut RenderContext,
}

impl SqlWriter<'_> {
    fn clause_sep(&self) -> &'static str {
        if self.options.contains(RenderOptions::PRETTY) {
            "\n"
        } else {
            " "
        }
    }

    fn node(&mut self, id: NodeId) -> Result<String> {
        let doc = self.doc;
        match doc.tag(id) {
            "select" => self.select(id),
            "insert" => self.insert(id),
            "update" => self.update(id),
            "delete" => self.delete(id),
            "field" => Ok(self.field(id)),
            "const" => self.constant(id),
            "value" => {
                let expr = self.bin(id)?;
                match doc.get_attrib(id, "alias") {
                    "" => Ok(expr),
                    alias => Ok(format!("{expr} AS {}", ident(alias))),
                }
            }
            "column" => self.column(id),
            "func" => {
                let args = match doc.bin_child(id) {
                    Some(list) => self.joined(list, ", ")?,
                    None => String::new(),
                };
                Ok(format!("{}({args})", doc.get_attrib(id, "name")))
            }
            "arglist" | "valuelist" | "sourcelist" | "dest" => {
                Ok(format!("({})", self.joined(id, ", ")?))
            }
            "query" => Ok(format!("({})", self.bin(id)?)),
            "not" => Ok(format!("NOT {}", self.bin(id)?)),
            "exists" => Ok(format!("EXISTS {}", self.bin(id)?)),
            "isnull" => Ok(format!("{} IS NULL", self.bin(id)?)),
            "where" | "having" => self.bin(id),
            "and" => self.combinator(id, " AND "),
            "or" => self.combinator(id, " OR "),
            "eq" | "ne" | "lt" | "le" | "gt" | "ge" | "like" | "in" | "set" => self.dual(id),
            other => Err(XqlError::Render(format!("cannot render <{other}>"))),
        }
    }

    fn bin(&mut self, id: NodeId) -> Result<String> {
        let child = self
            .doc
            .bin_child(id)
            .ok_or_else(|| XqlError::Render(format!("empty <{}>", self.doc.tag(id))))?;
        self.node(child)
    }

    fn joined(&mut self, id: NodeId, sep: &str) -> Result<String> {
        let parts = self
            .doc
            .children(id)
            .into_iter()
            .map(|child| self.node(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(sep))
    }

    fn combinator(&mut self, id: NodeId, sep: &str) -> Result<String> {
        let body = self.joined(id, sep)?;
        let nested = self
            .doc
            .parent(id)
            .is_some_and(|parent| matches!(self.doc.tag(parent), "and" | "or" | "not"));
        Ok(if nested { format!("({body})") } else { body })
    }

    fn dual(&mut self, id: NodeId) -> Result<String> {
        let op = match self.doc.tag(id) {
            "eq" | "set" => "=",
            "ne" => "<>",
            "lt" => "<",
            "le" => "<=",
            "gt" => ">",
            "ge" => ">=",
            "like" => "LIKE",
            _ => "IN",
        };
        let (Some(left), Some(right)) = self.doc.dual_operands(id) else {
            return Err(XqlError::Render(format!(
                "<{}> needs two operands",
                self.doc.tag(id)
            )));
        };
        Ok(format!("{} {op} {}", self.node(left)?, self.node(right)?))
    }

    fn field(&self, id: NodeId) -> String {
        let name = ident(self.doc.get_attrib(id, "name"));
        match self.doc.get_attrib(id, "source") {
            "" => name,
            _ if self.options.contains(RenderOptions::NO_TARGET_ALIAS) => name,
            source => format!("{source}.{name}"),
        }
    }

    fn constant(&mut self, id: NodeId) -> Result<String> {
        let doc = self.doc;
        if doc.get_attrib(id, "null") == "t" {
            return Ok("NULL".to_owned());
        }
        let param = doc.get_attrib(id, "param");
        if !param.is_empty() {
            if let Some(style) = self.options.placeholder_style() {
                return Ok(self.ctx.placeholder(param, style));
            }
            return match self.ctx.value(param) {
                Some(value) => Ok(value.to_sql()),
                None => Err(XqlError::NoValue {
                    name: param.to_owned(),
                }),
            };
        }
        Ok(Value::from_text(doc.get_attrib(id, "type"), doc.get_attrib(id, "value")).to_sql())
    }

    fn column(&mut self, id: NodeId) -> Result<String> {
        let doc = self.doc;
        let source = doc.get_attrib(id, "source");
        let expr = match doc.lookup_id(id, source).filter(|_| !source.is_empty()) {
            Some(value) => match doc.get_attrib(value, "alias") {
                "" => self.bin(value)?,
                alias => ident(alias),
            },
            None => match doc.get_attrib(id, "num").parse::<usize>() {
                Ok(num) => (num + 1).to_string(),
                Err(_) => return Err(XqlError::unresolved("column", Some(source))),
            },
        };
        Ok(match doc.get_attrib(id, "dir") {
            "desc" => format!("{expr} DESC"),
            _ => expr,
        })
    }

    fn target(&mut self, id: NodeId) -> Result<String> {
        let doc = self.doc;
        let source = match doc.bin_child(id).filter(|child| doc.tag(*child) == "query") {
            Some(query) => self.node(query)?,
            None => ident(doc.get_attrib(id, "name")),
        };
        let alias = doc.get_attrib(id, "id");
        if alias.is_empty() || self.options.contains(RenderOptions::NO_TARGET_ALIAS) {
            Ok(source)
        } else {
            Ok(format!("{source} AS {alias}"))
        }
    }

    fn target_list(&mut self, list: NodeId) -> Result<String> {
        let doc = self.doc;
        let mut out = String::new();
        for (index, target) in doc.children(list).into_iter().enumerate() {
            let join = doc
                .bin_child(target)
                .filter(|child| doc.tag(*child) == "join");
            let rendered = self.target(target)?;
            match join {
                Some(join) if index > 0 => {
                    let kind = match doc.get_attrib(join, "type") {
                        "" => "INNER".to_owned(),
                        kind => kind.to_uppercase(),
                    };
                    out.push_str(&format!(" {kind} JOIN {rendered}"));
                    if doc.bin_child(join).is_some() {
                        out.push_str(&format!(" ON {}", self.bin(join)?));
                    }
                }
                _ => {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&rendered);
                }
            }
        }
        Ok(out)
    }

    fn select(&mut self, id: NodeId) -> Result<String> {
        self.with_options(self.base, |w| w.select_clauses(id))
    }

    fn select_clauses(&mut self, id: NodeId) -> Result<String> {
        let doc = self.doc;
        let sep = self.clause_sep();
        let mut sql = String::from("SELECT ");
        if doc.get_attrib(id, "distinct") == "t" {
            sql.push_str("DISTINCT ");
        }
        match doc.dml_slot(id, Slot::ValueList) {
            Some(values) if !doc.children(values).is_empty() => {
                sql.push_str(&self.joined(values, ", ")?)
            }
            _ => sql.push('*'),
        }
        if let Some(targets) = doc.dml_slot(id, Slot::Target) {
            sql.push_str(&format!("{sep}FROM {}", self.target_list(targets)?));
        }
        if let Some(clause) = doc.dml_slot(id, Slot::Where) {
            sql.push_str(&format!("{sep}WHERE {}", self.node(clause)?));
        }
        if let Some(group) = doc.dml_slot(id, Slot::Group) {
            sql.push_str(&format!("{sep}GROUP BY {}", self.joined(group, ", ")?));
        }
        if let Some(clause) = doc.dml_slot(id, Slot::Having) {
            sql.push_str(&format!("{sep}HAVING {}", self.node(clause)?));
        }
        if let Some(trailer) = doc.dml_slot(id, Slot::Trailer) {
            let keyword = match doc.tag(trailer) {
                "order" => {
                    sql.push_str(&format!("{sep}ORDER BY {}", self.joined(trailer, ", ")?));
                    return Ok(sql);
                }
                "union" => "UNION",
                "unionall" => "UNION ALL",
                "intersect" => "INTERSECT",
                _ => "EXCEPT",
            };
            for other in doc.children(trailer) {
                let rendered = match doc.tag(other) {
                    "query" => self.bin(other)?,
                    _ => self.node(other)?,
                };
                sql.push_str(&format!("{sep}{keyword} {rendered}"));
            }
        }
        Ok(sql)
    }

    fn single_target_name(&self, id: NodeId) -> Result<String> {
        let target = self
            .doc
            .dml_slot(id, Slot::Target)
            .ok_or_else(|| XqlError::Render(format!("<{}> without target", self.doc.tag(id))))?;
        Ok(ident(self.doc.get_attrib(target, "name")))
    }

    fn with_options<T>(
        &mut self,
        options: RenderOptions,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = std::mem::replace(&mut self.options, options);
        let out = f(self);
        self.options = saved;
        out
    }

    /// Renders with field prefixes suppressed: the single-target statements
    /// name their table without an alias. Nested selects get the caller's
    /// options back.
    fn unaliased<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.with_options(self.options | RenderOptions::NO_TARGET_ALIAS, f)
    }

    fn insert(&mut self, id: NodeId) -> Result<String> {
        let doc = self.doc;
        let sep = self.clause_sep();
        let table = self.single_target_name(id)?;
        self.unaliased(|w| {
            let mut sql = format!("INSERT INTO {table}");
            if let Some(dest) = doc.dml_slot(id, Slot::Dest) {
                sql.push_str(&format!(" {}", w.node(dest)?));
            }
            if let Some(source) = doc.dml_slot(id, Slot::Source) {
                let items = doc.children(source);
                match items.as_slice() {
                    [only] if doc.tag(*only) == "query" => {
                        sql.push_str(&format!("{sep}{}", w.bin(*only)?));
                    }
                    _ => sql.push_str(&format!("{sep}VALUES {}", w.node(source)?)),
                }
            }
            Ok(sql)
        })
    }

    fn update(&mut self, id: NodeId) -> Result<String> {
        let doc = self.doc;
        let sep = self.clause_sep();
        let table = self.single_target_name(id)?;
        self.unaliased(|w| {
            let mut sql = format!("UPDATE {table}");
            if let Some(sets) = doc.dml_slot(id, Slot::SetList) {
                sql.push_str(&format!("{sep}SET {}", w.joined(sets, ", ")?));
            }
            if let Some(clause) = doc.dml_slot(id, Slot::Where) {
                sql.push_str(&format!("{sep}WHERE {}", w.node(clause)?));
            }
            Ok(sql)
        })
    }

    fn delete(&mut self, id: NodeId) -> Result<String> {
        let doc = self.doc;
        let sep = self.clause_sep();
        let table = self.single_target_name(id)?;
        self.unaliased(|w| {
            let mut sql = format!("DELETE FROM {table}");
            if let Some(clause) = doc.dml_slot(id, Slot::Where) {
                sql.push_str(&format!("{sep}WHERE {}", w.node(clause)?));
            }
            Ok(sql)
        })
    }
}

fn ident(name: &str) -> String {
    if needs_quotes(name) {
        quote_identifier(name)
    } else {
        name.to_owned()
    }
}

impl Document {
    /// Renders the statement rooted at `root` with default options.
    pub fn to_sql(&self, root: NodeId) -> Result<String> {
        if !matches!(self.shape(root), super::item::Shape::Dml(_)) {
            return Err(XqlError::Render(format!(
                "<{}> is not a statement",
                self.tag(root)
            )));
        }
        render_statement(self, root, RenderOptions::empty(), RenderContext::new())
            .map(|statement| statement.sql)
    }
}

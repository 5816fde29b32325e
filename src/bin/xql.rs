//! Command-line front end: render XQL and query documents to SQL, and check
//! that they survive a load/save cycle.
#![forbid(unsafe_code)]

#[path = "xql/config.rs"]
mod config;

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use xql::query::QUERY_TAG;
use xql::{
    Dict, Document, Query, RenderContext, RenderOptions, Statement, Value, XmlNode, XqlError,
};

use config::CliConfig;

#[derive(Parser, Debug)]
#[command(
    name = "xql",
    version,
    about = "Render and check XQL query documents",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "XQL_CONFIG",
        help = "Config file (defaults to <config dir>/xql/config.toml)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the SQL statement a document describes.
    Render(RenderCmd),
    /// Load a document, save it again, and compare.
    Check {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RenderCmd {
    #[arg(value_name = "FILE")]
    path: PathBuf,

    #[arg(long, value_enum, help = "Placeholder style for parameters")]
    placeholder: Option<PlaceholderArg>,

    #[arg(long, help = "One clause per line")]
    pretty: bool,

    #[arg(long, help = "Do not prefix fields with their target alias")]
    no_target_alias: bool,

    #[arg(
        long = "param",
        value_name = "NAME=VALUE",
        value_parser = parse_param,
        help = "Parameter value (repeatable)"
    )]
    params: Vec<(String, Value)>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PlaceholderArg {
    Colon,
    Dollar,
    Qmark,
    None,
}

impl From<PlaceholderArg> for RenderOptions {
    fn from(arg: PlaceholderArg) -> Self {
        match arg {
            PlaceholderArg::Colon => RenderOptions::PARAMS_AS_COLON,
            PlaceholderArg::Dollar => RenderOptions::PARAMS_AS_DOLLAR,
            PlaceholderArg::Qmark => RenderOptions::PARAMS_AS_QMARK,
            PlaceholderArg::None => RenderOptions::empty(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckReport {
    root: String,
    round_trip: bool,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("XQL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config)?;
    debug!(path = ?config.path(), "config loaded");

    match cli.command {
        Command::Render(cmd) => {
            let statement = render(&cmd, &config)?;
            emit(cli.format, &statement, || {
                println!("{}", statement.sql);
                if !statement.params.is_empty() {
                    println!("-- params: {}", statement.params.join(", "));
                }
            })?;
        }
        Command::Check { path } => {
            let report = check(&path)?;
            emit(cli.format, &report, || {
                let verdict = if report.round_trip { "ok" } else { "changed" };
                println!("<{}>: {verdict}", report.root);
            })?;
            if !report.round_trip {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}

fn render(cmd: &RenderCmd, config: &CliConfig) -> Result<Statement, Box<dyn Error>> {
    let node = read_document(&cmd.path)?;

    let mut options = config.render_options();
    if let Some(style) = cmd.placeholder {
        options.remove(
            RenderOptions::PARAMS_AS_COLON
                | RenderOptions::PARAMS_AS_DOLLAR
                | RenderOptions::PARAMS_AS_QMARK,
        );
        options |= RenderOptions::from(style);
    }
    if cmd.pretty {
        options |= RenderOptions::PRETTY;
    }
    if cmd.no_target_alias {
        options |= RenderOptions::NO_TARGET_ALIAS;
    }

    let mut ctx = RenderContext::new();
    for (name, value) in config.params() {
        ctx.set_value(name, value);
    }
    for (name, value) in &cmd.params {
        ctx.set_value(name.as_str(), value.clone());
    }

    if node.name() == QUERY_TAG {
        let dict = Dict::new();
        dict.set_server_info(config.server_info());
        let query = Query::load_from_xml(&dict, &node)?;
        if !query.activate() {
            debug!(query = %query.xml_id(), "query has unresolved references");
        }
        let sql = query.render_as_sql(Some(&mut ctx), options)?;
        return Ok(Statement {
            sql,
            params: ctx.used_params().to_vec(),
        });
    }

    let mut doc = Document::new();
    let root = doc.from_dom(&node)?;
    Ok(xql::xql::render_statement(&doc, root, options, ctx)?)
}

fn check(path: &Path) -> Result<CheckReport, Box<dyn Error>> {
    let node = read_document(path)?;
    let saved = if node.name() == QUERY_TAG {
        let dict = Dict::new();
        let query = Query::load_from_xml(&dict, &node)?;
        query.save_to_xml()?
    } else {
        let mut doc = Document::new();
        let root = doc.from_dom(&node)?;
        doc.to_dom(root)
    };
    Ok(CheckReport {
        root: node.name().to_string(),
        round_trip: saved.to_xml_string()? == node.to_xml_string()?,
    })
}

fn read_document(path: &Path) -> Result<XmlNode, XqlError> {
    let text = fs::read_to_string(path)?;
    XmlNode::parse(&text)
}

/// `name=value`; integers, floats, `true`/`false` and `null` are typed,
/// anything else is a string.
fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, text) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    if name.is_empty() {
        return Err(format!("missing parameter name in '{raw}'"));
    }
    let value = if let Ok(i) = text.parse::<i64>() {
        Value::Int(i)
    } else if let Ok(f) = text.parse::<f64>() {
        Value::Float(f)
    } else {
        match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            "null" => Value::Null,
            _ => Value::String(text.to_string()),
        }
    };
    Ok((name.to_string(), value))
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

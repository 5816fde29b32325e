use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xql::{RenderOptions, ServerInfo, Value};

/// Settings read from `config.toml`. Command-line flags take precedence.
#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        if let Some(value) = data.render.placeholder.as_deref() {
            if RenderOptions::from_placeholder_name(value).is_none() {
                return Err(ConfigError::InvalidPlaceholder {
                    value: value.to_string(),
                });
            }
        }
        Ok(Self { path, data })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Options from the `[render]` section.
    pub fn render_options(&self) -> RenderOptions {
        let section = &self.data.render;
        let mut options = section
            .placeholder
            .as_deref()
            .and_then(RenderOptions::from_placeholder_name)
            .unwrap_or_default();
        options.set(RenderOptions::PRETTY, section.pretty);
        options.set(RenderOptions::NO_TARGET_ALIAS, section.no_target_alias);
        options
    }

    /// Capabilities from the `[server]` section, when present.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.data.server
    }

    /// Default parameter values from the `[params]` table.
    pub fn params(&self) -> impl Iterator<Item = (&str, Value)> {
        self.data
            .params
            .iter()
            .map(|(name, raw)| (name.as_str(), toml_value(raw)))
    }
}

fn toml_value(raw: &toml::Value) -> Value {
    match raw {
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Integer(i) => Value::Int(*i),
        toml::Value::Float(f) => Value::Float(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        other => Value::String(other.to_string()),
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    render: RenderSection,
    #[serde(default)]
    server: Option<ServerInfo>,
    #[serde(default)]
    params: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderSection {
    placeholder: Option<String>,
    #[serde(default)]
    pretty: bool,
    #[serde(default)]
    no_target_alias: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("placeholder style '{value}' is invalid (expected colon, dollar, qmark or none)")]
    InvalidPlaceholder { value: String },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("xql").join("config.toml"))
}

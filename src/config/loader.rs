//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::sitefile;
use crate::config::validation::{validate_config, ValidationError};
use crate::routing::RouteTable;

/// Error type for configuration loading. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: unknown directive `{name}`")]
    UnknownDirective { line: usize, name: String },

    #[error("`{0}` is not a valid host name")]
    InvalidHost(String),

    #[error("duplicate host `{0}`")]
    DuplicateHost(String),

    #[error("line {line}: invalid port `{value}`")]
    InvalidPort { line: usize, value: String },

    #[error("line {line}: invalid header rule: {message}")]
    InvalidHeader { line: usize, message: String },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = read(path)?;
    let config: ProxyConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a site file and compile it into a route table.
pub fn load_sites(path: &Path) -> Result<RouteTable, ConfigError> {
    let content = read(path)?;
    let site_file = sitefile::parse(&content)?;
    RouteTable::new(site_file.into_routes())
}

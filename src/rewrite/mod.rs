//! Response header rewriting.
//!
//! # Data Flow
//! ```text
//! Site file `header` directive
//!     → HeaderRule::parse (one rule per line, declaration order kept)
//!     → Route.headers (immutable, shared with the route table)
//!
//! Per response:
//!     Response headers → apply(rules) → client
//! ```
//!
//! # Design Decisions
//! - Rules run strictly in declaration order; the last rule touching a
//!   header name decides what the client sees
//! - Header names and values are validated at load time, never per request
//! - Rules see the response after hop-by-hop stripping, so a rule may set
//!   `Connection` deliberately

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

/// One response header mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderRule {
    /// Replace every value of `name` with `value`.
    Set { name: HeaderName, value: HeaderValue },
    /// Append `value`, keeping existing values.
    Add { name: HeaderName, value: HeaderValue },
    /// Remove every value of `name`.
    Delete { name: HeaderName },
}

/// A header rule that cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRule {
    #[error("invalid header name `{0}`")]
    Name(String),
    #[error("invalid value for header `{0}`")]
    Value(String),
    #[error("header `{0}` needs a value")]
    MissingValue(String),
    #[error("deleting header `{0}` takes no value")]
    UnexpectedValue(String),
}

impl HeaderRule {
    /// Build a `Set` rule.
    pub fn set(name: &str, value: &str) -> Result<Self, InvalidRule> {
        Ok(HeaderRule::Set {
            name: header_name(name)?,
            value: header_value(name, value)?,
        })
    }

    /// Build an `Add` rule.
    pub fn add(name: &str, value: &str) -> Result<Self, InvalidRule> {
        Ok(HeaderRule::Add {
            name: header_name(name)?,
            value: header_value(name, value)?,
        })
    }

    /// Build a `Delete` rule.
    pub fn delete(name: &str) -> Result<Self, InvalidRule> {
        Ok(HeaderRule::Delete {
            name: header_name(name)?,
        })
    }

    /// Parse the site file form of a rule.
    ///
    /// `Name value` sets, `-Name` deletes, `+Name value` appends. A leading
    /// `>` is accepted as a plain set since rules always run on the final
    /// response.
    pub fn parse(field: &str, value: Option<&str>) -> Result<Self, InvalidRule> {
        if let Some(name) = field.strip_prefix('-') {
            return match value {
                None => Self::delete(name),
                Some(_) => Err(InvalidRule::UnexpectedValue(name.to_string())),
            };
        }

        let (name, append) = match field.strip_prefix('+') {
            Some(name) => (name, true),
            None => (field.strip_prefix('>').unwrap_or(field), false),
        };
        let value = value.ok_or_else(|| InvalidRule::MissingValue(name.to_string()))?;

        if append {
            Self::add(name, value)
        } else {
            Self::set(name, value)
        }
    }
}

fn header_name(name: &str) -> Result<HeaderName, InvalidRule> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| InvalidRule::Name(name.to_string()))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, InvalidRule> {
    HeaderValue::from_str(value).map_err(|_| InvalidRule::Value(name.to_string()))
}

/// Apply `rules` to `headers` in order.
pub fn apply(rules: &[HeaderRule], headers: &mut HeaderMap) {
    for rule in rules {
        match rule {
            HeaderRule::Set { name, value } => {
                headers.insert(name.clone(), value.clone());
            }
            HeaderRule::Add { name, value } => {
                headers.append(name.clone(), value.clone());
            }
            HeaderRule::Delete { name } => {
                headers.remove(name);
            }
        }
    }
}

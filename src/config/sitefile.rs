//! Site file parsing.
//!
//! The site file is a block-structured list of virtual hosts:
//!
//! ```text
//! {
//!     servers {
//!         protocols h1
//!     }
//! }
//!
//! frontier.example:80 {
//!     reverse_proxy localhost:5857
//!     header {
//!         Server nginx
//!         -Via
//!     }
//! }
//!
//! static.example {
//!     root * /srv/www
//!     file_server
//! }
//! ```
//!
//! # Data Flow
//! ```text
//! text → tokenize (words, quoted strings, comments, line numbers)
//!      → Parser (directive tree: name, args, optional block)
//!      → parse_site / check_options (typed sites, validated options)
//!      → SiteFile::into_routes → RouteTable::new
//! ```
//!
//! Unknown directives are errors, never ignored.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::config::loader::ConfigError;
use crate::rewrite::HeaderRule;
use crate::routing::{BackendAddress, FilesystemRoot, Route, Target};

/// A parsed site file. The global options block is checked but only
/// carries settings that match the one mode served (plain HTTP/1.1).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SiteFile {
    pub sites: Vec<Site>,
}

/// One site block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    /// Lowercased host names from the address line. Ports are checked but
    /// do not take part in routing.
    pub hosts: Vec<String>,
    pub target: Target,
    pub headers: Vec<HeaderRule>,
}

impl SiteFile {
    /// One route per site address.
    pub fn into_routes(self) -> Vec<Route> {
        self.sites
            .into_iter()
            .flat_map(|site| {
                let Site { hosts, target, headers } = site;
                hosts
                    .into_iter()
                    .map(move |host| Route::new(host, target.clone(), headers.clone()))
            })
            .collect()
    }
}

/// Parse site file text.
pub fn parse(input: &str) -> Result<SiteFile, ConfigError> {
    let tokens = tokenize(input)?;
    let directives = Parser { tokens, pos: 0 }.block(None)?;

    let mut site_file = SiteFile::default();
    for (index, directive) in directives.into_iter().enumerate() {
        if directive.name.is("{") {
            if index != 0 {
                return Err(syntax(directive.name.line, "global options block must come first"));
            }
            check_options(directive)?;
        } else {
            site_file.sites.push(parse_site(directive)?);
        }
    }
    Ok(site_file)
}

fn syntax(line: usize, message: impl Into<String>) -> ConfigError {
    ConfigError::Syntax {
        line,
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    line: usize,
    /// Differs from `line` only for quoted strings spanning lines.
    end_line: usize,
    quoted: bool,
}

impl Token {
    /// True for an unquoted token with exactly this text.
    fn is(&self, text: &str) -> bool {
        !self.quoted && self.text == text
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConfigError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                while chars.next_if(|&c| c != '\n').is_some() {}
            }
            '"' => {
                let start = line;
                let mut text = String::new();
                chars.next();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next_if(|&c| c == '"' || c == '\\') {
                            Some(escaped) => text.push(escaped),
                            None => text.push('\\'),
                        },
                        Some('\n') => {
                            line += 1;
                            text.push('\n');
                        }
                        Some(c) => text.push(c),
                        None => return Err(syntax(start, "unterminated quoted string")),
                    }
                }
                tokens.push(Token {
                    text,
                    line: start,
                    end_line: line,
                    quoted: true,
                });
            }
            _ => {
                let mut text = String::new();
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    text.push(c);
                }
                tokens.push(Token {
                    text,
                    line,
                    end_line: line,
                    quoted: false,
                });
            }
        }
    }
    Ok(tokens)
}

/// A line of tokens, optionally followed by a `{ ... }` block.
#[derive(Debug)]
struct Directive {
    name: Token,
    args: Vec<Token>,
    block: Option<Vec<Directive>>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// Directives up to the `}` closing a block opened on `opened_at`, or
    /// to end of input at top level.
    fn block(&mut self, opened_at: Option<usize>) -> Result<Vec<Directive>, ConfigError> {
        let mut directives = Vec::new();
        loop {
            let Some(token) = self.peek() else {
                return match opened_at {
                    Some(line) => Err(syntax(line, "block is never closed")),
                    None => Ok(directives),
                };
            };
            if token.is("}") {
                let line = token.line;
                self.pos += 1;
                return match opened_at {
                    Some(_) => Ok(directives),
                    None => Err(syntax(line, "unexpected `}`")),
                };
            }
            directives.push(self.directive()?);
        }
    }

    fn directive(&mut self) -> Result<Directive, ConfigError> {
        let name = self.tokens[self.pos].clone();
        let line = name.line;
        self.pos += 1;

        if name.is("{") {
            let block = self.block(Some(line))?;
            return Ok(Directive {
                name,
                args: Vec::new(),
                block: Some(block),
            });
        }

        // A directive continues on the line its last token ended on.
        let mut last_line = name.end_line;
        let mut args = Vec::new();
        while let Some(token) = self.peek() {
            if token.line != last_line || token.is("}") {
                break;
            }
            if token.is("{") {
                self.pos += 1;
                let block = self.block(Some(line))?;
                return Ok(Directive {
                    name,
                    args,
                    block: Some(block),
                });
            }
            last_line = token.end_line;
            args.push(token.clone());
            self.pos += 1;
        }
        Ok(Directive {
            name,
            args,
            block: None,
        })
    }
}

fn no_block(directive: &Directive) -> Result<(), ConfigError> {
    match directive.block {
        Some(_) => Err(syntax(
            directive.name.line,
            format!("`{}` does not take a block", directive.name.text),
        )),
        None => Ok(()),
    }
}

fn check_options(directive: Directive) -> Result<(), ConfigError> {
    option_entries(directive.block.unwrap_or_default(), false)
}

fn option_entries(entries: Vec<Directive>, in_servers: bool) -> Result<(), ConfigError> {
    for entry in entries {
        let line = entry.name.line;
        match entry.name.text.as_str() {
            "protocols" => {
                no_block(&entry)?;
                if entry.args.is_empty() {
                    return Err(syntax(line, "protocols needs at least one protocol"));
                }
                for arg in &entry.args {
                    if arg.text != "h1" {
                        return Err(syntax(
                            arg.line,
                            format!("protocol `{}` is not supported; only h1 is served", arg.text),
                        ));
                    }
                }
            }
            "servers" if !in_servers => {
                if !entry.args.is_empty() {
                    return Err(syntax(line, "per-listener server options are not supported"));
                }
                let block = entry
                    .block
                    .ok_or_else(|| syntax(line, "servers needs a `{` block"))?;
                option_entries(block, true)?;
            }
            name @ ("admin" | "auto_https") if !in_servers => {
                no_block(&entry)?;
                match entry.args.as_slice() {
                    [value] if value.text == "off" => {}
                    _ => return Err(syntax(line, format!("only `{} off` is supported", name))),
                }
            }
            name => {
                return Err(ConfigError::UnknownDirective {
                    line,
                    name: name.to_string(),
                })
            }
        }
    }
    Ok(())
}

fn parse_site(directive: Directive) -> Result<Site, ConfigError> {
    let line = directive.name.line;
    let hosts = site_hosts(&directive)?;
    let body = directive
        .block
        .ok_or_else(|| syntax(line, "site address must be followed by a `{` block"))?;

    let mut upstream = None;
    let mut root = None;
    let mut file_server = false;
    let mut headers = Vec::new();

    for entry in body {
        let entry_line = entry.name.line;
        match entry.name.text.as_str() {
            "reverse_proxy" => {
                no_block(&entry)?;
                if upstream.is_some() {
                    return Err(syntax(entry_line, "reverse_proxy declared twice"));
                }
                upstream = match entry.args.as_slice() {
                    [to] => Some(parse_upstream(to)?),
                    [] => return Err(syntax(entry_line, "reverse_proxy needs an upstream address")),
                    _ => return Err(syntax(entry_line, "reverse_proxy takes exactly one upstream")),
                };
            }
            "root" => {
                no_block(&entry)?;
                if root.is_some() {
                    return Err(syntax(entry_line, "root declared twice"));
                }
                let path = match entry.args.as_slice() {
                    [path] => path,
                    [matcher, path] if matcher.is("*") => path,
                    _ => return Err(syntax(entry_line, "usage: root [*] <path>")),
                };
                root = Some(PathBuf::from(&path.text));
            }
            "file_server" => {
                no_block(&entry)?;
                match entry.args.first() {
                    None => file_server = true,
                    Some(arg) if arg.text == "browse" => {
                        return Err(syntax(entry_line, "directory browsing is not supported"))
                    }
                    Some(arg) => {
                        return Err(syntax(
                            entry_line,
                            format!("unexpected file_server argument `{}`", arg.text),
                        ))
                    }
                }
            }
            "header" => header_rules(&entry, &mut headers)?,
            name => {
                return Err(ConfigError::UnknownDirective {
                    line: entry_line,
                    name: name.to_string(),
                })
            }
        }
    }

    let target = match (upstream, root, file_server) {
        (Some(backend), None, false) => Target::Backend(backend),
        (None, Some(path), true) => Target::Static(FilesystemRoot::new(path)),
        (None, Some(_), false) => return Err(syntax(line, "root is set but file_server is missing")),
        (None, None, true) => return Err(syntax(line, "file_server needs a root")),
        (None, None, false) => return Err(syntax(line, "site has neither reverse_proxy nor file_server")),
        (Some(_), _, _) => return Err(syntax(line, "reverse_proxy cannot be combined with root or file_server")),
    };

    Ok(Site { hosts, target, headers })
}

fn site_hosts(directive: &Directive) -> Result<Vec<String>, ConfigError> {
    let mut hosts = Vec::new();
    let mut seen = HashSet::new();
    for token in std::iter::once(&directive.name).chain(&directive.args) {
        for part in token.text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let host = parse_address(part, token.line)?;
            if !seen.insert(host.clone()) {
                return Err(ConfigError::DuplicateHost(host));
            }
            hosts.push(host);
        }
    }
    if hosts.is_empty() {
        return Err(syntax(directive.name.line, "site block has no address"));
    }
    Ok(hosts)
}

/// Host part of a site address, after checking scheme and port.
fn parse_address(raw: &str, line: usize) -> Result<String, ConfigError> {
    let lower = raw.to_ascii_lowercase();
    let rest = if let Some(rest) = lower.strip_prefix("http://") {
        rest
    } else if lower.starts_with("https://") {
        return Err(syntax(line, format!("`{}`: https sites need TLS, which is not terminated here", raw)));
    } else if lower.contains("://") {
        return Err(syntax(line, format!("`{}`: unsupported scheme", raw)));
    } else {
        lower.as_str()
    };

    if rest.contains('/') {
        return Err(syntax(line, format!("`{}`: site addresses cannot have a path", raw)));
    }
    if rest.contains('*') {
        return Err(syntax(line, format!("`{}`: wildcard hosts are not supported", raw)));
    }

    let (host, _port) = split_host_port(rest, line)?;
    let host = host.strip_suffix('.').unwrap_or(host);
    if host.is_empty() {
        return Err(syntax(line, format!("`{}`: site address needs a host name", raw)));
    }
    Ok(host.to_string())
}

fn parse_upstream(token: &Token) -> Result<BackendAddress, ConfigError> {
    let raw = token.text.as_str();
    let rest = raw.strip_prefix("http://").unwrap_or(raw);
    if rest.contains("://") {
        return Err(syntax(token.line, format!("`{}`: only plain http upstreams are supported", raw)));
    }
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    if rest.contains('/') {
        return Err(syntax(token.line, format!("`{}`: upstream address cannot have a path", raw)));
    }

    let (host, port) = split_host_port(rest, token.line)?;
    let port = port.ok_or_else(|| ConfigError::InvalidPort {
        line: token.line,
        value: raw.to_string(),
    })?;
    let host = match host.trim_start_matches('[').trim_end_matches(']') {
        "" => "localhost",
        host => host,
    };
    Ok(BackendAddress::new(host, port))
}

fn split_host_port(raw: &str, line: usize) -> Result<(&str, Option<u16>), ConfigError> {
    if raw.starts_with('[') {
        let end = raw
            .find(']')
            .ok_or_else(|| syntax(line, format!("`{}`: unclosed `[`", raw)))?;
        let (host, tail) = raw.split_at(end + 1);
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host, Some(parse_port(port, line)?))),
            None if tail.is_empty() => Ok((host, None)),
            None => Err(syntax(line, format!("`{}`: unexpected text after `]`", raw))),
        };
    }

    match raw.rsplit_once(':') {
        Some((host, port)) => Ok((host, Some(parse_port(port, line)?))),
        None => Ok((raw, None)),
    }
}

fn parse_port(raw: &str, line: usize) -> Result<u16, ConfigError> {
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ConfigError::InvalidPort {
            line,
            value: raw.to_string(),
        }),
    }
}

fn header_rules(directive: &Directive, rules: &mut Vec<HeaderRule>) -> Result<(), ConfigError> {
    let line = directive.name.line;
    match (&directive.block, directive.args.as_slice()) {
        (Some(block), []) => {
            for entry in block {
                if entry.block.is_some() {
                    return Err(syntax(entry.name.line, "header rules cannot open a block"));
                }
                rules.push(header_rule(&entry.name, &entry.args)?);
            }
            Ok(())
        }
        (None, [field, values @ ..]) => {
            rules.push(header_rule(field, values)?);
            Ok(())
        }
        (None, []) => Err(syntax(line, "header needs a rule or a `{` block")),
        (Some(_), _) => Err(syntax(line, "header matchers are not supported")),
    }
}

fn header_rule(field: &Token, values: &[Token]) -> Result<HeaderRule, ConfigError> {
    let value = match values {
        [] => None,
        [value] => Some(value.text.as_str()),
        _ => {
            return Err(ConfigError::InvalidHeader {
                line: field.line,
                message: format!("`{}` takes a single value; quote values containing spaces", field.text),
            })
        }
    };
    HeaderRule::parse(&field.text, value).map_err(|e| ConfigError::InvalidHeader {
        line: field.line,
        message: e.to_string(),
    })
}

//! Connection, server and table configuration.
//!
//! Configuration reaches the bridge in two shapes: a TOML file (used by the
//! command-line tool) or the `key = value` option lists the host engine keeps
//! on foreign servers, user mappings and foreign tables. Both produce the same
//! typed structs, with the defaults documented on each field.

use crate::api::{BridgeError, Result};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_USER: &str = "default";
pub const DEFAULT_DATABASE: &str = "default";
pub const DEFAULT_CLIENT_NAME: &str = "clickhouse-fdw";

/// Independent socket timeouts for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// TCP connect plus handshake. Default: 10 seconds
    #[serde(rename = "connect_timeout", deserialize_with = "duration_secs")]
    pub connect: Duration,
    /// Each socket write. Default: 300 seconds
    #[serde(rename = "send_timeout", deserialize_with = "duration_secs")]
    pub send: Duration,
    /// Each socket read, including the wait for the next block. Default: 300 seconds
    #[serde(rename = "receive_timeout", deserialize_with = "duration_secs")]
    pub receive: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            send: Duration::from_secs(300),
            receive: Duration::from_secs(300),
        }
    }
}

fn duration_secs<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

/// Everything needed to open a connection to the remote engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Default database for unqualified table names.
    pub database: String,
    /// Client identifier reported to the remote in the handshake.
    pub client_name: String,
    /// Compress data blocks in both directions.
    pub compression: bool,
    #[serde(flatten)]
    pub timeouts: Timeouts,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: String::new(),
            database: DEFAULT_DATABASE.to_string(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            compression: false,
            timeouts: Timeouts::default(),
        }
    }
}

impl ConnectionParams {
    /// Parses connection parameters from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BridgeError::InvalidOption(e.to_string()))
    }

    /// Loads connection parameters from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::InvalidOption(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Builds connection parameters from foreign-server options overlaid with
    /// user-mapping options. Options that are not connection settings are
    /// ignored here; `validate_options` is where unknown names are rejected.
    pub fn from_options(server: &[(String, String)], user_mapping: &[(String, String)]) -> Result<Self> {
        let mut params = Self::default();
        for (name, value) in server.iter().chain(user_mapping.iter()) {
            match name.as_str() {
                "host" => params.host = value.clone(),
                "port" => params.port = parse_value(name, value)?,
                "user" => params.user = value.clone(),
                "password" => params.password = value.clone(),
                "dbname" | "database" => params.database = value.clone(),
                "client_name" => params.client_name = value.clone(),
                "compression" => params.compression = parse_bool(name, value)?,
                "connect_timeout" => params.timeouts.connect = parse_secs(name, value)?,
                "send_timeout" => params.timeouts.send = parse_secs(name, value)?,
                "receive_timeout" => params.timeouts.receive = parse_secs(name, value)?,
                _ => {}
            }
        }
        Ok(params)
    }

    /// `host:port`, for log lines and EXPLAIN output.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Planner and execution tuning kept on the foreign server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    /// Cost charged once per scan for connecting and shipping the query. Default: 100
    pub fdw_startup_cost: f64,
    /// Cost charged per row transferred. Default: 0.01
    pub fdw_tuple_cost: f64,
    /// Read the next block on a background thread while the current one drains.
    pub prefetch: bool,
    /// Ask the remote for `count()` when sizing relations.
    pub use_remote_estimate: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            fdw_startup_cost: 100.0,
            fdw_tuple_cost: 0.01,
            prefetch: false,
            use_remote_estimate: false,
        }
    }
}

impl ServerOptions {
    pub fn from_options(options: &[(String, String)]) -> Result<Self> {
        let mut parsed = Self::default();
        for (name, value) in options {
            match name.as_str() {
                "fdw_startup_cost" => parsed.fdw_startup_cost = parse_cost(name, value)?,
                "fdw_tuple_cost" => parsed.fdw_tuple_cost = parse_cost(name, value)?,
                "prefetch" => parsed.prefetch = parse_bool(name, value)?,
                "use_remote_estimate" => parsed.use_remote_estimate = parse_bool(name, value)?,
                _ => {}
            }
        }
        Ok(parsed)
    }
}

/// Per-table options mapping a foreign table to its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    /// Remote database; falls back to the connection's database when unset.
    pub database: Option<String>,
    /// Remote table name. Default: the local table name
    pub table: String,
    /// Columns that identify a row for UPDATE and DELETE.
    pub key_columns: Vec<String>,
    /// Overrides the server-level `use_remote_estimate` when set.
    pub use_remote_estimate: Option<bool>,
}

impl TableOptions {
    pub fn from_options(local_name: &str, options: &[(String, String)]) -> Result<Self> {
        let mut parsed = Self {
            database: None,
            table: local_name.to_string(),
            key_columns: Vec::new(),
            use_remote_estimate: None,
        };
        for (name, value) in options {
            match name.as_str() {
                "database" | "dbname" => parsed.database = Some(value.clone()),
                "table" | "table_name" => parsed.table = value.clone(),
                "key_columns" => {
                    parsed.key_columns = value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                }
                "use_remote_estimate" => parsed.use_remote_estimate = Some(parse_bool(name, value)?),
                _ => {}
            }
        }
        Ok(parsed)
    }
}

/// Catalog object an option list is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionContext {
    Wrapper,
    Server,
    UserMapping,
    Table,
}

impl OptionContext {
    fn allowed(&self) -> &'static [&'static str] {
        match self {
            OptionContext::Wrapper => &[],
            OptionContext::Server => &[
                "host",
                "port",
                "dbname",
                "database",
                "client_name",
                "compression",
                "connect_timeout",
                "send_timeout",
                "receive_timeout",
                "fdw_startup_cost",
                "fdw_tuple_cost",
                "prefetch",
                "use_remote_estimate",
            ],
            OptionContext::UserMapping => &["user", "password"],
            OptionContext::Table => &[
                "database",
                "dbname",
                "table",
                "table_name",
                "key_columns",
                "use_remote_estimate",
            ],
        }
    }
}

/// Rejects unknown option names and values that do not parse.
pub fn validate_options(context: OptionContext, options: &[(String, String)]) -> Result<()> {
    let allowed = context.allowed();
    for (name, value) in options {
        if !allowed.contains(&name.as_str()) {
            let hint = if allowed.is_empty() {
                "no options are supported here".to_string()
            } else {
                format!("valid options are: {}", allowed.join(", "))
            };
            return Err(BridgeError::InvalidOption(format!(
                "invalid option \"{}\" ({})",
                name, hint
            )));
        }
        match name.as_str() {
            "port" => {
                parse_value::<u16>(name, value)?;
            }
            "compression" | "prefetch" | "use_remote_estimate" => {
                parse_bool(name, value)?;
            }
            "connect_timeout" | "send_timeout" | "receive_timeout" => {
                parse_secs(name, value)?;
            }
            "fdw_startup_cost" | "fdw_tuple_cost" => {
                parse_cost(name, value)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        BridgeError::InvalidOption(format!("invalid value for \"{}\": \"{}\"", name, value))
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(BridgeError::InvalidOption(format!(
            "\"{}\" requires a boolean value, got \"{}\"",
            name, value
        ))),
    }
}

fn parse_secs(name: &str, value: &str) -> Result<Duration> {
    parse_value::<u64>(name, value).map(Duration::from_secs)
}

fn parse_cost(name: &str, value: &str) -> Result<f64> {
    let cost: f64 = parse_value(name, value)?;
    if !cost.is_finite() || cost < 0.0 {
        return Err(BridgeError::InvalidOption(format!(
            "\"{}\" requires a non-negative number, got \"{}\"",
            name, value
        )));
    }
    Ok(cost)
}

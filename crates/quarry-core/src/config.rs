//! Connection configuration
//!
//! A [`PropertyBag`] holds the raw string properties supplied at startup
//! (TOML file, environment, or code). [`ConnectionSettings::resolve`]
//! validates them once and derives everything the engine needs to open.

use crate::errors::{ExError, ExErrorKind, Result};
use quarry_core_types::Sensitive;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const KEY_DIALECT: &str = "db";
pub const KEY_HOST: &str = "db.host";
pub const KEY_SCHEMA: &str = "db.schema";
pub const KEY_USER: &str = "db.user";
pub const KEY_PASSWORD: &str = "db.passwd";
pub const KEY_POOL: &str = "db.conpool";
pub const KEY_POOL_SIZE: &str = "db.pool.size";
pub const KEY_BUSY_TIMEOUT_MS: &str = "db.busy_timeout_ms";
pub const KEY_SCHEMA_DIRS: &str = "db.schema.dirs";

/// Environment variables recognised by [`PropertyBag::with_env`]
pub const ENV_KEYS: &[(&str, &str)] = &[
    ("QUARRY_DB", KEY_DIALECT),
    ("QUARRY_DB_HOST", KEY_HOST),
    ("QUARRY_DB_SCHEMA", KEY_SCHEMA),
    ("QUARRY_DB_USER", KEY_USER),
    ("QUARRY_DB_PASSWD", KEY_PASSWORD),
    ("QUARRY_DB_CONPOOL", KEY_POOL),
    ("QUARRY_DB_POOL_SIZE", KEY_POOL_SIZE),
    ("QUARRY_DB_BUSY_TIMEOUT_MS", KEY_BUSY_TIMEOUT_MS),
    ("QUARRY_DB_SCHEMA_DIRS", KEY_SCHEMA_DIRS),
];

const DEFAULT_POOL_SIZE: u32 = 4;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// String key/value bag of startup properties
///
/// Built once, then only read. Layering (file, then environment) produces a
/// new bag rather than mutating one in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    props: BTreeMap<String, String>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a bag with `key` set to `value`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Return a bag where every key of `other` overrides this one
    pub fn overlay(mut self, other: PropertyBag) -> Self {
        self.props.extend(other.props);
        self
    }

    /// Parse the `[db]` table of a TOML document
    ///
    /// # Errors
    ///
    /// Returns a Configuration error if the document is not valid TOML, the
    /// `[db]` table has fields of the wrong type, or a schema directory
    /// cannot be listed in a path variable.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text).map_err(|e| {
            ExError::new(ExErrorKind::Configuration)
                .with_op("parse_config")
                .with_message(e.to_string())
        })?;
        file.db.into_bag()
    }

    /// Read and parse a TOML configuration file
    ///
    /// # Errors
    ///
    /// Returns an Io error if the file cannot be read, or a Configuration
    /// error if it cannot be parsed.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExError::new(ExErrorKind::Io)
                .with_op("read_config")
                .with_message(format!("{}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Build a bag from `QUARRY_DB*` variables in the given iterator
    pub fn from_env_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut bag = PropertyBag::new();
        for (name, value) in vars {
            if let Some((_, key)) = ENV_KEYS.iter().find(|(env, _)| *env == name.as_ref()) {
                bag = bag.with(*key, value);
            }
        }
        bag
    }

    /// Overlay `QUARRY_DB*` variables from the process environment
    pub fn with_env(self) -> Self {
        let env = Self::from_env_vars(std::env::vars());
        self.overlay(env)
    }

    fn require(&self, key: &str) -> Result<&str> {
        match self.get(key).map(str::trim) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(ExError::new(ExErrorKind::Configuration)
                .with_op("resolve_settings")
                .with_message(format!("missing required property '{}'", key))),
        }
    }

    fn parse_number<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key).map(str::trim) {
            None | Some("") => Ok(default),
            Some(raw) => raw.parse().map_err(|_| {
                ExError::new(ExErrorKind::Configuration)
                    .with_op("resolve_settings")
                    .with_message(format!("property '{}' is not a number: '{}'", key, raw))
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    db: DbSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DbSection {
    dialect: Option<String>,
    host: Option<String>,
    schema: Option<String>,
    user: Option<String>,
    passwd: Option<String>,
    conpool: Option<String>,
    pool_size: Option<u32>,
    busy_timeout_ms: Option<u64>,
    #[serde(default)]
    schema_dirs: Vec<PathBuf>,
}

impl DbSection {
    fn into_bag(self) -> Result<PropertyBag> {
        let mut bag = PropertyBag::new();
        let pairs = [
            (KEY_DIALECT, self.dialect),
            (KEY_HOST, self.host),
            (KEY_SCHEMA, self.schema),
            (KEY_USER, self.user),
            (KEY_PASSWORD, self.passwd),
            (KEY_POOL, self.conpool),
            (KEY_POOL_SIZE, self.pool_size.map(|n| n.to_string())),
            (KEY_BUSY_TIMEOUT_MS, self.busy_timeout_ms.map(|n| n.to_string())),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                bag = bag.with(key, value);
            }
        }
        if !self.schema_dirs.is_empty() {
            let joined = std::env::join_paths(&self.schema_dirs).map_err(|e| {
                ExError::new(ExErrorKind::Configuration)
                    .with_op("parse_config")
                    .with_message(format!("schema_dirs: {}", e))
            })?;
            bag = bag.with(KEY_SCHEMA_DIRS, joined.to_string_lossy().into_owned());
        }
        Ok(bag)
    }
}

/// SQL dialect spoken by the persistence engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
}

impl Dialect {
    /// Look up a dialect by its configured name (case-insensitive)
    ///
    /// # Errors
    ///
    /// Returns an UnknownDialect error for names no bundled engine speaks.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(ExError::new(ExErrorKind::UnknownDialect)
                .with_op("resolve_settings")
                .with_message(format!("unsupported database dialect '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Driver implementing this dialect
    pub fn driver(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "rusqlite",
        }
    }

    /// Connection URL template with `<HOST>` and `<SCHEMA>` placeholders
    pub fn url_template(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "<HOST>/<SCHEMA>.db",
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection pool provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolProvider {
    /// A fresh connection per session
    Default,
    /// Connections drawn from an r2d2 pool
    R2d2,
}

impl PoolProvider {
    /// # Errors
    ///
    /// Returns a Configuration error for unknown provider names.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Ok(PoolProvider::Default),
            "r2d2" => Ok(PoolProvider::R2d2),
            other => Err(ExError::new(ExErrorKind::Configuration)
                .with_op("resolve_settings")
                .with_message(format!("unknown connection pool provider '{}'", other))),
        }
    }
}

/// Validated connection parameters derived from a [`PropertyBag`]
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub dialect: Dialect,
    pub url: String,
    pub host: String,
    pub schema: String,
    pub user: Option<String>,
    pub password: Sensitive<String>,
    pub pool: PoolProvider,
    pub pool_size: u32,
    pub busy_timeout: Duration,
    pub schema_dirs: Vec<PathBuf>,
}

impl ConnectionSettings {
    /// Validate the bag and derive connection settings
    ///
    /// # Errors
    ///
    /// Returns a Configuration-category error when a required property is
    /// missing, the dialect or pool provider is unknown, or a numeric
    /// property does not parse.
    pub fn resolve(props: &PropertyBag) -> Result<Self> {
        let dialect = Dialect::parse(props.require(KEY_DIALECT)?)?;
        let host = props.require(KEY_HOST)?.to_string();
        let schema = props.require(KEY_SCHEMA)?.to_string();
        let url = dialect
            .url_template()
            .replace("<HOST>", &host)
            .replace("<SCHEMA>", &schema);

        let pool = PoolProvider::parse(props.get(KEY_POOL).unwrap_or_default())?;
        let pool_size = props.parse_number(KEY_POOL_SIZE, DEFAULT_POOL_SIZE)?;
        if pool_size == 0 {
            return Err(ExError::new(ExErrorKind::Configuration)
                .with_op("resolve_settings")
                .with_message(format!("property '{}' must be positive", KEY_POOL_SIZE)));
        }
        let busy_timeout_ms = props.parse_number(KEY_BUSY_TIMEOUT_MS, DEFAULT_BUSY_TIMEOUT_MS)?;

        let schema_dirs = props
            .get(KEY_SCHEMA_DIRS)
            .map(|raw| std::env::split_paths(raw).filter(|p| !p.as_os_str().is_empty()).collect())
            .unwrap_or_default();

        Ok(Self {
            dialect,
            url,
            host,
            schema,
            user: props.get(KEY_USER).filter(|u| !u.is_empty()).map(str::to_string),
            password: Sensitive::new(props.get(KEY_PASSWORD).unwrap_or_default().to_string()),
            pool,
            pool_size,
            busy_timeout: Duration::from_millis(busy_timeout_ms),
            schema_dirs,
        })
    }
}

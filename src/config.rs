//! Configuration resolution.
//!
//! The effective [`Config`] is built from four layers, highest precedence
//! first: command-line flags, `GREETD_*` environment variables, the JSON
//! configuration document, and built-in defaults. A missing document is
//! written out with the defaults so it can be discovered and edited; a
//! malformed one is an error and is never rewritten.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::persistence::{read_json, write_json_atomic};

pub const APP_NAME: &str = "greetd";
pub const ENV_PREFIX: &str = "GREETD";
pub const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// Errors raised while resolving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// An environment variable held a value that could not be interpreted.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

impl From<crate::Error> for ConfigError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::Io { path, source } => ConfigError::Io { path, source },
            crate::Error::Parse { path, source } => ConfigError::Parse { path, source },
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    #[value(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

/// The fully merged configuration of one process invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LogConfig,
    pub data_path: PathBuf,
}

impl Config {
    /// Built-in defaults with the given data directory.
    pub fn with_data_path<P: Into<PathBuf>>(data_path: P) -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
            },
            logging: LogConfig {
                level: LogLevel::default(),
                format: LogFormat::default(),
            },
            data_path: data_path.into(),
        }
    }

    /// `<home>/.greetd`, or `./.greetd` when no home directory is known.
    pub fn default_data_path() -> PathBuf {
        home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(format!(".{APP_NAME}"))
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_path.join(CONFIG_FILE)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Writes this configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        write_json_atomic(path, self).map_err(ConfigError::from)
    }

    /// Replaces every field that `overrides` supplies.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(host) = &overrides.host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }
        if let Some(path) = overrides.data_path.as_deref().filter(|p| !p.as_os_str().is_empty()) {
            self.data_path = expand_home(path);
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_path(Self::default_data_path())
    }
}

/// A sparse set of configuration values. `None` leaves the lower layer alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<LogLevel>,
    pub log_format: Option<LogFormat>,
    pub data_path: Option<PathBuf>,
}

impl Overrides {
    /// Reads the `GREETD_*` variables. Empty variables are ignored.
    pub fn from_env<E: EnvSource + ?Sized>(env: &E) -> Result<Self, ConfigError> {
        let get = |field: &str| {
            let key = format!("{ENV_PREFIX}_{field}");
            env.var(&key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key, v))
        };

        Ok(Self {
            host: get("SERVER_HOST").map(|(_, v)| v),
            port: get("SERVER_PORT").map(parse_var).transpose()?,
            log_level: get("LOGGING_LEVEL").map(parse_var).transpose()?,
            log_format: get("LOGGING_FORMAT").map(parse_var).transpose()?,
            data_path: get("DATA_PATH").map(|(_, v)| PathBuf::from(v)),
        })
    }
}

fn parse_var<T: FromStr>((key, value): (String, String)) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

/// Shape of the configuration document. Every field may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileLayer {
    server: ServerLayer,
    logging: LoggingLayer,
    data_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerLayer {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingLayer {
    level: Option<LogLevel>,
    format: Option<LogFormat>,
}

impl From<FileLayer> for Overrides {
    fn from(file: FileLayer) -> Self {
        Self {
            host: file.server.host,
            port: file.server.port,
            log_level: file.logging.level,
            log_format: file.logging.format,
            data_path: file.data_path.filter(|p| !p.as_os_str().is_empty()),
        }
    }
}

/// Source of environment variables.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Merges defaults, the configuration document, the environment and flags.
pub struct ConfigResolver<E = ProcessEnv> {
    defaults: Config,
    env: E,
}

impl ConfigResolver<ProcessEnv> {
    pub fn new() -> Self {
        Self::with_defaults(Config::default(), ProcessEnv)
    }
}

impl Default for ConfigResolver<ProcessEnv> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EnvSource> ConfigResolver<E> {
    pub fn with_defaults(defaults: Config, env: E) -> Self {
        Self { defaults, env }
    }

    pub fn defaults(&self) -> &Config {
        &self.defaults
    }

    /// Produces the effective configuration.
    ///
    /// The document is read from `explicit_path` when given, otherwise from
    /// `config.json` in the data directory. That directory is the one named by
    /// the flags or the environment if either sets it, else the default.
    pub fn resolve(
        &self,
        explicit_path: Option<&Path>,
        flags: &Overrides,
    ) -> Result<Config, ConfigError> {
        let env = Overrides::from_env(&self.env)?;

        let bootstrap_dir = flags
            .data_path
            .as_deref()
            .or(env.data_path.as_deref())
            .map(expand_home)
            .unwrap_or_else(|| self.defaults.data_path.clone());
        ensure_dir(&bootstrap_dir)?;

        let path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| bootstrap_dir.join(CONFIG_FILE));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }

        if !path.exists() {
            self.defaults.save(&path)?;
            log::info!("Wrote default configuration to {}", path.display());
        }

        let file: FileLayer = read_json(&path)?.unwrap_or_default();

        let mut config = self.defaults.clone();
        config.apply(&file.into());
        config.apply(&env);
        config.apply(flags);

        ensure_dir(&config.data_path)?;
        Ok(config)
    }
}

fn ensure_dir(dir: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn home_dir() -> Option<PathBuf> {
    directories::UserDirs::new().map(|d| d.home_dir().to_path_buf())
}

/// Expands a leading `~` to the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

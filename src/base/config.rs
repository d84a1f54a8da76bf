//! Load configuration via `config` crate with env-override support.

use std::{
    collections::BTreeSet,
    fmt,
    ops::Deref,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use serde::{Deserialize, Deserializer};

use super::types::Res;

/// The kChat hard limit on post length.
pub const HARD_MESSAGE_SIZE_LIMIT: usize = 16383;

/// Default chunk size, leaving room for the backticks added when a fenced block is split.
pub const DEFAULT_MESSAGE_SIZE_LIMIT: usize = 16377;

/// Default backend name.
fn default_backend() -> String {
    "kChat".to_string()
}

/// Default plugin callback order (a single null entry).
fn default_plugins_callback_order() -> CallbackOrder {
    CallbackOrder(vec![None])
}

/// Default data directory.
fn default_bot_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Default command prefix.
fn default_bot_prefix() -> String {
    "!".to_string()
}

fn default_message_size_limit() -> usize {
    DEFAULT_MESSAGE_SIZE_LIMIT
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_port() -> u16 {
    443
}

/// Default websocket heartbeat interval (and HTTP timeout), in seconds.
fn default_timeout() -> u64 {
    30
}

/// Configuration for the kchat-bot application.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigInner {
    /// Storage backend selector (`STORAGE`).
    #[serde(default)]
    pub storage: StorageKind,
    /// Plugin callback ordering (`PLUGINS_CALLBACK_ORDER`).
    #[serde(default = "default_plugins_callback_order")]
    pub plugins_callback_order: CallbackOrder,
    /// Directory for bot state (`BOT_DATA_DIR`).
    #[serde(default = "default_bot_data_dir")]
    pub bot_data_dir: PathBuf,
    /// Extra plugin directory (`BOT_EXTRA_PLUGIN_DIR`).
    #[serde(default)]
    pub bot_extra_plugin_dir: Option<PathBuf>,
    /// Extra backend directory (`BOT_EXTRA_BACKEND_DIR`).
    #[serde(default)]
    pub bot_extra_backend_dir: Option<PathBuf>,
    /// Logging verbosity (`BOT_LOG_LEVEL`).
    #[serde(default)]
    pub bot_log_level: LogLevel,
    /// Optional log file (`BOT_LOG_FILE`).
    #[serde(default)]
    pub bot_log_file: Option<PathBuf>,
    /// Chat backend implementation name (`BACKEND`).
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Usernames granted administrative commands (`BOT_ADMINS`).
    #[serde(default)]
    pub bot_admins: BTreeSet<String>,
    /// Command prefix (`BOT_PREFIX`).
    #[serde(default = "default_bot_prefix")]
    pub bot_prefix: String,
    /// Maximum size of a single outgoing post (`MESSAGE_SIZE_LIMIT`).
    #[serde(default = "default_message_size_limit")]
    pub message_size_limit: usize,
    /// Connection credentials for the kChat server (`BOT_IDENTITY`).
    pub bot_identity: BotIdentity,
}

/// Connection credentials and transport options for the kChat server.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BotIdentity {
    /// Team name the bot operates in.
    pub team: String,
    /// Server host, e.g. `my-team.kchat.infomaniak.com`.
    pub server: String,
    /// Websocket endpoint.
    pub websocket_url: String,
    /// Personal access token.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub mfa_token: Option<String>,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Skip TLS certificate verification.
    #[serde(default)]
    pub insecure: bool,
    /// Heartbeat interval and HTTP timeout, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// Storage backend selector.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    #[default]
    Memory,
    Shelf,
}

/// Ordered plugin names; `None` stands for every plugin not otherwise named.
///
/// TOML has no null, so `*` (or `none`/`null`) is read as the null entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOrder(pub Vec<Option<String>>);

impl<'de> Deserialize<'de> for CallbackOrder {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<Option<String>>::deserialize(deserializer)?;

        let entries = raw
            .into_iter()
            .map(|entry| match entry {
                Some(name) if matches!(name.trim().to_ascii_lowercase().as_str(), "*" | "none" | "null" | "") => None,
                Some(name) => Some(name.trim().to_string()),
                None => None,
            })
            .collect();

        Ok(CallbackOrder(entries))
    }
}

/// Logging verbosity, accepting the usual level names case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_tracing(&self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warning => tracing::Level::WARN,
            LogLevel::Error | LogLevel::Critical => tracing::Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Res<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" | "FATAL" => Ok(LogLevel::Critical),
            other => Err(anyhow::anyhow!("Unknown log level `{other}`.")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        };

        f.write_str(name)
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl BotIdentity {
    /// Whether a personal access token is configured.
    pub fn has_token(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether both a login and a password are configured.
    pub fn has_credentials(&self) -> bool {
        self.login.as_deref().is_some_and(|l| !l.is_empty()) && self.password.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Base URL of the REST API.
    pub fn api_url(&self) -> String {
        format!("{}://{}:{}/api/v4", self.scheme, self.server, self.port)
    }

    /// Permalink to a post.
    pub fn permalink(&self, post_id: &str) -> String {
        format!("{}://{}:{}/{}/pl/{}", self.scheme, self.server, self.port, self.team, post_id)
    }
}

impl Config {
    pub fn load(explicit_path: Option<&Path>) -> Res<Self> {
        let mut cfg = config::Config::builder();

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        cfg = cfg.add_source(
            config::Environment::with_prefix("KCHAT_BOT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("bot_admins")
                .with_list_parse_key("plugins_callback_order"),
        );

        Self::from_inner(cfg.build()?.try_deserialize()?)
    }

    /// Parses a TOML document without consulting the environment.
    pub fn from_toml(toml: &str) -> Res<Self> {
        let cfg = config::Config::builder().add_source(config::File::from_str(toml, config::FileFormat::Toml)).build()?;

        Self::from_inner(cfg.try_deserialize()?)
    }

    /// Normalizes and validates a deserialized configuration.
    pub fn from_inner(mut inner: ConfigInner) -> Res<Self> {
        let identity = &mut inner.bot_identity;

        identity.server = identity.server.trim_start_matches("https://").trim_start_matches("http://").trim_end_matches('/').to_string();
        identity.websocket_url = identity.websocket_url.trim_end_matches('/').to_string();

        if !inner.backend.eq_ignore_ascii_case("kchat") {
            return Err(anyhow::anyhow!("Unsupported backend `{}`; only `kChat` is available.", inner.backend));
        }

        if identity.team.is_empty() {
            return Err(anyhow::anyhow!("`bot_identity.team` must be set."));
        }

        if identity.server.is_empty() {
            return Err(anyhow::anyhow!("`bot_identity.server` must be set."));
        }

        if identity.websocket_url.is_empty() {
            return Err(anyhow::anyhow!("`bot_identity.websocket_url` must be set."));
        }

        if !identity.has_token() && !identity.has_credentials() {
            return Err(anyhow::anyhow!("Either `bot_identity.token` or `bot_identity.login` and `bot_identity.password` must be set."));
        }

        if inner.message_size_limit < 1 || inner.message_size_limit > HARD_MESSAGE_SIZE_LIMIT {
            return Err(anyhow::anyhow!("Message size limit must be between 1 and {HARD_MESSAGE_SIZE_LIMIT}."));
        }

        Ok(Config { inner: Arc::new(inner) })
    }

    /// Whether `username` (with or without a leading `@`) is a bot admin.
    pub fn is_admin(&self, username: &str) -> bool {
        let username = username.trim_start_matches('@');
        self.bot_admins.iter().any(|admin| admin.trim_start_matches('@') == username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [bot_identity]
        team = "my-team"
        server = "https://my-team.kchat.infomaniak.com/"
        websocket_url = "wss://websocket.kchat.infomaniak.com/"
        token = "secret"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert_eq!(config.backend, "kChat");
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.plugins_callback_order, CallbackOrder(vec![None]));
        assert_eq!(config.bot_log_level, LogLevel::Info);
        assert_eq!(config.message_size_limit, DEFAULT_MESSAGE_SIZE_LIMIT);
        assert_eq!(config.bot_identity.port, 443);
        assert_eq!(config.bot_identity.timeout, 30);
        assert_eq!(config.bot_identity.server, "my-team.kchat.infomaniak.com");
        assert_eq!(config.bot_identity.websocket_url, "wss://websocket.kchat.infomaniak.com");
        assert_eq!(config.bot_identity.api_url(), "https://my-team.kchat.infomaniak.com:443/api/v4");
    }

    #[test]
    fn full_config_parses() {
        let toml = r#"
            storage = "Memory"
            plugins_callback_order = ["commands", "*"]
            bot_data_dir = "/var/lib/bot"
            bot_log_level = "debug"
            backend = "KCHAT"
            bot_admins = ["@admin", "root"]

            [bot_identity]
            team = "t"
            server = "s"
            websocket_url = "w"
            login = "bot"
            password = "pw"
        "#;

        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.plugins_callback_order, CallbackOrder(vec![Some("commands".into()), None]));
        assert_eq!(config.bot_log_level, LogLevel::Debug);
        assert!(config.is_admin("admin"));
        assert!(config.is_admin("@root"));
        assert!(!config.is_admin("mallory"));
    }

    #[test]
    fn rejects_missing_credentials() {
        let toml = r#"
            [bot_identity]
            team = "t"
            server = "s"
            websocket_url = "w"
        "#;

        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn rejects_empty_credentials() {
        let toml = r#"
            [bot_identity]
            team = "t"
            server = "s"
            websocket_url = "w"
            token = ""
            login = "bot@example.com"
            password = ""
        "#;

        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn accepts_login_and_password() {
        let toml = r#"
            [bot_identity]
            team = "t"
            server = "s"
            websocket_url = "w"
            login = "bot@example.com"
            password = "hunter2"
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert!(config.bot_identity.has_credentials());
        assert!(!config.bot_identity.has_token());
    }

    #[test]
    fn rejects_other_backends() {
        let toml = format!("backend = \"Slack\"\n{MINIMAL}");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn rejects_oversized_message_limit() {
        let toml = format!("message_size_limit = 20000\n{MINIMAL}");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("CRITICAL".parse::<LogLevel>().unwrap().as_tracing(), tracing::Level::ERROR);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}

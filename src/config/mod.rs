use clap::Parser;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod duration;
mod entries;

pub use duration::parse_duration;
pub use entries::read_entries;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

pub const ALLOWED_METHODS: [&str; 9] = [
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "CONNECT", "TRACE",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("url is required")]
    MissingUrl,
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),
    #[error("max_goroutines must be at least 1")]
    InvalidConcurrency,
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
    #[error("duration must be non-negative, got {0:?}")]
    NegativeDuration(String),
    #[error("user agent {0:?} is not a valid header value")]
    InvalidUserAgent(String),
    #[error("unknown log level {0:?}")]
    InvalidLogLevel(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Command-line flags. Every value is optional so that flags given on the
/// command line can be layered over a config file.
#[derive(Debug, Default, Parser)]
#[command(name = "volley", version, about = "HTTP load generator with SOCKS5 proxy rotation")]
pub struct Cli {
    /// TOML file with default values for any of the flags below
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// URL address of target to send requests to
    #[arg(long)]
    pub url: Option<String>,

    /// HTTP method to use
    #[arg(long)]
    pub method: Option<String>,

    /// Delay between requests (e.g. "100ms"); 0 disables pacing
    #[arg(long, value_parser = parse_duration)]
    pub delay: Option<Duration>,

    /// Limit of concurrently running requests
    #[arg(long = "max_goroutines", alias = "concurrency")]
    pub max_goroutines: Option<usize>,

    /// Timeout for each request
    #[arg(long = "request_timeout", value_parser = parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Total duration of execution; 0 runs until interrupted
    #[arg(long = "exec_time", value_parser = parse_duration)]
    pub exec_time: Option<Duration>,

    /// User-agent used for requests
    #[arg(long = "user_agent")]
    pub user_agent: Option<String>,

    /// Path to file with list of user agents, one per line
    #[arg(long = "user_agents_list")]
    pub user_agents_list: Option<PathBuf>,

    /// Path to file with list of SOCKS5 proxies (host:port), one per line
    #[arg(long = "proxy_list")]
    pub proxy_list: Option<PathBuf>,

    /// Connect timeout used when validating proxies
    #[arg(long = "proxy_timeout", value_parser = parse_duration)]
    pub proxy_timeout: Option<Duration>,

    /// Countdown before starting, in seconds
    #[arg(long = "starting_timeout")]
    pub starting_timeout: Option<u64>,

    /// Log level
    #[arg(long)]
    pub lvl: Option<String>,

    /// Enable human-readable logging
    #[arg(long)]
    pub pretty: bool,

    /// Skip certificate verification for direct connections
    #[arg(long)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub url: String,
    pub method: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub delay: Duration,
    pub max_goroutines: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub exec_time: Duration,
    pub user_agent: String,
    pub user_agents_list: Option<PathBuf>,
    pub proxy_list: Option<PathBuf>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub proxy_timeout: Duration,
    pub starting_timeout: u64,
    pub lvl: String,
    pub pretty: bool,
    pub insecure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "GET".to_string(),
            delay: Duration::ZERO,
            max_goroutines: 10,
            request_timeout: Duration::from_secs(10),
            exec_time: Duration::ZERO,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            user_agents_list: None,
            proxy_list: None,
            proxy_timeout: Duration::from_secs(5),
            starting_timeout: 3,
            lvl: "info".to_string(),
            pretty: false,
            insecure: false,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the effective config: the file named by `--config` (or the
    /// defaults), with every flag present on the command line applied on top.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(cli);
        config.method = config.method.to_uppercase();
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, cli: Cli) {
        if let Some(url) = cli.url {
            self.url = url;
        }
        if let Some(method) = cli.method {
            self.method = method;
        }
        if let Some(delay) = cli.delay {
            self.delay = delay;
        }
        if let Some(max_goroutines) = cli.max_goroutines {
            self.max_goroutines = max_goroutines;
        }
        if let Some(request_timeout) = cli.request_timeout {
            self.request_timeout = request_timeout;
        }
        if let Some(exec_time) = cli.exec_time {
            self.exec_time = exec_time;
        }
        if let Some(user_agent) = cli.user_agent {
            self.user_agent = user_agent;
        }
        if cli.user_agents_list.is_some() {
            self.user_agents_list = cli.user_agents_list;
        }
        if cli.proxy_list.is_some() {
            self.proxy_list = cli.proxy_list;
        }
        if let Some(proxy_timeout) = cli.proxy_timeout {
            self.proxy_timeout = proxy_timeout;
        }
        if let Some(starting_timeout) = cli.starting_timeout {
            self.starting_timeout = starting_timeout;
        }
        if let Some(lvl) = cli.lvl {
            self.lvl = lvl;
        }
        self.pretty |= cli.pretty;
        self.insecure |= cli.insecure;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        let parsed = url::Url::parse(&self.url).map_err(|e| ConfigError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidUrl {
                url: self.url.clone(),
                reason: "missing host".to_string(),
            });
        }
        if !ALLOWED_METHODS.contains(&self.method.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidMethod(self.method.clone()));
        }
        if self.max_goroutines < 1 {
            return Err(ConfigError::InvalidConcurrency);
        }
        log_directive(&self.lvl)?;
        Ok(())
    }
}

/// Maps a log level name to an `EnvFilter` directive.
pub fn log_directive(level: &str) -> Result<&'static str, ConfigError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" | "fatal" | "panic" => Ok("error"),
        "disabled" | "off" => Ok("off"),
        _ => Err(ConfigError::InvalidLogLevel(level.to_string())),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
    }
}

//! Daemon address, counter options and the optional TOML config file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use pigpio_wire::{DEFAULT_HOST, DEFAULT_PORT};
use serde::Deserialize;

use crate::error::ConfigError;

/// Environment variable holding the daemon host, as read by the C client library.
pub const ADDR_ENV: &str = "PIGPIO_ADDR";

/// Environment variable holding the daemon port.
pub const PORT_ENV: &str = "PIGPIO_PORT";

// ============================================================================
// Daemon Configuration
// ============================================================================

/// Where and how to reach the pigpio daemon.
///
/// # Example
///
/// ```rust
/// use pigpio_count_core::DaemonConfig;
/// use std::time::Duration;
///
/// let config = DaemonConfig {
///     host: "raspberrypi.local".to_string(),
///     request_timeout: Duration::from_millis(500),
///     ..Default::default()
/// };
/// assert_eq!(config.address(), "raspberrypi.local:8888");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Host name or IP address of the daemon.
    pub host: String,

    /// TCP port of the daemon.
    pub port: u16,

    /// Upper bound for opening a session (both sockets plus handshake).
    pub connect_timeout: Duration,

    /// Upper bound for a single command round trip.
    pub request_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(2),
        }
    }
}

impl DaemonConfig {
    /// Builds a config from `PIGPIO_ADDR` and `PIGPIO_PORT`.
    ///
    /// Unset or empty variables fall back to `localhost` and `8888`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup(ADDR_ENV).filter(|h| !h.trim().is_empty()) {
            config.host = host.trim().to_string();
        }

        if let Some(port) = lookup(PORT_ENV).filter(|p| !p.trim().is_empty()) {
            config.port = parse_port(&port)?;
        }

        Ok(config)
    }

    /// `host:port` string used for connecting and in messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Overrides fields present in a `[daemon]` table.
    pub fn apply(&mut self, table: &DaemonTable) {
        if let Some(host) = &table.host {
            self.host = host.clone();
        }
        if let Some(port) = table.port {
            self.port = port;
        }
        if let Some(ms) = table.connect_timeout_ms {
            self.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = table.request_timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
    }
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidPort(value.to_string())),
        Ok(port) => Ok(port),
    }
}

// ============================================================================
// Counter Options
// ============================================================================

/// Which transitions count as a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    /// Low to high.
    #[default]
    Rising,
    /// High to low.
    Falling,
    /// Both directions.
    #[serde(alias = "both")]
    Either,
}

impl Edge {
    /// Returns true if a transition to `high` qualifies.
    pub fn matches(self, high: bool) -> bool {
        match self {
            Edge::Rising => high,
            Edge::Falling => !high,
            Edge::Either => true,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Either => "either",
        };
        f.write_str(name)
    }
}

impl FromStr for Edge {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rising" => Ok(Edge::Rising),
            "falling" => Ok(Edge::Falling),
            "either" | "both" => Ok(Edge::Either),
            _ => Err(ConfigError::InvalidEdge(s.to_string())),
        }
    }
}

/// Per-counter registration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterOptions {
    /// Transitions to count.
    pub edge: Edge,

    /// Minimum time a level must hold before the daemon reports it.
    ///
    /// `None` leaves the pin's filter as the daemon has it.
    pub glitch_filter: Option<Duration>,
}

impl CounterOptions {
    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edge = edge;
        self
    }

    #[must_use]
    pub fn with_glitch_filter(mut self, steady: Duration) -> Self {
        self.glitch_filter = Some(steady);
        self
    }

    /// Glitch filter in whole microseconds, saturating at `u32::MAX`.
    pub fn glitch_filter_us(&self) -> Option<u32> {
        self.glitch_filter
            .map(|d| u32::try_from(d.as_micros()).unwrap_or(u32::MAX))
    }
}

// ============================================================================
// Config File
// ============================================================================

/// Optional `[daemon]` table of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonTable {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

/// One `[[counter]]` entry of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CounterEntry {
    pub pin: u32,
    #[serde(default)]
    pub edge: Edge,
    pub glitch_filter_us: Option<u32>,
}

impl CounterEntry {
    pub fn options(&self) -> CounterOptions {
        CounterOptions {
            edge: self.edge,
            glitch_filter: self
                .glitch_filter_us
                .map(|us| Duration::from_micros(u64::from(us))),
        }
    }
}

/// Contents of a counter config file.
///
/// ```toml
/// [daemon]
/// host = "raspberrypi.local"
///
/// [[counter]]
/// pin = 21
///
/// [[counter]]
/// pin = 23
/// edge = "either"
/// glitch_filter_us = 100
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountConfig {
    #[serde(default)]
    pub daemon: DaemonTable,

    #[serde(default, rename = "counter")]
    pub counters: Vec<CounterEntry>,
}

impl CountConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads and parses a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// `<config_dir>/pigpio-count/config.toml`, if a config directory exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pigpio-count").join("config.toml"))
    }

    /// Loads the file at [`default_path`](Self::default_path) if it exists.
    pub fn load_default() -> Result<Option<Self>, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).map(Some),
            _ => Ok(None),
        }
    }
}

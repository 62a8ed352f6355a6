use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_WATCHDOG_TIMEOUT_MS: u64 = 4000;
const DEFAULT_RUNTIME_PORT: u16 = 4545;
const DEFAULT_READ_BUFFER_BYTES: usize = 8192;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

// ─── WatchdogConfig ──────────────────────────────────────────────────────────

/// Watchdog configuration (`[watchdog]` in supervisor.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// How long a task may run before the supervisor aborts it
    /// (milliseconds). Default: 4000. Also bounds how long a replacing
    /// `start` waits for the incumbent process to exit.
    pub timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WATCHDOG_TIMEOUT_MS,
        }
    }
}

impl WatchdogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ─── RuntimeConfig ───────────────────────────────────────────────────────────

/// Child-process runtime configuration (`[runtime]` in supervisor.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Value exported as `PORT` to every spawned task, so repeated runs
    /// bind the same port. Default: 4545.
    pub port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_RUNTIME_PORT,
        }
    }
}

// ─── OutputConfig ────────────────────────────────────────────────────────────

/// Output streaming configuration (`[output]` in supervisor.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Read buffer size per child stream (bytes). One `TaskOutput` event is
    /// emitted per read, so this caps the chunk size. Default: 8192.
    pub read_buffer_bytes: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
        }
    }
}

// ─── EventsConfig ────────────────────────────────────────────────────────────

/// Event bus configuration (`[events]` in supervisor.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity. Slow subscribers past this lag are
    /// dropped by the channel, not blocked on. Default: 1024.
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

// ─── SupervisorConfig ────────────────────────────────────────────────────────

/// Top-level supervisor configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub watchdog: WatchdogConfig,
    pub runtime: RuntimeConfig,
    pub output: OutputConfig,
    pub events: EventsConfig,
}

impl SupervisorConfig {
    /// Load from a TOML file. A missing file yields defaults with a warning;
    /// an unparseable file is an error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "no supervisor config file — using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        info!(
            path = %path.display(),
            watchdog_ms = config.watchdog.timeout_ms,
            port = config.runtime.port,
            "loaded supervisor config"
        );
        Ok(config)
    }
}

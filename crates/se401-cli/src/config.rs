use anyhow::{Context, Result};
use se401_core::SessionConfig;
use se401_hw::registers::BULK_SIZE;
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Bytes per replayed bulk chunk (default: 4096).
    pub chunk_size: usize,
    /// Frame sizes the simulated bridge advertises.
    pub sensor_sizes: Vec<(u16, u16)>,
    /// Optional TOML file with session parameters.
    pub session_config: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `SE401_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let sensor_sizes = std::env::var("SE401_SENSOR_SIZES")
            .ok()
            .and_then(|v| parse_sizes(&v))
            .unwrap_or_else(|| vec![(352, 288), (176, 144), (88, 72)]);

        Self {
            chunk_size: env_usize("SE401_CHUNK_SIZE", BULK_SIZE),
            sensor_sizes,
            session_config: std::env::var("SE401_SESSION_CONFIG")
                .ok()
                .map(PathBuf::from),
        }
    }

    /// Session parameters from the configured TOML file, or defaults.
    pub fn session(&self) -> Result<SessionConfig> {
        let Some(path) = &self.session_config else {
            return Ok(SessionConfig::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Parse `352x288,176x144`.
pub fn parse_sizes(s: &str) -> Option<Vec<(u16, u16)>> {
    s.split(',')
        .map(|item| {
            let (w, h) = item.trim().split_once('x')?;
            Some((w.parse().ok()?, h.parse().ok()?))
        })
        .collect()
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct CtlConfig {
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    /// Delay between polls of a watched state, in milliseconds.
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bytes per row in hex dumps.
    #[serde(default = "defaults::dump_width")]
    pub dump_width: usize,
    /// How often `set` retries after losing an optimistic commit.
    #[serde(default = "defaults::set_retries")]
    pub set_retries: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn log_level() -> String {
        "info".into()
    }

    pub fn poll_interval_ms() -> u64 {
        250
    }

    pub fn dump_width() -> usize {
        16
    }

    pub fn set_retries() -> u32 {
        8
    }
}

impl Default for CtlConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            poll_interval_ms: defaults::poll_interval_ms(),
            dump_width: defaults::dump_width(),
            set_retries: defaults::set_retries(),
        }
    }
}

impl CtlConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: CtlConfig = toml::from_str(&text)?;
        Ok(config)
    }
}

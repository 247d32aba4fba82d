use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{
    Result,
    error::WorkbenchErr,
    snapshot::{MAX_ZOOM_BLOCK, MIN_ZOOM_BLOCK},
    training_log::DEFAULT_DELIMITER,
};

pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// User preferences passed into a session at construction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub storage_dir: PathBuf,
    /// Poller cadence, in whole seconds in JSON.
    #[serde(with = "seconds")]
    pub refresh_interval: Duration,
    pub zoom_block: usize,
    pub disable_locking: bool,
    #[serde(with = "delimiter")]
    pub log_delimiter: u8,
    pub persist_optimizer: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("storage"),
            refresh_interval: MIN_REFRESH_INTERVAL,
            zoom_block: 1,
            disable_locking: false,
            log_delimiter: DEFAULT_DELIMITER,
            persist_optimizer: false,
        }
    }
}

impl SessionConfig {
    /// Loads a `SessionConfig` from a JSON file.
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `WorkbenchErr::Io` if the file cannot be read and
    /// `WorkbenchErr::InvalidConfig` if it does not parse or is out of range.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WorkbenchErr::Io(std::io::Error::new(
                e.kind(),
                format!("cannot read '{}': {e}", path.display()),
            ))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `WorkbenchErr::InvalidConfig` naming the first field out of range.
    pub fn validate(&self) -> Result<()> {
        validate_refresh_interval(self.refresh_interval)?;
        validate_zoom_block(self.zoom_block)
    }
}

pub fn validate_refresh_interval(interval: Duration) -> Result<()> {
    if (MIN_REFRESH_INTERVAL..=MAX_REFRESH_INTERVAL).contains(&interval) {
        Ok(())
    } else {
        Err(WorkbenchErr::InvalidConfig(format!(
            "refresh_interval must lie in {}..={} s, got {:?}",
            MIN_REFRESH_INTERVAL.as_secs(),
            MAX_REFRESH_INTERVAL.as_secs(),
            interval
        )))
    }
}

pub fn validate_zoom_block(zoom_block: usize) -> Result<()> {
    if (MIN_ZOOM_BLOCK..=MAX_ZOOM_BLOCK).contains(&zoom_block) {
        Ok(())
    } else {
        Err(WorkbenchErr::InvalidConfig(format!(
            "zoom_block must lie in {MIN_ZOOM_BLOCK}..={MAX_ZOOM_BLOCK}, got {zoom_block}"
        )))
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod delimiter {
    use serde::{Deserialize, Deserializer, de::Error};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_bytes() {
            [b] if b.is_ascii() && *b != b'"' && *b != b'\n' => Ok(*b),
            _ => Err(D::Error::custom(format!(
                "log_delimiter must be one ASCII character, got {s:?}"
            ))),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to open config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OsConfig {
    /// Number of event slots reserved by the mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Wait applied by [`crate::OtaOs::send_event`]. Zero never blocks.
    #[serde(default = "default_send_timeout", with = "duration_ms")]
    pub send_timeout: Duration,

    /// Idle poll of the agent loop.
    #[serde(default = "default_receive_timeout", with = "duration_ms")]
    pub receive_timeout: Duration,

    /// Thread name of the dedicated timer worker.
    #[serde(default = "default_timer_worker_name")]
    pub timer_worker_name: String,
}

impl Default for OsConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            send_timeout: default_send_timeout(),
            receive_timeout: default_receive_timeout(),
            timer_worker_name: default_timer_worker_name(),
        }
    }
}

impl OsConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mailbox_capacity must be greater than 0".to_string(),
            ));
        }
        if self.timer_worker_name.is_empty() {
            return Err(ConfigError::Invalid(
                "timer_worker_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl FromStr for OsConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

fn default_mailbox_capacity() -> usize {
    10
}
fn default_send_timeout() -> Duration {
    Duration::ZERO
}
fn default_receive_timeout() -> Duration {
    Duration::from_millis(1000)
}
fn default_timer_worker_name() -> String {
    "ota-timer".to_string()
}

mod duration_ms {
    use serde::{ser::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis())
            .map_err(|_| S::Error::custom("duration exceeds u64 milliseconds"))?;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_dispatch::SweeperConfig;

use crate::error::{JournalError, JournalResult};

/// Configuration for a [`Journal`](crate::Journal).
///
/// Every field has a default, so a TOML document only needs the keys it
/// changes:
///
/// ```toml
/// confirmation_expiration_ms = 500
///
/// [stream]
/// flow_rate = 50
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// How often the confirmation sweeper looks for expired dispatchables.
    pub check_confirmation_expiration_interval_ms: u64,
    /// Age after which an unconfirmed dispatchable is redelivered.
    pub confirmation_expiration_ms: u64,
    /// Bound of the queue in front of the writer task.
    pub writer_channel_capacity: usize,
    /// Defaults for streams created by `stream_all`.
    pub stream: StreamConfig,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            check_confirmation_expiration_interval_ms: 1000,
            confirmation_expiration_ms: 1000,
            writer_channel_capacity: 1024,
            stream: StreamConfig::default(),
        }
    }
}

impl JournalConfig {
    pub fn from_toml_str(source: &str) -> JournalResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| JournalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> JournalResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| JournalError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> JournalResult<()> {
        if self.check_confirmation_expiration_interval_ms == 0 {
            return Err(JournalError::Config(
                "check_confirmation_expiration_interval_ms must be greater than zero".into(),
            ));
        }
        if self.writer_channel_capacity == 0 {
            return Err(JournalError::Config(
                "writer_channel_capacity must be greater than zero".into(),
            ));
        }
        self.stream.validate()
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            check_interval: Duration::from_millis(self.check_confirmation_expiration_interval_ms),
            confirmation_expiration: Duration::from_millis(self.confirmation_expiration_ms),
        }
    }
}

/// Tuning of an [`EntryReaderStream`](crate::EntryReaderStream).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Capacity of the buffer between producer and consumer. When full, the
    /// newest element is dropped.
    pub buffer_size: usize,
    /// Maximum entries pulled from the reader per batch.
    pub flow_rate: usize,
    /// Pause before polling again after the reader came back empty.
    pub probe_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            flow_rate: 100,
            probe_interval_ms: 5,
        }
    }
}

impl StreamConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn validate(&self) -> JournalResult<()> {
        if self.buffer_size == 0 {
            return Err(JournalError::Config(
                "stream.buffer_size must be greater than zero".into(),
            ));
        }
        if self.flow_rate == 0 {
            return Err(JournalError::Config(
                "stream.flow_rate must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = JournalConfig::default();
        assert_eq!(config.check_confirmation_expiration_interval_ms, 1000);
        assert_eq!(config.confirmation_expiration_ms, 1000);
        assert_eq!(config.stream.buffer_size, 256);
        assert_eq!(config.stream.flow_rate, 100);
        assert_eq!(config.sweeper(), SweeperConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = JournalConfig::from_toml_str(
            r#"
            confirmation_expiration_ms = 250

            [stream]
            flow_rate = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.confirmation_expiration_ms, 250);
        assert_eq!(config.check_confirmation_expiration_interval_ms, 1000);
        assert_eq!(config.stream.flow_rate, 10);
        assert_eq!(config.stream.buffer_size, 256);
        assert_eq!(
            config.sweeper().confirmation_expiration,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(
            JournalConfig::from_toml_str("").unwrap(),
            JournalConfig::default()
        );
    }

    #[test]
    fn zero_values_are_rejected() {
        let error =
            JournalConfig::from_toml_str("check_confirmation_expiration_interval_ms = 0").unwrap_err();
        assert!(matches!(error, JournalError::Config(_)));

        let error = JournalConfig::from_toml_str("[stream]\nbuffer_size = 0").unwrap_err();
        assert!(matches!(error, JournalError::Config(msg) if msg.contains("buffer_size")));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let error = JournalConfig::from_toml_str("writer_channel_capacity = \"many\"").unwrap_err();
        assert!(matches!(error, JournalError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "writer_channel_capacity = 8").unwrap();
        writeln!(file, "[stream]").unwrap();
        writeln!(file, "probe_interval_ms = 20").unwrap();

        let config = JournalConfig::from_path(file.path()).unwrap();
        assert_eq!(config.writer_channel_capacity, 8);
        assert_eq!(config.stream.probe_interval(), Duration::from_millis(20));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let error = JournalConfig::from_path(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(error, JournalError::Config(_)));
    }
}

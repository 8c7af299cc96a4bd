pub mod settings;

use serde::{Deserialize, Serialize};

/// Core broker configuration.
///
/// Only the knobs consumed by this crate live here; network, security, and
/// cluster settings belong to the layers above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub data_dir: String,
    pub journal_dir: String,

    /// Timed-buffer capacity; writes reaching it flush immediately.
    pub journal_buffer_size: usize,
    /// Flush deadline counted from the first queued write.
    pub journal_buffer_timeout_ms: u64,
    pub journal_log_write_rates: bool,
    pub journal_file_extension: String,

    /// Initial per-connection frame decoder buffer.
    pub frame_buffer_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            journal_dir: "./data/journal".to_string(),
            journal_buffer_size: 490 * 1024,
            journal_buffer_timeout_ms: 4,
            journal_log_write_rates: false,
            journal_file_extension: "dmq".to_string(),
            frame_buffer_size: 1024,
        }
    }
}

impl BrokerConfig {
    /// Validate configuration bounds before wiring anything up.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.journal_buffer_size == 0 {
            return Err("journal_buffer_size must be > 0".to_string());
        }
        if self.journal_buffer_timeout_ms == 0 {
            return Err("journal_buffer_timeout_ms must be > 0".to_string());
        }
        if self.journal_file_extension.is_empty() {
            return Err("journal_file_extension must not be empty".to_string());
        }
        if self.frame_buffer_size == 0 {
            return Err("frame_buffer_size must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BrokerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let config = BrokerConfig {
            journal_buffer_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub file_suffix: String,
    pub max_wait_ms: u64,
    pub stable_cycles: u32,
    pub poll_interval_ms: u64,
    pub lock_retry_count: u32,
    pub lock_retry_delay_ms: u64,
    pub size_probe_interval_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            file_suffix: ".csv".to_string(),
            max_wait_ms: 60_000,
            stable_cycles: 3,
            poll_interval_ms: 500,
            lock_retry_count: 3,
            lock_retry_delay_ms: 100,
            size_probe_interval_ms: 100,
        }
    }
}

impl DetectorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn size_probe_interval(&self) -> Duration {
        Duration::from_millis(self.size_probe_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lock_retry_count,
            Duration::from_millis(self.lock_retry_delay_ms),
        )
    }

    /// Upper bound on poll cycles for one session: the wait budget divided by
    /// the poll interval, but always at least one scan.
    pub fn max_cycles(&self) -> u64 {
        if self.poll_interval_ms == 0 {
            return 1;
        }
        (self.max_wait_ms / self.poll_interval_ms).max(1)
    }
}

pub fn load_config(path: Option<&std::path::Path>) -> Result<DetectorConfig> {
    let config = if let Some(config_path) = path {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

            toml::from_str::<DetectorConfig>(&contents)
                .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?
        } else {
            #[cfg(not(test))]
            tracing::warn!("Config file not found at {:?}, using defaults", config_path);
            DetectorConfig::default()
        }
    } else {
        #[cfg(not(test))]
        tracing::info!("No config path provided, using defaults");
        DetectorConfig::default()
    };

    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &DetectorConfig) -> Result<()> {
    if config.file_suffix.is_empty() {
        anyhow::bail!("file_suffix cannot be empty");
    }

    if config.poll_interval_ms == 0 {
        anyhow::bail!("poll_interval_ms must be greater than zero");
    }

    if config.max_wait_ms == 0 {
        anyhow::bail!("max_wait_ms must be greater than zero");
    }

    if config.stable_cycles == 0 {
        anyhow::bail!("stable_cycles must be at least 1");
    }

    if config.lock_retry_count == 0 {
        anyhow::bail!("lock_retry_count must be at least 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn arb_detector_config() -> impl Strategy<Value = DetectorConfig> {
        (
            "\\.[a-z]{1,5}",
            1_u64..600_000_u64,
            1_u32..20_u32,
            1_u64..10_000_u64,
            1_u32..10_u32,
            0_u64..1_000_u64,
            0_u64..1_000_u64,
        )
            .prop_map(
                |(
                    file_suffix,
                    max_wait_ms,
                    stable_cycles,
                    poll_interval_ms,
                    lock_retry_count,
                    lock_retry_delay_ms,
                    size_probe_interval_ms,
                )| DetectorConfig {
                    file_suffix,
                    max_wait_ms,
                    stable_cycles,
                    poll_interval_ms,
                    lock_retry_count,
                    lock_retry_delay_ms,
                    size_probe_interval_ms,
                },
            )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any valid configuration written as TOML loads back unchanged.
        #[test]
        fn prop_config_round_trip(config in arb_detector_config()) {
            let toml_string = toml::to_string(&config)
                .expect("Failed to serialize config to TOML");

            let mut temp_file = NamedTempFile::new()
                .expect("Failed to create temp file");
            temp_file.write_all(toml_string.as_bytes())
                .expect("Failed to write to temp file");
            temp_file.flush()
                .expect("Failed to flush temp file");

            let loaded_config = load_config(Some(temp_file.path()))
                .expect("Failed to load config from file");

            prop_assert_eq!(config, loaded_config);
        }

        /// The cycle bound never drops below one scan.
        #[test]
        fn prop_max_cycles_at_least_one(config in arb_detector_config()) {
            prop_assert!(config.max_cycles() >= 1);
        }
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let non_existent_path = PathBuf::from("/tmp/non_existent_batchwait_config_12345.toml");
        let config = load_config(Some(&non_existent_path)).expect("Should load defaults");
        assert_eq!(config, DetectorConfig::default());
    }

    #[test]
    fn test_no_config_path_uses_defaults() {
        let config = load_config(None).expect("Should load defaults");
        assert_eq!(config, DetectorConfig::default());
    }

    #[test]
    fn test_defaults_match_reference_timings() {
        let config = DetectorConfig::default();
        assert_eq!(config.file_suffix, ".csv");
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.max_wait(), Duration::from_secs(60));
        assert_eq!(config.stable_cycles, 3);
        assert_eq!(config.max_cycles(), 120);
        assert_eq!(config.retry_policy().max_attempts(), 3);
        assert_eq!(config.retry_policy().delay(), Duration::from_millis(100));
        assert_eq!(config.size_probe_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_max_cycles_with_wait_shorter_than_interval() {
        let config = DetectorConfig {
            max_wait_ms: 100,
            poll_interval_ms: 500,
            ..Default::default()
        };
        assert_eq!(config.max_cycles(), 1);
    }

    #[test]
    fn test_invalid_toml_syntax() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        temp_file
            .write_all(b"this is not valid TOML {{{")
            .expect("Failed to write");
        temp_file.flush().expect("Failed to flush");

        let result = load_config(Some(temp_file.path()));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("parse TOML"));
    }

    #[test]
    fn test_partial_config_with_defaults() {
        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let partial_toml = r#"
file_suffix = ".tsv"
poll_interval_ms = 250
"#;
        temp_file
            .write_all(partial_toml.as_bytes())
            .expect("Failed to write");
        temp_file.flush().expect("Failed to flush");

        let config = load_config(Some(temp_file.path())).expect("Should load partial config");

        assert_eq!(config.file_suffix, ".tsv");
        assert_eq!(config.poll_interval_ms, 250);

        assert_eq!(config.max_wait_ms, DetectorConfig::default().max_wait_ms);
        assert_eq!(
            config.stable_cycles,
            DetectorConfig::default().stable_cycles
        );
        assert_eq!(
            config.lock_retry_count,
            DetectorConfig::default().lock_retry_count
        );
    }

    #[test]
    fn test_validation_empty_suffix() {
        let config = DetectorConfig {
            file_suffix: String::new(),
            ..Default::default()
        };

        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("file_suffix"));
    }

    #[test]
    fn test_validation_zero_poll_interval() {
        let config = DetectorConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };

        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_validation_zero_max_wait() {
        let config = DetectorConfig {
            max_wait_ms: 0,
            ..Default::default()
        };

        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("max_wait_ms"));
    }

    #[test]
    fn test_validation_zero_stable_cycles() {
        let config = DetectorConfig {
            stable_cycles: 0,
            ..Default::default()
        };

        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("stable_cycles"));
    }

    #[test]
    fn test_validation_zero_lock_retry_count() {
        let config = DetectorConfig {
            lock_retry_count: 0,
            ..Default::default()
        };

        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("lock_retry_count"));
    }
}

//! Configuration for the sync engine.

use leadsync_protocol::FieldMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Maximum number of records the remote store accepts in one write call.
pub const MAX_BATCH_SIZE: usize = 500;

/// Configuration for a lead sync job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Custom field translation, including where the source id lives.
    pub field_map: FieldMap,
    /// Maximum operations per remote write call.
    pub batch_size: usize,
    /// Page size for remote range reads and cache scans.
    pub page_size: usize,
    /// Margin subtracted from refresh and dispatch timestamps to cover
    /// replication delay in the remote store.
    #[serde(with = "seconds")]
    pub refresh_overlap: Duration,
    /// Pause after every remote write call (zero = none).
    #[serde(with = "millis")]
    pub dispatch_delay: Duration,
    /// Whether the cache holds every lead. When false (for example because
    /// range reads skip inactive leads) unmatched candidates are looked up
    /// live by email before being classified as new.
    pub cache_complete: bool,
    /// How many times the post-dispatch check re-reads changed leads before
    /// flagging sent records as unconfirmed.
    pub post_check_attempts: u32,
    /// Pause between post-dispatch check attempts.
    #[serde(with = "millis")]
    pub post_check_delay: Duration,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new(field_map: FieldMap) -> Self {
        Self {
            field_map,
            batch_size: MAX_BATCH_SIZE,
            page_size: 500,
            refresh_overlap: Duration::from_secs(600),
            dispatch_delay: Duration::ZERO,
            cache_complete: true,
            post_check_attempts: 1,
            post_check_delay: Duration::from_secs(5),
        }
    }

    /// Parses a configuration from JSON, filling in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the values are invalid.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] describing the first invalid value.
    pub fn validate(&self) -> EngineResult<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(EngineError::Config(format!(
                "batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        if self.page_size == 0 {
            return Err(EngineError::Config("page_size must be positive".into()));
        }
        if self.post_check_attempts == 0 {
            return Err(EngineError::Config(
                "post_check_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Sets the write batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the read page size.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the refresh overlap margin.
    pub fn with_refresh_overlap(mut self, overlap: Duration) -> Self {
        self.refresh_overlap = overlap;
        self
    }

    /// Sets the pause after each write call.
    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }

    /// Declares whether the cache holds every lead.
    pub fn with_cache_complete(mut self, complete: bool) -> Self {
        self.cache_complete = complete;
        self
    }

    /// Sets the post-dispatch check attempts and the pause between them.
    pub fn with_post_check(mut self, attempts: u32, delay: Duration) -> Self {
        self.post_check_attempts = attempts;
        self.post_check_delay = delay;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(FieldMap::default())
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::default()
            .with_batch_size(50)
            .with_page_size(25)
            .with_refresh_overlap(Duration::from_secs(60))
            .with_cache_complete(false)
            .with_post_check(3, Duration::from_millis(10));

        assert_eq!(config.batch_size, 50);
        assert_eq!(config.page_size, 25);
        assert_eq!(config.refresh_overlap, Duration::from_secs(60));
        assert!(!config.cache_complete);
        assert_eq!(config.post_check_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_oversized_batches() {
        let config = SyncConfig::default().with_batch_size(MAX_BATCH_SIZE + 1);
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
        let config = SyncConfig::default().with_batch_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_json_fills_defaults() {
        let config = SyncConfig::from_json(
            r#"{
                "field_map": {
                    "foreign_key_property": "memberId",
                    "fields": {"memberId": "member_id_9f"}
                },
                "batch_size": 100,
                "refresh_overlap": 120,
                "dispatch_delay": 250
            }"#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 100);
        assert_eq!(config.page_size, 500);
        assert_eq!(config.refresh_overlap, Duration::from_secs(120));
        assert_eq!(config.dispatch_delay, Duration::from_millis(250));
        assert_eq!(config.field_map.foreign_key_system_name(), "member_id_9f");
        assert!(config.cache_complete);
    }

    #[test]
    fn from_json_validates() {
        assert!(SyncConfig::from_json(r#"{"post_check_attempts": 0}"#).is_err());
        assert!(SyncConfig::from_json("not json").is_err());
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the access engine.
//!
//! # Example
//!
//! ```
//! use tier_access::AccessEngineConfig;
//!
//! // Minimal config (uses defaults)
//! let config = AccessEngineConfig::default();
//! assert_eq!(config.max_redelivery_attempts, 3);
//! assert_eq!(config.default_id_field, "id");
//!
//! // Full config
//! let config = AccessEngineConfig {
//!     base_url: "https://api.example.com/".into(),
//!     cache_enabled: true,
//!     disk_enabled: false,
//!     cache_ttl_secs: Some(180),
//!     ..Default::default()
//! };
//! assert!(!config.disk_enabled);
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the access engine.
///
/// The value is handed to [`AccessEngine`](crate::AccessEngine) at
/// construction and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessEngineConfig {
    /// Base URL prepended to relative remote paths
    #[serde(default)]
    pub base_url: String,

    /// Global switch for the memory tier
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Global switch for the disk tier
    #[serde(default = "default_true")]
    pub disk_enabled: bool,

    /// Id field used when a request does not name one
    #[serde(default = "default_id_field")]
    pub default_id_field: String,

    /// Memory entries older than this are treated as misses (None = never expire)
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// SQLite file backing the disk tier
    #[serde(default = "default_disk_path")]
    pub disk_path: String,

    /// SQLite file backing the redelivery queue
    #[serde(default = "default_queue_path")]
    pub queue_path: String,

    /// Attempt ceiling for queued jobs
    #[serde(default = "default_max_redelivery_attempts")]
    pub max_redelivery_attempts: u32,

    /// Scheduler poll interval
    #[serde(default = "default_redelivery_poll_ms")]
    pub redelivery_poll_ms: u64,

    /// Max jobs claimed per scheduler pass
    #[serde(default = "default_redelivery_batch_size")]
    pub redelivery_batch_size: usize,

    /// Remote request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool { true }
fn default_id_field() -> String { "id".to_string() }
fn default_disk_path() -> String { "./tier_access_disk.db".to_string() }
fn default_queue_path() -> String { "./tier_access_queue.db".to_string() }
fn default_max_redelivery_attempts() -> u32 { 3 }
fn default_redelivery_poll_ms() -> u64 { 5_000 }
fn default_redelivery_batch_size() -> usize { 32 }
fn default_request_timeout_secs() -> u64 { 15 }

impl Default for AccessEngineConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            cache_enabled: default_true(),
            disk_enabled: default_true(),
            default_id_field: default_id_field(),
            cache_ttl_secs: None,
            disk_path: default_disk_path(),
            queue_path: default_queue_path(),
            max_redelivery_attempts: default_max_redelivery_attempts(),
            redelivery_poll_ms: default_redelivery_poll_ms(),
            redelivery_batch_size: default_redelivery_batch_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AccessEngineConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn redelivery_poll_interval(&self) -> Duration {
        Duration::from_millis(self.redelivery_poll_ms.max(1))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: AccessEngineConfig =
            serde_json::from_str(r#"{"base_url": "https://api.test/", "disk_enabled": false}"#).unwrap();

        assert_eq!(config.base_url, "https://api.test/");
        assert!(config.cache_enabled);
        assert!(!config.disk_enabled);
        assert_eq!(config.default_id_field, "id");
        assert_eq!(config.max_redelivery_attempts, 3);
        assert_eq!(config.cache_ttl(), None);
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let config = AccessEngineConfig {
            redelivery_poll_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.redelivery_poll_interval(), Duration::from_millis(1));
    }
}

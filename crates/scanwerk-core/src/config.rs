// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Persistent client settings, loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long device discovery listens for advertisements (milliseconds).
    pub discovery_timeout_ms: u64,
    /// Granularity at which discovery checks for cancellation (milliseconds).
    pub discovery_poll_ms: u64,
    /// Per-request HTTP timeout (milliseconds).
    pub request_timeout_ms: u64,
    /// How often a "page not ready" (HTTP 503) NextDocument reply is polled
    /// again before the job is failed.
    pub not_ready_retries: u32,
    /// Wait between "page not ready" polls (milliseconds).
    pub not_ready_delay_ms: u64,
    /// Accept self-signed certificates on `https` eSCL endpoints.  Most
    /// scanners ship one.
    pub accept_invalid_certs: bool,
    /// Directory scanned pages are written to.
    pub output_dir: PathBuf,
    /// File name prefix for scanned pages (`<prefix><index>.<ext>`).
    pub file_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: 5_000,
            discovery_poll_ms: 10,
            request_timeout_ms: 30_000,
            not_ready_retries: 10,
            not_ready_delay_ms: 1_000,
            accept_invalid_certs: true,
            output_dir: PathBuf::from("."),
            file_prefix: "scannedImage".into(),
        }
    }
}

impl ClientConfig {
    /// Load settings from a JSON file.  Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.discovery_poll_ms == 0 {
            return Err(ScanError::Config("discovery_poll_ms must be positive".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ScanError::Config("request_timeout_ms must be positive".into()));
        }
        if self.file_prefix.contains(['/', '\\']) {
            return Err(ScanError::Config(format!(
                "file_prefix '{}' must not contain path separators",
                self.file_prefix
            )));
        }
        Ok(())
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn discovery_poll(&self) -> Duration {
        Duration::from_millis(self.discovery_poll_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn not_ready_delay(&self) -> Duration {
        Duration::from_millis(self.not_ready_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanwerk.json");
        std::fs::write(&path, r#"{ "discovery_timeout_ms": 2500, "file_prefix": "page" }"#).unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.discovery_timeout(), Duration::from_millis(2500));
        assert_eq!(config.file_prefix, "page");
        assert_eq!(config.request_timeout_ms, ClientConfig::default().request_timeout_ms);
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanwerk.json");
        let config = ClientConfig {
            not_ready_retries: 2,
            accept_invalid_certs: false,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ClientConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn rejects_prefix_with_separator() {
        let config = ClientConfig {
            file_prefix: "../escape".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ScanError::Config(_))));
    }
}

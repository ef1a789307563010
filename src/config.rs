//! Configuration for the capture waterfall.
//!
//! Settings are loaded from `~/.config/shotfall/config.toml` when present;
//! every field has a default, so the file is optional. All values are timing
//! bounds. The waterfall never blocks indefinitely on an external actor, and
//! the bounds it uses live here so deployments on slow storage or slow
//! compositors can stretch them.

use log::{debug, warn};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TOOL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_INTERACTIVE_TOOL_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_PORTAL_RESPONSE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RAW_READY_WAIT_MS: u64 = 3_000;

/// Timing bounds for the capture waterfall.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WaterfallConfig {
    /// Max wait for a screenshot tool that acts without user interaction.
    pub tool_timeout_ms: u64,
    /// Max wait for a tool that presents its own region/window picker.
    pub interactive_tool_timeout_ms: u64,
    /// Max wait for the portal Response signal.
    pub portal_response_timeout_ms: u64,
    /// Max wait for the KWin raw-pixel pipe to reach `stride * height` bytes.
    /// The write may lag the method's return on slow storage.
    pub raw_ready_wait_ms: u64,
    /// Delay applied before the first backend attempt so window-state
    /// transitions (e.g. the caller minimizing itself) can settle.
    pub pre_capture_delay_ms: u64,
}

impl Default for WaterfallConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            interactive_tool_timeout_ms: DEFAULT_INTERACTIVE_TOOL_TIMEOUT_MS,
            portal_response_timeout_ms: DEFAULT_PORTAL_RESPONSE_TIMEOUT_MS,
            raw_ready_wait_ms: DEFAULT_RAW_READY_WAIT_MS,
            pre_capture_delay_ms: 0,
        }
    }
}

impl WaterfallConfig {
    /// Loads the config file, falling back to defaults when it is missing or
    /// malformed. A malformed file is reported but never fatal.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<WaterfallConfig>(&contents) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    config.validated()
                }
                Err(e) => {
                    warn!("Ignoring malformed config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Cannot read config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("shotfall").join("config.toml"))
    }

    /// Clamps timing values to sane ranges so a bad config cannot make the
    /// waterfall hang for hours or spin on a zero timeout.
    pub fn validated(mut self) -> Self {
        self.tool_timeout_ms = self.tool_timeout_ms.clamp(1_000, 120_000);
        self.interactive_tool_timeout_ms = self.interactive_tool_timeout_ms.clamp(5_000, 600_000);
        self.portal_response_timeout_ms = self.portal_response_timeout_ms.clamp(5_000, 600_000);
        self.raw_ready_wait_ms = self.raw_ready_wait_ms.clamp(500, 30_000);
        self.pre_capture_delay_ms = self.pre_capture_delay_ms.min(5_000);
        self
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn interactive_tool_timeout(&self) -> Duration {
        Duration::from_millis(self.interactive_tool_timeout_ms)
    }

    pub fn portal_response_timeout(&self) -> Duration {
        Duration::from_millis(self.portal_response_timeout_ms)
    }

    pub fn raw_ready_wait(&self) -> Duration {
        Duration::from_millis(self.raw_ready_wait_ms)
    }

    pub fn pre_capture_delay(&self) -> Option<Duration> {
        (self.pre_capture_delay_ms > 0).then(|| Duration::from_millis(self.pre_capture_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tiers() {
        let config = WaterfallConfig::default();
        assert_eq!(config.tool_timeout(), Duration::from_secs(10));
        assert_eq!(config.interactive_tool_timeout(), Duration::from_secs(60));
        assert_eq!(config.raw_ready_wait(), Duration::from_secs(3));
        assert!(config.pre_capture_delay().is_none());
    }

    #[test]
    fn validation_clamps_extremes() {
        let config = WaterfallConfig {
            tool_timeout_ms: 0,
            interactive_tool_timeout_ms: u64::MAX,
            portal_response_timeout_ms: 1,
            raw_ready_wait_ms: 0,
            pre_capture_delay_ms: 60_000,
        }
        .validated();
        assert_eq!(config.tool_timeout_ms, 1_000);
        assert_eq!(config.interactive_tool_timeout_ms, 600_000);
        assert_eq!(config.portal_response_timeout_ms, 5_000);
        assert_eq!(config.raw_ready_wait_ms, 500);
        assert_eq!(config.pre_capture_delay_ms, 5_000);
    }

    #[test]
    fn parses_partial_toml() {
        let config: WaterfallConfig = toml::from_str("raw_ready_wait_ms = 8000").unwrap();
        assert_eq!(config.raw_ready_wait_ms, 8_000);
        assert_eq!(config.tool_timeout_ms, DEFAULT_TOOL_TIMEOUT_MS);
    }
}

//! Configuration types for the viewbridge runtime.
//!
//! This module provides the options an environment is created with, the per-browser
//! creation options, and the browser settings block.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Overrides the call timeout, in milliseconds
pub const ENV_CALL_TIMEOUT_MS: &str = "VIEWBRIDGE_CALL_TIMEOUT_MS";
/// Overrides the user data folder
pub const ENV_USER_DATA_FOLDER: &str = "VIEWBRIDGE_USER_DATA_FOLDER";

/// Engine environment configuration.
///
/// Controls where the engine runtime is found and how the owner thread behaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentOptions {
    /// Folder containing the engine runtime; `None` uses the installed runtime.
    pub browser_executable_folder: Option<PathBuf>,

    /// Profile / user data directory.
    pub user_data_folder: Option<PathBuf>,

    /// Extra command line arguments passed to the engine.
    pub additional_arguments: Option<String>,

    /// UI language, e.g. `en-US`.
    pub language: Option<String>,

    /// Allow browser extensions to be loaded.
    /// Default: false
    pub enable_extensions: bool,

    /// Maximum time a blocking call waits for the owner thread, in milliseconds.
    /// `0` waits forever.
    /// Default: 30000
    pub call_timeout_ms: u64,

    /// Name of the dedicated owner thread.
    /// Default: "viewbridge-owner"
    pub owner_thread_name: String,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            browser_executable_folder: None,
            user_data_folder: None,
            additional_arguments: None,
            language: None,
            enable_extensions: false,
            call_timeout_ms: 30_000,
            owner_thread_name: "viewbridge-owner".to_string(),
        }
    }
}

impl EnvironmentOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(BridgeError::from)
    }

    /// Apply `VIEWBRIDGE_*` environment variable overrides.
    pub fn with_env_overrides(self) -> BridgeResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> BridgeResult<Self> {
        if let Some(raw) = lookup(ENV_CALL_TIMEOUT_MS) {
            self.call_timeout_ms = raw.trim().parse().map_err(|_| {
                BridgeError::Config(format!("{} must be an integer, got {:?}", ENV_CALL_TIMEOUT_MS, raw))
            })?;
        }
        if let Some(folder) = lookup(ENV_USER_DATA_FOLDER) {
            if !folder.is_empty() {
                self.user_data_folder = Some(PathBuf::from(folder));
            }
        }
        Ok(self)
    }

    /// Set the user data folder.
    pub fn user_data_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.user_data_folder = Some(folder.into());
        self
    }

    /// Set the call timeout; `None` waits forever.
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout_ms = timeout.map(|t| t.as_millis() as u64).unwrap_or(0);
        self
    }

    /// Effective call timeout.
    pub fn timeout(&self) -> Option<Duration> {
        match self.call_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

/// Rectangle of the browser surface in parent coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

/// Options for creating one browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    /// Profile to open the browser in; empty uses the default profile.
    pub profile_name: Option<String>,

    /// Open in private (in-memory) mode.
    pub private_mode: bool,

    /// Initial bounds of the surface.
    pub bounds: Bounds,
}

/// Per-browser feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub enable_scripts: bool,
    pub enable_web_message: bool,
    pub enable_default_dialogs: bool,
    pub enable_status_bar: bool,
    pub enable_dev_tools: bool,
    pub enable_default_context_menu: bool,
    pub enable_host_objects: bool,
    pub enable_zoom_control: bool,
    pub enable_built_in_error_page: bool,
    pub enable_browser_accelerator_keys: bool,
    pub enable_password_autosave: bool,
    pub enable_autofill: bool,
    pub enable_pinch_zoom: bool,
    pub enable_swipe_navigation: bool,
    /// Bit set of hidden PDF toolbar items
    pub hidden_pdf_toolbar_items: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enable_scripts: true,
            enable_web_message: true,
            enable_default_dialogs: true,
            enable_status_bar: true,
            enable_dev_tools: true,
            enable_default_context_menu: true,
            enable_host_objects: true,
            enable_zoom_control: true,
            enable_built_in_error_page: true,
            enable_browser_accelerator_keys: true,
            enable_password_autosave: false,
            enable_autofill: true,
            enable_pinch_zoom: true,
            enable_swipe_navigation: true,
            hidden_pdf_toolbar_items: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_timeout() {
        let options = EnvironmentOptions::default();
        assert_eq!(options.timeout(), Some(Duration::from_secs(30)));

        let forever = options.call_timeout(None);
        assert_eq!(forever.call_timeout_ms, 0);
        assert_eq!(forever.timeout(), None);
    }

    #[test]
    fn test_from_json_partial() {
        let options = EnvironmentOptions::from_json(
            r#"{"user_data_folder": "/tmp/profile", "enable_extensions": true}"#,
        )
        .unwrap();

        assert_eq!(options.user_data_folder, Some(PathBuf::from("/tmp/profile")));
        assert!(options.enable_extensions);
        assert_eq!(options.call_timeout_ms, 30_000);
        assert_eq!(options.owner_thread_name, "viewbridge-owner");

        assert_eq!(EnvironmentOptions::from_json("  ").unwrap(), EnvironmentOptions::default());
        assert!(EnvironmentOptions::from_json("{not json").is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_CALL_TIMEOUT_MS, "250"),
            (ENV_USER_DATA_FOLDER, "/var/lib/viewbridge"),
        ]
        .into_iter()
        .collect();

        let options = EnvironmentOptions::default()
            .with_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(options.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(
            options.user_data_folder,
            Some(PathBuf::from("/var/lib/viewbridge"))
        );

        let bad = EnvironmentOptions::default()
            .with_overrides(|key| (key == ENV_CALL_TIMEOUT_MS).then(|| "soon".to_string()));
        assert!(matches!(bad, Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_settings_round_trip_defaults() {
        let settings: BrowserSettings = serde_json::from_str(r#"{"enable_scripts": false}"#).unwrap();
        assert!(!settings.enable_scripts);
        assert!(settings.enable_dev_tools);
    }
}

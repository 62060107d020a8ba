//! Configuration file parsing for viewbridge.toml.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use viewbridge_runtime::{BrowserOptions, BrowserSettings, EnvironmentOptions};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Engine environment settings
    #[serde(default)]
    pub environment: EnvironmentOptions,

    /// Options for the browser opened by `run`
    #[serde(default)]
    pub browser: BrowserOptions,

    /// Feature switches applied before the first navigation
    pub settings: Option<BrowserSettings>,

    /// Event printing
    #[serde(default)]
    pub output: OutputConfig,
}

/// How `run` reports what happened.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Print every event, not only navigation and console events
    #[serde(default)]
    pub all_events: bool,

    /// Stop listening after this long without an event
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            all_events: false,
            idle_ms: default_idle_ms(),
        }
    }
}

fn default_idle_ms() -> u64 {
    500
}

/// Load configuration from `path`, or from the nearest `viewbridge.toml` when no path
/// is given. A missing explicit path is an error; no file at all gives the defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        return parse_file(path);
    }

    match find_config_file() {
        Some(path) => parse_file(&path),
        None => Ok(Config::default()),
    }
}

fn parse_file(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))
}

/// Search for a configuration file in the current directory and parent directories.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_in_ancestors(&cwd)
}

fn find_config_in_ancestors(start: &Path) -> Option<PathBuf> {
    const CONFIG_NAMES: &[&str] = &["viewbridge.toml", ".viewbridge.toml"];

    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.environment, EnvironmentOptions::default());
        assert!(config.settings.is_none());
        assert!(!config.output.all_events);
        assert_eq!(config.output.idle_ms, 500);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[environment]
language = "en-US"
call_timeout_ms = 0
owner_thread_name = "cli-owner"

[browser]
profile_name = "Work"
private_mode = true

[browser.bounds]
width = 1280
height = 720

[settings]
enable_scripts = false

[output]
all_events = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.environment.language.as_deref(), Some("en-US"));
        assert_eq!(config.environment.timeout(), None);
        assert_eq!(config.environment.owner_thread_name, "cli-owner");
        assert_eq!(config.browser.profile_name.as_deref(), Some("Work"));
        assert!(config.browser.private_mode);
        assert_eq!(config.browser.bounds.width, 1280);
        assert!(!config.settings.unwrap().enable_scripts);
        assert!(config.output.all_events);
        assert_eq!(config.output.idle_ms, 500);
    }

    #[test]
    fn test_find_config_in_ancestors() {
        let root = std::env::temp_dir().join(format!("viewbridge-config-{}", std::process::id()));
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join("viewbridge.toml"), "[output]\nidle_ms = 10\n").unwrap();

        let found = find_config_in_ancestors(&nested).unwrap();
        assert_eq!(found, root.join("viewbridge.toml"));
        assert_eq!(load_config(Some(&found)).unwrap().output.idle_ms, 10);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        assert!(load_config(Some(Path::new("/definitely/missing/viewbridge.toml"))).is_err());
    }
}

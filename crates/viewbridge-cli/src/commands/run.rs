//! Run command - open a headless browser, navigate and report what happens.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use viewbridge_runtime::prelude::*;

use crate::config::Config;

#[derive(Args)]
pub struct RunCommand {
    /// URL to navigate to; bare host names are retried over http
    #[arg(long)]
    pub url: String,

    /// Script to evaluate once the page has loaded; its JSON result is printed
    #[arg(long)]
    pub script: Option<String>,

    /// Read the script to evaluate from a file
    #[arg(long, conflicts_with = "script")]
    pub script_file: Option<PathBuf>,

    /// Print every event, not only navigation, console and title events
    #[arg(long)]
    pub all_events: bool,

    /// Call timeout in milliseconds (0 = no timeout); overrides the config file
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl RunCommand {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let script = match (&self.script, &self.script_file) {
            (Some(script), _) => Some(script.clone()),
            (None, Some(path)) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
            ),
            (None, None) => None,
        };

        let mut config = config.clone();
        if let Some(timeout) = self.timeout {
            config.environment.call_timeout_ms = timeout;
        }
        config.output.all_events |= self.all_events;
        let url = self.url.clone();

        // The session blocks on owner-thread calls, so it stays off the async workers
        tokio::task::spawn_blocking(move || session(&config, &url, script.as_deref()))
            .await
            .context("Browser session panicked")?
    }
}

fn session(config: &Config, url: &str, script: Option<&str>) -> Result<()> {
    let environment = Environment::builder()
        .options(config.environment.clone().with_env_overrides()?)
        .headless()
        .spawn()?;

    let result = drive(&environment, config, url, script);
    environment.shutdown()?;
    result
}

fn drive(
    environment: &Arc<Environment>,
    config: &Config,
    url: &str,
    script: Option<&str>,
) -> Result<()> {
    let (handler, events) = ChannelHandler::new();
    let browser = environment.create_browser(config.browser.clone(), Arc::new(handler))?;
    if let Some(settings) = config.settings {
        browser.set_settings(settings)?;
    }

    browser.navigate(url)?;
    if let Some(script) = script {
        let result = browser.execute_script(script)?;
        println!("script: {}", result);
    }

    let idle = Duration::from_millis(config.output.idle_ms);
    while let Ok(event) = events.recv_timeout(idle) {
        if let Some(line) = describe(&event, config.output.all_events) {
            println!("{}", line);
        }
    }

    println!("url: {}", browser.source_url()?);
    println!("title: {}", browser.title()?);
    Ok(())
}

/// One output line for `event`, or `None` if it is filtered out
fn describe(event: &BrowserEvent, all_events: bool) -> Option<String> {
    match event {
        BrowserEvent::TitleChanged(title) => Some(format!("title changed: {}", title)),
        BrowserEvent::NavigationCompleted {
            success,
            http_status,
            navigation_id,
        } => Some(format!(
            "navigation {} completed: success={} status={}",
            navigation_id, success, http_status
        )),
        BrowserEvent::ConsoleMessage(message) => {
            Some(format!("console.{}: {}", message.level, message.text))
        }
        BrowserEvent::WebMessageReceived { source, message, .. } => {
            Some(format!("message from {}: {}", source, message))
        }
        other if all_events => Some(format!("{:?}", other.kind())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_filters_events() {
        assert_eq!(
            describe(&BrowserEvent::TitleChanged("Example".into()), false).as_deref(),
            Some("title changed: Example")
        );
        assert_eq!(describe(&BrowserEvent::HistoryChanged, false), None);
        assert_eq!(
            describe(&BrowserEvent::HistoryChanged, true).as_deref(),
            Some("HistoryChanged")
        );
    }

    #[test]
    fn test_session_against_headless_engine() {
        let mut config = Config::default();
        config.environment.owner_thread_name = "cli-test-owner".into();
        config.output.idle_ms = 50;
        session(&config, "example.com", Some("1 + 1")).unwrap();
    }
}

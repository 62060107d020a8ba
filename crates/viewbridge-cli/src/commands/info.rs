//! Info command - report the engine runtime in use.

use anyhow::Result;
use clap::Args;
use viewbridge_runtime::Environment;

use crate::config::Config;

#[derive(Args)]
pub struct InfoCommand {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

impl InfoCommand {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let options = config.environment.clone().with_env_overrides()?;
        let json = self.json;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let environment = Environment::builder().options(options).headless().spawn()?;
            let version = environment.runtime_version()?;
            let processes = environment.process_infos()?;
            environment.shutdown()?;

            if json {
                let report = serde_json::json!({
                    "version": version,
                    "processes": processes,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("runtime: {}", version);
                println!("processes:");
                println!("{}", viewbridge_runtime::environment::format_process_infos(&processes));
            }
            Ok(())
        })
        .await?
    }
}

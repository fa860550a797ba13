use clap::Parser;
use eden_vault_minter::{MinterConfig, service};
use eyre::Result;
use std::{net::SocketAddr, path::PathBuf};

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the minter config file. Without it, runs next to a local anvil node.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Event log path (overrides config)
    #[arg(long)]
    event_log: Option<PathBuf>,

    /// API listen address (overrides config)
    #[arg(long)]
    listen: Option<SocketAddr>,
}

impl RunArgs {
    pub async fn run(self) -> Result<()> {
        let mut config = if let Some(config_path) = &self.config {
            MinterConfig::load(config_path)?
        } else {
            let mut config = MinterConfig::default_test_config();
            config.apply_env_overrides()?;
            config
        };
        if let Some(event_log) = self.event_log {
            config.event_log_path = event_log;
        }
        if let Some(listen) = self.listen {
            config.api_address = listen;
        }
        config.validate()?;

        service::run(config).await
    }
}

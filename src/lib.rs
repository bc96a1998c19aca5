pub mod cli;
pub mod core;
pub mod providers;

use crate::core::config::AppConfig;
use crate::providers::CoinGeckoProvider;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    /// Keep the asset list live, optionally forecasting one asset
    Watch { forecast: Option<String> },
    /// Forecast a single asset once and exit
    Forecast { asset_id: String },
}

pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");
    Ok(config)
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("Coinwatch starting...");
    let config = load_config(config_path)?;

    let provider = Arc::new(CoinGeckoProvider::from_config(&config.providers.coingecko)?);

    match command {
        AppCommand::Watch { forecast } => {
            cli::assets::watch(
                provider.clone(),
                provider,
                &config,
                forecast.as_deref(),
            )
            .await
        }
        AppCommand::Forecast { asset_id } => {
            cli::forecast::run(provider.clone(), provider, &config, &asset_id).await
        }
    }
}

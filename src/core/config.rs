use crate::core::currency::usable_rate;
use anyhow::{Context, Result, ensure};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const DEFAULT_SOURCE_CURRENCY: &str = "usd";
pub const DEFAULT_DISPLAY_CURRENCY: &str = "krw";
pub const DEFAULT_FALLBACK_RATE: f64 = 1300.0;
pub const DEFAULT_COINGECKO_URL: &str = "https://api.coingecko.com";
pub const DEFAULT_RETRIES: usize = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 40;
pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_HISTORY_DAYS: u32 = 365;
pub const DEFAULT_FORECAST_HORIZON: usize = 7;
pub const DEFAULT_MIN_SERIES_LEN: usize = 5;
pub const DEFAULT_TRAINING_EPOCHS: usize = 200;
pub const DEFAULT_LEARNING_RATE: f64 = 0.05;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CurrencyConfig {
    /// Currency the market data provider quotes in.
    pub source: String,
    /// Currency every published amount is converted into.
    pub display: String,
    /// Multiplier used whenever the live rate is unavailable.
    pub fallback_rate: f64,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        CurrencyConfig {
            source: DEFAULT_SOURCE_CURRENCY.to_string(),
            display: DEFAULT_DISPLAY_CURRENCY.to_string(),
            fallback_rate: DEFAULT_FALLBACK_RATE,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CoinGeckoProviderConfig {
    pub base_url: String,
    pub retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for CoinGeckoProviderConfig {
    fn default() -> Self {
        CoinGeckoProviderConfig {
            base_url: DEFAULT_COINGECKO_URL.to_string(),
            retries: DEFAULT_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub coingecko: CoinGeckoProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ForecastConfig {
    pub debounce_ms: u64,
    pub history_days: u32,
    pub horizon: usize,
    pub min_series_len: usize,
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            history_days: DEFAULT_HISTORY_DAYS,
            horizon: DEFAULT_FORECAST_HORIZON,
            min_series_len: DEFAULT_MIN_SERIES_LEN,
            epochs: DEFAULT_TRAINING_EPOCHS,
            learning_rate: DEFAULT_LEARNING_RATE,
        }
    }
}

impl ForecastConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub currency: CurrencyConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
}

impl AppConfig {
    /// Loads the config from the default location, falling back to built-in
    /// defaults when no file has been created yet.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(
                "No config at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "coinwatch", "coinwatch")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Rejects values the refresh loop and forecast pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        let currency = &self.currency;
        ensure!(
            !currency.source.trim().is_empty() && !currency.display.trim().is_empty(),
            "currency.source and currency.display must not be empty"
        );
        ensure!(
            usable_rate(currency.fallback_rate).is_some(),
            "currency.fallback_rate must be a positive number, got {}",
            currency.fallback_rate
        );

        let forecast = &self.forecast;
        ensure!(
            forecast.learning_rate.is_finite() && forecast.learning_rate > 0.0,
            "forecast.learning_rate must be a positive number, got {}",
            forecast.learning_rate
        );
        ensure!(forecast.horizon > 0, "forecast.horizon must be at least 1");
        ensure!(forecast.epochs > 0, "forecast.epochs must be at least 1");
        ensure!(
            forecast.min_series_len >= 2,
            "forecast.min_series_len must be at least 2, got {}",
            forecast.min_series_len
        );
        ensure!(forecast.history_days > 0, "forecast.history_days must be at least 1");
        Ok(())
    }
}

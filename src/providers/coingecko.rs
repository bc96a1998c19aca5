use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::{debug, instrument};

use super::util::with_retry;
use crate::core::config::CoinGeckoProviderConfig;
use crate::core::currency::CurrencyRateProvider;
use crate::core::market::{Asset, MarketDataProvider, PricePoint, PriceSeries};

/// CoinGecko v3 public API client. Serves the asset list, daily price
/// history and currency rates.
pub struct CoinGeckoProvider {
    base_url: String,
    client: reqwest::Client,
    retries: usize,
    retry_delay_ms: u64,
}

impl CoinGeckoProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("coinwatch/0.1")
            .build()?;
        Ok(CoinGeckoProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retries: 0,
            retry_delay_ms: 0,
        })
    }

    pub fn from_config(config: &CoinGeckoProviderConfig) -> Result<Self> {
        Ok(Self::new(&config.base_url)?.with_retries(config.retries, config.retry_delay_ms))
    }

    pub fn with_retries(mut self, retries: usize, delay_ms: u64) -> Self {
        self.retries = retries;
        self.retry_delay_ms = delay_ms;
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        debug!("Requesting {} from {}", what, url);

        let client = &self.client;
        let response = with_retry(
            move || async move {
                client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
            },
            self.retries,
            self.retry_delay_ms,
        )
        .await
        .map_err(|e| match e.downcast_ref::<reqwest::Error>().and_then(|e| e.status()) {
            Some(status) => anyhow!("HTTP error: {} for {}", status, what),
            None => anyhow!("Request error: {} for {}", e, what),
        })?;

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", what, e))
    }
}

#[derive(Debug, Deserialize)]
struct MarketEntry {
    id: String,
    symbol: String,
    name: String,
    #[serde(default)]
    image: Option<String>,
    // Must be present, may be null for freshly listed coins.
    #[serde(deserialize_with = "Option::deserialize")]
    current_price: Option<f64>,
    #[serde(deserialize_with = "Option::deserialize")]
    market_cap: Option<f64>,
}

impl From<MarketEntry> for Asset {
    fn from(entry: MarketEntry) -> Self {
        if entry.current_price.is_none() {
            debug!("No price listed for {}", entry.id);
        }
        Asset {
            id: entry.id,
            symbol: entry.symbol,
            name: entry.name,
            image: entry.image.unwrap_or_default(),
            current_price: entry.current_price,
            market_cap: entry.market_cap,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    prices: Vec<(f64, f64)>,
}

#[async_trait]
impl MarketDataProvider for CoinGeckoProvider {
    #[instrument(name = "CoinGeckoMarkets", skip(self))]
    async fn fetch_assets(&self, vs_currency: &str) -> Result<Vec<Asset>> {
        let url = format!(
            "{}/api/v3/coins/markets?vs_currency={}",
            self.base_url,
            vs_currency.to_lowercase()
        );
        let entries: Vec<MarketEntry> = self.get_json(&url, "asset list").await?;
        debug!("Received {} assets", entries.len());
        Ok(entries.into_iter().map(Asset::from).collect())
    }

    #[instrument(name = "CoinGeckoHistory", skip(self))]
    async fn fetch_history(
        &self,
        asset_id: &str,
        vs_currency: &str,
        days: u32,
    ) -> Result<PriceSeries> {
        let url = format!(
            "{}/api/v3/coins/{}/market_chart?vs_currency={}&days={}&interval=daily",
            self.base_url,
            asset_id,
            vs_currency.to_lowercase(),
            days
        );
        let what = format!("price history of {asset_id}");
        let chart: MarketChartResponse = self.get_json(&url, &what).await?;

        let points = chart
            .prices
            .into_iter()
            .map(|(ts, price)| {
                let timestamp = Utc
                    .timestamp_millis_opt(ts as i64)
                    .single()
                    .ok_or_else(|| anyhow!("Invalid timestamp {} in {}", ts, what))?;
                Ok(PricePoint { timestamp, price })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("Received {} price points", points.len());
        Ok(PriceSeries::new(points))
    }
}

#[async_trait]
impl CurrencyRateProvider for CoinGeckoProvider {
    async fn get_rate(&self, from: &str, to: &str) -> Result<f64> {
        let (from, to) = (from.to_lowercase(), to.to_lowercase());
        let pair = format!("{from}/{to}");
        let url = format!(
            "{}/api/v3/simple/price?ids={}&vs_currencies={}",
            self.base_url, from, to
        );

        let data: HashMap<String, HashMap<String, Option<f64>>> =
            self.get_json(&url, &format!("currency pair: {pair}")).await?;

        data.get(&from)
            .and_then(|quotes| quotes.get(&to).copied().flatten())
            .ok_or_else(|| anyhow!("No rate data found for currency pair: {}", pair))
    }
}

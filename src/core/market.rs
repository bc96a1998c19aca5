//! Market data abstractions and core types

use crate::core::currency::convert;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tradable asset as listed by the market data provider.
///
/// `current_price` and `market_cap` are in whichever currency the holder
/// says they are in: providers return source-currency assets, snapshots
/// published by the refresh loop hold display-currency assets. `None` means
/// the provider lists the asset without a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub image: String,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
}

impl Asset {
    /// Returns a copy with the monetary fields converted at `rate`.
    pub fn converted(&self, rate: f64) -> Asset {
        Asset {
            current_price: self.current_price.map(|v| convert(v, rate)),
            market_cap: self.market_cap.map(|v| convert(v, rate)),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Ordered daily price history for one asset, in source currency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(points: Vec<PricePoint>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    /// Prices in series order, timestamps dropped.
    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Lists assets with prices quoted in `vs_currency`.
    async fn fetch_assets(&self, vs_currency: &str) -> Result<Vec<Asset>>;

    /// Daily price history of `asset_id` over the trailing `days`.
    async fn fetch_history(&self, asset_id: &str, vs_currency: &str, days: u32)
    -> Result<PriceSeries>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_asset_conversion_keeps_identity_fields() {
        let asset = Asset {
            id: "btc".to_string(),
            symbol: "btc".to_string(),
            name: "Bitcoin".to_string(),
            image: "https://example.com/btc.png".to_string(),
            current_price: Some(50000.0),
            market_cap: None,
        };

        let converted = asset.converted(1350.0);
        assert_eq!(converted.id, "btc");
        assert_eq!(converted.name, "Bitcoin");
        assert_eq!(converted.image, asset.image);
        assert_eq!(converted.current_price, Some(67_500_000.0));
        assert_eq!(converted.market_cap, None);
    }

    #[test]
    fn test_series_prices_follow_order() {
        let day = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
        let series = PriceSeries::new(vec![
            PricePoint {
                timestamp: day(3),
                price: 3.0,
            },
            PricePoint {
                timestamp: day(1),
                price: 1.0,
            },
        ]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.prices(), vec![3.0, 1.0]);
    }
}

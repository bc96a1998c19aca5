//! Core business logic abstractions

pub mod config;
pub mod currency;
pub mod forecast;
pub mod forecast_request;
pub mod generation;
pub mod log;
pub mod market;
pub mod model;
pub mod refresh;
pub mod scheduler;

// Re-export main types for cleaner imports
pub use currency::CurrencyRateProvider;
pub use forecast::{ForecastEngine, ForecastSettings};
pub use forecast_request::{ForecastRequestController, ForecastState, ForecastStatus};
pub use market::{Asset, MarketDataProvider, PricePoint, PriceSeries};
pub use refresh::{AssetRefreshLoop, RefreshSettings, RefreshState, RefreshStatus};

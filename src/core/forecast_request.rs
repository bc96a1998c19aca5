//! User-triggered forecast for a single selected asset.
use crate::core::config::AppConfig;
use crate::core::currency::{CurrencyRateProvider, convert, resolve_rate};
use crate::core::forecast::{ForecastEngine, ForecastSettings};
use crate::core::generation::{Generation, GenerationGuard};
use crate::core::market::{Asset, MarketDataProvider};
use crate::core::scheduler::ScheduledTask;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ForecastStatus {
    #[default]
    Idle,
    /// An asset was picked; the pipeline starts once the debounce elapses.
    Selected,
    FetchingHistory,
    /// History arrived, still waiting on the exchange rate.
    FetchingRate,
    Training,
    Ready,
    Errored(String),
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct ForecastState {
    pub selected: Option<Asset>,
    pub status: ForecastStatus,
    /// Predicted prices for day +1 onwards, in display currency. Empty until
    /// ready, and also when the history was too short to forecast.
    pub forecast: Vec<f64>,
    /// Rate this request converted with.
    pub rate: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ForecastRequestSettings {
    pub debounce: Duration,
    pub history_days: u32,
    pub source_currency: String,
    pub display_currency: String,
    pub fallback_rate: f64,
}

impl From<&AppConfig> for ForecastRequestSettings {
    fn from(config: &AppConfig) -> Self {
        ForecastRequestSettings {
            debounce: config.forecast.debounce(),
            history_days: config.forecast.history_days,
            source_currency: config.currency.source.clone(),
            display_currency: config.currency.display.clone(),
            fallback_rate: config.currency.fallback_rate,
        }
    }
}

struct ControllerShared {
    market: Arc<dyn MarketDataProvider>,
    rates: Arc<dyn CurrencyRateProvider>,
    engine: ForecastEngine,
    settings: ForecastRequestSettings,
    generations: GenerationGuard,
    state: watch::Sender<ForecastState>,
}

impl ControllerShared {
    /// Applies `update` only while `token` belongs to the active request.
    fn publish(&self, token: Generation, update: impl FnOnce(&mut ForecastState)) -> bool {
        self.state.send_if_modified(|state| {
            if !self.generations.is_current(token) {
                return false;
            }
            update(state);
            true
        })
    }

    fn fail(&self, token: Generation, message: String) {
        self.publish(token, |state| {
            state.forecast.clear();
            state.status = ForecastStatus::Errored(message);
        });
    }

    #[instrument(name = "ForecastPipeline", skip_all, fields(asset = %asset.id, token = %token))]
    async fn run(self: Arc<Self>, asset: Asset, token: Generation) {
        let settings = &self.settings;
        self.publish(token, |state| state.status = ForecastStatus::FetchingHistory);

        let history = async {
            let result = self
                .market
                .fetch_history(&asset.id, &settings.source_currency, settings.history_days)
                .await;
            self.publish(token, |state| {
                if state.status == ForecastStatus::FetchingHistory {
                    state.status = ForecastStatus::FetchingRate;
                }
            });
            result
        };
        let rate = resolve_rate(
            self.rates.as_ref(),
            &settings.source_currency,
            &settings.display_currency,
            settings.fallback_rate,
        );
        let (history, rate) = futures::join!(history, rate);

        let series = match history {
            Ok(series) => series,
            Err(e) => {
                warn!(error = %e, "History fetch failed");
                self.fail(token, format!("Could not load price history: {e}"));
                return;
            }
        };

        if !self.publish(token, |state| {
            state.status = ForecastStatus::Training;
            state.rate = Some(rate);
        }) {
            debug!("Request superseded before training");
            return;
        }

        let predicted = self.engine.train_and_predict(&series.prices()).await;
        if predicted.iter().any(|p| !p.is_finite()) {
            warn!("Model produced non-finite values");
            self.fail(token, "Forecast model did not converge".to_string());
            return;
        }

        let forecast: Vec<f64> = predicted.iter().map(|&p| convert(p, rate)).collect();
        let days = forecast.len();
        if self.publish(token, move |state| {
            state.forecast = forecast;
            state.status = ForecastStatus::Ready;
        }) {
            info!("Published {days}-day forecast");
        } else {
            debug!("Discarding superseded forecast");
        }
    }
}

/// Runs the forecast pipeline for whichever asset the user selected last.
///
/// Selecting an asset waits for the debounce delay before fetching. A newer
/// selection, or [`close`](Self::close), aborts the pending request, and every
/// state update is checked against the active request token, so an older
/// request can never publish over a newer one.
pub struct ForecastRequestController {
    shared: Arc<ControllerShared>,
    pending: ScheduledTask,
}

impl ForecastRequestController {
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        rates: Arc<dyn CurrencyRateProvider>,
        engine: ForecastEngine,
        settings: ForecastRequestSettings,
    ) -> Self {
        let (state, _) = watch::channel(ForecastState::default());
        Self {
            shared: Arc::new(ControllerShared {
                market,
                rates,
                engine,
                settings,
                generations: GenerationGuard::new(),
                state,
            }),
            pending: ScheduledTask::new(),
        }
    }

    pub fn from_config(
        market: Arc<dyn MarketDataProvider>,
        rates: Arc<dyn CurrencyRateProvider>,
        config: &AppConfig,
    ) -> Self {
        Self::new(
            market,
            rates,
            ForecastEngine::new(ForecastSettings::from(&config.forecast)),
            ForecastRequestSettings::from(config),
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<ForecastState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> ForecastState {
        self.shared.state.borrow().clone()
    }

    /// Selects `asset`, clears the previous forecast and schedules a new one.
    /// Must be called from within a tokio runtime.
    pub fn select(&self, asset: Asset) -> Generation {
        let token = self.shared.generations.next();
        debug!("Selected {} ({token})", asset.id);

        let selected = asset.clone();
        self.shared.publish(token, move |state| {
            *state = ForecastState {
                selected: Some(selected),
                status: ForecastStatus::Selected,
                forecast: Vec::new(),
                rate: None,
            };
        });

        let shared = Arc::clone(&self.shared);
        self.pending
            .schedule(self.shared.settings.debounce, shared.run(asset, token));
        token
    }

    /// Dismisses the view: drops the selection and any forecast, pending or
    /// published.
    pub fn close(&self) {
        self.shared.generations.invalidate();
        self.pending.cancel();
        self.shared.state.send_modify(|state| {
            *state = ForecastState {
                status: ForecastStatus::Closed,
                ..ForecastState::default()
            };
        });
        debug!("Forecast view closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::market::{PricePoint, PriceSeries};
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    fn asset(id: &str) -> Asset {
        Asset {
            id: id.to_string(),
            symbol: id.to_string(),
            name: id.to_uppercase(),
            image: String::new(),
            current_price: Some(1.0),
            market_cap: Some(1.0),
        }
    }

    fn series(prices: &[f64]) -> PriceSeries {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PriceSeries::new(
            prices
                .iter()
                .enumerate()
                .map(|(i, &price)| PricePoint {
                    timestamp: start + ChronoDuration::days(i as i64),
                    price,
                })
                .collect(),
        )
    }

    struct FixedRate(Result<f64, String>);

    #[async_trait]
    impl CurrencyRateProvider for FixedRate {
        async fn get_rate(&self, _from: &str, _to: &str) -> Result<f64> {
            self.0.clone().map_err(|e| anyhow!(e))
        }
    }

    /// History per asset id; ids listed in `held` wait for `release`.
    #[derive(Default)]
    struct HistoryMarket {
        histories: HashMap<String, Result<Vec<f64>, String>>,
        held: Vec<String>,
        release: Notify,
        requested: Mutex<Vec<String>>,
    }

    impl HistoryMarket {
        fn with(mut self, id: &str, history: Result<Vec<f64>, String>) -> Self {
            self.histories.insert(id.to_string(), history);
            self
        }

        fn hold(mut self, id: &str) -> Self {
            self.held.push(id.to_string());
            self
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketDataProvider for HistoryMarket {
        async fn fetch_assets(&self, _vs_currency: &str) -> Result<Vec<Asset>> {
            Err(anyhow!("not used"))
        }

        async fn fetch_history(&self, asset_id: &str, _: &str, _: u32) -> Result<PriceSeries> {
            self.requested.lock().unwrap().push(asset_id.to_string());
            if self.held.iter().any(|id| id == asset_id) {
                self.release.notified().await;
            }
            match self.histories.get(asset_id) {
                Some(Ok(prices)) => Ok(series(prices)),
                Some(Err(e)) => Err(anyhow!(e.clone())),
                None => Err(anyhow!("unknown asset {asset_id}")),
            }
        }
    }

    fn settings() -> ForecastRequestSettings {
        ForecastRequestSettings {
            debounce: Duration::from_millis(2000),
            history_days: 365,
            source_currency: "usd".to_string(),
            display_currency: "krw".to_string(),
            fallback_rate: 1300.0,
        }
    }

    fn controller(market: Arc<HistoryMarket>, rate: Result<f64, String>) -> ForecastRequestController {
        ForecastRequestController::new(
            market,
            Arc::new(FixedRate(rate)),
            ForecastEngine::default(),
            settings(),
        )
    }

    fn linear(start: f64, len: usize) -> Vec<f64> {
        (0..len).map(|i| start + i as f64).collect()
    }

    async fn settled(rx: &mut watch::Receiver<ForecastState>) -> ForecastState {
        rx.wait_for(|s| {
            matches!(
                s.status,
                ForecastStatus::Ready | ForecastStatus::Errored(_) | ForecastStatus::Closed
            )
        })
        .await
        .unwrap()
        .clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_forecast_is_converted_with_request_rate() {
        let market = Arc::new(HistoryMarket::default().with("btc", Ok(linear(100.0, 10))));
        let controller = controller(Arc::clone(&market), Ok(1300.0));
        let mut rx = controller.subscribe();

        controller.select(asset("btc"));
        assert_eq!(controller.state().status, ForecastStatus::Selected);

        let state = settled(&mut rx).await;
        assert_eq!(state.status, ForecastStatus::Ready);
        assert_eq!(state.rate, Some(1300.0));
        assert_eq!(state.forecast.len(), 7);
        for (day, value) in state.forecast.iter().enumerate() {
            assert!(*value > 0.0);
            assert_eq!(value.fract(), 0.0);
            let expected = (110.0 + day as f64) * 1300.0;
            assert!((value - expected).abs() < 1300.0, "day {day}: {value}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_delays_history_fetch() {
        let market = Arc::new(HistoryMarket::default().with("btc", Ok(linear(1.0, 6))));
        let controller = controller(Arc::clone(&market), Ok(1.0));

        controller.select(asset("btc"));
        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert!(market.requested().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(market.requested(), vec!["btc".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reselect_during_debounce_abandons_first() {
        let market = Arc::new(
            HistoryMarket::default()
                .with("x", Ok(linear(10.0, 10)))
                .with("y", Ok(linear(500.0, 10))),
        );
        let controller = controller(Arc::clone(&market), Ok(1.0));
        let mut rx = controller.subscribe();

        controller.select(asset("x"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        controller.select(asset("y"));

        let state = settled(&mut rx).await;
        assert_eq!(state.selected.as_ref().map(|a| a.id.as_str()), Some("y"));
        assert!(state.forecast.iter().all(|v| *v > 400.0));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(market.requested(), vec!["y".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_request_cannot_overwrite_newer_selection() {
        let market = Arc::new(
            HistoryMarket::default()
                .with("x", Ok(linear(10.0, 10)))
                .with("y", Ok(linear(500.0, 10)))
                .hold("x"),
        );
        let controller = controller(Arc::clone(&market), Ok(1.0));
        let mut rx = controller.subscribe();

        controller.select(asset("x"));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(market.requested(), vec!["x".to_string()]);

        controller.select(asset("y"));
        market.release.notify_waiters();

        let state = settled(&mut rx).await;
        assert_eq!(state.status, ForecastStatus::Ready);
        assert_eq!(state.selected.as_ref().map(|a| a.id.as_str()), Some("y"));
        assert!(state.forecast.iter().all(|v| *v > 400.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_suppresses_in_flight_result() {
        let market = Arc::new(
            HistoryMarket::default()
                .with("btc", Ok(linear(100.0, 10)))
                .hold("btc"),
        );
        let controller = controller(Arc::clone(&market), Ok(1300.0));

        controller.select(asset("btc"));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(controller.state().status, ForecastStatus::FetchingHistory);

        controller.close();
        market.release.notify_waiters();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let state = controller.state();
        assert_eq!(state.status, ForecastStatus::Closed);
        assert!(state.selected.is_none());
        assert!(state.forecast.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_failure_reports_error() {
        let market = Arc::new(
            HistoryMarket::default().with("btc", Err("HTTP error: 429 Too Many Requests".into())),
        );
        let controller = controller(Arc::clone(&market), Ok(1300.0));
        let mut rx = controller.subscribe();

        controller.select(asset("btc"));
        let state = settled(&mut rx).await;
        match state.status {
            ForecastStatus::Errored(message) => assert!(message.contains("429")),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(state.forecast.is_empty());
        assert_eq!(state.selected.map(|a| a.id), Some("btc".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_failure_uses_fallback() {
        let market = Arc::new(HistoryMarket::default().with("btc", Ok(linear(100.0, 10))));
        let controller = controller(Arc::clone(&market), Err("rate service down".into()));
        let mut rx = controller.subscribe();

        controller.select(asset("btc"));
        let state = settled(&mut rx).await;
        assert_eq!(state.status, ForecastStatus::Ready);
        assert_eq!(state.rate, Some(1300.0));
        assert_eq!(state.forecast.len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_history_yields_empty_forecast() {
        let market = Arc::new(HistoryMarket::default().with("new", Ok(vec![1.0, 2.0, 3.0])));
        let controller = controller(Arc::clone(&market), Ok(1.0));
        let mut rx = controller.subscribe();

        controller.select(asset("new"));
        let state = settled(&mut rx).await;
        assert_eq!(state.status, ForecastStatus::Ready);
        assert!(state.forecast.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_selection_clears_previous_forecast() {
        let market = Arc::new(
            HistoryMarket::default()
                .with("x", Ok(linear(10.0, 10)))
                .with("y", Ok(linear(20.0, 10))),
        );
        let controller = controller(Arc::clone(&market), Ok(1.0));
        let mut rx = controller.subscribe();

        controller.select(asset("x"));
        assert_eq!(settled(&mut rx).await.forecast.len(), 7);

        controller.select(asset("y"));
        let state = controller.state();
        assert_eq!(state.status, ForecastStatus::Selected);
        assert!(state.forecast.is_empty());
        assert_eq!(state.selected.map(|a| a.id), Some("y".to_string()));
    }
}

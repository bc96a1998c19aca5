//! Short-horizon price forecasting from a historical series.
use crate::core::config::ForecastConfig;
use crate::core::model::{Adam, LinearRegression};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSettings {
    /// Number of future points produced per forecast.
    pub horizon: usize,
    /// Shorter series produce no forecast at all.
    pub min_series_len: usize,
    /// Training passes over the series.
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        ForecastSettings::from(&ForecastConfig::default())
    }
}

impl From<&ForecastConfig> for ForecastSettings {
    fn from(config: &ForecastConfig) -> Self {
        ForecastSettings {
            horizon: config.horizon,
            min_series_len: config.min_series_len,
            epochs: config.epochs,
            learning_rate: config.learning_rate,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ForecastEngine {
    settings: ForecastSettings,
}

impl ForecastEngine {
    pub fn new(settings: ForecastSettings) -> Self {
        Self { settings }
    }

    /// Fits a line through `series` (position -> price) and extrapolates it
    /// over the next `horizon` positions.
    ///
    /// Returns an empty vector when fewer than `min_series_len` finite prices
    /// are available, otherwise exactly `horizon` values in day order. The
    /// weight is randomly initialised and batches are shuffled, so two runs on
    /// the same series can differ slightly.
    ///
    /// Training yields to the runtime after every epoch, so aborting the
    /// calling task stops it at the next epoch boundary.
    #[instrument(name = "TrainAndPredict", skip_all, fields(len = series.len()))]
    pub async fn train_and_predict(&self, series: &[f64]) -> Vec<f64> {
        let prices: Vec<f64> = series.iter().copied().filter(|p| p.is_finite()).collect();
        if prices.len() != series.len() {
            debug!(
                "Dropped {} non-finite prices",
                series.len() - prices.len()
            );
        }
        if prices.len() < self.settings.min_series_len {
            debug!(
                "Series has {} points, need {}; no forecast",
                prices.len(),
                self.settings.min_series_len
            );
            return Vec::new();
        }

        let xs: Vec<f64> = (0..prices.len()).map(|i| i as f64).collect();
        let mut rng = StdRng::from_entropy();
        let mut model = LinearRegression::new(
            &xs,
            &prices,
            Adam::new(self.settings.learning_rate),
            &mut rng,
        );

        let mut loss = f64::NAN;
        for _ in 0..self.settings.epochs {
            loss = model.train_epoch(&mut rng);
            tokio::task::yield_now().await;
        }
        debug!(loss, "Training finished");

        let start = prices.len();
        let future: Vec<f64> = (start..start + self.settings.horizon)
            .map(|i| i as f64)
            .collect();
        model.predict(&future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_short_series_has_no_forecast() {
        let engine = ForecastEngine::default();
        for len in 0..5 {
            let series: Vec<f64> = (0..len).map(|i| 100.0 + i as f64).collect();
            assert!(engine.train_and_predict(&series).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_forecast_has_horizon_finite_values() {
        let engine = ForecastEngine::default();
        for len in [5, 6, 30, 365] {
            let series: Vec<f64> = (0..len)
                .map(|i| 50_000.0 + 25.0 * i as f64 + if i % 2 == 0 { 300.0 } else { -300.0 })
                .collect();
            let forecast = engine.train_and_predict(&series).await;
            assert_eq!(forecast.len(), 7);
            assert!(forecast.iter().all(|v| v.is_finite()));
        }
    }

    #[tokio::test]
    async fn test_linear_series_extrapolates() {
        let engine = ForecastEngine::default();
        let series: Vec<f64> = (100..110).map(|p| p as f64).collect();

        let forecast = engine.train_and_predict(&series).await;
        assert_eq!(forecast.len(), 7);
        for (day, value) in forecast.iter().enumerate() {
            let expected = 110.0 + day as f64;
            assert!((value - expected).abs() < 0.5, "day {day}: {value}");
        }
    }

    #[tokio::test]
    async fn test_repeated_runs_keep_shape() {
        let engine = ForecastEngine::default();
        let series = vec![10.0, 12.0, 11.0, 13.0, 12.5, 14.0, 13.5];

        let first = engine.train_and_predict(&series).await;
        let second = engine.train_and_predict(&series).await;
        assert_eq!(first.len(), 7);
        assert_eq!(second.len(), 7);
        for (a, b) in first.iter().zip(&second) {
            assert!((a - b).abs() < 1.0, "{a} vs {b}");
        }
    }

    #[tokio::test]
    async fn test_non_finite_prices_are_ignored() {
        let engine = ForecastEngine::default();
        let series = vec![1.0, f64::NAN, 2.0, 3.0, f64::INFINITY, 4.0];
        assert!(engine.train_and_predict(&series).await.is_empty());

        let series = vec![1.0, f64::NAN, 2.0, 3.0, 4.0, 5.0];
        let forecast = engine.train_and_predict(&series).await;
        assert_eq!(forecast.len(), 7);
        assert!(forecast.iter().all(|v| v.is_finite()));
    }

    #[tokio::test]
    async fn test_custom_horizon() {
        let engine = ForecastEngine::new(ForecastSettings {
            horizon: 3,
            min_series_len: 2,
            epochs: 50,
            learning_rate: 0.05,
        });
        assert_eq!(engine.train_and_predict(&[1.0, 2.0]).await.len(), 3);
        assert!(engine.train_and_predict(&[1.0]).await.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_training_can_be_aborted_between_epochs() {
        let engine = ForecastEngine::new(ForecastSettings {
            epochs: 100_000,
            ..ForecastSettings::default()
        });
        let handle = tokio::spawn(async move {
            engine
                .train_and_predict(&[1.0, 2.0, 3.0, 4.0, 5.0])
                .await
        });

        // Let the training task start; it hands the thread back after an epoch.
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        handle.abort();
        let err = handle.await.unwrap_err();
        assert!(err.is_cancelled());
    }
}

//! Periodic refresh of the asset list, converted into the display currency.
use crate::core::config::AppConfig;
use crate::core::currency::{CurrencyRateProvider, resolve_rate};
use crate::core::generation::{Generation, GenerationGuard};
use crate::core::market::{Asset, MarketDataProvider};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RefreshStatus {
    /// Nothing fetched yet.
    #[default]
    Idle,
    Fetching,
    /// The latest cycle published a snapshot.
    Success,
    /// The latest cycle failed; carries a user-facing message.
    Errored(String),
}

/// What the presentation layer sees. `assets` only ever changes as a whole.
#[derive(Debug, Clone, Default)]
pub struct RefreshState {
    pub status: RefreshStatus,
    pub assets: Arc<Vec<Asset>>,
    /// Rate the current `assets` were converted with.
    pub rate: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Cycle that last changed this state.
    pub generation: Option<Generation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published,
    Failed,
    /// A newer cycle started before this one finished; its result was dropped.
    Superseded,
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub interval: Duration,
    pub source_currency: String,
    pub display_currency: String,
    pub fallback_rate: f64,
}

impl From<&AppConfig> for RefreshSettings {
    fn from(config: &AppConfig) -> Self {
        RefreshSettings {
            interval: config.refresh.interval(),
            source_currency: config.currency.source.clone(),
            display_currency: config.currency.display.clone(),
            fallback_rate: config.currency.fallback_rate,
        }
    }
}

struct RefreshShared {
    market: Arc<dyn MarketDataProvider>,
    rates: Arc<dyn CurrencyRateProvider>,
    settings: RefreshSettings,
    generations: GenerationGuard,
    state: watch::Sender<RefreshState>,
}

impl RefreshShared {
    /// Applies `update` only while `generation` is the newest cycle.
    fn publish(&self, generation: Generation, update: impl FnOnce(&mut RefreshState)) -> bool {
        self.state.send_if_modified(|state| {
            if !self.generations.is_current(generation) {
                return false;
            }
            update(state);
            state.generation = Some(generation);
            true
        })
    }

    #[instrument(name = "RefreshCycle", skip_all, fields(generation = %generation))]
    async fn run_cycle(self: Arc<Self>, generation: Generation) -> CycleOutcome {
        self.publish(generation, |state| state.status = RefreshStatus::Fetching);

        let settings = &self.settings;
        let rate = resolve_rate(
            self.rates.as_ref(),
            &settings.source_currency,
            &settings.display_currency,
            settings.fallback_rate,
        )
        .await;

        match self.market.fetch_assets(&settings.source_currency).await {
            Ok(assets) => {
                let converted: Vec<Asset> = assets.iter().map(|a| a.converted(rate)).collect();
                let count = converted.len();
                let published = self.publish(generation, move |state| {
                    state.status = RefreshStatus::Success;
                    state.assets = Arc::new(converted);
                    state.rate = Some(rate);
                    state.updated_at = Some(Utc::now());
                });
                if published {
                    info!("Published {count} assets at rate {rate}");
                    CycleOutcome::Published
                } else {
                    debug!("Discarding superseded asset list");
                    CycleOutcome::Superseded
                }
            }
            Err(e) => {
                warn!(error = %e, "Asset refresh failed");
                let message = format!("Could not load asset data: {e}");
                if self.publish(generation, |state| {
                    state.status = RefreshStatus::Errored(message)
                }) {
                    CycleOutcome::Failed
                } else {
                    CycleOutcome::Superseded
                }
            }
        }
    }
}

/// Keeps an asset snapshot current by re-fetching on a fixed interval.
///
/// Cycles may overlap when a fetch outlasts the interval. Each cycle takes a
/// new generation and only the newest one may publish, so a slow older cycle
/// never overwrites a newer result. Failed cycles do not stop the loop.
pub struct AssetRefreshLoop {
    shared: Arc<RefreshShared>,
    ticker: Option<JoinHandle<()>>,
}

impl AssetRefreshLoop {
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        rates: Arc<dyn CurrencyRateProvider>,
        settings: RefreshSettings,
    ) -> Self {
        let (state, _) = watch::channel(RefreshState::default());
        Self {
            shared: Arc::new(RefreshShared {
                market,
                rates,
                settings,
                generations: GenerationGuard::new(),
                state,
            }),
            ticker: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> RefreshState {
        self.shared.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.ticker.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Starts ticking: one cycle right away, then one per interval. Calling
    /// this on a running loop does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        info!(
            "Starting asset refresh every {:?}",
            shared.settings.interval
        );
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.settings.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Dropped (and so aborted) together with the ticker.
            let mut cycles = JoinSet::new();

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let generation = shared.generations.next();
                        cycles.spawn(Arc::clone(&shared).run_cycle(generation));
                    }
                    Some(finished) = cycles.join_next() => {
                        if let Err(e) = finished {
                            warn!("Refresh cycle ended abnormally: {e}");
                        }
                    }
                }
            }
        }));
    }

    /// Runs a single cycle outside the timer and waits for it.
    pub async fn refresh_now(&self) -> CycleOutcome {
        let generation = self.shared.generations.next();
        Arc::clone(&self.shared).run_cycle(generation).await
    }

    /// Starts a single cycle in the background. The generation is taken
    /// before this returns, so cycles are ordered by call order.
    pub fn spawn_cycle(&self) -> JoinHandle<CycleOutcome> {
        let generation = self.shared.generations.next();
        tokio::spawn(Arc::clone(&self.shared).run_cycle(generation))
    }

    /// Cancels the timer and every cycle it started. Results of cycles still
    /// in flight elsewhere are discarded.
    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
            info!("Stopped asset refresh");
        }
        self.shared.generations.invalidate();
    }
}

impl Drop for AssetRefreshLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

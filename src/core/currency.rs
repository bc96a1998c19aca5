//! Currency conversion abstractions

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

#[async_trait]
pub trait CurrencyRateProvider: Send + Sync {
    async fn get_rate(&self, from: &str, to: &str) -> Result<f64>;
}

/// Converts an amount quoted in the source currency into the display currency.
///
/// `rate` must be finite and positive; use [`resolve_rate`] to obtain one.
pub fn convert(amount: f64, rate: f64) -> f64 {
    (amount * rate).round()
}

/// Returns `rate` when it can be used for conversion.
pub fn usable_rate(rate: f64) -> Option<f64> {
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Fetches the live `from -> to` rate, substituting `fallback` when the fetch
/// fails or yields something that is not a positive number.
///
/// Rates are never cached: every call goes to the provider.
pub async fn resolve_rate(
    provider: &dyn CurrencyRateProvider,
    from: &str,
    to: &str,
    fallback: f64,
) -> f64 {
    if from.eq_ignore_ascii_case(to) {
        return 1.0;
    }

    match provider.get_rate(from, to).await {
        Ok(rate) => match usable_rate(rate) {
            Some(rate) => {
                debug!("Resolved rate 1 {from} = {rate} {to}");
                rate
            }
            None => {
                warn!("Unusable rate {rate} for {from}->{to}, using fallback {fallback}");
                fallback
            }
        },
        Err(e) => {
            warn!("Rate fetch for {from}->{to} failed ({e}), using fallback {fallback}");
            fallback
        }
    }
}

use super::ui;
use crate::core::config::AppConfig;
use crate::core::{
    AssetRefreshLoop, CurrencyRateProvider, ForecastRequestController, ForecastState,
    ForecastStatus, MarketDataProvider, RefreshSettings, RefreshStatus,
};
use anyhow::{Result, anyhow, bail};
use comfy_table::Cell;
use std::sync::Arc;

fn status_message(status: &ForecastStatus) -> &'static str {
    match status {
        ForecastStatus::Idle | ForecastStatus::Closed => "Waiting...",
        ForecastStatus::Selected => "Preparing forecast...",
        ForecastStatus::FetchingHistory => "Fetching price history...",
        ForecastStatus::FetchingRate => "Fetching exchange rate...",
        ForecastStatus::Training => "Training model...",
        ForecastStatus::Ready => "Done",
        ForecastStatus::Errored(_) => "Failed",
    }
}

impl ForecastState {
    /// Renders a ready forecast. Returns `None` while nothing is selected.
    pub fn display_as_table(&self, currency: &str) -> Option<String> {
        let asset = self.selected.as_ref()?;
        let currency = currency.to_uppercase();

        let mut output = format!(
            "Forecast: {} ({})\n\n",
            ui::style_text(&asset.name, ui::StyleType::Title),
            asset.symbol.to_uppercase()
        );

        if self.forecast.is_empty() {
            output.push_str(&ui::style_text(
                "Not enough price history to forecast this asset",
                ui::StyleType::Subtle,
            ));
            return Some(output);
        }

        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Day"),
            ui::header_cell(&format!("Price ({currency})")),
        ]);
        for (day, price) in self.forecast.iter().enumerate() {
            table.add_row(vec![
                Cell::new(format!("Day +{}", day + 1)),
                ui::highlighted_amount_cell(*price),
            ]);
        }
        output.push_str(&table.to_string());

        if let Some(rate) = self.rate {
            output.push_str(&format!(
                "\n\n{}",
                ui::style_text(&format!("Converted at rate {rate}"), ui::StyleType::Subtle)
            ));
        }
        Some(output)
    }
}

/// Text for the terminal states of a forecast, `None` for the rest.
pub fn display_state(state: &ForecastState, currency: &str) -> Option<String> {
    match &state.status {
        ForecastStatus::Ready => state.display_as_table(currency),
        ForecastStatus::Errored(message) => Some(ui::style_text(message, ui::StyleType::Error)),
        _ => None,
    }
}

/// Loads the asset list once, forecasts `asset_id` and prints the result.
pub async fn run(
    market: Arc<dyn MarketDataProvider>,
    rates: Arc<dyn CurrencyRateProvider>,
    config: &AppConfig,
    asset_id: &str,
) -> Result<()> {
    let currency = config.currency.display.as_str();
    let spinner = ui::new_spinner("Loading assets...");

    let refresh = AssetRefreshLoop::new(
        Arc::clone(&market),
        Arc::clone(&rates),
        RefreshSettings::from(config),
    );
    refresh.refresh_now().await;
    let snapshot = refresh.state();
    if let RefreshStatus::Errored(message) = &snapshot.status {
        spinner.finish_and_clear();
        bail!("{message}");
    }

    let asset = snapshot
        .assets
        .iter()
        .find(|a| a.id.eq_ignore_ascii_case(asset_id))
        .cloned()
        .ok_or_else(|| {
            spinner.finish_and_clear();
            anyhow!("Unknown asset: {asset_id}")
        })?;

    let controller = ForecastRequestController::from_config(market, rates, config);
    let mut updates = controller.subscribe();
    controller.select(asset);

    let state = loop {
        updates.changed().await?;
        let state = updates.borrow_and_update().clone();
        match &state.status {
            ForecastStatus::Ready | ForecastStatus::Errored(_) => break state,
            status => spinner.set_message(status_message(status)),
        }
    };
    spinner.finish_and_clear();

    if let ForecastStatus::Errored(message) = &state.status {
        bail!("{message}");
    }
    if let Some(output) = state.display_as_table(currency) {
        println!("{output}");
    }
    Ok(())
}

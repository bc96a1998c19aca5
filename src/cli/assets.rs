use super::forecast;
use super::ui;
use crate::core::config::AppConfig;
use crate::core::{
    Asset, AssetRefreshLoop, CurrencyRateProvider, ForecastRequestController, MarketDataProvider,
    RefreshSettings, RefreshState, RefreshStatus,
};
use anyhow::Result;
use comfy_table::{Cell, CellAlignment};
use std::sync::Arc;
use tracing::{debug, info};

impl RefreshState {
    pub fn display_as_table(&self, currency: &str) -> String {
        let currency = currency.to_uppercase();
        let mut table = ui::new_styled_table();

        table.set_header(vec![
            ui::header_cell("#"),
            ui::header_cell("Asset"),
            ui::header_cell("Symbol"),
            ui::header_cell(&format!("Price ({currency})")),
            ui::header_cell(&format!("Market Cap ({currency})")),
        ]);

        for (rank, asset) in self.assets.iter().enumerate() {
            table.add_row(vec![
                Cell::new(rank + 1).set_alignment(CellAlignment::Right),
                Cell::new(&asset.name),
                Cell::new(asset.symbol.to_uppercase()),
                asset
                    .current_price
                    .map_or_else(|| ui::amount_cell(None), ui::highlighted_amount_cell),
                ui::amount_cell(asset.market_cap),
            ]);
        }

        let mut output = format!(
            "Assets: {}\n\n",
            ui::style_text(&format!("{} listed", self.assets.len()), ui::StyleType::Title)
        );
        output.push_str(&table.to_string());

        if let (Some(updated_at), Some(rate)) = (self.updated_at, self.rate) {
            output.push_str(&format!(
                "\n\n{}",
                ui::style_text(
                    &format!(
                        "Updated {} at rate {}",
                        updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        rate
                    ),
                    ui::StyleType::Subtle
                )
            ));
        }
        output
    }
}

fn render(state: &RefreshState, currency: &str) {
    match &state.status {
        RefreshStatus::Idle | RefreshStatus::Fetching => {}
        RefreshStatus::Success => {
            ui::print_separator();
            println!("{}", state.display_as_table(currency));
        }
        RefreshStatus::Errored(message) => {
            eprintln!("{}", ui::style_text(message, ui::StyleType::Error));
            if !state.assets.is_empty() {
                eprintln!(
                    "{}",
                    ui::style_text("Showing the last loaded prices", ui::StyleType::Subtle)
                );
            }
        }
    }
}

/// Finds the asset waiting to be forecast in `state`. Once found, `pending`
/// is cleared so the asset is selected only once.
fn take_pending_selection(pending: &mut Option<String>, state: &RefreshState) -> Option<Asset> {
    let id = pending.as_deref()?;
    let asset = state
        .assets
        .iter()
        .find(|a| a.id.eq_ignore_ascii_case(id))?
        .clone();
    *pending = None;
    Some(asset)
}

/// Runs the live dashboard until Ctrl-C.
///
/// When `forecast_id` is given, that asset is selected for forecasting as
/// soon as it shows up in a snapshot.
pub async fn watch(
    market: Arc<dyn MarketDataProvider>,
    rates: Arc<dyn CurrencyRateProvider>,
    config: &AppConfig,
    forecast_id: Option<&str>,
) -> Result<()> {
    let currency = config.currency.display.as_str();

    let mut refresh = AssetRefreshLoop::new(
        Arc::clone(&market),
        Arc::clone(&rates),
        RefreshSettings::from(config),
    );
    let controller = ForecastRequestController::from_config(market, rates, config);

    let mut snapshots = refresh.subscribe();
    let mut forecasts = controller.subscribe();
    let mut pending_selection = forecast_id.map(str::to_string);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    refresh.start();

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("Interrupted, shutting down");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = snapshots.borrow_and_update().clone();
                render(&state, currency);

                if let Some(asset) = take_pending_selection(&mut pending_selection, &state) {
                    debug!("Selecting {} for forecast", asset.id);
                    controller.select(asset);
                }
            }
            changed = forecasts.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = forecasts.borrow_and_update().clone();
                if let Some(output) = forecast::display_state(&state, currency) {
                    ui::print_separator();
                    println!("{output}");
                }
            }
        }
    }

    controller.close();
    refresh.stop();
    Ok(())
}

use crate::config::RuntimeSettings;
use crate::data_context::MarketData;
use anyhow::{anyhow, Result};
use log::info;
use std::path::Path;

pub fn ensure_market_data_file(path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }

    Err(anyhow!(
        "Market data snapshot not found at {}. Generate it with `export-market-data` before running this command.",
        path.display()
    ))
}

/// Loads the snapshot named by the settings and cuts the configured window out of it.
pub fn load_market_window(settings: &RuntimeSettings) -> Result<MarketData> {
    ensure_market_data_file(&settings.market_data_file)?;
    let market_data = MarketData::load_from_file(&settings.market_data_file)?;
    let window = market_data.window(settings.data_start_position, settings.data_end_position);
    info!(
        "Using {} of {} samples (positions {} to {})",
        window.len(),
        market_data.len(),
        settings.data_start_position,
        settings.data_end_position
    );
    window.log_summary();
    Ok(window)
}

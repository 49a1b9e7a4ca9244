use crate::data_context::MarketData;
use anyhow::{anyhow, Result};
use log::info;
use std::path::{Path, PathBuf};

/// Merges the CSV directories into one series and writes it as a snapshot.
pub fn run(csv_dirs: &[PathBuf], output_path: &Path) -> Result<MarketData> {
    info!(
        "Generating market data snapshot at {} from {} CSV director{}",
        output_path.display(),
        csv_dirs.len(),
        if csv_dirs.len() == 1 { "y" } else { "ies" }
    );

    let market_data = MarketData::from_csv_dirs(csv_dirs)?;
    market_data.log_summary();
    market_data.save_to_file(output_path)?;

    let reloaded = MarketData::load_from_file(output_path)?;
    if reloaded.len() != market_data.len() {
        return Err(anyhow!(
            "Snapshot at {} holds {} samples after reload, expected {}",
            output_path.display(),
            reloaded.len(),
            market_data.len()
        ));
    }
    info!(
        "Market data snapshot successfully written to {}",
        output_path.display()
    );

    Ok(market_data)
}

use crate::commands::market_data_snapshot::load_market_window;
use crate::config::RuntimeSettings;
use crate::models::RunParameters;
use crate::optimizer::{run_simulation, RunSummary};
use crate::results::{
    write_portfolio_history, write_positions, PORTFOLIO_HISTORY_FILE, POSITIONS_FILE,
};
use anyhow::{Context, Result};
use log::info;
use serde_json::json;
use std::fs;
use std::path::Path;

const RUN_SUMMARY_FILE: &str = "run-summary.json";

pub fn run(
    settings: &RuntimeSettings,
    parameters: &RunParameters,
    export_dir: Option<&Path>,
) -> Result<RunSummary> {
    info!(
        "Model prediction capacity: {} timesteps in the future",
        parameters.predict_len
    );
    info!(
        "Initial cash amount in portfolio: {}$, initial crypto amount: {}",
        parameters.init_cash, parameters.init_crypto
    );
    info!(
        "Minimum expected returns to enter a position: {}$, stop loss: {}",
        parameters.min_expected_returns, parameters.stop_loss
    );

    let market_data = load_market_window(settings)?;
    let (summary, portfolio) = run_simulation(
        market_data.samples(),
        parameters,
        settings.position_sizing,
        settings.lookahead_sample_cap,
    )?;

    info!(
        "Final portfolio value: {:.2}$ | Returns: {:.2}$ ({:.2}%) | Trades: {} | Settled cash: {:.2}$",
        summary.final_portfolio_value,
        summary.final_portfolio_returns,
        summary.final_portfolio_returns_pct * 100.0,
        summary.trades,
        summary.settled_cash
    );

    if let Some(dir) = export_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create export directory {}", dir.display()))?;
        let history_path = dir.join(PORTFOLIO_HISTORY_FILE);
        write_portfolio_history(&history_path, market_data.samples(), &portfolio)?;
        let positions_path = dir.join(POSITIONS_FILE);
        write_positions(&positions_path, &portfolio)?;
        let summary_path = dir.join(RUN_SUMMARY_FILE);
        let summary_json =
            serde_json::to_string_pretty(&json!({ "parameters": parameters, "summary": summary }))?;
        fs::write(&summary_path, summary_json)
            .with_context(|| format!("Failed to write {}", summary_path.display()))?;
        info!(
            "Exported portfolio history to {} and {} positions to {}",
            history_path.display(),
            portfolio.positions().len(),
            positions_path.display()
        );
    }

    Ok(summary)
}

use crate::backtester::{GridSearch, GridSearchOptions, GridSearchReport};
use crate::commands::market_data_snapshot::load_market_window;
use crate::config::RuntimeSettings;
use crate::param_grid::ParameterGrid;
use crate::results::unique_grid_search_path;
use anyhow::Result;
use log::info;
use std::path::PathBuf;

pub fn run(
    settings: &RuntimeSettings,
    grid: &ParameterGrid,
    output: Option<PathBuf>,
    workers: Option<usize>,
    show_progress: bool,
) -> Result<GridSearchReport> {
    grid.validate()?;
    info!("Grid search over {} parameter combinations", grid.len());

    let market_data = load_market_window(settings)?;
    let output_path = match output {
        Some(path) => path,
        None => unique_grid_search_path(&settings.results_dir)?,
    };

    let search = GridSearch::new(
        market_data.samples_arc(),
        GridSearchOptions {
            sizing: settings.position_sizing,
            lookahead_sample_cap: settings.lookahead_sample_cap,
            show_progress,
            workers,
        },
    );
    let report = search.run(grid, &output_path)?;
    log_report(&report);
    Ok(report)
}

fn log_report(report: &GridSearchReport) {
    if let Some(best) = &report.best {
        info!(
            "Best returns {:.2}$ with predict_len={}, init_cash={}, init_crypto={}, fee={}, min_expected_returns={}, stop_loss={}",
            best.returns.unwrap_or_default(),
            best.predict_len,
            best.init_cash,
            best.init_crypto,
            best.fee,
            best.min_expected_returns,
            best.stop_loss
        );
    }
    info!(
        "Grid search results saved to {} ({}/{} runs finished)",
        report.output_path.display(),
        report.completed + report.failed,
        report.total
    );
}

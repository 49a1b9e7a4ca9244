use crate::models::GridSearchRow;
use crate::results::read_grid_search_rows;
use anyhow::{anyhow, Result};
use log::info;
use statrs::statistics::Statistics;
use std::path::Path;

type ParameterAccessor = fn(&GridSearchRow) -> f64;

const PARAMETERS: [(&str, ParameterAccessor); 6] = [
    ("predict_len", predict_len),
    ("init_cash", init_cash),
    ("init_crypto", init_crypto),
    ("fee", fee),
    ("min_expected_returns", min_expected_returns),
    ("stop_loss", stop_loss),
];

fn predict_len(row: &GridSearchRow) -> f64 {
    row.predict_len as f64
}

fn init_cash(row: &GridSearchRow) -> f64 {
    row.init_cash
}

fn init_crypto(row: &GridSearchRow) -> f64 {
    row.init_crypto
}

fn fee(row: &GridSearchRow) -> f64 {
    row.fee
}

fn min_expected_returns(row: &GridSearchRow) -> f64 {
    row.min_expected_returns
}

fn stop_loss(row: &GridSearchRow) -> f64 {
    row.stop_loss
}

/// Mean returns of every run sharing one value of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterEffect {
    pub parameter: &'static str,
    pub value: f64,
    pub runs: usize,
    pub mean_returns: f64,
    /// `None` with fewer than two runs.
    pub std_dev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridSearchAnalysis {
    pub total_rows: usize,
    pub failed_rows: usize,
    pub mean_returns: Option<f64>,
    pub best: Vec<GridSearchRow>,
    pub effects: Vec<ParameterEffect>,
}

pub fn run(csv_path: &Path, top: usize) -> Result<GridSearchAnalysis> {
    let rows = read_grid_search_rows(csv_path)?;
    if rows.is_empty() {
        return Err(anyhow!("No grid search rows found in {}", csv_path.display()));
    }
    info!("Analysing {} grid search rows from {}", rows.len(), csv_path.display());

    let analysis = analyse_rows(&rows, top);
    info!(
        "{} successful runs, {} failed, mean returns {}",
        analysis.total_rows - analysis.failed_rows,
        analysis.failed_rows,
        analysis
            .mean_returns
            .map(|mean| format!("{:.2}$", mean))
            .unwrap_or_else(|| "n/a".to_string())
    );
    for (rank, row) in analysis.best.iter().enumerate() {
        info!(
            "#{} returns {:.2}$ | predict_len={} init_cash={} init_crypto={} fee={} min_expected_returns={} stop_loss={}",
            rank + 1,
            row.returns.unwrap_or_default(),
            row.predict_len,
            row.init_cash,
            row.init_crypto,
            row.fee,
            row.min_expected_returns,
            row.stop_loss
        );
    }
    for effect in &analysis.effects {
        info!(
            "{} = {}: mean returns {:.2}$ over {} runs{}",
            effect.parameter,
            effect.value,
            effect.mean_returns,
            effect.runs,
            effect
                .std_dev
                .map(|std_dev| format!(" (std dev {:.2})", std_dev))
                .unwrap_or_default()
        );
    }

    Ok(analysis)
}

pub fn analyse_rows(rows: &[GridSearchRow], top: usize) -> GridSearchAnalysis {
    let successful: Vec<GridSearchRow> = rows
        .iter()
        .filter(|row| row.returns.is_some())
        .cloned()
        .collect();
    let all_returns: Vec<f64> = successful.iter().filter_map(|row| row.returns).collect();
    let mean_returns = (!all_returns.is_empty()).then(|| all_returns.iter().mean());

    let mut best = successful.clone();
    best.sort_by(|a, b| {
        b.returns
            .unwrap_or(f64::NEG_INFINITY)
            .total_cmp(&a.returns.unwrap_or(f64::NEG_INFINITY))
    });
    best.truncate(top);

    let mut effects = Vec::new();
    for (parameter, accessor) in PARAMETERS {
        let mut values: Vec<f64> = successful.iter().map(accessor).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();

        for value in values {
            let returns: Vec<f64> = successful
                .iter()
                .filter(|row| accessor(*row) == value)
                .filter_map(|row| row.returns)
                .collect();
            let std_dev = (returns.len() >= 2).then(|| returns.iter().std_dev());
            effects.push(ParameterEffect {
                parameter,
                value,
                runs: returns.len(),
                mean_returns: returns.iter().mean(),
                std_dev,
            });
        }
    }

    GridSearchAnalysis {
        total_rows: rows.len(),
        failed_rows: rows.len() - successful.len(),
        mean_returns,
        best,
        effects,
    }
}

use crate::models::{GridSearchRow, MarketSample};
use crate::portfolio::Portfolio;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

pub const GRID_SEARCH_DIR: &str = "grid-search";
pub const GRID_SEARCH_FILE_STEM: &str = "grid-search-results";
pub const PORTFOLIO_HISTORY_FILE: &str = "portfolio-history.csv";
pub const POSITIONS_FILE: &str = "positions.csv";

/// First free `grid-search-results[_N].csv` path under `<results_dir>/grid-search`,
/// creating the directory if needed.
pub fn unique_grid_search_path(results_dir: &Path) -> Result<PathBuf> {
    let dir = results_dir.join(GRID_SEARCH_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create results directory {}", dir.display()))?;

    let mut candidate = dir.join(format!("{}.csv", GRID_SEARCH_FILE_STEM));
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}.csv", GRID_SEARCH_FILE_STEM, counter));
        counter += 1;
    }
    Ok(candidate)
}

/// Append-only CSV sink for grid-search rows. The header is written with the first row.
pub struct GridSearchWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows_written: usize,
}

impl GridSearchWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create results file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows_written: 0,
        })
    }

    /// Appends one row and flushes it so a partial search leaves a readable file.
    pub fn append(&mut self, row: &GridSearchRow) -> Result<()> {
        self.writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", self.path.display()))?;
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

pub fn read_grid_search_rows(path: &Path) -> Result<Vec<GridSearchRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open results file {}", path.display()))?;
    reader
        .deserialize::<GridSearchRow>()
        .enumerate()
        .map(|(row, record)| {
            record.with_context(|| format!("Invalid row {} in {}", row + 1, path.display()))
        })
        .collect()
}

#[derive(Serialize)]
struct HistoryRecord {
    timestamp: i64,
    close: f64,
    value: f64,
    returns: f64,
    returns_pct: f64,
}

#[derive(Serialize)]
struct PositionRecord<'a> {
    id: &'a str,
    state: &'static str,
    entry_date: Option<i64>,
    entry_price: Option<f64>,
    entry_cash: Option<f64>,
    quantity: Option<f64>,
    exit_date: Option<i64>,
    exit_price: Option<f64>,
    exit_cash: Option<f64>,
    returns: Option<f64>,
    stop_loss: Option<f64>,
}

/// Writes one row per simulated step. Step `j` was observed at `samples[j]`.
pub fn write_portfolio_history(
    path: &Path,
    samples: &[MarketSample],
    portfolio: &Portfolio,
) -> Result<()> {
    let values = portfolio.value_history();
    let returns = portfolio.returns_history();
    if values.len() > samples.len() {
        return Err(anyhow!(
            "Portfolio history has {} steps but only {} samples were provided",
            values.len(),
            samples.len()
        ));
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let initial_cash = portfolio.initial_cash();
    for ((sample, &value), &step_returns) in samples.iter().zip(values).zip(returns) {
        writer.serialize(HistoryRecord {
            timestamp: sample.timestamp,
            close: sample.close,
            value,
            returns: step_returns,
            returns_pct: step_returns / initial_cash,
        })?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

pub fn write_positions(path: &Path, portfolio: &Portfolio) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for position in portfolio.positions() {
        let entry = position.entry();
        let exit = position.exit();
        writer.serialize(PositionRecord {
            id: position.id(),
            state: position.state().as_str(),
            entry_date: entry.map(|e| e.date),
            entry_price: entry.map(|e| e.price),
            entry_cash: entry.map(|e| e.cash),
            quantity: entry.map(|e| e.quantity),
            exit_date: exit.map(|e| e.date),
            exit_price: exit.map(|e| e.price),
            exit_cash: exit.map(|e| e.cash),
            returns: position.returns(),
            stop_loss: position.stop_loss(),
        })?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

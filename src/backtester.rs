use crate::models::{GridSearchRow, MarketSample, RunParameters};
use crate::optimizer::run_simulation;
use crate::param_grid::ParameterGrid;
use crate::policy::PositionSizing;
use crate::results::GridSearchWriter;
use crate::search_status::SearchStatus;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TASKS_PER_WORKER: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct GridSearchOptions {
    pub sizing: PositionSizing,
    pub lookahead_sample_cap: Option<usize>,
    pub show_progress: bool,
    /// Worker count override; defaults to the number of CPUs.
    pub workers: Option<usize>,
}

impl Default for GridSearchOptions {
    fn default() -> Self {
        Self {
            sizing: PositionSizing::default(),
            lookahead_sample_cap: None,
            show_progress: true,
            workers: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridSearchReport {
    pub output_path: PathBuf,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub best: Option<GridSearchRow>,
}

/// Runs every parameter combination of a grid against one shared price series.
///
/// Runs execute on a pool of worker threads; a single writer thread appends each
/// finished run to the results file.
pub struct GridSearch {
    samples: Arc<Vec<MarketSample>>,
    options: GridSearchOptions,
    status: SearchStatus,
    cancel: Arc<AtomicBool>,
}

impl GridSearch {
    pub fn new(samples: Arc<Vec<MarketSample>>, options: GridSearchOptions) -> Self {
        Self {
            samples,
            options,
            status: SearchStatus::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> &SearchStatus {
        &self.status
    }

    /// Setting the flag stops enqueueing new runs; runs already queued still finish.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn run(&self, grid: &ParameterGrid, output_path: &Path) -> Result<GridSearchReport> {
        grid.validate()?;
        let total = grid.len();
        for line in grid.describe_ranges() {
            info!("{}", line);
        }

        let writer = GridSearchWriter::create(output_path)?;
        let num_workers = std::cmp::min(
            total,
            std::cmp::max(1, self.options.workers.unwrap_or_else(num_cpus::get)),
        );
        info!("Running {} simulations on {} worker threads", total, num_workers);
        self.status.begin(total);
        self.status
            .set_phase(format!("Running {} simulations in parallel", total));

        let capacity = num_workers * TASKS_PER_WORKER;
        let (task_tx, task_rx): (Sender<RunParameters>, Receiver<RunParameters>) =
            bounded(capacity);
        let (result_tx, result_rx): (Sender<GridSearchRow>, Receiver<GridSearchRow>) =
            bounded(capacity);

        let mut handles = Vec::new();
        for worker_id in 0..num_workers {
            let rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let samples = Arc::clone(&self.samples);
            let sizing = self.options.sizing;
            let cap = self.options.lookahead_sample_cap;

            let handle = thread::spawn(move || {
                while let Ok(parameters) = rx.recv() {
                    let start_time = Instant::now();
                    let returns =
                        match run_simulation(samples.as_slice(), &parameters, sizing, cap) {
                            Ok((summary, _)) => {
                                info!(
                                    "Worker {} finished run in {:.1}s. Returns: {:.2}, Trades: {}, Params: [{}]",
                                    worker_id,
                                    start_time.elapsed().as_secs_f64(),
                                    summary.final_portfolio_returns,
                                    summary.trades,
                                    parameters.describe()
                                );
                                Some(summary.final_portfolio_returns)
                            }
                            Err(error) => {
                                warn!(
                                    "Worker {} failed run [{}]: {}",
                                    worker_id,
                                    parameters.describe(),
                                    error
                                );
                                None
                            }
                        };

                    if result_tx
                        .send(GridSearchRow::new(&parameters, returns))
                        .is_err()
                    {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(task_rx);
        drop(result_tx);

        let pb = if self.options.show_progress {
            ProgressBar::new(total as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .map_err(|e| anyhow!("Invalid progress bar template: {}", e))?
                .progress_chars("#>-"),
        );

        let status = self.status.clone();
        let writer_handle = thread::spawn(move || write_results(writer, result_rx, status, pb));

        let mut enqueued = 0usize;
        for parameters in grid.iter() {
            if self.cancel.load(Ordering::SeqCst) {
                info!(
                    "Grid search cancelled after enqueueing {}/{} runs",
                    enqueued, total
                );
                break;
            }
            if task_tx.send(parameters).is_err() {
                warn!("All grid search workers stopped before the grid was exhausted");
                break;
            }
            enqueued += 1;
        }
        drop(task_tx);

        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow!("Grid search worker thread panicked"))?;
        }
        let best = writer_handle
            .join()
            .map_err(|_| anyhow!("Grid search writer thread panicked"))??;

        let cancelled = enqueued < total;
        self.status.set_phase(if cancelled {
            "Grid search cancelled"
        } else {
            "Grid search completed"
        });
        let snapshot = self.status.snapshot();
        info!(
            "{}: results saved to {} ({} completed, {} failed, {})",
            snapshot.phase,
            output_path.display(),
            snapshot.completed_runs,
            snapshot.failed_runs,
            snapshot.progress_message()
        );

        Ok(GridSearchReport {
            output_path: output_path.to_path_buf(),
            total,
            completed: snapshot.completed_runs,
            failed: snapshot.failed_runs,
            cancelled,
            best,
        })
    }
}

fn write_results(
    mut writer: GridSearchWriter,
    result_rx: Receiver<GridSearchRow>,
    status: SearchStatus,
    pb: ProgressBar,
) -> Result<Option<GridSearchRow>> {
    let mut best: Option<GridSearchRow> = None;

    loop {
        match result_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(row) => {
                writer.append(&row)?;
                status.record_run(row.returns);
                pb.inc(1);
                pb.set_message(status.snapshot().progress_message());
                if let Some(returns) = row.returns {
                    let is_best = best
                        .as_ref()
                        .and_then(|current| current.returns)
                        .map_or(true, |current| returns > current);
                    if is_best {
                        best = Some(row);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let failed_runs = status.snapshot().failed_runs;
    if failed_runs > 0 {
        warn!("Grid search completed with {} failed runs", failed_runs);
        pb.finish_with_message("Grid search completed with errors");
    } else {
        pb.finish_with_message("Grid search completed");
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::read_grid_search_rows;
    use tempfile::tempdir;

    fn samples() -> Arc<Vec<MarketSample>> {
        let prices = [100.0, 101.0, 99.0, 104.0, 108.0, 103.0, 107.0, 111.0, 106.0, 109.0];
        Arc::new(
            prices
                .iter()
                .enumerate()
                .map(|(i, &price)| MarketSample::flat(i as i64 * 60, price))
                .collect(),
        )
    }

    fn options() -> GridSearchOptions {
        GridSearchOptions {
            show_progress: false,
            workers: Some(2),
            ..Default::default()
        }
    }

    fn grid() -> ParameterGrid {
        ParameterGrid {
            predict_len: vec![2, 5],
            init_cash: vec![1000.0, 5000.0],
            init_crypto: vec![0.0],
            fee: vec![0.0, 0.005],
            min_expected_returns: vec![0.0],
            stop_loss: vec![-2.0],
        }
    }

    #[test]
    fn writes_one_row_per_combination() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let search = GridSearch::new(samples(), options());
        let report = search.run(&grid(), &path).unwrap();

        assert_eq!(report.total, 8);
        assert_eq!(report.completed, 8);
        assert_eq!(report.failed, 0);
        assert!(!report.cancelled);

        let rows = read_grid_search_rows(&path).unwrap();
        assert_eq!(rows.len(), 8);
        for expected in grid().iter() {
            assert!(rows.iter().any(|row| row.parameters() == expected));
        }

        let best = report.best.unwrap();
        let best_returns = best.returns.unwrap();
        assert!(rows
            .iter()
            .all(|row| row.returns.unwrap() <= best_returns));

        let snapshot = search.status().snapshot();
        assert_eq!(snapshot.completed_runs, 8);
        assert_eq!(snapshot.best_returns, Some(best_returns));
    }

    #[test]
    fn rows_match_sequential_runs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let data = samples();
        GridSearch::new(Arc::clone(&data), options())
            .run(&grid(), &path)
            .unwrap();

        for row in read_grid_search_rows(&path).unwrap() {
            let (summary, _) =
                run_simulation(&data, &row.parameters(), PositionSizing::default(), None).unwrap();
            assert_eq!(row.returns, Some(summary.final_portfolio_returns));
        }
    }

    #[test]
    fn failed_runs_leave_an_empty_returns_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let mut grid = grid();
        grid.fee = vec![0.0, 1.5];

        let report = GridSearch::new(samples(), options())
            .run(&grid, &path)
            .unwrap();
        assert_eq!(report.completed, 4);
        assert_eq!(report.failed, 4);

        let rows = read_grid_search_rows(&path).unwrap();
        assert_eq!(rows.len(), 8);
        assert!(rows
            .iter()
            .filter(|row| row.fee == 1.5)
            .all(|row| row.returns.is_none()));
    }

    #[test]
    fn repeated_searches_report_their_own_counts() {
        let dir = tempdir().unwrap();
        let search = GridSearch::new(samples(), options());
        let first = search.run(&grid(), &dir.path().join("first.csv")).unwrap();
        let second = search.run(&grid(), &dir.path().join("second.csv")).unwrap();

        assert_eq!(first.completed, 8);
        assert_eq!(second.completed, 8);
        assert_eq!(second.failed, 0);
        let snapshot = search.status().snapshot();
        assert_eq!(snapshot.phase, "Grid search completed");
        assert_eq!(snapshot.finished_runs(), 8);
    }

    #[test]
    fn cancellation_stops_enqueueing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let search = GridSearch::new(samples(), options());
        search.cancel_flag().store(true, Ordering::SeqCst);

        let report = search.run(&grid(), &path).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.completed + report.failed, 0);
        assert!(report.best.is_none());
        assert_eq!(search.status().snapshot().phase, "Grid search cancelled");
    }

    #[test]
    fn empty_grid_is_rejected() {
        let dir = tempdir().unwrap();
        let mut grid = grid();
        grid.stop_loss.clear();
        let result = GridSearch::new(samples(), options()).run(&grid, &dir.path().join("r.csv"));
        assert!(result.is_err());
    }
}

use std::sync::{Arc, Mutex};

/// Progress of a running grid search, shared between the writer and observers.
#[derive(Clone, Default)]
pub struct SearchStatus {
    inner: Arc<Mutex<SearchStatusData>>,
}

#[derive(Default)]
struct SearchStatusData {
    phase: String,
    total_runs: usize,
    completed_runs: usize,
    failed_runs: usize,
    best_returns: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchStatusSnapshot {
    pub phase: String,
    pub total_runs: usize,
    pub completed_runs: usize,
    pub failed_runs: usize,
    pub best_returns: Option<f64>,
}

impl SearchStatusSnapshot {
    pub fn finished_runs(&self) -> usize {
        self.completed_runs + self.failed_runs
    }

    /// Short progress line, e.g. `best 12.50$ | 1 failed`.
    pub fn progress_message(&self) -> String {
        let best = match self.best_returns {
            Some(returns) => format!("best {:.2}$", returns),
            None => "no successful run yet".to_string(),
        };
        if self.failed_runs > 0 {
            format!("{} | {} failed", best, self.failed_runs)
        } else {
            best
        }
    }
}

impl SearchStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SearchStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    /// Starts a new search of `total_runs`, clearing the counters of a previous one.
    pub fn begin(&self, total_runs: usize) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_runs = total_runs;
            data.completed_runs = 0;
            data.failed_runs = 0;
            data.best_returns = None;
        }
    }

    /// Counts one finished run; `returns` is `None` for a failed run.
    pub fn record_run(&self, returns: Option<f64>) {
        if let Ok(mut data) = self.inner.lock() {
            match returns {
                Some(value) => {
                    data.completed_runs += 1;
                    if data.best_returns.map_or(true, |best| value > best) {
                        data.best_returns = Some(value);
                    }
                }
                None => data.failed_runs += 1,
            }
        }
    }

    pub fn snapshot(&self) -> SearchStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            SearchStatusSnapshot {
                phase: data.phase.clone(),
                total_runs: data.total_runs,
                completed_runs: data.completed_runs,
                failed_runs: data.failed_runs,
                best_returns: data.best_returns,
            }
        } else {
            SearchStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_runs: 0,
                completed_runs: 0,
                failed_runs: 0,
                best_returns: None,
            }
        }
    }
}

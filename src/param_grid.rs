use crate::models::RunParameters;
use anyhow::{anyhow, Result};

/// Candidate values for each of the six run parameters.
///
/// Runs are enumerated as the cartesian product in declaration order, the last
/// list varying fastest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterGrid {
    pub predict_len: Vec<usize>,
    pub init_cash: Vec<f64>,
    pub init_crypto: Vec<f64>,
    pub fee: Vec<f64>,
    pub min_expected_returns: Vec<f64>,
    pub stop_loss: Vec<f64>,
}

impl ParameterGrid {
    pub fn validate(&self) -> Result<()> {
        let lists = [
            ("predict_len", self.predict_len.len()),
            ("init_cash", self.init_cash.len()),
            ("init_crypto", self.init_crypto.len()),
            ("fee", self.fee.len()),
            ("min_expected_returns", self.min_expected_returns.len()),
            ("stop_loss", self.stop_loss.len()),
        ];
        for (name, len) in lists {
            if len == 0 {
                return Err(anyhow!("Parameter list {} must not be empty", name));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.predict_len.len()
            * self.init_cash.len()
            * self.init_crypto.len()
            * self.fee.len()
            * self.min_expected_returns.len()
            * self.stop_loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = RunParameters> + '_ {
        self.predict_len.iter().flat_map(move |&predict_len| {
            self.init_cash.iter().flat_map(move |&init_cash| {
                self.init_crypto.iter().flat_map(move |&init_crypto| {
                    self.fee.iter().flat_map(move |&fee| {
                        self.min_expected_returns
                            .iter()
                            .flat_map(move |&min_expected_returns| {
                                self.stop_loss.iter().map(move |&stop_loss| RunParameters {
                                    predict_len,
                                    init_cash,
                                    init_crypto,
                                    fee,
                                    min_expected_returns,
                                    stop_loss,
                                })
                            })
                    })
                })
            })
        })
    }

    /// Human-readable range of every list, logged before a search starts.
    pub fn describe_ranges(&self) -> Vec<String> {
        vec![
            format!(
                "Model prediction capacity: between {} and {} timesteps in the future",
                self.predict_len.iter().min().copied().unwrap_or_default(),
                self.predict_len.iter().max().copied().unwrap_or_default()
            ),
            format_range("Initial cash amount in portfolio", &self.init_cash),
            format_range("Initial crypto amount in portfolio", &self.init_crypto),
            format_range("Transaction fee", &self.fee),
            format_range(
                "Minimum expected returns to enter a position",
                &self.min_expected_returns,
            ),
            format_range("Stop loss", &self.stop_loss),
        ]
    }
}

fn format_range(label: &str, values: &[f64]) -> String {
    let (min, max) = min_max(values);
    format!("{}: between {} and {}", label, min, max)
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold(None, |acc: Option<(f64, f64)>, &value| match acc {
            Some((min, max)) => Some((min.min(value), max.max(value))),
            None => Some((value, value)),
        })
        .unwrap_or((0.0, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> ParameterGrid {
        ParameterGrid {
            predict_len: vec![10, 50],
            init_cash: vec![1000.0, 5000.0, 10_000.0],
            init_crypto: vec![0.0],
            fee: vec![0.0, 0.005],
            min_expected_returns: vec![0.0],
            stop_loss: vec![-2.0, -0.1],
        }
    }

    #[test]
    fn enumerates_the_full_cartesian_product() {
        let grid = grid();
        let runs: Vec<RunParameters> = grid.iter().collect();
        assert_eq!(grid.len(), 24);
        assert_eq!(runs.len(), 24);

        assert_eq!(runs[0].predict_len, 10);
        assert_eq!(runs[0].stop_loss, -2.0);
        assert_eq!(runs[1].stop_loss, -0.1);
        assert_eq!(runs[2].fee, 0.005);
        assert_eq!(runs[23].predict_len, 50);
        assert_eq!(runs[23].init_cash, 10_000.0);

        for (i, a) in runs.iter().enumerate() {
            for b in runs.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn empty_list_is_rejected() {
        let mut grid = grid();
        grid.fee.clear();
        assert!(grid.is_empty());
        let err = grid.validate().unwrap_err();
        assert!(err.to_string().contains("fee"));
    }

    #[test]
    fn describes_ranges() {
        let lines = grid().describe_ranges();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].contains("between 10 and 50"));
        assert!(lines[1].contains("between 1000 and 10000"));
    }
}

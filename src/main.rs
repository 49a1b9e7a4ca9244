use anyhow::Result;
use backtest_engine::{
    commands::{analyse, backtest, export_market_data, grid_search},
    config::RuntimeSettings,
    models::RunParameters,
    param_grid::ParameterGrid,
    policy::DEFAULT_STOP_LOSS,
};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "backtest-engine")]
#[command(about = "Lookahead trading policy simulator and parameter grid search")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the settings otherwise read from the environment.
#[derive(Args)]
struct DataArgs {
    /// Path to the market data snapshot file
    #[arg(long = "data-file", value_name = "PATH")]
    data_file: Option<PathBuf>,
    /// First sample of the simulated window (negative counts from the end)
    #[arg(long, allow_negative_numbers = true)]
    start_position: Option<i64>,
    /// End of the simulated window, exclusive (negative counts from the end)
    #[arg(long, allow_negative_numbers = true)]
    end_position: Option<i64>,
    /// Stride long lookahead windows down to about this many samples
    #[arg(long)]
    lookahead_sample_cap: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate the trading policy once over the configured data window
    Backtest {
        /// How far in the future prices are known, in samples
        #[arg(long)]
        predict_len: usize,
        /// Initial amount of cash in the portfolio
        #[arg(long)]
        init_cash: f64,
        /// Initial amount of crypto in the portfolio
        #[arg(long, default_value_t = 0.0)]
        init_crypto: f64,
        /// Fee rate charged on every transaction
        #[arg(long)]
        fee: f64,
        /// Minimum returns a new position must promise before buying
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        min_expected_returns: f64,
        /// Loss ratio relative to the entry cash that forces a sell (negative)
        #[arg(long, default_value_t = DEFAULT_STOP_LOSS, allow_negative_numbers = true)]
        stop_loss: f64,
        /// Directory for the portfolio history and positions CSV exports
        #[arg(long, value_name = "DIR")]
        export_dir: Option<PathBuf>,
        #[command(flatten)]
        data: DataArgs,
    },
    /// Run every combination of the parameter lists in parallel and save the returns as CSV
    GridSearch {
        #[arg(long, value_delimiter = ',', num_args = 1.., required = true)]
        predict_len_list: Vec<usize>,
        #[arg(long, value_delimiter = ',', num_args = 1.., required = true)]
        init_cash_list: Vec<f64>,
        #[arg(long, value_delimiter = ',', num_args = 1.., default_value = "0")]
        init_crypto_list: Vec<f64>,
        #[arg(long, value_delimiter = ',', num_args = 1.., required = true)]
        fee_list: Vec<f64>,
        #[arg(long, value_delimiter = ',', num_args = 1.., default_value = "0", allow_negative_numbers = true)]
        min_expected_returns_list: Vec<f64>,
        #[arg(long, value_delimiter = ',', num_args = 1.., default_value = "-2", allow_negative_numbers = true)]
        stop_loss_list: Vec<f64>,
        /// Results directory (a unique file is created under <DIR>/grid-search)
        #[arg(long, value_name = "DIR")]
        results_dir: Option<PathBuf>,
        /// Exact output file, bypassing the unique name lookup
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Number of worker threads (defaults to the CPU count)
        #[arg(long)]
        workers: Option<usize>,
        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
        #[command(flatten)]
        data: DataArgs,
    },
    /// Merge CSV price directories into a market data snapshot
    ExportMarketData {
        /// Directories of CSV files, earlier directories win on duplicate timestamps
        #[arg(required = true, num_args = 1..)]
        csv_dirs: Vec<PathBuf>,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Summarise a grid search results file
    Analyse {
        /// Grid search results CSV
        #[arg(long = "csv-path", value_name = "PATH")]
        csv_path: PathBuf,
        /// Number of best rows to report
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli { command } = cli;

    let dotenv_path = dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Some(path) = dotenv_path {
        debug!("Loaded environment from {}", path.display());
    }

    info!("Starting backtest engine. Not financial advice. Use at your own risk.");
    let settings = RuntimeSettings::from_settings_map(&RuntimeSettings::settings_from_env())?;

    match command {
        Commands::Backtest {
            predict_len,
            init_cash,
            init_crypto,
            fee,
            min_expected_returns,
            stop_loss,
            export_dir,
            data,
        } => {
            let settings = apply_data_args(settings, data);
            let parameters = RunParameters {
                predict_len,
                init_cash,
                init_crypto,
                fee,
                min_expected_returns,
                stop_loss,
            };
            backtest::run(&settings, &parameters, export_dir.as_deref())?;
        }
        Commands::GridSearch {
            predict_len_list,
            init_cash_list,
            init_crypto_list,
            fee_list,
            min_expected_returns_list,
            stop_loss_list,
            results_dir,
            output,
            workers,
            no_progress,
            data,
        } => {
            let mut settings = apply_data_args(settings, data);
            if let Some(dir) = results_dir {
                settings.results_dir = dir;
            }
            let grid = ParameterGrid {
                predict_len: predict_len_list,
                init_cash: init_cash_list,
                init_crypto: init_crypto_list,
                fee: fee_list,
                min_expected_returns: min_expected_returns_list,
                stop_loss: stop_loss_list,
            };
            grid_search::run(&settings, &grid, output, workers, !no_progress)?;
        }
        Commands::ExportMarketData { csv_dirs, output } => {
            let output_path = output.unwrap_or(settings.market_data_file);
            export_market_data::run(&csv_dirs, &output_path)?;
        }
        Commands::Analyse { csv_path, top } => {
            analyse::run(&csv_path, top)?;
        }
    }

    Ok(())
}

fn apply_data_args(mut settings: RuntimeSettings, data: DataArgs) -> RuntimeSettings {
    if let Some(path) = data.data_file {
        settings.market_data_file = path;
    }
    if let Some(start) = data.start_position {
        settings.data_start_position = start;
    }
    if let Some(end) = data.end_position {
        settings.data_end_position = end;
    }
    if let Some(cap) = data.lookahead_sample_cap {
        settings.lookahead_sample_cap = (cap > 0).then_some(cap);
    }
    settings
}

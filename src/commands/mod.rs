pub mod analyse;
pub mod backtest;
pub mod export_market_data;
pub mod grid_search;
pub mod market_data_snapshot;

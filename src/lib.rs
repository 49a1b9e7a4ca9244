pub mod backtester;
pub mod commands;
pub mod config;
pub mod data_context;
pub mod error;
pub mod fees;
pub mod models;
pub mod optimizer;
pub mod param_grid;
pub mod policy;
pub mod portfolio;
pub mod position;
pub mod results;
pub mod search_status;

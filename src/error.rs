use crate::position::PositionState;
use thiserror::Error;

/// Failures raised by the simulation core. Every variant aborts the run that raised it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("position {position_id} is {found}, expected {expected}")]
    InvalidState {
        position_id: String,
        expected: PositionState,
        found: PositionState,
    },

    #[error("insufficient funds: requested {requested:.2}, available {available:.2}")]
    InsufficientFunds { requested: f64, available: f64 },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SimulationError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        SimulationError::Config(message.into())
    }
}

pub type SimulationResult<T> = Result<T, SimulationError>;

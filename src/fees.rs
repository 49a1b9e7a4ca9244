//! Cash/quantity conversions under a proportional transaction fee.
//!
//! The fee is charged on the buy side by inflating the effective price and on the
//! sell side by deflating the proceeds. A fee of `0.0` is frictionless.

/// Quantity obtainable for `cash` at `price` once the buy-side fee is applied.
pub fn cash_to_quantity(cash: f64, price: f64, fee: f64) -> f64 {
    let fee_adjusted_price = price * (1.0 + fee);
    cash / fee_adjusted_price
}

/// Cash received for selling `quantity` at `price` net of the sell-side fee.
pub fn quantity_to_cash(quantity: f64, price: f64, fee: f64) -> f64 {
    quantity * price * (1.0 - fee)
}

/// Signed cash profit of selling `quantity` at `exit_price` after committing `entry_cash`.
pub fn compute_returns(entry_cash: f64, quantity: f64, exit_price: f64, exit_fee: f64) -> f64 {
    quantity_to_cash(quantity, exit_price, exit_fee) - entry_cash
}

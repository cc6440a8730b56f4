//! Position sizing
//!
//! Pure functions that turn a risk budget and a stop distance into a quantity.

use thiserror::Error;

/// Quantities are floored to this many decimal places
pub const QUANTITY_DECIMALS: i32 = 8;

/// Share of the per-trade risk that is always allocated; the rest scales with
/// regime confidence
const BASE_RISK_SCALE: f64 = 0.7;

#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("Invalid stop distance: entry {entry_price}, stop {stop_loss}")]
    InvalidStopDistance { entry_price: f64, stop_loss: f64 },
    #[error("Invalid entry price: {0}")]
    InvalidEntryPrice(f64),
    #[error("Invalid balance: {0}")]
    InvalidBalance(f64),
    #[error("Sized quantity rounds to zero")]
    ZeroQuantity,
}

/// Quantity risking `balance * risk_fraction` between entry and stop, capped so
/// the notional never exceeds `balance * portfolio_cap_fraction`.
pub fn size(
    balance: f64,
    risk_fraction: f64,
    entry_price: f64,
    stop_loss: f64,
    portfolio_cap_fraction: f64,
) -> Result<f64, SizingError> {
    let stop_distance = entry_price - stop_loss;
    if !(stop_distance > 0.0) || !stop_distance.is_finite() {
        return Err(SizingError::InvalidStopDistance {
            entry_price,
            stop_loss,
        });
    }
    if !(entry_price > 0.0) {
        return Err(SizingError::InvalidEntryPrice(entry_price));
    }
    if !(balance > 0.0) || !balance.is_finite() {
        return Err(SizingError::InvalidBalance(balance));
    }

    let risk_quantity = (balance * risk_fraction) / stop_distance;
    let cap_quantity = (balance * portfolio_cap_fraction) / entry_price;
    let quantity = floor_quantity(risk_quantity.min(cap_quantity));

    if quantity > 0.0 {
        Ok(quantity)
    } else {
        Err(SizingError::ZeroQuantity)
    }
}

/// Per-trade risk fraction for a tier: allocation times per-trade risk,
/// scaled between 70% and 100% by regime confidence.
pub fn risk_fraction(capital_allocation: f64, risk_per_trade: f64, regime_confidence: f64) -> f64 {
    let confidence = if regime_confidence.is_finite() {
        regime_confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let scale = BASE_RISK_SCALE + (1.0 - BASE_RISK_SCALE) * confidence;
    capital_allocation * risk_per_trade * scale
}

fn floor_quantity(quantity: f64) -> f64 {
    let factor = 10f64.powi(QUANTITY_DECIMALS);
    (quantity * factor).floor() / factor
}

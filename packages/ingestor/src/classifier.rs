//! Buy/Sell Classification
//!
//! Derives the trade direction and counter-token from a decoded [`SwapIntent`].

use std::fmt;

use alloy::primitives::utils::format_units;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::decoder::SwapIntent;

/// Decimal scale applied to both the native value and the token amount
pub const AMOUNT_DECIMALS: u8 = 18;

/// Direction of a swap relative to the tracked token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    BuyToken,
    SellToken,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::BuyToken => "BuyToken",
            Action::SellToken => "SellToken",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A swap intent with its derived direction and amounts
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedEvent {
    pub intent: SwapIntent,
    pub action: Action,
    /// Counter-token address (second path entry)
    pub token_address: Address,
    /// Native value of the transaction, in decimal units
    pub amount_usdt: f64,
    /// Minimum amount out, in decimal units
    pub amount_token: f64,
}

/// Classify a decoded swap
///
/// # Arguments
/// * `intent` - The decoded swap parameters
/// * `value` - Native-currency value attached to the transaction, in base units
/// * `tracked` - The tracked token address
///
/// The action is `BuyToken` iff the first path entry is the tracked token. The
/// counter-token is always `path[1]`; intermediate hops of longer paths are ignored.
pub fn classify(intent: SwapIntent, value: U256, tracked: Address) -> ClassifiedEvent {
    let action = if intent.token_in() == tracked {
        Action::BuyToken
    } else {
        Action::SellToken
    };

    ClassifiedEvent {
        action,
        token_address: intent.second_hop(),
        amount_usdt: from_base_units(value),
        amount_token: from_base_units(intent.amount_out_min()),
        intent,
    }
}

/// Convert a base-unit amount to decimal units at [`AMOUNT_DECIMALS`]
pub fn from_base_units(amount: U256) -> f64 {
    // 18 decimals is always within the supported range, and the formatted string
    // is a plain decimal literal.
    format_units(amount, AMOUNT_DECIMALS)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or_default()
}

//! Destination Filtering
//!
//! Rejects pending transactions that are not addressed to the tracked token contract,
//! before any decoding or network work happens. Also labels the router swap methods
//! whose calldata shares the `(uint256, uint256, address[], address, uint256)` tuple.

use std::collections::HashMap;
use std::sync::LazyLock;

use alloy::primitives::Address;

/// Router swap methods taking the swap tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwapMethod {
    /// swapExactTokensForTokens - 0x38ed1739
    SwapExactTokensForTokens,
    /// swapTokensForExactTokens - 0x8803dbee
    SwapTokensForExactTokens,
    /// swapExactTokensForETH - 0x18cbafe5
    SwapExactTokensForEth,
    /// swapTokensForExactETH - 0x4a25d94a
    SwapTokensForExactEth,
    /// swapExactTokensForTokensSupportingFeeOnTransferTokens - 0x5c11d795
    SwapExactTokensForTokensFeeOnTransfer,
    /// swapExactTokensForETHSupportingFeeOnTransferTokens - 0x791ac947
    SwapExactTokensForEthFeeOnTransfer,
}

impl SwapMethod {
    pub const ALL: [SwapMethod; 6] = [
        SwapMethod::SwapExactTokensForTokens,
        SwapMethod::SwapTokensForExactTokens,
        SwapMethod::SwapExactTokensForEth,
        SwapMethod::SwapTokensForExactEth,
        SwapMethod::SwapExactTokensForTokensFeeOnTransfer,
        SwapMethod::SwapExactTokensForEthFeeOnTransfer,
    ];

    /// Returns the 4-byte method selector
    pub fn selector(&self) -> [u8; 4] {
        match self {
            SwapMethod::SwapExactTokensForTokens => [0x38, 0xed, 0x17, 0x39],
            SwapMethod::SwapTokensForExactTokens => [0x88, 0x03, 0xdb, 0xee],
            SwapMethod::SwapExactTokensForEth => [0x18, 0xcb, 0xaf, 0xe5],
            SwapMethod::SwapTokensForExactEth => [0x4a, 0x25, 0xd9, 0x4a],
            SwapMethod::SwapExactTokensForTokensFeeOnTransfer => [0x5c, 0x11, 0xd7, 0x95],
            SwapMethod::SwapExactTokensForEthFeeOnTransfer => [0x79, 0x1a, 0xc9, 0x47],
        }
    }

    /// Returns the human-readable method name
    pub fn name(&self) -> &'static str {
        match self {
            SwapMethod::SwapExactTokensForTokens => "swapExactTokensForTokens",
            SwapMethod::SwapTokensForExactTokens => "swapTokensForExactTokens",
            SwapMethod::SwapExactTokensForEth => "swapExactTokensForETH",
            SwapMethod::SwapTokensForExactEth => "swapTokensForExactETH",
            SwapMethod::SwapExactTokensForTokensFeeOnTransfer => {
                "swapExactTokensForTokensSupportingFeeOnTransferTokens"
            }
            SwapMethod::SwapExactTokensForEthFeeOnTransfer => {
                "swapExactTokensForETHSupportingFeeOnTransferTokens"
            }
        }
    }
}

/// Static lookup table for method selectors
static SWAP_METHODS: LazyLock<HashMap<[u8; 4], SwapMethod>> =
    LazyLock::new(|| SwapMethod::ALL.iter().map(|m| (m.selector(), *m)).collect());

/// Get the swap method for a given selector, if it matches
pub fn get_swap_method(method_id: &[u8; 4]) -> Option<SwapMethod> {
    SWAP_METHODS.get(method_id).copied()
}

/// Label calldata with its router method name, `"unknown"` when the selector is not listed
pub fn method_label(input: &[u8]) -> &'static str {
    crate::decoder::extract_method_id(input)
        .and_then(|id| get_swap_method(&id))
        .map(|m| m.name())
        .unwrap_or("unknown")
}

/// Check whether a transaction destination is the tracked token contract
///
/// Addresses compare by their 20 raw bytes, so hex casing and checksumming never
/// affect the outcome. Contract creations (`None`) never match.
pub fn is_tracked_destination(to: Option<Address>, tracked: Address) -> bool {
    to == Some(tracked)
}

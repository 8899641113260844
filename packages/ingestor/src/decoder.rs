//! Swap Calldata Decoder
//!
//! Decodes router-style swap calldata into a [`SwapIntent`].
//! The 4-byte method selector is skipped and the remaining bytes are read as the ABI tuple
//! `(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline)`.

use alloy::primitives::{Address, U256};
use alloy::sol_types::SolValue;
use thiserror::Error;

/// Length of the method selector prefix in bytes
pub const SELECTOR_LEN: usize = 4;

/// Minimum number of hops in a swap path
pub const MIN_PATH_LEN: usize = 2;

/// Parameter tuple shared by the router swap methods
type SwapParams = (U256, U256, Vec<Address>, Address, U256);

/// Errors that can occur during calldata decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Calldata too short for method selector: {0} bytes")]
    TooShort(usize),

    #[error("Calldata does not match swap schema: {0}")]
    SchemaMismatch(String),
}

/// Decoded swap parameters
///
/// Only constructed through [`decode_swap`] or [`SwapIntent::try_new`], so the path
/// always holds at least [`MIN_PATH_LEN`] entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapIntent {
    amount_in: U256,
    amount_out_min: U256,
    path: Vec<Address>,
    recipient: Address,
    deadline: U256,
}

impl SwapIntent {
    /// Build an intent, rejecting paths shorter than [`MIN_PATH_LEN`]
    pub fn try_new(
        amount_in: U256,
        amount_out_min: U256,
        path: Vec<Address>,
        recipient: Address,
        deadline: U256,
    ) -> Result<Self, DecodeError> {
        if path.len() < MIN_PATH_LEN {
            return Err(DecodeError::SchemaMismatch(format!(
                "swap path has {} entries, need at least {}",
                path.len(),
                MIN_PATH_LEN
            )));
        }

        Ok(Self {
            amount_in,
            amount_out_min,
            path,
            recipient,
            deadline,
        })
    }

    pub fn amount_in(&self) -> U256 {
        self.amount_in
    }

    pub fn amount_out_min(&self) -> U256 {
        self.amount_out_min
    }

    pub fn path(&self) -> &[Address] {
        &self.path
    }

    pub fn recipient(&self) -> Address {
        self.recipient
    }

    pub fn deadline(&self) -> U256 {
        self.deadline
    }

    /// First hop of the path (the token being sold)
    pub fn token_in(&self) -> Address {
        self.path[0]
    }

    /// Second hop of the path
    pub fn second_hop(&self) -> Address {
        self.path[1]
    }

    /// Encode back into calldata behind the given selector
    pub fn to_calldata(&self, selector: [u8; 4]) -> Vec<u8> {
        let params: SwapParams = (
            self.amount_in,
            self.amount_out_min,
            self.path.clone(),
            self.recipient,
            self.deadline,
        );
        let mut calldata = selector.to_vec();
        calldata.extend_from_slice(&params.abi_encode_params());
        calldata
    }
}

/// Decode swap calldata into a [`SwapIntent`]
///
/// # Arguments
/// * `calldata` - The full transaction input, selector included
///
/// # Returns
/// The decoded intent, or a [`DecodeError`] for short or malformed input. Never panics.
pub fn decode_swap(calldata: &[u8]) -> Result<SwapIntent, DecodeError> {
    if calldata.len() < SELECTOR_LEN {
        return Err(DecodeError::TooShort(calldata.len()));
    }

    let (amount_in, amount_out_min, path, recipient, deadline) =
        <SwapParams as SolValue>::abi_decode_params(&calldata[SELECTOR_LEN..], true)
            .map_err(|e| DecodeError::SchemaMismatch(e.to_string()))?;

    SwapIntent::try_new(amount_in, amount_out_min, path, recipient, deadline)
}

/// Extract method ID from transaction input data
///
/// # Returns
/// `Some([u8; 4])` if input has at least 4 bytes, `None` otherwise
pub fn extract_method_id(input: &[u8]) -> Option<[u8; 4]> {
    if input.len() < SELECTOR_LEN {
        return None;
    }
    let mut method_id = [0u8; 4];
    method_id.copy_from_slice(&input[..SELECTOR_LEN]);
    Some(method_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    /// Parse a hex string to bytes (with or without 0x prefix)
    fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, hex::FromHexError> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        hex::decode(hex_str)
    }

    // swapExactTokensForTokens(1e18, 1, [WETH, USDC], 0xf39F.., 1736396800)
    const SWAP_EXACT_TOKENS_CALLDATA: &str = "0x38ed17390000000000000000000000000000000000000000000000000de0b6b3a7640000000000000000000000000000000000000000000000000000000000000000000100000000000000000000000000000000000000000000000000000000000000a0000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb9226600000000000000000000000000000000000000000000000000000000677f50000000000000000000000000000000000000000000000000000000000000000002000000000000000000000000c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2000000000000000000000000a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

    fn sample_intent(path: Vec<Address>) -> SwapIntent {
        SwapIntent::try_new(
            U256::from(5_000_000_000_000_000_000u128),
            U256::from(42u64),
            path,
            address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"),
            U256::from(1_736_396_800u64),
        )
        .unwrap()
    }

    // ==================== decode_swap tests ====================

    #[test]
    fn test_decode_empty_input_is_too_short() {
        assert_eq!(decode_swap(&[]), Err(DecodeError::TooShort(0)));
    }

    #[test]
    fn test_decode_three_bytes_is_too_short() {
        assert_eq!(decode_swap(&[0x38, 0xed, 0x17]), Err(DecodeError::TooShort(3)));
    }

    #[test]
    fn test_decode_selector_only_is_schema_mismatch() {
        let result = decode_swap(&[0x38, 0xed, 0x17, 0x39]);
        assert!(matches!(result, Err(DecodeError::SchemaMismatch(_))));
    }

    #[test]
    fn test_decode_truncated_head_is_schema_mismatch() {
        let mut calldata = vec![0x38, 0xed, 0x17, 0x39];
        calldata.extend_from_slice(&[0u8; 128]);
        assert!(matches!(decode_swap(&calldata), Err(DecodeError::SchemaMismatch(_))));
    }

    #[test]
    fn test_decode_erc20_transfer_is_schema_mismatch() {
        // transfer(address,uint256) carries two words only
        let calldata = hex_to_bytes("0xa9059cbb000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb922660000000000000000000000000000000000000000000000000de0b6b3a7640000").unwrap();
        assert!(matches!(decode_swap(&calldata), Err(DecodeError::SchemaMismatch(_))));
    }

    #[test]
    fn test_decode_bad_array_offset_is_schema_mismatch() {
        let mut calldata = hex_to_bytes(SWAP_EXACT_TOKENS_CALLDATA).unwrap();
        // Point the path offset far past the end of the buffer
        let offset_word_end = SELECTOR_LEN + 3 * 32;
        calldata[offset_word_end - 1] = 0xff;
        calldata[offset_word_end - 2] = 0xff;
        assert!(matches!(decode_swap(&calldata), Err(DecodeError::SchemaMismatch(_))));
    }

    #[test]
    fn test_decode_fixture_calldata() {
        let calldata = hex_to_bytes(SWAP_EXACT_TOKENS_CALLDATA).unwrap();
        let intent = decode_swap(&calldata).unwrap();

        assert_eq!(intent.amount_in(), U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(intent.amount_out_min(), U256::from(1u64));
        assert_eq!(
            intent.path(),
            &[
                address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
                address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
            ]
        );
        assert_eq!(intent.recipient(), address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
        assert_eq!(intent.deadline(), U256::from(1_736_396_800u64));
    }

    #[test]
    fn test_decode_round_trip_two_hop() {
        let intent = sample_intent(vec![Address::repeat_byte(0x11), Address::repeat_byte(0x22)]);
        let calldata = intent.to_calldata([0x38, 0xed, 0x17, 0x39]);
        assert_eq!(decode_swap(&calldata), Ok(intent));
    }

    #[test]
    fn test_decode_round_trip_multi_hop() {
        let intent = sample_intent(vec![
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x22),
            Address::repeat_byte(0x33),
        ]);
        let calldata = intent.to_calldata([0x5c, 0x11, 0xd7, 0x95]);
        assert_eq!(decode_swap(&calldata), Ok(intent));
    }

    #[test]
    fn test_decode_ignores_selector_value() {
        let intent = sample_intent(vec![Address::repeat_byte(0x11), Address::repeat_byte(0x22)]);
        let calldata = intent.to_calldata([0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decode_swap(&calldata), Ok(intent));
    }

    #[test]
    fn test_decode_single_hop_path_is_schema_mismatch() {
        let params: SwapParams = (
            U256::from(1u64),
            U256::from(1u64),
            vec![Address::repeat_byte(0x11)],
            Address::ZERO,
            U256::ZERO,
        );
        let mut calldata = vec![0x38, 0xed, 0x17, 0x39];
        calldata.extend_from_slice(&params.abi_encode_params());
        assert!(matches!(decode_swap(&calldata), Err(DecodeError::SchemaMismatch(_))));
    }

    // ==================== SwapIntent tests ====================

    #[test]
    fn test_try_new_rejects_empty_path() {
        let result = SwapIntent::try_new(U256::ZERO, U256::ZERO, vec![], Address::ZERO, U256::ZERO);
        assert!(matches!(result, Err(DecodeError::SchemaMismatch(_))));
    }

    #[test]
    fn test_intent_hop_accessors() {
        let intent = sample_intent(vec![
            Address::repeat_byte(0x11),
            Address::repeat_byte(0x22),
            Address::repeat_byte(0x33),
        ]);
        assert_eq!(intent.token_in(), Address::repeat_byte(0x11));
        assert_eq!(intent.second_hop(), Address::repeat_byte(0x22));
    }

    // ==================== extract_method_id tests ====================

    #[test]
    fn test_extract_method_id_from_valid_input() {
        let input = vec![0x38, 0xed, 0x17, 0x39, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(extract_method_id(&input), Some([0x38, 0xed, 0x17, 0x39]));
    }

    #[test]
    fn test_extract_method_id_from_exact_4_bytes() {
        let input = vec![0x38, 0xed, 0x17, 0x39];
        assert_eq!(extract_method_id(&input), Some([0x38, 0xed, 0x17, 0x39]));
    }

    #[test]
    fn test_extract_method_id_from_short_input() {
        assert_eq!(extract_method_id(&[0x38, 0xed, 0x17]), None);
        assert_eq!(extract_method_id(&[]), None);
    }

    // ==================== hex_to_bytes tests ====================

    #[test]
    fn test_hex_to_bytes_with_and_without_prefix() {
        assert_eq!(hex_to_bytes("0x38ed1739").unwrap(), vec![0x38, 0xed, 0x17, 0x39]);
        assert_eq!(hex_to_bytes("38ed1739").unwrap(), vec![0x38, 0xed, 0x17, 0x39]);
    }

    #[test]
    fn test_hex_to_bytes_invalid() {
        assert!(hex_to_bytes("0xGGGG").is_err());
    }
}

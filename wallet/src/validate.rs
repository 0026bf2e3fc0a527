//! Recipient and amount validation, MIST conversion

use crate::error::{Result, WalletError};

/// 1 SUI = 10^9 MIST
pub const MIST_PER_SUI: u64 = 1_000_000_000;
const SUI_DECIMALS: usize = 9;
const ADDRESS_HEX_LEN: usize = 64;

/// Convert a decimal SUI amount to MIST. Fractional digits beyond the ninth
/// are truncated, never rounded.
pub fn to_mist(amount: &str) -> Result<u64> {
    let amount = amount.trim();
    let invalid = || WalletError::InvalidAmount(format!("'{}' is not a decimal amount", amount));

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (amount, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(invalid());
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(invalid());
    }

    let whole: u64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| invalid())?
    };
    let mut frac9: String = frac_part.chars().take(SUI_DECIMALS).collect();
    while frac9.len() < SUI_DECIMALS {
        frac9.push('0');
    }
    let frac: u64 = frac9.parse().map_err(|_| invalid())?;

    whole
        .checked_mul(MIST_PER_SUI)
        .and_then(|mist| mist.checked_add(frac))
        .ok_or_else(|| WalletError::InvalidAmount(format!("'{}' is too large", amount)))
}

/// Like [`to_mist`] but rejects amounts that come out as zero.
pub fn positive_mist(amount: &str) -> Result<u64> {
    match to_mist(amount)? {
        0 => Err(WalletError::InvalidAmount("Enter a positive amount.".into())),
        mist => Ok(mist),
    }
}

/// Render MIST as SUI with six fractional digits.
pub fn format_sui(mist: u64) -> String {
    let micro = (mist as u128 + 500) / 1_000;
    format!("{}.{:06}", micro / 1_000_000, micro % 1_000_000)
}

/// A well-formed address is `0x` followed by exactly 64 hex digits.
pub fn is_valid_address(address: &str) -> bool {
    let hex = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    hex.len() == ADDRESS_HEX_LEN && hex.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Lowercase, strip the prefix, left-pad to 32 bytes, re-prefix.
pub fn normalize_address(address: &str) -> String {
    let lower = address.trim().to_ascii_lowercase();
    let hex = lower.strip_prefix("0x").unwrap_or(&lower);
    format!("0x{:0>width$}", hex, width = ADDRESS_HEX_LEN)
}

pub fn validate_address(address: &str) -> Result<()> {
    if address.trim().is_empty() {
        return Err(WalletError::InvalidAddress("Address is required.".into()));
    }
    if !is_valid_address(address.trim()) {
        return Err(WalletError::InvalidAddress("Not a valid Sui address.".into()));
    }
    Ok(())
}

use crate::blocklist::Blocklist;
use alloy::primitives::Address;
use std::str::FromStr;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AddressValidationError {
    #[error("invalid address `{address}`: {reason}")]
    Invalid { address: String, reason: String },
    #[error("address {0} is not supported")]
    NotSupported(Address),
    #[error("address {0} is blocked")]
    Blocked(Address),
}

/// Parses `address` and checks it can receive withdrawn funds.
pub fn validate_address_as_destination(
    address: &str,
    blocklist: &Blocklist,
) -> Result<Address, AddressValidationError> {
    let invalid = |reason: &str| AddressValidationError::Invalid {
        address: address.to_string(),
        reason: reason.to_string(),
    };
    let hex_digits = address
        .strip_prefix("0x")
        .ok_or_else(|| invalid("address doesn't start with '0x'"))?;
    if hex_digits.len() != 40 {
        return Err(invalid("expected 20 bytes"));
    }
    let parsed = Address::from_str(address).map_err(|e| invalid(&e.to_string()))?;
    if parsed == Address::ZERO {
        return Err(AddressValidationError::NotSupported(parsed));
    }
    if blocklist.is_blocked(&parsed) {
        return Err(AddressValidationError::Blocked(parsed));
    }
    Ok(parsed)
}

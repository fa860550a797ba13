//! Unit-tagged unsigned 256-bit amounts.
//!
//! Every quantity the minter handles (token values, gas, fees, nonces, block numbers)
//! is a [`CheckedAmountOf`] tagged with its unit, so that a gas amount can never be
//! added to a token value by accident. Arithmetic is checked; overflow returns `None`.

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    str::FromStr,
};

pub enum WeiTag {}
pub type Wei = CheckedAmountOf<WeiTag>;

pub enum WeiPerGasUnit {}
pub type WeiPerGas = CheckedAmountOf<WeiPerGasUnit>;

pub enum Erc20Tag {}
pub type Erc20Value = CheckedAmountOf<Erc20Tag>;

pub enum BlockNumberTag {}
pub type BlockNumber = CheckedAmountOf<BlockNumberTag>;

pub enum TransactionNonceTag {}
pub type TransactionNonce = CheckedAmountOf<TransactionNonceTag>;

pub enum TransactionCountTag {}
pub type TransactionCount = CheckedAmountOf<TransactionCountTag>;

pub enum GasUnit {}
pub type GasAmount = CheckedAmountOf<GasUnit>;

pub struct CheckedAmountOf<Unit>(U256, PhantomData<Unit>);

impl<Unit> CheckedAmountOf<Unit> {
    pub const ZERO: Self = Self(U256::ZERO, PhantomData);
    pub const ONE: Self = Self(U256::from_limbs([1, 0, 0, 0]), PhantomData);
    pub const TWO: Self = Self(U256::from_limbs([2, 0, 0, 0]), PhantomData);
    pub const MAX: Self = Self(U256::MAX, PhantomData);

    pub const fn new(value: u128) -> Self {
        Self(
            U256::from_limbs([value as u64, (value >> 64) as u64, 0, 0]),
            PhantomData,
        )
    }

    pub const fn from_u256(value: U256) -> Self {
        Self(value, PhantomData)
    }

    pub const fn into_inner(self) -> U256 {
        self.0
    }

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self::from_u256(U256::from_be_bytes(bytes))
    }

    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0.to_be_bytes()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns the value as `u64`, or `None` if it does not fit.
    pub fn to_u64(self) -> Option<u64> {
        u64::try_from(self.0).ok()
    }

    /// Returns the value as `u128`, or `None` if it does not fit.
    pub fn to_u128(self) -> Option<u128> {
        u128::try_from(self.0).ok()
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self::from_u256)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self::from_u256)
    }

    pub fn checked_mul(self, factor: u64) -> Option<Self> {
        self.0.checked_mul(U256::from(factor)).map(Self::from_u256)
    }

    pub fn checked_div_floor(self, divisor: u64) -> Option<Self> {
        self.0.checked_div(U256::from(divisor)).map(Self::from_u256)
    }

    pub fn checked_div_ceil(self, divisor: u64) -> Option<Self> {
        let divisor = U256::from(divisor);
        if divisor.is_zero() {
            return None;
        }
        let (quotient, remainder) = self.0.div_rem(divisor);
        if remainder.is_zero() {
            Some(Self::from_u256(quotient))
        } else {
            quotient.checked_add(U256::from(1)).map(Self::from_u256)
        }
    }

    pub fn checked_increment(self) -> Option<Self> {
        self.checked_add(Self::ONE)
    }

    pub fn checked_decrement(self) -> Option<Self> {
        self.checked_sub(Self::ONE)
    }

    pub fn div_by_two(self) -> Self {
        Self::from_u256(self.0 >> 1)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self::from_u256(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self::from_u256(self.0.saturating_sub(other.0))
    }

    /// Reinterprets the value in another unit.
    ///
    /// Only meaningful where the two units share a scale, e.g. a transaction count at
    /// some block is the nonce of the first transaction that is not yet mined.
    pub const fn change_units<Other>(self) -> CheckedAmountOf<Other> {
        CheckedAmountOf(self.0, PhantomData)
    }
}

impl WeiPerGas {
    /// Total cost of `gas` units at this price.
    pub fn transaction_cost(self, gas: GasAmount) -> Option<Wei> {
        self.0.checked_mul(gas.0).map(Wei::from_u256)
    }
}

impl Wei {
    /// Highest price per gas such that `gas` units cost at most `self`.
    pub fn into_wei_per_gas(self, gas: GasAmount) -> Option<WeiPerGas> {
        self.0.checked_div(gas.0).map(WeiPerGas::from_u256)
    }
}

impl<Unit> Clone for CheckedAmountOf<Unit> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Unit> Copy for CheckedAmountOf<Unit> {}

impl<Unit> PartialEq for CheckedAmountOf<Unit> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<Unit> Eq for CheckedAmountOf<Unit> {}

impl<Unit> PartialOrd for CheckedAmountOf<Unit> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<Unit> Ord for CheckedAmountOf<Unit> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<Unit> Hash for CheckedAmountOf<Unit> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl<Unit> Default for CheckedAmountOf<Unit> {
    fn default() -> Self {
        Self::ZERO
    }
}

impl<Unit> fmt::Debug for CheckedAmountOf<Unit> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<Unit> fmt::Display for CheckedAmountOf<Unit> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<Unit> From<u64> for CheckedAmountOf<Unit> {
    fn from(value: u64) -> Self {
        Self::from_u256(U256::from(value))
    }
}

impl<Unit> From<u128> for CheckedAmountOf<Unit> {
    fn from(value: u128) -> Self {
        Self::new(value)
    }
}

impl<Unit> From<U256> for CheckedAmountOf<Unit> {
    fn from(value: U256) -> Self {
        Self::from_u256(value)
    }
}

impl<Unit> From<CheckedAmountOf<Unit>> for U256 {
    fn from(value: CheckedAmountOf<Unit>) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount `{input}`: {reason}")]
pub struct ParseAmountError {
    input: String,
    reason: String,
}

impl<Unit> FromStr for CheckedAmountOf<Unit> {
    type Err = ParseAmountError;

    /// Parses a decimal string, or a hexadecimal one when prefixed with `0x`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed.strip_prefix("0x") {
            Some(hex_digits) => U256::from_str_radix(hex_digits, 16),
            None => U256::from_str_radix(trimmed, 10),
        };
        parsed.map(Self::from_u256).map_err(|e| ParseAmountError {
            input: s.to_string(),
            reason: e.to_string(),
        })
    }
}

impl<Unit> Serialize for CheckedAmountOf<Unit> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de, Unit> Deserialize<'de> for CheckedAmountOf<Unit> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Repr::Number(number) => Ok(Self::from(number)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_checked_arithmetic_reports_overflow() {
        assert_eq!(Wei::MAX.checked_add(Wei::ONE), None);
        assert_eq!(Wei::ZERO.checked_sub(Wei::ONE), None);
        assert_eq!(Wei::new(2).checked_add(Wei::new(3)), Some(Wei::new(5)));
        assert_eq!(Wei::MAX.checked_mul(2), None);
        assert_eq!(Wei::new(7).checked_mul(3), Some(Wei::new(21)));
        assert_eq!(Wei::new(7).checked_div_floor(2), Some(Wei::new(3)));
    }

    #[test_case(10, 3, 4 ; "rounds up")]
    #[test_case(9, 3, 3 ; "exact")]
    #[test_case(0, 7, 0 ; "zero numerator")]
    fn test_div_ceil(numerator: u64, divisor: u64, expected: u64) {
        assert_eq!(
            Wei::from(numerator).checked_div_ceil(divisor),
            Some(Wei::from(expected))
        );
    }

    #[test]
    fn test_div_by_zero_is_none() {
        assert_eq!(Wei::ONE.checked_div_ceil(0), None);
        assert_eq!(Wei::ONE.checked_div_floor(0), None);
        assert_eq!(Wei::ONE.into_wei_per_gas(GasAmount::ZERO), None);
    }

    #[test]
    fn test_fee_conversions() {
        let price = WeiPerGas::new(30_000_000_000);
        let gas = GasAmount::new(65_000);
        let cost = price.transaction_cost(gas).unwrap();
        assert_eq!(cost, Wei::new(1_950_000_000_000_000));
        assert_eq!(cost.into_wei_per_gas(gas), Some(price));
    }

    #[test]
    fn test_parse_decimal_and_hex() {
        assert_eq!("1000".parse::<Erc20Value>().unwrap(), Erc20Value::new(1000));
        assert_eq!("0x3e8".parse::<Erc20Value>().unwrap(), Erc20Value::new(1000));
        assert!("ten".parse::<Erc20Value>().is_err());
    }

    #[test]
    fn test_serde_uses_decimal_strings() {
        let value = Erc20Value::new(u128::MAX);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, format!("\"{}\"", u128::MAX));

        let back: Erc20Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);

        let from_number: Erc20Value = serde_json::from_str("42").unwrap();
        assert_eq!(from_number, Erc20Value::new(42));
    }

    #[test]
    fn test_change_units_keeps_value() {
        let count = TransactionCount::new(7);
        let nonce: TransactionNonce = count.change_units();
        assert_eq!(nonce, TransactionNonce::new(7));
    }
}

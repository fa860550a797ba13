//! Addresses the minter refuses to interact with.

use alloy::primitives::{Address, address};
use std::collections::BTreeSet;

/// Sanctioned Tornado Cash contracts.
const SANCTIONED_ADDRESSES: &[Address] = &[
    address!("722122dF12D4e14e13Ac3b6895a86e84145b6967"),
    address!("8589427373D6D84E98730D7795D8f6f8731FDA16"),
    address!("d90e2f925DA726b50C4Ed8D0Fb90Ad053324F31b"),
    address!("DD4c48C0B24039969fC16D1cdF626eaB821d3384"),
    address!("d96f2B1c14Db8458374d9Aca76E26c3D18364307"),
    address!("4736dCf1b7A3d580672CcE6E7c65cd5cc9cFBa9D"),
];

#[derive(Clone, Debug, Default)]
pub struct Blocklist {
    extra: BTreeSet<Address>,
}

impl Blocklist {
    /// Blocklist with the built-in sanctioned addresses plus `extra`.
    pub fn new(extra: impl IntoIterator<Item = Address>) -> Self {
        Self {
            extra: extra.into_iter().collect(),
        }
    }

    pub fn is_blocked(&self, address: &Address) -> bool {
        SANCTIONED_ADDRESSES.contains(address) || self.extra.contains(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanctioned_address_is_blocked() {
        let blocklist = Blocklist::default();
        assert!(blocklist.is_blocked(&address!("722122dF12D4e14e13Ac3b6895a86e84145b6967")));
        assert!(!blocklist.is_blocked(&Address::repeat_byte(0x42)));
    }

    #[test]
    fn test_configured_address_is_blocked() {
        let blocklist = Blocklist::new([Address::repeat_byte(0x42)]);
        assert!(blocklist.is_blocked(&Address::repeat_byte(0x42)));
    }
}

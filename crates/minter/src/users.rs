//! Registered users of the vault.

use crate::{
    endpoints::UserStats, map::MultiKeyMap, numeric::Erc20Value, state::event::EventType,
};
use candid::Principal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeSet, fmt, str::FromStr};

/// Opaque 12-byte user identifier assigned by the admin.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(pub [u8; 12]);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({self})")
    }
}

impl FromStr for UserId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| format!("invalid user id `{s}`: {e}"))?;
        let id = <[u8; 12]>::try_from(bytes.as_slice())
            .map_err(|_| format!("invalid user id `{s}`: expected 12 bytes, got {}", bytes.len()))?;
        Ok(Self(id))
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub principal: Principal,
}

/// Users indexed by principal and by id. Both are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Users(MultiKeyMap<Principal, UserId, User>);

impl Users {
    /// Whether the id or the principal of `user` is already taken.
    pub fn exists(&self, user: &User) -> bool {
        self.0.get(&user.principal).is_some() || self.0.contains_alt(&user.id)
    }

    pub fn insert(&mut self, user: User) -> bool {
        self.0.try_insert(user.principal, user.id, user).is_ok()
    }

    pub fn get_by_principal(&self, principal: &Principal) -> Option<&User> {
        self.0.get(principal)
    }

    pub fn get_by_id(&self, id: &UserId) -> Option<&User> {
        self.0.get_alt(id)
    }

    pub fn user_id_hex(&self, principal: &Principal) -> Option<String> {
        self.get_by_principal(principal)
            .map(|user| user.id.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.0.iter().map(|(_, _, user)| user)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Activity counters of `principal` computed from the event log.
pub fn compute_user_stats<'a>(
    principal: &Principal,
    events: impl IntoIterator<Item = &'a EventType>,
    user_balance: Erc20Value,
) -> UserStats {
    let mut stats = UserStats {
        user_balance,
        ..Default::default()
    };
    let mut own_withdrawals = BTreeSet::new();
    for event in events {
        match event {
            EventType::AcceptedErc20Deposit(deposit) if deposit.principal == *principal => {
                stats.deposit_count += 1;
            }
            EventType::AcceptedErc20WithdrawalRequest(request) if request.from == *principal => {
                own_withdrawals.insert(request.id);
                stats.started_withdrawals += 1;
            }
            EventType::Erc20TransferCompleted { from, .. } if from == principal => {
                stats.transfers_from += 1;
            }
            EventType::Erc20TransferCompleted { to, .. } if to == principal => {
                stats.transfers_in += 1;
            }
            EventType::FinalizedTransaction { withdrawal_id, .. }
                if own_withdrawals.contains(withdrawal_id) =>
            {
                stats.ended_withdrawals += 1;
            }
            _ => {}
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn principal(byte: u8) -> Principal {
        Principal::from_slice(&[byte; 29])
    }

    #[test]
    fn test_user_id_hex_round_trip() {
        let id: UserId = "000102030405060708090a0b".parse().unwrap();
        assert_eq!(id.0, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11]);
        assert_eq!(id.to_string(), "000102030405060708090a0b");
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"000102030405060708090a0b\""
        );
    }

    #[test_case("0x000102030405060708090a0b"; "with prefix")]
    #[test_case("FFFFFFFFFFFFFFFFFFFFFFFF"; "upper case")]
    fn test_user_id_accepts(input: &str) {
        assert!(input.parse::<UserId>().is_ok());
    }

    #[test_case(""; "empty")]
    #[test_case("0001"; "too short")]
    #[test_case("000102030405060708090a0b0c"; "too long")]
    #[test_case("zz0102030405060708090a0b"; "not hex")]
    fn test_user_id_rejects(input: &str) {
        assert!(input.parse::<UserId>().is_err());
    }

    #[test]
    fn test_registry_rejects_taken_id_or_principal() {
        let mut users = Users::default();
        let alice = User {
            id: UserId([1; 12]),
            principal: principal(1),
        };
        assert!(users.insert(alice));

        let same_id = User {
            id: alice.id,
            principal: principal(2),
        };
        let same_principal = User {
            id: UserId([2; 12]),
            principal: alice.principal,
        };
        assert!(users.exists(&same_id));
        assert!(users.exists(&same_principal));
        assert!(!users.insert(same_id));
        assert_eq!(users.len(), 1);

        assert_eq!(users.get_by_id(&alice.id), Some(&alice));
        assert_eq!(
            users.user_id_hex(&alice.principal),
            Some("010101010101010101010101".to_string())
        );
    }

    #[test]
    fn test_stats_count_transfers_in_both_directions() {
        let alice = principal(1);
        let bob = principal(2);
        let events = [
            EventType::Erc20TransferCompleted {
                from: alice,
                to: bob,
                amount: Erc20Value::new(5),
            },
            EventType::Erc20TransferCompleted {
                from: bob,
                to: alice,
                amount: Erc20Value::new(1),
            },
            EventType::Erc20TransferCompleted {
                from: bob,
                to: alice,
                amount: Erc20Value::new(1),
            },
        ];
        let stats = compute_user_stats(&alice, &events, Erc20Value::new(7));
        assert_eq!(stats.transfers_from, 1);
        assert_eq!(stats.transfers_in, 2);
        assert_eq!(stats.user_balance, Erc20Value::new(7));
    }
}

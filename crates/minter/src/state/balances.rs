use crate::{numeric::Erc20Value, state::StateError};
use candid::Principal;
use std::collections::BTreeMap;

/// Internal ERC20 balances of principals, and the total the minter holds on-chain.
///
/// The total only changes with deposits and successful withdrawals. Transfers,
/// fees and reimbursements move funds between principals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Erc20Balances {
    balances: BTreeMap<Principal, Erc20Value>,
    total: Erc20Value,
}

impl Erc20Balances {
    pub fn balance_of(&self, principal: &Principal) -> Erc20Value {
        self.balances.get(principal).copied().unwrap_or_default()
    }

    pub fn total(&self) -> Erc20Value {
        self.total
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Principal, &Erc20Value)> {
        self.balances.iter()
    }

    fn credit(&mut self, principal: Principal, amount: Erc20Value) -> Result<(), StateError> {
        let balance = self.balances.entry(principal).or_default();
        *balance = balance.checked_add(amount).ok_or(StateError::Overflow)?;
        Ok(())
    }

    fn debit(&mut self, principal: Principal, amount: Erc20Value) -> Result<(), StateError> {
        let available = self.balance_of(&principal);
        let remaining = available
            .checked_sub(amount)
            .ok_or(StateError::InsufficientBalance {
                principal,
                available,
                required: amount,
            })?;
        if remaining.is_zero() {
            self.balances.remove(&principal);
        } else {
            self.balances.insert(principal, remaining);
        }
        Ok(())
    }

    /// A deposit was minted to `principal`.
    pub fn mint(&mut self, principal: Principal, amount: Erc20Value) -> Result<(), StateError> {
        let total = self.total.checked_add(amount).ok_or(StateError::Overflow)?;
        self.credit(principal, amount)?;
        self.total = total;
        Ok(())
    }

    /// Moves `amount` plus `fee` out of the sender's balance. The fee goes to `admin`,
    /// the amount stays in the total until the withdrawal transaction succeeds.
    pub fn withdraw(
        &mut self,
        from: Principal,
        amount: Erc20Value,
        fee: Erc20Value,
        admin: Principal,
    ) -> Result<(), StateError> {
        let required = amount.checked_add(fee).ok_or(StateError::Overflow)?;
        self.debit(from, required)?;
        if !fee.is_zero() {
            self.credit(admin, fee)?;
        }
        Ok(())
    }

    /// A withdrawal transaction succeeded and `amount` left the minter.
    pub fn finalize_withdrawal(&mut self, amount: Erc20Value) -> Result<(), StateError> {
        self.total = self.total.checked_sub(amount).ok_or_else(|| {
            StateError::Invariant(format!(
                "withdrawn amount {amount} exceeds total balance {}",
                self.total
            ))
        })?;
        Ok(())
    }

    /// Credits back the amount of a failed withdrawal.
    pub fn reimburse(&mut self, to: Principal, amount: Erc20Value) -> Result<(), StateError> {
        self.credit(to, amount)
    }

    pub fn transfer(
        &mut self,
        from: Principal,
        to: Principal,
        amount: Erc20Value,
    ) -> Result<(), StateError> {
        self.debit(from, amount)?;
        self.credit(to, amount)
    }
}

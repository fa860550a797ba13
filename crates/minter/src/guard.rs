//! Scoped markers preventing concurrent runs of the same task or of
//! withdrawals by the same principal.

use crate::{endpoints::WithdrawErc20Error, minter::Minter, state::TaskType};
use candid::Principal;

/// Maximum number of principals with a withdrawal being accepted at once.
pub const MAX_CONCURRENT: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("already processing")]
    AlreadyProcessing,
    #[error("too many concurrent requests")]
    TooManyConcurrentRequests,
}

impl From<GuardError> for WithdrawErc20Error {
    fn from(error: GuardError) -> Self {
        match error {
            GuardError::AlreadyProcessing => Self::AlreadyProcessing,
            GuardError::TooManyConcurrentRequests => Self::TooManyPendingRequests,
        }
    }
}

/// Held while a principal's withdrawal request is being validated and recorded.
#[derive(Debug)]
pub struct WithdrawGuard {
    minter: Minter,
    principal: Principal,
}

impl WithdrawGuard {
    pub fn new(minter: &Minter, principal: Principal) -> Result<Self, GuardError> {
        minter.mutate_state(|s| {
            if s.pending_withdrawal_principals.contains(&principal) {
                return Err(GuardError::AlreadyProcessing);
            }
            if s.pending_withdrawal_principals.len() >= MAX_CONCURRENT {
                return Err(GuardError::TooManyConcurrentRequests);
            }
            s.pending_withdrawal_principals.insert(principal);
            Ok(())
        })?;
        Ok(Self {
            minter: minter.clone(),
            principal,
        })
    }
}

impl Drop for WithdrawGuard {
    fn drop(&mut self) {
        self.minter.mutate_state(|s| {
            s.pending_withdrawal_principals.remove(&self.principal);
        });
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TimerGuardError {
    #[error("task {0} is already running")]
    AlreadyProcessing(TaskType),
}

/// Held for the duration of a background task run.
#[derive(Debug)]
pub struct TimerGuard {
    minter: Minter,
    task: TaskType,
}

impl TimerGuard {
    pub fn new(minter: &Minter, task: TaskType) -> Result<Self, TimerGuardError> {
        minter.mutate_state(|s| {
            if !s.active_tasks.insert(task) {
                return Err(TimerGuardError::AlreadyProcessing(task));
            }
            Ok(())
        })?;
        Ok(Self {
            minter: minter.clone(),
            task,
        })
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.minter.mutate_state(|s| {
            s.active_tasks.remove(&self.task);
        });
    }
}

//! # Economy Ledger
//!
//! Coin balances per user.
//!
//! ## Atomicity
//!
//! Every balance lives in its own `AtomicU64`. A debit is a single
//! compare-and-swap loop that refuses to go below zero:
//!
//! ```text
//! fetch_update(|b| b.checked_sub(amount))
//!   Ok(prev)  -> new balance = prev - amount
//!   Err(prev) -> InsufficientFunds { balance: prev }
//! ```
//!
//! Two concurrent debits on the same account can therefore never both pass
//! against a balance that covers only one of them. The account map itself is
//! behind an `RwLock` that is only written when an account is opened.

use booster_shared::{Coins, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::error::{EconomyError, EconomyResult};

/// Account balance storage.
pub trait UserAccountProvider: Send + Sync {
    /// Current balance.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAccount` if the user has no account.
    fn get_balance(&self, user: UserId) -> EconomyResult<Coins>;

    /// Atomically checks and subtracts `amount`, returning the new balance.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientFunds` if the balance is below `amount`. The
    /// balance is unchanged in that case.
    fn debit(&self, user: UserId, amount: Coins) -> EconomyResult<Coins>;

    /// Adds `amount`, returning the new balance. Also used for refunds.
    ///
    /// # Errors
    ///
    /// Returns `ArithmeticOverflow` if the balance would exceed `u64::MAX`.
    fn credit(&self, user: UserId, amount: Coins) -> EconomyResult<Coins>;

    /// Creates an account with an opening balance. Returns `false` if the
    /// account already existed, in which case nothing changes.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the account could not be stored.
    fn open_account(&self, user: UserId, opening_balance: Coins) -> EconomyResult<bool>;
}

/// In-process ledger with lock-free per-account balances.
#[derive(Debug, Default)]
pub struct EconomyLedger {
    accounts: RwLock<HashMap<UserId, Arc<AtomicU64>>>,
}

impl EconomyLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open accounts.
    #[must_use]
    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }

    /// Sum of all balances. Only consistent when no writes are in flight.
    ///
    /// # Errors
    ///
    /// Returns `ArithmeticOverflow` if the sum exceeds `u64::MAX`.
    pub fn total_supply(&self) -> EconomyResult<Coins> {
        self.accounts
            .read()
            .values()
            .try_fold(0_u64, |acc, balance| acc.checked_add(balance.load(Ordering::Acquire)))
            .ok_or(EconomyError::ArithmeticOverflow)
    }

    fn account(&self, user: UserId) -> EconomyResult<Arc<AtomicU64>> {
        self.accounts
            .read()
            .get(&user)
            .cloned()
            .ok_or(EconomyError::UnknownAccount(user))
    }
}

impl UserAccountProvider for EconomyLedger {
    fn get_balance(&self, user: UserId) -> EconomyResult<Coins> {
        Ok(self.account(user)?.load(Ordering::Acquire))
    }

    fn debit(&self, user: UserId, amount: Coins) -> EconomyResult<Coins> {
        let balance = self.account(user)?;
        match balance.fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| b.checked_sub(amount)) {
            Ok(previous) => Ok(previous - amount),
            Err(current) => {
                warn!(user, balance = current, required = amount, "debit rejected");
                Err(EconomyError::InsufficientFunds { user, balance: current, required: amount })
            }
        }
    }

    fn credit(&self, user: UserId, amount: Coins) -> EconomyResult<Coins> {
        let balance = self.account(user)?;
        balance
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| b.checked_add(amount))
            .map(|previous| previous + amount)
            .map_err(|_| EconomyError::ArithmeticOverflow)
    }

    fn open_account(&self, user: UserId, opening_balance: Coins) -> EconomyResult<bool> {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&user) {
            return Ok(false);
        }
        accounts.insert(user, Arc::new(AtomicU64::new(opening_balance)));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::thread;

    #[test]
    fn test_debit_and_credit() {
        let ledger = EconomyLedger::new();
        assert!(ledger.open_account(1, 100).unwrap());

        assert_eq!(ledger.debit(1, 100).unwrap(), 0);
        assert_eq!(ledger.credit(1, 40).unwrap(), 40);
        assert_eq!(ledger.get_balance(1).unwrap(), 40);
    }

    #[test]
    fn test_debit_rejects_overdraft() {
        let ledger = EconomyLedger::new();
        ledger.open_account(1, 50).unwrap();

        assert_eq!(
            ledger.debit(1, 100),
            Err(EconomyError::InsufficientFunds { user: 1, balance: 50, required: 100 })
        );
        assert_eq!(ledger.get_balance(1).unwrap(), 50);
    }

    #[test]
    fn test_unknown_account() {
        let ledger = EconomyLedger::new();
        assert_eq!(ledger.get_balance(7), Err(EconomyError::UnknownAccount(7)));
        assert_eq!(ledger.credit(7, 1), Err(EconomyError::UnknownAccount(7)));
    }

    #[test]
    fn test_open_account_is_idempotent() {
        let ledger = EconomyLedger::new();
        assert!(ledger.open_account(1, 100).unwrap());
        ledger.debit(1, 30).unwrap();

        assert!(!ledger.open_account(1, 100).unwrap());
        assert_eq!(ledger.get_balance(1).unwrap(), 70);
    }

    #[test]
    fn test_credit_overflow() {
        let ledger = EconomyLedger::new();
        ledger.open_account(1, u64::MAX).unwrap();
        assert_eq!(ledger.credit(1, 1), Err(EconomyError::ArithmeticOverflow));
        assert_eq!(ledger.get_balance(1).unwrap(), u64::MAX);
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let ledger = Arc::new(EconomyLedger::new());
        ledger.open_account(1, 1_000).unwrap();
        let successes = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let successes = Arc::clone(&successes);
                thread::spawn(move || {
                    for _ in 0..50 {
                        if ledger.debit(1, 7).is_ok() {
                            successes.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let ok = u64::from(successes.load(Ordering::Relaxed));
        assert_eq!(ok, 1_000 / 7);
        assert_eq!(ledger.get_balance(1).unwrap(), 1_000 - ok * 7);
    }
}

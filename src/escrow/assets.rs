//! Fungible Asset Transfer Primitive
//!
//! The escrow never owns token balances itself; it asks an `AssetTransfer`
//! implementation to move units between accounts. Implementations must fail
//! rather than truncate, and must support savepoint/rollback so that an
//! operation with several transfers commits all of them or none.
//!
//! `InMemoryAssets` is the reference host: a multi-asset balance book bound to
//! one operator account (the escrow), with ERC-20 style allowances.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

use super::types::{AccountId, Amount, AssetId};

// =============================================================================
// TRAIT
// =============================================================================

/// Position in the transfer journal. Savepoints are not nested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(pub usize);

pub trait AssetTransfer {
    /// Pull `amount` of `asset` from `from` into `to`, spending the operator's
    /// allowance on `from`.
    fn transfer_from(
        &mut self,
        asset: &AssetId,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), TransferError>;

    /// Push `amount` of `asset` from the operator's own balance to `to`.
    fn transfer_to(
        &mut self,
        asset: &AssetId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), TransferError>;

    /// Current balance of `account` in `asset`.
    fn balance_of(&self, asset: &AssetId, account: &AccountId) -> Amount;

    fn savepoint(&mut self) -> Savepoint;

    /// Undo every transfer applied after `savepoint`.
    fn rollback(&mut self, savepoint: Savepoint);

    /// Make every transfer applied after `savepoint` final.
    fn commit(&mut self, savepoint: Savepoint);
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferError {
    InsufficientBalance {
        asset: AssetId,
        account: AccountId,
        available: Amount,
        requested: Amount,
    },
    InsufficientAllowance {
        asset: AssetId,
        owner: AccountId,
        spender: AccountId,
        allowed: Amount,
        requested: Amount,
    },
    /// Credit would overflow the recipient balance.
    BalanceOverflow { asset: AssetId, account: AccountId },
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientBalance { asset, account, available, requested } => write!(
                f,
                "{} has {} {} but {} requested",
                account, available, asset, requested
            ),
            Self::InsufficientAllowance { asset, owner, spender, allowed, requested } => write!(
                f,
                "{} allowed {} to move {} {} but {} requested",
                owner, spender, allowed, asset, requested
            ),
            Self::BalanceOverflow { asset, account } => {
                write!(f, "{} balance of {} would overflow", asset, account)
            }
        }
    }
}

impl std::error::Error for TransferError {}

// =============================================================================
// IN-MEMORY HOST
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalEntry {
    asset: AssetId,
    from: AccountId,
    to: AccountId,
    amount: Amount,
    /// Allowance consumed, if the transfer was a pull.
    allowance_spent: bool,
}

/// Multi-asset balance book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryAssets {
    operator: AccountId,
    balances: HashMap<(AssetId, AccountId), Amount>,
    /// (asset, owner) -> amount the operator may pull.
    allowances: HashMap<(AssetId, AccountId), Amount>,
    journal: Vec<JournalEntry>,
}

impl InMemoryAssets {
    /// Create an empty book whose transfers act on behalf of `operator`.
    pub fn new(operator: AccountId) -> Self {
        Self {
            operator,
            balances: HashMap::new(),
            allowances: HashMap::new(),
            journal: Vec::new(),
        }
    }

    /// Credit new units to an account (host setup, not journaled).
    pub fn mint(&mut self, asset: &AssetId, account: &AccountId, amount: Amount) {
        let bal = self
            .balances
            .entry((asset.clone(), account.clone()))
            .or_insert(0);
        *bal = bal.saturating_add(amount);
        debug!(asset = %asset, account = %account, amount, "minted");
    }

    /// Let the operator pull up to `amount` of `asset` from `owner`.
    pub fn approve(&mut self, asset: &AssetId, owner: &AccountId, amount: Amount) {
        self.allowances
            .insert((asset.clone(), owner.clone()), amount);
    }

    pub fn allowance(&self, asset: &AssetId, owner: &AccountId) -> Amount {
        self.allowances
            .get(&(asset.clone(), owner.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Total units of `asset` across all accounts.
    pub fn total_supply(&self, asset: &AssetId) -> u128 {
        self.balances
            .iter()
            .filter(|((a, _), _)| a == asset)
            .map(|(_, v)| *v as u128)
            .sum()
    }

    /// Number of transfers not yet committed.
    pub fn pending_transfers(&self) -> usize {
        self.journal.len()
    }

    fn move_units(
        &mut self,
        asset: &AssetId,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let available = self.balance_of(asset, from);
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                asset: asset.clone(),
                account: from.clone(),
                available,
                requested: amount,
            });
        }
        if from != to {
            let to_balance = self.balance_of(asset, to);
            let credited = to_balance
                .checked_add(amount)
                .ok_or_else(|| TransferError::BalanceOverflow {
                    asset: asset.clone(),
                    account: to.clone(),
                })?;
            self.balances
                .insert((asset.clone(), from.clone()), available - amount);
            self.balances.insert((asset.clone(), to.clone()), credited);
        }
        Ok(())
    }
}

impl AssetTransfer for InMemoryAssets {
    fn transfer_from(
        &mut self,
        asset: &AssetId,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let allowed = self.allowance(asset, from);
        if allowed < amount {
            return Err(TransferError::InsufficientAllowance {
                asset: asset.clone(),
                owner: from.clone(),
                spender: self.operator.clone(),
                allowed,
                requested: amount,
            });
        }
        self.move_units(asset, from, to, amount)?;
        self.allowances
            .insert((asset.clone(), from.clone()), allowed - amount);
        self.journal.push(JournalEntry {
            asset: asset.clone(),
            from: from.clone(),
            to: to.clone(),
            amount,
            allowance_spent: true,
        });
        trace!(asset = %asset, from = %from, to = %to, amount, "transfer_from");
        Ok(())
    }

    fn transfer_to(
        &mut self,
        asset: &AssetId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let from = self.operator.clone();
        self.move_units(asset, &from, to, amount)?;
        self.journal.push(JournalEntry {
            asset: asset.clone(),
            from,
            to: to.clone(),
            amount,
            allowance_spent: false,
        });
        trace!(asset = %asset, to = %to, amount, "transfer_to");
        Ok(())
    }

    fn balance_of(&self, asset: &AssetId, account: &AccountId) -> Amount {
        self.balances
            .get(&(asset.clone(), account.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn savepoint(&mut self) -> Savepoint {
        Savepoint(self.journal.len())
    }

    fn rollback(&mut self, savepoint: Savepoint) {
        while self.journal.len() > savepoint.0 {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            if entry.from != entry.to {
                let to_key = (entry.asset.clone(), entry.to.clone());
                let from_key = (entry.asset.clone(), entry.from.clone());
                if let Some(bal) = self.balances.get_mut(&to_key) {
                    *bal -= entry.amount;
                }
                *self.balances.entry(from_key).or_insert(0) += entry.amount;
            }
            if entry.allowance_spent {
                *self
                    .allowances
                    .entry((entry.asset.clone(), entry.from.clone()))
                    .or_insert(0) += entry.amount;
            }
            debug!(asset = %entry.asset, from = %entry.from, to = %entry.to, amount = entry.amount, "transfer rolled back");
        }
    }

    fn commit(&mut self, savepoint: Savepoint) {
        self.journal.truncate(savepoint.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (InMemoryAssets, AssetId, AccountId, AccountId) {
        let escrow = AccountId::new("escrow");
        let alice = AccountId::new("alice");
        let usdc = AssetId::new("USDC");
        let mut book = InMemoryAssets::new(escrow.clone());
        book.mint(&usdc, &alice, 1_000);
        (book, usdc, escrow, alice)
    }

    #[test]
    fn test_pull_requires_allowance() {
        let (mut book, usdc, escrow, alice) = setup();

        let err = book.transfer_from(&usdc, &alice, &escrow, 100).unwrap_err();
        assert!(matches!(err, TransferError::InsufficientAllowance { allowed: 0, .. }));

        book.approve(&usdc, &alice, 100);
        book.transfer_from(&usdc, &alice, &escrow, 100).unwrap();
        assert_eq!(book.balance_of(&usdc, &alice), 900);
        assert_eq!(book.balance_of(&usdc, &escrow), 100);
        assert_eq!(book.allowance(&usdc, &alice), 0);
    }

    #[test]
    fn test_insufficient_balance_never_truncates() {
        let (mut book, usdc, escrow, alice) = setup();
        book.approve(&usdc, &alice, 5_000);

        let err = book.transfer_from(&usdc, &alice, &escrow, 1_001).unwrap_err();
        assert_eq!(
            err,
            TransferError::InsufficientBalance {
                asset: usdc.clone(),
                account: alice.clone(),
                available: 1_000,
                requested: 1_001,
            }
        );
        assert_eq!(book.balance_of(&usdc, &alice), 1_000);
        assert_eq!(book.allowance(&usdc, &alice), 5_000);
    }

    #[test]
    fn test_rollback_restores_balances_and_allowance() {
        let (mut book, usdc, escrow, alice) = setup();
        book.approve(&usdc, &alice, 500);

        let sp = book.savepoint();
        book.transfer_from(&usdc, &alice, &escrow, 300).unwrap();
        book.transfer_to(&usdc, &alice, 50).unwrap();
        assert_eq!(book.pending_transfers(), 2);

        book.rollback(sp);
        assert_eq!(book.balance_of(&usdc, &alice), 1_000);
        assert_eq!(book.balance_of(&usdc, &escrow), 0);
        assert_eq!(book.allowance(&usdc, &alice), 500);
        assert_eq!(book.pending_transfers(), 0);
        assert_eq!(book.total_supply(&usdc), 1_000);
    }

    #[test]
    fn test_commit_makes_transfers_final() {
        let (mut book, usdc, escrow, alice) = setup();
        book.approve(&usdc, &alice, 500);

        let sp = book.savepoint();
        book.transfer_from(&usdc, &alice, &escrow, 200).unwrap();
        book.commit(sp);
        book.rollback(sp);

        assert_eq!(book.balance_of(&usdc, &escrow), 200);
    }

    #[test]
    fn test_push_from_operator() {
        let (mut book, usdc, escrow, alice) = setup();
        let err = book.transfer_to(&usdc, &alice, 1).unwrap_err();
        assert!(matches!(err, TransferError::InsufficientBalance { ref account, .. } if *account == escrow));
    }
}

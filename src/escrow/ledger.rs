//! Two-Sided Threshold Escrow Ledger
//!
//! Owns both pool totals, the per-caller stake book and the outcome latch.
//! Every public operation is a single atomic transaction: it either applies
//! all of its state changes and asset transfers, or returns an error and
//! leaves both untouched.
//!
//! # State machine
//!
//! ```text
//!   Unresolved ──resolve_outcome (now >= deadline)──▶ Resolved(price)
//!      │  deposits allowed                              │  claims allowed
//!      │  claims rejected                               │  deposits rejected
//! ```
//!
//! # Invariants
//!
//! 1. **Custody**: escrow balance of asset A == `deposits_a`, of asset B == `deposits_b`
//! 2. **Single latch**: the price is written once and never overwritten
//! 3. **Single claim**: a stake is removed by the claim that consumes it
//! 4. **Floor shares**: the sum of winners' shares never exceeds the losing pool

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::assets::AssetTransfer;
use super::clock::{Clock, Nanos};
use super::config::{format_fixed, ConfigError, EscrowConfig};
use super::error::{EscrowError, EscrowResult};
use super::events::{EscrowEvent, EventLog};
use super::oracle::PriceFeed;
use super::types::{AccountId, Amount, AssetId, Pool, Price};

// =============================================================================
// OUTCOME LATCH
// =============================================================================

/// The recorded oracle observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Raw feed answer, stored verbatim.
    pub price: Price,
    pub decimals: u8,
    pub round_id: u128,
    /// Oracle source time, Unix seconds.
    pub oracle_updated_at: u64,
    /// Host time at which the latch was set.
    pub resolved_at: Nanos,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeLatch {
    #[default]
    Unresolved,
    Resolved(Resolution),
}

impl OutcomeLatch {
    pub fn is_resolved(&self) -> bool {
        matches!(self, OutcomeLatch::Resolved(_))
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            OutcomeLatch::Resolved(r) => Some(r),
            OutcomeLatch::Unresolved => None,
        }
    }
}

// =============================================================================
// RESULTS / VIEWS
// =============================================================================

/// What a claim pays (or would pay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub pool: Pool,
    /// Original stake, returned in the pool's own asset when `won`.
    pub stake: Amount,
    /// Share of the opposing pool, paid in the opposing asset. Zero when lost.
    pub payout: Amount,
    pub won: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeEntry {
    pub account: AccountId,
    pub pool: Pool,
    pub amount: Amount,
}

/// Full escrow state. Two snapshots compare equal iff state is identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSnapshot {
    pub deposits_a: Amount,
    pub deposits_b: Amount,
    /// Sorted by (account, pool).
    pub stakes: Vec<StakeEntry>,
    pub outcome: OutcomeLatch,
    pub event_count: usize,
}

/// Custody check: what the escrow account holds vs. what the pools record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConservationReport {
    pub held_a: Amount,
    pub held_b: Amount,
    pub deposits_a: Amount,
    pub deposits_b: Amount,
    pub balanced: bool,
}

/// Operation counters. Diagnostic only; not part of the snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowStats {
    pub deposits: u64,
    pub claims: u64,
    pub winning_claims: u64,
    pub losing_claims: u64,
    pub rejected_operations: u64,
}

/// `floor(opposing_total * stake / own_total)` in 128-bit space.
///
/// With `stake <= own_total` the result never exceeds `opposing_total`.
pub fn pro_rata_share(opposing_total: Amount, stake: Amount, own_total: Amount) -> Amount {
    if own_total == 0 {
        return 0;
    }
    debug_assert!(stake <= own_total, "stake {} exceeds pool total {}", stake, own_total);
    let share = (opposing_total as u128 * stake as u128) / own_total as u128;
    share.min(opposing_total as u128) as Amount
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Default)]
struct EscrowState {
    deposits_a: Amount,
    deposits_b: Amount,
    stakes: HashMap<(AccountId, Pool), Amount>,
    latch: OutcomeLatch,
}

impl EscrowState {
    fn total(&self, pool: Pool) -> Amount {
        match pool {
            Pool::A => self.deposits_a,
            Pool::B => self.deposits_b,
        }
    }

    fn set_total(&mut self, pool: Pool, value: Amount) {
        match pool {
            Pool::A => self.deposits_a = value,
            Pool::B => self.deposits_b = value,
        }
    }

    fn stake(&self, account: &AccountId, pool: Pool) -> Amount {
        self.stakes
            .get(&(account.clone(), pool))
            .copied()
            .unwrap_or(0)
    }
}

// =============================================================================
// ESCROW
// =============================================================================

pub struct Escrow<A, F, C> {
    config: EscrowConfig,
    state: EscrowState,
    assets: A,
    feed: F,
    clock: C,
    events: EventLog,
    stats: EscrowStats,
}

impl<A, F, C> Escrow<A, F, C>
where
    A: AssetTransfer,
    F: PriceFeed,
    C: Clock,
{
    /// Build an escrow over the given host collaborators.
    pub fn new(config: EscrowConfig, assets: A, feed: F, clock: C) -> Result<Self, ConfigError> {
        let violations = config.validate();
        if !violations.is_empty() {
            return Err(ConfigError::Invalid(violations));
        }
        info!(escrow = %config.escrow_account, "escrow opened: {}", config.summary());
        Ok(Self {
            config,
            state: EscrowState::default(),
            assets,
            feed,
            clock,
            events: EventLog::new(),
            stats: EscrowStats::default(),
        })
    }

    // -------------------------------------------------------------------------
    // Deposits
    // -------------------------------------------------------------------------

    /// Stake asset A into pool A.
    pub fn deposit_a(&mut self, caller: &AccountId, amount: Amount) -> EscrowResult<()> {
        self.deposit(caller, Pool::A, amount)
    }

    /// Stake asset B into pool B.
    pub fn deposit_b(&mut self, caller: &AccountId, amount: Amount) -> EscrowResult<()> {
        self.deposit(caller, Pool::B, amount)
    }

    pub fn deposit(&mut self, caller: &AccountId, pool: Pool, amount: Amount) -> EscrowResult<()> {
        let result = self.try_deposit(caller, pool, amount);
        self.observe("deposit", Some(caller), result)
    }

    fn try_deposit(&mut self, caller: &AccountId, pool: Pool, amount: Amount) -> EscrowResult<()> {
        if amount == 0 {
            return Err(EscrowError::ZeroAmount);
        }

        let capacity = self.capacity(pool);
        let new_total = match self.state.total(pool).checked_add(amount) {
            Some(total) if total <= capacity => total,
            attempted_total => {
                return Err(EscrowError::CapacityExceeded {
                    pool,
                    capacity,
                    attempted_total,
                })
            }
        };

        if self.state.latch.is_resolved() {
            return Err(EscrowError::DepositsClosed);
        }

        // stake <= total, so this cannot overflow once new_total didn't
        let new_stake = self.state.stake(caller, pool) + amount;

        let asset = self.asset(pool).clone();
        let escrow_account = self.config.escrow_account.clone();
        let savepoint = self.assets.savepoint();
        if let Err(e) = self
            .assets
            .transfer_from(&asset, caller, &escrow_account, amount)
        {
            self.assets.rollback(savepoint);
            return Err(e.into());
        }
        self.assets.commit(savepoint);

        self.state.set_total(pool, new_total);
        self.state.stakes.insert((caller.clone(), pool), new_stake);
        self.stats.deposits += 1;

        let now = self.clock.now();
        self.events.push(
            now,
            EscrowEvent::Deposited {
                caller: caller.clone(),
                pool,
                amount,
            },
        );
        info!(
            caller = %caller,
            pool = %pool,
            amount,
            pool_total = new_total,
            stake = new_stake,
            "deposit recorded"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    /// Latch the oracle price. Permissionless, once, at or after the deadline.
    pub fn resolve_outcome(&mut self) -> EscrowResult<Resolution> {
        let result = self.try_resolve();
        self.observe("resolve_outcome", None, result)
    }

    fn try_resolve(&mut self) -> EscrowResult<Resolution> {
        let now = self.clock.now();
        if now < self.config.deadline {
            return Err(EscrowError::TooEarly {
                now,
                deadline: self.config.deadline,
            });
        }
        if self.state.latch.is_resolved() {
            return Err(EscrowError::AlreadyResolved);
        }

        let quote = self.feed.latest_price()?;
        if quote.decimals != self.config.price_decimals {
            return Err(EscrowError::DecimalsMismatch {
                expected: self.config.price_decimals,
                actual: quote.decimals,
            });
        }
        if quote.is_stale() {
            warn!(
                round_id = quote.round_id,
                answered_in_round = quote.answered_in_round,
                "resolving on a round the feed reports as stale"
            );
        }

        let resolution = Resolution {
            price: quote.answer,
            decimals: quote.decimals,
            round_id: quote.round_id,
            oracle_updated_at: quote.updated_at,
            resolved_at: now,
        };
        self.state.latch = OutcomeLatch::Resolved(resolution.clone());

        self.events.push(
            now,
            EscrowEvent::Resolved {
                price: resolution.price,
                decimals: resolution.decimals,
                round_id: resolution.round_id,
            },
        );
        info!(
            price = %format_fixed(resolution.price, resolution.decimals),
            threshold = %format_fixed(self.config.threshold, self.config.price_decimals),
            winner = %Pool::winner(resolution.price, self.config.threshold),
            round_id = resolution.round_id as u64,
            "outcome resolved"
        );
        Ok(resolution)
    }

    // -------------------------------------------------------------------------
    // Claims
    // -------------------------------------------------------------------------

    /// Claim by a pool A depositor. Wins asset B when price >= threshold.
    pub fn claim_a(&mut self, caller: &AccountId) -> EscrowResult<ClaimReceipt> {
        self.claim(caller, Pool::A)
    }

    /// Claim by a pool B depositor. Wins asset A when price < threshold.
    pub fn claim_b(&mut self, caller: &AccountId) -> EscrowResult<ClaimReceipt> {
        self.claim(caller, Pool::B)
    }

    pub fn claim(&mut self, caller: &AccountId, pool: Pool) -> EscrowResult<ClaimReceipt> {
        let result = self.try_claim(caller, pool);
        self.observe("claim", Some(caller), result)
    }

    fn try_claim(&mut self, caller: &AccountId, pool: Pool) -> EscrowResult<ClaimReceipt> {
        let receipt = self.preview_claim(caller, pool)?;

        if receipt.won {
            let opposing = pool.opposite();
            let transfers = [
                (self.asset(opposing).clone(), receipt.payout),
                (self.asset(pool).clone(), receipt.stake),
            ];
            let savepoint = self.assets.savepoint();
            for (asset, amount) in transfers.iter() {
                if *amount == 0 {
                    continue;
                }
                if let Err(e) = self.assets.transfer_to(asset, caller, *amount) {
                    self.assets.rollback(savepoint);
                    return Err(e.into());
                }
            }
            self.assets.commit(savepoint);

            let own_total = self.state.total(pool) - receipt.stake;
            let opposing_total = self.state.total(opposing) - receipt.payout;
            self.state.set_total(pool, own_total);
            self.state.set_total(opposing, opposing_total);
            self.stats.winning_claims += 1;
        } else {
            self.stats.losing_claims += 1;
        }

        self.state.stakes.remove(&(caller.clone(), pool));
        self.stats.claims += 1;

        let now = self.clock.now();
        self.events.push(
            now,
            EscrowEvent::Claimed {
                caller: caller.clone(),
                pool,
                stake: receipt.stake,
                payout: receipt.payout,
            },
        );
        info!(
            caller = %caller,
            pool = %pool,
            stake = receipt.stake,
            payout = receipt.payout,
            won = receipt.won,
            deposits_a = self.state.deposits_a,
            deposits_b = self.state.deposits_b,
            "claim settled"
        );
        Ok(receipt)
    }

    /// What `claim` would pay right now, with no side effects.
    ///
    /// Fails exactly as `claim` would on its preconditions.
    pub fn preview_claim(&self, caller: &AccountId, pool: Pool) -> EscrowResult<ClaimReceipt> {
        let resolution = self
            .state
            .latch
            .resolution()
            .ok_or(EscrowError::NotResolved)?;

        let stake = self.state.stake(caller, pool);
        if stake == 0 {
            return Err(EscrowError::NothingToClaim { pool });
        }

        let won = Pool::winner(resolution.price, self.config.threshold) == pool;
        let payout = if won {
            pro_rata_share(
                self.state.total(pool.opposite()),
                stake,
                self.state.total(pool),
            )
        } else {
            0
        };

        Ok(ClaimReceipt {
            pool,
            stake,
            payout,
            won,
        })
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    pub fn pool_total(&self, pool: Pool) -> Amount {
        self.state.total(pool)
    }

    pub fn stake_of(&self, caller: &AccountId, pool: Pool) -> Amount {
        self.state.stake(caller, pool)
    }

    pub fn outcome(&self) -> &OutcomeLatch {
        &self.state.latch
    }

    pub fn resolved_price(&self) -> Option<Price> {
        self.state.latch.resolution().map(|r| r.price)
    }

    /// `None` until resolved.
    pub fn winning_pool(&self) -> Option<Pool> {
        self.resolved_price()
            .map(|price| Pool::winner(price, self.config.threshold))
    }

    pub fn capacity(&self, pool: Pool) -> Amount {
        match pool {
            Pool::A => self.config.capacity_a,
            Pool::B => self.config.capacity_b,
        }
    }

    pub fn asset(&self, pool: Pool) -> &AssetId {
        match pool {
            Pool::A => &self.config.asset_a,
            Pool::B => &self.config.asset_b,
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn stats(&self) -> &EscrowStats {
        &self.stats
    }

    pub fn snapshot(&self) -> EscrowSnapshot {
        let mut stakes: Vec<StakeEntry> = self
            .state
            .stakes
            .iter()
            .map(|((account, pool), amount)| StakeEntry {
                account: account.clone(),
                pool: *pool,
                amount: *amount,
            })
            .collect();
        stakes.sort_by(|a, b| (&a.account, a.pool).cmp(&(&b.account, b.pool)));

        EscrowSnapshot {
            deposits_a: self.state.deposits_a,
            deposits_b: self.state.deposits_b,
            stakes,
            outcome: self.state.latch.clone(),
            event_count: self.events.len(),
        }
    }

    /// Compare escrow custody with pool totals.
    pub fn check_conservation(&self) -> ConservationReport {
        let held_a = self
            .assets
            .balance_of(&self.config.asset_a, &self.config.escrow_account);
        let held_b = self
            .assets
            .balance_of(&self.config.asset_b, &self.config.escrow_account);
        ConservationReport {
            held_a,
            held_b,
            deposits_a: self.state.deposits_a,
            deposits_b: self.state.deposits_b,
            balanced: held_a == self.state.deposits_a && held_b == self.state.deposits_b,
        }
    }

    // -------------------------------------------------------------------------
    // Host access
    // -------------------------------------------------------------------------

    pub fn assets(&self) -> &A {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut A {
        &mut self.assets
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut F {
        &mut self.feed
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn observe<T>(
        &mut self,
        op: &'static str,
        caller: Option<&AccountId>,
        result: EscrowResult<T>,
    ) -> EscrowResult<T> {
        if let Err(e) = &result {
            self.stats.rejected_operations += 1;
            match caller {
                Some(caller) => warn!(op, caller = %caller, kind = e.kind(), "rejected: {}", e),
                None => warn!(op, kind = e.kind(), "rejected: {}", e),
            }
        } else {
            debug!(op, events = self.events.len(), "operation applied");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pro_rata_share_floor() {
        assert_eq!(pro_rata_share(300, 40, 100), 120);
        assert_eq!(pro_rata_share(100, 1, 3), 33);
        assert_eq!(pro_rata_share(0, 10, 10), 0);
        assert_eq!(pro_rata_share(7, 5, 0), 0);
    }

    #[test]
    fn test_pro_rata_share_no_overflow() {
        let max = Amount::MAX;
        assert_eq!(pro_rata_share(max, max, max), max);
        assert_eq!(pro_rata_share(max, max / 2, max), max / 2);
    }

    #[test]
    fn test_last_claimant_takes_remainder() {
        // Three equal winners over an indivisible losing pool
        let mut losing = 100u64;
        let mut winning = 3u64;
        let mut paid = 0u64;
        for _ in 0..3 {
            let share = pro_rata_share(losing, 1, winning);
            losing -= share;
            winning -= 1;
            paid += share;
        }
        assert_eq!(paid, 100);
        assert_eq!(losing, 0);
    }

    #[test]
    fn test_latch_accessors() {
        let latch = OutcomeLatch::default();
        assert!(!latch.is_resolved());
        assert!(latch.resolution().is_none());

        let latch = OutcomeLatch::Resolved(Resolution {
            price: 0,
            decimals: 8,
            round_id: 1,
            oracle_updated_at: 0,
            resolved_at: 0,
        });
        assert!(latch.is_resolved());
        assert_eq!(latch.resolution().map(|r| r.price), Some(0));
    }
}

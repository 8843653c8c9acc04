//! Thread-safe escrow handle.
//!
//! Operations on one escrow are serialized: each call takes the lock for the
//! whole transaction, so two racing resolvers see exactly one winner and two
//! racing claims for the same stake see exactly one payout.

use parking_lot::Mutex;
use std::sync::Arc;

use super::assets::AssetTransfer;
use super::clock::Clock;
use super::error::EscrowResult;
use super::ledger::{ClaimReceipt, Escrow, EscrowSnapshot, Resolution};
use super::oracle::PriceFeed;
use super::types::{AccountId, Amount, Pool};

pub struct SharedEscrow<A, F, C> {
    inner: Arc<Mutex<Escrow<A, F, C>>>,
}

impl<A, F, C> Clone for SharedEscrow<A, F, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, F, C> SharedEscrow<A, F, C>
where
    A: AssetTransfer,
    F: PriceFeed,
    C: Clock,
{
    pub fn new(escrow: Escrow<A, F, C>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(escrow)),
        }
    }

    pub fn deposit(&self, caller: &AccountId, pool: Pool, amount: Amount) -> EscrowResult<()> {
        self.inner.lock().deposit(caller, pool, amount)
    }

    pub fn resolve_outcome(&self) -> EscrowResult<Resolution> {
        self.inner.lock().resolve_outcome()
    }

    pub fn claim(&self, caller: &AccountId, pool: Pool) -> EscrowResult<ClaimReceipt> {
        self.inner.lock().claim(caller, pool)
    }

    pub fn snapshot(&self) -> EscrowSnapshot {
        self.inner.lock().snapshot()
    }

    /// Run `f` with exclusive access, e.g. for host setup or several reads
    /// that must observe the same state.
    pub fn with<R>(&self, f: impl FnOnce(&mut Escrow<A, F, C>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::assets::InMemoryAssets;
    use crate::escrow::clock::{SharedClock, NANOS_PER_SEC};
    use crate::escrow::config::EscrowConfig;
    use crate::escrow::error::EscrowError;
    use crate::escrow::oracle::{PriceQuote, StaticPriceFeed};
    use crate::escrow::types::AssetId;
    use std::thread;

    fn shared() -> (SharedEscrow<InMemoryAssets, StaticPriceFeed, SharedClock>, SharedClock) {
        let config = EscrowConfig {
            escrow_account: AccountId::new("escrow"),
            asset_a: AssetId::new("WETH"),
            asset_b: AssetId::new("USDC"),
            capacity_a: 1_000,
            capacity_b: 1_000,
            deadline: 100 * NANOS_PER_SEC,
            threshold: 50,
            price_decimals: 8,
        };
        let clock = SharedClock::new(0);
        let escrow = Escrow::new(
            config,
            InMemoryAssets::new(AccountId::new("escrow")),
            StaticPriceFeed::new(PriceQuote::new(75, 8)),
            clock.clone(),
        )
        .unwrap();
        (SharedEscrow::new(escrow), clock)
    }

    #[test]
    fn test_racing_resolvers_latch_once() {
        let (escrow, clock) = shared();
        clock.advance_to(100 * NANOS_PER_SEC);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let escrow = escrow.clone();
                thread::spawn(move || escrow.resolve_outcome())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == EscrowError::AlreadyResolved));
        assert_eq!(escrow.with(|e| e.feed().calls()), 1);
    }

    #[test]
    fn test_racing_claims_pay_once() {
        let (escrow, clock) = shared();
        let alice = AccountId::new("alice");
        escrow.with(|e| {
            let weth = e.asset(Pool::A).clone();
            e.assets_mut().mint(&weth, &alice, 10);
            e.assets_mut().approve(&weth, &alice, 10);
        });
        escrow.deposit(&alice, Pool::A, 10).unwrap();
        clock.advance_to(100 * NANOS_PER_SEC);
        escrow.resolve_outcome().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let escrow = escrow.clone();
                let alice = alice.clone();
                thread::spawn(move || escrow.claim(&alice, Pool::A))
            })
            .collect();
        let paid = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count();

        assert_eq!(paid, 1);
        assert!(escrow.with(|e| e.check_conservation().balanced));
        assert!(escrow.snapshot().stakes.is_empty());
    }
}

//! Escrow rejection taxonomy.
//!
//! Every variant is a permanent rejection of that specific call. The ledger
//! guarantees that state is unchanged whenever one of these is returned.

use super::assets::TransferError;
use super::clock::Nanos;
use super::oracle::FeedError;
use super::types::{Amount, Pool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    /// Deposit of zero units.
    ZeroAmount,
    /// Deposit would push the pool strictly over its ceiling.
    CapacityExceeded {
        pool: Pool,
        capacity: Amount,
        /// `None` when the sum itself overflowed.
        attempted_total: Option<Amount>,
    },
    /// Deposit after the outcome was resolved.
    DepositsClosed,
    /// Resolution attempted before the deadline.
    TooEarly { now: Nanos, deadline: Nanos },
    /// Resolution attempted after it already happened.
    AlreadyResolved,
    /// Claim attempted before resolution.
    NotResolved,
    /// No remaining stake for this caller in this pool.
    NothingToClaim { pool: Pool },
    /// Feed reported a precision other than the configured one.
    DecimalsMismatch { expected: u8, actual: u8 },
    /// Price feed lookup failed; the latch stays unset.
    PriceFeed(FeedError),
    /// Underlying asset movement failed.
    Transfer(TransferError),
}

impl std::fmt::Display for EscrowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroAmount => write!(f, "Deposit amount must be non-zero"),
            Self::CapacityExceeded { pool, capacity, attempted_total } => match attempted_total {
                Some(total) => write!(
                    f,
                    "Deposit would bring pool {} to {} (capacity {})",
                    pool, total, capacity
                ),
                None => write!(
                    f,
                    "Deposit would overflow pool {} (capacity {})",
                    pool, capacity
                ),
            },
            Self::DepositsClosed => write!(f, "Deposits are closed: outcome already resolved"),
            Self::TooEarly { now, deadline } => write!(
                f,
                "Too early to resolve: now {}ns is before deadline {}ns",
                now, deadline
            ),
            Self::AlreadyResolved => write!(f, "Outcome already resolved"),
            Self::NotResolved => write!(f, "Outcome not yet resolved"),
            Self::NothingToClaim { pool } => write!(f, "Nothing to claim in pool {}", pool),
            Self::DecimalsMismatch { expected, actual } => write!(
                f,
                "Price feed decimals mismatch: configured {}, feed reported {}",
                expected, actual
            ),
            Self::PriceFeed(e) => write!(f, "Price feed error: {}", e),
            Self::Transfer(e) => write!(f, "Transfer failed: {}", e),
        }
    }
}

impl std::error::Error for EscrowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PriceFeed(e) => Some(e),
            Self::Transfer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransferError> for EscrowError {
    fn from(e: TransferError) -> Self {
        Self::Transfer(e)
    }
}

impl From<FeedError> for EscrowError {
    fn from(e: FeedError) -> Self {
        Self::PriceFeed(e)
    }
}

impl EscrowError {
    /// Short machine-readable kind, used as a tracing field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ZeroAmount => "zero_amount",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::DepositsClosed => "deposits_closed",
            Self::TooEarly { .. } => "too_early",
            Self::AlreadyResolved => "already_resolved",
            Self::NotResolved => "not_resolved",
            Self::NothingToClaim { .. } => "nothing_to_claim",
            Self::DecimalsMismatch { .. } => "decimals_mismatch",
            Self::PriceFeed(_) => "price_feed",
            Self::Transfer(_) => "transfer",
        }
    }
}

pub type EscrowResult<T> = std::result::Result<T, EscrowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::types::{AccountId, AssetId};

    #[test]
    fn test_display_messages() {
        let e = EscrowError::CapacityExceeded {
            pool: Pool::A,
            capacity: 100,
            attempted_total: Some(101),
        };
        assert_eq!(e.to_string(), "Deposit would bring pool A to 101 (capacity 100)");
        assert_eq!(e.kind(), "capacity_exceeded");

        let e = EscrowError::NothingToClaim { pool: Pool::B };
        assert!(e.to_string().contains("pool B"));
    }

    #[test]
    fn test_transfer_error_is_source() {
        use std::error::Error;
        let e: EscrowError = TransferError::InsufficientBalance {
            asset: AssetId::new("A"),
            account: AccountId::new("alice"),
            available: 1,
            requested: 2,
        }
        .into();
        assert_eq!(e.kind(), "transfer");
        assert!(e.source().is_some());
    }
}

//! Threshold Escrow
//!
//! Two-pool, oracle-settled escrow. Depositors stake asset A into pool A or
//! asset B into pool B before resolution. After the deadline anyone may latch
//! the oracle price once; pool A wins iff `price >= threshold`. Winners then
//! claim their own stake back plus a floor pro-rata share of the losing pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 SharedEscrow (Arc<Mutex<Escrow>>)               │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Escrow: pool totals, stake book, outcome latch, event log      │
//! └─────────────────────────────────────────────────────────────────┘
//!        │                       │                       │
//!        ▼                       ▼                       ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │AssetTransfer│        │  PriceFeed  │        │    Clock    │
//! │ (savepoint) │        │ (one read)  │        │ (deadline)  │
//! └─────────────┘        └─────────────┘        └─────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Atomicity**: a rejected call changes neither escrow state nor balances
//! - **Custody**: the escrow account holds exactly `deposits_a` of A and `deposits_b` of B
//! - **Integer math**: shares are `floor(opposing * stake / own)` over u128

pub mod assets;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod oracle;
pub mod scenario;
pub mod shared;
pub mod types;


pub use assets::{AssetTransfer, InMemoryAssets, Savepoint, TransferError};
pub use clock::{Clock, Nanos, SharedClock, SimClock, NANOS_PER_SEC};
pub use config::{ConfigError, ConfigViolation, EscrowConfig, EscrowConfigFile};
pub use error::{EscrowError, EscrowResult};
pub use events::{EscrowEvent, EventLog, EventRecord};
pub use ledger::{
    pro_rata_share, ClaimReceipt, ConservationReport, Escrow, EscrowSnapshot, EscrowStats,
    OutcomeLatch, Resolution, StakeEntry,
};
pub use oracle::{FeedError, PriceFeed, PriceQuote, ScriptedPriceFeed, StaticPriceFeed};
pub use scenario::{Action, Scenario, ScenarioReport, ScenarioRunner, SimEscrow, Step};
pub use shared::SharedEscrow;
pub use types::{AccountId, Amount, AssetId, Pool, Price};

//! Threshold Escrow Library
//!
//! Exposes the escrow core for the simulator binary and integration tests.

pub mod escrow;

pub use escrow::{
    AccountId, Amount, AssetId, Escrow, EscrowConfig, EscrowError, Pool, Price, SharedEscrow,
};

//! Observable escrow events for indexers and auditors.
//!
//! Every successful operation appends exactly one event. The log is
//! append-only and ordered by `seq`.

use serde::{Deserialize, Serialize};

use super::clock::Nanos;
use super::types::{AccountId, Amount, Pool, Price};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowEvent {
    Deposited {
        caller: AccountId,
        pool: Pool,
        amount: Amount,
    },
    Resolved {
        price: Price,
        decimals: u8,
        round_id: u128,
    },
    /// `payout` is the share of the opposing pool, zero on the losing side.
    Claimed {
        caller: AccountId,
        pool: Pool,
        stake: Amount,
        payout: Amount,
    },
}

impl EscrowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deposited { .. } => "deposited",
            Self::Resolved { .. } => "resolved",
            Self::Claimed { .. } => "claimed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub at: Nanos,
    pub event: EscrowEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, at: Nanos, event: EscrowEvent) -> u64 {
        let seq = self.records.len() as u64;
        self.records.push(EventRecord { seq, at, event });
        seq
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EscrowEvent> {
        self.records.last().map(|r| &r.event)
    }

    /// Claims recorded for one caller, in order.
    pub fn claims_by<'a>(&'a self, caller: &'a AccountId) -> impl Iterator<Item = &'a EscrowEvent> + 'a {
        self.records.iter().map(|r| &r.event).filter(move |e| {
            matches!(e, EscrowEvent::Claimed { caller: c, .. } if c == caller)
        })
    }
}

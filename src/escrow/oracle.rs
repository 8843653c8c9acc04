//! Price Feed Abstraction
//!
//! The escrow consults its feed exactly once, on the first successful
//! resolution after the deadline. Quotes are Chainlink-style rounds: a signed
//! fixed-point `answer` with `decimals`, plus round metadata the core records
//! but does not validate.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::types::Price;

// =============================================================================
// Quote
// =============================================================================

/// A single oracle round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Oracle answer in fixed-point units (`price * 10^decimals`).
    pub answer: Price,
    /// Decimals for this feed.
    pub decimals: u8,
    /// Round ID (uint80 upstream, stored as u128).
    pub round_id: u128,
    /// Oracle source time, Unix seconds.
    pub updated_at: u64,
    /// Round that this answer was computed in.
    pub answered_in_round: u128,
}

impl PriceQuote {
    /// Quote with round metadata zeroed; handy for tests and fixed feeds.
    pub fn new(answer: Price, decimals: u8) -> Self {
        Self {
            answer,
            decimals,
            round_id: 0,
            updated_at: 0,
            answered_in_round: 0,
        }
    }

    /// Decode the answer to a floating-point price (display only).
    pub fn to_f64(&self) -> f64 {
        let divisor = 10f64.powi(self.decimals as i32);
        (self.answer as f64) / divisor
    }

    /// answered_in_round < round_id. Informational; resolution does not reject stale rounds.
    pub fn is_stale(&self) -> bool {
        self.answered_in_round < self.round_id
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedError {
    /// Feed has no round to report.
    NoData,
    /// Feed could not be reached.
    Unavailable(String),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoData => write!(f, "Price feed has no data"),
            Self::Unavailable(msg) => write!(f, "Price feed unavailable: {}", msg),
        }
    }
}

impl std::error::Error for FeedError {}

// =============================================================================
// Trait
// =============================================================================

pub trait PriceFeed {
    /// Most recent observed round.
    fn latest_price(&mut self) -> Result<PriceQuote, FeedError>;
}

impl<F: PriceFeed + ?Sized> PriceFeed for Box<F> {
    fn latest_price(&mut self) -> Result<PriceQuote, FeedError> {
        (**self).latest_price()
    }
}

// =============================================================================
// Reference feeds
// =============================================================================

/// Feed that always answers with the current quote. The quote can be swapped
/// to simulate the market moving.
#[derive(Debug, Clone)]
pub struct StaticPriceFeed {
    quote: Option<PriceQuote>,
    calls: u64,
}

impl StaticPriceFeed {
    pub fn new(quote: PriceQuote) -> Self {
        Self {
            quote: Some(quote),
            calls: 0,
        }
    }

    pub fn empty() -> Self {
        Self {
            quote: None,
            calls: 0,
        }
    }

    pub fn set_quote(&mut self, quote: PriceQuote) {
        self.quote = Some(quote);
    }

    pub fn set_answer(&mut self, answer: Price) {
        match self.quote.as_mut() {
            Some(q) => {
                q.answer = answer;
                q.round_id += 1;
                q.answered_in_round = q.round_id;
            }
            None => self.quote = Some(PriceQuote::new(answer, 8)),
        }
    }

    /// Number of times the feed was read.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl PriceFeed for StaticPriceFeed {
    fn latest_price(&mut self) -> Result<PriceQuote, FeedError> {
        self.calls += 1;
        self.quote.clone().ok_or(FeedError::NoData)
    }
}

/// Feed that replays a fixed script of responses, one per call. Once the
/// script is exhausted it answers `NoData`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPriceFeed {
    script: VecDeque<Result<PriceQuote, FeedError>>,
    calls: u64,
}

impl ScriptedPriceFeed {
    pub fn new(script: impl IntoIterator<Item = Result<PriceQuote, FeedError>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            calls: 0,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl PriceFeed for ScriptedPriceFeed {
    fn latest_price(&mut self) -> Result<PriceQuote, FeedError> {
        self.calls += 1;
        self.script.pop_front().unwrap_or(Err(FeedError::NoData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_decode() {
        let q = PriceQuote::new(5_010_000_000_000, 8);
        assert!((q.to_f64() - 50_100.0).abs() < 1e-6);
        assert!(!q.is_stale());

        let stale = PriceQuote {
            round_id: 5,
            answered_in_round: 4,
            ..q
        };
        assert!(stale.is_stale());
    }

    #[test]
    fn test_static_feed_counts_calls() {
        let mut feed = StaticPriceFeed::new(PriceQuote::new(100, 8));
        assert_eq!(feed.latest_price().unwrap().answer, 100);
        feed.set_answer(200);
        let q = feed.latest_price().unwrap();
        assert_eq!(q.answer, 200);
        assert_eq!(q.round_id, 1);
        assert_eq!(feed.calls(), 2);

        assert_eq!(StaticPriceFeed::empty().latest_price(), Err(FeedError::NoData));
    }

    #[test]
    fn test_scripted_feed_replays_in_order() {
        let mut feed = ScriptedPriceFeed::new([
            Err(FeedError::Unavailable("rpc timeout".to_string())),
            Ok(PriceQuote::new(42, 8)),
        ]);
        assert!(matches!(feed.latest_price(), Err(FeedError::Unavailable(_))));
        assert_eq!(feed.latest_price().unwrap().answer, 42);
        assert_eq!(feed.latest_price(), Err(FeedError::NoData));
        assert_eq!(feed.calls(), 3);
        assert_eq!(feed.remaining(), 0);
    }
}

//! Scripted Escrow Scenarios
//!
//! A scenario is a TOML list of host actions (mint, approve, deposit, move
//! the clock, set the oracle price, resolve, claim) replayed against an
//! escrow wired to in-memory collaborators. Used by the `escrow-sim` binary
//! and by integration tests.
//!
//! ```toml
//! start = "2025-06-01T00:00:00Z"
//!
//! [[step]]
//! action = "fund"
//! account = "alice"
//! pool = "A"
//! amount = 500
//!
//! [[step]]
//! action = "claim"
//! account = "alice"
//! pool = "A"
//! expect = "not_resolved"
//! ```
//!
//! `expect` is optional: `"ok"` requires success, any other value must match
//! the rejection's `EscrowError::kind()`. Steps without it are recorded
//! whatever their result.

use anyhow::{bail, Context, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

use super::assets::{AssetTransfer, InMemoryAssets};
use super::clock::{parse_timestamp, Clock, Nanos, SimClock, NANOS_PER_SEC};
use super::config::{parse_fixed, EscrowConfig};
use super::error::EscrowError;
use super::events::EventRecord;
use super::ledger::{ConservationReport, Escrow, EscrowSnapshot, EscrowStats};
use super::oracle::{PriceQuote, StaticPriceFeed};
use super::types::{AccountId, Amount, AssetId, Pool};

pub type SimEscrow = Escrow<InMemoryAssets, StaticPriceFeed, SimClock>;

// =============================================================================
// SCRIPT FORMAT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Mint `amount` of the pool's asset and approve the escrow to pull it.
    Fund { account: String, pool: Pool, amount: Amount },
    Mint { account: String, pool: Pool, amount: Amount },
    /// Set (not add to) the escrow's allowance on the account.
    Approve { account: String, pool: Pool, amount: Amount },
    Deposit { account: String, pool: Pool, amount: Amount },
    Advance { secs: i64 },
    AdvanceTo { at: String },
    AdvanceToDeadline,
    /// Decimal price, scaled by the configured decimals.
    SetPrice { price: String },
    SetPriceRaw { answer: i128 },
    Resolve,
    Claim { account: String, pool: Pool },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fund { .. } => "fund",
            Self::Mint { .. } => "mint",
            Self::Approve { .. } => "approve",
            Self::Deposit { .. } => "deposit",
            Self::Advance { .. } => "advance",
            Self::AdvanceTo { .. } => "advance_to",
            Self::AdvanceToDeadline => "advance_to_deadline",
            Self::SetPrice { .. } => "set_price",
            Self::SetPriceRaw { .. } => "set_price_raw",
            Self::Resolve => "resolve",
            Self::Claim { .. } => "claim",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<String>,
}

impl From<Action> for Step {
    fn from(action: Action) -> Self {
        Self { action, expect: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Simulated start time (RFC 3339). Defaults to one day before the deadline.
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("Failed to parse scenario")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario: {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    /// Seeded random round: fund everyone, random deposits, resolve near the
    /// threshold, then every account claims both pools in shuffled order.
    pub fn random(seed: u64, config: &EscrowConfig, accounts: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let names: Vec<String> = (0..accounts.max(1)).map(|i| format!("user{}", i)).collect();
        let mut steps: Vec<Step> = Vec::new();

        let budget = |capacity: Amount| (capacity / names.len() as Amount).max(1);
        for name in &names {
            for pool in Pool::BOTH {
                let capacity = match pool {
                    Pool::A => config.capacity_a,
                    Pool::B => config.capacity_b,
                };
                steps.push(
                    Action::Fund {
                        account: name.clone(),
                        pool,
                        amount: budget(capacity),
                    }
                    .into(),
                );
            }
        }

        for _ in 0..rng.gen_range(names.len()..=names.len() * 4) {
            let account = names[rng.gen_range(0..names.len())].clone();
            let pool = if rng.gen_bool(0.5) { Pool::A } else { Pool::B };
            let capacity = match pool {
                Pool::A => config.capacity_a,
                Pool::B => config.capacity_b,
            };
            let amount = rng.gen_range(1..=budget(capacity));
            steps.push(Action::Deposit { account, pool, amount }.into());
        }

        let answer = config
            .threshold
            .saturating_add(rng.gen_range(-1_000i128..=1_000));
        steps.push(Action::AdvanceToDeadline.into());
        steps.push(Action::SetPriceRaw { answer }.into());
        steps.push(Step {
            action: Action::Resolve,
            expect: Some("ok".to_string()),
        });

        let mut claims: Vec<(String, Pool)> = names
            .iter()
            .flat_map(|n| Pool::BOTH.into_iter().map(move |p| (n.clone(), p)))
            .collect();
        for i in (1..claims.len()).rev() {
            claims.swap(i, rng.gen_range(0..=i));
        }
        steps.extend(
            claims
                .into_iter()
                .map(|(account, pool)| Step::from(Action::Claim { account, pool })),
        );

        Self { start: None, steps }
    }
}

// =============================================================================
// REPORT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub action: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceLine {
    pub account: AccountId,
    pub asset: AssetId,
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub config: EscrowConfig,
    pub steps: Vec<StepOutcome>,
    pub events: Vec<EventRecord>,
    pub snapshot: EscrowSnapshot,
    pub stats: EscrowStats,
    pub conservation: ConservationReport,
    pub balances: Vec<BalanceLine>,
}

impl ScenarioReport {
    pub fn rejected(&self) -> usize {
        self.steps.iter().filter(|s| !s.ok).count()
    }
}

// =============================================================================
// RUNNER
// =============================================================================

pub struct ScenarioRunner {
    escrow: SimEscrow,
    accounts: BTreeSet<AccountId>,
    outcomes: Vec<StepOutcome>,
}

impl ScenarioRunner {
    pub fn new(config: EscrowConfig, start: Nanos) -> Result<Self> {
        let assets = InMemoryAssets::new(config.escrow_account.clone());
        let escrow = Escrow::new(config, assets, StaticPriceFeed::empty(), SimClock::new(start))?;
        Ok(Self {
            escrow,
            accounts: BTreeSet::new(),
            outcomes: Vec::new(),
        })
    }

    /// Build a runner for `scenario` and replay every step.
    pub fn run(config: EscrowConfig, scenario: &Scenario) -> Result<ScenarioReport> {
        let start = match &scenario.start {
            Some(s) => parse_timestamp(s)
                .with_context(|| format!("Invalid scenario start '{}'", s))?,
            None => config.deadline.saturating_sub(86_400 * NANOS_PER_SEC),
        };
        let mut runner = Self::new(config, start)?;
        for step in &scenario.steps {
            runner.apply(step)?;
        }
        Ok(runner.report())
    }

    pub fn escrow(&self) -> &SimEscrow {
        &self.escrow
    }

    /// Apply one step. Escrow rejections are recorded, not returned; the
    /// error path is for malformed steps and unmet `expect` values.
    pub fn apply(&mut self, step: &Step) -> Result<&StepOutcome> {
        let index = self.outcomes.len();
        let name = step.action.name();
        let result = self
            .execute(&step.action)
            .with_context(|| format!("step {} ({})", index, name))?;

        if let Some(expected) = step.expect.as_deref() {
            let actual = match &result {
                Ok(()) => "ok",
                Err(e) => e.kind(),
            };
            if actual != expected {
                bail!(
                    "step {} ({}): expected {}, got {}",
                    index,
                    name,
                    expected,
                    actual
                );
            }
        }

        debug!(index, action = name, ok = result.is_ok(), "scenario step");
        self.outcomes.push(StepOutcome {
            index,
            action: name.to_string(),
            ok: result.is_ok(),
            error_kind: result.as_ref().err().map(|e| e.kind().to_string()),
            error: result.as_ref().err().map(|e| e.to_string()),
        });
        Ok(&self.outcomes[index])
    }

    fn execute(&mut self, action: &Action) -> Result<Result<(), EscrowError>> {
        let outcome = match action {
            Action::Fund { account, pool, amount } => {
                let (account, asset) = self.target(account, *pool);
                let assets = self.escrow.assets_mut();
                assets.mint(&asset, &account, *amount);
                let allowed = assets.allowance(&asset, &account);
                assets.approve(&asset, &account, allowed.saturating_add(*amount));
                Ok(())
            }
            Action::Mint { account, pool, amount } => {
                let (account, asset) = self.target(account, *pool);
                self.escrow.assets_mut().mint(&asset, &account, *amount);
                Ok(())
            }
            Action::Approve { account, pool, amount } => {
                let (account, asset) = self.target(account, *pool);
                self.escrow.assets_mut().approve(&asset, &account, *amount);
                Ok(())
            }
            Action::Deposit { account, pool, amount } => {
                let (account, _) = self.target(account, *pool);
                self.escrow.deposit(&account, *pool, *amount)
            }
            Action::Advance { secs } => {
                if *secs < 0 {
                    bail!("cannot advance by a negative duration ({}s)", secs);
                }
                let now = self.escrow.clock().now();
                let target = secs
                    .checked_mul(NANOS_PER_SEC)
                    .and_then(|delta| now.checked_add(delta))
                    .with_context(|| format!("advancing {}s overflows the simulated clock", secs))?;
                self.advance_to(target)?;
                Ok(())
            }
            Action::AdvanceTo { at } => {
                let target = parse_timestamp(at)
                    .with_context(|| format!("Invalid timestamp '{}'", at))?;
                self.advance_to(target)?;
                Ok(())
            }
            Action::AdvanceToDeadline => {
                let deadline = self.escrow.config().deadline;
                self.advance_to(deadline)?;
                Ok(())
            }
            Action::SetPrice { price } => {
                let decimals = self.escrow.config().price_decimals;
                let answer = parse_fixed(price, decimals)
                    .map_err(anyhow::Error::msg)
                    .with_context(|| format!("Invalid price '{}'", price))?;
                self.set_answer(answer);
                Ok(())
            }
            Action::SetPriceRaw { answer } => {
                self.set_answer(*answer);
                Ok(())
            }
            Action::Resolve => self.escrow.resolve_outcome().map(|_| ()),
            Action::Claim { account, pool } => {
                let (account, _) = self.target(account, *pool);
                self.escrow.claim(&account, *pool).map(|_| ())
            }
        };
        Ok(outcome)
    }

    fn target(&mut self, account: &str, pool: Pool) -> (AccountId, AssetId) {
        let account = AccountId::new(account);
        self.accounts.insert(account.clone());
        (account, self.escrow.asset(pool).clone())
    }

    fn advance_to(&mut self, target: Nanos) -> Result<()> {
        let now = self.escrow.clock().now();
        if target < now {
            bail!("clock cannot move backward from {} to {}", now, target);
        }
        self.escrow.clock_mut().advance_to(target);
        Ok(())
    }

    fn set_answer(&mut self, answer: i128) {
        let decimals = self.escrow.config().price_decimals;
        let round_id = self.escrow.feed().calls() as u128 + 1;
        let updated_at = self.escrow.clock().now().div_euclid(NANOS_PER_SEC).max(0) as u64;
        self.escrow.feed_mut().set_quote(PriceQuote {
            answer,
            decimals,
            round_id,
            updated_at,
            answered_in_round: round_id,
        });
    }

    pub fn report(&self) -> ScenarioReport {
        let config = self.escrow.config().clone();
        let mut holders: Vec<AccountId> = self.accounts.iter().cloned().collect();
        holders.push(config.escrow_account.clone());

        let assets = self.escrow.assets();
        let balances = holders
            .iter()
            .flat_map(|account| {
                [&config.asset_a, &config.asset_b].map(|asset| BalanceLine {
                    account: account.clone(),
                    asset: asset.clone(),
                    amount: assets.balance_of(asset, account),
                })
            })
            .collect();

        let report = ScenarioReport {
            steps: self.outcomes.clone(),
            events: self.escrow.events().records().to_vec(),
            snapshot: self.escrow.snapshot(),
            stats: self.escrow.stats().clone(),
            conservation: self.escrow.check_conservation(),
            balances,
            config,
        };
        info!(
            steps = report.steps.len(),
            rejected = report.rejected(),
            balanced = report.conservation.balanced,
            "scenario finished"
        );
        report
    }
}

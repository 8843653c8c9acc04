//! Escrow Configuration
//!
//! Construction-time constants: capacities, deadline, threshold, asset ids.
//! Nothing here changes after the escrow is built.
//!
//! # Price convention
//!
//! The threshold is held as a raw integer in the price feed's own fixed-point
//! units (`price * 10^price_decimals`). Config files may give either the raw
//! value (`threshold_raw`) or a decimal string (`threshold = "2000.5"`) which
//! is scaled by `price_decimals` at load time. At resolution the feed must
//! report the same `decimals`; comparisons are always integer-to-integer.
//!
//! # Loading
//!
//! `EscrowConfigFile` is the TOML shape. `ESCROW_*` environment variables
//! override file values, then `into_config()` converts and validates.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::clock::{nanos_to_datetime, parse_timestamp, Nanos, NANOS_PER_SEC};
use super::types::{AccountId, Amount, AssetId, Price};

/// Largest decimals value for which `10^decimals` fits in an i128.
pub const MAX_PRICE_DECIMALS: u8 = 38;

// =============================================================================
// VIOLATIONS / ERRORS
// =============================================================================

/// A single invalid or missing configuration field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigViolation {
    pub field: String,
    pub description: String,
    pub suggestion: String,
}

impl ConfigViolation {
    fn new(field: &str, description: impl Into<String>, suggestion: &str) -> Self {
        Self {
            field: field.to_string(),
            description: description.into(),
            suggestion: suggestion.to_string(),
        }
    }
}

impl std::fmt::Display for ConfigViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.field, self.description, self.suggestion)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(Vec<ConfigViolation>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "Failed to read config: {}", msg),
            Self::Parse(msg) => write!(f, "Failed to parse config: {}", msg),
            Self::Invalid(violations) => {
                writeln!(f, "Escrow configuration INVALID:")?;
                for v in violations {
                    writeln!(f, "  - {}", v)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// RUNTIME CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Account that holds both pools' assets.
    pub escrow_account: AccountId,
    /// Asset staked into pool A.
    pub asset_a: AssetId,
    /// Asset staked into pool B.
    pub asset_b: AssetId,
    pub capacity_a: Amount,
    pub capacity_b: Amount,
    /// Earliest time resolution is allowed.
    pub deadline: Nanos,
    /// Raw threshold in feed units. Pool A wins iff price >= threshold.
    pub threshold: Price,
    /// Fixed-point precision shared by the threshold and the feed.
    pub price_decimals: u8,
}

impl EscrowConfig {
    /// Validate field values. Empty result means the config is usable.
    pub fn validate(&self) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();

        if self.escrow_account.as_str().is_empty() {
            violations.push(ConfigViolation::new(
                "escrow_account",
                "Escrow account is empty",
                "Set escrow_account to the account that will custody deposits",
            ));
        }
        if self.asset_a.as_str().is_empty() {
            violations.push(ConfigViolation::new(
                "asset_a",
                "Asset A is empty",
                "Set asset_a to the token deposited into pool A",
            ));
        }
        if self.asset_b.as_str().is_empty() {
            violations.push(ConfigViolation::new(
                "asset_b",
                "Asset B is empty",
                "Set asset_b to the token deposited into pool B",
            ));
        }
        if self.asset_a == self.asset_b {
            violations.push(ConfigViolation::new(
                "asset_b",
                format!("Both pools use asset '{}'", self.asset_a),
                "Pools must hold distinct assets so holdings can be reconciled per pool",
            ));
        }
        if self.capacity_a == 0 {
            violations.push(ConfigViolation::new(
                "capacity_a",
                "Capacity is 0, no deposit could ever succeed",
                "Set capacity_a to the maximum total stake for pool A",
            ));
        }
        if self.capacity_b == 0 {
            violations.push(ConfigViolation::new(
                "capacity_b",
                "Capacity is 0, no deposit could ever succeed",
                "Set capacity_b to the maximum total stake for pool B",
            ));
        }
        if self.price_decimals > MAX_PRICE_DECIMALS {
            violations.push(ConfigViolation::new(
                "price_decimals",
                format!("{} decimals cannot be represented", self.price_decimals),
                "Use the feed's decimals() value (typically 8)",
            ));
        }

        violations
    }

    /// One-line summary for startup logs.
    pub fn summary(&self) -> String {
        let deadline = nanos_to_datetime(self.deadline)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| format!("{}ns", self.deadline));
        format!(
            "pool A: {} cap {} | pool B: {} cap {} | threshold {} ({} decimals) | deadline {}",
            self.asset_a,
            self.capacity_a,
            self.asset_b,
            self.capacity_b,
            format_fixed(self.threshold, self.price_decimals),
            self.price_decimals,
            deadline
        )
    }
}

// =============================================================================
// FILE FORMAT
// =============================================================================

/// TOML representation of `EscrowConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowConfigFile {
    #[serde(default)]
    pub escrow_account: Option<String>,
    #[serde(default)]
    pub asset_a: Option<String>,
    #[serde(default)]
    pub asset_b: Option<String>,
    #[serde(default)]
    pub capacity_a: Option<u64>,
    #[serde(default)]
    pub capacity_b: Option<u64>,
    /// RFC 3339 timestamp.
    #[serde(default)]
    pub deadline: Option<String>,
    /// Alternative to `deadline`.
    #[serde(default)]
    pub deadline_unix_secs: Option<i64>,
    /// Decimal string, scaled by `price_decimals`.
    #[serde(default)]
    pub threshold: Option<String>,
    /// Raw fixed-point threshold.
    #[serde(default)]
    pub threshold_raw: Option<i64>,
    #[serde(default)]
    pub price_decimals: Option<u8>,
    /// Overrides that failed to parse; reported by `into_config`.
    #[serde(skip)]
    override_violations: Vec<ConfigViolation>,
}

impl EscrowConfigFile {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Apply `ESCROW_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (environment, test map).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ESCROW_ACCOUNT") {
            self.escrow_account = Some(v);
        }
        if let Some(v) = lookup("ESCROW_ASSET_A") {
            self.asset_a = Some(v);
        }
        if let Some(v) = lookup("ESCROW_ASSET_B") {
            self.asset_b = Some(v);
        }
        if let Some(v) = lookup("ESCROW_CAPACITY_A") {
            if let Some(cap) = self.parse_override("ESCROW_CAPACITY_A", &v) {
                self.capacity_a = Some(cap);
            }
        }
        if let Some(v) = lookup("ESCROW_CAPACITY_B") {
            if let Some(cap) = self.parse_override("ESCROW_CAPACITY_B", &v) {
                self.capacity_b = Some(cap);
            }
        }
        if let Some(v) = lookup("ESCROW_DEADLINE") {
            self.deadline = Some(v);
            self.deadline_unix_secs = None;
        }
        if let Some(v) = lookup("ESCROW_THRESHOLD") {
            self.threshold = Some(v);
            self.threshold_raw = None;
        }
        if let Some(v) = lookup("ESCROW_PRICE_DECIMALS") {
            if let Some(decimals) = self.parse_override("ESCROW_PRICE_DECIMALS", &v) {
                self.price_decimals = Some(decimals);
            }
        }
    }

    /// Parse an integer override, recording a violation instead of falling
    /// back to the file value.
    fn parse_override<T: std::str::FromStr>(&mut self, key: &str, raw: &str) -> Option<T> {
        match raw.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                self.override_violations.push(ConfigViolation::new(
                    key,
                    format!("'{}' is not a valid unsigned integer", raw),
                    "Use plain decimal digits, e.g. 1000000",
                ));
                None
            }
        }
    }

    /// Convert to a runtime config, reporting every problem at once.
    pub fn into_config(self) -> Result<EscrowConfig, ConfigError> {
        let mut violations = self.override_violations.clone();

        let price_decimals = self.price_decimals.unwrap_or(8);

        let deadline = match (&self.deadline, self.deadline_unix_secs) {
            (Some(s), _) => parse_timestamp(s).or_else(|| {
                violations.push(ConfigViolation::new(
                    "deadline",
                    format!("'{}' is not an RFC 3339 timestamp", s),
                    "Use a value like 2025-06-30T00:00:00Z",
                ));
                None
            }),
            (None, Some(secs)) => secs.checked_mul(NANOS_PER_SEC).or_else(|| {
                violations.push(ConfigViolation::new(
                    "deadline_unix_secs",
                    format!("{} is out of range", secs),
                    "Use a Unix timestamp in seconds",
                ));
                None
            }),
            (None, None) => {
                violations.push(ConfigViolation::new(
                    "deadline",
                    "No deadline configured",
                    "Set deadline (RFC 3339) or deadline_unix_secs",
                ));
                None
            }
        };

        let threshold = match (&self.threshold, self.threshold_raw) {
            (Some(s), _) => match parse_fixed(s, price_decimals) {
                Ok(v) => Some(v),
                Err(reason) => {
                    violations.push(ConfigViolation::new(
                        "threshold",
                        format!("'{}' {}", s, reason),
                        "Give a decimal price with at most price_decimals fractional digits",
                    ));
                    None
                }
            },
            (None, Some(raw)) => Some(raw as Price),
            (None, None) => {
                violations.push(ConfigViolation::new(
                    "threshold",
                    "No threshold configured",
                    "Set threshold (decimal string) or threshold_raw",
                ));
                None
            }
        };

        let capacity_a = required(self.capacity_a, "capacity_a", &mut violations);
        let capacity_b = required(self.capacity_b, "capacity_b", &mut violations);
        let escrow_account = required(self.escrow_account, "escrow_account", &mut violations);
        let asset_a = required(self.asset_a, "asset_a", &mut violations);
        let asset_b = required(self.asset_b, "asset_b", &mut violations);

        let (
            Some(deadline),
            Some(threshold),
            Some(capacity_a),
            Some(capacity_b),
            Some(escrow_account),
            Some(asset_a),
            Some(asset_b),
        ) = (
            deadline,
            threshold,
            capacity_a,
            capacity_b,
            escrow_account,
            asset_a,
            asset_b,
        )
        else {
            return Err(ConfigError::Invalid(violations));
        };

        let config = EscrowConfig {
            escrow_account: AccountId::new(escrow_account),
            asset_a: AssetId::new(asset_a),
            asset_b: AssetId::new(asset_b),
            capacity_a,
            capacity_b,
            deadline,
            threshold,
            price_decimals,
        };

        violations.extend(config.validate());
        if violations.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(violations))
        }
    }
}

fn required<T>(value: Option<T>, field: &str, violations: &mut Vec<ConfigViolation>) -> Option<T> {
    if value.is_none() {
        violations.push(ConfigViolation::new(
            field,
            "Missing required field",
            "Add it to the config file or set the ESCROW_* override",
        ));
    }
    value
}

// =============================================================================
// FIXED-POINT HELPERS
// =============================================================================

/// Parse a decimal string into fixed-point units with `decimals` places.
///
/// Rejects extra fractional digits rather than rounding them away.
pub fn parse_fixed(s: &str, decimals: u8) -> Result<Price, String> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err("is not a number".to_string());
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err("is not a number".to_string());
    }
    if frac_part.len() > decimals as usize {
        return Err(format!("has more than {} fractional digits", decimals));
    }

    let scale = 10i128
        .checked_pow(decimals as u32)
        .ok_or_else(|| "overflows at this precision".to_string())?;
    let int_value: i128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| "is out of range".to_string())?
    };
    let frac_scale = 10i128.pow((decimals as usize - frac_part.len()) as u32);
    let frac_value: i128 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse::<i128>().map_err(|_| "is out of range".to_string())? * frac_scale
    };

    let magnitude = int_value
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_value))
        .ok_or_else(|| "is out of range".to_string())?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Render fixed-point units as a decimal string.
pub fn format_fixed(value: Price, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }
    let scale = 10u128.pow(decimals.min(MAX_PRICE_DECIMALS) as u32);
    let magnitude = value.unsigned_abs();
    let sign = if value < 0 { "-" } else { "" };
    format!(
        "{}{}.{:0width$}",
        sign,
        magnitude / scale,
        magnitude % scale,
        width = decimals as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        escrow_account = "escrow"
        asset_a = "WETH"
        asset_b = "USDC"
        capacity_a = 1000000
        capacity_b = 2000000
        deadline = "2025-06-30T00:00:00Z"
        threshold = "2000.5"
        price_decimals = 8
    "#;

    #[test]
    fn test_parse_sample_config() {
        let config = EscrowConfigFile::from_toml_str(SAMPLE)
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(config.threshold, 200_050_000_000);
        assert_eq!(config.deadline, 1_751_241_600 * NANOS_PER_SEC);
        assert_eq!(config.capacity_b, 2_000_000);
        assert!(config.validate().is_empty());
        assert!(config.summary().contains("2000.50000000"));
    }

    #[test]
    fn test_missing_fields_reported_together() {
        let err = EscrowConfigFile::default().into_config().unwrap_err();
        let ConfigError::Invalid(violations) = err else {
            panic!("expected Invalid");
        };
        for field in ["deadline", "threshold", "capacity_a", "capacity_b", "escrow_account", "asset_a", "asset_b"] {
            assert!(
                violations.iter().any(|v| v.field == field),
                "missing violation for {}",
                field
            );
        }
    }

    #[test]
    fn test_same_asset_rejected() {
        let mut file = EscrowConfigFile::from_toml_str(SAMPLE).unwrap();
        file.asset_b = Some("WETH".to_string());
        let err = file.into_config().unwrap_err();
        assert!(err.to_string().contains("Both pools use asset 'WETH'"));
    }

    #[test]
    fn test_env_overrides_win() {
        let mut file = EscrowConfigFile::from_toml_str(SAMPLE).unwrap();
        file.apply_overrides(|key| match key {
            "ESCROW_THRESHOLD" => Some("1999".to_string()),
            "ESCROW_CAPACITY_A" => Some("5".to_string()),
            "ESCROW_DEADLINE" => Some("2030-01-01T00:00:00Z".to_string()),
            _ => None,
        });
        let config = file.into_config().unwrap();
        assert_eq!(config.threshold, 199_900_000_000);
        assert_eq!(config.capacity_a, 5);
        assert_eq!(config.deadline, parse_timestamp("2030-01-01T00:00:00Z").unwrap());
    }

    #[test]
    fn test_unparsable_override_is_reported() {
        let mut file = EscrowConfigFile::from_toml_str(SAMPLE).unwrap();
        file.apply_overrides(|key| match key {
            "ESCROW_CAPACITY_A" => Some("1e3".to_string()),
            "ESCROW_PRICE_DECIMALS" => Some("eight".to_string()),
            _ => None,
        });
        // File value is kept, but the run must not silently use it
        assert_eq!(file.capacity_a, Some(1_000_000));

        let err = file.into_config().unwrap_err();
        let ConfigError::Invalid(violations) = err else {
            panic!("expected Invalid");
        };
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["ESCROW_CAPACITY_A", "ESCROW_PRICE_DECIMALS"]);
        assert!(violations[0].description.contains("'1e3'"));
    }

    #[test]
    fn test_raw_threshold_and_unix_deadline() {
        let file = EscrowConfigFile {
            escrow_account: Some("escrow".into()),
            asset_a: Some("A".into()),
            asset_b: Some("B".into()),
            capacity_a: Some(10),
            capacity_b: Some(10),
            deadline_unix_secs: Some(100),
            threshold_raw: Some(-42),
            price_decimals: Some(2),
            ..Default::default()
        };
        let config = file.into_config().unwrap();
        assert_eq!(config.threshold, -42);
        assert_eq!(config.deadline, 100 * NANOS_PER_SEC);
        assert_eq!(config.price_decimals, 2);
    }

    #[test]
    fn test_parse_fixed() {
        assert_eq!(parse_fixed("2000", 8), Ok(200_000_000_000));
        assert_eq!(parse_fixed("0.00000001", 8), Ok(1));
        assert_eq!(parse_fixed("-1.5", 2), Ok(-150));
        assert_eq!(parse_fixed(".5", 1), Ok(5));
        assert!(parse_fixed("1.123", 2).is_err());
        assert!(parse_fixed("abc", 8).is_err());
        assert!(parse_fixed("", 8).is_err());
        assert!(parse_fixed("1e5", 8).is_err());
    }

    #[test]
    fn test_format_fixed() {
        assert_eq!(format_fixed(200_050_000_000, 8), "2000.50000000");
        assert_eq!(format_fixed(-150, 2), "-1.50");
        assert_eq!(format_fixed(7, 0), "7");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("escrow.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = EscrowConfigFile::load(&path).unwrap().into_config().unwrap();
        assert_eq!(config.asset_a.as_str(), "WETH");

        let err = EscrowConfigFile::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}

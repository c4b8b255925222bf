//! # Bank configuration (`mock-bank.toml`)
//!
//! ```toml
//! reset_policy = "never"        # or "on_every_access" (demo reseed)
//! hash_iterations = 100000
//! transfer_fee_rate = 0.005
//! withdrawal_limit = 5000
//! currency = "€"
//! ```
//!
//! Every key is optional; a missing or empty file is the default configuration.

use anyhow::Context;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the account store treats its persisted snapshot on each access.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Load the persisted snapshot once (seeding it if absent) and keep it.
    #[default]
    Never,

    /// Discard every runtime edit and reseed from the default dataset on each
    /// access. Demo determinism only; never enable in a real deployment.
    OnEveryAccess,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BankConfig {
    pub reset_policy: ResetPolicy,

    /// PBKDF2 rounds for newly hashed codes. Existing hashes carry their own count.
    pub hash_iterations: u32,

    /// Fee charged on outgoing transfers, as a fraction of the amount
    pub transfer_fee_rate: Decimal,

    /// Maximum amount per cash withdrawal
    pub withdrawal_limit: Decimal,

    pub currency: String,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            reset_policy: ResetPolicy::Never,
            hash_iterations: 100_000,
            transfer_fee_rate: dec!(0.005),
            withdrawal_limit: dec!(5000),
            currency: "€".to_string(),
        }
    }
}

impl BankConfig {
    pub fn filename() -> &'static str {
        "mock-bank.toml"
    }

    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).with_context(|| "Invalid bank configuration")
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string(self).with_context(|| "Unable to serialize bank configuration")
    }

    /// Load from `path`, falling back to the defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn with_reset_policy(self, reset_policy: ResetPolicy) -> Self {
        Self {
            reset_policy,
            ..self
        }
    }

    pub fn with_hash_iterations(self, hash_iterations: u32) -> Self {
        Self {
            hash_iterations,
            ..self
        }
    }
}

//! # Economy Configuration
//!
//! Prices, opening balances and pack odds come from a TOML file, never from
//! code. Every key is optional; missing keys take the defaults below.
//!
//! ```toml
//! pack_price = 100
//! starting_balance = 100
//! max_serial_attempts = 5
//!
//! [distribution]
//! guaranteed = [
//!     { tier = "Common", count = 6 },
//!     { tier = "Uncommon", count = 3 },
//!     { tier = "Rare", count = 1 },
//! ]
//! bonus = [
//!     { tier = "SecretRare", chance_bp = 200 },
//!     { tier = "UltraRare", chance_bp = 800 },
//! ]
//!
//! [rate_limit]
//! max_requests = 10
//! window_secs = 3600
//! ```

use booster_shared::{Coins, DEFAULT_PACK_PRICE, DEFAULT_STARTING_BALANCE};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::collection::DEFAULT_MAX_SERIAL_ATTEMPTS;
use crate::distribution::RarityDistributionTable;
use crate::error::{EconomyError, EconomyResult};
use crate::rate_limit::RateLimitConfig;

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Coins charged per pack.
    pub pack_price: Coins,
    /// Balance of a newly opened account.
    pub starting_balance: Coins,
    /// Serials tried per card before a grant fails.
    pub max_serial_attempts: u32,
    /// Pack contents.
    pub distribution: RarityDistributionTable,
    /// Purchase quota.
    pub rate_limit: RateLimitConfig,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            pack_price: DEFAULT_PACK_PRICE,
            starting_balance: DEFAULT_STARTING_BALANCE,
            max_serial_attempts: DEFAULT_MAX_SERIAL_ATTEMPTS,
            distribution: RarityDistributionTable::standard(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl EconomyConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for malformed TOML or values that fail
    /// [`Self::validate`].
    pub fn from_toml_str(source: &str) -> EconomyResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| EconomyError::InvalidConfig(format!("failed to parse config TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> EconomyResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| EconomyError::InvalidConfig(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Checks values that deserialize fine but make no sense.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero price, zero serial attempts, or an
    /// invalid distribution table.
    pub fn validate(&self) -> EconomyResult<()> {
        if self.pack_price == 0 {
            return Err(EconomyError::InvalidConfig("pack_price must be positive".to_string()));
        }
        if self.max_serial_attempts == 0 {
            return Err(EconomyError::InvalidConfig("max_serial_attempts must be at least 1".to_string()));
        }
        self.distribution.validate()
    }
}

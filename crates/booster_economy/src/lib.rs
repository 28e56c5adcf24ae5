//! # Booster Economy
//!
//! Pure Rust logic for buying and opening booster packs.
//!
//! ## Design Principles
//!
//! 1. **No partial purchases** - money lost implies cards gained and the reverse
//! 2. **Integer money** - balances are `u64` coins, probabilities are basis points
//! 3. **Injected randomness** - every sampler takes its RNG, tests seed it
//! 4. **External configuration** - prices and odds live in TOML files
//!
//! ## Layout
//!
//! ```text
//! distribution ─> generator ─┐
//! pool ──────────────────────┤
//! ledger ────────────────────┼─> engine
//! catalog ─> collection ─────┤
//!            stats ──────────┤
//! journal, rate_limit ───────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use booster_economy::{BoosterEngine, EconomyConfig, EconomyLedger, InMemoryCardPool, InMemoryCatalog};
//!
//! let config = EconomyConfig::load("config/booster_economy.toml")?;
//! let engine = BoosterEngine::new(config, ledger, pool, catalog, server_seed)?;
//!
//! engine.open_account(user)?;
//! let receipt = engine.open_booster(user)?;
//! println!("{} cards, {} coins left", receipt.cards.len(), receipt.new_balance);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod catalog;
pub mod collection;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod generator;
pub mod journal;
pub mod ledger;
pub mod pool;
pub mod rate_limit;
pub mod stats;
pub mod validation;

pub use catalog::{CardCatalogStore, InMemoryCatalog};
pub use collection::CollectionStore;
pub use config::EconomyConfig;
pub use distribution::{BoosterOdds, BonusThreshold, GuaranteedSlot, RarityDistributionTable, TierOdds};
pub use engine::{BoosterEngine, PurchaseReceipt, RecoverySummary};
pub use error::{CatalogError, EconomyError, EconomyResult, Rejection, ValidationError};
pub use generator::{BoosterGenerator, PackStatistics};
pub use journal::{PendingPurchase, PurchaseJournal, RecoveryReport};
pub use ledger::{EconomyLedger, UserAccountProvider};
pub use pool::{CardPoolProvider, InMemoryCardPool};
pub use rate_limit::{InMemoryRateLimitStore, RateLimitConfig, RateLimitStore, RateLimiter};
pub use stats::{CollectionProgress, CollectionStats, DuplicateEntry, HistoryDay, StatsAggregator};
pub use validation::validate_template;

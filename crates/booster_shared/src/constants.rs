//! # Economy Constants
//!
//! Defaults for the booster economy. Every value here can be overridden by
//! the engine configuration; these are only the fallbacks.

// =============================================================================
// CURRENCY
// =============================================================================

/// In-game currency amount. Unsigned, so a balance can never be negative.
pub type Coins = u64;

/// Default price of one booster pack.
pub const DEFAULT_PACK_PRICE: Coins = 100;

/// Balance granted when an account is opened.
pub const DEFAULT_STARTING_BALANCE: Coins = 100;

// =============================================================================
// PROBABILITIES
// =============================================================================

/// Probability scale used by the distribution table (10000 = 100%).
pub const BASIS_POINTS: u32 = 10_000;

// =============================================================================
// TIME
// =============================================================================

/// Milliseconds in one UTC day (history grouping).
pub const MS_PER_DAY: u64 = 86_400_000;

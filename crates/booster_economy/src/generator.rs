//! # Booster Generator
//!
//! Turns a [`RarityDistributionTable`] and a card pool into the ordered list
//! of templates for one pack.
//!
//! ## Algorithm
//!
//! ```text
//! for (tier, count) in guaranteed slots:
//!     candidates = pool.find_by_rarity(tier)
//!     candidates empty -> PoolExhausted(tier), whole pack aborts
//!     draw `count` uniformly, with replacement
//! bonus = table.bonus_draw(rng)
//! bonus tier with a non-empty pool -> append one uniform draw
//! ```
//!
//! A missing bonus pool is not an error: the pack simply has no bonus card.
//! Pack length is always `guaranteed_total()` or `guaranteed_total() + 1`.
//!
//! The generator is pure with respect to shared state. The random source is
//! always passed in, so tests can seed it.

use booster_shared::{CardTemplate, RarityTier};
use rand::Rng;
use std::collections::BTreeMap;
use tracing::debug;

use crate::distribution::RarityDistributionTable;
use crate::error::{EconomyError, EconomyResult};
use crate::pool::CardPoolProvider;

/// Samples booster packs from a pool.
#[derive(Clone, Debug, Default)]
pub struct BoosterGenerator {
    table: RarityDistributionTable,
}

impl BoosterGenerator {
    /// Creates a generator for a distribution table.
    #[must_use]
    pub const fn new(table: RarityDistributionTable) -> Self {
        Self { table }
    }

    /// The distribution this generator samples from.
    #[must_use]
    pub const fn table(&self) -> &RarityDistributionTable {
        &self.table
    }

    /// Verifies every guaranteed tier has at least one template.
    ///
    /// # Errors
    ///
    /// Returns `PoolExhausted` for the first empty guaranteed tier.
    pub fn check_pool<P>(&self, pool: &P) -> EconomyResult<()>
    where
        P: CardPoolProvider + ?Sized,
    {
        for slot in self.table.guaranteed_slots() {
            if pool.find_by_rarity(slot.tier)?.is_empty() {
                return Err(EconomyError::PoolExhausted(slot.tier));
            }
        }
        Ok(())
    }

    /// Generates the contents of one pack.
    ///
    /// # Errors
    ///
    /// Returns `PoolExhausted` if a guaranteed tier has no templates, or any
    /// error the pool reports.
    pub fn open_pack<P, R>(&self, pool: &P, rng: &mut R) -> EconomyResult<Vec<CardTemplate>>
    where
        P: CardPoolProvider + ?Sized,
        R: Rng,
    {
        let mut pack = Vec::with_capacity(self.table.max_pack_size());

        for slot in self.table.guaranteed_slots() {
            let candidates = pool.find_by_rarity(slot.tier)?;
            if candidates.is_empty() {
                return Err(EconomyError::PoolExhausted(slot.tier));
            }
            for _ in 0..slot.count {
                pack.push(pick(&candidates, rng).clone());
            }
        }

        let unit: f64 = rng.gen();
        if let Some(tier) = self.table.bonus_draw(unit) {
            let candidates = pool.find_by_rarity(tier)?;
            if candidates.is_empty() {
                debug!(%tier, "bonus tier drawn but pool is empty");
            } else {
                pack.push(pick(&candidates, rng).clone());
                debug!(%tier, "bonus card added");
            }
        }

        Ok(pack)
    }

    /// Opens `count` packs and tallies the rarities.
    ///
    /// Nothing is granted or charged.
    ///
    /// # Errors
    ///
    /// Propagates the first `open_pack` failure.
    pub fn simulate<P, R>(&self, pool: &P, rng: &mut R, count: u32) -> EconomyResult<PackStatistics>
    where
        P: CardPoolProvider + ?Sized,
        R: Rng,
    {
        let guaranteed = self.table.guaranteed_total();
        let mut stats = PackStatistics::default();

        for _ in 0..count {
            let pack = self.open_pack(pool, rng)?;
            stats.packs += 1;
            stats.cards += pack.len() as u64;
            for card in &pack {
                *stats.cards_by_rarity.entry(card.rarity).or_insert(0) += 1;
            }
            if pack.len() > guaranteed {
                if let Some(bonus) = pack.last() {
                    *stats.bonus_by_rarity.entry(bonus.rarity).or_insert(0) += 1;
                }
            }
        }

        Ok(stats)
    }
}

/// Uniform pick from a non-empty slice.
fn pick<'a, R: Rng>(candidates: &'a [CardTemplate], rng: &mut R) -> &'a CardTemplate {
    &candidates[rng.gen_range(0..candidates.len())]
}

/// Tallies from a pack simulation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackStatistics {
    /// Packs opened.
    pub packs: u64,
    /// Cards across all packs.
    pub cards: u64,
    /// Cards per tier.
    pub cards_by_rarity: BTreeMap<RarityTier, u64>,
    /// Bonus cards per tier.
    pub bonus_by_rarity: BTreeMap<RarityTier, u64>,
}

impl PackStatistics {
    /// Share of packs whose bonus card was `tier`, as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bonus_rate_percent(&self, tier: RarityTier) -> f64 {
        if self.packs == 0 {
            return 0.0;
        }
        let hits = self.bonus_by_rarity.get(&tier).copied().unwrap_or(0);
        (hits as f64 / self.packs as f64) * 100.0
    }
}

//! # Rarity Distribution Table
//!
//! **Guaranteed baseline + one bonus draw**
//!
//! Every pack contains a fixed number of cards per guaranteed tier
//! (standard: 6 Common, 3 Uncommon, 1 Rare). On top of that, a single bonus
//! draw may add one more card of a rarer tier.
//!
//! ## Bonus Draw Semantics
//!
//! The bonus draw compares one uniform roll against the configured
//! thresholds **rarest tier first**:
//!
//! ```text
//! roll < SecretRare (2%)  -> SecretRare
//! roll < UltraRare  (8%)  -> UltraRare
//! otherwise               -> no bonus card
//! ```
//!
//! Thresholds are cumulative, not disjoint. The effective UltraRare
//! probability is the interval between the two thresholds (8% - 2% = 6%),
//! not the configured 8%. [`RarityDistributionTable::effective_bonus_bp`]
//! reports the effective figures and the odds endpoint shows both.
//!
//! All probabilities are integer basis points (10000 = 100%).

use booster_shared::{RarityTier, BASIS_POINTS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EconomyError, EconomyResult};

/// A guaranteed `(tier, count)` slot in every pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuaranteedSlot {
    /// Tier to draw from.
    pub tier: RarityTier,
    /// Cards drawn from that tier.
    pub count: u32,
}

/// A bonus threshold checked by the bonus draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusThreshold {
    /// Tier awarded when the roll falls below the threshold.
    pub tier: RarityTier,
    /// Threshold in basis points.
    pub chance_bp: u32,
}

/// Raw table layout as written in TOML.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct TableRepr {
    #[serde(default)]
    guaranteed: Vec<GuaranteedSlot>,
    #[serde(default)]
    bonus: Vec<BonusThreshold>,
}

/// Static description of a booster pack's contents.
///
/// Bonus thresholds are kept sorted rarest tier first; every constructor
/// (including deserialization) enforces that order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TableRepr", into = "TableRepr")]
pub struct RarityDistributionTable {
    guaranteed: Vec<GuaranteedSlot>,
    bonus: Vec<BonusThreshold>,
}

impl From<TableRepr> for RarityDistributionTable {
    fn from(repr: TableRepr) -> Self {
        Self::new(repr.guaranteed, repr.bonus)
    }
}

impl From<RarityDistributionTable> for TableRepr {
    fn from(table: RarityDistributionTable) -> Self {
        Self {
            guaranteed: table.guaranteed,
            bonus: table.bonus,
        }
    }
}

impl RarityDistributionTable {
    /// Creates a table, ordering bonus thresholds rarest first.
    #[must_use]
    pub fn new(guaranteed: Vec<GuaranteedSlot>, mut bonus: Vec<BonusThreshold>) -> Self {
        bonus.sort_by(|a, b| b.tier.cmp(&a.tier));
        Self { guaranteed, bonus }
    }

    /// The standard pack: 6 Common, 3 Uncommon, 1 Rare, then
    /// SecretRare below 2% or UltraRare below 8%.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(
            vec![
                GuaranteedSlot { tier: RarityTier::Common, count: 6 },
                GuaranteedSlot { tier: RarityTier::Uncommon, count: 3 },
                GuaranteedSlot { tier: RarityTier::Rare, count: 1 },
            ],
            vec![
                BonusThreshold { tier: RarityTier::UltraRare, chance_bp: 800 },
                BonusThreshold { tier: RarityTier::SecretRare, chance_bp: 200 },
            ],
        )
    }

    /// The deterministic baseline, in pack order.
    #[must_use]
    pub fn guaranteed_slots(&self) -> &[GuaranteedSlot] {
        &self.guaranteed
    }

    /// Bonus thresholds, rarest first.
    #[must_use]
    pub fn bonus_thresholds(&self) -> &[BonusThreshold] {
        &self.bonus
    }

    /// Number of guaranteed cards per pack.
    #[must_use]
    pub fn guaranteed_total(&self) -> usize {
        self.guaranteed.iter().map(|s| s.count as usize).sum()
    }

    /// Largest possible pack (baseline plus one bonus card).
    #[must_use]
    pub fn max_pack_size(&self) -> usize {
        self.guaranteed_total() + usize::from(!self.bonus.is_empty())
    }

    /// Evaluates one bonus draw from a uniform value in `[0, 1)`.
    ///
    /// The value is compared against each threshold as a fraction, not
    /// rounded to basis points first. NaN never wins a tier.
    #[must_use]
    pub fn bonus_draw(&self, unit: f64) -> Option<RarityTier> {
        self.bonus
            .iter()
            .find(|threshold| unit < f64::from(threshold.chance_bp) / f64::from(BASIS_POINTS))
            .map(|threshold| threshold.tier)
    }

    /// Evaluates one bonus draw from a roll in `[0, BASIS_POINTS)`.
    #[must_use]
    pub fn bonus_draw_bp(&self, roll_bp: u32) -> Option<RarityTier> {
        self.bonus
            .iter()
            .find(|threshold| roll_bp < threshold.chance_bp)
            .map(|threshold| threshold.tier)
    }

    /// Probability each bonus tier is actually awarded, in basis points.
    ///
    /// A tier only wins the part of its threshold not already claimed by a
    /// rarer tier, so the result is the interval between thresholds.
    #[must_use]
    pub fn effective_bonus_bp(&self) -> Vec<(RarityTier, u32)> {
        let mut claimed = 0u32;
        self.bonus
            .iter()
            .map(|threshold| {
                let capped = threshold.chance_bp.min(BASIS_POINTS);
                let effective = capped.saturating_sub(claimed);
                claimed = claimed.max(capped);
                (threshold.tier, effective)
            })
            .collect()
    }

    /// Read-only odds per tier for display.
    #[must_use]
    pub fn odds(&self) -> BoosterOdds {
        let mut tiers: BTreeMap<RarityTier, TierOdds> = BTreeMap::new();

        for slot in &self.guaranteed {
            tiers.entry(slot.tier).or_default().guaranteed += slot.count;
        }
        for threshold in &self.bonus {
            tiers.entry(threshold.tier).or_default().bonus_chance_bp = threshold.chance_bp;
        }
        for (tier, effective) in self.effective_bonus_bp() {
            tiers.entry(tier).or_default().effective_bonus_bp = effective;
        }

        BoosterOdds { tiers }
    }

    /// Checks the table for configuration mistakes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty baseline, a zero-count slot, a
    /// tier listed twice, or a threshold above 100%.
    pub fn validate(&self) -> EconomyResult<()> {
        if self.guaranteed.is_empty() {
            return Err(EconomyError::InvalidConfig(
                "distribution needs at least one guaranteed slot".to_string(),
            ));
        }

        let mut seen = Vec::with_capacity(self.guaranteed.len());
        for slot in &self.guaranteed {
            if slot.count == 0 {
                return Err(EconomyError::InvalidConfig(format!(
                    "guaranteed slot for {} has count 0",
                    slot.tier
                )));
            }
            if seen.contains(&slot.tier) {
                return Err(EconomyError::InvalidConfig(format!(
                    "tier {} listed twice in guaranteed slots",
                    slot.tier
                )));
            }
            seen.push(slot.tier);
        }

        let mut seen_bonus = Vec::with_capacity(self.bonus.len());
        for threshold in &self.bonus {
            if threshold.chance_bp > BASIS_POINTS {
                return Err(EconomyError::InvalidConfig(format!(
                    "bonus chance for {} is {} bp, above {BASIS_POINTS}",
                    threshold.tier, threshold.chance_bp
                )));
            }
            if seen_bonus.contains(&threshold.tier) {
                return Err(EconomyError::InvalidConfig(format!(
                    "tier {} listed twice in bonus thresholds",
                    threshold.tier
                )));
            }
            seen_bonus.push(threshold.tier);
        }

        Ok(())
    }
}

impl Default for RarityDistributionTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Odds for one tier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TierOdds {
    /// Cards guaranteed per pack.
    pub guaranteed: u32,
    /// Configured bonus threshold (bp).
    pub bonus_chance_bp: u32,
    /// Probability the bonus draw actually yields this tier (bp).
    pub effective_bonus_bp: u32,
}

impl fmt::Display for TierOdds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.guaranteed > 0 {
            let noun = if self.guaranteed == 1 { "card" } else { "cards" };
            write!(f, "100% ({} {noun})", self.guaranteed)?;
            if self.bonus_chance_bp > 0 {
                f.write_str(" + ")?;
            }
        }
        if self.bonus_chance_bp > 0 {
            write!(f, "{}", format_bp(self.bonus_chance_bp))?;
            if self.effective_bonus_bp != self.bonus_chance_bp {
                write!(f, " ({} effective)", format_bp(self.effective_bonus_bp))?;
            }
        }
        Ok(())
    }
}

/// Odds of every tier in a pack, rarity-ordered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BoosterOdds {
    /// Odds keyed by tier.
    pub tiers: BTreeMap<RarityTier, TierOdds>,
}

impl BoosterOdds {
    /// Odds for a tier, if it appears in packs at all.
    #[must_use]
    pub fn get(&self, tier: RarityTier) -> Option<&TierOdds> {
        self.tiers.get(&tier)
    }

    /// Human-readable odds per tier label.
    #[must_use]
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        self.tiers
            .iter()
            .map(|(tier, odds)| (tier.label(), odds.to_string()))
            .collect()
    }
}

/// Formats basis points as a percentage ("8%", "2.5%").
#[must_use]
pub fn format_bp(bp: u32) -> String {
    let whole = bp / 100;
    let frac = bp % 100;
    if frac == 0 {
        format!("{whole}%")
    } else {
        let digits = format!("{frac:02}");
        format!("{whole}.{}%", digits.trim_end_matches('0'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_guaranteed_total() {
        let table = RarityDistributionTable::standard();
        assert_eq!(table.guaranteed_total(), 10);
        assert_eq!(table.max_pack_size(), 11);
    }

    #[test]
    fn test_bonus_checked_rarest_first() {
        let table = RarityDistributionTable::standard();
        assert_eq!(table.bonus_thresholds()[0].tier, RarityTier::SecretRare);

        assert_eq!(table.bonus_draw(0.0), Some(RarityTier::SecretRare));
        assert_eq!(table.bonus_draw(0.0199), Some(RarityTier::SecretRare));
        assert_eq!(table.bonus_draw(0.02), Some(RarityTier::UltraRare));
        assert_eq!(table.bonus_draw(0.0799), Some(RarityTier::UltraRare));
        assert_eq!(table.bonus_draw(0.08), None);
        assert_eq!(table.bonus_draw(0.999), None);
    }

    #[test]
    fn test_bonus_draw_just_below_threshold() {
        let table = RarityDistributionTable::standard();
        let below_secret = f64::from_bits(0.02_f64.to_bits() - 1);
        let below_ultra = f64::from_bits(0.08_f64.to_bits() - 1);

        assert_eq!(table.bonus_draw(below_secret), Some(RarityTier::SecretRare));
        assert_eq!(table.bonus_draw(below_ultra), Some(RarityTier::UltraRare));
        assert_eq!(table.bonus_draw(f64::NAN), None);
    }

    #[test]
    fn test_effective_bonus_is_interval() {
        // Configured UltraRare 8% only wins the 2%..8% interval.
        let table = RarityDistributionTable::standard();
        assert_eq!(
            table.effective_bonus_bp(),
            vec![(RarityTier::SecretRare, 200), (RarityTier::UltraRare, 600)]
        );
    }

    #[test]
    fn test_effective_bonus_shadowed_tier() {
        // A rarer tier with a larger threshold leaves nothing for the next one.
        let table = RarityDistributionTable::new(
            vec![GuaranteedSlot { tier: RarityTier::Common, count: 1 }],
            vec![
                BonusThreshold { tier: RarityTier::SecretRare, chance_bp: 900 },
                BonusThreshold { tier: RarityTier::UltraRare, chance_bp: 500 },
            ],
        );
        assert_eq!(
            table.effective_bonus_bp(),
            vec![(RarityTier::SecretRare, 900), (RarityTier::UltraRare, 0)]
        );
    }

    #[test]
    fn test_odds_display() {
        let odds = RarityDistributionTable::standard().odds();
        assert_eq!(odds.get(RarityTier::Common).unwrap().to_string(), "100% (6 cards)");
        assert_eq!(odds.get(RarityTier::Rare).unwrap().to_string(), "100% (1 card)");
        assert_eq!(odds.get(RarityTier::SecretRare).unwrap().to_string(), "2%");
        assert_eq!(
            odds.get(RarityTier::UltraRare).unwrap().to_string(),
            "8% (6% effective)"
        );
    }

    #[test]
    fn test_format_bp() {
        assert_eq!(format_bp(800), "8%");
        assert_eq!(format_bp(250), "2.5%");
        assert_eq!(format_bp(5), "0.05%");
    }

    #[test]
    fn test_validate_rejects_bad_tables() {
        let empty = RarityDistributionTable::new(vec![], vec![]);
        assert!(empty.validate().is_err());

        let twice = RarityDistributionTable::new(
            vec![
                GuaranteedSlot { tier: RarityTier::Common, count: 1 },
                GuaranteedSlot { tier: RarityTier::Common, count: 2 },
            ],
            vec![],
        );
        assert!(twice.validate().is_err());

        let too_likely = RarityDistributionTable::new(
            vec![GuaranteedSlot { tier: RarityTier::Common, count: 1 }],
            vec![BonusThreshold { tier: RarityTier::Rare, chance_bp: 10_001 }],
        );
        assert!(too_likely.validate().is_err());

        assert!(RarityDistributionTable::standard().validate().is_ok());
    }

    #[test]
    fn test_toml_sorts_bonus() {
        let table: RarityDistributionTable = toml::from_str(
            r#"
            guaranteed = [{ tier = "Common", count = 4 }]
            bonus = [
                { tier = "UltraRare", chance_bp = 1000 },
                { tier = "SecretRare", chance_bp = 100 },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(table.guaranteed_total(), 4);
        assert_eq!(table.bonus_thresholds()[0].tier, RarityTier::SecretRare);
    }
}

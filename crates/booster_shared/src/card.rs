//! # Card Catalog Types
//!
//! A [`CardTemplate`] is a catalog entry. Templates are never handed to a
//! player directly: opening a pack samples templates from the pool and the
//! collection store mints a fresh owned instance for each of them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a catalog template.
pub type TemplateId = u32;

/// Rarity tier of a card.
///
/// The declaration order is the rarity order: sorting and stats grouping
/// rely on `Common < Uncommon < Rare < UltraRare < SecretRare`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RarityTier {
    /// Common - six per pack.
    Common = 0,
    /// Uncommon - three per pack.
    Uncommon = 1,
    /// Rare - one per pack.
    Rare = 2,
    /// Ultra Rare - bonus slot only.
    UltraRare = 3,
    /// Secret Rare - bonus slot only.
    SecretRare = 4,
}

impl RarityTier {
    /// All tiers, most common first.
    pub const ALL: [Self; 5] = [
        Self::Common,
        Self::Uncommon,
        Self::Rare,
        Self::UltraRare,
        Self::SecretRare,
    ];

    /// Display label used by the catalog ("Ultra Rare", ...).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Common => "Common",
            Self::Uncommon => "Uncommon",
            Self::Rare => "Rare",
            Self::UltraRare => "Ultra Rare",
            Self::SecretRare => "Secret Rare",
        }
    }

    /// Multiplier used by [`CardTemplate::estimated_value`].
    #[inline]
    #[must_use]
    pub const fn value_multiplier(self) -> u32 {
        match self {
            Self::Common => 1,
            Self::Uncommon => 2,
            Self::Rare => 5,
            Self::UltraRare => 10,
            Self::SecretRare => 20,
        }
    }

    /// Converts from u8, saturating at the rarest tier.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Common,
            1 => Self::Uncommon,
            2 => Self::Rare,
            3 => Self::UltraRare,
            _ => Self::SecretRare,
        }
    }
}

impl fmt::Display for RarityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Elemental type of a card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CardType {
    /// Fire.
    Fire,
    /// Water.
    Water,
    /// Grass.
    Grass,
    /// Electric.
    Electric,
    /// Psychic.
    Psychic,
    /// Fighting.
    Fighting,
    /// Normal.
    Normal,
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Energy symbol in an attack cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnergyType {
    /// Fire energy.
    Fire,
    /// Water energy.
    Water,
    /// Grass energy.
    Grass,
    /// Electric energy.
    Electric,
    /// Psychic energy.
    Psychic,
    /// Fighting energy.
    Fighting,
    /// Normal energy.
    Normal,
    /// Any energy.
    Colorless,
}

/// One attack printed on a card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attack {
    /// Attack name.
    pub name: String,
    /// Damage dealt.
    pub damage: u16,
    /// Energy required to use it.
    #[serde(default)]
    pub cost: Vec<EnergyType>,
}

impl Attack {
    /// Creates an attack with no energy cost.
    #[must_use]
    pub fn new(name: impl Into<String>, damage: u16) -> Self {
        Self {
            name: name.into(),
            damage,
            cost: Vec::new(),
        }
    }

    /// Sets the energy cost.
    #[must_use]
    pub fn with_cost(mut self, cost: Vec<EnergyType>) -> Self {
        self.cost = cost;
        self
    }
}

/// A catalog entry eligible for sampling into packs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardTemplate {
    /// Catalog identity.
    pub id: TemplateId,
    /// Card name.
    pub name: String,
    /// Elemental type.
    pub card_type: CardType,
    /// Rarity tier.
    pub rarity: RarityTier,
    /// Hit points.
    pub hp: u16,
    /// Attacks (at most four).
    #[serde(default)]
    pub attacks: Vec<Attack>,
    /// Type this card is weak against.
    #[serde(default)]
    pub weakness: Option<CardType>,
    /// Type this card resists.
    #[serde(default)]
    pub resistance: Option<CardType>,
    /// Energy needed to retreat.
    #[serde(default)]
    pub retreat_cost: u8,
    /// Artwork URL.
    #[serde(default)]
    pub image_url: Option<String>,
}

impl CardTemplate {
    /// Creates a bare template with no attacks or artwork.
    #[must_use]
    pub fn new(
        id: TemplateId,
        name: impl Into<String>,
        card_type: CardType,
        rarity: RarityTier,
        hp: u16,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            card_type,
            rarity,
            hp,
            attacks: Vec::new(),
            weakness: None,
            resistance: None,
            retreat_cost: 0,
            image_url: None,
        }
    }

    /// Adds an attack.
    #[must_use]
    pub fn with_attack(mut self, attack: Attack) -> Self {
        self.attacks.push(attack);
        self
    }

    /// Sets weakness and resistance.
    #[must_use]
    pub const fn with_matchups(mut self, weakness: Option<CardType>, resistance: Option<CardType>) -> Self {
        self.weakness = weakness;
        self.resistance = resistance;
        self
    }

    /// Sets the artwork URL.
    #[must_use]
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Sum of the damage of every attack.
    #[must_use]
    pub fn total_damage(&self) -> u32 {
        self.attacks.iter().map(|a| u32::from(a.damage)).sum()
    }

    /// Estimated trade value: rarity multiplier times hp in tens, rounded up.
    #[must_use]
    pub fn estimated_value(&self) -> u32 {
        self.rarity.value_multiplier() * u32::from(self.hp).div_ceil(10)
    }

    /// A card is powerful above 100 hp and 100 total attack damage.
    #[must_use]
    pub fn is_powerful(&self) -> bool {
        self.hp > 100 && self.total_damage() > 100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rarity_ordering() {
        let mut tiers = vec![
            RarityTier::SecretRare,
            RarityTier::Common,
            RarityTier::UltraRare,
            RarityTier::Rare,
            RarityTier::Uncommon,
        ];
        tiers.sort();
        assert_eq!(tiers, RarityTier::ALL.to_vec());
    }

    #[test]
    fn test_rarity_labels() {
        assert_eq!(RarityTier::UltraRare.to_string(), "Ultra Rare");
        assert_eq!(RarityTier::from_u8(200), RarityTier::SecretRare);
    }

    #[test]
    fn test_estimated_value_rounds_hp_up() {
        let card = CardTemplate::new(1, "Pikachu", CardType::Electric, RarityTier::Rare, 61);
        // 5 * ceil(61 / 10) = 5 * 7
        assert_eq!(card.estimated_value(), 35);
    }

    #[test]
    fn test_is_powerful() {
        let weak = CardTemplate::new(1, "Magikarp", CardType::Water, RarityTier::Common, 30)
            .with_attack(Attack::new("Splash", 0));
        let strong = CardTemplate::new(2, "Charizard", CardType::Fire, RarityTier::UltraRare, 120)
            .with_attack(Attack::new("Fire Spin", 100))
            .with_attack(Attack::new("Slash", 30));

        assert!(!weak.is_powerful());
        assert!(strong.is_powerful());
    }
}

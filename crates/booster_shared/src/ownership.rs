//! # Owned Card Instances
//!
//! An [`OwnedCardInstance`] is a copy of a catalog template bound to exactly
//! one user. Instances are created once and never mutated; the serial number
//! is globally unique and is never reused.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::card::{CardTemplate, CardType, RarityTier, TemplateId};

/// Player account identifier.
pub type UserId = u64;

/// Globally unique serial number of an owned instance.
///
/// Format: `{user}-{millis}-{disambiguator}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Builds a serial from its three components.
    #[must_use]
    pub fn compose(owner: UserId, millis: u64, disambiguator: &str) -> Self {
        Self(format!("{owner}-{millis}-{disambiguator}"))
    }

    /// Wraps an existing serial string (journal replay).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the serial as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the owning user back out of the serial.
    #[must_use]
    pub fn owner(&self) -> Option<UserId> {
        self.0.split('-').next()?.parse().ok()
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A uniquely serialized copy of a template owned by one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedCardInstance {
    /// Unique serial.
    pub serial: SerialNumber,
    /// Template this instance was minted from.
    pub template_id: TemplateId,
    /// Template name at mint time.
    pub name: String,
    /// Template rarity at mint time.
    pub rarity: RarityTier,
    /// Template type at mint time.
    pub card_type: CardType,
    /// Owning user.
    pub owner: UserId,
    /// Acquisition time, milliseconds since the Unix epoch.
    pub acquired_at_ms: u64,
}

impl OwnedCardInstance {
    /// Mints an instance of `template` for `owner`.
    #[must_use]
    pub fn mint(template: &CardTemplate, owner: UserId, serial: SerialNumber, acquired_at_ms: u64) -> Self {
        Self {
            serial,
            template_id: template.id,
            name: template.name.clone(),
            rarity: template.rarity,
            card_type: template.card_type,
            owner,
            acquired_at_ms,
        }
    }
}

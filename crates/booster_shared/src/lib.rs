//! # Booster Shared
//!
//! The card data model used across the booster economy.
//!
//! ## Layout
//!
//! - [`card`] - catalog templates, rarity tiers, card and energy types
//! - [`ownership`] - owned card instances and their serial numbers
//! - [`constants`] - economy defaults
//!
//! This crate must stay free of I/O and randomness so that every consumer
//! (engine, simulator, request layer) agrees on the same plain types.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod card;
pub mod constants;
pub mod ownership;

pub use card::{Attack, CardTemplate, CardType, EnergyType, RarityTier, TemplateId};
pub use constants::{
    Coins, BASIS_POINTS, DEFAULT_PACK_PRICE, DEFAULT_STARTING_BALANCE, MS_PER_DAY,
};
pub use ownership::{OwnedCardInstance, SerialNumber, UserId};

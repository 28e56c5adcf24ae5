//! # Instance Catalog
//!
//! Persistence boundary for owned card instances. Lookups go through an
//! explicit owner key; an account never holds references to its cards.

use booster_shared::{OwnedCardInstance, SerialNumber, UserId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::error::CatalogError;

/// Stores owned instances.
pub trait CardCatalogStore: Send + Sync {
    /// Persists a new instance.
    ///
    /// # Errors
    ///
    /// Returns `Collision` if the serial is already taken, `Unavailable` if
    /// the write could not complete.
    fn persist_instance(&self, instance: &OwnedCardInstance) -> Result<(), CatalogError>;

    /// Deletes an instance. Used only to compensate a failed purchase.
    ///
    /// Returns `true` if the instance existed.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the delete could not complete.
    fn remove_instance(&self, serial: &SerialNumber) -> Result<bool, CatalogError>;

    /// Every instance owned by `owner`, in acquisition order.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the read could not complete.
    fn instances_by_owner(&self, owner: UserId) -> Result<Vec<OwnedCardInstance>, CatalogError>;
}

#[derive(Debug, Default)]
struct CatalogState {
    instances: HashMap<SerialNumber, OwnedCardInstance>,
    by_owner: HashMap<UserId, Vec<SerialNumber>>,
    // Serials of removed instances stay reserved forever.
    retired: HashSet<SerialNumber>,
}

/// In-process catalog with a unique index on serial numbers.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of instances across all owners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().instances.len()
    }

    /// Whether the catalog holds no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().instances.is_empty()
    }

    /// Whether a serial has been issued and is still stored.
    #[must_use]
    pub fn contains(&self, serial: &SerialNumber) -> bool {
        self.state.read().instances.contains_key(serial)
    }
}

impl CardCatalogStore for InMemoryCatalog {
    fn persist_instance(&self, instance: &OwnedCardInstance) -> Result<(), CatalogError> {
        let mut state = self.state.write();
        if state.instances.contains_key(&instance.serial) || state.retired.contains(&instance.serial) {
            return Err(CatalogError::Collision(instance.serial.clone()));
        }

        state
            .by_owner
            .entry(instance.owner)
            .or_default()
            .push(instance.serial.clone());
        state.instances.insert(instance.serial.clone(), instance.clone());
        Ok(())
    }

    fn remove_instance(&self, serial: &SerialNumber) -> Result<bool, CatalogError> {
        let mut state = self.state.write();
        let Some(instance) = state.instances.remove(serial) else {
            return Ok(false);
        };

        if let Some(serials) = state.by_owner.get_mut(&instance.owner) {
            serials.retain(|s| s != serial);
        }
        state.retired.insert(instance.serial);
        Ok(true)
    }

    fn instances_by_owner(&self, owner: UserId) -> Result<Vec<OwnedCardInstance>, CatalogError> {
        let state = self.state.read();
        let Some(serials) = state.by_owner.get(&owner) else {
            return Ok(Vec::new());
        };

        Ok(serials
            .iter()
            .filter_map(|serial| state.instances.get(serial).cloned())
            .collect())
    }
}

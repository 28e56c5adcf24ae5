//! # Collection Store
//!
//! Mints [`OwnedCardInstance`]s from templates and writes them to a
//! [`CardCatalogStore`].
//!
//! ## Serial numbers
//!
//! ```text
//! {user}-{unix millis}-{7 base36 chars}
//! ```
//!
//! The random suffix makes collisions unlikely but not impossible. The
//! catalog is the authority: on `Collision` a fresh suffix is drawn, up to
//! `max_attempts` times. Collisions are never ignored and never overwrite.

use booster_shared::{CardTemplate, OwnedCardInstance, SerialNumber, UserId};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::catalog::CardCatalogStore;
use crate::error::{CatalogError, EconomyError, EconomyResult};

/// Length of the random serial suffix.
pub const SERIAL_SUFFIX_LEN: usize = 7;

/// Default number of serials tried before giving up.
pub const DEFAULT_MAX_SERIAL_ATTEMPTS: u32 = 5;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Current wall-clock time in unix milliseconds.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Grants and revokes owned card instances.
pub struct CollectionStore {
    catalog: Arc<dyn CardCatalogStore>,
    rng: Mutex<ChaCha8Rng>,
    max_attempts: u32,
}

impl CollectionStore {
    /// Creates a store over `catalog`.
    ///
    /// `seed` drives the serial suffixes only.
    #[must_use]
    pub fn new(catalog: Arc<dyn CardCatalogStore>, max_attempts: u32, seed: u64) -> Self {
        Self {
            catalog,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            max_attempts: max_attempts.max(1),
        }
    }

    /// The underlying catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn CardCatalogStore> {
        &self.catalog
    }

    /// Grants one instance of `template` to `user`, stamped now.
    ///
    /// # Errors
    ///
    /// See [`Self::grant_at`].
    pub fn grant(&self, user: UserId, template: &CardTemplate) -> EconomyResult<OwnedCardInstance> {
        self.grant_at(user, template, unix_millis())
    }

    /// Grants one instance with an explicit acquisition time.
    ///
    /// # Errors
    ///
    /// Returns `SerialCollision` when every attempt collided, or
    /// `PersistenceFailure` when the catalog is unavailable.
    pub fn grant_at(&self, user: UserId, template: &CardTemplate, now_ms: u64) -> EconomyResult<OwnedCardInstance> {
        for attempt in 1..=self.max_attempts {
            let serial = SerialNumber::compose(user, now_ms, &self.next_suffix());
            let instance = OwnedCardInstance::mint(template, user, serial, now_ms);

            match self.catalog.persist_instance(&instance) {
                Ok(()) => return Ok(instance),
                Err(CatalogError::Collision(serial)) => {
                    warn!(user, %serial, attempt, "serial collision, retrying");
                }
                Err(CatalogError::Unavailable(reason)) => {
                    return Err(EconomyError::PersistenceFailure(reason));
                }
            }
        }

        Err(EconomyError::SerialCollision { attempts: self.max_attempts })
    }

    /// Grants every template in order. All-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns the first grant failure after revoking the instances already
    /// granted by this call.
    pub fn grant_batch(
        &self,
        user: UserId,
        templates: &[CardTemplate],
        now_ms: u64,
    ) -> EconomyResult<Vec<OwnedCardInstance>> {
        self.grant_batch_with(user, templates, now_ms, |_| Ok(()))
    }

    /// Like [`Self::grant_batch`], calling `observe` after each persisted
    /// instance. An `observe` error aborts the batch the same way.
    ///
    /// # Errors
    ///
    /// Returns the first grant or `observe` failure.
    pub fn grant_batch_with<F>(
        &self,
        user: UserId,
        templates: &[CardTemplate],
        now_ms: u64,
        mut observe: F,
    ) -> EconomyResult<Vec<OwnedCardInstance>>
    where
        F: FnMut(&OwnedCardInstance) -> EconomyResult<()>,
    {
        let mut granted = Vec::with_capacity(templates.len());

        for template in templates {
            let result = match self.grant_at(user, template, now_ms) {
                Ok(instance) => {
                    let observed = observe(&instance);
                    // Persisted already, so it is revocable even if observe fails.
                    granted.push(instance);
                    observed
                }
                Err(err) => Err(err),
            };

            if let Err(err) = result {
                let serials: Vec<_> = granted.iter().map(|i| i.serial.clone()).collect();
                if let Err(revoke_err) = self.revoke_batch(&serials) {
                    warn!(user, error = %revoke_err, "partial grant could not be fully revoked");
                }
                return Err(err);
            }
        }

        Ok(granted)
    }

    /// Removes the given instances. Tries every serial even after a failure.
    ///
    /// Returns how many instances were actually removed.
    ///
    /// # Errors
    ///
    /// Returns the first catalog failure.
    pub fn revoke_batch(&self, serials: &[SerialNumber]) -> EconomyResult<usize> {
        let mut removed = 0;
        let mut first_error = None;

        for serial in serials {
            match self.catalog.remove_instance(serial) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    first_error.get_or_insert(EconomyError::from(err));
                }
            }
        }

        first_error.map_or(Ok(removed), Err)
    }

    /// Every instance `user` owns.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the catalog is unavailable.
    pub fn owned_by(&self, user: UserId) -> EconomyResult<Vec<OwnedCardInstance>> {
        Ok(self.catalog.instances_by_owner(user)?)
    }

    fn next_suffix(&self) -> String {
        let mut rng = self.rng.lock();
        (0..SERIAL_SUFFIX_LEN)
            .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
            .collect()
    }
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

//! # Card Pool
//!
//! The pool is the set of unowned catalog templates eligible for sampling.
//! The generator only ever reads it through [`CardPoolProvider`].

use booster_shared::{CardTemplate, RarityTier, TemplateId};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::error::{EconomyResult, ValidationError};
use crate::validation::validate_template;

/// Supplies pool templates by rarity tier.
pub trait CardPoolProvider: Send + Sync {
    /// All pool templates of `tier`. An empty list is not an error.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the backing store is unreachable.
    fn find_by_rarity(&self, tier: RarityTier) -> EconomyResult<Vec<CardTemplate>>;

    /// Number of templates in the pool, across all tiers.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the backing store is unreachable.
    fn catalog_size(&self) -> EconomyResult<usize>;
}

/// In-process pool keyed by template id.
#[derive(Debug, Default)]
pub struct InMemoryCardPool {
    templates: RwLock<BTreeMap<TemplateId, CardTemplate>>,
}

impl InMemoryCardPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a pool from templates, validating each one.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_templates(templates: impl IntoIterator<Item = CardTemplate>) -> Result<Self, ValidationError> {
        let pool = Self::new();
        for template in templates {
            pool.add_template(template)?;
        }
        Ok(pool)
    }

    /// Validates and adds a template to the pool.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for malformed data or a reused id.
    pub fn add_template(&self, template: CardTemplate) -> Result<(), ValidationError> {
        validate_template(&template)?;

        let mut templates = self.templates.write();
        if templates.contains_key(&template.id) {
            return Err(ValidationError::DuplicateTemplate(template.id));
        }
        templates.insert(template.id, template);
        Ok(())
    }

    /// Removes a template from the pool.
    pub fn remove_template(&self, id: TemplateId) -> Option<CardTemplate> {
        self.templates.write().remove(&id)
    }

    /// Looks up a template by id.
    #[must_use]
    pub fn get(&self, id: TemplateId) -> Option<CardTemplate> {
        self.templates.read().get(&id).cloned()
    }

    /// All templates, ordered by id.
    #[must_use]
    pub fn templates(&self) -> Vec<CardTemplate> {
        self.templates.read().values().cloned().collect()
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }
}

impl CardPoolProvider for InMemoryCardPool {
    fn find_by_rarity(&self, tier: RarityTier) -> EconomyResult<Vec<CardTemplate>> {
        Ok(self
            .templates
            .read()
            .values()
            .filter(|t| t.rarity == tier)
            .cloned()
            .collect())
    }

    fn catalog_size(&self) -> EconomyResult<usize> {
        Ok(self.len())
    }
}

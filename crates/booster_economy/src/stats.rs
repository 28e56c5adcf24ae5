//! # Collection Statistics
//!
//! [`CollectionStats`] is a pure function of a user's owned instances. The
//! aggregator keeps the last computed snapshot per user as a cache, but the
//! catalog is always the source of truth: [`StatsAggregator::recompute`]
//! rebuilds from scratch and is the repair path when the cache drifts.
//!
//! All maps are ordered, so two recomputes over the same ownership set
//! compare equal field by field.

use booster_shared::{
    CardType, OwnedCardInstance, RarityTier, TemplateId, UserId, BASIS_POINTS, MS_PER_DAY,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::catalog::CardCatalogStore;
use crate::error::EconomyResult;
use crate::pool::CardPoolProvider;

/// Number of days returned by the booster history by default.
pub const DEFAULT_HISTORY_DAYS: usize = 10;

/// A template owned more than once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DuplicateEntry {
    /// Template id.
    pub template_id: TemplateId,
    /// Template name at grant time.
    pub name: String,
    /// Number of owned instances.
    pub count: u32,
}

/// Derived view of one user's collection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    /// Owned instances.
    pub total_cards: u32,
    /// Distinct templates.
    pub unique_cards: u32,
    /// Instances per rarity tier.
    pub by_rarity: BTreeMap<RarityTier, u32>,
    /// Instances per card type.
    pub by_type: BTreeMap<CardType, u32>,
    /// Templates owned more than once, by template id.
    pub duplicates: Vec<DuplicateEntry>,
}

impl CollectionStats {
    /// Builds the statistics for a set of instances.
    #[must_use]
    pub fn from_instances(instances: &[OwnedCardInstance]) -> Self {
        let mut stats = Self::default();
        let mut per_template: BTreeMap<TemplateId, (&str, u32)> = BTreeMap::new();

        for instance in instances {
            stats.total_cards += 1;
            *stats.by_rarity.entry(instance.rarity).or_insert(0) += 1;
            *stats.by_type.entry(instance.card_type).or_insert(0) += 1;
            per_template
                .entry(instance.template_id)
                .or_insert((instance.name.as_str(), 0))
                .1 += 1;
        }

        stats.unique_cards = u32::try_from(per_template.len()).unwrap_or(u32::MAX);
        stats.duplicates = per_template
            .into_iter()
            .filter(|(_, (_, count))| *count > 1)
            .map(|(template_id, (name, count))| DuplicateEntry { template_id, name: name.to_string(), count })
            .collect();
        stats
    }

    /// Instances of `tier`.
    #[must_use]
    pub fn rarity_count(&self, tier: RarityTier) -> u32 {
        self.by_rarity.get(&tier).copied().unwrap_or(0)
    }
}

/// How much of the pool a user has collected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CollectionProgress {
    /// Distinct templates owned.
    pub owned_unique: u32,
    /// Templates in the pool.
    pub catalog_size: u32,
    /// `owned_unique / catalog_size` in basis points, 0 for an empty pool.
    pub completion_bp: u32,
}

/// Cards acquired on one UTC day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryDay {
    /// Days since the unix epoch.
    pub day: u64,
    /// Newest first.
    pub cards: Vec<OwnedCardInstance>,
}

/// Computes and caches collection statistics.
pub struct StatsAggregator {
    catalog: Arc<dyn CardCatalogStore>,
    snapshots: RwLock<HashMap<UserId, CollectionStats>>,
}

impl StatsAggregator {
    /// Creates an aggregator reading from `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<dyn CardCatalogStore>) -> Self {
        Self { catalog, snapshots: RwLock::new(HashMap::new()) }
    }

    /// Rebuilds the user's statistics from their owned instances and
    /// replaces the cached snapshot.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the catalog is unavailable. The cached
    /// snapshot is left untouched in that case.
    pub fn recompute(&self, user: UserId) -> EconomyResult<CollectionStats> {
        let instances = self.catalog.instances_by_owner(user)?;
        let stats = CollectionStats::from_instances(&instances);
        self.snapshots.write().insert(user, stats.clone());
        Ok(stats)
    }

    /// Last computed snapshot, if any.
    #[must_use]
    pub fn cached(&self, user: UserId) -> Option<CollectionStats> {
        self.snapshots.read().get(&user).cloned()
    }

    /// Share of the pool the user owns at least one instance of.
    ///
    /// Owned templates that have since left the pool are not counted.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the catalog or pool is unavailable.
    pub fn progress<P>(&self, user: UserId, pool: &P) -> EconomyResult<CollectionProgress>
    where
        P: CardPoolProvider + ?Sized,
    {
        let instances = self.catalog.instances_by_owner(user)?;
        let mut pool_ids = BTreeSet::new();
        for tier in RarityTier::ALL {
            pool_ids.extend(pool.find_by_rarity(tier)?.into_iter().map(|t| t.id));
        }

        let owned: BTreeSet<_> = instances
            .iter()
            .map(|i| i.template_id)
            .filter(|id| pool_ids.contains(id))
            .collect();
        let owned_unique = u32::try_from(owned.len()).unwrap_or(u32::MAX);
        let catalog_size = u32::try_from(pool.catalog_size()?).unwrap_or(u32::MAX);

        let completion_bp = if catalog_size == 0 {
            0
        } else {
            let bp = u64::from(owned_unique) * u64::from(BASIS_POINTS) / u64::from(catalog_size);
            u32::try_from(bp).unwrap_or(BASIS_POINTS).min(BASIS_POINTS)
        };

        Ok(CollectionProgress { owned_unique, catalog_size, completion_bp })
    }

    /// Owned instances grouped by UTC acquisition day, newest day first,
    /// at most `max_days` groups.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the catalog is unavailable.
    pub fn history(&self, user: UserId, max_days: usize) -> EconomyResult<Vec<HistoryDay>> {
        let mut instances = self.catalog.instances_by_owner(user)?;
        // Stable sort keeps grant order among equal timestamps, reversed below.
        instances.sort_by_key(|i| i.acquired_at_ms);
        instances.reverse();

        let mut days: Vec<HistoryDay> = Vec::new();
        for instance in instances {
            let day = instance.acquired_at_ms / MS_PER_DAY;
            match days.last_mut() {
                Some(group) if group.day == day => group.cards.push(instance),
                _ => {
                    if days.len() == max_days {
                        break;
                    }
                    days.push(HistoryDay { day, cards: vec![instance] });
                }
            }
        }
        Ok(days)
    }
}

impl std::fmt::Debug for StatsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsAggregator")
            .field("cached_users", &self.snapshots.read().len())
            .finish_non_exhaustive()
    }
}

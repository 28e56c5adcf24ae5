//! # Booster Engine
//!
//! **Money lost implies cards gained, cards gained implies money lost.**
//!
//! This module exposes the API the request layer calls. All purchases go
//! through [`BoosterEngine::open_booster`].
//!
//! ## The Purchase Path
//!
//! ```text
//! open_booster(user)
//!   │
//!   ├─ rate limiter            RateLimited        (nothing changed)
//!   ├─ per-user lock           overlapping requests of one user queue here
//!   ├─ affordability check     InsufficientFunds  (nothing changed)
//!   ├─ generate pack           PoolExhausted      (nothing changed)
//!   ├─ journal BEGIN
//!   ├─ ledger debit            InsufficientFunds  (journal ROLLBACK)
//!   ├─ journal DEBIT ─┐
//!   ├─ grant × N  ────┤ failure -> revoke grants, credit price back,
//!   ├─ journal COMMIT ┘            journal ROLLBACK, return error
//!   └─ recompute stats         failure only logged, the cache is repairable
//! ```
//!
//! The pack is generated before the debit, which doubles as the pool
//! availability check: a pool that cannot fill a pack never costs coins.
//!
//! If the refund itself fails, no ROLLBACK is written. The purchase stays
//! open in the journal, is queued for [`BoosterEngine::recover_pending`], and
//! the caller gets `RefundPending`.

use booster_shared::{CardTemplate, Coins, OwnedCardInstance, SerialNumber, UserId};
use parking_lot::Mutex;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::CardCatalogStore;
use crate::collection::{unix_millis, CollectionStore};
use crate::config::EconomyConfig;
use crate::distribution::BoosterOdds;
use crate::error::{EconomyError, EconomyResult};
use crate::generator::{BoosterGenerator, PackStatistics};
use crate::journal::{PendingPurchase, PurchaseId, PurchaseJournal};
use crate::ledger::UserAccountProvider;
use crate::pool::CardPoolProvider;
use crate::rate_limit::{RateLimitStore, RateLimiter};
use crate::stats::{CollectionProgress, CollectionStats, HistoryDay, StatsAggregator};

// ============================================================================
// Public Types
// ============================================================================

/// Result of a committed purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PurchaseReceipt {
    /// Granted instances, in pack order.
    pub cards: Vec<OwnedCardInstance>,
    /// Balance after the debit.
    pub new_balance: Coins,
}

/// Outcome of [`BoosterEngine::recover_pending`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Purchases compensated.
    pub purchases: u32,
    /// Coins credited back.
    pub refunded: Coins,
    /// Instances removed.
    pub revoked: usize,
}

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

// ============================================================================
// The Engine
// ============================================================================

/// The booster economy engine.
///
/// `BoosterEngine` is `Send + Sync`. Purchases of different users run in
/// parallel; purchases of the same user are serialized.
pub struct BoosterEngine {
    config: EconomyConfig,
    generator: BoosterGenerator,
    accounts: Arc<dyn UserAccountProvider>,
    pool: Arc<dyn CardPoolProvider>,
    collection: CollectionStore,
    stats: StatsAggregator,
    journal: Option<PurchaseJournal>,
    rate_limiter: Option<RateLimiter>,
    /// Seeds one sampling stream per pack.
    rng: Mutex<ChaCha20Rng>,
    user_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
    clock: Clock,
}

impl BoosterEngine {
    /// Creates an engine.
    ///
    /// # Arguments
    ///
    /// * `config` - prices and odds, validated here
    /// * `accounts` - balance store
    /// * `pool` - templates eligible for packs
    /// * `catalog` - owned instance store
    /// * `seed` - 32-byte seed for pack sampling and serial suffixes
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(
        config: EconomyConfig,
        accounts: Arc<dyn UserAccountProvider>,
        pool: Arc<dyn CardPoolProvider>,
        catalog: Arc<dyn CardCatalogStore>,
        seed: [u8; 32],
    ) -> EconomyResult<Self> {
        config.validate()?;

        let mut rng = ChaCha20Rng::from_seed(seed);
        let serial_seed = rng.next_u64();

        Ok(Self {
            generator: BoosterGenerator::new(config.distribution.clone()),
            collection: CollectionStore::new(Arc::clone(&catalog), config.max_serial_attempts, serial_seed),
            stats: StatsAggregator::new(catalog),
            config,
            accounts,
            pool,
            journal: None,
            rate_limiter: None,
            rng: Mutex::new(rng),
            user_locks: Mutex::new(HashMap::new()),
            clock: Box::new(unix_millis),
        })
    }

    /// Journals every purchase to `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: PurchaseJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Enforces the configured purchase quota, counting in `store`.
    #[must_use]
    pub fn with_rate_limit_store(mut self, store: Box<dyn RateLimitStore>) -> Self {
        self.rate_limiter = Some(RateLimiter::new(self.config.rate_limit, store));
        self
    }

    /// Replaces the wall clock (unix milliseconds).
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EconomyConfig {
        &self.config
    }

    // ========================================================================
    // Purchases
    // ========================================================================

    /// Buys and opens one booster pack for `user`.
    ///
    /// # Errors
    ///
    /// - `RateLimited`, `UnknownAccount`, `InsufficientFunds`, `PoolExhausted`:
    ///   rejected, no state changed
    /// - `SerialCollision`, `PersistenceFailure`: the debit was refunded and
    ///   every granted instance revoked before returning
    /// - `RefundPending`: the purchase failed and its compensation did not
    ///   complete; it stays open for [`Self::recover_pending`]
    pub fn open_booster(&self, user: UserId) -> EconomyResult<PurchaseReceipt> {
        self.purchase(user, || {
            // Only the seed draw is serialized across users.
            let mut seed = [0_u8; 32];
            self.rng.lock().fill_bytes(&mut seed);
            let mut rng = ChaCha20Rng::from_seed(seed);
            self.generator.open_pack(&*self.pool, &mut rng)
        })
    }

    /// Like [`Self::open_booster`], sampling from a caller-supplied source.
    ///
    /// # Errors
    ///
    /// Same as [`Self::open_booster`].
    pub fn open_booster_with_rng<R: Rng>(&self, user: UserId, rng: &mut R) -> EconomyResult<PurchaseReceipt> {
        self.purchase(user, || self.generator.open_pack(&*self.pool, rng))
    }

    fn purchase<F>(&self, user: UserId, generate: F) -> EconomyResult<PurchaseReceipt>
    where
        F: FnOnce() -> EconomyResult<Vec<CardTemplate>>,
    {
        let now = (self.clock)();
        if let Some(limiter) = &self.rate_limiter {
            limiter.check(user, now)?;
        }

        let lock = self.user_lock(user);
        let _serialized = lock.lock();

        let price = self.config.pack_price;
        let balance = self.accounts.get_balance(user)?;
        if balance < price {
            warn!(user, balance, price, "booster purchase rejected: insufficient funds");
            return Err(EconomyError::InsufficientFunds { user, balance, required: price });
        }

        let pack = match generate() {
            Ok(pack) => pack,
            Err(err) => {
                warn!(user, error = %err, "booster purchase rejected: pack generation failed");
                return Err(err);
            }
        };
        debug!(user, cards = pack.len(), "pack generated");

        let journal_id = match &self.journal {
            Some(journal) => Some(journal.begin(user, price)?),
            None => None,
        };

        let new_balance = match self.accounts.debit(user, price) {
            Ok(balance) => balance,
            Err(err) => return Err(self.compensate(user, journal_id, None, err)),
        };

        let granted = self.debit_and_grant(user, journal_id, price, &pack, now);
        let cards = match granted {
            Ok(cards) => cards,
            Err(err) => return Err(self.compensate(user, journal_id, Some(price), err)),
        };

        if let (Some(journal), Some(id)) = (&self.journal, journal_id) {
            if let Err(err) = journal.commit(id) {
                let serials: Vec<SerialNumber> = cards.iter().map(|c| c.serial.clone()).collect();
                if let Err(revoke_err) = self.collection.revoke_batch(&serials) {
                    warn!(user, error = %revoke_err, cause = %err, "failed to revoke grants of uncommitted purchase");
                    // Revocation and refund are left to recovery together.
                    self.defer_to_recovery(id, price);
                    return Err(EconomyError::RefundPending { user, amount: price });
                }
                return Err(self.compensate(user, journal_id, Some(price), err));
            }
        }

        if let Err(err) = self.stats.recompute(user) {
            warn!(user, error = %err, "collection stats recompute failed, cache is stale");
        }

        info!(user, cards = cards.len(), new_balance, "booster purchase committed");
        Ok(PurchaseReceipt { cards, new_balance })
    }

    /// Journals the debit, then grants the pack. Grants are all-or-nothing.
    fn debit_and_grant(
        &self,
        user: UserId,
        journal_id: Option<PurchaseId>,
        price: Coins,
        pack: &[CardTemplate],
        now: u64,
    ) -> EconomyResult<Vec<OwnedCardInstance>> {
        match (&self.journal, journal_id) {
            (Some(journal), Some(id)) => {
                journal.record_debit(id, price)?;
                self.collection
                    .grant_batch_with(user, pack, now, |instance| journal.record_grant(id, &instance.serial))
            }
            _ => self.collection.grant_batch(user, pack, now),
        }
    }

    /// Refunds `debited` and journals the rollback, returning the error to
    /// report.
    ///
    /// A refund that does not apply is never journaled as a rollback: the
    /// purchase stays open, is queued for [`Self::recover_pending`], and the
    /// caller sees `RefundPending`.
    fn compensate(
        &self,
        user: UserId,
        journal_id: Option<PurchaseId>,
        debited: Option<Coins>,
        cause: EconomyError,
    ) -> EconomyError {
        if let Some(amount) = debited {
            match self.accounts.credit(user, amount) {
                Ok(balance) => warn!(user, refunded = amount, balance, error = %cause, "booster purchase rolled back"),
                Err(err) => {
                    warn!(user, amount, error = %err, cause = %cause, "refund of failed purchase did not apply");
                    if let Some(id) = journal_id {
                        self.defer_to_recovery(id, amount);
                    }
                    return EconomyError::RefundPending { user, amount };
                }
            }
        }

        if let (Some(journal), Some(id)) = (&self.journal, journal_id) {
            if let Err(err) = journal.rollback(id) {
                warn!(user, purchase = id, error = %err, "failed to journal rollback");
            }
        }
        cause
    }

    /// Queues an open purchase for [`Self::recover_pending`], owing `amount`.
    fn defer_to_recovery(&self, id: PurchaseId, amount: Coins) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Some(mut pending) = journal.purchase(id) {
            pending.debited = Some(amount);
            warn!(user = pending.user, purchase = id, amount, "failed purchase queued for recovery");
            journal.requeue([pending]);
        }
    }

    fn user_lock(&self, user: UserId) -> Arc<Mutex<()>> {
        Arc::clone(self.user_locks.lock().entry(user).or_default())
    }

    // ========================================================================
    // Accounts
    // ========================================================================

    /// Opens an account with the configured starting balance. Returns
    /// `false` if it already existed.
    ///
    /// # Errors
    ///
    /// Propagates the account store's error.
    pub fn open_account(&self, user: UserId) -> EconomyResult<bool> {
        let created = self.accounts.open_account(user, self.config.starting_balance)?;
        if created {
            info!(user, balance = self.config.starting_balance, "account opened");
        }
        Ok(created)
    }

    /// Current balance.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAccount` for a user without an account.
    pub fn balance(&self, user: UserId) -> EconomyResult<Coins> {
        self.accounts.get_balance(user)
    }

    /// Adds coins to an account and returns the new balance.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAccount` or `ArithmeticOverflow`.
    pub fn credit(&self, user: UserId, amount: Coins) -> EconomyResult<Coins> {
        let balance = self.accounts.credit(user, amount)?;
        info!(user, amount, balance, "coins credited");
        Ok(balance)
    }

    // ========================================================================
    // Read-only queries
    // ========================================================================

    /// Informational pack odds.
    #[must_use]
    pub fn booster_odds(&self) -> BoosterOdds {
        self.generator.table().odds()
    }

    /// Opens `count` packs without charging or granting anything.
    ///
    /// # Errors
    ///
    /// Returns `PoolExhausted` if the pool cannot fill a pack.
    pub fn simulate_openings<R: Rng>(&self, count: u32, rng: &mut R) -> EconomyResult<PackStatistics> {
        self.generator.simulate(&*self.pool, rng, count)
    }

    /// Every instance `user` owns.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the catalog is unavailable.
    pub fn collection(&self, user: UserId) -> EconomyResult<Vec<OwnedCardInstance>> {
        self.collection.owned_by(user)
    }

    /// Collection statistics, from the cache when present.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if a recompute is needed and fails.
    pub fn collection_stats(&self, user: UserId) -> EconomyResult<CollectionStats> {
        match self.stats.cached(user) {
            Some(stats) => Ok(stats),
            None => self.stats.recompute(user),
        }
    }

    /// Rebuilds the statistics cache for `user` from the catalog.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the catalog is unavailable.
    pub fn recompute_stats(&self, user: UserId) -> EconomyResult<CollectionStats> {
        self.stats.recompute(user)
    }

    /// Completion of the user's collection against the pool.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the catalog or pool is unavailable.
    pub fn progress(&self, user: UserId) -> EconomyResult<CollectionProgress> {
        self.stats.progress(user, &*self.pool)
    }

    /// Acquisitions grouped by day, newest first.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the catalog is unavailable.
    pub fn history(&self, user: UserId, max_days: usize) -> EconomyResult<Vec<HistoryDay>> {
        self.stats.history(user, max_days)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Compensates purchases awaiting recovery: those the journal found
    /// incomplete on open and failed purchases whose refund did not apply.
    /// Revokes their grants, refunds their debit and journals a rollback.
    ///
    /// Call once at startup, before serving purchases, and again after a
    /// `RefundPending` error.
    ///
    /// The refund is credited before the rollback record is durable, so a
    /// crash between the two refunds that purchase again on the next start.
    ///
    /// # Errors
    ///
    /// Returns the first failure after every queued purchase was attempted.
    /// Failed purchases stay queued, so a later call retries only those.
    pub fn recover_pending(&self) -> EconomyResult<RecoverySummary> {
        let Some(journal) = &self.journal else {
            return Ok(RecoverySummary::default());
        };

        let mut summary = RecoverySummary::default();
        let mut failed = Vec::new();
        let mut first_error = None;

        for pending in journal.take_pending() {
            match self.recover_one(journal, pending) {
                Ok((refunded, revoked)) => {
                    summary.purchases += 1;
                    summary.refunded += refunded;
                    summary.revoked += revoked;
                }
                Err((pending, err)) => {
                    warn!(user = pending.user, purchase = pending.id, error = %err, "recovery failed, purchase kept for retry");
                    first_error.get_or_insert(err);
                    failed.push(pending);
                }
            }
        }

        journal.requeue(failed);
        first_error.map_or(Ok(summary), Err)
    }

    /// Compensates one purchase. On failure, returns it with whatever is
    /// still owed so a retry neither refunds twice nor skips a refund.
    fn recover_one(
        &self,
        journal: &PurchaseJournal,
        mut pending: PendingPurchase,
    ) -> Result<(Coins, usize), (PendingPurchase, EconomyError)> {
        let revoked = match self.collection.revoke_batch(&pending.grants) {
            Ok(revoked) => revoked,
            Err(err) => return Err((pending, err)),
        };

        let refunded = pending.debited.unwrap_or(0);
        if let Some(amount) = pending.debited {
            if let Err(err) = self.accounts.credit(pending.user, amount) {
                return Err((pending, err));
            }
            pending.debited = None;
        }

        if let Err(err) = self.stats.recompute(pending.user) {
            warn!(user = pending.user, error = %err, "collection stats recompute failed after recovery");
        }
        if let Err(err) = journal.rollback(pending.id) {
            return Err((pending, err));
        }

        warn!(user = pending.user, purchase = pending.id, revoked, refunded, "incomplete purchase rolled back during recovery");
        Ok((refunded, revoked))
    }

    /// Truncates the purchase journal. No-op without a journal.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` while purchases are in flight.
    pub fn checkpoint(&self) -> EconomyResult<()> {
        self.journal.as_ref().map_or(Ok(()), PurchaseJournal::checkpoint)
    }
}

impl std::fmt::Debug for BoosterEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoosterEngine")
            .field("config", &self.config)
            .field("journal", &self.journal)
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::ledger::EconomyLedger;
    use crate::pool::InMemoryCardPool;
    use crate::rate_limit::{InMemoryRateLimitStore, RateLimitConfig};
    use booster_shared::{CardType, RarityTier};
    use rand_chacha::ChaCha8Rng;

    fn pool() -> Arc<InMemoryCardPool> {
        Arc::new(
            InMemoryCardPool::from_templates([
                CardTemplate::new(1, "Pidgey", CardType::Normal, RarityTier::Common, 40),
                CardTemplate::new(2, "Pidgeotto", CardType::Normal, RarityTier::Uncommon, 60),
                CardTemplate::new(3, "Pidgeot", CardType::Normal, RarityTier::Rare, 80),
            ])
            .unwrap(),
        )
    }

    fn engine(config: EconomyConfig) -> (BoosterEngine, Arc<EconomyLedger>) {
        let ledger = Arc::new(EconomyLedger::new());
        let engine =
            BoosterEngine::new(config, ledger.clone(), pool(), Arc::new(InMemoryCatalog::new()), [7; 32]).unwrap();
        (engine, ledger)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = EconomyConfig { pack_price: 0, ..EconomyConfig::default() };
        let result = BoosterEngine::new(
            config,
            Arc::new(EconomyLedger::new()),
            pool(),
            Arc::new(InMemoryCatalog::new()),
            [0; 32],
        );
        assert!(matches!(result, Err(EconomyError::InvalidConfig(_))));
    }

    #[test]
    fn test_open_account_uses_starting_balance() {
        let (engine, _) = engine(EconomyConfig { starting_balance: 300, ..EconomyConfig::default() });
        assert!(engine.open_account(1).unwrap());
        assert!(!engine.open_account(1).unwrap());
        assert_eq!(engine.balance(1).unwrap(), 300);
    }

    #[test]
    fn test_purchase_updates_stats_cache() {
        let (engine, _) = engine(EconomyConfig::default());
        engine.open_account(1).unwrap();

        let receipt = engine.open_booster(1).unwrap();
        let stats = engine.collection_stats(1).unwrap();
        assert_eq!(stats.total_cards as usize, receipt.cards.len());
        assert_eq!(stats.rarity_count(RarityTier::Common), 6);
        assert_eq!(engine.collection(1).unwrap().len(), receipt.cards.len());
    }

    #[test]
    fn test_rate_limit_runs_first() {
        let config = EconomyConfig {
            rate_limit: RateLimitConfig { max_requests: 1, window_secs: 3_600 },
            ..EconomyConfig::default()
        };
        let (engine, _) = engine(config);
        let engine = engine
            .with_rate_limit_store(Box::new(InMemoryRateLimitStore::new()))
            .with_clock(|| 1_000);
        engine.open_account(1).unwrap();
        engine.credit(1, 100).unwrap();

        engine.open_booster(1).unwrap();
        let err = engine.open_booster(1).unwrap_err();
        assert_eq!(err, EconomyError::RateLimited { retry_after_ms: 3_599_000 });
        assert_eq!(engine.balance(1).unwrap(), 100);
    }

    #[test]
    fn test_simulation_touches_nothing() {
        let (engine, ledger) = engine(EconomyConfig::default());
        engine.open_account(1).unwrap();

        let stats = engine.simulate_openings(50, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        assert_eq!(stats.packs, 50);
        assert_eq!(ledger.get_balance(1).unwrap(), 100);
        assert!(engine.collection(1).unwrap().is_empty());
    }

    #[test]
    fn test_odds_report_effective_bonus() {
        let (engine, _) = engine(EconomyConfig::default());
        let odds = engine.booster_odds();
        let ultra = odds.get(RarityTier::UltraRare).unwrap();
        assert_eq!(ultra.bonus_chance_bp, 800);
        assert_eq!(ultra.effective_bonus_bp, 600);
    }

    #[test]
    fn test_recover_without_journal_is_noop() {
        let (engine, _) = engine(EconomyConfig::default());
        assert_eq!(engine.recover_pending().unwrap(), RecoverySummary::default());
        engine.checkpoint().unwrap();
    }
}

//! Integration tests for purchase journaling and crash recovery.

use booster_economy::{
    BoosterEngine, CardCatalogStore, CatalogError, CollectionStore, EconomyConfig, EconomyError, EconomyLedger,
    EconomyResult, InMemoryCardPool, InMemoryCatalog, PurchaseJournal, UserAccountProvider,
};
use booster_shared::{CardTemplate, CardType, Coins, OwnedCardInstance, RarityTier, SerialNumber, UserId};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn temp_journal_path() -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("test_purchase_journal_{id}.bpj"))
}

fn pool() -> Arc<InMemoryCardPool> {
    Arc::new(
        InMemoryCardPool::from_templates([
            CardTemplate::new(1, "Machop", CardType::Fighting, RarityTier::Common, 70),
            CardTemplate::new(2, "Machoke", CardType::Fighting, RarityTier::Uncommon, 80),
            CardTemplate::new(3, "Machamp", CardType::Fighting, RarityTier::Rare, 100),
        ])
        .unwrap(),
    )
}

/// Fails the n-th write and the first `failing_removes` removals.
struct FlakyCatalog {
    inner: InMemoryCatalog,
    writes: AtomicU32,
    fail_on_write: u32,
    failing_removes: AtomicU32,
}

impl FlakyCatalog {
    fn failing_write(fail_on_write: u32) -> Self {
        Self { inner: InMemoryCatalog::new(), writes: AtomicU32::new(0), fail_on_write, failing_removes: AtomicU32::new(0) }
    }

    fn failing_removes(count: u32) -> Self {
        Self { failing_removes: AtomicU32::new(count), ..Self::failing_write(0) }
    }
}

impl CardCatalogStore for FlakyCatalog {
    fn persist_instance(&self, instance: &OwnedCardInstance) -> Result<(), CatalogError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on_write {
            return Err(CatalogError::Unavailable("write timeout".to_string()));
        }
        self.inner.persist_instance(instance)
    }

    fn remove_instance(&self, serial: &SerialNumber) -> Result<bool, CatalogError> {
        let remaining = self.failing_removes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_removes.store(remaining - 1, Ordering::SeqCst);
            return Err(CatalogError::Unavailable("delete timeout".to_string()));
        }
        self.inner.remove_instance(serial)
    }

    fn instances_by_owner(&self, owner: UserId) -> Result<Vec<OwnedCardInstance>, CatalogError> {
        self.inner.instances_by_owner(owner)
    }
}

/// Ledger whose first `failing_credits` credits fail.
struct FlakyAccounts {
    inner: EconomyLedger,
    failing_credits: AtomicU32,
}

impl FlakyAccounts {
    fn new(failing_credits: u32) -> Self {
        Self { inner: EconomyLedger::new(), failing_credits: AtomicU32::new(failing_credits) }
    }
}

impl UserAccountProvider for FlakyAccounts {
    fn get_balance(&self, user: UserId) -> EconomyResult<Coins> {
        self.inner.get_balance(user)
    }

    fn debit(&self, user: UserId, amount: Coins) -> EconomyResult<Coins> {
        self.inner.debit(user, amount)
    }

    fn credit(&self, user: UserId, amount: Coins) -> EconomyResult<Coins> {
        let remaining = self.failing_credits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_credits.store(remaining - 1, Ordering::SeqCst);
            return Err(EconomyError::PersistenceFailure("ledger unreachable".to_string()));
        }
        self.inner.credit(user, amount)
    }

    fn open_account(&self, user: UserId, opening_balance: Coins) -> EconomyResult<bool> {
        self.inner.open_account(user, opening_balance)
    }
}

#[test]
fn test_committed_purchase_leaves_nothing_pending() {
    let path = temp_journal_path();
    let ledger = Arc::new(EconomyLedger::new());
    {
        let (journal, _) = PurchaseJournal::open(&path).unwrap();
        let engine = BoosterEngine::new(
            EconomyConfig::default(),
            ledger.clone(),
            pool(),
            Arc::new(InMemoryCatalog::new()),
            [1; 32],
        )
        .unwrap()
        .with_journal(journal);
        engine.open_account(1).unwrap();
        engine.open_booster(1).unwrap();
    }

    let (_journal, report) = PurchaseJournal::open(&path).unwrap();
    assert_eq!(report.committed, 1);
    assert!(report.pending.is_empty());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_failed_purchase_is_journaled_as_rollback() {
    let path = temp_journal_path();
    let ledger = Arc::new(EconomyLedger::new());
    let catalog = Arc::new(FlakyCatalog::failing_write(3));
    {
        let (journal, _) = PurchaseJournal::open(&path).unwrap();
        let engine = BoosterEngine::new(EconomyConfig::default(), ledger.clone(), pool(), catalog.clone(), [1; 32])
            .unwrap()
            .with_journal(journal);
        engine.open_account(1).unwrap();
        assert!(engine.open_booster(1).is_err());
    }

    assert_eq!(ledger.get_balance(1).unwrap(), 100);
    assert!(catalog.inner.is_empty());

    let (_journal, report) = PurchaseJournal::open(&path).unwrap();
    assert_eq!(report.rolled_back, 1);
    assert!(report.pending.is_empty());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_interrupted_purchase_is_compensated_on_restart() {
    let path = temp_journal_path();
    let ledger = Arc::new(EconomyLedger::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    ledger.open_account(1, 100).unwrap();

    // A purchase that dies after the debit and two grants.
    {
        let (journal, _) = PurchaseJournal::open(&path).unwrap();
        let store = CollectionStore::new(catalog.clone(), 5, 11);
        let machop = CardTemplate::new(1, "Machop", CardType::Fighting, RarityTier::Common, 70);

        let id = journal.begin(1, 100).unwrap();
        ledger.debit(1, 100).unwrap();
        journal.record_debit(id, 100).unwrap();
        for _ in 0..2 {
            let instance = store.grant_at(1, &machop, 1_000).unwrap();
            journal.record_grant(id, &instance.serial).unwrap();
        }
    }
    assert_eq!(ledger.get_balance(1).unwrap(), 0);
    assert_eq!(catalog.len(), 2);

    // Restart.
    {
        let (journal, report) = PurchaseJournal::open(&path).unwrap();
        assert_eq!(report.pending.len(), 1);
        assert_eq!(report.pending[0].grants.len(), 2);

        let engine = BoosterEngine::new(EconomyConfig::default(), ledger.clone(), pool(), catalog.clone(), [2; 32])
            .unwrap()
            .with_journal(journal);
        let summary = engine.recover_pending().unwrap();

        assert_eq!(summary.purchases, 1);
        assert_eq!(summary.refunded, 100);
        assert_eq!(summary.revoked, 2);
        assert_eq!(engine.balance(1).unwrap(), 100);
        assert_eq!(engine.collection_stats(1).unwrap().total_cards, 0);

        // Recovery runs once.
        assert_eq!(engine.recover_pending().unwrap().purchases, 0);
        engine.checkpoint().unwrap();
    }
    assert!(catalog.is_empty());

    let (_journal, report) = PurchaseJournal::open(&path).unwrap();
    assert!(report.pending.is_empty());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_purchase_before_debit_recovers_without_refund() {
    let path = temp_journal_path();
    let ledger = Arc::new(EconomyLedger::new());
    ledger.open_account(1, 100).unwrap();
    {
        let (journal, _) = PurchaseJournal::open(&path).unwrap();
        journal.begin(1, 100).unwrap();
    }

    let (journal, _) = PurchaseJournal::open(&path).unwrap();
    let engine = BoosterEngine::new(EconomyConfig::default(), ledger.clone(), pool(), Arc::new(InMemoryCatalog::new()), [3; 32])
        .unwrap()
        .with_journal(journal);
    let summary = engine.recover_pending().unwrap();

    assert_eq!(summary.purchases, 1);
    assert_eq!(summary.refunded, 0);
    assert_eq!(ledger.get_balance(1).unwrap(), 100);
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_failed_refund_keeps_purchase_open() {
    let path = temp_journal_path();
    let accounts = Arc::new(FlakyAccounts::new(1));
    let catalog = Arc::new(FlakyCatalog::failing_write(3));
    accounts.open_account(1, 100).unwrap();
    {
        let (journal, _) = PurchaseJournal::open(&path).unwrap();
        let engine = BoosterEngine::new(EconomyConfig::default(), accounts.clone(), pool(), catalog.clone(), [4; 32])
            .unwrap()
            .with_journal(journal);

        let err = engine.open_booster(1).unwrap_err();
        assert_eq!(err, EconomyError::RefundPending { user: 1, amount: 100 });
        assert_eq!(accounts.get_balance(1).unwrap(), 0);
        assert!(catalog.inner.is_empty());
        // Crash before anyone retries the refund.
    }

    let (journal, report) = PurchaseJournal::open(&path).unwrap();
    assert_eq!(report.rolled_back, 0);
    assert_eq!(report.pending.len(), 1);
    assert_eq!(report.pending[0].debited, Some(100));

    let engine = BoosterEngine::new(EconomyConfig::default(), accounts.clone(), pool(), catalog.clone(), [5; 32])
        .unwrap()
        .with_journal(journal);
    let summary = engine.recover_pending().unwrap();
    assert_eq!(summary.refunded, 100);
    assert_eq!(summary.revoked, 0);
    assert_eq!(accounts.get_balance(1).unwrap(), 100);
    engine.checkpoint().unwrap();
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_failed_refund_is_retried_in_process() {
    let path = temp_journal_path();
    let accounts = Arc::new(FlakyAccounts::new(1));
    let catalog = Arc::new(FlakyCatalog::failing_write(2));
    accounts.open_account(1, 100).unwrap();

    let (journal, _) = PurchaseJournal::open(&path).unwrap();
    let engine = BoosterEngine::new(EconomyConfig::default(), accounts.clone(), pool(), catalog, [6; 32])
        .unwrap()
        .with_journal(journal);

    assert!(matches!(engine.open_booster(1), Err(EconomyError::RefundPending { .. })));
    assert!(engine.checkpoint().is_err());

    let summary = engine.recover_pending().unwrap();
    assert_eq!(summary.purchases, 1);
    assert_eq!(engine.balance(1).unwrap(), 100);

    // Settled once; a second pass owes nothing.
    assert_eq!(engine.recover_pending().unwrap().purchases, 0);
    assert_eq!(engine.balance(1).unwrap(), 100);
    engine.checkpoint().unwrap();
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_recovery_failure_does_not_drop_other_purchases() {
    let path = temp_journal_path();
    let ledger = Arc::new(EconomyLedger::new());
    let catalog = Arc::new(FlakyCatalog::failing_removes(1));
    let machop = CardTemplate::new(1, "Machop", CardType::Fighting, RarityTier::Common, 70);

    // Two purchases of different users die after their first grant.
    {
        let (journal, _) = PurchaseJournal::open(&path).unwrap();
        let store = CollectionStore::new(catalog.clone(), 5, 13);
        for user in [1, 2] {
            ledger.open_account(user, 100).unwrap();
            let id = journal.begin(user, 100).unwrap();
            ledger.debit(user, 100).unwrap();
            journal.record_debit(id, 100).unwrap();
            let instance = store.grant_at(user, &machop, 1_000).unwrap();
            journal.record_grant(id, &instance.serial).unwrap();
        }
    }

    let (journal, report) = PurchaseJournal::open(&path).unwrap();
    assert_eq!(report.pending.len(), 2);
    let engine = BoosterEngine::new(EconomyConfig::default(), ledger.clone(), pool(), catalog.clone(), [7; 32])
        .unwrap()
        .with_journal(journal);

    // User 1's revocation fails; user 2 is still compensated.
    assert!(matches!(engine.recover_pending(), Err(EconomyError::PersistenceFailure(_))));
    assert_eq!(ledger.get_balance(1).unwrap(), 0);
    assert_eq!(ledger.get_balance(2).unwrap(), 100);

    // The failed one is retried on the next call.
    let summary = engine.recover_pending().unwrap();
    assert_eq!(summary.purchases, 1);
    assert_eq!(summary.refunded, 100);
    assert_eq!(summary.revoked, 1);
    assert_eq!(ledger.get_balance(1).unwrap(), 100);
    assert!(catalog.inner.is_empty());
    engine.checkpoint().unwrap();
    std::fs::remove_file(&path).ok();
}

//! # Purchase Journal
//!
//! **Crash recovery for booster purchases**
//!
//! Every purchase is written to an append-only journal as it progresses.
//! If the process dies between the debit and the final commit, reopening the
//! journal yields the purchase as a [`PendingPurchase`], and the engine
//! compensates it (revokes its grants and refunds its debit).
//!
//! ## Guarantees
//!
//! 1. **Durability**: once `commit()` or `rollback()` returns, the outcome is on disk
//! 2. **Isolation**: records carry their purchase id, so purchases of different users may interleave
//! 3. **Recovery**: a torn or corrupt tail is cut off on open; every record before it is kept
//!
//! ## Format
//!
//! ```text
//! [4 bytes: magic "BPJL"]
//! [4 bytes: version]
//! [8 bytes: next LSN at the last checkpoint]
//!
//! Record format:
//! [8 bytes: LSN]
//! [8 bytes: purchase id (LSN of its BEGIN)]
//! [1 byte: record type (BEGIN/DEBIT/GRANT/COMMIT/ROLLBACK)]
//! [4 bytes: payload length]
//! [N bytes: payload]
//! [4 bytes: CRC32 of above]
//! ```
//!
//! The debit record is written after the ledger accepted the debit and each
//! grant record after the catalog accepted the instance, so recovery never
//! refunds coins that were not taken.

use booster_shared::{Coins, SerialNumber, UserId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{EconomyError, EconomyResult};

const JOURNAL_MAGIC: &[u8; 4] = b"BPJL";
const JOURNAL_VERSION: u32 = 1;
const HEADER_LEN: u64 = 16;

/// Bytes of a record besides its payload.
const RECORD_OVERHEAD: u64 = 8 + 8 + 1 + 4 + 4;

/// Upper bound on a payload; anything larger is treated as corruption.
const MAX_PAYLOAD: u32 = 4 * 1024;

/// Identifier of one journaled purchase.
pub type PurchaseId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum RecordType {
    Begin = 1,
    Debit = 2,
    Grant = 3,
    Commit = 4,
    Rollback = 5,
}

impl RecordType {
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Debit),
            3 => Some(Self::Grant),
            4 => Some(Self::Commit),
            5 => Some(Self::Rollback),
            _ => None,
        }
    }
}

/// A purchase that was neither committed nor rolled back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingPurchase {
    /// Journal id of the purchase.
    pub id: PurchaseId,
    /// Buyer.
    pub user: UserId,
    /// Pack price at the time of purchase.
    pub price: Coins,
    /// Amount actually debited, if the debit went through.
    pub debited: Option<Coins>,
    /// Instances granted before the interruption.
    pub grants: Vec<SerialNumber>,
}

/// Outcome of replaying the journal on open.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Purchases that ended with COMMIT.
    pub committed: u64,
    /// Purchases that ended with ROLLBACK.
    pub rolled_back: u64,
    /// Purchases left open.
    pub pending: Vec<PendingPurchase>,
    /// Bytes cut off a torn or corrupt tail.
    pub truncated_bytes: u64,
}

struct JournalState {
    writer: BufWriter<File>,
    next_lsn: u64,
    /// Open purchases as their records describe them.
    open: HashMap<PurchaseId, PendingPurchase>,
}

/// Append-only purchase journal.
pub struct PurchaseJournal {
    path: PathBuf,
    state: Mutex<JournalState>,
    recovered: Mutex<Vec<PendingPurchase>>,
}

impl PurchaseJournal {
    /// Opens or creates a journal and replays it.
    ///
    /// Open purchases found on disk are available through
    /// [`Self::take_pending`]; they count as in flight until they are
    /// committed or rolled back.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the file cannot be opened or is not a
    /// purchase journal.
    pub fn open(path: impl AsRef<Path>) -> EconomyResult<(Self, RecoveryReport)> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_failure("open journal"))?;

        let len = file.metadata().map_err(io_failure("read journal metadata"))?.len();
        if len == 0 {
            let mut header = Vec::with_capacity(16);
            header.extend_from_slice(JOURNAL_MAGIC);
            header.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
            header.extend_from_slice(&0_u64.to_le_bytes());
            file.write_all(&header).map_err(io_failure("write journal header"))?;
            file.sync_all().map_err(io_failure("sync journal header"))?;
        }

        let replay = replay(&path)?;
        let mut report = replay.report;
        report.truncated_bytes = replay.file_len.max(HEADER_LEN) - replay.valid_len;

        if report.truncated_bytes > 0 {
            warn!(path = %path.display(), bytes = report.truncated_bytes, "discarding corrupt journal tail");
            file.set_len(replay.valid_len).map_err(io_failure("truncate journal"))?;
        }
        file.seek(SeekFrom::Start(replay.valid_len)).map_err(io_failure("seek journal"))?;

        if !report.pending.is_empty() {
            warn!(
                path = %path.display(),
                pending = report.pending.len(),
                "journal has incomplete purchases"
            );
        }

        let journal = Self {
            path,
            state: Mutex::new(JournalState {
                writer: BufWriter::new(file),
                next_lsn: replay.max_lsn.map_or(replay.base_lsn, |lsn| replay.base_lsn.max(lsn + 1)),
                open: report.pending.iter().map(|p| (p.id, p.clone())).collect(),
            }),
            recovered: Mutex::new(report.pending.clone()),
        };
        Ok((journal, report))
    }

    /// Location of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hands out the purchases awaiting recovery: those found open on disk
    /// plus any requeued since. The queue is left empty.
    #[must_use]
    pub fn take_pending(&self) -> Vec<PendingPurchase> {
        std::mem::take(&mut *self.recovered.lock())
    }

    /// Returns purchases to the recovery queue, e.g. after a failed
    /// compensation. They stay open on disk.
    pub fn requeue(&self, purchases: impl IntoIterator<Item = PendingPurchase>) {
        self.recovered.lock().extend(purchases);
    }

    /// State of an open purchase as journaled so far.
    #[must_use]
    pub fn purchase(&self, id: PurchaseId) -> Option<PendingPurchase> {
        self.state.lock().open.get(&id).cloned()
    }

    /// Number of purchases begun but not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Starts a purchase and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the record cannot be written.
    pub fn begin(&self, user: UserId, price: Coins) -> EconomyResult<PurchaseId> {
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&user.to_le_bytes());
        payload.extend_from_slice(&price.to_le_bytes());

        let mut state = self.state.lock();
        let id = state.next_lsn;
        write_record(&mut state, id, RecordType::Begin, &payload)?;
        state
            .open
            .insert(id, PendingPurchase { id, user, price, debited: None, grants: Vec::new() });
        Ok(id)
    }

    /// Records an accepted debit.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the purchase is not open or the record
    /// cannot be written.
    pub fn record_debit(&self, id: PurchaseId, amount: Coins) -> EconomyResult<()> {
        self.append(id, RecordType::Debit, &amount.to_le_bytes(), |pending| pending.debited = Some(amount))
    }

    /// Records a persisted instance.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the purchase is not open, the serial
    /// is too long, or the record cannot be written.
    pub fn record_grant(&self, id: PurchaseId, serial: &SerialNumber) -> EconomyResult<()> {
        let bytes = serial.as_str().as_bytes();
        let len = u16::try_from(bytes.len())
            .map_err(|_| EconomyError::PersistenceFailure(format!("serial too long to journal: {serial}")))?;

        let mut payload = Vec::with_capacity(2 + bytes.len());
        payload.extend_from_slice(&len.to_le_bytes());
        payload.extend_from_slice(bytes);
        self.append(id, RecordType::Grant, &payload, |pending| pending.grants.push(serial.clone()))
    }

    /// Marks the purchase as committed and syncs.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the purchase is not open or the record
    /// cannot be made durable.
    pub fn commit(&self, id: PurchaseId) -> EconomyResult<()> {
        self.finish(id, RecordType::Commit)
    }

    /// Marks the purchase as rolled back and syncs.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the purchase is not open or the record
    /// cannot be made durable.
    pub fn rollback(&self, id: PurchaseId) -> EconomyResult<()> {
        self.finish(id, RecordType::Rollback)
    }

    /// Truncates the journal back to its header.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` while purchases are in flight or if the
    /// file cannot be truncated.
    pub fn checkpoint(&self) -> EconomyResult<()> {
        let mut state = self.state.lock();
        if !state.open.is_empty() {
            return Err(EconomyError::PersistenceFailure(format!(
                "cannot checkpoint with {} purchases in flight",
                state.open.len()
            )));
        }

        state.writer.flush().map_err(io_failure("flush journal"))?;
        let next_lsn = state.next_lsn;
        let file = state.writer.get_mut();
        file.set_len(HEADER_LEN).map_err(io_failure("truncate journal"))?;
        file.seek(SeekFrom::Start(8)).map_err(io_failure("seek journal"))?;
        file.write_all(&next_lsn.to_le_bytes()).map_err(io_failure("write journal header"))?;
        file.sync_all().map_err(io_failure("sync journal"))?;
        Ok(())
    }

    fn append<F>(&self, id: PurchaseId, record_type: RecordType, payload: &[u8], apply: F) -> EconomyResult<()>
    where
        F: FnOnce(&mut PendingPurchase),
    {
        let mut state = self.state.lock();
        ensure_open(&state, id)?;
        write_record(&mut state, id, record_type, payload)?;
        if let Some(pending) = state.open.get_mut(&id) {
            apply(pending);
        }
        Ok(())
    }

    fn finish(&self, id: PurchaseId, record_type: RecordType) -> EconomyResult<()> {
        let mut state = self.state.lock();
        ensure_open(&state, id)?;
        write_record(&mut state, id, record_type, &[])?;
        state.writer.get_ref().sync_data().map_err(io_failure("sync journal"))?;
        state.open.remove(&id);
        Ok(())
    }
}

impl std::fmt::Debug for PurchaseJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurchaseJournal")
            .field("path", &self.path)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

fn io_failure(context: &'static str) -> impl Fn(std::io::Error) -> EconomyError {
    move |e| EconomyError::PersistenceFailure(format!("{context}: {e}"))
}

fn ensure_open(state: &JournalState, id: PurchaseId) -> EconomyResult<()> {
    if state.open.contains_key(&id) {
        Ok(())
    } else {
        Err(EconomyError::PersistenceFailure(format!("purchase {id} is not open")))
    }
}

fn write_record(
    state: &mut JournalState,
    id: PurchaseId,
    record_type: RecordType,
    payload: &[u8],
) -> EconomyResult<()> {
    let lsn = state.next_lsn;
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| EconomyError::PersistenceFailure("journal payload too large".to_string()))?;

    let mut record = Vec::with_capacity(RECORD_OVERHEAD as usize + payload.len());
    record.extend_from_slice(&lsn.to_le_bytes());
    record.extend_from_slice(&id.to_le_bytes());
    record.push(record_type as u8);
    record.extend_from_slice(&payload_len.to_le_bytes());
    record.extend_from_slice(payload);
    let crc = crc32fast::hash(&record);
    record.extend_from_slice(&crc.to_le_bytes());

    state.writer.write_all(&record).map_err(io_failure("write journal record"))?;
    state.writer.flush().map_err(io_failure("flush journal"))?;
    state.next_lsn += 1;
    Ok(())
}

struct Replay {
    report: RecoveryReport,
    base_lsn: u64,
    max_lsn: Option<u64>,
    valid_len: u64,
    file_len: u64,
}

struct RawRecord {
    lsn: u64,
    purchase: PurchaseId,
    record_type: RecordType,
    payload: Vec<u8>,
}

fn replay(path: &Path) -> EconomyResult<Replay> {
    let file = File::open(path).map_err(io_failure("open journal for recovery"))?;
    let file_len = file.metadata().map_err(io_failure("read journal metadata"))?.len();
    let mut reader = BufReader::new(file);

    let mut header = [0_u8; 16];
    reader.read_exact(&mut header).map_err(io_failure("read journal header"))?;
    if &header[0..4] != JOURNAL_MAGIC {
        return Err(EconomyError::PersistenceFailure(format!(
            "{} is not a purchase journal",
            path.display()
        )));
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != JOURNAL_VERSION {
        return Err(EconomyError::PersistenceFailure(format!("unsupported journal version {version}")));
    }
    let base_lsn = decode_u64(&header[8..16]).unwrap_or(0);

    let mut open: BTreeMap<PurchaseId, PendingPurchase> = BTreeMap::new();
    let mut report = RecoveryReport::default();
    let mut max_lsn = None;
    let mut valid_len = HEADER_LEN;

    while let Some(record) = read_record(&mut reader) {
        valid_len += RECORD_OVERHEAD + record.payload.len() as u64;
        max_lsn = Some(max_lsn.map_or(record.lsn, |m: u64| m.max(record.lsn)));

        match record.record_type {
            RecordType::Begin => {
                if let Some((user, price)) = decode_begin(&record.payload) {
                    open.insert(
                        record.purchase,
                        PendingPurchase { id: record.purchase, user, price, debited: None, grants: Vec::new() },
                    );
                }
            }
            RecordType::Debit => {
                if let (Some(pending), Some(amount)) = (open.get_mut(&record.purchase), decode_u64(&record.payload)) {
                    pending.debited = Some(amount);
                }
            }
            RecordType::Grant => {
                if let (Some(pending), Some(serial)) = (open.get_mut(&record.purchase), decode_serial(&record.payload)) {
                    pending.grants.push(serial);
                }
            }
            RecordType::Commit => {
                if open.remove(&record.purchase).is_some() {
                    report.committed += 1;
                }
            }
            RecordType::Rollback => {
                if open.remove(&record.purchase).is_some() {
                    report.rolled_back += 1;
                }
            }
        }
    }

    report.pending = open.into_values().collect();
    Ok(Replay { report, base_lsn, max_lsn, valid_len, file_len })
}

/// Reads one record. `None` on end of file, a torn record, or a CRC mismatch.
fn read_record<R: Read>(reader: &mut R) -> Option<RawRecord> {
    let mut head = [0_u8; 21];
    reader.read_exact(&mut head).ok()?;

    let lsn = u64::from_le_bytes(head[0..8].try_into().ok()?);
    let purchase = u64::from_le_bytes(head[8..16].try_into().ok()?);
    let record_type = RecordType::from_u8(head[16])?;
    let payload_len = u32::from_le_bytes(head[17..21].try_into().ok()?);
    if payload_len > MAX_PAYLOAD {
        return None;
    }

    let mut payload = vec![0_u8; payload_len as usize];
    reader.read_exact(&mut payload).ok()?;
    let mut crc_bytes = [0_u8; 4];
    reader.read_exact(&mut crc_bytes).ok()?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&head);
    hasher.update(&payload);
    if hasher.finalize() != u32::from_le_bytes(crc_bytes) {
        return None;
    }

    Some(RawRecord { lsn, purchase, record_type, payload })
}

fn decode_u64(payload: &[u8]) -> Option<u64> {
    Some(u64::from_le_bytes(payload.get(0..8)?.try_into().ok()?))
}

fn decode_begin(payload: &[u8]) -> Option<(UserId, Coins)> {
    let user = decode_u64(payload)?;
    let price = decode_u64(payload.get(8..)?)?;
    Some((user, price))
}

fn decode_serial(payload: &[u8]) -> Option<SerialNumber> {
    let len = usize::from(u16::from_le_bytes(payload.get(0..2)?.try_into().ok()?));
    let raw = std::str::from_utf8(payload.get(2..2 + len)?).ok()?;
    Some(SerialNumber::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_journal_path() -> PathBuf {
        let id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("test_journal_{id}.bpj"))
    }

    #[test]
    fn test_create_and_reopen_empty() {
        let path = temp_journal_path();
        {
            let (_journal, report) = PurchaseJournal::open(&path).unwrap();
            assert_eq!(report, RecoveryReport::default());
        }
        let (_journal, report) = PurchaseJournal::open(&path).unwrap();
        assert_eq!(report, RecoveryReport::default());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_committed_and_rolled_back_are_not_pending() {
        let path = temp_journal_path();
        {
            let (journal, _) = PurchaseJournal::open(&path).unwrap();
            let a = journal.begin(1, 100).unwrap();
            journal.record_debit(a, 100).unwrap();
            journal.record_grant(a, &SerialNumber::from_raw("1-0-aaaaaaa")).unwrap();
            journal.commit(a).unwrap();

            let b = journal.begin(2, 100).unwrap();
            journal.rollback(b).unwrap();
            assert_eq!(journal.in_flight(), 0);
        }

        let (_journal, report) = PurchaseJournal::open(&path).unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(report.rolled_back, 1);
        assert!(report.pending.is_empty());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_interleaved_purchases_recover_separately() {
        let path = temp_journal_path();
        {
            let (journal, _) = PurchaseJournal::open(&path).unwrap();
            let a = journal.begin(1, 100).unwrap();
            let b = journal.begin(2, 100).unwrap();
            journal.record_debit(a, 100).unwrap();
            journal.record_debit(b, 100).unwrap();
            journal.record_grant(b, &SerialNumber::from_raw("2-0-bbbbbbb")).unwrap();
            journal.record_grant(a, &SerialNumber::from_raw("1-0-aaaaaaa")).unwrap();
            journal.commit(b).unwrap();
            // Crash before `a` finishes.
        }

        let (journal, report) = PurchaseJournal::open(&path).unwrap();
        assert_eq!(report.committed, 1);
        assert_eq!(report.pending.len(), 1);
        let pending = &report.pending[0];
        assert_eq!(pending.user, 1);
        assert_eq!(pending.debited, Some(100));
        assert_eq!(pending.grants, vec![SerialNumber::from_raw("1-0-aaaaaaa")]);

        assert_eq!(journal.take_pending().len(), 1);
        assert!(journal.take_pending().is_empty());
        journal.rollback(pending.id).unwrap();
        drop(journal);

        let (_journal, report) = PurchaseJournal::open(&path).unwrap();
        assert!(report.pending.is_empty());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_open_purchase_state_matches_replay() {
        let path = temp_journal_path();
        let live = {
            let (journal, _) = PurchaseJournal::open(&path).unwrap();
            let id = journal.begin(4, 100).unwrap();
            journal.record_debit(id, 100).unwrap();
            journal.record_grant(id, &SerialNumber::from_raw("4-0-ddddddd")).unwrap();

            let live = journal.purchase(id).unwrap();
            assert_eq!(live.debited, Some(100));
            assert_eq!(live.grants.len(), 1);

            // Handed to recovery without closing it.
            journal.requeue([live.clone()]);
            assert_eq!(journal.take_pending(), vec![live.clone()]);
            assert_eq!(journal.in_flight(), 1);

            journal.commit(id).unwrap();
            assert!(journal.purchase(id).is_none());
            live
        };

        // What was live before the commit is exactly what a crash would replay.
        let reopened = {
            let (journal, _) = PurchaseJournal::open(&path).unwrap();
            let id = journal.begin(4, 100).unwrap();
            journal.record_debit(id, 100).unwrap();
            journal.record_grant(id, &SerialNumber::from_raw("4-0-ddddddd")).unwrap();
            journal.purchase(id).unwrap()
        };
        assert_eq!(PendingPurchase { id: live.id, ..reopened.clone() }, live);

        let (_journal, report) = PurchaseJournal::open(&path).unwrap();
        assert_eq!(report.pending, vec![reopened]);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let path = temp_journal_path();
        {
            let (journal, _) = PurchaseJournal::open(&path).unwrap();
            let a = journal.begin(1, 100).unwrap();
            journal.commit(a).unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0xde, 0xad, 0xbe, 0xef, 0x01]).unwrap();
        }

        {
            let (journal, report) = PurchaseJournal::open(&path).unwrap();
            assert_eq!(report.committed, 1);
            assert_eq!(report.truncated_bytes, 5);

            let b = journal.begin(3, 100).unwrap();
            journal.record_debit(b, 100).unwrap();
        }

        let (_journal, report) = PurchaseJournal::open(&path).unwrap();
        assert_eq!(report.truncated_bytes, 0);
        assert_eq!(report.pending.len(), 1);
        assert_eq!(report.pending[0].user, 3);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_records_require_open_purchase() {
        let path = temp_journal_path();
        let (journal, _) = PurchaseJournal::open(&path).unwrap();
        assert!(journal.record_debit(99, 100).is_err());

        let a = journal.begin(1, 100).unwrap();
        journal.commit(a).unwrap();
        assert!(journal.commit(a).is_err());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_checkpoint() {
        let path = temp_journal_path();
        let (journal, _) = PurchaseJournal::open(&path).unwrap();
        let a = journal.begin(1, 100).unwrap();
        assert!(journal.checkpoint().is_err());
        journal.commit(a).unwrap();
        journal.checkpoint().unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_LEN);
        drop(journal);

        // Ids keep increasing across a checkpoint and a restart.
        let (journal, report) = PurchaseJournal::open(&path).unwrap();
        assert_eq!(report, RecoveryReport::default());
        let b = journal.begin(1, 100).unwrap();
        assert!(b > a);
        drop(journal);

        let (_journal, report) = PurchaseJournal::open(&path).unwrap();
        assert_eq!(report.pending.len(), 1);
        assert_eq!(report.pending[0].id, b);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_rejects_foreign_file() {
        let path = temp_journal_path();
        fs::write(&path, b"definitely not a journal").unwrap();
        assert!(matches!(PurchaseJournal::open(&path), Err(EconomyError::PersistenceFailure(_))));
        fs::remove_file(&path).ok();
    }
}

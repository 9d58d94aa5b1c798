//! In-memory Ledger Store
//!
//! A multi-version ledger kept in process. It honors the same isolation
//! contract as the PostgreSQL backend closely enough to exercise the
//! transfer engine's concurrency behavior without a database:
//!
//! - **Read committed**: every statement reads the latest committed rows;
//!   balance adjustments are applied to the latest committed value at commit.
//! - **Repeatable read**: all statements read the snapshot taken at `begin`.
//!   Adjusting a row that another transaction committed after the snapshot
//!   fails with `SerializationFailure` (first committer wins).
//! - **Serializable**: repeatable read plus commit-time validation of the
//!   read set: if any row this transaction read (or scanned) was committed by
//!   someone else after its snapshot, the commit fails.
//!
//! Every call yields to the scheduler once, which stands in for the network
//! round trip and lets concurrent sessions interleave.
//!
//! Faults can be injected with [`MemoryLedgerStore::set_available`],
//! [`MemoryLedgerStore::fail_after_statements`] (one failed statement on a
//! connection that stays usable) and [`MemoryLedgerStore::sever_after_statements`]
//! (every open connection dies for good, like a dropped socket).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use super::{
    Account, IsolationLevel, LedgerConnection, LedgerStore, Statement, StatementOutput, TxOptions,
};
use crate::core_types::AccountId;
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy)]
struct Row {
    balance: Decimal,
    /// Commit sequence number of the last writer
    version: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    rows: BTreeMap<AccountId, Row>,
    commit_seq: u64,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    /// Statements left before the next injected failure
    fail_after: Mutex<Option<usize>>,
    /// Statements left before every open connection is severed
    sever_after: Mutex<Option<usize>>,
    /// Connections opened before the current epoch are dead
    epoch: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn round_trip() {
    tokio::task::yield_now().await;
}

/// Shared in-memory ledger. Clones refer to the same ledger.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    ledger: Arc<Mutex<Ledger>>,
    faults: Arc<Faults>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger pre-populated with committed accounts
    pub fn with_accounts<I>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (AccountId, Decimal)>,
    {
        let store = Self::new();
        {
            let mut ledger = lock(&store.ledger);
            for (id, balance) in accounts {
                ledger.rows.insert(id, Row { balance, version: 0 });
            }
        }
        store
    }

    /// Latest committed balance of one account
    pub fn balance(&self, id: AccountId) -> Option<Decimal> {
        lock(&self.ledger).rows.get(&id).map(|r| r.balance)
    }

    /// Latest committed balances of all accounts
    pub fn balances(&self) -> BTreeMap<AccountId, Decimal> {
        lock(&self.ledger)
            .rows
            .iter()
            .map(|(id, row)| (*id, row.balance))
            .collect()
    }

    pub fn total_funds(&self) -> Decimal {
        lock(&self.ledger).rows.values().map(|r| r.balance).sum()
    }

    /// Number of transactions that committed at least one write
    pub fn commit_count(&self) -> u64 {
        lock(&self.ledger).commit_seq
    }

    /// Simulate losing (or regaining) the store
    pub fn set_available(&self, available: bool) {
        self.faults.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Let `n` more statements succeed, then fail the next one with
    /// `StoreUnavailable`. The fault fires once.
    pub fn fail_after_statements(&self, n: usize) {
        *lock(&self.faults.fail_after) = Some(n);
    }

    /// Kill every connection opened so far. New connections work.
    pub fn sever_connections(&self) {
        self.faults.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Let `n` more statements succeed, then sever every open connection
    /// while the next one runs. The fault fires once.
    pub fn sever_after_statements(&self, n: usize) {
        *lock(&self.faults.sever_after) = Some(n);
    }

    fn check_alive(&self, epoch: u64) -> Result<(), LedgerError> {
        if epoch < self.faults.epoch.load(Ordering::SeqCst) {
            return Err(LedgerError::StoreUnavailable(
                "connection to memory ledger was closed".to_string(),
            ));
        }
        Ok(())
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::StoreUnavailable(
                "memory ledger is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn check_statement(&self, epoch: u64) -> Result<(), LedgerError> {
        self.check_available()?;
        self.check_alive(epoch)?;
        {
            let mut sever_after = lock(&self.faults.sever_after);
            match *sever_after {
                Some(0) => {
                    *sever_after = None;
                    self.sever_connections();
                    return Err(LedgerError::StoreUnavailable(
                        "connection reset during statement".to_string(),
                    ));
                }
                Some(n) => *sever_after = Some(n - 1),
                None => {}
            }
        }
        let mut fail_after = lock(&self.faults.fail_after);
        match *fail_after {
            Some(0) => {
                *fail_after = None;
                Err(LedgerError::StoreUnavailable(
                    "connection lost during statement".to_string(),
                ))
            }
            Some(n) => {
                *fail_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<Box<dyn LedgerConnection>, LedgerError> {
        round_trip().await;
        self.check_available()?;
        Ok(Box::new(MemoryConnection {
            store: self.clone(),
            epoch: self.faults.epoch.load(Ordering::SeqCst),
            tx: None,
        }))
    }
}

/// Private state of one open transaction
#[derive(Debug)]
struct MemoryTx {
    options: TxOptions,
    snapshot_seq: u64,
    /// Balances as of `begin`; `None` under read committed
    snapshot: Option<BTreeMap<AccountId, Decimal>>,
    reads: BTreeSet<AccountId>,
    /// Whether the whole table was read
    scanned: bool,
    deltas: BTreeMap<AccountId, Decimal>,
    inserts: BTreeMap<AccountId, Decimal>,
}

impl MemoryTx {
    fn begin(options: TxOptions, ledger: &Ledger) -> Self {
        let snapshot = (options.isolation >= IsolationLevel::RepeatableRead).then(|| {
            ledger
                .rows
                .iter()
                .map(|(id, row)| (*id, row.balance))
                .collect()
        });
        Self {
            options,
            snapshot_seq: ledger.commit_seq,
            snapshot,
            reads: BTreeSet::new(),
            scanned: false,
            deltas: BTreeMap::new(),
            inserts: BTreeMap::new(),
        }
    }

    fn has_writes(&self) -> bool {
        !self.deltas.is_empty() || !self.inserts.is_empty()
    }

    fn visible(&self, ledger: &Ledger, id: AccountId) -> Result<Option<Decimal>, LedgerError> {
        if let Some(balance) = self.inserts.get(&id) {
            return Ok(Some(*balance));
        }
        let base = match &self.snapshot {
            Some(snapshot) => snapshot.get(&id).copied(),
            None => ledger.rows.get(&id).map(|r| r.balance),
        };
        let Some(base) = base else {
            return Ok(None);
        };
        let delta = self.deltas.get(&id).copied().unwrap_or_default();
        base.checked_add(delta)
            .map(Some)
            .ok_or_else(|| numeric_overflow(id))
    }

    fn visible_ids(&self, ledger: &Ledger) -> BTreeSet<AccountId> {
        let mut ids: BTreeSet<AccountId> = match &self.snapshot {
            Some(snapshot) => snapshot.keys().copied().collect(),
            None => ledger.rows.keys().copied().collect(),
        };
        ids.extend(self.inserts.keys().copied());
        ids
    }

    fn written_since_snapshot(&self, ledger: &Ledger, id: AccountId) -> bool {
        ledger
            .rows
            .get(&id)
            .is_some_and(|row| row.version > self.snapshot_seq)
    }

    fn execute(
        &mut self,
        statement: &Statement,
        ledger: &Ledger,
    ) -> Result<StatementOutput, LedgerError> {
        if statement.is_write() && self.options.read_only {
            return Err(LedgerError::ReadOnlyViolation);
        }

        match *statement {
            Statement::SelectAccount { id } => {
                self.reads.insert(id);
                let rows = self
                    .visible(ledger, id)?
                    .map(|balance| Account { id, balance })
                    .into_iter()
                    .collect();
                Ok(StatementOutput::Rows(rows))
            }
            Statement::SelectAllAccounts => {
                self.scanned = true;
                let mut rows = Vec::new();
                for id in self.visible_ids(ledger) {
                    self.reads.insert(id);
                    if let Some(balance) = self.visible(ledger, id)? {
                        rows.push(Account { id, balance });
                    }
                }
                Ok(StatementOutput::Rows(rows))
            }
            Statement::AdjustBalance { id, delta } => {
                self.reads.insert(id);
                let Some(current) = self.visible(ledger, id)? else {
                    return Ok(StatementOutput::RowCount(0));
                };
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| numeric_overflow(id))?;
                if let Some(balance) = self.inserts.get_mut(&id) {
                    *balance = next;
                    return Ok(StatementOutput::RowCount(1));
                }
                if self.options.isolation >= IsolationLevel::RepeatableRead
                    && self.written_since_snapshot(ledger, id)
                {
                    return Err(LedgerError::SerializationFailure(format!(
                        "could not serialize access due to concurrent update of account {id}"
                    )));
                }
                let pending = self.deltas.entry(id).or_default();
                *pending = pending
                    .checked_add(delta)
                    .ok_or_else(|| numeric_overflow(id))?;
                Ok(StatementOutput::RowCount(1))
            }
            Statement::InsertAccount { id, balance } => {
                if self.visible(ledger, id)?.is_some() || ledger.rows.contains_key(&id) {
                    return Err(duplicate_key(id));
                }
                self.inserts.insert(id, balance);
                Ok(StatementOutput::RowCount(1))
            }
        }
    }

    fn validate(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        if let Some(id) = self.inserts.keys().find(|id| ledger.rows.contains_key(id)) {
            return Err(duplicate_key(*id));
        }

        let conflict = match self.options.isolation {
            IsolationLevel::ReadCommitted => None,
            IsolationLevel::RepeatableRead => self
                .deltas
                .keys()
                .find(|id| self.written_since_snapshot(ledger, **id))
                .copied(),
            IsolationLevel::Serializable => {
                if self.scanned
                    && ledger
                        .rows
                        .values()
                        .any(|row| row.version > self.snapshot_seq)
                {
                    return Err(LedgerError::SerializationFailure(
                        "could not serialize access due to read/write dependencies among transactions"
                            .to_string(),
                    ));
                }
                self.reads
                    .iter()
                    .chain(self.deltas.keys())
                    .find(|id| self.written_since_snapshot(ledger, **id))
                    .copied()
            }
        };

        match conflict {
            Some(id) => Err(LedgerError::SerializationFailure(format!(
                "could not serialize access due to concurrent update of account {id}"
            ))),
            None => Ok(()),
        }
    }

    fn commit(self, ledger: &mut Ledger) -> Result<(), LedgerError> {
        // A transaction without writes observed one committed state and
        // needs no validation.
        if !self.has_writes() {
            return Ok(());
        }
        self.validate(ledger)?;

        // Every new balance is computed before the first row changes.
        let mut updated = Vec::with_capacity(self.deltas.len());
        for (id, delta) in &self.deltas {
            if let Some(row) = ledger.rows.get(id) {
                let balance = row
                    .balance
                    .checked_add(*delta)
                    .ok_or_else(|| numeric_overflow(*id))?;
                updated.push((*id, balance));
            }
        }

        ledger.commit_seq += 1;
        let seq = ledger.commit_seq;
        for (id, balance) in updated {
            if let Some(row) = ledger.rows.get_mut(&id) {
                row.balance = balance;
                row.version = seq;
            }
        }
        for (id, balance) in self.inserts {
            ledger.rows.insert(
                id,
                Row {
                    balance,
                    version: seq,
                },
            );
        }
        Ok(())
    }
}

/// Same outcome as SQLSTATE 22003 on the PostgreSQL backend
fn numeric_overflow(id: AccountId) -> LedgerError {
    LedgerError::Database(format!("numeric field overflow (account {id})"))
}

fn duplicate_key(id: AccountId) -> LedgerError {
    LedgerError::Database(format!(
        "duplicate key value violates unique constraint \"accounts_pkey\" (id={id})"
    ))
}

/// One connection to a [`MemoryLedgerStore`]
#[derive(Debug)]
pub struct MemoryConnection {
    store: MemoryLedgerStore,
    epoch: u64,
    tx: Option<MemoryTx>,
}

#[async_trait]
impl LedgerConnection for MemoryConnection {
    async fn begin(&mut self, options: TxOptions) -> Result<(), LedgerError> {
        round_trip().await;
        self.store.check_available()?;
        self.store.check_alive(self.epoch)?;
        if self.tx.is_some() {
            return Err(LedgerError::TransactionAlreadyActive);
        }
        let tx = {
            let ledger = lock(&self.store.ledger);
            MemoryTx::begin(options, &ledger)
        };
        debug!(snapshot_seq = tx.snapshot_seq, isolation = %options.isolation, "memory tx begin");
        self.tx = Some(tx);
        Ok(())
    }

    async fn execute(&mut self, statement: &Statement) -> Result<StatementOutput, LedgerError> {
        round_trip().await;
        self.store.check_statement(self.epoch)?;

        match self.tx.as_mut() {
            Some(tx) => {
                let ledger = lock(&self.store.ledger);
                tx.execute(statement, &ledger)
            }
            None => {
                let mut ledger = lock(&self.store.ledger);
                let options = TxOptions {
                    isolation: IsolationLevel::ReadCommitted,
                    read_only: false,
                };
                let mut tx = MemoryTx::begin(options, &ledger);
                let output = tx.execute(statement, &ledger)?;
                tx.commit(&mut ledger)?;
                Ok(output)
            }
        }
    }

    async fn commit(&mut self) -> Result<(), LedgerError> {
        round_trip().await;
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        self.store.check_available()?;
        self.store.check_alive(self.epoch)?;
        let mut ledger = lock(&self.store.ledger);
        tx.commit(&mut ledger)
    }

    async fn rollback(&mut self) -> Result<(), LedgerError> {
        round_trip().await;
        self.tx = None;
        self.store.check_alive(self.epoch)
    }

    async fn close(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}

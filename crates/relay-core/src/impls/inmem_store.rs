//! InMemoryRecordStore - テスト用の outbox テーブル
//!
//! # 学習ポイント
//! - `FOR UPDATE SKIP LOCKED` の再現（行ロック表 + ロック中の行は読み飛ばす）
//! - トランザクション内の書き込みは staging して commit 時にだけ反映
//! - Tx を drop すると（commit / rollback なしでも）ロックが外れる = ワーカークラッシュの再現
//!
//! Mutex は同期処理の中だけで握り、await を跨がない。

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ClaimPolicy, OutboxRecord, RecordId, RecordStatus, StoreError};
use crate::observability::StatusCounts;
use crate::ports::{Clock, RecordStore, SystemClock};

/// Failure to inject into the next matching operation.
///
/// Each injected fault fires once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreFault {
    Begin,
    Claim,
    MarkPublished,
    MarkFailed,
    Commit,
    Rollback,
    /// Panics inside `mark_published`, after the claim. Simulates a worker
    /// crashing while it holds row locks.
    CrashOnWriteBack,
}

#[derive(Debug, Default)]
struct State {
    /// Insertion order breaks `created_at` ties.
    rows: Vec<OutboxRecord>,
    /// record id -> transaction holding its row lock
    locks: HashMap<RecordId, u64>,
    next_tx: u64,
    faults: HashSet<StoreFault>,
}

impl State {
    fn take_fault(&mut self, fault: StoreFault) -> bool {
        self.faults.remove(&fault)
    }

    fn release(&mut self, tx_id: u64) {
        self.locks.retain(|_, owner| *owner != tx_id);
    }
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Published(Vec<RecordId>, DateTime<Utc>),
    Failed(Vec<RecordId>),
    Requeued(Vec<RecordId>),
}

/// Open transaction on an [`InMemoryRecordStore`].
#[derive(Debug)]
pub struct InMemoryTx {
    id: u64,
    state: Arc<Mutex<State>>,
    staged: Vec<StagedWrite>,
    finished: bool,
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            // 接続断と同じ扱い: staged は捨て、ロックだけ外す
            lock(&self.state).release(self.id);
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn injected(what: &str) -> crate::domain::BoxError {
    format!("injected {what} fault").into()
}

/// In-memory outbox table with simulated row locking.
pub struct InMemoryRecordStore {
    state: Arc<Mutex<State>>,
    policy: ClaimPolicy,
    clock: Arc<dyn Clock>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::with_policy(ClaimPolicy::default())
    }

    pub fn with_policy(policy: ClaimPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            policy,
            clock: Arc::new(SystemClock),
        }
    }

    /// `published_at` を打つ時計を差し替える
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Insert (or replace) a committed row, as a producer would.
    pub fn insert(&self, record: OutboxRecord) {
        let mut state = lock(&self.state);
        match state.rows.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => state.rows.push(record),
        }
    }

    pub fn get(&self, id: &RecordId) -> Option<OutboxRecord> {
        lock(&self.state).rows.iter().find(|r| &r.id == id).cloned()
    }

    /// Committed rows in insertion order.
    pub fn snapshot(&self) -> Vec<OutboxRecord> {
        lock(&self.state).rows.clone()
    }

    /// Number of rows currently locked by open transactions.
    pub fn locked_count(&self) -> usize {
        lock(&self.state).locks.len()
    }

    pub fn inject(&self, fault: StoreFault) {
        lock(&self.state).faults.insert(fault);
    }

    fn finish(&self, tx: &mut InMemoryTx) {
        tx.finished = true;
        lock(&self.state).release(tx.id);
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        let mut state = lock(&self.state);
        if state.take_fault(StoreFault::Begin) {
            return Err(StoreError::Begin(injected("begin")));
        }
        state.next_tx += 1;
        Ok(InMemoryTx {
            id: state.next_tx,
            state: Arc::clone(&self.state),
            staged: Vec::new(),
            finished: false,
        })
    }

    async fn commit(&self, mut tx: InMemoryTx) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut tx.staged);
        {
            let mut state = lock(&self.state);
            if state.take_fault(StoreFault::Commit) {
                drop(state);
                self.finish(&mut tx);
                return Err(StoreError::Commit(injected("commit")));
            }

            for write in staged {
                match write {
                    StagedWrite::Published(ids, at) => {
                        for row in state.rows.iter_mut().filter(|r| {
                            ids.contains(&r.id) && r.status.can_reconcile_to(RecordStatus::Published)
                        }) {
                            row.mark_published(at);
                        }
                    }
                    StagedWrite::Failed(ids) => {
                        for row in state.rows.iter_mut().filter(|r| {
                            ids.contains(&r.id) && r.status.can_reconcile_to(RecordStatus::Failed)
                        }) {
                            row.mark_failed();
                        }
                    }
                    StagedWrite::Requeued(ids) => {
                        for row in state.rows.iter_mut().filter(|r| ids.contains(&r.id)) {
                            row.requeue();
                        }
                    }
                }
            }
        }
        self.finish(&mut tx);
        Ok(())
    }

    async fn rollback(&self, mut tx: InMemoryTx) -> Result<(), StoreError> {
        tx.staged.clear();
        let fault = lock(&self.state).take_fault(StoreFault::Rollback);
        // rollback が失敗してもロックは接続断で外れる
        self.finish(&mut tx);
        if fault {
            return Err(StoreError::Rollback(injected("rollback")));
        }
        Ok(())
    }

    async fn claim_batch(
        &self,
        tx: &mut InMemoryTx,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let mut state = lock(&self.state);
        if state.take_fault(StoreFault::Claim) {
            return Err(StoreError::Claim(injected("claim")));
        }

        let mut candidates: Vec<OutboxRecord> = state
            .rows
            .iter()
            .filter(|r| self.policy.is_claimable(r.status))
            .filter(|r| match state.locks.get(&r.id) {
                None => true,
                Some(owner) => *owner == tx.id,
            })
            .cloned()
            .collect();
        // pending が先、failed の再試行は後。各グループ内は created_at 順（同じなら挿入順）
        candidates.sort_by_key(|r| (r.status == RecordStatus::Failed, r.created_at));
        candidates.truncate(limit);

        for record in &candidates {
            state.locks.insert(record.id.clone(), tx.id);
        }
        Ok(candidates)
    }

    async fn mark_published(
        &self,
        tx: &mut InMemoryTx,
        ids: &[RecordId],
    ) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let (crash, fault) = {
            let mut state = lock(&self.state);
            (
                state.take_fault(StoreFault::CrashOnWriteBack),
                state.take_fault(StoreFault::MarkPublished),
            )
        };
        if crash {
            panic!("simulated worker crash during write-back");
        }
        if fault {
            return Err(StoreError::WriteBack {
                status: RecordStatus::Published,
                source: injected("mark published"),
            });
        }
        tx.staged
            .push(StagedWrite::Published(ids.to_vec(), self.clock.now()));
        Ok(())
    }

    async fn mark_failed(&self, tx: &mut InMemoryTx, ids: &[RecordId]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        if lock(&self.state).take_fault(StoreFault::MarkFailed) {
            return Err(StoreError::WriteBack {
                status: RecordStatus::Failed,
                source: injected("mark failed"),
            });
        }
        tx.staged.push(StagedWrite::Failed(ids.to_vec()));
        Ok(())
    }

    async fn requeue_failed(
        &self,
        tx: &mut InMemoryTx,
        ids: Option<&[RecordId]>,
    ) -> Result<u64, StoreError> {
        let mut state = lock(&self.state);
        let matched: Vec<RecordId> = state
            .rows
            .iter()
            .filter(|r| r.status == RecordStatus::Failed)
            .filter(|r| ids.is_none_or(|ids| ids.contains(&r.id)))
            .filter(|r| state.locks.get(&r.id).is_none_or(|owner| *owner == tx.id))
            .map(|r| r.id.clone())
            .collect();

        for id in &matched {
            state.locks.insert(id.clone(), tx.id);
        }
        let count = matched.len() as u64;
        drop(state);

        if !matched.is_empty() {
            tx.staged.push(StagedWrite::Requeued(matched));
        }
        Ok(count)
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let state = lock(&self.state);
        let mut counts = StatusCounts::default();
        for row in &state.rows {
            counts.add(row.status, 1);
        }
        Ok(counts)
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::{LedgerStore, UnitOfWork};
use crate::error::{AppError, Result};
use crate::models::{
    CancellationFilter, CancellationRequest, CancellationStatus, SortOrder, TransactionFilter,
    TransactionRecord, TransactionStatus, Wallet, WalletFilter, WalletSortField,
};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct State {
    wallets: HashMap<Uuid, Wallet>,
    transactions: HashMap<Uuid, TransactionRecord>,
    requests: HashMap<Uuid, CancellationRequest>,
}

/// Per-record async mutexes. Entries exist only while some unit of work holds or awaits them.
type LockRegistry = Arc<std::sync::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

fn registry(locks: &LockRegistry) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<Mutex<()>>>> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drops registry entries for `ids` that no unit of work holds or awaits.
fn forget_idle(locks: &LockRegistry, ids: impl IntoIterator<Item = Uuid>) {
    let mut registry = registry(locks);
    for id in ids {
        if registry.get(&id).is_some_and(|m| Arc::strong_count(m) == 1) {
            registry.remove(&id);
        }
    }
}

/// A thread-safe in-process ledger store.
///
/// Committed records live behind one `RwLock`. Each unit of work takes per-record async
/// mutexes, stages its writes privately and applies them under the write lock on commit.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<State>>,
    locks: LockRegistry,
    lock_timeout: Duration,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl InMemoryLedgerStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
            lock_timeout,
        }
    }

    /// Rewrites the creation time of a committed transaction, e.g. to age a record past the
    /// cancellation window. Returns false if the transaction does not exist.
    pub async fn backdate_transaction(&self, id: Uuid, created_at: DateTime<Utc>) -> bool {
        let mut state = self.state.write().await;
        match state.transactions.get_mut(&id) {
            Some(tx) => {
                tx.created_at = created_at;
                true
            }
            None => false,
        }
    }

    pub async fn wallet_count(&self) -> usize {
        self.state.read().await.wallets.len()
    }

    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }

    /// Number of record locks currently tracked.
    pub fn tracked_locks(&self) -> usize {
        registry(&self.locks).len()
    }
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Asc => ordering,
        SortOrder::Desc => ordering.reverse(),
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(InMemoryUnitOfWork {
            state: Arc::clone(&self.state),
            locks: Arc::clone(&self.locks),
            lock_timeout: self.lock_timeout,
            held: HashMap::new(),
            wallets: HashMap::new(),
            transactions: HashMap::new(),
            requests: HashMap::new(),
        }))
    }

    async fn find_wallet(&self, id: Uuid) -> Result<Option<Wallet>> {
        let state = self.state.read().await;
        Ok(state.wallets.get(&id).cloned())
    }

    async fn list_wallets(&self, filter: &WalletFilter) -> Result<(Vec<Wallet>, u64)> {
        let state = self.state.read().await;
        let mut wallets: Vec<Wallet> = state
            .wallets
            .values()
            .filter(|w| filter.user_id.map_or(true, |u| w.user_id == u))
            .filter(|w| filter.currency.map_or(true, |c| w.currency == c))
            .filter(|w| filter.min_balance.map_or(true, |min| w.balance >= min))
            .filter(|w| filter.max_balance.map_or(true, |max| w.balance <= max))
            .cloned()
            .collect();

        wallets.sort_by(|a, b| {
            let ordering = match filter.sort_by {
                WalletSortField::CreatedAt => a.created_at.cmp(&b.created_at),
                WalletSortField::Balance => a.balance.cmp(&b.balance),
            };
            directed(ordering, filter.order).then(a.id.cmp(&b.id))
        });

        let total = wallets.len() as u64;
        Ok((filter.pagination.slice(wallets), total))
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<TransactionRecord>> {
        let state = self.state.read().await;
        Ok(state.transactions.get(&id).cloned())
    }

    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<(Vec<TransactionRecord>, u64)> {
        let state = self.state.read().await;
        let mut transactions: Vec<TransactionRecord> = state
            .transactions
            .values()
            .filter(|t| t.wallet_id == wallet_id)
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.transaction_type.map_or(true, |ty| t.transaction_type == ty))
            .cloned()
            .collect();

        transactions.sort_by(|a, b| directed((a.created_at, a.id).cmp(&(b.created_at, b.id)), filter.order));

        let total = transactions.len() as u64;
        Ok((filter.pagination.slice(transactions), total))
    }

    async fn completed_balance(&self, wallet_id: Uuid) -> Result<Decimal> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| t.wallet_id == wallet_id && t.status.contributes_to_balance())
            .map(TransactionRecord::signed_amount)
            .sum())
    }

    async fn find_cancellation_request(&self, id: Uuid) -> Result<Option<CancellationRequest>> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id).cloned())
    }

    async fn list_cancellation_requests(
        &self,
        filter: &CancellationFilter,
    ) -> Result<(Vec<CancellationRequest>, u64)> {
        let state = self.state.read().await;
        let mut requests: Vec<CancellationRequest> = state
            .requests
            .values()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.priority.map_or(true, |p| r.priority == p))
            .cloned()
            .collect();

        requests.sort_by(|a, b| directed((a.created_at, a.id).cmp(&(b.created_at, b.id)), filter.order));

        let total = requests.len() as u64;
        Ok((filter.pagination.slice(requests), total))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Unit of work over [`InMemoryLedgerStore`]. Dropping it releases its locks and discards
/// staged writes.
pub struct InMemoryUnitOfWork {
    state: Arc<RwLock<State>>,
    locks: LockRegistry,
    lock_timeout: Duration,
    held: HashMap<Uuid, OwnedMutexGuard<()>>,
    /// `None` marks a staged delete.
    wallets: HashMap<Uuid, Option<Wallet>>,
    transactions: HashMap<Uuid, TransactionRecord>,
    requests: HashMap<Uuid, CancellationRequest>,
}

impl InMemoryUnitOfWork {
    async fn acquire(&mut self, id: Uuid) -> Result<()> {
        if self.held.contains_key(&id) {
            return Ok(());
        }

        let mutex = Arc::clone(registry(&self.locks).entry(id).or_default());

        match tokio::time::timeout(self.lock_timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                self.held.insert(id, guard);
                Ok(())
            }
            Err(_) => {
                forget_idle(&self.locks, [id]);
                Err(AppError::LockTimeout(id))
            }
        }
    }

    fn release(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let ids: Vec<Uuid> = self.held.drain().map(|(id, _guard)| id).collect();
        forget_idle(&self.locks, ids);
    }

    async fn current_wallet(&self, id: Uuid) -> Option<Wallet> {
        match self.wallets.get(&id) {
            Some(staged) => staged.clone(),
            None => self.state.read().await.wallets.get(&id).cloned(),
        }
    }

    async fn current_transaction(&self, id: Uuid) -> Option<TransactionRecord> {
        match self.transactions.get(&id) {
            Some(staged) => Some(staged.clone()),
            None => self.state.read().await.transactions.get(&id).cloned(),
        }
    }

    async fn current_request(&self, id: Uuid) -> Option<CancellationRequest> {
        match self.requests.get(&id) {
            Some(staged) => Some(staged.clone()),
            None => self.state.read().await.requests.get(&id).cloned(),
        }
    }

    /// Committed transactions of a wallet overlaid with this unit's staged ones.
    async fn wallet_transactions(&self, wallet_id: Uuid) -> Vec<TransactionRecord> {
        let state = self.state.read().await;
        let mut merged: HashMap<Uuid, TransactionRecord> = state
            .transactions
            .values()
            .filter(|t| t.wallet_id == wallet_id)
            .map(|t| (t.id, t.clone()))
            .collect();

        for tx in self.transactions.values().filter(|t| t.wallet_id == wallet_id) {
            merged.insert(tx.id, tx.clone());
        }

        merged.into_values().collect()
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn lock_wallet(&mut self, id: Uuid) -> Result<Option<Wallet>> {
        self.acquire(id).await?;
        Ok(self.current_wallet(id).await)
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        if self.current_wallet(wallet.id).await.is_some() {
            return Err(AppError::Internal(format!("wallet '{}' already exists", wallet.id)));
        }
        self.wallets.insert(wallet.id, Some(wallet.clone()));
        Ok(())
    }

    async fn update_wallet(&mut self, wallet: &Wallet) -> Result<Wallet> {
        let current = self
            .current_wallet(wallet.id)
            .await
            .ok_or(AppError::WalletNotFound(wallet.id))?;

        if current.version != wallet.version {
            return Err(AppError::ConcurrentModification(wallet.id));
        }

        let mut updated = wallet.clone();
        updated.version += 1;
        self.wallets.insert(wallet.id, Some(updated.clone()));
        Ok(updated)
    }

    async fn delete_wallet(&mut self, id: Uuid) -> Result<()> {
        if self.current_wallet(id).await.is_none() {
            return Err(AppError::WalletNotFound(id));
        }
        self.wallets.insert(id, None);
        Ok(())
    }

    async fn count_live_transactions(&mut self, wallet_id: Uuid) -> Result<u64> {
        Ok(self
            .wallet_transactions(wallet_id)
            .await
            .iter()
            .filter(|t| t.status != TransactionStatus::Cancelled)
            .count() as u64)
    }

    async fn outgoing_total_since(&mut self, wallet_id: Uuid, since: DateTime<Utc>) -> Result<Decimal> {
        Ok(self
            .wallet_transactions(wallet_id)
            .await
            .iter()
            .filter(|t| {
                t.status == TransactionStatus::Completed
                    && t.transaction_type.is_outgoing()
                    && t.created_at >= since
            })
            .map(|t| t.amount)
            .sum())
    }

    async fn insert_transaction(&mut self, tx: &TransactionRecord) -> Result<()> {
        if self.current_transaction(tx.id).await.is_some() {
            return Err(AppError::Internal(format!("transaction '{}' already exists", tx.id)));
        }
        self.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn lock_transaction(&mut self, id: Uuid) -> Result<Option<TransactionRecord>> {
        self.acquire(id).await?;
        Ok(self.current_transaction(id).await)
    }

    async fn update_transaction(&mut self, tx: &TransactionRecord) -> Result<()> {
        let mut current = self
            .current_transaction(tx.id)
            .await
            .ok_or(AppError::TransactionNotFound(tx.id))?;

        current.status = tx.status;
        current.reason = tx.reason.clone();
        current.cancel_request_id = tx.cancel_request_id;
        current.updated_at = tx.updated_at;
        self.transactions.insert(tx.id, current);
        Ok(())
    }

    async fn insert_cancellation_request(&mut self, request: &CancellationRequest) -> Result<()> {
        if request.is_pending() && self.has_pending_cancellation(request.transaction_id).await? {
            return Err(AppError::DuplicateCancellationRequest(request.transaction_id));
        }
        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn lock_cancellation_request(&mut self, id: Uuid) -> Result<Option<CancellationRequest>> {
        self.acquire(id).await?;
        Ok(self.current_request(id).await)
    }

    async fn update_cancellation_request(&mut self, request: &CancellationRequest) -> Result<()> {
        if self.current_request(request.id).await.is_none() {
            return Err(AppError::CancellationRequestNotFound(request.id));
        }
        self.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn has_pending_cancellation(&mut self, transaction_id: Uuid) -> Result<bool> {
        if self
            .requests
            .values()
            .any(|r| r.transaction_id == transaction_id && r.status == CancellationStatus::Pending)
        {
            return Ok(true);
        }

        let state = self.state.read().await;
        Ok(state.requests.values().any(|r| {
            r.transaction_id == transaction_id
                && r.status == CancellationStatus::Pending
                && !self.requests.contains_key(&r.id)
        }))
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let shared = Arc::clone(&self.state);
        let mut state = shared.write().await;

        for (id, wallet) in std::mem::take(&mut self.wallets) {
            match wallet {
                Some(wallet) => {
                    state.wallets.insert(id, wallet);
                }
                None => {
                    state.wallets.remove(&id);
                    let removed: Vec<Uuid> = state
                        .transactions
                        .values()
                        .filter(|t| t.wallet_id == id)
                        .map(|t| t.id)
                        .collect();
                    for tx_id in &removed {
                        state.transactions.remove(tx_id);
                    }
                    state.requests.retain(|_, r| !removed.contains(&r.transaction_id));
                }
            }
        }

        state.transactions.extend(std::mem::take(&mut self.transactions));
        state.requests.extend(std::mem::take(&mut self.requests));

        drop(state);
        self.release();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        self.release();
    }
}

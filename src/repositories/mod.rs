pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::{PgLedgerStore, PgUnitOfWork};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    CancellationFilter, CancellationRequest, TransactionFilter, TransactionRecord, Wallet,
    WalletFilter,
};

/// Entry point to wallet, transaction and cancellation storage.
///
/// Reads on the store itself take no locks and see only committed data. Every mutation goes
/// through a [`UnitOfWork`] obtained from [`LedgerStore::begin`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a new isolated unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    async fn find_wallet(&self, id: Uuid) -> Result<Option<Wallet>>;

    /// Returns one page of wallets and the unpaged total.
    async fn list_wallets(&self, filter: &WalletFilter) -> Result<(Vec<Wallet>, u64)>;

    async fn find_transaction(&self, id: Uuid) -> Result<Option<TransactionRecord>>;

    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<(Vec<TransactionRecord>, u64)>;

    /// Sum of signed amounts of the wallet's completed transactions.
    async fn completed_balance(&self, wallet_id: Uuid) -> Result<Decimal>;

    async fn find_cancellation_request(&self, id: Uuid) -> Result<Option<CancellationRequest>>;

    async fn list_cancellation_requests(
        &self,
        filter: &CancellationFilter,
    ) -> Result<(Vec<CancellationRequest>, u64)>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}

/// One atomic, isolated unit of work.
///
/// `lock_*` methods take an exclusive lock on the record that is held until the unit commits
/// or rolls back. Callers acquire locks in a fixed order: cancellation requests, then
/// transactions by ascending id, then wallets by ascending id. A lock that cannot be acquired
/// within the configured timeout fails with `AppError::LockTimeout`.
///
/// Writes become visible to other units only after [`UnitOfWork::commit`]. Dropping a unit
/// without committing discards every staged write.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn lock_wallet(&mut self, id: Uuid) -> Result<Option<Wallet>>;

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<()>;

    /// Persists a locked wallet. Fails with `ConcurrentModification` if the stored version no
    /// longer matches `wallet.version`. Returns the wallet with its bumped version.
    async fn update_wallet(&mut self, wallet: &Wallet) -> Result<Wallet>;

    /// Removes a locked wallet together with its remaining transaction history.
    async fn delete_wallet(&mut self, id: Uuid) -> Result<()>;

    /// Number of transactions on the wallet that are not cancelled.
    async fn count_live_transactions(&mut self, wallet_id: Uuid) -> Result<u64>;

    /// Total of completed withdrawals and outgoing transfers created at or after `since`.
    async fn outgoing_total_since(&mut self, wallet_id: Uuid, since: DateTime<Utc>) -> Result<Decimal>;

    async fn insert_transaction(&mut self, tx: &TransactionRecord) -> Result<()>;

    async fn lock_transaction(&mut self, id: Uuid) -> Result<Option<TransactionRecord>>;

    async fn update_transaction(&mut self, tx: &TransactionRecord) -> Result<()>;

    async fn insert_cancellation_request(&mut self, request: &CancellationRequest) -> Result<()>;

    async fn lock_cancellation_request(&mut self, id: Uuid) -> Result<Option<CancellationRequest>>;

    async fn update_cancellation_request(&mut self, request: &CancellationRequest) -> Result<()>;

    /// Returns true if a pending request already targets the transaction.
    async fn has_pending_cancellation(&mut self, transaction_id: Uuid) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Commits the unit if `outcome` succeeded, otherwise rolls it back and returns the original
/// error.
pub async fn finish<T>(uow: Box<dyn UnitOfWork>, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = uow.rollback().await {
                warn!(error = %rollback_error, "Rollback failed after: {}", e);
            }
            Err(e)
        }
    }
}

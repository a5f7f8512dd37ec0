use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use super::{LedgerStore, UnitOfWork};
use crate::error::{AppError, Result};
use crate::models::{
    AdminDecision, AdminResponse, CancellationFilter, CancellationPriority, CancellationRequest,
    CancellationStatus, SortOrder, TransactionFilter, TransactionRecord, Wallet, WalletFilter,
    WalletSortField,
};

const WALLET_COLUMNS: &str = "id, user_id, balance, currency, status, pin_hash, daily_limit, \
     monthly_limit, version, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, wallet_id, type, amount, currency, description, \
     counterparty_wallet_id, linked_transaction_id, balance_after, status, reason, \
     cancel_request_id, created_at, updated_at";

const REQUEST_COLUMNS: &str = "id, transaction_id, requester_id, reason, status, priority, \
     admin_id, admin_decision, admin_reason, processed_at, created_at, updated_at";

/// Maps lock_not_available and deadlock_detected to a retryable lock timeout.
fn lock_error(id: Uuid) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| {
        let contended = matches!(
            &e,
            sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("55P03") | Some("40P01"))
        );
        if contended {
            AppError::LockTimeout(id)
        } else {
            AppError::Database(e)
        }
    }
}

fn order_sql(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    }
}

#[derive(Debug, FromRow)]
struct CancellationRequestRow {
    id: Uuid,
    transaction_id: Uuid,
    requester_id: Uuid,
    reason: String,
    status: CancellationStatus,
    priority: CancellationPriority,
    admin_id: Option<Uuid>,
    admin_decision: Option<AdminDecision>,
    admin_reason: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CancellationRequestRow> for CancellationRequest {
    fn from(row: CancellationRequestRow) -> Self {
        let admin_response = match (row.admin_id, row.admin_decision, row.processed_at) {
            (Some(admin_id), Some(decision), Some(processed_at)) => Some(AdminResponse {
                admin_id,
                decision,
                reason: row.admin_reason.unwrap_or_default(),
                processed_at,
            }),
            _ => None,
        };

        Self {
            id: row.id,
            transaction_id: row.transaction_id,
            requester_id: row.requester_id,
            reason: row.reason,
            status: row.status,
            priority: row.priority,
            admin_response,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL-backed ledger storage using row-level locks.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let mut tx = self.pool.begin().await.map_err(AppError::Database)?;

        // SET cannot take bind parameters.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn find_wallet(&self, id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE id = $1",
            WALLET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    async fn list_wallets(&self, filter: &WalletFilter) -> Result<(Vec<Wallet>, u64)> {
        const WHERE: &str = r#"
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::currency_code IS NULL OR currency = $2)
              AND ($3::numeric IS NULL OR balance >= $3)
              AND ($4::numeric IS NULL OR balance <= $4)
        "#;

        let sort_column = match filter.sort_by {
            WalletSortField::CreatedAt => "created_at",
            WalletSortField::Balance => "balance",
        };

        let rows = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets {} ORDER BY {} {}, id LIMIT $5 OFFSET $6",
            WALLET_COLUMNS,
            WHERE,
            sort_column,
            order_sql(filter.order)
        ))
        .bind(filter.user_id)
        .bind(filter.currency)
        .bind(filter.min_balance)
        .bind(filter.max_balance)
        .bind(filter.pagination.limit() as i64)
        .bind(i64::try_from(filter.pagination.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM wallets {}", WHERE))
            .bind(filter.user_id)
            .bind(filter.currency)
            .bind(filter.min_balance)
            .bind(filter.max_balance)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok((rows, total as u64))
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<(Vec<TransactionRecord>, u64)> {
        const WHERE: &str = r#"
            WHERE wallet_id = $1
              AND ($2::transaction_status IS NULL OR status = $2)
              AND ($3::transaction_type IS NULL OR type = $3)
        "#;

        let rows = sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {} FROM transactions {} ORDER BY created_at {}, id LIMIT $4 OFFSET $5",
            TRANSACTION_COLUMNS,
            WHERE,
            order_sql(filter.order)
        ))
        .bind(wallet_id)
        .bind(filter.status)
        .bind(filter.transaction_type)
        .bind(filter.pagination.limit() as i64)
        .bind(i64::try_from(filter.pagination.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM transactions {}", WHERE))
            .bind(wallet_id)
            .bind(filter.status)
            .bind(filter.transaction_type)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)?;

        Ok((rows, total as u64))
    }

    async fn completed_balance(&self, wallet_id: Uuid) -> Result<Decimal> {
        let sum: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(
                CASE WHEN type IN ('deposit', 'transfer_in') THEN amount ELSE -amount END
            ), 0)
            FROM transactions
            WHERE wallet_id = $1 AND status = 'completed'
            "#,
        )
        .bind(wallet_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(sum)
    }

    async fn find_cancellation_request(&self, id: Uuid) -> Result<Option<CancellationRequest>> {
        let row = sqlx::query_as::<_, CancellationRequestRow>(&format!(
            "SELECT {} FROM cancellation_requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.map(Into::into))
    }

    async fn list_cancellation_requests(
        &self,
        filter: &CancellationFilter,
    ) -> Result<(Vec<CancellationRequest>, u64)> {
        const WHERE: &str = r#"
            WHERE ($1::cancellation_status IS NULL OR status = $1)
              AND ($2::cancellation_priority IS NULL OR priority = $2)
        "#;

        let rows = sqlx::query_as::<_, CancellationRequestRow>(&format!(
            "SELECT {} FROM cancellation_requests {} ORDER BY created_at {}, id LIMIT $3 OFFSET $4",
            REQUEST_COLUMNS,
            WHERE,
            order_sql(filter.order)
        ))
        .bind(filter.status)
        .bind(filter.priority)
        .bind(filter.pagination.limit() as i64)
        .bind(i64::try_from(filter.pagination.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM cancellation_requests {}", WHERE))
                .bind(filter.status)
                .bind(filter.priority)
                .fetch_one(&self.pool)
                .await
                .map_err(AppError::Database)?;

        Ok((rows.into_iter().map(Into::into).collect(), total as u64))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// A single database transaction with `lock_timeout` applied.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_wallet(&mut self, id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE id = $1 FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(lock_error(id))?;

        Ok(row)
    }

    async fn insert_wallet(&mut self, wallet: &Wallet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, user_id, balance, currency, status, pin_hash, daily_limit,
                                 monthly_limit, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.user_id)
        .bind(wallet.balance)
        .bind(wallet.currency)
        .bind(wallet.status)
        .bind(&wallet.pin_hash)
        .bind(wallet.daily_limit)
        .bind(wallet.monthly_limit)
        .bind(wallet.version)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    async fn update_wallet(&mut self, wallet: &Wallet) -> Result<Wallet> {
        let row = sqlx::query_as::<_, Wallet>(&format!(
            r#"
            UPDATE wallets
            SET balance = $2, status = $3, pin_hash = $4, daily_limit = $5, monthly_limit = $6,
                version = version + 1, updated_at = $7
            WHERE id = $1 AND version = $8
            RETURNING {}
            "#,
            WALLET_COLUMNS
        ))
        .bind(wallet.id)
        .bind(wallet.balance)
        .bind(wallet.status)
        .bind(&wallet.pin_hash)
        .bind(wallet.daily_limit)
        .bind(wallet.monthly_limit)
        .bind(wallet.updated_at)
        .bind(wallet.version)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(lock_error(wallet.id))?;

        row.ok_or(AppError::ConcurrentModification(wallet.id))
    }

    async fn delete_wallet(&mut self, id: Uuid) -> Result<()> {
        // transactions and their requests cascade
        let result = sqlx::query("DELETE FROM wallets WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::WalletNotFound(id));
        }
        Ok(())
    }

    async fn count_live_transactions(&mut self, wallet_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM transactions WHERE wallet_id = $1 AND status <> 'cancelled'",
        )
        .bind(wallet_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(AppError::Database)?;

        Ok(count as u64)
    }

    async fn outgoing_total_since(&mut self, wallet_id: Uuid, since: DateTime<Utc>) -> Result<Decimal> {
        let total: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM transactions
            WHERE wallet_id = $1
              AND status = 'completed'
              AND type IN ('withdraw', 'transfer_out')
              AND created_at >= $2
            "#,
        )
        .bind(wallet_id)
        .bind(since)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(AppError::Database)?;

        Ok(total)
    }

    async fn insert_transaction(&mut self, tx: &TransactionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, wallet_id, type, amount, currency, description,
                                      counterparty_wallet_id, linked_transaction_id, balance_after,
                                      status, reason, cancel_request_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(tx.id)
        .bind(tx.wallet_id)
        .bind(tx.transaction_type)
        .bind(tx.amount)
        .bind(tx.currency)
        .bind(&tx.description)
        .bind(tx.counterparty_wallet_id)
        .bind(tx.linked_transaction_id)
        .bind(tx.balance_after)
        .bind(tx.status)
        .bind(&tx.reason)
        .bind(tx.cancel_request_id)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    async fn lock_transaction(&mut self, id: Uuid) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {} FROM transactions WHERE id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(lock_error(id))?;

        Ok(row)
    }

    async fn update_transaction(&mut self, tx: &TransactionRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, reason = $3, cancel_request_id = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(tx.id)
        .bind(tx.status)
        .bind(&tx.reason)
        .bind(tx.cancel_request_id)
        .bind(tx.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    async fn insert_cancellation_request(&mut self, request: &CancellationRequest) -> Result<()> {
        let admin = request.admin_response.as_ref();

        sqlx::query(
            r#"
            INSERT INTO cancellation_requests (id, transaction_id, requester_id, reason, status,
                                               priority, admin_id, admin_decision, admin_reason,
                                               processed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(request.id)
        .bind(request.transaction_id)
        .bind(request.requester_id)
        .bind(&request.reason)
        .bind(request.status)
        .bind(request.priority)
        .bind(admin.map(|a| a.admin_id))
        .bind(admin.map(|a| a.decision))
        .bind(admin.map(|a| a.reason.clone()))
        .bind(admin.map(|a| a.processed_at))
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            // partial unique index on pending requests per transaction
            let duplicate = matches!(
                &e,
                sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
            );
            if duplicate {
                AppError::DuplicateCancellationRequest(request.transaction_id)
            } else {
                AppError::Database(e)
            }
        })?;

        Ok(())
    }

    async fn lock_cancellation_request(&mut self, id: Uuid) -> Result<Option<CancellationRequest>> {
        let row = sqlx::query_as::<_, CancellationRequestRow>(&format!(
            "SELECT {} FROM cancellation_requests WHERE id = $1 FOR UPDATE",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(lock_error(id))?;

        Ok(row.map(Into::into))
    }

    async fn update_cancellation_request(&mut self, request: &CancellationRequest) -> Result<()> {
        let admin = request.admin_response.as_ref();

        sqlx::query(
            r#"
            UPDATE cancellation_requests
            SET status = $2, admin_id = $3, admin_decision = $4, admin_reason = $5,
                processed_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(request.id)
        .bind(request.status)
        .bind(admin.map(|a| a.admin_id))
        .bind(admin.map(|a| a.decision))
        .bind(admin.map(|a| a.reason.clone()))
        .bind(admin.map(|a| a.processed_at))
        .bind(request.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    async fn has_pending_cancellation(&mut self, transaction_id: Uuid) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM cancellation_requests
                WHERE transaction_id = $1 AND status = 'pending'
            )
            "#,
        )
        .bind(transaction_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(AppError::Database)?;

        Ok(exists)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(AppError::Database)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(AppError::Database)
    }
}

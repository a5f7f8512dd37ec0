use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::LedgerSettings;
use crate::error::{AppError, LimitWindow, Result};
use crate::models::{
    Caller, Page, TransactionFilter, TransactionRecord, TransactionStatus, TransactionView,
    Wallet, WalletSnapshot, MAX_AMOUNT,
};
use crate::observability::{get_metrics, mask_amount, LatencyTimer};
use crate::repositories::{finish, LedgerStore, UnitOfWork};
use crate::services::pin::{validate_pin_format, PinHasher};

/// Smallest unit of every supported currency.
pub const AMOUNT_SCALE: u32 = 2;
pub const MAX_DESCRIPTION_LENGTH: usize = 255;

/// Business rules applied by the ledger and cancellation services.
#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    pub default_daily_limit: Decimal,
    pub default_monthly_limit: Decimal,
    pub enforce_limits: bool,
    pub cancellation_window: Duration,
    pub settlement_window: Duration,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self::from(&LedgerSettings::default())
    }
}

impl From<&LedgerSettings> for LedgerPolicy {
    fn from(settings: &LedgerSettings) -> Self {
        Self {
            default_daily_limit: settings.default_daily_limit,
            default_monthly_limit: settings.default_monthly_limit,
            enforce_limits: settings.enforce_limits,
            cancellation_window: Duration::hours(settings.cancellation_window_hours),
            settlement_window: Duration::hours(settings.settlement_window_hours),
        }
    }
}

/// Transaction state machine for managing status transitions.
#[derive(Debug, Clone)]
pub struct TransactionStateMachine;

impl TransactionStateMachine {
    /// Returns valid next states from the current state.
    pub fn valid_transitions(current: TransactionStatus) -> Vec<TransactionStatus> {
        match current {
            TransactionStatus::Pending => vec![
                TransactionStatus::Completed,
                TransactionStatus::Failed,
                TransactionStatus::Cancelled,
            ],
            TransactionStatus::Completed => vec![TransactionStatus::Cancelled],
            TransactionStatus::Failed => vec![],
            TransactionStatus::Cancelled => vec![],
        }
    }

    pub fn can_transition(from: TransactionStatus, to: TransactionStatus) -> bool {
        Self::valid_transitions(from).contains(&to)
    }

    pub fn transition(from: TransactionStatus, to: TransactionStatus) -> Result<TransactionStatus> {
        if Self::can_transition(from, to) {
            Ok(to)
        } else {
            Err(AppError::Internal(format!(
                "Invalid transaction state transition from {} to {}",
                from, to
            )))
        }
    }
}

/// Checks that an amount is positive, storable, and carries at most two decimal places.
pub fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount("amount must be greater than zero".to_string()));
    }
    if amount > MAX_AMOUNT {
        return Err(AppError::InvalidAmount(format!(
            "amount must not exceed {}",
            MAX_AMOUNT
        )));
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(AppError::InvalidAmount(format!(
            "amount must have at most {} decimal places",
            AMOUNT_SCALE
        )));
    }
    Ok(())
}

fn normalize_description(description: Option<&str>) -> Result<String> {
    let description = description.map(str::trim).unwrap_or_default();
    if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(AppError::Validation(format!(
            "Description must be at most {} characters",
            MAX_DESCRIPTION_LENGTH
        )));
    }
    Ok(description.to_string())
}

pub(crate) fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::default()))
}

pub(crate) fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let first = today.with_day(1).unwrap_or(today);
    Utc.from_utc_datetime(&first.and_time(NaiveTime::default()))
}

/// Result projection of a ledger operation: the created transaction and the caller's wallet
/// after the operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub transaction: TransactionView,
    pub wallet: WalletSnapshot,
}

/// Balance-mutating operations. Each call opens exactly one unit of work.
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    pins: PinHasher,
    policy: LedgerPolicy,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, pins: PinHasher, policy: LedgerPolicy) -> Self {
        Self { store, pins, policy }
    }

    /// Credits `amount` to one of the caller's wallets.
    #[instrument(skip(self, description), fields(user_id = %caller.user_id))]
    pub async fn deposit(
        &self,
        caller: &Caller,
        wallet_id: Uuid,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<LedgerReceipt> {
        let timer = LatencyTimer::new();
        validate_amount(amount)?;
        let description = normalize_description(description)?;

        let mut uow = self.store.begin().await?;
        let outcome = self
            .apply_deposit(uow.as_mut(), caller, wallet_id, amount, description)
            .await;
        let result = finish(uow, outcome).await;

        self.observe("deposit", &result, &timer);
        result
    }

    async fn apply_deposit(
        &self,
        uow: &mut dyn UnitOfWork,
        caller: &Caller,
        wallet_id: Uuid,
        amount: Decimal,
        description: String,
    ) -> Result<LedgerReceipt> {
        let mut wallet = self.lock_owned_wallet(uow, caller, wallet_id).await?;
        ensure_active(&wallet)?;

        wallet.credit(amount)?;
        let tx = TransactionRecord::deposit(wallet.id, amount, wallet.currency, wallet.balance)
            .with_description(description);

        uow.insert_transaction(&tx).await?;
        let wallet = uow.update_wallet(&wallet).await?;

        Ok(LedgerReceipt {
            transaction: tx.view(),
            wallet: wallet.snapshot(),
        })
    }

    /// Debits `amount` from one of the caller's wallets after PIN verification.
    #[instrument(skip(self, pin, description), fields(user_id = %caller.user_id))]
    pub async fn withdraw(
        &self,
        caller: &Caller,
        wallet_id: Uuid,
        amount: Decimal,
        pin: &str,
        description: Option<&str>,
    ) -> Result<LedgerReceipt> {
        let timer = LatencyTimer::new();
        validate_amount(amount)?;
        validate_pin_format(pin)?;
        let description = normalize_description(description)?;

        let mut uow = self.store.begin().await?;
        let outcome = self
            .apply_withdraw(uow.as_mut(), caller, wallet_id, amount, pin, description)
            .await;
        let result = finish(uow, outcome).await;

        self.observe("withdraw", &result, &timer);
        result
    }

    async fn apply_withdraw(
        &self,
        uow: &mut dyn UnitOfWork,
        caller: &Caller,
        wallet_id: Uuid,
        amount: Decimal,
        pin: &str,
        description: String,
    ) -> Result<LedgerReceipt> {
        let mut wallet = self.lock_owned_wallet(uow, caller, wallet_id).await?;
        ensure_active(&wallet)?;
        self.pins.verify(pin, &wallet.pin_hash)?;
        self.check_limits(uow, &wallet, amount, Utc::now()).await?;

        if !wallet.debit(amount) {
            return Err(AppError::InsufficientFunds {
                requested: amount,
                available: wallet.balance,
            });
        }

        let tx = TransactionRecord::withdraw(wallet.id, amount, wallet.currency, wallet.balance)
            .with_description(description);

        uow.insert_transaction(&tx).await?;
        let wallet = uow.update_wallet(&wallet).await?;

        Ok(LedgerReceipt {
            transaction: tx.view(),
            wallet: wallet.snapshot(),
        })
    }

    /// Moves `amount` from the caller's wallet to another wallet of the same currency.
    ///
    /// Both balance changes and both transaction legs commit together or not at all. The
    /// receipt carries the outgoing leg and the sender's wallet.
    #[instrument(skip(self, pin, description), fields(user_id = %caller.user_id))]
    pub async fn transfer(
        &self,
        caller: &Caller,
        sender_wallet_id: Uuid,
        recipient_wallet_id: Uuid,
        amount: Decimal,
        pin: &str,
        description: Option<&str>,
    ) -> Result<LedgerReceipt> {
        let timer = LatencyTimer::new();
        validate_amount(amount)?;
        if sender_wallet_id == recipient_wallet_id {
            return Err(AppError::SelfTransfer);
        }
        validate_pin_format(pin)?;
        let description = normalize_description(description)?;

        let mut uow = self.store.begin().await?;
        let outcome = self
            .apply_transfer(
                uow.as_mut(),
                caller,
                sender_wallet_id,
                recipient_wallet_id,
                amount,
                pin,
                description,
            )
            .await;
        let result = finish(uow, outcome).await;

        self.observe("transfer", &result, &timer);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_transfer(
        &self,
        uow: &mut dyn UnitOfWork,
        caller: &Caller,
        sender_wallet_id: Uuid,
        recipient_wallet_id: Uuid,
        amount: Decimal,
        pin: &str,
        description: String,
    ) -> Result<LedgerReceipt> {
        // lock in ascending id order regardless of direction
        let (first, second) = if sender_wallet_id < recipient_wallet_id {
            (sender_wallet_id, recipient_wallet_id)
        } else {
            (recipient_wallet_id, sender_wallet_id)
        };
        let first_wallet = uow.lock_wallet(first).await?;
        let second_wallet = uow.lock_wallet(second).await?;
        let (sender, recipient) = if first == sender_wallet_id {
            (first_wallet, second_wallet)
        } else {
            (second_wallet, first_wallet)
        };

        let mut sender = sender
            .filter(|w| w.is_owned_by(caller.user_id))
            .ok_or(AppError::WalletNotFound(sender_wallet_id))?;
        let mut recipient = recipient.ok_or(AppError::RecipientNotFound(recipient_wallet_id))?;

        ensure_active(&sender)?;
        self.pins.verify(pin, &sender.pin_hash)?;

        if !recipient.can_transact() {
            return Err(AppError::RecipientNotActive {
                id: recipient.id,
                status: recipient.status,
            });
        }
        if sender.currency != recipient.currency {
            return Err(AppError::CurrencyMismatch {
                sender: sender.currency,
                recipient: recipient.currency,
            });
        }

        self.check_limits(uow, &sender, amount, Utc::now()).await?;

        if !sender.debit(amount) {
            return Err(AppError::InsufficientFunds {
                requested: amount,
                available: sender.balance,
            });
        }
        recipient.credit(amount)?;

        let (mut outgoing, mut incoming) = TransactionRecord::transfer_pair(
            sender.id,
            recipient.id,
            amount,
            sender.currency,
            sender.balance,
            recipient.balance,
        );
        outgoing.description = description.clone();
        incoming.description = description;

        uow.insert_transaction(&outgoing).await?;
        uow.insert_transaction(&incoming).await?;

        let sender = uow.update_wallet(&sender).await?;
        uow.update_wallet(&recipient).await?;

        for leg in [&mut outgoing, &mut incoming] {
            TransactionStateMachine::transition(leg.status, TransactionStatus::Completed)?;
            leg.complete();
            uow.update_transaction(leg).await?;
        }

        info!(
            sender = %sender.id,
            recipient = %recipient.id,
            amount = %mask_amount(&amount),
            "Transfer completed"
        );

        Ok(LedgerReceipt {
            transaction: outgoing.view(),
            wallet: sender.snapshot(),
        })
    }

    /// Returns one page of a wallet's transactions. Admins may read any wallet.
    pub async fn transaction_history(
        &self,
        caller: &Caller,
        wallet_id: Uuid,
        filter: TransactionFilter,
    ) -> Result<Page<TransactionView>> {
        self.find_visible_wallet(caller, wallet_id).await?;

        let (items, total) = self.store.list_transactions(wallet_id, &filter).await?;
        Ok(Page::new(items, total, filter.pagination).map(TransactionView::from))
    }

    pub async fn get_transaction(&self, caller: &Caller, transaction_id: Uuid) -> Result<TransactionView> {
        let tx = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or(AppError::TransactionNotFound(transaction_id))?;

        self.find_visible_wallet(caller, tx.wallet_id)
            .await
            .map_err(|_| AppError::TransactionNotFound(transaction_id))?;

        Ok(tx.view())
    }

    /// Rejects the operation if completed outgoing amounts plus `amount` would exceed the
    /// wallet's daily or monthly limit.
    async fn check_limits(
        &self,
        uow: &mut dyn UnitOfWork,
        wallet: &Wallet,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.policy.enforce_limits {
            return Ok(());
        }

        let today = uow.outgoing_total_since(wallet.id, start_of_day(now)).await?;
        if today + amount > wallet.daily_limit {
            return Err(AppError::LimitExceeded {
                wallet_id: wallet.id,
                window: LimitWindow::Daily,
                limit: wallet.daily_limit,
            });
        }

        let this_month = uow.outgoing_total_since(wallet.id, start_of_month(now)).await?;
        if this_month + amount > wallet.monthly_limit {
            return Err(AppError::LimitExceeded {
                wallet_id: wallet.id,
                window: LimitWindow::Monthly,
                limit: wallet.monthly_limit,
            });
        }

        Ok(())
    }

    async fn lock_owned_wallet(
        &self,
        uow: &mut dyn UnitOfWork,
        caller: &Caller,
        wallet_id: Uuid,
    ) -> Result<Wallet> {
        uow.lock_wallet(wallet_id)
            .await?
            .filter(|w| w.is_owned_by(caller.user_id))
            .ok_or(AppError::WalletNotFound(wallet_id))
    }

    async fn find_visible_wallet(&self, caller: &Caller, wallet_id: Uuid) -> Result<Wallet> {
        self.store
            .find_wallet(wallet_id)
            .await?
            .filter(|w| caller.is_admin() || w.is_owned_by(caller.user_id))
            .ok_or(AppError::WalletNotFound(wallet_id))
    }

    fn observe<T>(&self, operation: &str, result: &Result<T>, timer: &LatencyTimer) {
        let metrics = get_metrics();
        metrics.record_ledger_latency(operation, timer.elapsed_ms());

        match result {
            Ok(_) => metrics.record_ledger_operation(operation, "all"),
            Err(e) => {
                metrics.record_ledger_failure(operation, e.kind().code());
                if matches!(e, AppError::LockTimeout(_)) {
                    metrics.record_lock_timeout(operation);
                }
                if e.kind().is_retryable() {
                    warn!(operation, error = %e, "Ledger operation aborted");
                }
            }
        }
    }
}

fn ensure_active(wallet: &Wallet) -> Result<()> {
    if !wallet.can_transact() {
        return Err(AppError::WalletNotActive {
            id: wallet.id,
            status: wallet.status,
        });
    }
    Ok(())
}

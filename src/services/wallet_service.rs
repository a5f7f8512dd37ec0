use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Caller, Currency, Page, Wallet, WalletFilter, WalletStatus};
use crate::observability::get_metrics;
use crate::repositories::{finish, LedgerStore, UnitOfWork};
use crate::services::ledger_service::LedgerPolicy;
use crate::services::pin::{validate_pin_format, PinHasher};

/// Stored balance compared with the balance implied by completed transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub wallet_id: Uuid,
    pub stored_balance: Decimal,
    pub computed_balance: Decimal,
    pub consistent: bool,
}

/// Service for wallet lifecycle operations.
#[derive(Clone)]
pub struct WalletService {
    store: Arc<dyn LedgerStore>,
    pins: PinHasher,
    policy: LedgerPolicy,
}

impl WalletService {
    pub fn new(store: Arc<dyn LedgerStore>, pins: PinHasher, policy: LedgerPolicy) -> Self {
        Self { store, pins, policy }
    }

    /// Opens a new active wallet for the caller with the configured default limits.
    #[instrument(skip(self, pin), fields(user_id = %caller.user_id))]
    pub async fn create_wallet(&self, caller: &Caller, pin: &str, currency: &str) -> Result<Wallet> {
        let currency: Currency = currency
            .parse()
            .map_err(|_| AppError::InvalidCurrency(currency.to_string()))?;
        let pin_hash = self.pins.hash(pin)?;

        let wallet = Wallet::new(caller.user_id, currency, pin_hash)
            .with_limits(self.policy.default_daily_limit, self.policy.default_monthly_limit);

        let mut uow = self.store.begin().await?;
        let outcome = uow.insert_wallet(&wallet).await;
        finish(uow, outcome).await?;

        get_metrics().record_wallet_created(&currency.to_string());
        info!(wallet_id = %wallet.id, currency = %currency, "Wallet created");

        Ok(wallet)
    }

    /// Finds a wallet visible to the caller. Other users' wallets are reported as missing.
    pub async fn get_wallet(&self, caller: &Caller, wallet_id: Uuid) -> Result<Wallet> {
        self.store
            .find_wallet(wallet_id)
            .await?
            .filter(|w| caller.is_admin() || w.is_owned_by(caller.user_id))
            .ok_or(AppError::WalletNotFound(wallet_id))
    }

    /// Lists wallets. Users only ever see their own; admins may filter by any owner or none.
    pub async fn list_wallets(&self, caller: &Caller, mut filter: WalletFilter) -> Result<Page<Wallet>> {
        if !caller.is_admin() {
            filter.user_id = Some(caller.user_id);
        }

        if let (Some(min), Some(max)) = (filter.min_balance, filter.max_balance) {
            if min > max {
                return Err(AppError::Validation(
                    "min_balance cannot exceed max_balance".to_string(),
                ));
            }
        }

        let (items, total) = self.store.list_wallets(&filter).await?;
        Ok(Page::new(items, total, filter.pagination))
    }

    /// Replaces the wallet's PIN after verifying the current one.
    #[instrument(skip(self, current_pin, new_pin), fields(user_id = %caller.user_id))]
    pub async fn change_pin(
        &self,
        caller: &Caller,
        wallet_id: Uuid,
        current_pin: &str,
        new_pin: &str,
    ) -> Result<()> {
        validate_pin_format(current_pin)?;
        validate_pin_format(new_pin)?;

        let mut uow = self.store.begin().await?;
        let outcome = self
            .apply_change_pin(uow.as_mut(), caller, wallet_id, current_pin, new_pin)
            .await;
        finish(uow, outcome).await?;

        info!(wallet_id = %wallet_id, "Wallet PIN changed");
        Ok(())
    }

    async fn apply_change_pin(
        &self,
        uow: &mut dyn UnitOfWork,
        caller: &Caller,
        wallet_id: Uuid,
        current_pin: &str,
        new_pin: &str,
    ) -> Result<()> {
        let mut wallet = lock_owned(uow, caller, wallet_id).await?;
        self.pins.verify(current_pin, &wallet.pin_hash)?;

        wallet.pin_hash = self.pins.hash(new_pin)?;
        uow.update_wallet(&wallet).await?;
        Ok(())
    }

    /// Moves a wallet between active, suspended and frozen. Admin only.
    #[instrument(skip(self), fields(admin_id = %caller.user_id))]
    pub async fn set_status(&self, caller: &Caller, wallet_id: Uuid, status: WalletStatus) -> Result<Wallet> {
        if !caller.is_admin() {
            return Err(AppError::AdminRequired);
        }

        let mut uow = self.store.begin().await?;
        let outcome = apply_set_status(uow.as_mut(), wallet_id, status).await;
        let wallet = finish(uow, outcome).await?;

        info!(wallet_id = %wallet.id, status = %wallet.status, "Wallet status changed");
        Ok(wallet)
    }

    /// Hard-deletes an empty wallet owned by the caller.
    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn delete_wallet(&self, caller: &Caller, wallet_id: Uuid) -> Result<()> {
        let mut uow = self.store.begin().await?;
        let outcome = apply_delete(uow.as_mut(), caller, wallet_id).await;
        finish(uow, outcome).await?;

        info!(wallet_id = %wallet_id, "Wallet deleted");
        Ok(())
    }

    /// Recomputes the balance from completed transactions and compares it with the stored one.
    pub async fn reconcile(&self, caller: &Caller, wallet_id: Uuid) -> Result<ReconciliationReport> {
        let wallet = self.get_wallet(caller, wallet_id).await?;
        let computed_balance = self.store.completed_balance(wallet_id).await?;

        let report = ReconciliationReport {
            wallet_id,
            stored_balance: wallet.balance,
            computed_balance,
            consistent: wallet.balance == computed_balance,
        };

        if !report.consistent {
            warn!(
                wallet_id = %wallet_id,
                stored = %report.stored_balance,
                computed = %report.computed_balance,
                "Wallet balance does not match its history"
            );
        }

        Ok(report)
    }
}

async fn lock_owned(uow: &mut dyn UnitOfWork, caller: &Caller, wallet_id: Uuid) -> Result<Wallet> {
    uow.lock_wallet(wallet_id)
        .await?
        .filter(|w| w.is_owned_by(caller.user_id))
        .ok_or(AppError::WalletNotFound(wallet_id))
}

async fn apply_set_status(uow: &mut dyn UnitOfWork, wallet_id: Uuid, status: WalletStatus) -> Result<Wallet> {
    let mut wallet = uow
        .lock_wallet(wallet_id)
        .await?
        .ok_or(AppError::WalletNotFound(wallet_id))?;

    wallet.set_status(status);
    uow.update_wallet(&wallet).await
}

async fn apply_delete(uow: &mut dyn UnitOfWork, caller: &Caller, wallet_id: Uuid) -> Result<()> {
    let wallet = lock_owned(uow, caller, wallet_id).await?;

    if wallet.balance != Decimal::ZERO {
        return Err(AppError::WalletInUse(wallet_id));
    }
    if uow.count_live_transactions(wallet_id).await? > 0 {
        return Err(AppError::WalletInUse(wallet_id));
    }

    uow.delete_wallet(wallet_id).await
}

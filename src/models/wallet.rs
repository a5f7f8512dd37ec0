use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use super::Currency;
use crate::error::{AppError, Result};

/// Largest value a NUMERIC(20,2) column holds: 999999999999999999.99.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x630F_FFFF, 0x6BC7_5E2D, 0x5, false, 2);

pub const DEFAULT_DAILY_LIMIT: i64 = 10_000;
pub const DEFAULT_MONTHLY_LIMIT: i64 = 100_000;

/// Wallet status indicating whether the wallet may take part in ledger operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "wallet_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    /// Wallet can send and receive funds.
    Active,
    /// Wallet is temporarily blocked by an operator.
    Suspended,
    /// Wallet is frozen, typically pending an investigation.
    Frozen,
}

impl WalletStatus {
    /// Returns true if the wallet can participate in deposits, withdrawals and transfers.
    pub fn is_operational(&self) -> bool {
        matches!(self, WalletStatus::Active)
    }
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletStatus::Active => f.write_str("active"),
            WalletStatus::Suspended => f.write_str("suspended"),
            WalletStatus::Frozen => f.write_str("frozen"),
        }
    }
}

/// A balance-holding account owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: Decimal,
    pub currency: Currency,
    pub status: WalletStatus,
    /// Argon2 PHC string. Never leaves the process.
    #[serde(skip_serializing, default)]
    pub pin_hash: String,
    pub daily_limit: Decimal,
    pub monthly_limit: Decimal,
    /// Incremented on every write; used as an optimistic guard on top of row locks.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid, currency: Currency, pin_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            balance: Decimal::ZERO,
            currency,
            status: WalletStatus::Active,
            pin_hash,
            daily_limit: Decimal::from(DEFAULT_DAILY_LIMIT),
            monthly_limit: Decimal::from(DEFAULT_MONTHLY_LIMIT),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_limits(mut self, daily_limit: Decimal, monthly_limit: Decimal) -> Self {
        self.daily_limit = daily_limit;
        self.monthly_limit = monthly_limit;
        self
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    pub fn can_transact(&self) -> bool {
        self.status.is_operational()
    }

    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    /// Adds `amount` to the balance. Fails, leaving the balance untouched, if the
    /// result would not fit the stored precision.
    pub fn credit(&mut self, amount: Decimal) -> Result<()> {
        let balance = self
            .balance
            .checked_add(amount)
            .filter(|b| *b <= MAX_AMOUNT)
            .ok_or_else(|| {
                AppError::InvalidAmount(format!("balance would exceed {}", MAX_AMOUNT))
            })?;
        self.balance = balance;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Removes `amount` from the balance. Returns false, leaving the balance untouched,
    /// if the result would be negative.
    pub fn debit(&mut self, amount: Decimal) -> bool {
        if !self.has_sufficient_funds(amount) {
            return false;
        }
        self.balance -= amount;
        self.updated_at = Utc::now();
        true
    }

    pub fn set_status(&mut self, status: WalletStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            id: self.id,
            balance: self.balance,
            currency: self.currency,
        }
    }
}

/// Post-operation view of a wallet returned with every ledger result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub id: Uuid,
    pub balance: Decimal,
    pub currency: Currency,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn wallet() -> Wallet {
        Wallet::new(Uuid::new_v4(), Currency::USD, "hash".to_string())
    }

    #[test]
    fn test_wallet_creation() {
        let wallet = wallet();
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert_eq!(wallet.status, WalletStatus::Active);
        assert_eq!(wallet.daily_limit, dec!(10000));
        assert_eq!(wallet.monthly_limit, dec!(100000));
        assert_eq!(wallet.version, 0);
    }

    #[test]
    fn test_credit_and_debit() {
        let mut wallet = wallet();
        wallet.credit(dec!(100)).unwrap();
        assert!(wallet.debit(dec!(40)));
        assert_eq!(wallet.balance, dec!(60));

        assert!(!wallet.debit(dec!(60.01)));
        assert_eq!(wallet.balance, dec!(60));
    }

    #[test]
    fn test_credit_rejects_overflowing_balance() {
        assert_eq!(MAX_AMOUNT.to_string(), "999999999999999999.99");

        let mut full = wallet();
        full.credit(MAX_AMOUNT).unwrap();
        let err = full.credit(dec!(0.01)).unwrap_err();
        assert!(matches!(err, AppError::InvalidAmount(_)));
        assert_eq!(full.balance, MAX_AMOUNT);

        let mut small = wallet();
        small.credit(dec!(1)).unwrap();
        assert!(small.credit(Decimal::MAX).is_err());
        assert_eq!(small.balance, dec!(1));
    }

    #[test]
    fn test_status_operational() {
        let mut wallet = wallet();
        assert!(wallet.can_transact());

        wallet.set_status(WalletStatus::Frozen);
        assert!(!wallet.can_transact());

        wallet.set_status(WalletStatus::Suspended);
        assert!(!wallet.can_transact());
    }

    #[test]
    fn test_pin_hash_not_serialized() {
        let wallet = Wallet::new(Uuid::new_v4(), Currency::EGP, "$argon2id$secret".to_string());
        let json = serde_json::to_string(&wallet).unwrap();
        assert!(!json.contains("pin_hash"));
        assert!(!json.contains("argon2id"));
    }

    #[test]
    fn test_snapshot() {
        let mut wallet = wallet();
        wallet.credit(dec!(12.50)).unwrap();
        let snapshot = wallet.snapshot();
        assert_eq!(snapshot.id, wallet.id);
        assert_eq!(snapshot.balance, dec!(12.50));
        assert_eq!(snapshot.currency, Currency::USD);
    }
}

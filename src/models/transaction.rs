use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use super::Currency;

/// Type of balance-affecting event recorded against a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    /// Outgoing leg of a transfer, recorded on the sender.
    TransferOut,
    /// Incoming leg of a transfer, recorded on the recipient.
    TransferIn,
}

impl TransactionType {
    /// Returns true if the type adds funds to its wallet.
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionType::Deposit | TransactionType::TransferIn)
    }

    /// Returns true if the type counts towards outgoing limits.
    pub fn is_outgoing(&self) -> bool {
        !self.is_credit()
    }

    /// Applies the direction of this type to an amount.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        if self.is_credit() {
            amount
        } else {
            -amount
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Deposit => f.write_str("deposit"),
            TransactionType::Withdraw => f.write_str("withdraw"),
            TransactionType::TransferOut => f.write_str("transfer_out"),
            TransactionType::TransferIn => f.write_str("transfer_in"),
        }
    }
}

/// Status of a transaction in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Transfer leg staged inside an open unit of work.
    Pending,
    /// Balance effect applied.
    Completed,
    Failed,
    /// Balance effect reversed by an approved cancellation.
    Cancelled,
}

impl TransactionStatus {
    /// Returns true if the transaction's amount counts towards its wallet balance.
    pub fn contributes_to_balance(&self) -> bool {
        matches!(self, TransactionStatus::Completed)
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TransactionStatus::Failed | TransactionStatus::Cancelled)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => f.write_str("pending"),
            TransactionStatus::Completed => f.write_str("completed"),
            TransactionStatus::Failed => f.write_str("failed"),
            TransactionStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Immutable record of a balance-affecting event on one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub wallet_id: Uuid,
    #[sqlx(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: Currency,
    pub description: String,
    /// Recipient for `transfer_out`, sender for `transfer_in`.
    pub counterparty_wallet_id: Option<Uuid>,
    /// The other leg of a transfer.
    pub linked_transaction_id: Option<Uuid>,
    pub balance_after: Decimal,
    pub status: TransactionStatus,
    /// Reversal reason, set when the transaction is cancelled.
    pub reason: Option<String>,
    pub cancel_request_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    fn new(
        wallet_id: Uuid,
        transaction_type: TransactionType,
        amount: Decimal,
        currency: Currency,
        balance_after: Decimal,
        status: TransactionStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            transaction_type,
            amount,
            currency,
            description: String::new(),
            counterparty_wallet_id: None,
            linked_transaction_id: None,
            balance_after,
            status,
            reason: None,
            cancel_request_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a completed deposit.
    pub fn deposit(wallet_id: Uuid, amount: Decimal, currency: Currency, balance_after: Decimal) -> Self {
        Self::new(
            wallet_id,
            TransactionType::Deposit,
            amount,
            currency,
            balance_after,
            TransactionStatus::Completed,
        )
    }

    /// Creates a completed withdrawal.
    pub fn withdraw(wallet_id: Uuid, amount: Decimal, currency: Currency, balance_after: Decimal) -> Self {
        Self::new(
            wallet_id,
            TransactionType::Withdraw,
            amount,
            currency,
            balance_after,
            TransactionStatus::Completed,
        )
    }

    /// Creates the two pending legs of a transfer, linked to each other.
    pub fn transfer_pair(
        sender_wallet_id: Uuid,
        recipient_wallet_id: Uuid,
        amount: Decimal,
        currency: Currency,
        sender_balance_after: Decimal,
        recipient_balance_after: Decimal,
    ) -> (Self, Self) {
        let mut outgoing = Self::new(
            sender_wallet_id,
            TransactionType::TransferOut,
            amount,
            currency,
            sender_balance_after,
            TransactionStatus::Pending,
        );
        let mut incoming = Self::new(
            recipient_wallet_id,
            TransactionType::TransferIn,
            amount,
            currency,
            recipient_balance_after,
            TransactionStatus::Pending,
        );

        outgoing.counterparty_wallet_id = Some(recipient_wallet_id);
        outgoing.linked_transaction_id = Some(incoming.id);
        incoming.counterparty_wallet_id = Some(sender_wallet_id);
        incoming.linked_transaction_id = Some(outgoing.id);
        incoming.created_at = outgoing.created_at;
        incoming.updated_at = outgoing.updated_at;

        (outgoing, incoming)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Signed effect of this transaction on its wallet's balance.
    pub fn signed_amount(&self) -> Decimal {
        self.transaction_type.signed(self.amount)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn complete(&mut self) {
        self.status = TransactionStatus::Completed;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self) {
        self.status = TransactionStatus::Failed;
        self.updated_at = Utc::now();
    }

    /// Marks the transaction as reversed.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        self.status = TransactionStatus::Cancelled;
        self.reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    pub fn link_cancel_request(&mut self, request_id: Uuid) {
        self.cancel_request_id = Some(request_id);
        self.updated_at = Utc::now();
    }

    pub fn view(&self) -> TransactionView {
        TransactionView::from(self.clone())
    }
}

/// Caller-facing projection of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionView {
    pub id: Uuid,
    pub wallet_id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: Currency,
    pub description: String,
    pub status: TransactionStatus,
    pub counterparty_wallet_id: Option<Uuid>,
    pub linked_transaction_id: Option<Uuid>,
    pub balance_after: Decimal,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TransactionRecord> for TransactionView {
    fn from(tx: TransactionRecord) -> Self {
        Self {
            id: tx.id,
            wallet_id: tx.wallet_id,
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            currency: tx.currency,
            description: tx.description,
            status: tx.status,
            counterparty_wallet_id: tx.counterparty_wallet_id,
            linked_transaction_id: tx.linked_transaction_id,
            balance_after: tx.balance_after,
            reason: tx.reason,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{TransactionRecord, TransactionType, WalletSnapshot};
use crate::repositories::UnitOfWork;

/// Signed change to one wallet's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceAdjustment {
    pub wallet_id: Uuid,
    pub delta: Decimal,
}

impl BalanceAdjustment {
    fn new(wallet_id: Uuid, delta: Decimal) -> Self {
        Self { wallet_id, delta }
    }
}

/// Computes the adjustments that undo `tx`'s effect on balances.
///
/// Each transaction type maps to its own inverse; transfer legs also touch the counterparty
/// wallet. The returned list is sorted by wallet id, the order in which wallets must be locked.
pub fn plan_reversal(tx: &TransactionRecord) -> Result<Vec<BalanceAdjustment>> {
    let amount = tx.amount;

    let mut plan = match tx.transaction_type {
        TransactionType::Deposit => vec![BalanceAdjustment::new(tx.wallet_id, -amount)],
        TransactionType::Withdraw => vec![BalanceAdjustment::new(tx.wallet_id, amount)],
        TransactionType::TransferOut => {
            let recipient = counterparty(tx)?;
            vec![
                BalanceAdjustment::new(tx.wallet_id, amount),
                BalanceAdjustment::new(recipient, -amount),
            ]
        }
        TransactionType::TransferIn => {
            let sender = counterparty(tx)?;
            vec![
                BalanceAdjustment::new(tx.wallet_id, -amount),
                BalanceAdjustment::new(sender, amount),
            ]
        }
    };

    plan.sort_by_key(|adjustment| adjustment.wallet_id);
    Ok(plan)
}

fn counterparty(tx: &TransactionRecord) -> Result<Uuid> {
    tx.counterparty_wallet_id.ok_or_else(|| {
        AppError::Internal(format!("transfer leg '{}' has no counterparty wallet", tx.id))
    })
}

/// Locks every wallet in `plan` in order and applies its adjustment.
///
/// Fails with `InsufficientFunds` if an adjustment would leave a balance below zero; the
/// caller is expected to roll the unit back.
pub async fn apply_reversal(
    uow: &mut dyn UnitOfWork,
    plan: &[BalanceAdjustment],
) -> Result<Vec<WalletSnapshot>> {
    let mut snapshots = Vec::with_capacity(plan.len());

    for adjustment in plan {
        let mut wallet = uow
            .lock_wallet(adjustment.wallet_id)
            .await?
            .ok_or(AppError::WalletNotFound(adjustment.wallet_id))?;

        if adjustment.delta.is_sign_negative() {
            let requested = -adjustment.delta;
            if !wallet.debit(requested) {
                return Err(AppError::InsufficientFunds {
                    requested,
                    available: wallet.balance,
                });
            }
        } else {
            wallet.credit(adjustment.delta)?;
        }

        let updated = uow.update_wallet(&wallet).await?;
        debug!(wallet_id = %updated.id, delta = %adjustment.delta, "Reversal applied");
        snapshots.push(updated.snapshot());
    }

    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_deposit_reversal_is_single_debit() {
        let wallet = Uuid::new_v4();
        let tx = TransactionRecord::deposit(wallet, dec!(500), Currency::USD, dec!(500));

        let plan = plan_reversal(&tx).unwrap();
        assert_eq!(plan, vec![BalanceAdjustment::new(wallet, dec!(-500))]);
    }

    #[test]
    fn test_withdraw_reversal_is_single_credit() {
        let wallet = Uuid::new_v4();
        let tx = TransactionRecord::withdraw(wallet, dec!(75.50), Currency::EGP, dec!(0));

        let plan = plan_reversal(&tx).unwrap();
        assert_eq!(plan, vec![BalanceAdjustment::new(wallet, dec!(75.50))]);
    }

    #[test]
    fn test_transfer_legs_reverse_symmetrically() {
        let sender = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let (out, inc) =
            TransactionRecord::transfer_pair(sender, recipient, dec!(200), Currency::USD, dec!(800), dec!(200));

        let from_out = plan_reversal(&out).unwrap();
        let from_in = plan_reversal(&inc).unwrap();
        assert_eq!(from_out, from_in);

        let net: Decimal = from_out.iter().map(|a| a.delta).sum();
        assert_eq!(net, Decimal::ZERO);

        let sender_delta = from_out.iter().find(|a| a.wallet_id == sender).unwrap().delta;
        assert_eq!(sender_delta, dec!(200));
    }

    #[test]
    fn test_plan_is_sorted_by_wallet() {
        let sender = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let (out, _) =
            TransactionRecord::transfer_pair(sender, recipient, dec!(1), Currency::USD, dec!(0), dec!(1));

        let plan = plan_reversal(&out).unwrap();
        assert!(plan[0].wallet_id < plan[1].wallet_id);
    }

    #[test]
    fn test_transfer_without_counterparty_is_internal_error() {
        let (mut out, _) = TransactionRecord::transfer_pair(
            Uuid::new_v4(),
            Uuid::new_v4(),
            dec!(1),
            Currency::USD,
            dec!(0),
            dec!(1),
        );
        out.counterparty_wallet_id = None;
        assert!(matches!(plan_reversal(&out), Err(AppError::Internal(_))));
    }
}

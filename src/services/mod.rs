pub mod cancellation_processor;
pub mod cancellation_service;
pub mod eligibility;
pub mod ledger_service;
pub mod pin;
pub mod wallet_service;

pub use cancellation_processor::{apply_reversal, plan_reversal, BalanceAdjustment};
pub use cancellation_service::{CancellationOutcome, CancellationService};
pub use eligibility::{validate_approval_eligibility, validate_cancellation_eligibility};
pub use ledger_service::{validate_amount, LedgerPolicy, LedgerReceipt, LedgerService, TransactionStateMachine};
pub use pin::{validate_pin_format, PinHasher};
pub use wallet_service::{ReconciliationReport, WalletService};

pub mod caller;
pub mod cancellation;
pub mod currency;
pub mod query;
pub mod transaction;
pub mod wallet;

pub use caller::{Caller, Role};
pub use cancellation::{
    AdminDecision, AdminResponse, CancellationPriority, CancellationRequest, CancellationStatus,
};
pub use currency::Currency;
pub use query::{
    CancellationFilter, Page, Pagination, SortOrder, TransactionFilter, WalletFilter,
    WalletSortField,
};
pub use transaction::{TransactionRecord, TransactionStatus, TransactionType, TransactionView};
pub use wallet::{Wallet, WalletSnapshot, WalletStatus, MAX_AMOUNT};

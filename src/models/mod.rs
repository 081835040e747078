mod account;
mod agreement;
mod balance;
mod id;
mod institution;
mod requisition;
mod transaction;
mod user;

pub use account::{Account, AccountDetails, AccountMetadata, AccountStatus};
pub use agreement::{AccessScope, Agreement};
pub use balance::BalanceSnapshot;
pub use id::Id;
pub use institution::{CacheMetadata, InstitutionMetadata};
pub use requisition::{LinkStatus, Requisition};
pub use transaction::Transaction;
pub use user::User;

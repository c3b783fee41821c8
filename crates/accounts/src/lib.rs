//! Account pool: entry model, JWT claims, selection/locking, token refresh.

pub mod entry;
pub mod jwt;
pub mod pool;
pub mod refresh;

pub use {
    entry::{AccountEntry, AccountStatus, AccountUsage, UsageDelta},
    pool::{AccountPool, AcquiredAccount},
    refresh::RefreshScheduler,
};

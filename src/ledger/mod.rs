//! Ledger module containing the transaction orchestrator and transfers

pub mod account;
pub mod core;
pub mod transfer;

pub use account::*;
pub use self::core::*;
pub use transfer::*;

//! Side-effecting operations: filesystem, processes and agent backends.

pub mod agent;
pub mod artifacts;
pub mod config;
pub mod init;
pub mod ledger;
pub mod preferences;
pub mod process;
pub mod prompt;
pub mod state_store;
pub mod workspace;

//! BinkP mail transport for WWIVnet-style store-and-forward networks.

pub mod auth;
pub mod callout;
pub mod config;
pub mod contact;
pub mod coordination;
pub mod netlog;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod transfer;
pub mod transport;
pub mod utils;

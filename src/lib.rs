pub mod blockchain;
pub mod config;
pub mod error;
pub mod node;
pub mod transaction;
pub mod wallet;

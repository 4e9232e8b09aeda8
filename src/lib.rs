// HypeCoin - Transactional storage with a virtual-currency bank and bookie

pub mod bookie;
pub mod config;
pub mod ledger;
pub mod storage;

pub use config::AppConfig;

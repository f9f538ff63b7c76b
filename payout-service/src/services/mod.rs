pub mod database;
pub mod export;
pub mod metrics;
pub mod remittance;

pub use database::Database;

//! Durable state owned by the sync engine.

mod history_store;
mod token_store;

pub use history_store::HistoryStore;
pub use token_store::TokenStore;

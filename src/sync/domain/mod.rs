//! Domain types shared by the stores, the engine and the sources.

pub mod identity;
pub mod record;
pub mod token;

pub use identity::{identity_of, IdentityKey};
pub use record::{
    Achievement, DifficultyTier, FullCombo, FullSync, PlayRecord, Rank, RawRecord, RecordError,
    StoredRecord,
};
pub use token::SessionToken;

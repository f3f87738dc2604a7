pub mod api;
pub mod extract;
pub mod mock;
pub mod portal;

pub use api::{FetchOutcome, RecordSource, SourceError};
pub use extract::{JsonExtractor, RecordExtractor};
pub use mock::MockRecordSource;
pub use portal::{PortalConfig, PortalSource};

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::time::Duration;

use super::api::{FetchOutcome, RecordSource, SourceError};
use crate::sync::domain::{RawRecord, SessionToken};

/// Pure in-memory record source for tests.
///
/// Responses are served in the order they were scripted; once the script runs out
/// every fetch succeeds with no records.
#[derive(Debug, Default)]
pub struct MockRecordSource {
    pub responses: VecDeque<Result<FetchOutcome, SourceError>>,
    /// Credentials presented on each call, in order.
    pub seen_credentials: Vec<String>,
    /// Artificial latency applied to every fetch.
    pub delay: Option<Duration>,
}

impl MockRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_records(&mut self, records: Vec<RawRecord>) -> &mut Self {
        self.push_response(Ok(FetchOutcome {
            records,
            renewed_credential: None,
        }))
    }

    pub fn push_rotation(&mut self, records: Vec<RawRecord>, credential: &str) -> &mut Self {
        self.push_response(Ok(FetchOutcome {
            records,
            renewed_credential: Some(credential.to_string()),
        }))
    }

    pub fn push_error(&mut self, error: SourceError) -> &mut Self {
        self.push_response(Err(error))
    }

    pub fn push_response(&mut self, response: Result<FetchOutcome, SourceError>) -> &mut Self {
        self.responses.push_back(response);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.seen_credentials.len()
    }
}

impl RecordSource for MockRecordSource {
    async fn fetch(&mut self, token: &SessionToken) -> Result<FetchOutcome, SourceError> {
        self.seen_credentials.push(token.credential.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .pop_front()
            .unwrap_or_else(|| Ok(FetchOutcome::default()))
    }
}

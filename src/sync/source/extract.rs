use serde_json::Value;

use super::api::SourceError;
use crate::sync::domain::RawRecord;

/// Turns a page body into raw records.
///
/// Extractors only decode shape. Field validation happens later, per record, so a
/// single broken entry never rejects the whole page.
pub trait RecordExtractor {
    fn extract(&self, body: &str) -> Result<Vec<RawRecord>, SourceError>;
}

/// Accepts either a bare JSON array of records or `{"records": [...]}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExtractor;

impl RecordExtractor for JsonExtractor {
    fn extract(&self, body: &str) -> Result<Vec<RawRecord>, SourceError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| SourceError::network(format!("unreadable record page: {e}")))?;

        let entries = match value {
            Value::Array(entries) => entries,
            Value::Object(mut obj) => match obj.remove("records") {
                Some(Value::Array(entries)) => entries,
                _ => {
                    return Err(SourceError::network("record page has no `records` array"))
                }
            },
            _ => return Err(SourceError::network("record page is not a list")),
        };

        // Non-object entries become empty raw records and are dropped by validation.
        Ok(entries
            .into_iter()
            .map(|entry| serde_json::from_value(entry).unwrap_or_default())
            .collect())
    }
}

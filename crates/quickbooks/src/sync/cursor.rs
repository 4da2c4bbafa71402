//! Cursor (watermark) arithmetic
//!
//! A cursor is the newest `LastUpdatedTime` persisted locally, kept in the
//! remote's own string form so it can be sent back verbatim. Comparisons
//! are done on the parsed instant since the remote mixes UTC offsets.

use chrono::{DateTime, FixedOffset};

use crate::models::EntityRecord;

/// Result of folding a fetched batch into the current cursor
#[derive(Debug, Clone, PartialEq)]
pub struct CursorAdvance {
    /// Cursor to store; never older than the cursor passed in
    pub cursor: Option<String>,
    /// Records that carried a usable timestamp
    pub observed: usize,
    /// Records without one; they are stored but cannot move the cursor
    pub missing: usize,
}

impl CursorAdvance {
    pub fn advanced_from(&self, previous: Option<&str>) -> bool {
        self.cursor.as_deref() != previous
    }
}

/// Parse an RFC 3339 timestamp as sent by the remote
pub fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value.trim()).ok()
}

/// Latest timestamp among `values`, returned in its original form
///
/// Unparseable values are ignored. Ties keep the first value seen.
pub fn max_timestamp<'a, I>(values: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(DateTime<FixedOffset>, &'a str)> = None;
    for value in values {
        let Some(parsed) = parse_timestamp(value) else {
            continue;
        };
        match best {
            Some((current, _)) if parsed <= current => {}
            _ => best = Some((parsed, value)),
        }
    }
    best.map(|(_, value)| value)
}

/// Fold a batch into the cursor
///
/// The result is the maximum of the current cursor and every timestamp in
/// the batch, so the cursor never moves backwards and never skips past data
/// that was not fetched.
pub fn advance(current: Option<&str>, records: &[EntityRecord]) -> CursorAdvance {
    let timestamps: Vec<&str> = records
        .iter()
        .filter_map(|r| r.last_updated_time.as_deref())
        .filter(|ts| parse_timestamp(ts).is_some())
        .collect();

    let observed = timestamps.len();
    let missing = records.len() - observed;

    let cursor = max_timestamp(current.into_iter().chain(timestamps))
        .or(current)
        .map(str::to_string);

    CursorAdvance {
        cursor,
        observed,
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ObjectType;
    use serde_json::json;

    fn record(id: &str, updated: Option<&str>) -> EntityRecord {
        let mut payload = json!({ "Id": id });
        if let Some(updated) = updated {
            payload["MetaData"] = json!({ "LastUpdatedTime": updated });
        }
        EntityRecord::from_remote(ObjectType::Customer, "realm-1", payload).unwrap()
    }

    #[test]
    fn test_max_timestamp_compares_instants() {
        // 10:00-08:00 is 18:00Z, later than 17:00Z
        let max = max_timestamp(["2024-03-01T17:00:00Z", "2024-03-01T10:00:00-08:00"]);
        assert_eq!(max, Some("2024-03-01T10:00:00-08:00"));
    }

    #[test]
    fn test_max_timestamp_skips_garbage() {
        assert_eq!(max_timestamp(["not a date", "2024-03-01T17:00:00Z"]), Some("2024-03-01T17:00:00Z"));
        assert_eq!(max_timestamp(["not a date"]), None);
    }

    #[test]
    fn test_first_sync_takes_batch_max() {
        let records = vec![
            record("1", Some("2024-03-01T10:00:00Z")),
            record("2", Some("2024-03-03T10:00:00Z")),
            record("3", Some("2024-03-02T10:00:00Z")),
        ];
        let advance = advance(None, &records);
        assert_eq!(advance.cursor.as_deref(), Some("2024-03-03T10:00:00Z"));
        assert_eq!(advance.observed, 3);
        assert_eq!(advance.missing, 0);
        assert!(advance.advanced_from(None));
    }

    #[test]
    fn test_records_without_timestamp_are_excluded() {
        let records = vec![
            record("1", None),
            record("2", Some("2024-03-02T10:00:00Z")),
            record("3", Some("garbage")),
        ];
        let advance = advance(Some("2024-03-01T10:00:00Z"), &records);
        assert_eq!(advance.cursor.as_deref(), Some("2024-03-02T10:00:00Z"));
        assert_eq!(advance.missing, 2);
    }

    #[test]
    fn test_batch_without_timestamps_keeps_cursor() {
        let records = vec![record("1", None), record("2", None)];

        let advance_from_some = advance(Some("2024-03-01T10:00:00Z"), &records);
        assert_eq!(advance_from_some.cursor.as_deref(), Some("2024-03-01T10:00:00Z"));
        assert!(!advance_from_some.advanced_from(Some("2024-03-01T10:00:00Z")));

        let advance_from_none = advance(None, &records);
        assert!(advance_from_none.cursor.is_none());
    }

    #[test]
    fn test_cursor_never_moves_backwards() {
        let records = vec![record("1", Some("2024-01-01T00:00:00Z"))];
        let advance = advance(Some("2024-03-01T10:00:00Z"), &records);
        assert_eq!(advance.cursor.as_deref(), Some("2024-03-01T10:00:00Z"));
    }

    #[test]
    fn test_equal_instant_keeps_existing_form() {
        let records = vec![record("1", Some("2024-03-01T10:00:00-08:00"))];
        let advance = advance(Some("2024-03-01T18:00:00Z"), &records);
        assert_eq!(advance.cursor.as_deref(), Some("2024-03-01T18:00:00Z"));
    }
}

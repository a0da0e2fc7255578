//! Steps available in every registry built with `StepRegistry::with_builtins`

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use sluice_common::{Metadata, Record};

use super::{PreprocessStep, StepContext};

/// Field added by [`IngestionTimestamp`]
pub const INGESTED_AT_FIELD: &str = "_ingested_at";

/// Removes top-level fields whose value is `null`
#[derive(Debug, Clone, Copy, Default)]
pub struct DropNulls;

impl PreprocessStep for DropNulls {
    fn name(&self) -> &str {
        "drop_nulls"
    }

    fn apply(
        &self,
        mut records: Vec<Record>,
        _ctx: &StepContext<'_>,
        metadata: Metadata,
    ) -> anyhow::Result<(Vec<Record>, Metadata)> {
        for record in &mut records {
            record.fields_mut().retain(|_, v| !v.is_null());
        }
        Ok((records, metadata))
    }
}

/// Stamps every record with the time it entered the pipeline (RFC 3339, UTC)
///
/// All records of one send share the same timestamp. An existing
/// `_ingested_at` field is left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestionTimestamp;

impl PreprocessStep for IngestionTimestamp {
    fn name(&self) -> &str {
        "ingestion_timestamp"
    }

    fn apply(
        &self,
        mut records: Vec<Record>,
        _ctx: &StepContext<'_>,
        metadata: Metadata,
    ) -> anyhow::Result<(Vec<Record>, Metadata)> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        for record in &mut records {
            record
                .fields_mut()
                .entry(INGESTED_AT_FIELD)
                .or_insert_with(|| Value::String(now.clone()));
        }
        Ok((records, metadata))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const CTX: StepContext<'static> = StepContext {
        destination_table: "events",
        target: None,
        collection_id: None,
    };

    #[test]
    fn test_drop_nulls() {
        let record = Record::try_from(json!({"a": 1, "b": null, "c": {"d": null}})).unwrap();
        let (records, _) = DropNulls.apply(vec![record], &CTX, Metadata::new()).unwrap();
        assert_eq!(
            serde_json::to_string(&records[0]).unwrap(),
            r#"{"a":1,"c":{"d":null}}"#
        );
    }

    #[test]
    fn test_ingestion_timestamp_keeps_existing_value() {
        let fresh = Record::new().with("id", 1);
        let stamped = Record::new().with(INGESTED_AT_FIELD, "2020-01-01T00:00:00Z");

        let (records, _) = IngestionTimestamp
            .apply(vec![fresh, stamped], &CTX, Metadata::new())
            .unwrap();

        let added = records[0].get(INGESTED_AT_FIELD).and_then(Value::as_str).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(added).is_ok());
        assert_eq!(
            records[1].get(INGESTED_AT_FIELD),
            Some(&json!("2020-01-01T00:00:00Z"))
        );
    }
}

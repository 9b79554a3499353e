//! Normalization of raw external column values into typed field values.
//!
//! Diagnostic-first: `normalize` never fails. Every active field of the
//! target entity produces either a typed value or an accumulated
//! `NormalizationError`, so a single pass surfaces all problems at once.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::schema::{FieldDefinition, FieldEntity, FieldType, FieldValue, InternalSchema};

/// One field that could not be coerced to its declared type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationError {
    pub field_id: String,
    pub expected: FieldType,
    pub reason: String,
    pub raw: serde_json::Value,
    pub required: bool,
}

/// Result of normalizing one entity's raw values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub values: BTreeMap<String, FieldValue>,
    pub errors: Vec<NormalizationError>,
}

impl NormalizedRecord {
    pub fn get(&self, field_id: &str) -> Option<&FieldValue> {
        self.values.get(field_id)
    }

    /// True when any required field failed — the pipeline must not run
    /// rule evaluation on such a record.
    pub fn has_required_errors(&self) -> bool {
        self.errors.iter().any(|e| e.required)
    }
}

/// Normalize raw per-field values against the schema's active fields for
/// one entity. Missing and empty raw values become `Null`; a required
/// field that is missing or uncoercible is reported, never thrown.
pub fn normalize(
    schema: &InternalSchema,
    entity: FieldEntity,
    raw_by_field: &HashMap<String, serde_json::Value>,
) -> NormalizedRecord {
    let mut record = NormalizedRecord::default();

    for field in schema.active_fields(entity) {
        let raw = raw_by_field.get(&field.id);

        if is_empty(raw) {
            record.values.insert(field.id.clone(), FieldValue::Null);
            if field.required {
                record.errors.push(NormalizationError {
                    field_id: field.id.clone(),
                    expected: field.field_type,
                    reason: "required field is missing or empty".into(),
                    raw: raw.cloned().unwrap_or(serde_json::Value::Null),
                    required: true,
                });
            }
            continue;
        }

        let raw = raw.expect("non-empty raw value");
        match coerce(field, raw) {
            Ok(value) => {
                record.values.insert(field.id.clone(), value);
            }
            Err(reason) => {
                record.values.insert(field.id.clone(), FieldValue::Null);
                record.errors.push(NormalizationError {
                    field_id: field.id.clone(),
                    expected: field.field_type,
                    reason,
                    raw: raw.clone(),
                    required: field.required,
                });
            }
        }
    }

    if !record.errors.is_empty() {
        debug!(
            entity = ?entity,
            errors = record.errors.len(),
            "Normalization produced field errors"
        );
    }

    record
}

fn is_empty(raw: Option<&serde_json::Value>) -> bool {
    match raw {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn coerce(field: &FieldDefinition, raw: &serde_json::Value) -> Result<FieldValue, String> {
    match field.field_type {
        FieldType::Text => coerce_text(raw).map(FieldValue::Text),
        FieldType::Number => coerce_number(raw).map(FieldValue::Number),
        FieldType::Boolean => coerce_bool(raw).map(FieldValue::Bool),
        FieldType::Status => coerce_label(raw).map(FieldValue::Status),
        FieldType::Date => coerce_date(raw).map(FieldValue::Date),
    }
}

fn coerce_text(raw: &serde_json::Value) -> Result<String, String> {
    match raw {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Object(_) => extract_label(raw)
            .ok_or_else(|| "object has no string 'label' or 'text' property".into()),
        other => Err(format!("cannot coerce {} to text", json_kind(other))),
    }
}

fn coerce_number(raw: &serde_json::Value) -> Result<f64, String> {
    let parsed = match raw {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| "number is not representable as f64".to_string())?,
        serde_json::Value::String(s) => {
            let cleaned: String = s.trim().replace(',', "");
            cleaned
                .parse::<f64>()
                .map_err(|_| format!("'{}' is not a number", s))?
        }
        other => return Err(format!("cannot coerce {} to number", json_kind(other))),
    };

    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err("number is not finite".into())
    }
}

fn coerce_bool(raw: &serde_json::Value) -> Result<bool, String> {
    match raw {
        serde_json::Value::Bool(b) => Ok(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(1) => Ok(true),
            Some(0) => Ok(false),
            _ => Err(format!("'{}' is not a boolean", n)),
        },
        serde_json::Value::String(s) => match s.trim().to_lowercase().as_str() {
            "yes" | "y" | "true" => Ok(true),
            "no" | "n" | "false" => Ok(false),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        other => Err(format!("cannot coerce {} to boolean", json_kind(other))),
    }
}

fn coerce_label(raw: &serde_json::Value) -> Result<String, String> {
    match raw {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Object(_) => extract_label(raw)
            .ok_or_else(|| "object has no string 'label' or 'text' property".into()),
        other => Err(format!("cannot coerce {} to status", json_kind(other))),
    }
}

/// Accepted date shapes: RFC 3339 string, `YYYY-MM-DD` prefix,
/// epoch-milliseconds number, or a `{date, time}` object. Output is the
/// canonical RFC 3339 rendering in UTC.
fn coerce_date(raw: &serde_json::Value) -> Result<String, String> {
    match raw {
        serde_json::Value::String(s) => parse_date_string(s.trim()),
        serde_json::Value::Number(n) => {
            let millis = n
                .as_i64()
                .ok_or_else(|| format!("'{}' is not an epoch-millisecond timestamp", n))?;
            DateTime::from_timestamp_millis(millis)
                .map(|dt| dt.to_rfc3339())
                .ok_or_else(|| format!("epoch value {} is out of range", millis))
        }
        serde_json::Value::Object(obj) => {
            let date = obj
                .get("date")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| "date object has no 'date' property".to_string())?;
            let naive_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|_| format!("'{}' is not a YYYY-MM-DD date", date))?;
            let time = match obj.get("time").and_then(serde_json::Value::as_str) {
                Some(t) => NaiveTime::parse_from_str(t, "%H:%M:%S")
                    .map_err(|_| format!("'{}' is not an HH:MM:SS time", t))?,
                None => NaiveTime::MIN,
            };
            Ok(naive_date.and_time(time).and_utc().to_rfc3339())
        }
        other => Err(format!("cannot coerce {} to date", json_kind(other))),
    }
}

fn parse_date_string(s: &str) -> Result<String, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc).to_rfc3339());
    }
    // Fall back to a bare YYYY-MM-DD prefix at midnight UTC.
    if s.len() >= 10
        && let Ok(date) = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d")
    {
        return Ok(date.and_time(NaiveTime::MIN).and_utc().to_rfc3339());
    }
    Err(format!("'{}' is not a recognized date", s))
}

fn extract_label(raw: &serde_json::Value) -> Option<String> {
    let obj = raw.as_object()?;
    obj.get("label")
        .and_then(serde_json::Value::as_str)
        .or_else(|| obj.get("text").and_then(serde_json::Value::as_str))
        .map(String::from)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(id: &str, field_type: FieldType, required: bool) -> FieldDefinition {
        FieldDefinition {
            id: id.into(),
            label: id.into(),
            entity: FieldEntity::Lead,
            field_type,
            required,
            active: true,
        }
    }

    fn schema(fields: Vec<FieldDefinition>) -> InternalSchema {
        InternalSchema { version: 1, fields }
    }

    #[test]
    fn test_number_with_thousands_separator() {
        let schema = schema(vec![field("budget", FieldType::Number, false)]);
        let raw = HashMap::from([("budget".to_string(), json!("1,200"))]);

        let record = normalize(&schema, FieldEntity::Lead, &raw);
        assert!(record.errors.is_empty());
        assert_eq!(record.get("budget"), Some(&FieldValue::Number(1200.0)));
    }

    #[test]
    fn test_boolean_yes_no_variants() {
        let schema = schema(vec![field("qualified", FieldType::Boolean, false)]);

        for (raw, expected) in [
            (json!("yes"), true),
            (json!("Y"), true),
            (json!("TRUE"), true),
            (json!("no"), false),
            (json!("n"), false),
            (json!(1), true),
            (json!(0), false),
            (json!(true), true),
        ] {
            let raw = HashMap::from([("qualified".to_string(), raw)]);
            let record = normalize(&schema, FieldEntity::Lead, &raw);
            assert_eq!(record.get("qualified"), Some(&FieldValue::Bool(expected)));
        }
    }

    #[test]
    fn test_date_prefix_and_epoch() {
        let schema = schema(vec![field("received", FieldType::Date, false)]);

        let raw = HashMap::from([("received".to_string(), json!("2024-01-05"))]);
        let record = normalize(&schema, FieldEntity::Lead, &raw);
        let FieldValue::Date(iso) = record.get("received").unwrap() else {
            panic!("expected a date value");
        };
        assert!(iso.starts_with("2024-01-05"));

        let raw = HashMap::from([("received".to_string(), json!(1_704_412_800_000_i64))]);
        let record = normalize(&schema, FieldEntity::Lead, &raw);
        let FieldValue::Date(iso) = record.get("received").unwrap() else {
            panic!("expected a date value");
        };
        assert!(iso.starts_with("2024-01-05"));
    }

    #[test]
    fn test_date_object_with_time() {
        let schema = schema(vec![field("received", FieldType::Date, false)]);
        let raw = HashMap::from([(
            "received".to_string(),
            json!({"date": "2024-01-05", "time": "13:30:00"}),
        )]);

        let record = normalize(&schema, FieldEntity::Lead, &raw);
        let FieldValue::Date(iso) = record.get("received").unwrap() else {
            panic!("expected a date value");
        };
        assert!(iso.starts_with("2024-01-05T13:30:00"));
    }

    #[test]
    fn test_status_object_label_extraction() {
        let schema = schema(vec![field("industry", FieldType::Status, false)]);
        let raw = HashMap::from([("industry".to_string(), json!({"label": "SaaS", "index": 3}))]);

        let record = normalize(&schema, FieldEntity::Lead, &raw);
        assert_eq!(
            record.get("industry"),
            Some(&FieldValue::Status("SaaS".into()))
        );
    }

    #[test]
    fn test_required_missing_reports_error() {
        let schema = schema(vec![field("industry", FieldType::Status, true)]);
        let record = normalize(&schema, FieldEntity::Lead, &HashMap::new());

        assert_eq!(record.get("industry"), Some(&FieldValue::Null));
        assert_eq!(record.errors.len(), 1);
        assert!(record.errors[0].required);
        assert!(record.has_required_errors());
    }

    #[test]
    fn test_optional_missing_is_silent_null() {
        let schema = schema(vec![field("notes", FieldType::Text, false)]);
        let raw = HashMap::from([("notes".to_string(), json!("   "))]);

        let record = normalize(&schema, FieldEntity::Lead, &raw);
        assert_eq!(record.get("notes"), Some(&FieldValue::Null));
        assert!(record.errors.is_empty());
    }

    #[test]
    fn test_errors_accumulate_across_fields() {
        let schema = schema(vec![
            field("budget", FieldType::Number, true),
            field("qualified", FieldType::Boolean, false),
            field("industry", FieldType::Status, false),
        ]);
        let raw = HashMap::from([
            ("budget".to_string(), json!("lots")),
            ("qualified".to_string(), json!("maybe")),
            ("industry".to_string(), json!("Fintech")),
        ]);

        let record = normalize(&schema, FieldEntity::Lead, &raw);
        assert_eq!(record.errors.len(), 2);
        assert!(record.has_required_errors());
        // The clean field still normalized despite its neighbors failing.
        assert_eq!(
            record.get("industry"),
            Some(&FieldValue::Status("Fintech".into()))
        );
    }

    #[test]
    fn test_inactive_fields_skipped() {
        let mut inactive = field("legacy", FieldType::Text, true);
        inactive.active = false;
        let schema = schema(vec![inactive]);

        let record = normalize(&schema, FieldEntity::Lead, &HashMap::new());
        assert!(record.values.is_empty());
        assert!(record.errors.is_empty());
    }
}

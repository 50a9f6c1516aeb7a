use birdboard_core_types::DetectionRecord;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::PayloadError;

/// Envelope keys the upstream has used for detection lists, in lookup order.
const LIST_KEYS: [&str; 3] = ["data", "detections", "items"];

/// Millisecond timestamps are at least this large; smaller numbers are seconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionPage {
    pub records: Vec<DetectionRecord>,
    /// Total row count when the upstream wraps the list in an envelope.
    pub total: Option<u64>,
    /// Items the upstream sent, readable or not. Page-end checks use this.
    pub fetched: usize,
}

impl DetectionPage {
    pub fn new(records: Vec<DetectionRecord>, total: Option<u64>) -> Self {
        let fetched = records.len();
        Self {
            records,
            total,
            fetched,
        }
    }

    /// Items dropped because they could not be read as detections.
    pub fn skipped(&self) -> usize {
        self.fetched.saturating_sub(self.records.len())
    }
}

/// Parses a bare array or a `{data|detections|items, total}` envelope.
pub fn parse_detection_page(bytes: &[u8]) -> Result<DetectionPage, PayloadError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| PayloadError::InvalidJson(err.to_string()))?;
    match value {
        Value::Array(items) => Ok(parse_records(items, None)),
        Value::Object(map) => parse_envelope(map),
        other => Err(PayloadError::UnrecognizedShape(format!(
            "expected array or object, got {}",
            json_kind(&other)
        ))),
    }
}

fn parse_envelope(mut map: Map<String, Value>) -> Result<DetectionPage, PayloadError> {
    let total = map.get("total").and_then(Value::as_u64);
    for key in LIST_KEYS {
        if let Some(Value::Array(items)) = map.get_mut(key).map(Value::take) {
            return Ok(parse_records(items, total));
        }
    }
    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
    Err(PayloadError::UnrecognizedShape(format!(
        "object without a detection list (keys: {})",
        keys.join(", ")
    )))
}

/// Unreadable items are logged and left out; one bad row never sinks a page.
fn parse_records(items: Vec<Value>, total: Option<u64>) -> DetectionPage {
    let fetched = items.len();
    let records = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let parsed = serde_json::from_value::<RawDetection>(item)
                .map_err(|err| err.to_string())
                .and_then(RawDetection::into_record);
            match parsed {
                Ok(record) => Some(record),
                Err(reason) => {
                    warn!(target: "upstream", index, %reason, "skipping unreadable detection");
                    None
                }
            }
        })
        .collect();
    DetectionPage {
        records,
        total,
        fetched,
    }
}

/// Extracts `taxonomy.family_common` from a species lookup response.
pub fn parse_species_family(bytes: &[u8]) -> Result<Option<String>, PayloadError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| PayloadError::InvalidJson(err.to_string()))?;
    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(PayloadError::UnrecognizedShape(format!(
                "expected species object, got {}",
                json_kind(&other)
            )))
        }
    };
    let family = map
        .get("taxonomy")
        .and_then(|taxonomy| {
            taxonomy
                .get("family_common")
                .or_else(|| taxonomy.get("familyCommon"))
        })
        .or_else(|| map.get("family_common"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|family| !family.is_empty())
        .map(str::to_string);
    Ok(family)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    #[serde(default, alias = "ID")]
    id: Option<Value>,
    #[serde(default, alias = "commonName", alias = "CommonName")]
    common_name: Option<String>,
    #[serde(default, alias = "scientificName", alias = "ScientificName")]
    scientific_name: Option<String>,
    #[serde(default, alias = "Confidence")]
    confidence: Option<f64>,
    #[serde(default, alias = "timestampMs")]
    timestamp_ms: Option<i64>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default, alias = "Date")]
    date: Option<String>,
    #[serde(default, alias = "Time")]
    time: Option<String>,
}

impl RawDetection {
    fn into_record(self) -> Result<DetectionRecord, String> {
        let timestamp = self.resolve_timestamp()?;
        let common_name = self.common_name.unwrap_or_default();
        let scientific_name = self.scientific_name.unwrap_or_default();
        if common_name.trim().is_empty() && scientific_name.trim().is_empty() {
            return Err("record names no species".to_string());
        }
        let id = match self.id {
            Some(Value::String(id)) => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => format!(
                "{}-{}",
                timestamp.timestamp_millis(),
                scientific_name.trim().replace(' ', "_")
            ),
        };
        Ok(DetectionRecord::new(
            id,
            common_name,
            scientific_name,
            self.confidence.unwrap_or(0.0),
            timestamp,
        ))
    }

    fn resolve_timestamp(&self) -> Result<DateTime<Utc>, String> {
        if let Some(ms) = self.timestamp_ms {
            return from_epoch(ms);
        }
        match &self.timestamp {
            Some(Value::Number(number)) => {
                let raw = number
                    .as_i64()
                    .or_else(|| number.as_f64().map(|value| value as i64))
                    .ok_or_else(|| format!("unsupported timestamp {number}"))?;
                return from_epoch(raw);
            }
            Some(Value::String(text)) => return parse_timestamp_text(text),
            _ => {}
        }
        match (&self.date, &self.time) {
            (Some(date), Some(time)) => parse_timestamp_text(&format!("{date} {time}")),
            (Some(date), None) => {
                let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
                    .map_err(|err| format!("invalid date {date:?}: {err}"))?;
                Ok(Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)))
            }
            _ => Err("record has no timestamp".to_string()),
        }
    }
}

fn from_epoch(raw: i64) -> Result<DateTime<Utc>, String> {
    let millis = if raw.abs() >= MILLIS_THRESHOLD {
        raw
    } else {
        raw.saturating_mul(1000)
    };
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| format!("timestamp {raw} out of range"))
}

/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS` taken as UTC.
fn parse_timestamp_text(text: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(format!("unparsable timestamp {text:?}"))
}

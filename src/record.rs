use crate::TrackerError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub const STATUS_NEEDS_RESEARCH: &str = "Needs Research";
pub const STATUS_IN_PROGRESS: &str = "In Progress";
pub const STATUS_COMPLETE: &str = "Complete";
pub const STATUS_EXEMPT: &str = "Exempt";
pub const STATUS_DELETE: &str = "DeleteMe";

/// Lower-cased statuses that never overwrite a freshly pulled finding.
const NON_CARRYING_STATUSES: [&str; 5] =
    ["needs research", "complete", "completed", "archived", "archive"];

/// Persisted column names, in table order.
pub const COLUMNS: [&str; 13] = [
    "ResourceId",
    "RecommendationId",
    "DateOfSavings",
    "FinOpsStatus",
    "FinOpsLastModified",
    "Comments",
    "Account",
    "estimatedMonthlySavings",
    "Savings Type",
    "Cost Center",
    "Service Group",
    "Optimization Exemption",
    "Resource ID + Type",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Partition {
    InProgress,
    Complete,
    Exempt,
}

impl Partition {
    pub const ALL: [Partition; 3] = [Partition::InProgress, Partition::Complete, Partition::Exempt];

    pub fn blob_name(&self) -> &'static str {
        match self {
            Partition::InProgress => "InProgress",
            Partition::Complete => "Complete",
            Partition::Exempt => "Exempt",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.blob_name())
    }
}

impl FromStr for Partition {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "inprogress" => Ok(Partition::InProgress),
            "complete" => Ok(Partition::Complete),
            "exempt" => Ok(Partition::Exempt),
            _ => Err(TrackerError::InvalidArgument(format!("unknown partition {}", s))),
        }
    }
}

/// Human-assigned triage status. Free text; canonical values compare
/// case-insensitively, except the delete sentinel which must match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FinOpsStatus(String);

impl FinOpsStatus {
    pub fn new(status: impl Into<String>) -> Self {
        let status = status.into();
        if status.trim().is_empty() {
            Self::default()
        } else {
            FinOpsStatus(status)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn lower(&self) -> String {
        self.0.to_lowercase()
    }

    pub fn is_needs_research(&self) -> bool {
        self.lower() == "needs research"
    }

    pub fn is_complete(&self) -> bool {
        self.lower() == "complete"
    }

    pub fn is_exempt(&self) -> bool {
        self.lower() == "exempt"
    }

    /// Complete or exempt: the statuses that leave the in-progress partition.
    pub fn is_closed(&self) -> bool {
        self.is_complete() || self.is_exempt()
    }

    pub fn is_delete_sentinel(&self) -> bool {
        self.0 == STATUS_DELETE
    }

    /// Whether this status should be copied onto a freshly pulled finding.
    pub fn carries_forward(&self) -> bool {
        let lower = self.lower();
        !NON_CARRYING_STATUSES.contains(&lower.as_str())
    }
}

impl Default for FinOpsStatus {
    fn default() -> Self {
        FinOpsStatus(STATUS_NEEDS_RESEARCH.to_string())
    }
}

impl fmt::Display for FinOpsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FinOpsStatus {
    fn from(s: &str) -> Self {
        FinOpsStatus::new(s)
    }
}

impl Serialize for FinOpsStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for FinOpsStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = text_column::deserialize(deserializer)?;
        Ok(FinOpsStatus::new(text))
    }
}

/// Stable synthetic row identity, independent of row position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowKey(String);

impl RowKey {
    pub fn generate() -> Self {
        RowKey(uuid::Uuid::new_v4().to_string())
    }

    /// Key for a row persisted before row keys existed. Stable across loads
    /// until the partition is rewritten, after which it is stored verbatim.
    pub fn derived(partition: Partition, position: usize, record: &TrackerRecord) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(partition.blob_name().as_bytes());
        hasher.update(position.to_le_bytes());
        hasher.update(record.recommendation_id.as_bytes());
        hasher.update(record.resource_id.as_bytes());
        let digest = hasher.finalize();
        let short: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        RowKey(format!("legacy-{}", short))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the tracker ledger, and the canonical shape of a normalized
/// finding. Empty strings stand for absent values and persist as null.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackerRecord {
    #[serde(rename = "ResourceId", default, with = "text_column")]
    pub resource_id: String,
    #[serde(rename = "RecommendationId", default, with = "text_column")]
    pub recommendation_id: String,
    #[serde(rename = "DateOfSavings", default, with = "day_column")]
    pub date_of_savings: Option<NaiveDate>,
    #[serde(rename = "FinOpsStatus", default)]
    pub status: FinOpsStatus,
    #[serde(rename = "FinOpsLastModified", default, with = "day_column")]
    pub last_modified: Option<NaiveDate>,
    #[serde(rename = "Comments", default, with = "text_column")]
    pub comments: String,
    #[serde(rename = "Account", default, with = "text_column")]
    pub account: String,
    #[serde(rename = "estimatedMonthlySavings", default, with = "savings_column")]
    pub estimated_monthly_savings: f64,
    #[serde(rename = "Savings Type", default, with = "text_column")]
    pub savings_type: String,
    #[serde(rename = "Cost Center", default, with = "text_column")]
    pub cost_center: String,
    #[serde(rename = "Service Group", default, with = "text_column")]
    pub service_group: String,
    #[serde(rename = "Optimization Exemption", default, with = "text_column")]
    pub optimization_exemption: String,
    #[serde(rename = "Resource ID + Type", default, with = "text_column")]
    pub resource_id_type: String,
    #[serde(rename = "Name", default, with = "text_column", skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "RowKey", default, skip_serializing_if = "Option::is_none")]
    pub row_key: Option<RowKey>,
}

impl TrackerRecord {
    /// (ResourceId, Savings Type): the join key against live findings.
    pub fn match_key(&self) -> (&str, &str) {
        (self.resource_id.as_str(), self.savings_type.as_str())
    }

    /// Apply one edited cell, coercing the value to the column's type.
    pub fn set_column(&mut self, column: &str, value: &Value) -> Result<(), TrackerError> {
        match column {
            "ResourceId" => self.resource_id = scalar_text(value),
            "RecommendationId" => self.recommendation_id = scalar_text(value),
            "DateOfSavings" => self.date_of_savings = parse_day_value(column, value)?,
            "FinOpsStatus" => self.status = FinOpsStatus::new(scalar_text(value)),
            "FinOpsLastModified" => self.last_modified = parse_day_value(column, value)?,
            "Comments" => self.comments = scalar_text(value),
            "Account" => self.account = scalar_text(value),
            "estimatedMonthlySavings" => {
                self.estimated_monthly_savings = match value {
                    Value::Null => 0.0,
                    other => coerce_f64(column, other)?,
                }
            }
            "Savings Type" => self.savings_type = scalar_text(value),
            "Cost Center" => self.cost_center = scalar_text(value),
            "Service Group" => self.service_group = scalar_text(value),
            "Optimization Exemption" => self.optimization_exemption = scalar_text(value),
            "Resource ID + Type" => self.resource_id_type = scalar_text(value),
            "Name" => self.name = scalar_text(value),
            other => return Err(TrackerError::UnknownColumn(other.to_string())),
        }
        Ok(())
    }

    /// Build a record from a sparse column map, as submitted for added rows.
    pub fn from_columns<'a, I>(columns: I) -> Result<Self, TrackerError>
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        let mut record = TrackerRecord::default();
        for (column, value) in columns {
            record.set_column(column, value)?;
        }
        Ok(record)
    }
}

/// Render a JSON value as column text. Typed attribute maps unwrap to their
/// `S` payload (or first scalar member); null and "nan" become empty.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) if is_missing_marker(s) => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => match map.get("S") {
            Some(inner) => scalar_text(inner),
            None => map
                .values()
                .find(|v| !v.is_object() && !v.is_array())
                .map(scalar_text)
                .unwrap_or_default(),
        },
        Value::Array(_) => value.to_string(),
    }
}

fn is_missing_marker(s: &str) -> bool {
    matches!(s, "nan" | "NaN" | "None" | "NaT")
}

/// Coerce a numeric column value, accepting numbers and numeric strings.
pub fn coerce_f64(field: &str, value: &Value) -> Result<f64, TrackerError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| TrackerError::type_conversion(field, n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| TrackerError::type_conversion(field, s)),
        Value::Object(map) => match map.get("N").or_else(|| map.get("S")) {
            Some(inner) => coerce_f64(field, inner),
            None => Err(TrackerError::type_conversion(field, value)),
        },
        other => Err(TrackerError::type_conversion(field, other)),
    }
}

/// Parse a date cell to day precision. Datetimes are truncated.
pub fn parse_day(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() || is_missing_marker(text) {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
    }
    None
}

fn parse_day_value(column: &str, value: &Value) -> Result<Option<NaiveDate>, TrackerError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() || is_missing_marker(s) => Ok(None),
        Value::String(s) => parse_day(s)
            .map(Some)
            .ok_or_else(|| TrackerError::type_conversion(column, s)),
        Value::Number(n) => epoch_millis_day(n)
            .map(Some)
            .ok_or_else(|| TrackerError::type_conversion(column, n)),
        other => Err(TrackerError::type_conversion(column, other)),
    }
}

/// Tables exported with timestamp columns store epoch milliseconds.
fn epoch_millis_day(n: &serde_json::Number) -> Option<NaiveDate> {
    n.as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| dt.date_naive())
}

mod text_column {
    use super::scalar_text;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_empty() {
            serializer.serialize_none()
        } else {
            serializer.serialize_str(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().map(scalar_text).unwrap_or_default())
    }
}

mod day_column {
    use super::parse_day;
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => serializer.serialize_str(&date.format("%Y-%m-%d").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => {
                if s.trim().is_empty() || super::is_missing_marker(&s) {
                    Ok(None)
                } else {
                    parse_day(&s)
                        .map(Some)
                        .ok_or_else(|| D::Error::custom(format!("invalid date {:?}", s)))
                }
            }
            Some(Value::Number(n)) => super::epoch_millis_day(&n)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid date {}", n))),
            Some(other) => Err(D::Error::custom(format!("invalid date {}", other))),
        }
    }
}

mod savings_column {
    use super::coerce_f64;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(0.0),
            Some(Value::String(s)) if s.trim().is_empty() || super::is_missing_marker(&s) => Ok(0.0),
            Some(value) => coerce_f64("estimatedMonthlySavings", &value).map_err(D::Error::custom),
        }
    }
}

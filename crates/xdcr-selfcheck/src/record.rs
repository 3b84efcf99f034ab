//! Conflict log records, expected and actual, and their tag vocabularies.

use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Value as JsonValue};
use xdcr_error::{Result, SelfCheckError};
use xdcr_types::hex::{decode_hex, hex};
use xdcr_types::{RowView, Value};

use crate::taxonomy::ConflictCategory;

/// Operation that produced a logged row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ActionType {
    Insert,
    Update,
    Delete,
}

impl ActionType {
    pub const ALL: [Self; 3] = [Self::Insert, Self::Update, Self::Delete];

    pub const fn tag(self) -> &'static str {
        match self {
            Self::Insert => "I",
            Self::Update => "U",
            Self::Delete => "D",
        }
    }

    pub fn parse(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "I" | "INSERT" => Ok(Self::Insert),
            "U" | "UPDATE" => Ok(Self::Update),
            "D" | "DELETE" => Ok(Self::Delete),
            _ => Err(SelfCheckError::unrecognized("action type", tag)),
        }
    }
}

/// Engine's verdict on the incoming change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Accept => "A",
            Self::Reject => "R",
        }
    }

    pub fn parse(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "A" | "ACCEPT" => Ok(Self::Accept),
            "R" | "REJECT" => Ok(Self::Reject),
            _ => Err(SelfCheckError::unrecognized("decision", tag)),
        }
    }
}

/// Role of a logged row within one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RowType {
    /// The local row the incoming change collided with.
    Existing,
    /// The before-image the incoming change expected to find.
    Expected,
    /// The incoming row.
    New,
}

impl RowType {
    pub const ALL: [Self; 3] = [Self::Existing, Self::Expected, Self::New];

    pub const fn tag(self) -> &'static str {
        match self {
            Self::Existing => "EXT",
            Self::Expected => "EXP",
            Self::New => "NEW",
        }
    }

    pub fn parse(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "EXT" => Ok(Self::Existing),
            "EXP" => Ok(Self::Expected),
            "NEW" => Ok(Self::New),
            _ => Err(SelfCheckError::unrecognized("row type", tag)),
        }
    }
}

/// Conflict tag of a record.
///
/// The log uses the four engine-level tags. Oracle rows may instead carry a
/// category tag, which states that the scenario's operation reached the peer
/// without producing any log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictType {
    None,
    ConstraintViolation,
    TimestampMismatch,
    MissingRow,
    NoLogExpected(ConflictCategory),
}

impl ConflictType {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::ConstraintViolation => "CNST",
            Self::TimestampMismatch => "MSMT",
            Self::MissingRow => "MISS",
            Self::NoLogExpected(category) => category.tag(),
        }
    }

    pub fn parse(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "CNST" => Ok(Self::ConstraintViolation),
            "MSMT" => Ok(Self::TimestampMismatch),
            "MISS" => Ok(Self::MissingRow),
            other => ConflictCategory::ALL
                .into_iter()
                .find(|category| category.tag() == other)
                .map(Self::NoLogExpected)
                .ok_or_else(|| SelfCheckError::unrecognized("conflict type", tag)),
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Engine timestamp as logged. Numeric timestamps compare numerically,
/// anything else falls back to text order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct LogicalTimestamp(String);

impl LogicalTimestamp {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u128> {
        self.0.trim().parse().ok()
    }
}

impl Ord for LogicalTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for LogicalTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LogicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of `<table>_conflict_expected` or `<table>_conflict_actual`.
///
/// Oracle rows leave the log-only fields (`row_type`, `current_*`, `tuple`)
/// empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    pub cid: u8,
    pub rid: i64,
    pub cluster_id: u8,
    pub ext_rid: i64,
    pub action_type: ActionType,
    pub conflict_type: ConflictType,
    pub decision: Decision,
    pub divergence: Option<String>,
    pub timestamp: LogicalTimestamp,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub row_type: Option<RowType>,
    pub current_cluster_id: Option<u8>,
    pub current_timestamp: Option<LogicalTimestamp>,
    pub tuple: Option<Map<String, JsonValue>>,
}

impl ConflictRecord {
    /// Parse an oracle row.
    pub fn from_expected_row(row: &RowView<'_>) -> Result<Self> {
        Ok(Self {
            cid: column_u8(row, "cid")?,
            rid: row.get_i64("rid")?,
            cluster_id: column_u8(row, "clusterid")?,
            ext_rid: row.get_i64("extrid")?,
            action_type: ActionType::parse(row.get_string("action_type")?)?,
            conflict_type: ConflictType::parse(row.get_string("conflict_type")?)?,
            decision: Decision::parse(row.get_string("decision")?)?,
            divergence: optional_text(row, "divergence")?,
            timestamp: LogicalTimestamp::new(row.get_string("ts")?),
            key: row.get_varbinary("key")?.map(<[u8]>::to_vec),
            value: row.get_varbinary("value")?.map(<[u8]>::to_vec),
            row_type: None,
            current_cluster_id: None,
            current_timestamp: None,
            tuple: None,
        })
    }

    /// Parse a logged conflict row. Key and value are taken from the tuple's
    /// hex-encoded `KEY` and `VALUE` fields when present.
    pub fn from_actual_row(row: &RowView<'_>) -> Result<Self> {
        let mut record = Self::from_expected_row(row)?;
        record.row_type = Some(RowType::parse(row.get_string("row_type")?)?);
        record.current_cluster_id = Some(column_u8(row, "current_clusterid")?);
        record.current_timestamp = Some(LogicalTimestamp::new(row.get_string("current_ts")?));
        record.tuple = parse_tuple(row.get("tuple")?)?;
        if let Some(tuple) = &record.tuple {
            if let Some(key) = tuple_bytes(tuple, "KEY")? {
                record.key = Some(key);
            }
            if let Some(value) = tuple_bytes(tuple, "VALUE")? {
                record.value = Some(value);
            }
        }
        Ok(record)
    }

    pub fn key(&self) -> &[u8] {
        self.key.as_deref().unwrap_or_default()
    }

    pub fn value(&self) -> &[u8] {
        self.value.as_deref().unwrap_or_default()
    }

    /// Logged rows always carry a role; its absence is fatal.
    pub fn logged_row_type(&self) -> Result<RowType> {
        self.row_type
            .ok_or_else(|| SelfCheckError::unrecognized("row type", "<missing>"))
    }

    /// Resolution time of a logged row, falling back to its own timestamp.
    pub fn resolved_at(&self) -> &LogicalTimestamp {
        self.current_timestamp.as_ref().unwrap_or(&self.timestamp)
    }
}

impl fmt::Display for ConflictRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cid={} rid={} extrid={} cluster={} action={} conflict={} decision={} ts={}",
            self.cid,
            self.rid,
            self.ext_rid,
            self.cluster_id,
            self.action_type.tag(),
            self.conflict_type,
            self.decision.tag(),
            self.timestamp,
        )?;
        if let Some(row_type) = self.row_type {
            write!(f, " row_type={}", row_type.tag())?;
        }
        write!(f, " key={} value={}", hex(self.key()), hex(self.value()))
    }
}

fn column_u8(row: &RowView<'_>, column: &str) -> Result<u8> {
    let raw = row.get_i64(column)?;
    u8::try_from(raw).map_err(|_| SelfCheckError::ResultShape {
        detail: format!("column {column}: {raw} does not fit in 0..=255"),
    })
}

fn optional_text(row: &RowView<'_>, column: &str) -> Result<Option<String>> {
    match row.get(column) {
        Ok(Value::Null) | Err(SelfCheckError::MissingColumn { .. }) => Ok(None),
        Ok(_) => row.get_string(column).map(|s| Some(s.to_owned())),
        Err(err) => Err(err),
    }
}

fn parse_tuple(value: &Value) -> Result<Option<Map<String, JsonValue>>> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Varbinary(bytes) => serde_json::from_slice(bytes)?,
        Value::Text(text) => serde_json::from_str(text)?,
        Value::BigInt(_) => {
            return Err(SelfCheckError::ResultShape {
                detail: "column tuple: expected VARBINARY, got BIGINT".to_owned(),
            });
        }
    };
    Ok(Some(parsed))
}

fn tuple_bytes(tuple: &Map<String, JsonValue>, field: &str) -> Result<Option<Vec<u8>>> {
    match tuple.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(encoded)) => decode_hex(encoded).map(Some),
        Some(other) => Err(SelfCheckError::ResultShape {
            detail: format!("tuple field {field}: expected hex string, got {other}"),
        }),
    }
}

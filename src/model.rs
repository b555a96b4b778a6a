use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::aggregate::{Aggregate, aggregate};
use crate::document::{Document, FieldPath, Fields, Patch, Value};
use crate::grid::{GridShape, day_count};
use crate::limits::*;
use crate::matrix::{ParticipantAvailability, cell_key};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// Top-level document fields.
pub const META_FIELD: &str = "meta";
pub const PARTICIPANTS_FIELD: &str = "participants";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title must not be empty")]
    EmptyTitle,
    #[error("title longer than {0} bytes")]
    TitleTooLong(usize),
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid time '{0}', expected HH:MM")]
    InvalidTime(String),
    #[error("start date {start} is after end date {end}")]
    DatesOutOfOrder { start: NaiveDate, end: NaiveDate },
    #[error("start time {start} is after end time {end}")]
    TimesOutOfOrder { start: NaiveTime, end: NaiveTime },
    #[error("date window of {0} days exceeds the limit")]
    WindowTooLarge(usize),
    #[error("participant name must not be empty")]
    EmptyName,
    #[error("participant name longer than {0} bytes")]
    NameTooLong(usize),
}

/// A stored document that cannot be read as an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed event document: {0}")]
pub struct DecodeError(pub String);

// ── Identifiers ──────────────────────────────────────────────────

/// Opaque event identifier; the document key in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Normalized participant identity: trimmed, lower-cased display name.
/// Names that normalize to the same key are the same participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantKey(String);

impl ParticipantKey {
    pub fn normalize(name: &str) -> Result<Self, ValidationError> {
        let key = name.trim().to_lowercase();
        if key.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if key.len() > MAX_NAME_LEN {
            return Err(ValidationError::NameTooLong(MAX_NAME_LEN));
        }
        Ok(Self(key))
    }

    /// Keys read back from the store were normalized when written.
    pub(crate) fn from_stored(key: &str) -> Self {
        Self(key.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn participant_path(key: &ParticipantKey) -> FieldPath {
    FieldPath::new([PARTICIPANTS_FIELD, key.as_str()])
}

pub fn cell_path(key: &ParticipantKey, row: usize, col: usize) -> FieldPath {
    FieldPath::new([
        PARTICIPANTS_FIELD.to_string(),
        key.as_str().to_string(),
        cell_key(row, col),
    ])
}

/// Partial write of one cell of one participant.
pub fn cell_patch(key: &ParticipantKey, row: usize, col: usize, value: bool) -> Patch {
    Patch::set(cell_path(key, row, col), value)
}

// ── Event metadata ───────────────────────────────────────────────

pub fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|_| ValidationError::InvalidDate(s.to_string()))
}

/// Accepts `HH:MM` and `HH:MM:SS`. Event windows keep only the minutes;
/// see [`whole_minute`].
pub fn parse_time(s: &str) -> Result<NaiveTime, ValidationError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| ValidationError::InvalidTime(s.to_string()))
}

/// Drop seconds and below. Windows are stored as `HH:MM`.
pub fn whole_minute(t: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

fn validate_window(
    title: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.trim().len() > MAX_TITLE_LEN {
        return Err(ValidationError::TitleTooLong(MAX_TITLE_LEN));
    }
    if start_date > end_date {
        return Err(ValidationError::DatesOutOfOrder {
            start: start_date,
            end: end_date,
        });
    }
    if start_time > end_time {
        return Err(ValidationError::TimesOutOfOrder {
            start: start_time,
            end: end_time,
        });
    }
    let days = day_count(start_date, end_date);
    if days > MAX_DAYS as usize {
        return Err(ValidationError::WindowTooLarge(days));
    }
    Ok(())
}

/// The event window. Fields are read-only: a value of this type is always valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    title: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    created_at: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new(
        title: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let (start_time, end_time) = (whole_minute(start_time), whole_minute(end_time));
        validate_window(title, start_date, end_date, start_time, end_time)?;
        Ok(Self {
            title: title.trim().to_string(),
            start_date,
            end_date,
            start_time,
            end_time,
            created_at,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn start_time(&self) -> NaiveTime {
        self.start_time
    }

    pub fn end_time(&self) -> NaiveTime {
        self.end_time
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn shape(&self) -> GridShape {
        GridShape::of(self)
    }

    pub fn to_value(&self) -> Value {
        let mut meta = Fields::new();
        meta.insert("title".into(), self.title.clone().into());
        meta.insert(
            "startDate".into(),
            self.start_date.format(DATE_FORMAT).to_string().into(),
        );
        meta.insert(
            "endDate".into(),
            self.end_date.format(DATE_FORMAT).to_string().into(),
        );
        meta.insert(
            "startTime".into(),
            self.start_time.format(TIME_FORMAT).to_string().into(),
        );
        meta.insert(
            "endTime".into(),
            self.end_time.format(TIME_FORMAT).to_string().into(),
        );
        meta.insert("createdAt".into(), self.created_at.to_rfc3339().into());
        Value::Map(meta)
    }

    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let meta = value
            .as_map()
            .ok_or_else(|| DecodeError("meta is not a map".into()))?;
        let text = |field: &str| {
            meta.get(field)
                .and_then(Value::as_text)
                .ok_or_else(|| DecodeError(format!("meta.{field} missing")))
        };
        let invalid = |e: ValidationError| DecodeError(e.to_string());

        let created_at = DateTime::parse_from_rfc3339(text("createdAt")?)
            .map_err(|e| DecodeError(format!("meta.createdAt: {e}")))?
            .with_timezone(&Utc);

        Self::new(
            text("title")?,
            parse_date(text("startDate")?).map_err(invalid)?,
            parse_date(text("endDate")?).map_err(invalid)?,
            parse_time(text("startTime")?).map_err(invalid)?,
            parse_time(text("endTime")?).map_err(invalid)?,
            created_at,
        )
        .map_err(invalid)
    }
}

/// Event creation input, parsed and validated from form strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    title: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
}

impl NewEvent {
    pub fn new(
        title: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Result<Self, ValidationError> {
        let (start_time, end_time) = (whole_minute(start_time), whole_minute(end_time));
        validate_window(title, start_date, end_date, start_time, end_time)?;
        Ok(Self {
            title: title.trim().to_string(),
            start_date,
            end_date,
            start_time,
            end_time,
        })
    }

    pub fn parse(
        title: &str,
        start_date: &str,
        end_date: &str,
        start_time: &str,
        end_time: &str,
    ) -> Result<Self, ValidationError> {
        Self::new(
            title,
            parse_date(start_date)?,
            parse_date(end_date)?,
            parse_time(start_time)?,
            parse_time(end_time)?,
        )
    }

    pub fn into_metadata(self, created_at: DateTime<Utc>) -> EventMetadata {
        EventMetadata {
            title: self.title,
            start_date: self.start_date,
            end_date: self.end_date,
            start_time: self.start_time,
            end_time: self.end_time,
            created_at,
        }
    }
}

// ── Event state ──────────────────────────────────────────────────

/// The shared aggregate: immutable metadata plus every participant's cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventState {
    pub metadata: EventMetadata,
    pub participants: BTreeMap<ParticipantKey, ParticipantAvailability>,
}

impl EventState {
    pub fn new(metadata: EventMetadata) -> Self {
        Self {
            metadata,
            participants: BTreeMap::new(),
        }
    }

    pub fn shape(&self) -> GridShape {
        self.metadata.shape()
    }

    pub fn participant(&self, key: &ParticipantKey) -> Option<&ParticipantAvailability> {
        self.participants.get(key)
    }

    pub fn aggregate(&self) -> Aggregate {
        let shape = self.shape();
        aggregate(&self.participants, shape.rows, shape.cols)
    }

    pub fn to_document(&self) -> Document {
        let participants: Fields = self
            .participants
            .iter()
            .map(|(k, p)| (k.as_str().to_string(), Value::Map(p.to_fields())))
            .collect();
        let mut doc = Document::new();
        doc.insert(META_FIELD.into(), self.metadata.to_value());
        doc.insert(PARTICIPANTS_FIELD.into(), Value::Map(participants));
        doc
    }

    /// Decode a stored document. Metadata must be valid; participant data
    /// that does not fit the grid is dropped.
    pub fn from_document(doc: &Document) -> Result<Self, DecodeError> {
        let meta = doc
            .get(META_FIELD)
            .ok_or_else(|| DecodeError("meta missing".into()))?;
        let metadata = EventMetadata::from_value(meta)?;
        let shape = metadata.shape();

        let mut state = Self::new(metadata);
        match doc.get(PARTICIPANTS_FIELD) {
            Some(Value::Map(participants)) => {
                for (key, record) in participants {
                    match record.as_map() {
                        Some(fields) => {
                            state.participants.insert(
                                ParticipantKey::from_stored(key),
                                ParticipantAvailability::from_fields(fields, shape),
                            );
                        }
                        None => tracing::debug!("discarding non-map participant record {key}"),
                    }
                }
            }
            Some(_) => tracing::debug!("participants field is not a map, treating as empty"),
            None => {}
        }
        Ok(state)
    }
}

// ── WAL record format ────────────────────────────────────────────

/// Store mutations, flat. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    /// Whole-document write; `merge` deep-merges into the existing document.
    DocumentSet {
        id: EventId,
        doc: Document,
        merge: bool,
    },
    /// Targeted field writes, applied in order.
    DocumentUpdated { id: EventId, patches: Vec<Patch> },
}

impl Record {
    pub fn id(&self) -> &EventId {
        match self {
            Record::DocumentSet { id, .. } | Record::DocumentUpdated { id, .. } => id,
        }
    }
}

//! Chunk descriptors parsed from staged object names
//!
//! The export job names every CSV it stages as
//!
//! ```text
//! {table_id}__{overwrite|append}/{YYYY-MM-DD_HH:MM:SS}__{start:04}_{end:04}.csv
//! ```
//!
//! e.g. `user__append/2025-01-01_00:00:00__0001_1000.csv`. The timestamp is
//! the moment the export began and identifies its generation; the range is
//! the 1-based inclusive span of exported rows held by the chunk.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between table and write mode, and between timestamp and range
pub const PART_SEPARATOR: &str = "__";

/// Separator between the range bounds
pub const RANGE_SEPARATOR: &str = "_";

/// Required suffix of every staged chunk
pub const CSV_SUFFIX: &str = ".csv";

/// Format of the export timestamp inside object names (always UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// How a chunk's export wants its destination table written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// The export replaces the table: its first chunk truncates
    Overwrite,
    /// Every chunk appends
    Append,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Overwrite => "overwrite",
            WriteMode::Append => "append",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = MalformedName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overwrite" => Ok(WriteMode::Overwrite),
            "append" => Ok(WriteMode::Append),
            other => Err(MalformedName::UnknownWriteMode(other.to_string())),
        }
    }
}

/// The piece of an object name being split when a segment count is wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamePart {
    ObjectName,
    FolderName,
    FileName,
    RowRange,
}

impl fmt::Display for NamePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NamePart::ObjectName => "object name",
            NamePart::FolderName => "folder name",
            NamePart::FileName => "file name",
            NamePart::RowRange => "row range",
        })
    }
}

/// Why an object name can never be ingested
///
/// Variants are listed in the order the checks run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedName {
    #[error("{part} should have 2 parts when split with {separator:?}, found {found}")]
    SegmentCount {
        part: NamePart,
        separator: &'static str,
        found: usize,
    },

    #[error("table name is blank")]
    EmptyTableId,

    #[error("write mode must be one of (\"overwrite\", \"append\"), found {0:?}")]
    UnknownWriteMode(String),

    #[error("file name should end with \".csv\"")]
    MissingCsvSuffix,

    #[error("export timestamp {value:?} does not match %Y-%m-%d_%H:%M:%S: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("row index {0:?} is not an integer")]
    InvalidRowIndex(String),

    #[error("row range start {0} is less than 1")]
    RangeStartBelowOne(i64),

    #[error("row range end {end} is less than its start {start}")]
    RangeEndBeforeStart { start: i64, end: i64 },
}

/// Identity and write intent of one staged chunk
///
/// Fields are private so a descriptor always satisfies the naming rules:
/// non-empty table, `range_start >= 1` and `range_end >= range_start`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkDescriptor {
    table_id: String,
    write_mode: WriteMode,
    export_timestamp: DateTime<Utc>,
    range_start: u64,
    range_end: u64,
}

impl ChunkDescriptor {
    /// Build a descriptor from already-typed parts, applying the same checks as parsing
    pub fn new(
        table_id: impl Into<String>,
        write_mode: WriteMode,
        export_timestamp: DateTime<Utc>,
        range_start: i64,
        range_end: i64,
    ) -> Result<Self, MalformedName> {
        let table_id = table_id.into();
        if table_id.is_empty() {
            return Err(MalformedName::EmptyTableId);
        }
        if range_start < 1 {
            return Err(MalformedName::RangeStartBelowOne(range_start));
        }
        if range_end < range_start {
            return Err(MalformedName::RangeEndBeforeStart {
                start: range_start,
                end: range_end,
            });
        }

        Ok(Self {
            table_id,
            write_mode,
            export_timestamp,
            range_start: range_start as u64,
            range_end: range_end as u64,
        })
    }

    /// Parse a staged object name
    pub fn parse(object_name: &str) -> Result<Self, MalformedName> {
        let [folder, file] = split_pair(object_name, "/", NamePart::ObjectName)?;
        let [table_id, write_mode] = split_pair(folder, PART_SEPARATOR, NamePart::FolderName)?;

        if table_id.is_empty() {
            return Err(MalformedName::EmptyTableId);
        }
        let write_mode: WriteMode = write_mode.parse()?;

        let stem = file
            .strip_suffix(CSV_SUFFIX)
            .ok_or(MalformedName::MissingCsvSuffix)?;
        let [timestamp, range] = split_pair(stem, PART_SEPARATOR, NamePart::FileName)?;

        let export_timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| MalformedName::InvalidTimestamp {
                value: timestamp.to_string(),
                reason: e.to_string(),
            })?
            .and_utc();

        let [start, end] = split_pair(range, RANGE_SEPARATOR, NamePart::RowRange)?;
        let range_start = parse_row_index(start)?;
        let range_end = parse_row_index(end)?;

        Self::new(table_id, write_mode, export_timestamp, range_start, range_end)
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    pub fn export_timestamp(&self) -> DateTime<Utc> {
        self.export_timestamp
    }

    pub fn range_start(&self) -> u64 {
        self.range_start
    }

    pub fn range_end(&self) -> u64 {
        self.range_end
    }

    /// Number of rows the chunk claims to hold
    pub fn row_count(&self) -> u64 {
        self.range_end - self.range_start + 1
    }

    /// Key identifying this chunk within its export generation
    pub fn chunk_key(&self) -> String {
        format!("{}{}{}", self.range_start, RANGE_SEPARATOR, self.range_end)
    }

    /// Canonical object name, zero-padding the range to four digits
    pub fn object_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChunkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{table}{sep}{mode}/{ts}{sep}{start:04}{range_sep}{end:04}{CSV_SUFFIX}",
            table = self.table_id,
            sep = PART_SEPARATOR,
            mode = self.write_mode,
            ts = self.export_timestamp.format(TIMESTAMP_FORMAT),
            start = self.range_start,
            range_sep = RANGE_SEPARATOR,
            end = self.range_end,
        )
    }
}

impl FromStr for ChunkDescriptor {
    type Err = MalformedName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_pair<'a>(
    value: &'a str,
    separator: &'static str,
    part: NamePart,
) -> Result<[&'a str; 2], MalformedName> {
    let parts: Vec<&str> = value.split(separator).collect();
    match parts.as_slice() {
        [first, second] => Ok([*first, *second]),
        _ => Err(MalformedName::SegmentCount {
            part,
            separator,
            found: parts.len(),
        }),
    }
}

fn parse_row_index(value: &str) -> Result<i64, MalformedName> {
    value
        .parse::<i64>()
        .map_err(|_| MalformedName::InvalidRowIndex(value.to_string()))
}

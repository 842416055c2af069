//! Tag data model and the neutral row format returned by connectors.
//!
//! Connectors translate driver rows into [`Rows`]; the store turns those into
//! [`Tag`]s, timestamp lists or a [`TabularOutput`] for the formatter.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

use crate::dates;
use crate::error::{Result, StoreError};

/// Legacy wire value for "no data".
pub const MISSING_SENTINEL: f32 = -1.0;

/// A single timestamped measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    /// Tag name
    pub name: String,
    /// Measurement time (backend wall-clock time)
    pub date: NaiveDateTime,
    /// Measured value, `None` when the backend has no data for this point
    pub value: Option<f32>,
}

impl Tag {
    pub fn new(name: impl Into<String>, date: NaiveDateTime, value: Option<f32>) -> Self {
        Self {
            name: name.into(),
            date,
            value,
        }
    }

    /// Value with the legacy `-1` standing in for "no data".
    pub fn value_or_sentinel(&self) -> f32 {
        self.value.unwrap_or(MISSING_SENTINEL)
    }
}

/// Ordered collection of tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Tags(pub Vec<Tag>);

impl Tags {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, tag: Tag) {
        self.0.push(tag);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }

    /// Tags with the given name.
    pub fn by_name<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.0.iter().filter(move |t| t.name == name)
    }

    /// Average of the present values recorded under `name`.
    pub fn average(&self, name: &str) -> Option<f32> {
        let (sum, count) = self
            .by_name(name)
            .filter_map(|t| t.value)
            .fold((0f64, 0usize), |(sum, count), v| (sum + v as f64, count + 1));
        if count == 0 {
            None
        } else {
            Some((sum / count as f64) as f32)
        }
    }

    /// Tags dated in the half-open window `[from, to)`.
    pub fn window(&self, from: NaiveDateTime, to: NaiveDateTime) -> Tags {
        Tags(
            self.0
                .iter()
                .filter(|t| t.date >= from && t.date < to)
                .cloned()
                .collect(),
        )
    }
}

impl IntoIterator for Tags {
    type Item = Tag;
    type IntoIter = std::vec::IntoIter<Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<Tag> for Tags {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Tags(iter.into_iter().collect())
    }
}

/// Header + string rows, used for tag listings and ad-hoc query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TabularOutput {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TabularOutput {
    pub fn with_headers(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Appends a row, rejecting rows whose width differs from the headers.
    pub fn push_row(&mut self, row: Vec<String>) -> Result<()> {
        if row.len() != self.headers.len() {
            return Err(StoreError::Query(format!(
                "row has {} columns, expected {}",
                row.len(),
                self.headers.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }
}

impl TryFrom<Rows> for TabularOutput {
    type Error = StoreError;

    fn try_from(rows: Rows) -> Result<Self> {
        let mut out = TabularOutput::with_headers(rows.columns);
        for row in rows.rows {
            out.push_row(row.iter().map(ToString::to_string).collect())?;
        }
        Ok(out)
    }
}

/// Backend health as reported by the `status` query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendStatus {
    pub version: String,
    pub uptime: String,
}

/// A single cell returned by a connector.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Int(v) => Some(*v as f32),
            Value::Float(v) => Some(*v as f32),
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().replace(',', ".").parse().ok(),
            Value::Null | Value::Timestamp(_) => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Text(s) => dates::parse_canonical(s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::Timestamp(v) => write!(f, "{}", v.format(dates::CANONICAL_FORMAT)),
        }
    }
}

/// Rows returned by a connector, with column names in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Rows {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&[Value]> {
        self.rows.first().map(Vec::as_slice)
    }

    /// Reads `(name, date, value)` rows as tags; NULL values become `None`.
    pub fn into_tags(self) -> Result<Tags> {
        self.rows.iter().map(|row| row_to_tag(row)).collect()
    }

    /// Reads the first column of every row as a timestamp.
    pub fn into_dates(self) -> Result<Vec<NaiveDateTime>> {
        self.rows
            .iter()
            .map(|row| {
                row.first()
                    .and_then(Value::as_datetime)
                    .ok_or_else(|| StoreError::Query("expected a timestamp column".to_string()))
            })
            .collect()
    }
}

fn row_to_tag(row: &[Value]) -> Result<Tag> {
    if row.len() < 3 {
        return Err(StoreError::Query(format!(
            "expected (name, date, value) row, got {} columns",
            row.len()
        )));
    }
    let name = row[0]
        .as_text()
        .ok_or_else(|| StoreError::Query("tag name is NULL".to_string()))?;
    let date = row[1]
        .as_datetime()
        .ok_or_else(|| StoreError::Query(format!("invalid tag date '{}'", row[1])))?;
    Ok(Tag::new(name, date, row[2].as_f32()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_average_ignores_other_tags_and_missing_values() {
        let tags = Tags(vec![
            Tag::new("A", ts(0, 0, 1), Some(1.0)),
            Tag::new("A", ts(0, 0, 2), Some(3.0)),
            Tag::new("A", ts(0, 0, 3), None),
            Tag::new("B", ts(0, 0, 1), Some(100.0)),
        ]);
        assert_eq!(tags.average("A"), Some(2.0));
        assert_eq!(tags.average("C"), None);
    }

    #[test]
    fn test_window_is_half_open() {
        let tags = Tags(vec![
            Tag::new("A", ts(0, 0, 0), Some(1.0)),
            Tag::new("A", ts(0, 0, 30), Some(2.0)),
            Tag::new("A", ts(0, 1, 0), Some(3.0)),
        ]);
        let inside = tags.window(ts(0, 0, 0), ts(0, 1, 0));
        assert_eq!(inside.len(), 2);
        assert_eq!(inside.0[0].value, Some(1.0));
        assert_eq!(inside.0[1].value, Some(2.0));
        assert!(tags.window(ts(0, 0, 30), ts(0, 0, 30)).is_empty());
    }

    #[test]
    fn test_tabular_output_rejects_ragged_rows() {
        let mut out = TabularOutput::with_headers(vec!["a".into(), "b".into()]);
        assert!(out.push_row(vec!["1".into(), "2".into()]).is_ok());
        assert!(out.push_row(vec!["1".into()]).is_err());
        assert_eq!(out.count(), 1);
    }

    #[test]
    fn test_rows_into_tags() {
        let rows = Rows {
            columns: vec!["name".into(), "date".into(), "value".into()],
            rows: vec![
                vec![
                    Value::Text("A".into()),
                    Value::Text("2024-01-01 00:00:05".into()),
                    Value::Float(1.5),
                ],
                vec![Value::Text("A".into()), Value::Timestamp(ts(0, 0, 6)), Value::Null],
            ],
        };
        let tags = rows.into_tags().unwrap();
        assert_eq!(tags.0[0], Tag::new("A", ts(0, 0, 5), Some(1.5)));
        assert_eq!(tags.0[1].value, None);
        assert_eq!(tags.0[1].value_or_sentinel(), MISSING_SENTINEL);
    }

    #[test]
    fn test_rows_into_tabular_output_renders_nulls_empty() {
        let rows = Rows {
            columns: vec!["name".into(), "note".into()],
            rows: vec![vec![Value::Text("A".into()), Value::Null]],
        };
        let out = TabularOutput::try_from(rows).unwrap();
        assert_eq!(out.rows, vec![vec!["A".to_string(), String::new()]]);
    }
}

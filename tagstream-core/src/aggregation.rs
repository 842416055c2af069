//! Group functions and time bucketing for tag series.
//!
//! This module defines:
//! - The group functions a caller may request (`avg`, `sum`, `min`, `max`,
//!   `dif`, `count`, `avgm`) and which backend query template answers each
//! - Splitting a `[from, to)` interval into equal sub-windows
//! - The composite key under which an aggregate is cached

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::dates::format_canonical;
use crate::error::StoreError;
use crate::query::QueryName;

/// Aggregation applied to the values of one tag inside a time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupFunction {
    Avg,
    Sum,
    Min,
    Max,
    /// Difference between the last and first value of the window
    Dif,
    /// Number of rows in the window
    Count,
    /// Average computed locally over the raw rows, not pushed to the backend
    Avgm,
}

impl GroupFunction {
    /// Query template answering this function, `None` for local aggregation.
    pub fn query_name(&self) -> Option<QueryName> {
        match self {
            GroupFunction::Avg | GroupFunction::Sum | GroupFunction::Min | GroupFunction::Max => {
                Some(QueryName::GetTagFromToGroup)
            }
            GroupFunction::Dif => Some(QueryName::GetTagFromToGroupDif),
            GroupFunction::Count => Some(QueryName::GetTagFromToGroupCount),
            GroupFunction::Avgm => None,
        }
    }

    /// Keyword substituted for `{group}` in the shared aggregate query.
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            GroupFunction::Avg => "avg",
            GroupFunction::Sum => "sum",
            GroupFunction::Min => "min",
            GroupFunction::Max => "max",
            GroupFunction::Dif => "dif",
            GroupFunction::Count => "count",
            GroupFunction::Avgm => "avgm",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, GroupFunction::Avgm)
    }
}

impl Display for GroupFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sql_keyword())
    }
}

impl FromStr for GroupFunction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "avg" => Ok(GroupFunction::Avg),
            "sum" => Ok(GroupFunction::Sum),
            "min" => Ok(GroupFunction::Min),
            "max" => Ok(GroupFunction::Max),
            "dif" => Ok(GroupFunction::Dif),
            "count" => Ok(GroupFunction::Count),
            "avgm" => Ok(GroupFunction::Avgm),
            other => Err(StoreError::GroupError(other.to_string())),
        }
    }
}

/// One sub-window of a split interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
}

/// Validates a requested bucket count.
pub fn check_count(count: i64) -> Result<usize, StoreError> {
    match count {
        0 => Err(StoreError::CountIsEmpty),
        c if c < 0 => Err(StoreError::CountIsLessThanOne),
        c => Ok(c as usize),
    }
}

/// Step between consecutive samples, `(to - from) / count`.
pub fn step(from: NaiveDateTime, to: NaiveDateTime, count: usize) -> Duration {
    let total = (to - from).num_milliseconds();
    Duration::milliseconds(total / count as i64)
}

/// Sample instants `from + i·step` for `i` in `[0, count)`.
pub fn sample_points(from: NaiveDateTime, to: NaiveDateTime, count: usize) -> Vec<NaiveDateTime> {
    let step = step(from, to, count);
    (0..count).map(|i| from + step * i as i32).collect()
}

/// Splits `[from, to)` into `count` consecutive windows of equal length.
pub fn buckets(from: NaiveDateTime, to: NaiveDateTime, count: usize) -> Vec<Bucket> {
    let step = step(from, to, count);
    (0..count)
        .map(|i| Bucket {
            from: from + step * i as i32,
            to: from + step * (i as i32 + 1),
        })
        .collect()
}

/// Composite cache key `"{from}|{to}|{group}"`.
pub fn range_key(from: NaiveDateTime, to: NaiveDateTime, group: GroupFunction) -> String {
    format!("{}|{}|{}", format_canonical(from), format_canonical(to), group)
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
    fn test_parse_group_functions() {
        assert_eq!("AVG".parse::<GroupFunction>().unwrap(), GroupFunction::Avg);
        assert_eq!(" avgm ".parse::<GroupFunction>().unwrap(), GroupFunction::Avgm);
        assert_eq!(
            "bogus".parse::<GroupFunction>(),
            Err(StoreError::GroupError("bogus".to_string()))
        );
    }

    #[test]
    fn test_query_names() {
        assert_eq!(GroupFunction::Max.query_name(), Some(QueryName::GetTagFromToGroup));
        assert_eq!(GroupFunction::Dif.query_name(), Some(QueryName::GetTagFromToGroupDif));
        assert_eq!(GroupFunction::Count.query_name(), Some(QueryName::GetTagFromToGroupCount));
        assert_eq!(GroupFunction::Avgm.query_name(), None);
    }

    #[test]
    fn test_check_count() {
        assert_eq!(check_count(0), Err(StoreError::CountIsEmpty));
        assert_eq!(check_count(-3), Err(StoreError::CountIsLessThanOne));
        assert_eq!(check_count(4), Ok(4));
    }

    #[test]
    fn test_sample_points_are_evenly_spaced() {
        let points = sample_points(ts(0, 0, 0), ts(0, 1, 0), 4);
        assert_eq!(points, vec![ts(0, 0, 0), ts(0, 0, 15), ts(0, 0, 30), ts(0, 0, 45)]);
    }

    #[test]
    fn test_buckets_cover_interval() {
        let windows = buckets(ts(0, 0, 0), ts(1, 0, 0), 3);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].from, ts(0, 0, 0));
        assert_eq!(windows[0].to, ts(0, 20, 0));
        assert_eq!(windows[2].to, ts(1, 0, 0));
    }

    #[test]
    fn test_range_key() {
        assert_eq!(
            range_key(ts(0, 0, 0), ts(0, 1, 0), GroupFunction::Sum),
            "2024-01-01 00:00:00|2024-01-01 00:01:00|sum"
        );
    }
}

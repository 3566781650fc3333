//! Sensor channel data types.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Named value column of a channel or aligned table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub vals: Vec<f64>,
}

impl Column {
    pub fn new<S: Into<String>>(name: S, vals: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            vals,
        }
    }
}

/// Time-ordered samples of one sensor at a nominal rate.
///
/// Row `i` of the channel is the timestamp `time[i]` (seconds) together with
/// value `i` of every column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    name: String,
    rate_hz: f64,
    time: Vec<f64>,
    cols: Vec<Column>,
}

impl Channel {
    /// Create a channel, checking that every column matches the timeline.
    pub fn new<S: Into<String>>(
        name: S,
        rate_hz: f64,
        time: Vec<f64>,
        cols: Vec<Column>,
    ) -> Result<Self, CoreError> {
        let mut channel = Self {
            name: name.into(),
            rate_hz,
            time,
            cols: Vec::with_capacity(cols.len()),
        };
        for col in cols {
            channel.append(col)?;
        }
        Ok(channel)
    }

    /// Create a channel sampled exactly at `rate_hz` starting at `t_0`.
    pub fn uniform<S: Into<String>>(
        name: S,
        rate_hz: f64,
        t_0: f64,
        cols: Vec<Column>,
    ) -> Result<Self, CoreError> {
        let n_vals = cols.first().map_or(0, |col| col.vals.len());
        let time = (0..n_vals).map(|i| t_0 + i as f64 / rate_hz).collect();
        Self::new(name, rate_hz, time, cols)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate_hz(&self) -> f64 {
        self.rate_hz
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.cols
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.cols.iter().any(|col| col.name == name)
    }

    pub fn column(&self, name: &str) -> Result<&[f64], CoreError> {
        self.cols
            .iter()
            .find(|col| col.name == name)
            .map(|col| col.vals.as_slice())
            .ok_or_else(|| CoreError::MissingRequiredColumn {
                channel: self.name.clone(),
                column: name.to_string(),
            })
    }

    /// Append a (derived) column of the same length as the timeline.
    pub fn append(&mut self, col: Column) -> Result<(), CoreError> {
        if col.vals.len() != self.time.len() {
            return Err(CoreError::LengthMismatch {
                channel: self.name.clone(),
                column: col.name,
                expected: self.time.len(),
                actual: col.vals.len(),
            });
        }
        if self.has_column(&col.name) {
            return Err(CoreError::DuplicateColumn { column: col.name });
        }
        self.cols.push(col);
        Ok(())
    }

    /// Check the invariants a deserialized channel may violate.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut names = HashSet::new();
        for col in &self.cols {
            if col.vals.len() != self.time.len() {
                return Err(CoreError::LengthMismatch {
                    channel: self.name.clone(),
                    column: col.name.clone(),
                    expected: self.time.len(),
                    actual: col.vals.len(),
                });
            }
            if !names.insert(col.name.as_str()) {
                return Err(CoreError::DuplicateColumn {
                    column: col.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Check that timestamps never decrease. NaN timestamps are violations.
    pub fn check_monotonic(&self) -> Result<(), CoreError> {
        for (idx, pair) in self.time.windows(2).enumerate() {
            let (prev, next) = (pair[0], pair[1]);
            if prev.is_nan() || next.is_nan() || prev > next {
                return Err(CoreError::MonotonicityViolation {
                    channel: self.name.clone(),
                    idx: idx + 1,
                    prev,
                    next,
                });
            }
        }
        Ok(())
    }

    /// Index range of the samples with `t_start <= time < t_end`.
    pub fn index_range(&self, t_start: f64, t_end: f64) -> (usize, usize) {
        let start = self.time.partition_point(|&t| t < t_start);
        let end = self.time.partition_point(|&t| t < t_end).max(start);
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(time: Vec<f64>) -> Channel {
        let vals = (0..time.len()).map(|i| i as f64).collect();
        Channel::new("robot", 250.0, time, vec![Column::new("Pos_x(mm)", vals)]).unwrap()
    }

    #[test]
    fn uniform_builds_timeline() {
        let ch = Channel::uniform("mic", 4.0, 1.0, vec![Column::new("Amplitude", vec![0.0; 3])])
            .unwrap();
        assert_eq!(ch.time(), &[1.0, 1.25, 1.5]);
        assert_eq!(ch.rate_hz(), 4.0);
    }

    #[test]
    fn column_lookup_reports_channel() {
        let ch = channel(vec![0.0, 1.0]);
        assert_eq!(ch.column("Pos_x(mm)").unwrap(), &[0.0, 1.0]);
        assert_eq!(
            ch.column("Pos_y(mm)").unwrap_err(),
            CoreError::MissingRequiredColumn {
                channel: "robot".to_string(),
                column: "Pos_y(mm)".to_string()
            }
        );
    }

    #[test]
    fn append_checks_length_and_name() {
        let mut ch = channel(vec![0.0, 1.0]);
        assert!(matches!(
            ch.append(Column::new("Avg", vec![1.0])),
            Err(CoreError::LengthMismatch { expected: 2, actual: 1, .. })
        ));
        assert!(matches!(
            ch.append(Column::new("Pos_x(mm)", vec![1.0, 2.0])),
            Err(CoreError::DuplicateColumn { .. })
        ));
        ch.append(Column::new("Avg", vec![f64::NAN, 0.5])).unwrap();
        assert!(ch.has_column("Avg"));
        assert!(ch.validate().is_ok());
    }

    #[test]
    fn monotonicity_violation_names_index() {
        assert!(channel(vec![0.0, 0.5, 0.5, 1.0]).check_monotonic().is_ok());
        assert_eq!(
            channel(vec![0.0, 0.5, 0.4]).check_monotonic().unwrap_err(),
            CoreError::MonotonicityViolation {
                channel: "robot".to_string(),
                idx: 2,
                prev: 0.5,
                next: 0.4
            }
        );
        assert!(channel(vec![0.0, f64::NAN]).check_monotonic().is_err());
    }

    #[test]
    fn index_range_is_half_open() {
        let ch = channel(vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        assert_eq!(ch.index_range(0.5, 1.5), (1, 3));
        assert_eq!(ch.index_range(3.0, 4.0), (5, 5));
        assert_eq!(ch.index_range(1.0, 0.0), (2, 2));
    }
}

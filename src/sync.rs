//! Multi-rate synchronization onto a basis timeline.
//!
//! Every secondary channel is resampled with step-hold: the value at basis
//! time `t` is the value of the latest secondary sample with timestamp `<= t`.
//! A single forward cursor per secondary makes one pass O(basis + secondary).
//!
//! Basis times before the first secondary sample take the secondary's first
//! value. Existing aligned tables were produced this way, so the undershoot is
//! kept, even though it hides that the secondary had no data yet.

use crate::channel::{Channel, Column};
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Forward-only cursor into a non-decreasing timeline.
#[derive(Debug)]
pub struct StepHold<'a> {
    time: &'a [f64],
    cursor: usize,
}

impl<'a> StepHold<'a> {
    pub fn new(time: &'a [f64]) -> Self {
        Self { time, cursor: 0 }
    }

    /// Move to the last sample at or before `t` and return its index.
    ///
    /// Never moves backward; stays at 0 while `t` precedes the first sample.
    pub fn advance(&mut self, t: f64) -> usize {
        while self.cursor + 1 < self.time.len() && self.time[self.cursor + 1] <= t {
            self.cursor += 1;
        }
        self.cursor
    }
}

/// A channel together with the columns it contributes to an aligned table.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub channel: &'a Channel,
    pub columns: Vec<String>,
}

impl<'a> Selection<'a> {
    pub fn new(channel: &'a Channel, columns: &[String]) -> Self {
        Self {
            channel,
            columns: columns.to_vec(),
        }
    }

    /// Check every precondition of [`synchronize`] for this channel.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.channel.is_empty() {
            return Err(CoreError::EmptyChannel {
                channel: self.channel.name().to_string(),
            });
        }
        self.channel.check_monotonic()?;
        for col in &self.columns {
            self.channel.column(col)?;
        }
        Ok(())
    }
}

/// Columns resampled onto one shared timeline.
///
/// All columns have the length of `time`; row `i` of every column belongs to
/// basis time `time[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedTable {
    time: Vec<f64>,
    cols: Vec<Column>,
}

impl AlignedTable {
    pub const TIME_COLUMN: &'static str = "time";

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn columns(&self) -> &[Column] {
        &self.cols
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.cols
            .iter()
            .find(|col| col.name == name)
            .map(|col| col.vals.as_slice())
    }
}

/// Resample `secondaries` onto the timestamps of `basis`.
///
/// The basis columns are copied as they are; secondary columns are
/// step-held. Column names are kept unmodified and must be unique across the
/// whole table.
pub fn synchronize(basis: &Selection, secondaries: &[Selection]) -> Result<AlignedTable, CoreError> {
    basis.channel.check_monotonic()?;
    for col in &basis.columns {
        basis.channel.column(col)?;
    }
    for sec in secondaries {
        sec.validate()?;
    }

    let mut names = HashSet::from([AlignedTable::TIME_COLUMN]);
    let all_cols = basis
        .columns
        .iter()
        .chain(secondaries.iter().flat_map(|sec| sec.columns.iter()));
    for name in all_cols {
        if !names.insert(name.as_str()) {
            return Err(CoreError::DuplicateColumn {
                column: name.clone(),
            });
        }
    }

    let time = basis.channel.time().to_vec();
    let mut cols = Vec::new();
    for name in &basis.columns {
        cols.push(Column::new(name.clone(), basis.channel.column(name)?.to_vec()));
    }

    for sec in secondaries {
        let idxs = hold_indices(sec.channel.time(), &time);
        for name in &sec.columns {
            let vals = sec.channel.column(name)?;
            cols.push(Column::new(name.clone(), idxs.iter().map(|&i| vals[i]).collect()));
        }
        log::debug!(
            "resampled {:?} ({} samples) onto {} basis rows",
            sec.channel.name(),
            sec.channel.len(),
            time.len()
        );
    }

    Ok(AlignedTable { time, cols })
}

/// A secondary left out of an aligned table, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub channel: String,
    pub error: CoreError,
}

/// Split `secondaries` into those meeting the preconditions of
/// [`synchronize`] and those that do not.
pub fn split_valid<'a>(secondaries: Vec<Selection<'a>>) -> (Vec<Selection<'a>>, Vec<Skipped>) {
    let mut valid = Vec::with_capacity(secondaries.len());
    let mut skipped = Vec::new();
    for sec in secondaries {
        match sec.validate() {
            Ok(()) => valid.push(sec),
            Err(error) => skipped.push(Skipped {
                channel: sec.channel.name().to_string(),
                error,
            }),
        }
    }
    (valid, skipped)
}

/// Like [`synchronize`], but a secondary failing its preconditions is left
/// out and reported instead of failing the whole table.
///
/// Basis failures and duplicate column names still fail the call.
pub fn synchronize_available(
    basis: &Selection,
    secondaries: Vec<Selection>,
) -> Result<(AlignedTable, Vec<Skipped>), CoreError> {
    let (valid, skipped) = split_valid(secondaries);
    for skip in &skipped {
        log::warn!("leaving {:?} out of the aligned table: {}", skip.channel, skip.error);
    }
    Ok((synchronize(basis, &valid)?, skipped))
}

/// Secondary sample index used for every basis time.
fn hold_indices(sec_time: &[f64], basis_time: &[f64]) -> Vec<usize> {
    let mut hold = StepHold::new(sec_time);
    basis_time.iter().map(|&t| hold.advance(t)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha12Rng;

    fn channel(name: &str, col: &str, time: Vec<f64>, vals: Vec<f64>) -> Channel {
        Channel::new(name, 1.0, time, vec![Column::new(col, vals)]).unwrap()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn jittered(n_vals: usize, rate_hz: f64, rng: &mut ChaCha12Rng) -> Vec<f64> {
        (0..n_vals)
            .map(|i| (i as f64 + rng.random_range(0.0..0.5)) / rate_hz)
            .collect()
    }

    #[test]
    fn step_hold_scenario() {
        let basis = channel("mic", "Amplitude", vec![0.0, 0.5, 1.0, 1.5], vec![0.0; 4]);
        let sec = channel("robot", "Pos_x(mm)", vec![0.0, 1.0], vec![10.0, 20.0]);

        let table = synchronize(
            &Selection::new(&basis, &[]),
            &[Selection::new(&sec, &cols(&["Pos_x(mm)"]))],
        )
        .unwrap();

        assert_eq!(table.time(), &[0.0, 0.5, 1.0, 1.5]);
        assert_eq!(table.column("Pos_x(mm)").unwrap(), &[10.0, 10.0, 20.0, 20.0]);
    }

    #[test]
    fn late_secondary_holds_first_value() {
        let basis = channel("mic", "Amplitude", vec![0.0, 0.1, 0.2, 0.3], vec![1.0; 4]);
        let sec = channel("lembox", "Current(A)", vec![0.15, 0.25], vec![7.0, 8.0]);

        let table = synchronize(
            &Selection::new(&basis, &cols(&["Amplitude"])),
            &[Selection::new(&sec, &cols(&["Current(A)"]))],
        )
        .unwrap();

        assert_eq!(table.column("Amplitude").unwrap(), &[1.0; 4]);
        assert_eq!(table.column("Current(A)").unwrap(), &[7.0, 7.0, 7.0, 8.0]);
    }

    #[test]
    fn secondary_past_basis_end_holds_last_value() {
        let basis = channel("mic", "Amplitude", vec![0.0, 10.0], vec![0.0; 2]);
        let sec = channel("robot", "Pos_x(mm)", vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 3.0]);

        let table = synchronize(
            &Selection::new(&basis, &[]),
            &[Selection::new(&sec, &cols(&["Pos_x(mm)"]))],
        )
        .unwrap();
        assert_eq!(table.column("Pos_x(mm)").unwrap(), &[1.0, 3.0]);
    }

    #[test]
    fn cursor_never_moves_backward() {
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        let basis_time = jittered(2_000, 48.0, &mut rng);
        let sec_time = jittered(300, 5.0, &mut rng);

        let idxs = hold_indices(&sec_time, &basis_time);
        assert_eq!(idxs.len(), basis_time.len());
        assert!(idxs.windows(2).all(|pair| pair[0] <= pair[1]));

        for (&t, &idx) in basis_time.iter().zip(&idxs) {
            if t >= sec_time[0] {
                assert!(sec_time[idx] <= t);
            }
            if idx + 1 < sec_time.len() {
                assert!(sec_time[idx + 1] > t);
            }
        }
    }

    #[test]
    fn synchronize_is_deterministic() {
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        let basis_time = jittered(500, 48.0, &mut rng);
        let sec_time = jittered(80, 7.0, &mut rng);
        let sec_vals = (0..80).map(|_| rng.random::<f64>()).collect();
        let basis = channel("mic", "Amplitude", basis_time, vec![0.5; 500]);
        let sec = channel("robot", "Pos_x(mm)", sec_time, sec_vals);

        let run = || {
            let table = synchronize(
                &Selection::new(&basis, &cols(&["Amplitude"])),
                &[Selection::new(&sec, &cols(&["Pos_x(mm)"]))],
            )
            .unwrap();
            rmp_serde::to_vec(&table).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn preconditions_are_reported() {
        let basis = channel("mic", "Amplitude", vec![0.0, 1.0], vec![0.0; 2]);
        let unordered = channel("robot", "Pos_x(mm)", vec![1.0, 0.0], vec![0.0; 2]);
        let empty = channel("lembox", "Current(A)", vec![], vec![]);

        let err = synchronize(
            &Selection::new(&basis, &[]),
            &[Selection::new(&unordered, &cols(&["Pos_x(mm)"]))],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::MonotonicityViolation { idx: 1, .. }));

        let err = synchronize(
            &Selection::new(&basis, &[]),
            &[Selection::new(&empty, &cols(&["Current(A)"]))],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::EmptyChannel { .. }));

        let err = synchronize(
            &Selection::new(&basis, &cols(&["Amplitude"])),
            &[Selection::new(&basis, &cols(&["Voltage(V)"]))],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::MissingRequiredColumn { .. }));

        let err = synchronize(
            &Selection::new(&basis, &cols(&["Amplitude"])),
            &[Selection::new(&basis, &cols(&["Amplitude"]))],
        )
        .unwrap_err();
        assert_eq!(
            err,
            CoreError::DuplicateColumn {
                column: "Amplitude".to_string()
            }
        );
    }

    #[test]
    fn bad_secondary_is_skipped_not_fatal() {
        let basis = channel("mic", "Amplitude", vec![0.0, 0.5, 1.0], vec![0.1; 3]);
        let unordered = channel("robot", "Pos_x(mm)", vec![1.0, 0.0], vec![0.0; 2]);
        let good = channel("lembox", "Current(A)", vec![0.0, 1.0], vec![5.0, 6.0]);

        let (table, skipped) = synchronize_available(
            &Selection::new(&basis, &cols(&["Amplitude"])),
            vec![
                Selection::new(&unordered, &cols(&["Pos_x(mm)"])),
                Selection::new(&good, &cols(&["Current(A)", "Voltage(V)"])),
                Selection::new(&good, &cols(&["Current(A)"])),
            ],
        )
        .unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.column("Current(A)").unwrap(), &[5.0, 5.0, 6.0]);
        assert!(table.column("Pos_x(mm)").is_none());

        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].channel, "robot");
        assert!(matches!(skipped[0].error, CoreError::MonotonicityViolation { idx: 1, .. }));
        assert_eq!(
            skipped[1].error,
            CoreError::MissingRequiredColumn {
                channel: "lembox".to_string(),
                column: "Voltage(V)".to_string()
            }
        );
    }

    #[test]
    fn empty_basis_yields_empty_table() {
        let basis = channel("mic", "Amplitude", vec![], vec![]);
        let sec = channel("robot", "Pos_x(mm)", vec![0.0], vec![1.0]);
        let table = synchronize(
            &Selection::new(&basis, &[]),
            &[Selection::new(&sec, &cols(&["Pos_x(mm)"]))],
        )
        .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.column("Pos_x(mm)").unwrap().len(), 0);
    }
}

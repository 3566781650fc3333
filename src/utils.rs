use crate::error::CoreError;
use anyhow::{Context, Result, bail};
use rmp_serde::{decode, encode};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fmt::Debug,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    ops::RangeBounds,
    path::Path,
};

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

/// Value used to fill the slots before the first valid sample.
///
/// The first valid sample must lie inside the first window, otherwise no
/// window can be formed from real data.
pub fn first_valid(vals: &[f64], win: usize) -> Result<f64, CoreError> {
    vals.iter()
        .take(win)
        .copied()
        .find(|val| !val.is_nan())
        .ok_or(CoreError::EmptyOrAllMissing {
            window: win,
            len: vals.len(),
        })
}

/// Forward-fill NaN samples with the previous (filled) value.
pub fn fill_missing(vals: &[f64], win: usize) -> Result<Vec<f64>, CoreError> {
    let mut last = first_valid(vals, win)?;
    Ok(vals
        .iter()
        .map(|&val| {
            if !val.is_nan() {
                last = val;
            }
            last
        })
        .collect())
}

/// Population mean and standard deviation, skipping NaN values.
pub fn nan_mean_std(vals: &[f64]) -> (f64, f64, usize) {
    let valid = || vals.iter().copied().filter(|val| !val.is_nan());
    let n_vals = valid().count();
    if n_vals == 0 {
        return (f64::NAN, f64::NAN, 0);
    }
    let mean = valid().sum::<f64>() / n_vals as f64;
    let var = valid().map(|val| (val - mean).powi(2)).sum::<f64>() / n_vals as f64;
    (mean, var.sqrt(), n_vals)
}

pub fn load_msgpack<T: DeserializeOwned, P: AsRef<Path>>(file: P) -> Result<T> {
    let file = file.as_ref();
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    let mut reader = BufReader::new(file);
    decode::from_read(&mut reader).context("failed to deserialize value")
}

/// Serialize `val` next to `file` and rename it into place.
///
/// Readers either see the previous contents or the complete new ones.
pub fn save_msgpack<T: Serialize, P: AsRef<Path>>(val: &T, file: P) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {parent:?}"))?;
    }

    let tmp_file = file.with_extension("msgpack.tmp");
    {
        let tmp = File::create(&tmp_file).with_context(|| format!("failed to create {tmp_file:?}"))?;
        let mut writer = BufWriter::new(tmp);
        encode::write(&mut writer, val).context("failed to serialize value")?;
        writer.flush().context("failed to flush writer stream")?;
    }

    fs::rename(&tmp_file, file)
        .with_context(|| format!("failed to rename {tmp_file:?} to {file:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_missing_carries_previous_value() {
        let vals = [f64::NAN, 2.0, f64::NAN, f64::NAN, 5.0];
        let filled = fill_missing(&vals, 3).unwrap();
        assert_eq!(filled, vec![2.0, 2.0, 2.0, 2.0, 5.0]);
    }

    #[test]
    fn fill_missing_rejects_missing_first_window() {
        let vals = [f64::NAN, f64::NAN, f64::NAN, 4.0];
        let err = fill_missing(&vals, 3).unwrap_err();
        assert_eq!(err, CoreError::EmptyOrAllMissing { window: 3, len: 4 });
    }

    #[test]
    fn nan_mean_std_skips_missing() {
        let (mean, std_dev, n_vals) = nan_mean_std(&[1.0, f64::NAN, 3.0]);
        assert_eq!(n_vals, 2);
        assert_eq!(mean, 2.0);
        assert_eq!(std_dev, 1.0);

        let (mean, _, n_vals) = nan_mean_std(&[f64::NAN]);
        assert!(mean.is_nan());
        assert_eq!(n_vals, 0);
    }

    #[test]
    fn check_num_reports_range() {
        assert!(check_num(3, 3..10).is_ok());
        let err = check_num(2, 3..10).unwrap_err();
        assert!(err.to_string().contains("3..10"));
    }
}

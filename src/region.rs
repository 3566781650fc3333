use serde::{Deserialize, Serialize};

/// Half-open index range `start..end` of the active part of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRegion {
    pub start: usize,
    pub end: usize,
}

impl ActiveRegion {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Trim `margin` samples from both ends, collapsing to an empty region
    /// rather than inverting.
    pub fn shrink(self, margin: usize) -> Self {
        let start = self.start.saturating_add(margin).min(self.end);
        let end = self.end.saturating_sub(margin).max(start);
        Self { start, end }
    }
}

/// Locate the active interval of a (typically smoothed) series.
///
/// `start` is the first index whose value exceeds `threshold`. `end` is the
/// last index after `start` where the series falls from `>= threshold` to
/// `< threshold`, or the series length if it never does. Values before
/// `start` are ignored. NaN never exceeds nor falls below the threshold.
pub fn find_active_region(series: &[f64], threshold: f64) -> Option<ActiveRegion> {
    let start = series.iter().position(|&val| val > threshold)?;
    let end = (start + 1..series.len())
        .rev()
        .find(|&idx| series[idx - 1] >= threshold && series[idx] < threshold)
        .unwrap_or(series.len());
    Some(ActiveRegion { start, end })
}

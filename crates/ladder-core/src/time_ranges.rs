//! Buffered-interval bookkeeping
//!
//! The media sink reports what it holds as a list of disjoint, sorted time
//! ranges. The engine snapshots that list around each append to learn where
//! the appended chunk actually landed.

/// Tolerance, in seconds, used when matching a position against range edges
pub const TIME_FUDGE_FACTOR: f64 = 1.0 / 30.0;

/// Represent a range of time, from a start to an end, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// True when `pos` lies within the range, edges widened by `fudge`
    pub fn contains(&self, pos: f64, fudge: f64) -> bool {
        self.start - fudge <= pos && pos <= self.end + fudge
    }

    /// True when `pos` lies within the closed range
    pub fn covers(&self, pos: f64) -> bool {
        self.start <= pos && pos <= self.end
    }

    /// True when the two ranges share more than a single edge point
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Non-contiguous chronological ranges of time, kept sorted and merged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeRanges {
    ranges: Vec<TimeRange>,
}

impl TimeRanges {
    /// Create a new empty `TimeRanges` object
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(start, end)` pairs, merging as needed
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        let mut ranges = Self::new();
        for &(start, end) in pairs {
            ranges.add(start, end);
        }
        ranges
    }

    /// Add a range of time, merging it with the ranges it overlaps or touches
    pub fn add(&mut self, start: f64, end: f64) {
        if end < start {
            return;
        }
        let idx = self
            .ranges
            .iter()
            .position(|r| r.start > start)
            .unwrap_or(self.ranges.len());
        self.ranges.insert(idx, TimeRange { start, end });

        let mut merged: Vec<TimeRange> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }
        self.ranges = merged;
    }

    /// Remove `[start, end)` from every range, splitting where needed
    pub fn remove(&mut self, start: f64, end: f64) {
        if end <= start {
            return;
        }
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for range in self.ranges.drain(..) {
            if range.end <= start || range.start >= end {
                kept.push(range);
                continue;
            }
            if range.start < start {
                kept.push(TimeRange::new(range.start, start));
            }
            if range.end > end {
                kept.push(TimeRange::new(end, range.end));
            }
        }
        self.ranges = kept;
    }

    /// Returns the number of non-contiguous ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the starting time of the range at `idx`
    pub fn start(&self, idx: usize) -> Option<f64> {
        self.ranges.get(idx).map(|r| r.start)
    }

    /// Returns the ending time of the range at `idx`
    pub fn end(&self, idx: usize) -> Option<f64> {
        self.ranges.get(idx).map(|r| r.end)
    }

    pub fn last(&self) -> Option<TimeRange> {
        self.ranges.last().copied()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeRange> {
        self.ranges.iter()
    }

    /// Returns the range containing the given position, with a small tolerance
    pub fn range_for(&self, pos: f64) -> Option<TimeRange> {
        self.ranges
            .iter()
            .find(|r| r.contains(pos, TIME_FUDGE_FACTOR))
            .copied()
    }

    /// Returns the first range starting after the given position
    pub fn next_range_after(&self, pos: f64) -> Option<TimeRange> {
        self.ranges
            .iter()
            .find(|r| r.start - TIME_FUDGE_FACTOR > pos)
            .copied()
    }

    /// Total buffered seconds
    pub fn total_duration(&self) -> f64 {
        self.ranges.iter().map(TimeRange::duration).sum()
    }
}

impl<'a> IntoIterator for &'a TimeRanges {
    type Item = &'a TimeRange;
    type IntoIter = std::slice::Iter<'a, TimeRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

/// Find the single end point that an append introduced.
///
/// An end point of `after` is a candidate only when its range neither overlaps
/// a range of `before` nor ends inside one. Growth or shrinkage of a range that
/// already existed therefore never qualifies. Anything other than exactly one
/// candidate is ambiguous and yields `None`.
pub fn sole_uncommon_end(before: &TimeRanges, after: &TimeRanges) -> Option<f64> {
    let mut candidates = after.iter().filter(|range| {
        !before
            .iter()
            .any(|old| old.covers(range.end) || old.overlaps(range))
    });

    let first = candidates.next()?;
    if candidates.next().is_some() {
        return None;
    }
    Some(first.end)
}

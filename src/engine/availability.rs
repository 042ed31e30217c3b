//! Pure interval math behind the availability projections. Everything here
//! is display-oriented and tolerant of staleness — admission always
//! re-validates against the ledger under its write guard.

use crate::model::TimeRange;

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_ranges(sorted: &[TimeRange]) -> Vec<TimeRange> {
    let mut merged: Vec<TimeRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// Subtract `taken` from `base`; both must be sorted by start. Returns the
/// leftover free ranges in order.
pub fn subtract_ranges(base: &[TimeRange], taken: &[TimeRange]) -> Vec<TimeRange> {
    let mut result = Vec::new();
    let mut ti = 0;

    for &b in base {
        let mut cursor = b.start;
        let end = b.end;

        while ti < taken.len() && taken[ti].end <= cursor {
            ti += 1;
        }

        let mut j = ti;
        while j < taken.len() && taken[j].start < end {
            let t = &taken[j];
            if t.start > cursor {
                result.push(TimeRange::new(cursor, t.start));
            }
            cursor = cursor.max(t.end);
            j += 1;
        }

        if cursor < end {
            result.push(TimeRange::new(cursor, end));
        }
    }

    result
}

/// Free ranges inside one open window given the taken ranges (unsorted,
/// possibly overlapping after a reschedule race — merged defensively).
pub fn free_within(window: TimeRange, taken: &[TimeRange]) -> Vec<TimeRange> {
    let mut taken: Vec<TimeRange> = taken
        .iter()
        .filter(|r| r.overlaps(&window))
        .map(|r| TimeRange::new(r.start.max(window.start), r.end.min(window.end)))
        .collect();
    taken.sort_by_key(|r| r.start);
    let taken = merge_ranges(&taken);
    subtract_ranges(&[window], &taken)
}

use chrono::{Datelike, NaiveDate};

use crate::models::{DoctorAvailability, TimeWindow};

/// Map a calendar date to the availability day index (0 = Monday).
pub fn day_index(date: NaiveDate) -> i32 {
    date.weekday().num_days_from_monday() as i32
}

/// Resolve a doctor's nominal availability for a date: keep the active
/// windows for that weekday and merge them into a minimal set of disjoint
/// [start, end) intervals, ordered by start time.
///
/// Rows with `start_time >= end_time` are skipped rather than failing the
/// whole resolution; a malformed window must not take down slot queries
/// for the rest of the day. No windows for the day is an empty result,
/// not an error.
pub fn resolve_windows(rows: &[DoctorAvailability], date: NaiveDate) -> Vec<TimeWindow> {
    let day = day_index(date);

    let mut windows: Vec<TimeWindow> = rows
        .iter()
        .filter(|row| row.is_available && row.day_of_week == day && row.start_time < row.end_time)
        .map(|row| TimeWindow {
            start: row.start_time,
            end: row.end_time,
        })
        .collect();

    windows.sort_by_key(|w| (w.start, w.end));

    let mut merged: Vec<TimeWindow> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            // Adjacent windows (end == next start) merge as well, so a
            // slot may span the seam between two contiguous rows.
            Some(last) if window.start <= last.end => {
                if window.end > last.end {
                    last.end = window.end;
                }
            }
            _ => merged.push(window),
        }
    }

    merged
}

use chrono::{Duration, NaiveTime};

use crate::models::{AvailableSlot, BookedInterval, TimeWindow};

/// Half-open interval overlap: [a, b) and [c, d) overlap iff a < d && c < b.
/// Back-to-back intervals (b == c) do not overlap.
pub fn overlaps(a: NaiveTime, b: NaiveTime, c: NaiveTime, d: NaiveTime) -> bool {
    a < d && c < b
}

/// Subdivide disjoint availability windows into fixed-size candidate slots
/// and drop every slot that overlaps a booked interval.
///
/// Slots step from each window's start in `slot_minutes` increments; a final
/// partial slot that would extend past the window end is discarded. The
/// output is ascending (windows are disjoint and ordered) and fully
/// determined by its inputs.
pub fn generate_slots(
    windows: &[TimeWindow],
    slot_minutes: i64,
    booked: &[BookedInterval],
) -> Vec<AvailableSlot> {
    if slot_minutes <= 0 {
        return Vec::new();
    }

    let step = Duration::minutes(slot_minutes);
    let mut slots = Vec::new();

    for window in windows {
        let mut current = window.start;

        loop {
            let (slot_end, wrapped) = current.overflowing_add_signed(step);
            // Wrapping past midnight means the slot no longer fits the day.
            if wrapped != 0 || slot_end > window.end {
                break;
            }

            let is_free = booked
                .iter()
                .all(|b| !overlaps(current, slot_end, b.start_time, b.end_time));

            if is_free {
                slots.push(AvailableSlot {
                    start_time: current,
                    end_time: slot_end,
                    duration_minutes: slot_minutes,
                });
            }

            if slot_end >= window.end {
                break;
            }
            current = slot_end;
        }
    }

    slots
}

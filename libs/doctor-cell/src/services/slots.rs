use chrono::{NaiveTime, Timelike};

use crate::models::{AvailabilityBlock, BookedInterval, TimeSlot};

fn seconds(time: NaiveTime) -> i64 {
    time.num_seconds_from_midnight() as i64
}

fn time_at(secs: i64) -> Option<NaiveTime> {
    u32::try_from(secs)
        .ok()
        .and_then(|s| NaiveTime::from_num_seconds_from_midnight_opt(s, 0))
}

/// Walks every block in `duration_minutes` steps and flags slots that
/// overlap a booking. Only full-length slots are produced; a trailing
/// remainder shorter than the duration is dropped.
///
/// Blocks are expected in ascending start order and non-overlapping, so the
/// output is ascending too. The function is pure: same input, same output.
pub fn generate_slots(
    blocks: &[AvailabilityBlock],
    booked: &[BookedInterval],
    duration_minutes: i32,
) -> Vec<TimeSlot> {
    if duration_minutes <= 0 {
        return Vec::new();
    }
    let step = i64::from(duration_minutes) * 60;

    // Intervals are half-open [start, end) in seconds from midnight.
    let occupied: Vec<(i64, i64)> = booked
        .iter()
        .map(|b| {
            let start = seconds(b.start);
            let minutes = b.duration_minutes.unwrap_or(duration_minutes);
            (start, start + i64::from(minutes) * 60)
        })
        .collect();

    let mut slots = Vec::new();

    for block in blocks {
        let block_end = seconds(block.end_time);
        let mut current = seconds(block.start_time);

        while current + step <= block_end {
            let slot_end = current + step;
            let (Some(time), Some(end_time)) = (time_at(current), time_at(slot_end)) else {
                break;
            };

            let is_available = !occupied
                .iter()
                .any(|&(booked_start, booked_end)| booked_start < slot_end && booked_end > current);

            slots.push(TimeSlot {
                time,
                end_time,
                is_available,
            });
            current = slot_end;
        }
    }

    slots
}

/// The generated slot starting exactly at `time`, if any.
pub fn find_slot(slots: &[TimeSlot], time: NaiveTime) -> Option<TimeSlot> {
    slots.iter().copied().find(|slot| slot.time == time)
}

//! Wall-clock alignment for cycle boundaries
//!
//! Every sleep is computed from the absolute clock, so a slow cycle delays
//! only itself and never shifts later boundaries.

use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use std::time::Duration;

/// Round `now` down to the start of its cycle (seconds since the epoch are a
/// multiple of `cycle_secs`)
pub fn floor_to_cycle(now: DateTime<Utc>, cycle_secs: u64) -> DateTime<Utc> {
    let now = now.trunc_subsecs(0);
    if cycle_secs == 0 {
        return now;
    }
    let rem = now.timestamp().rem_euclid(cycle_secs as i64);
    now - ChronoDuration::seconds(rem)
}

/// Start of the UTC hour containing `now`
pub fn truncate_to_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    floor_to_cycle(now, 3600)
}

/// Time from `now` until the next instant whose position within the cycle
/// equals `offset`. Always positive: an instant exactly on the slot waits a
/// whole cycle.
pub fn until_next_boundary(now: DateTime<Utc>, cycle: Duration, offset: Duration) -> Duration {
    let cycle_ms = (cycle.as_millis() as i64).max(1);
    let offset_ms = offset.as_millis() as i64 % cycle_ms;
    let into_cycle = (now.timestamp_millis() - offset_ms).rem_euclid(cycle_ms);
    Duration::from_millis((cycle_ms - into_cycle) as u64)
}

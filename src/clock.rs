// =============================================================================
// Session clock — the single source of IST time for every component
// =============================================================================
//
// All time-gated logic (cutovers, bar windows, force-flat, heartbeat ages)
// reads through `SessionClock`; nothing else touches wall time. The virtual
// variant is advanced by the replay tick stream (virtual time = max tick
// timestamp seen), which is what makes a replayed day byte-for-byte
// reproducible.
// =============================================================================

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;

/// The exchange timezone. IST has no DST, so conversions are total.
pub const IST: Tz = Kolkata;

/// Convert epoch milliseconds to an IST datetime.
pub fn ist_from_millis(ms: i64) -> DateTime<Tz> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
        .with_timezone(&IST)
}

/// Epoch milliseconds of an IST date + time-of-day.
pub fn millis_at(date: NaiveDate, time: NaiveTime) -> i64 {
    IST.from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

/// Format an IST datetime the way the state artifacts expect it.
pub fn format_ist(dt: DateTime<Tz>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S IST").to_string()
}

// =============================================================================
// SessionClock
// =============================================================================

/// Shared handle that the replay tick source uses to advance virtual time.
#[derive(Debug, Clone)]
pub struct VirtualClockHandle(Arc<AtomicI64>);

impl VirtualClockHandle {
    /// Advance virtual time to `ms` if it is ahead of the current value.
    /// Monotone: a late tick never moves the clock backwards.
    pub fn advance_to(&self, ms: i64) {
        self.0.fetch_max(ms, Ordering::SeqCst);
    }
}

/// Wall clock or replay-driven virtual clock, both reporting IST.
#[derive(Debug, Clone)]
pub enum SessionClock {
    Wall,
    Virtual(Arc<AtomicI64>),
}

impl SessionClock {
    pub fn wall() -> Self {
        Self::Wall
    }

    /// Create a virtual clock starting at `start_ms` plus the handle that
    /// advances it.
    pub fn virtual_at(start_ms: i64) -> (Self, VirtualClockHandle) {
        let cell = Arc::new(AtomicI64::new(start_ms));
        (Self::Virtual(cell.clone()), VirtualClockHandle(cell))
    }

    pub fn now_millis(&self) -> i64 {
        match self {
            Self::Wall => Utc::now().timestamp_millis(),
            Self::Virtual(cell) => cell.load(Ordering::SeqCst),
        }
    }

    pub fn now(&self) -> DateTime<Tz> {
        ist_from_millis(self.now_millis())
    }

    /// The current IST trading date.
    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Sleep until the clock reaches `target_ms`. On the wall clock this is a
    /// plain timer; on the virtual clock it polls, yielding to whatever task
    /// is feeding ticks.
    pub async fn wait_until(&self, target_ms: i64) {
        match self {
            Self::Wall => {
                let now = Utc::now().timestamp_millis();
                if target_ms > now {
                    tokio::time::sleep(std::time::Duration::from_millis(
                        (target_ms - now) as u64,
                    ))
                    .await;
                }
            }
            Self::Virtual(cell) => {
                while cell.load(Ordering::SeqCst) < target_ms {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn ist_conversion_applies_offset() {
        // 2025-01-06 04:00:00 UTC == 09:30:00 IST.
        let utc = Utc.with_ymd_and_hms(2025, 1, 6, 4, 0, 0).unwrap();
        let ist = ist_from_millis(utc.timestamp_millis());
        assert_eq!(ist.hour(), 9);
        assert_eq!(ist.minute(), 30);
    }

    #[test]
    fn millis_at_round_trips() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let time = NaiveTime::from_hms_opt(9, 40, 1).unwrap();
        let ms = millis_at(date, time);
        let back = ist_from_millis(ms);
        assert_eq!(back.date_naive(), date);
        assert_eq!(back.time(), time);
    }

    #[test]
    fn virtual_clock_is_monotone() {
        let (clock, handle) = SessionClock::virtual_at(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        handle.advance_to(5_000);
        assert_eq!(clock.now_millis(), 5_000);
        // A late tick must not rewind.
        handle.advance_to(3_000);
        assert_eq!(clock.now_millis(), 5_000);
    }

    #[test]
    fn format_is_stable() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let ms = millis_at(date, NaiveTime::from_hms_opt(9, 40, 0).unwrap());
        assert_eq!(format_ist(ist_from_millis(ms)), "2025-01-06 09:40:00 IST");
    }
}

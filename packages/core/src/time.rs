//! Millisecond timestamps and the clock used to produce them.
//!
//! Every score in the shared store is a Unix timestamp in milliseconds, so
//! the whole crate works in [`Millis`] and only converts to `chrono` types at
//! the message boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Millis {
    Utc::now().timestamp_millis()
}

/// Convert a millisecond timestamp into a UTC datetime.
///
/// Out-of-range values clamp to the Unix epoch.
pub fn to_datetime(millis: Millis) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Parse a timestamp the way date bounds arrive on the wire.
///
/// Accepts RFC 3339 datetimes, bare `YYYY-MM-DD` dates (midnight UTC) and
/// plain millisecond numbers. Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<Millis> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(raw) {
        return Some(datetime.timestamp_millis());
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|datetime| datetime.and_utc().timestamp_millis());
    }

    raw.parse::<f64>()
        .ok()
        .filter(|millis| millis.is_finite())
        .map(|millis| millis as Millis)
}

/// Source of "now" for the coordinator.
///
/// `Manual` clocks are shared handles: cloning one and advancing the clone
/// moves every holder forward.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    #[default]
    System,
    Manual(Arc<AtomicI64>),
}

impl Clock {
    /// Create a manual clock starting at the given instant.
    pub fn manual(start: Millis) -> Self {
        Self::Manual(Arc::new(AtomicI64::new(start)))
    }

    /// Read the current time.
    pub fn now(&self) -> Millis {
        match self {
            Clock::System => now_millis(),
            Clock::Manual(millis) => millis.load(Ordering::SeqCst),
        }
    }

    /// Move a manual clock forward. No effect on the system clock.
    pub fn advance(&self, by: Millis) {
        if let Clock::Manual(millis) = self {
            millis.fetch_add(by, Ordering::SeqCst);
        }
    }

    /// Pin a manual clock to an instant. No effect on the system clock.
    pub fn set(&self, at: Millis) {
        if let Clock::Manual(millis) = self {
            millis.store(at, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_plain_numbers() {
        assert_eq!(parse_timestamp("1970-01-01T00:00:01Z"), Some(1_000));
        assert_eq!(parse_timestamp("1970-01-01T00:00:01.500+00:00"), Some(1_500));
        assert_eq!(parse_timestamp("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_timestamp("42000"), Some(42_000));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("NaN"), None);
    }

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = Clock::manual(1_000);
        let other = clock.clone();
        other.advance(500);
        assert_eq!(clock.now(), 1_500);
        clock.set(10);
        assert_eq!(other.now(), 10);
    }
}

//! Automation policies evaluated on every `Current` report: battery cutoff
//! for the charger outlet and the on/off timer window for the timed outlet.
//!
//! Everything here is a pure function of its arguments. The dispatcher reads
//! the thresholds from the store and passes them in.

use std::fmt;

use serde::{Serialize, Serializer};
use time::Time;

// ---------------------------------------------------------------------------
// Time of day
// ---------------------------------------------------------------------------

/// A wall-clock time with minute resolution (00:00 ..= 23:59).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(Time);

impl TimeOfDay {
    /// Returns `None` when hour > 23 or minute > 59.
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        Time::from_hms(hour, minute, 0).ok().map(Self)
    }

    pub fn hour(self) -> u8 {
        self.0.hour()
    }

    pub fn minute(self) -> u8 {
        self.0.minute()
    }

    /// Parse the `HH-MM` token the peers put on the wire.
    pub fn parse_token(s: &str) -> Result<Self, String> {
        Self::parse_with(s, '-')
    }

    /// Parse the `HH:MM` form kept in the store. A trailing `:SS` is accepted
    /// and ignored, but must itself be a valid two-digit second.
    pub fn parse_stored(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [h, m] => Self::from_parts(h, m, s),
            [h, m, sec] => {
                let valid = sec.len() == 2 && parse_digits(sec).is_some_and(|v| v <= 59);
                if !valid {
                    return Err(format!("bad seconds '{sec}' in '{s}'"));
                }
                Self::from_parts(h, m, s)
            }
            _ => Err(format!("expected HH:MM, got '{s}'")),
        }
    }

    /// Accept either `HH-MM` or `HH:MM` (config files).
    pub fn parse_lenient(s: &str) -> Result<Self, String> {
        if s.contains('-') {
            Self::parse_token(s)
        } else {
            Self::parse_with(s, ':')
        }
    }

    fn parse_with(s: &str, sep: char) -> Result<Self, String> {
        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() != 2 {
            return Err(format!("expected HH{sep}MM, got '{s}'"));
        }
        Self::from_parts(parts[0], parts[1], s)
    }

    fn from_parts(h: &str, m: &str, whole: &str) -> Result<Self, String> {
        let hour = parse_digits(h).ok_or_else(|| format!("non-numeric hour in '{whole}'"))?;
        let minute = parse_digits(m).ok_or_else(|| format!("non-numeric minute in '{whole}'"))?;
        if hour > 23 {
            return Err(format!("hour {hour} out of range [0, 23] in '{whole}'"));
        }
        if minute > 59 {
            return Err(format!("minute {minute} out of range [0, 59] in '{whole}'"));
        }
        // Both bounds checked above.
        Self::new(hour as u8, minute as u8).ok_or_else(|| format!("invalid time '{whole}'"))
    }
}

/// Strictly ASCII digits, at most two of them.
fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 2 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Battery cutoff: the charger must be switched off once the phone reports a
/// charge at or above the configured threshold. There is no matching
/// "resume" rule; only an explicit `State` command turns it back on.
pub fn should_cutoff(current_percent: u8, threshold_percent: u8) -> bool {
    current_percent >= threshold_percent
}

/// Timer window, half-open: `start <= now < end`.
///
/// Windows are same-day only. When `end <= start` the window is empty and
/// this returns false for every `now`.
pub fn in_window(now: TimeOfDay, start: TimeOfDay, end: TimeOfDay) -> bool {
    start <= now && now < end
}

// ===========================================================================
// Tests
// ===========================================================================

//! Inbound message vocabulary. Payloads are `:`-delimited UTF-8 text whose
//! first field is the tag:
//!
//! ```text
//! State:<outlet>:<0|1>
//! Sync
//! Current:<battery percent>:<HH-MM>
//! Update:Battery:<percent>
//! Update:Timer On:<HH-MM>
//! Update:Timer Off:<HH-MM>
//! ```

use std::fmt;

use thiserror::Error;

use crate::mqtt::Peer;
use crate::policy::TimeOfDay;
use crate::store::OutletId;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Switch one outlet.
    State { outlet: OutletId, on: bool },
    /// Ask for a status snapshot; the reply goes back to whoever asked.
    Sync { reply_to: Peer },
    /// Periodic report from the phone: battery level and its wall clock.
    Current { battery_percent: u8, now: TimeOfDay },
    /// Change a policy setting.
    Update(Setting),
    /// Anything that did not parse. Logged and dropped by the dispatcher.
    Invalid(ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "setting", content = "value", rename_all = "snake_case")]
pub enum Setting {
    BatteryCutoff(u8),
    TimerOn(TimeOfDay),
    TimerOff(TimeOfDay),
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BatteryCutoff(p) => write!(f, "battery cutoff {p}%"),
            Self::TimerOn(t) => write!(f, "timer on {t}"),
            Self::TimerOff(t) => write!(f, "timer off {t}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bad payload '{payload}' on {topic}: {reason}")]
pub struct ParseError {
    pub topic: String,
    /// Lossy UTF-8 rendering of the raw bytes.
    pub payload: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

impl Command {
    /// Total: every input maps to a command, malformed ones to
    /// [`Command::Invalid`].
    pub fn parse(topic: &str, payload: &[u8]) -> Self {
        parse_fields(topic, payload).unwrap_or_else(|reason| {
            Self::Invalid(ParseError {
                topic: topic.to_string(),
                payload: String::from_utf8_lossy(payload).into_owned(),
                reason,
            })
        })
    }
}

fn parse_fields(topic: &str, payload: &[u8]) -> Result<Command, String> {
    let text = std::str::from_utf8(payload).map_err(|e| format!("payload is not UTF-8: {e}"))?;
    let text = text.trim();
    if text.is_empty() {
        return Err("empty payload".to_string());
    }

    let fields: Vec<&str> = text.split(':').collect();
    match fields.as_slice() {
        ["State", outlet, status] => Ok(Command::State {
            outlet: parse_outlet(outlet)?,
            on: parse_status(status)?,
        }),
        ["Sync"] => Peer::from_inbound_topic(topic)
            .map(|reply_to| Command::Sync { reply_to })
            .ok_or_else(|| format!("Sync on unexpected topic '{topic}'")),
        ["Current", percent, now] => Ok(Command::Current {
            battery_percent: parse_battery_reading(percent)?,
            now: TimeOfDay::parse_token(now)?,
        }),
        ["Update", "Battery", value] => Ok(Command::Update(Setting::BatteryCutoff(
            parse_cutoff(value)?,
        ))),
        ["Update", "Timer On", value] => Ok(Command::Update(Setting::TimerOn(
            TimeOfDay::parse_token(value)?,
        ))),
        ["Update", "Timer Off", value] => Ok(Command::Update(Setting::TimerOff(
            TimeOfDay::parse_token(value)?,
        ))),
        ["Update", sub, _] => Err(format!("unknown Update setting '{sub}'")),
        [tag @ ("State" | "Sync" | "Current" | "Update"), rest @ ..] => Err(format!(
            "{tag} expects {} field(s), got {}",
            arity(tag),
            rest.len()
        )),
        [tag, ..] => Err(format!("unknown tag '{tag}'")),
        [] => Err("empty payload".to_string()),
    }
}

fn arity(tag: &str) -> usize {
    match tag {
        "Sync" => 0,
        _ => 2,
    }
}

fn parse_outlet(s: &str) -> Result<OutletId, String> {
    match s.parse::<OutletId>() {
        Ok(0) => Err("outlet id must be positive".to_string()),
        Ok(id) => Ok(id),
        Err(_) => Err(format!("invalid outlet id '{s}'")),
    }
}

fn parse_status(s: &str) -> Result<bool, String> {
    match s {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(format!("status must be 0 or 1, got '{s}'")),
    }
}

/// The phone reports a float (`85.0`); the fraction is dropped.
fn parse_battery_reading(s: &str) -> Result<u8, String> {
    let v: f64 = s
        .parse()
        .map_err(|_| format!("non-numeric battery level '{s}'"))?;
    if !v.is_finite() || !(0.0..=100.0).contains(&v) {
        return Err(format!("battery level {s} out of range [0, 100]"));
    }
    Ok(v.trunc() as u8)
}

fn parse_cutoff(s: &str) -> Result<u8, String> {
    match s.parse::<u8>() {
        Ok(p) if p <= 100 => Ok(p),
        Ok(p) => Err(format!("cutoff {p} out of range [0, 100]")),
        Err(_) => Err(format!("non-numeric cutoff '{s}'")),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::{FROM_ACTUATOR, FROM_CLIENT};

    fn t(h: u8, m: u8) -> TimeOfDay {
        TimeOfDay::new(h, m).unwrap()
    }

    fn reason(cmd: Command) -> String {
        match cmd {
            Command::Invalid(e) => e.reason,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    // -- State --------------------------------------------------------------

    #[test]
    fn state_on() {
        assert_eq!(
            Command::parse(FROM_CLIENT, b"State:3:1"),
            Command::State { outlet: 3, on: true }
        );
    }

    #[test]
    fn state_off() {
        assert_eq!(
            Command::parse(FROM_ACTUATOR, b"State:1:0"),
            Command::State { outlet: 1, on: false }
        );
    }

    #[test]
    fn state_trailing_newline_is_trimmed() {
        assert_eq!(
            Command::parse(FROM_CLIENT, b"State:2:1\r\n"),
            Command::State { outlet: 2, on: true }
        );
    }

    #[test]
    fn state_bad_status() {
        assert!(reason(Command::parse(FROM_CLIENT, b"State:1:2")).contains("0 or 1"));
        assert!(reason(Command::parse(FROM_CLIENT, b"State:1:on")).contains("0 or 1"));
    }

    #[test]
    fn state_bad_outlet() {
        assert!(reason(Command::parse(FROM_CLIENT, b"State:x:1")).contains("invalid outlet"));
        assert!(reason(Command::parse(FROM_CLIENT, b"State:0:1")).contains("positive"));
        assert!(reason(Command::parse(FROM_CLIENT, b"State:-1:1")).contains("invalid outlet"));
    }

    #[test]
    fn state_wrong_arity() {
        let r = reason(Command::parse(FROM_CLIENT, b"State:1"));
        assert!(r.contains("State expects 2 field(s), got 1"), "{r}");
        assert!(reason(Command::parse(FROM_CLIENT, b"State:1:1:1")).contains("got 3"));
    }

    // -- Sync ---------------------------------------------------------------

    #[test]
    fn sync_from_client() {
        assert_eq!(
            Command::parse(FROM_CLIENT, b"Sync"),
            Command::Sync { reply_to: Peer::Client }
        );
    }

    #[test]
    fn sync_from_actuator() {
        assert_eq!(
            Command::parse(FROM_ACTUATOR, b"Sync"),
            Command::Sync { reply_to: Peer::Actuator }
        );
    }

    #[test]
    fn sync_on_unknown_topic() {
        assert!(reason(Command::parse("elsewhere", b"Sync")).contains("unexpected topic"));
    }

    #[test]
    fn sync_with_extra_fields() {
        assert!(reason(Command::parse(FROM_CLIENT, b"Sync:1")).contains("expects 0"));
    }

    // -- Current ------------------------------------------------------------

    #[test]
    fn current_with_float_percent() {
        assert_eq!(
            Command::parse(FROM_CLIENT, b"Current:85.7:09-30"),
            Command::Current { battery_percent: 85, now: t(9, 30) }
        );
    }

    #[test]
    fn current_with_integer_percent() {
        assert_eq!(
            Command::parse(FROM_CLIENT, b"Current:100:00-00"),
            Command::Current { battery_percent: 100, now: t(0, 0) }
        );
    }

    #[test]
    fn current_non_numeric_percent() {
        assert!(reason(Command::parse(FROM_CLIENT, b"Current:full:09-30")).contains("non-numeric"));
    }

    #[test]
    fn current_percent_out_of_range() {
        assert!(reason(Command::parse(FROM_CLIENT, b"Current:-100.0:09-30")).contains("out of range"));
        assert!(reason(Command::parse(FROM_CLIENT, b"Current:101:09-30")).contains("out of range"));
        assert!(reason(Command::parse(FROM_CLIENT, b"Current:NaN:09-30")).contains("out of range"));
    }

    #[test]
    fn current_bad_time() {
        assert!(reason(Command::parse(FROM_CLIENT, b"Current:50:24-00")).contains("hour 24"));
        assert!(reason(Command::parse(FROM_CLIENT, b"Current:50:09-60")).contains("minute 60"));
        assert!(reason(Command::parse(FROM_CLIENT, b"Current:50:0930")).contains("HH-MM"));
    }

    // -- Update -------------------------------------------------------------

    #[test]
    fn update_battery() {
        assert_eq!(
            Command::parse(FROM_CLIENT, b"Update:Battery:50"),
            Command::Update(Setting::BatteryCutoff(50))
        );
    }

    #[test]
    fn update_battery_out_of_range() {
        assert!(reason(Command::parse(FROM_CLIENT, b"Update:Battery:150")).contains("out of range"));
        assert!(reason(Command::parse(FROM_CLIENT, b"Update:Battery:50.5")).contains("non-numeric"));
    }

    #[test]
    fn update_timer_on() {
        assert_eq!(
            Command::parse(FROM_CLIENT, b"Update:Timer On:08-00"),
            Command::Update(Setting::TimerOn(t(8, 0)))
        );
    }

    #[test]
    fn update_timer_off() {
        assert_eq!(
            Command::parse(FROM_CLIENT, b"Update:Timer Off:20-15"),
            Command::Update(Setting::TimerOff(t(20, 15)))
        );
    }

    #[test]
    fn update_unknown_setting() {
        assert!(reason(Command::parse(FROM_CLIENT, b"Update:Colour:red")).contains("unknown Update"));
    }

    #[test]
    fn update_missing_value() {
        assert!(reason(Command::parse(FROM_CLIENT, b"Update:Battery")).contains("got 1"));
    }

    // -- Garbage ------------------------------------------------------------

    #[test]
    fn unknown_tag_keeps_payload_and_topic() {
        match Command::parse(FROM_ACTUATOR, b"Bogus:1:2") {
            Command::Invalid(e) => {
                assert_eq!(e.topic, "FromArduino");
                assert_eq!(e.payload, "Bogus:1:2");
                assert!(e.reason.contains("unknown tag 'Bogus'"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn tags_are_case_sensitive() {
        assert!(reason(Command::parse(FROM_CLIENT, b"state:1:1")).contains("unknown tag"));
    }

    #[test]
    fn empty_payload() {
        assert_eq!(reason(Command::parse(FROM_CLIENT, b"")), "empty payload");
        assert_eq!(reason(Command::parse(FROM_CLIENT, b"  \n")), "empty payload");
    }

    #[test]
    fn invalid_utf8() {
        match Command::parse(FROM_CLIENT, &[0x53, 0xff, 0xfe]) {
            Command::Invalid(e) => {
                assert!(e.reason.contains("not UTF-8"));
                assert!(e.payload.starts_with('S'));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_display() {
        let e = ParseError {
            topic: "FromAndroid".into(),
            payload: "Bogus".into(),
            reason: "unknown tag 'Bogus'".into(),
        };
        assert_eq!(
            e.to_string(),
            "bad payload 'Bogus' on FromAndroid: unknown tag 'Bogus'"
        );
    }

    #[test]
    fn setting_display() {
        let t = TimeOfDay::new(6, 5).unwrap();
        assert_eq!(Setting::BatteryCutoff(80).to_string(), "battery cutoff 80%");
        assert_eq!(Setting::TimerOn(t).to_string(), "timer on 06:05");
        assert_eq!(Setting::TimerOff(t).to_string(), "timer off 06:05");
    }
}

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::dispatcher::{Outcome, StatusSnapshot};
use crate::store::OutletId;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub outlets: BTreeMap<OutletId, OutletState>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutletState {
    pub on: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_changed: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Command,
    Outlet,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub outlets: BTreeMap<OutletId, OutletState>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    /// Start from the persisted outlet state so the page is right before the
    /// first message arrives.
    pub fn new(initial: &StatusSnapshot) -> Self {
        let outlets = initial
            .outlets
            .iter()
            .map(|s| {
                (
                    s.outlet,
                    OutletState {
                        on: s.on,
                        last_changed: None,
                    },
                )
            })
            .collect();

        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            outlets,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record the result of one handled message.
    pub fn record_outcome(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Switched { outlet, on } => self.record_outlet(*outlet, *on),
            Outcome::Synced { peer, snapshot } => {
                self.apply_snapshot(snapshot);
                self.push_event(
                    EventKind::Command,
                    format!("sync for {} -> {snapshot}", peer.reply_topic()),
                );
            }
            Outcome::Evaluated {
                cutoff,
                timer,
                snapshot,
            } => {
                self.apply_snapshot(snapshot);
                self.push_event(
                    EventKind::Command,
                    format!(
                        "battery report: cutoff {} timer {} -> {snapshot}",
                        describe(*cutoff),
                        describe(*timer)
                    ),
                );
            }
            Outcome::Updated(setting) => {
                self.push_event(EventKind::Command, format!("updated {setting}"));
            }
            Outcome::Discarded(err) => self.record_error(err.to_string()),
        }
    }

    /// Record an outlet switch.
    pub fn record_outlet(&mut self, outlet: OutletId, on: bool) {
        self.set_outlet(outlet, on, OffsetDateTime::now_utc());
        let state_str = if on { "ON" } else { "OFF" };
        self.push_event(EventKind::Outlet, format!("outlet {outlet} set {state_str}"));
    }

    /// Bring outlet states in line with a snapshot read from the store.
    /// Only outlets whose state differs get a new `last_changed`.
    pub fn apply_snapshot(&mut self, snapshot: &StatusSnapshot) {
        let now = OffsetDateTime::now_utc();
        for s in &snapshot.outlets {
            let changed = self.outlets.get(&s.outlet).map(|o| o.on) != Some(s.on);
            if changed {
                self.set_outlet(s.outlet, s.on, now);
            }
        }
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            outlets: self.outlets.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn set_outlet(&mut self, outlet: OutletId, on: bool, at: OffsetDateTime) {
        self.outlets.insert(
            outlet,
            OutletState {
                on,
                last_changed: Some(at),
            },
        );
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

fn describe(decision: Option<bool>) -> &'static str {
    match decision {
        Some(true) => "fired",
        Some(false) => "idle",
        None => "unset",
    }
}

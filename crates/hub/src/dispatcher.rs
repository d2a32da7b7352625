//! Executes parsed commands against the outlet store and the transport.
//!
//! The dispatcher keeps no outlet state of its own: every decision re-reads
//! the store, and every outlet switch is "publish to the actuator, then
//! persist". Commands are handled one at a time by the caller; a failing
//! publish or write aborts the command and effects already applied stay
//! applied.
//!
//! ```text
//! (topic, payload) ──parse──▶ Command ──execute──▶ publish / write ──▶ Outcome
//! ```

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::command::{Command, ParseError, Setting};
use crate::mqtt::{Peer, Publisher, TransportError, TO_ACTUATOR, TO_CLIENT};
use crate::policy::{in_window, should_cutoff, TimeOfDay};
use crate::store::{FieldValue, OutletField, OutletId, OutletStore, StoreError};

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Physical layout of the strip and which outlets the two policies govern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripLayout {
    pub outlet_count: u8,
    /// Switched off by the battery cutoff.
    pub battery_outlet: OutletId,
    /// Switched by the on/off timer.
    pub timer_outlet: OutletId,
}

impl Default for StripLayout {
    fn default() -> Self {
        Self {
            outlet_count: 4,
            battery_outlet: 1,
            timer_outlet: 2,
        }
    }
}

impl StripLayout {
    pub fn outlets(&self) -> impl Iterator<Item = OutletId> {
        1..=self.outlet_count
    }

    pub fn contains(&self, outlet: OutletId) -> bool {
        (1..=self.outlet_count).contains(&outlet)
    }
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutletStatus {
    pub outlet: OutletId,
    pub on: bool,
}

/// On/off state of every outlet, rendered on the wire as `1:0/2:1/3:0/4:0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub outlets: Vec<OutletStatus>,
}

impl StatusSnapshot {
    pub fn is_on(&self, outlet: OutletId) -> Option<bool> {
        self.outlets
            .iter()
            .find(|s| s.outlet == outlet)
            .map(|s| s.on)
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.outlets.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}:{}", s.outlet, u8::from(s.on))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Switched {
        outlet: OutletId,
        on: bool,
    },
    Synced {
        peer: Peer,
        snapshot: StatusSnapshot,
    },
    /// Result of a `Current` report. `None` means the policy had no
    /// configuration and was skipped.
    Evaluated {
        cutoff: Option<bool>,
        timer: Option<bool>,
        snapshot: StatusSnapshot,
    },
    Updated(Setting),
    Discarded(ParseError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("outlet {outlet} is not on this strip (1..={count})")]
    UnknownOutlet { outlet: OutletId, count: u8 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher<S, P> {
    store: S,
    publisher: P,
    layout: StripLayout,
}

impl<S: OutletStore, P: Publisher> Dispatcher<S, P> {
    pub fn new(store: S, publisher: P, layout: StripLayout) -> Self {
        Self {
            store,
            publisher,
            layout,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Entry point for one delivered message.
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Result<Outcome, DispatchError> {
        self.execute(Command::parse(topic, payload)).await
    }

    pub async fn execute(&self, command: Command) -> Result<Outcome, DispatchError> {
        match command {
            Command::State { outlet, on } => {
                self.switch(outlet, on).await?;
                Ok(Outcome::Switched { outlet, on })
            }
            Command::Sync { reply_to } => {
                let snapshot = self.snapshot().await?;
                self.publisher
                    .publish(reply_to.reply_topic(), snapshot.to_string())
                    .await?;
                debug!(peer = ?reply_to, %snapshot, "sync answered");
                Ok(Outcome::Synced {
                    peer: reply_to,
                    snapshot,
                })
            }
            Command::Current {
                battery_percent,
                now,
            } => self.evaluate(battery_percent, now).await,
            Command::Update(setting) => {
                self.update(setting).await?;
                Ok(Outcome::Updated(setting))
            }
            Command::Invalid(err) => {
                warn!(topic = %err.topic, payload = %err.payload, "discarding message: {}", err.reason);
                Ok(Outcome::Discarded(err))
            }
        }
    }

    /// Current on/off state of every outlet, read fresh from the store.
    pub async fn snapshot(&self) -> Result<StatusSnapshot, StoreError> {
        let mut outlets = Vec::with_capacity(self.layout.outlet_count as usize);
        for outlet in self.layout.outlets() {
            let on = self.store.read_status(outlet).await?;
            outlets.push(OutletStatus { outlet, on });
        }
        Ok(StatusSnapshot { outlets })
    }

    /// Tell the actuator, then record the new state.
    async fn switch(&self, outlet: OutletId, on: bool) -> Result<(), DispatchError> {
        if !self.layout.contains(outlet) {
            return Err(DispatchError::UnknownOutlet {
                outlet,
                count: self.layout.outlet_count,
            });
        }

        info!(outlet, on, "switching outlet");
        self.publisher
            .publish(TO_ACTUATOR, format!("{outlet}:{}", u8::from(on)))
            .await?;
        self.store
            .write(OutletField::CurrentStatus, outlet, FieldValue::Status(on))
            .await?;
        Ok(())
    }

    /// Re-run both policies against a fresh phone report, then push the
    /// resulting snapshot to the phone.
    async fn evaluate(
        &self,
        battery_percent: u8,
        now: TimeOfDay,
    ) -> Result<Outcome, DispatchError> {
        let battery_outlet = self.layout.battery_outlet;
        let threshold = self
            .store
            .read_percent(OutletField::StopChargingPercent, battery_outlet)
            .await?;
        let cutoff = match threshold {
            Some(threshold) => {
                let trip = should_cutoff(battery_percent, threshold);
                if trip {
                    info!(
                        outlet = battery_outlet,
                        battery_percent, threshold, "battery cutoff reached"
                    );
                    self.switch(battery_outlet, false).await?;
                }
                Some(trip)
            }
            None => {
                debug!(outlet = battery_outlet, "no battery cutoff configured");
                None
            }
        };

        let timer_outlet = self.layout.timer_outlet;
        let start = self
            .store
            .read_time(OutletField::TimerOn, timer_outlet)
            .await?;
        let end = self
            .store
            .read_time(OutletField::TimerOff, timer_outlet)
            .await?;
        let timer = match (start, end) {
            (Some(start), Some(end)) => {
                if end <= start {
                    warn!(
                        outlet = timer_outlet,
                        %start, %end, "timer window is empty (end not after start)"
                    );
                }
                let on = in_window(now, start, end);
                self.switch(timer_outlet, on).await?;
                Some(on)
            }
            _ => {
                debug!(outlet = timer_outlet, "timer not fully configured");
                None
            }
        };

        let snapshot = self.snapshot().await?;
        self.publisher
            .publish(TO_CLIENT, snapshot.to_string())
            .await?;

        Ok(Outcome::Evaluated {
            cutoff,
            timer,
            snapshot,
        })
    }

    async fn update(&self, setting: Setting) -> Result<(), DispatchError> {
        let (field, outlet, value) = match setting {
            Setting::BatteryCutoff(p) => (
                OutletField::StopChargingPercent,
                self.layout.battery_outlet,
                FieldValue::Percent(p),
            ),
            Setting::TimerOn(t) => (
                OutletField::TimerOn,
                self.layout.timer_outlet,
                FieldValue::Time(t),
            ),
            Setting::TimerOff(t) => (
                OutletField::TimerOff,
                self.layout.timer_outlet,
                FieldValue::Time(t),
            ),
        };
        info!(outlet, %field, ?value, "updating setting");
        self.store.write(field, outlet, value).await?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

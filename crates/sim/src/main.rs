mod battery;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration};
use time::{OffsetDateTime, Time};
use tokio::sync::watch;
use tokio::time::{interval, sleep};
use tracing_subscriber::EnvFilter;

use battery::{BatterySim, Scenario};

const FROM_CLIENT: &str = "FromAndroid";
const TO_CLIENT: &str = "ToAndroid";

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of the `HH-MM` field. Stepped mode lets a day of timer behaviour
/// play out in minutes.
enum SimClock {
    Wall,
    Stepped { now: Time, step: time::Duration },
}

impl SimClock {
    fn from_env(minutes_per_report: Option<i64>) -> Self {
        match minutes_per_report {
            Some(m) if m > 0 => Self::Stepped {
                now: wall_time(),
                step: time::Duration::minutes(m),
            },
            _ => Self::Wall,
        }
    }

    /// Time to put in the next report.
    fn tick(&mut self) -> Time {
        match self {
            Self::Wall => wall_time(),
            Self::Stepped { now, step } => {
                let t = *now;
                *now += *step;
                t
            }
        }
    }
}

fn wall_time() -> Time {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .time()
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

fn format_current(percent: f64, at: Time) -> String {
    format!("Current:{percent:.1}:{:02}-{:02}", at.hour(), at.minute())
}

/// Parse a `1:0/2:1/...` status snapshot.
fn parse_snapshot(payload: &str) -> Option<Vec<(u8, bool)>> {
    payload
        .trim()
        .split('/')
        .map(|entry| {
            let (id, state) = entry.split_once(':')?;
            let id: u8 = id.parse().ok()?;
            match state {
                "0" => Some((id, false)),
                "1" => Some((id, true)),
                _ => None,
            }
        })
        .collect()
}

fn outlet_state(snapshot: &[(u8, bool)], outlet: u8) -> Option<bool> {
    snapshot
        .iter()
        .find(|(id, _)| *id == outlet)
        .map(|(_, on)| *on)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let report_every_s: u64 = env::var("REPORT_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let minutes_per_report: Option<i64> = env::var("SIM_MINUTES_PER_REPORT")
        .ok()
        .and_then(|s| s.parse().ok());
    let charger_outlet: u8 = env::var("SIM_CHARGER_OUTLET")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);

    let mut battery = BatterySim::new(scenario);
    let mut clock = SimClock::from_env(minutes_per_report);
    tracing::info!(%scenario, report_every_s, charger_outlet, "powerstrip sim starting");

    let mut mqttoptions = MqttOptions::new("powerstrip-sim", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    // The hub's snapshots tell us whether the phone is plugged in.
    let (charger_tx, charger_rx) = watch::channel(battery.is_charging());

    let loop_client = client.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("sim connected to mqtt");
                    if let Err(e) = loop_client.subscribe(TO_CLIENT, QoS::AtLeastOnce).await {
                        tracing::error!("subscribe failed: {e}");
                    }
                    if let Err(e) = loop_client
                        .publish(FROM_CLIENT, QoS::AtLeastOnce, false, "Sync")
                        .await
                    {
                        tracing::error!("sync request failed: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == TO_CLIENT => {
                    let text = String::from_utf8_lossy(&p.payload);
                    match parse_snapshot(&text).and_then(|s| outlet_state(&s, charger_outlet)) {
                        Some(on) => {
                            tracing::info!(snapshot = %text, "hub status");
                            charger_tx.send_replace(on);
                        }
                        None => tracing::warn!(payload = %text, "unrecognised status"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let mut ticker = interval(Duration::from_secs(report_every_s.max(1)));
    loop {
        ticker.tick().await;

        battery.set_charging(*charger_rx.borrow());
        let payload = format_current(battery.sample(), clock.tick());

        if let Err(e) = client
            .publish(FROM_CLIENT, QoS::AtLeastOnce, false, payload.clone())
            .await
        {
            tracing::error!("publish error: {e}");
        } else {
            tracing::info!(%payload, charging = battery.is_charging(), "reported");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

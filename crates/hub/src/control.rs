//! The control loop: consumes link events from the MQTT pump task and runs
//! each delivered message through the dispatcher, one at a time.
//!
//! ```text
//! eventloop.poll() ──pump──▶ LinkEvent ──mpsc──▶ run() ──▶ Dispatcher ──▶ AsyncClient queue
//!        ▲                                                                      │
//!        └──────────────────────── drains queue ◀───────────────────────────────┘
//! ```

use tokio::sync::mpsc;

use crate::dispatcher::{DispatchError, Dispatcher};
use crate::mqtt::{self, LinkEvent, Publisher, Subscriber};
use crate::state::SharedState;
use crate::store::OutletStore;

/// Runs until the pump task exits.
pub async fn run<S, P, L>(
    dispatcher: &Dispatcher<S, P>,
    link: &L,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    shared: SharedState,
) where
    S: OutletStore,
    P: Publisher,
    L: Publisher + Subscriber,
{
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Message { topic, payload } => match dispatcher.handle(&topic, &payload).await
            {
                Ok(outcome) => {
                    tracing::debug!(%topic, ?outcome, "message handled");
                    let mut st = shared.write().await;
                    st.record_outcome(&outcome);
                }
                Err(e) => {
                    report_failure(&topic, &e);
                    let mut st = shared.write().await;
                    st.record_error(format!("{topic}: {e}"));
                }
            },
            LinkEvent::Connected => {
                tracing::info!("mqtt connected");
                // Subscriptions do not survive a clean-session reconnect.
                if let Err(e) = mqtt::subscribe_inbound(link).await {
                    tracing::error!("subscribe failed: {e}");
                }
                if let Err(e) = link.publish(mqtt::TO_ACTUATOR, mqtt::GREETING.into()).await {
                    tracing::warn!("greeting failed: {e}");
                }

                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            LinkEvent::Disconnected => {
                tracing::warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            LinkEvent::Failed(reason) => {
                tracing::error!("mqtt error: {reason}. reconnecting...");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_error(format!("mqtt error: {reason}"));
            }
        }
    }
    tracing::warn!("mqtt event stream closed");
}

fn report_failure(topic: &str, err: &DispatchError) {
    match err {
        DispatchError::UnknownOutlet { .. } => tracing::warn!(%topic, "rejected: {err}"),
        DispatchError::Store(_) | DispatchError::Transport(_) => {
            tracing::error!(%topic, "command aborted: {err}")
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

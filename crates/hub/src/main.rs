mod command;
mod config;
mod control;
mod db;
mod dispatcher;
mod mqtt;
mod policy;
mod state;
mod store;
mod web;

use anyhow::Result;
use rumqttc::{AsyncClient, MqttOptions};
use std::{env, path::Path, sync::Arc, time::Duration};
use tokio::sync::{mpsc, RwLock};
use tracing_subscriber::EnvFilter;

use db::Db;
use dispatcher::Dispatcher;
use state::SystemState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let client_id = env::var("MQTT_CLIENT_ID").unwrap_or_else(|_| "powerstrip-hub".to_string());
    let db_url =
        env::var("DB_URL").unwrap_or_else(|_| "sqlite:powerstrip.db?mode=rwc".to_string());
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (strip layout + policy defaults) ────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = if Path::new(&config_path).exists() {
        config::load(&config_path)?
    } else {
        tracing::warn!(path = %config_path, "config file not found, using defaults");
        config::Config::default()
    };
    config::apply(&cfg, &db).await?;
    let layout = cfg.layout();

    // ── MQTT client + dispatcher ────────────────────────────────────
    let mut mqttoptions = MqttOptions::new(client_id, broker.clone(), port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, eventloop) = AsyncClient::new(mqttoptions, 20);
    let dispatcher = Dispatcher::new(db.clone(), client.clone(), layout);

    // ── Shared state (ephemeral, for the status API) ────────────────
    let initial = dispatcher.snapshot().await?;
    tracing::info!(outlets = layout.outlet_count, status = %initial, "db ready");
    let shared = Arc::new(RwLock::new(SystemState::new(&initial)));
    {
        let mut st = shared.write().await;
        st.record_system("hub started".to_string());
    }

    // ── Web server ──────────────────────────────────────────────────
    let web_state = web::AppState {
        shared: Arc::clone(&shared),
        db: db.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state, web_port).await {
            tracing::error!("status api stopped: {e:#}");
        }
    });

    // ── Event loop ──────────────────────────────────────────────────
    // Polled in its own task so queued publishes and keep-alives keep
    // flowing while the control loop is busy with a message.
    tracing::info!(%broker, port, "connecting to mqtt broker");
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    tokio::spawn(mqtt::pump(eventloop, link_tx));

    control::run(&dispatcher, &client, link_rx, shared).await;
    Ok(())
}

use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;

use gw_common::config::{parse_csv, parse_status_codes, GatewayConfig, StreamingMode};
use gw_core::events::OperationalEvent;
use gw_core::rotation::{RotationConfig, RotationController};
use gw_core::{AppState, CredentialStore, RuntimeSettings};
use gw_link::{BrowserAgentLink, LinkEvent};

use crate::cli::CliArgs;

pub struct Bootstrap {
    pub state: AppState,
}

/// Resolves `GatewayConfig` (CLI > env > default, via `clap`), discovers
/// credentials, and assembles the shared `AppState` the router and
/// coordinator run against.
pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let defaults = GatewayConfig::default();

    let config = GatewayConfig {
        host: args.host.unwrap_or(defaults.host),
        port: args.port.unwrap_or(defaults.port),
        streaming_mode: args
            .streaming_mode
            .as_deref()
            .and_then(StreamingMode::parse)
            .unwrap_or(defaults.streaming_mode),
        failure_threshold: args.failure_threshold.unwrap_or(defaults.failure_threshold),
        switch_on_uses: args.switch_on_uses.unwrap_or(defaults.switch_on_uses),
        max_retries: args.max_retries.unwrap_or(defaults.max_retries),
        retry_delay_ms: args.retry_delay_ms.unwrap_or(defaults.retry_delay_ms),
        immediate_switch_status_codes: args
            .immediate_switch_status_codes
            .as_deref()
            .map(parse_status_codes)
            .unwrap_or(defaults.immediate_switch_status_codes),
        api_keys: args
            .api_keys
            .as_deref()
            .map(parse_csv)
            .filter(|keys| !keys.is_empty())
            .unwrap_or(defaults.api_keys),
        initial_auth_index: args.initial_auth_index.or(defaults.initial_auth_index),
    };
    let config = Arc::new(config);

    let credentials = Arc::new(CredentialStore::discover().context("discover credentials")?);
    let link = Arc::new(BrowserAgentLink::new());
    let initial_index = config
        .initial_auth_index
        .unwrap_or_else(|| credentials.initial_indices()[0]);

    let rotation_config = RotationConfig {
        failure_threshold: config.failure_threshold,
        switch_on_uses: config.switch_on_uses,
        immediate_switch_status_codes: config.immediate_switch_status_codes.clone(),
    };
    let rotation = Arc::new(RotationController::new(
        rotation_config,
        credentials.clone(),
        link.clone(),
        initial_index,
    ));
    spawn_connection_lost_bridge(&link, &rotation);
    let settings = Arc::new(RuntimeSettings::new(&config));

    let state = AppState {
        config,
        credentials,
        link,
        rotation,
        settings,
    };

    Ok(Bootstrap { state })
}

/// Forwards the link's own `ConnectionLost` broadcast onto the rotation
/// controller's event hub, so `/api/status` sees it the same way it sees
/// switch events.
fn spawn_connection_lost_bridge(link: &Arc<BrowserAgentLink>, rotation: &Arc<RotationController>) {
    let mut events = link.subscribe();
    let rotation = rotation.clone();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LinkEvent::ConnectionLost => {
                    rotation
                        .events()
                        .emit(OperationalEvent::ConnectionLost { at: SystemTime::now() })
                        .await;
                }
            }
        }
    });
}

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use cfb_core::config::Config;

use cfb::app::{join_background, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cfb_core::logging::init("cfb")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(config = ?cfg, "configuration loaded");

    let cancel = CancellationToken::new();
    let (state, events) = AppState::build(cfg, cancel.clone()).await?;

    // Surface bad admin credentials at startup rather than on the first pass.
    if let Err(e) = state.tokens.get_valid_token().await {
        tracing::error!(error = %e, "initial admin login failed");
    }

    let reconciler = {
        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { state.reconciler.run(cancel).await })
    };

    let listener = {
        let relay = state.relay.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { relay.run(events, cancel).await })
    };

    if let Some(feed) = &state.feed {
        match feed.get_feed().await {
            Ok(payload) => tracing::info!(bytes = payload.len(), "feed cache warmed"),
            Err(e) => tracing::warn!(error = %e, "feed warm-up failed"),
        }
    }

    tracing::info!(
        channel = state.relay.bridged_channel(),
        realm = %state.cfg.keycloak_user_realm,
        "bridge running, press ctrl-c to stop"
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cancel.cancel();

    join_background(vec![("reconciler", reconciler), ("relay listener", listener)]).await;
    Ok(())
}

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use cfb_bluesky::{BlueskyFeed, BlueskyMessaging, BlueskyProvisioner};
use cfb_core::{
    config::Config,
    directory::IdentityDirectory,
    feed::FeedCache,
    mailbox::Mailbox,
    ports::AdminCredentials,
    reconcile::Reconciler,
    relay::{bridge::MessageRelay, types::ChatEvent},
    token::TokenManager,
    vault::{AttributeVault, CredentialVault},
    Result,
};
use cfb_irc::IrcTransport;
use cfb_keycloak::KeycloakClient;

/// Everything request handlers need, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub tokens: Arc<TokenManager>,
    pub directory: IdentityDirectory,
    pub vault: Arc<dyn CredentialVault>,
    pub reconciler: Reconciler,
    pub mailbox: Mailbox,
    pub feed: Option<Arc<FeedCache>>,
    pub relay: Arc<MessageRelay>,
}

impl AppState {
    /// Build components and connect to the chat network. The returned
    /// receiver carries inbound chat events for the relay listener.
    pub async fn build(
        cfg: Arc<Config>,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<ChatEvent>)> {
        let keycloak = Arc::new(KeycloakClient::new(
            cfg.keycloak_url.clone(),
            cfg.keycloak_user_realm.clone(),
            cfg.keycloak_page_size,
            cfg.http_timeout,
        )?);

        let tokens = Arc::new(
            TokenManager::new(
                keycloak.clone(),
                AdminCredentials {
                    username: cfg.keycloak_admin.clone(),
                    password: cfg.keycloak_admin_password.clone(),
                    realm: cfg.keycloak_admin_realm.clone(),
                },
            )
            .with_margin_seconds(whole_seconds(cfg.token_refresh_margin)),
        );
        let directory = IdentityDirectory::new(tokens.clone(), keycloak);
        let vault: Arc<dyn CredentialVault> =
            Arc::new(AttributeVault::new(directory.clone(), cfg.encryption_key));

        let provisioner = Arc::new(BlueskyProvisioner::new(
            cfg.bluesky_host.clone(),
            cfg.bluesky_handle_domain.clone(),
            cfg.http_timeout,
        )?);
        let reconciler = Reconciler::new(directory.clone(), vault.clone(), provisioner)
            .with_interval(cfg.reconcile_interval);
        let mailbox = Mailbox::new(
            vault.clone(),
            Arc::new(BlueskyMessaging::new(cfg.bluesky_host.clone(), cfg.http_timeout)?),
        );

        let feed = match &cfg.feed_login {
            Some(login) => {
                let source = Arc::new(BlueskyFeed::new(
                    cfg.feed_service_url.clone(),
                    login.handle.clone(),
                    login.password.clone(),
                    cfg.feed_uri(),
                    cfg.http_timeout,
                )?);
                Some(Arc::new(FeedCache::with_ttl(source, cfg.feed_ttl)))
            }
            None => {
                tracing::info!("BLUESKY_HANDLE/BLUESKY_PASSWORD not set, feed disabled");
                None
            }
        };

        let (transport, events) =
            IrcTransport::connect(&cfg.irc_server, &cfg.irc_nickname, cancel).await?;
        let relay = Arc::new(
            MessageRelay::new(transport, cfg.irc_channel.clone())
                .with_history_limit(cfg.channel_history_limit),
        );

        Ok((
            Self {
                cfg,
                tokens,
                directory,
                vault,
                reconciler,
                mailbox,
                feed,
                relay,
            },
            events,
        ))
    }
}

/// Duration in whole seconds, saturating instead of wrapping.
fn whole_seconds(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

/// Wait for background tasks after shutdown; a task that panicked is logged.
/// Returns how many failed.
pub async fn join_background(tasks: Vec<(&'static str, JoinHandle<()>)>) -> usize {
    let mut failed = 0;
    for (task, handle) in tasks {
        if let Err(e) = handle.await {
            tracing::error!(task, error = %e, "background task failed");
            failed += 1;
        }
    }
    failed
}

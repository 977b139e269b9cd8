use std::{collections::HashMap, sync::Arc};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    relay::{
        port::ChatTransport,
        types::{ChatEvent, ConversationTurn, RelayReport},
    },
    Error, Result,
};

type History = Arc<Mutex<Vec<String>>>;

/// Relays conversation turns to a bridged channel and records inbound channel
/// traffic per channel.
///
/// Each channel's history has its own lock; the map lock is only held long
/// enough to look up or create an entry.
pub struct MessageRelay {
    transport: Arc<dyn ChatTransport>,
    channel: String,
    history_limit: Option<usize>,
    channels: Mutex<HashMap<String, History>>,
}

impl MessageRelay {
    pub fn new(transport: Arc<dyn ChatTransport>, channel: impl Into<String>) -> Self {
        Self {
            transport,
            channel: channel.into(),
            history_limit: None,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Keep at most `limit` messages per channel (oldest dropped first).
    /// Histories are unbounded unless this is set.
    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit.filter(|l| *l > 0);
        self
    }

    pub fn bridged_channel(&self) -> &str {
        &self.channel
    }

    /// Send every user/assistant turn to the bridged channel as
    /// `"[role] content"`, one message per turn, in input order.
    ///
    /// Without an established connection the turns are dropped and counted in
    /// the report. Send failures are returned to the caller.
    pub async fn relay_conversation(&self, turns: &[ConversationTurn]) -> Result<RelayReport> {
        let mut report = RelayReport::default();

        let connected = self.transport.is_connected();
        for turn in turns {
            if !turn.is_relayed() {
                report.skipped += 1;
                continue;
            }
            if !connected {
                report.dropped += 1;
                continue;
            }
            self.transport
                .send(&self.channel, &turn.to_chat_line())
                .await?;
            report.sent += 1;
        }

        if report.dropped > 0 {
            tracing::warn!(
                channel = %self.channel,
                dropped = report.dropped,
                "chat connection not established, dropped outbound messages"
            );
        } else {
            tracing::debug!(channel = %self.channel, sent = report.sent, "relayed conversation");
        }
        Ok(report)
    }

    /// Apply one inbound event.
    pub async fn handle_event(&self, event: ChatEvent) -> Result<()> {
        match event {
            ChatEvent::Registered => {
                tracing::info!(channel = %self.channel, "registered with chat server, joining");
                self.transport.join(&self.channel).await?;
            }
            ChatEvent::Joined { channel } => {
                self.track(&channel).await;
                tracing::info!(channel = %channel, "tracking channel");
            }
            ChatEvent::Message { channel, text, .. } => {
                let Some(history) = self.history(&channel).await else {
                    tracing::debug!(channel = %channel, "message for untracked channel ignored");
                    return Ok(());
                };
                let mut messages = history.lock().await;
                messages.push(text);
                if let Some(limit) = self.history_limit {
                    if messages.len() > limit {
                        let excess = messages.len() - limit;
                        messages.drain(..excess);
                    }
                }
            }
            ChatEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "chat connection lost");
            }
        }
        Ok(())
    }

    /// Consume inbound events until the stream ends or `cancel` fires.
    pub async fn run(&self, mut events: mpsc::Receiver<ChatEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                ev = events.recv() => {
                    let Some(ev) = ev else {
                        tracing::info!("chat event stream closed");
                        break;
                    };
                    if let Err(e) = self.handle_event(ev).await {
                        tracing::warn!(error = %e, "failed to handle chat event");
                    }
                }
            }
        }
    }

    pub async fn list_tracked_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn get_channel_history(&self, channel: &str) -> Result<Vec<String>> {
        let history = self
            .history(channel)
            .await
            .ok_or_else(|| Error::NotFound(format!("channel {channel}")))?;
        let messages = history.lock().await;
        Ok(messages.clone())
    }

    async fn track(&self, channel: &str) {
        let mut map = self.channels.lock().await;
        map.entry(channel_key(channel)).or_default();
    }

    async fn history(&self, channel: &str) -> Option<History> {
        self.channels.lock().await.get(&channel_key(channel)).cloned()
    }
}

/// Channel names are case-insensitive on the wire.
fn channel_key(channel: &str) -> String {
    channel.to_ascii_lowercase()
}

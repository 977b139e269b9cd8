use async_trait::async_trait;

use crate::Result;

/// Chat-network port (IRC today).
///
/// Inbound traffic is not part of this trait: adapters hand out a stream of
/// `ChatEvent`s when they connect, and the relay listener consumes it.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Whether the connection is registered and usable for sends.
    fn is_connected(&self) -> bool;

    async fn join(&self, channel: &str) -> Result<()>;
    async fn send(&self, channel: &str, text: &str) -> Result<()>;
}

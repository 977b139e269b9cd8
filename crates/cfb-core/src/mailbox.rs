//! Acting on the secondary platform on behalf of an identity.
//!
//! Looks up the identity's stored credential through the vault and hands it
//! to the messaging port. Nothing here is cached; every call decrypts afresh.

use std::sync::Arc;

use crate::{
    domain::TimelinePost, ports::SecondaryMessaging, vault::CredentialVault, Error, Result,
};

/// Upper bound for one timeline read.
pub const MAX_TIMELINE_LIMIT: usize = 100;

#[derive(Clone)]
pub struct Mailbox {
    vault: Arc<dyn CredentialVault>,
    messaging: Arc<dyn SecondaryMessaging>,
}

impl Mailbox {
    pub fn new(vault: Arc<dyn CredentialVault>, messaging: Arc<dyn SecondaryMessaging>) -> Self {
        Self { vault, messaging }
    }

    /// Send `text` to `recipient` as the identity `sender_id`.
    pub async fn send_message(&self, sender_id: &str, recipient: &str, text: &str) -> Result<()> {
        let recipient = recipient.trim().trim_start_matches('@');
        if recipient.is_empty() {
            return Err(Error::External("recipient handle is empty".to_string()));
        }
        if text.trim().is_empty() {
            return Err(Error::External("message text is empty".to_string()));
        }

        let credential = self.vault.get_credential(sender_id).await?;
        self.messaging
            .send_message(&credential, recipient, text)
            .await?;
        tracing::info!(identity_id = sender_id, recipient, "sent secondary message");
        Ok(())
    }

    /// Timeline of the identity `identity_id`, newest first.
    pub async fn get_messages(&self, identity_id: &str, limit: usize) -> Result<Vec<TimelinePost>> {
        let credential = self.vault.get_credential(identity_id).await?;
        let limit = limit.clamp(1, MAX_TIMELINE_LIMIT);
        self.messaging.timeline(&credential, limit).await
    }
}

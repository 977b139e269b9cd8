//! Secondary-platform credentials stored against an identity.

use async_trait::async_trait;

use crate::{
    cipher::{self, KEY_LENGTH},
    directory::IdentityDirectory,
    domain::{Attributes, Identity, SecondaryCredential, HANDLE_ATTRIBUTE, SECRET_ATTRIBUTE},
    Error, Result,
};

/// Where secondary credentials live.
///
/// The reconciler and request handlers only see this trait, so the backing
/// store (identity attributes today) can change without touching them.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Read and decrypt the credential of an identity.
    async fn get_credential(&self, identity_id: &str) -> Result<SecondaryCredential>;

    /// Encrypt `secret` and persist it together with `handle` in one update.
    async fn store_credential(&self, identity_id: &str, handle: &str, secret: &str) -> Result<()>;

    /// Whether `identity` already has a secondary account on record.
    fn is_provisioned(&self, identity: &Identity) -> bool;
}

/// Vault backed by two attributes on the identity-provider record.
pub struct AttributeVault {
    directory: IdentityDirectory,
    key: [u8; KEY_LENGTH],
}

impl AttributeVault {
    pub fn new(directory: IdentityDirectory, key: [u8; KEY_LENGTH]) -> Self {
        Self { directory, key }
    }
}

#[async_trait]
impl CredentialVault for AttributeVault {
    async fn get_credential(&self, identity_id: &str) -> Result<SecondaryCredential> {
        let identity = self.directory.get_identity(identity_id).await?;

        let handle = identity
            .attribute(HANDLE_ATTRIBUTE)
            .ok_or_else(|| Error::IncompleteCredential {
                identity_id: identity_id.to_string(),
                missing: HANDLE_ATTRIBUTE,
            })?;
        let encrypted = identity
            .attribute(SECRET_ATTRIBUTE)
            .ok_or_else(|| Error::IncompleteCredential {
                identity_id: identity_id.to_string(),
                missing: SECRET_ATTRIBUTE,
            })?;

        let secret = cipher::decrypt_from_string(&self.key, encrypted)?;

        Ok(SecondaryCredential {
            handle: handle.to_string(),
            secret,
        })
    }

    async fn store_credential(&self, identity_id: &str, handle: &str, secret: &str) -> Result<()> {
        let encrypted = cipher::encrypt_to_string(&self.key, secret)?;

        let mut attributes = Attributes::new();
        attributes.insert(HANDLE_ATTRIBUTE.to_string(), vec![handle.to_string()]);
        attributes.insert(SECRET_ATTRIBUTE.to_string(), vec![encrypted]);

        self.directory
            .update_attributes(identity_id, attributes)
            .await
            .map_err(|e| match e {
                Error::Auth(_) | Error::NotFound(_) | Error::Storage(_) => e,
                other => Error::Storage(format!("failed to write credential: {other}")),
            })?;

        tracing::info!(identity_id, handle, "stored secondary credential");
        Ok(())
    }

    fn is_provisioned(&self, identity: &Identity) -> bool {
        identity.has_secondary_handle()
    }
}

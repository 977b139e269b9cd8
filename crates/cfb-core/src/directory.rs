use std::sync::Arc;

use crate::{
    domain::{Attributes, Identity},
    ports::IdentityStore,
    token::TokenManager,
    Result,
};

/// Identity store access with the admin token handled for the caller.
#[derive(Clone)]
pub struct IdentityDirectory {
    tokens: Arc<TokenManager>,
    store: Arc<dyn IdentityStore>,
}

impl IdentityDirectory {
    pub fn new(tokens: Arc<TokenManager>, store: Arc<dyn IdentityStore>) -> Self {
        Self { tokens, store }
    }

    pub async fn list_identities(&self) -> Result<Vec<Identity>> {
        let token = self.tokens.get_valid_token().await?;
        self.store.list_all(&token).await
    }

    pub async fn get_identity(&self, identity_id: &str) -> Result<Identity> {
        let token = self.tokens.get_valid_token().await?;
        self.store.get(&token, identity_id).await
    }

    pub async fn update_attributes(&self, identity_id: &str, attributes: Attributes) -> Result<()> {
        let token = self.tokens.get_valid_token().await?;
        self.store
            .update_attributes(&token, identity_id, attributes)
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        token::tests::{creds, FakeLogin},
        Error,
    };
    use std::collections::{BTreeMap, HashSet};

    /// In-memory identity store keyed by id; records the tokens it was given.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        identities: std::sync::Mutex<BTreeMap<String, Identity>>,
        tokens_seen: std::sync::Mutex<Vec<String>>,
        failing_updates: std::sync::Mutex<HashSet<String>>,
    }

    impl MemoryStore {
        pub(crate) fn insert(&self, identity: Identity) {
            self.identities
                .lock()
                .unwrap()
                .insert(identity.id.clone(), identity);
        }

        pub(crate) fn snapshot(&self, id: &str) -> Option<Identity> {
            self.identities.lock().unwrap().get(id).cloned()
        }

        pub(crate) fn fail_updates_for(&self, id: &str) {
            self.failing_updates.lock().unwrap().insert(id.to_string());
        }

        pub(crate) fn tokens_seen(&self) -> Vec<String> {
            self.tokens_seen.lock().unwrap().clone()
        }

        fn note(&self, token: &str) {
            self.tokens_seen.lock().unwrap().push(token.to_string());
        }
    }

    #[async_trait::async_trait]
    impl IdentityStore for MemoryStore {
        async fn get(&self, access_token: &str, identity_id: &str) -> Result<Identity> {
            self.note(access_token);
            self.snapshot(identity_id)
                .ok_or_else(|| Error::NotFound(format!("identity {identity_id}")))
        }

        async fn list_all(&self, access_token: &str) -> Result<Vec<Identity>> {
            self.note(access_token);
            Ok(self.identities.lock().unwrap().values().cloned().collect())
        }

        async fn update_attributes(
            &self,
            access_token: &str,
            identity_id: &str,
            attributes: Attributes,
        ) -> Result<()> {
            self.note(access_token);
            if self.failing_updates.lock().unwrap().contains(identity_id) {
                return Err(Error::Storage(format!("update of {identity_id} rejected")));
            }
            let mut map = self.identities.lock().unwrap();
            let identity = map
                .get_mut(identity_id)
                .ok_or_else(|| Error::NotFound(format!("identity {identity_id}")))?;
            identity.attributes.extend(attributes);
            Ok(())
        }
    }

    pub(crate) fn identity(id: &str, email: Option<&str>) -> Identity {
        Identity {
            id: id.to_string(),
            email: email.map(str::to_string),
            attributes: Attributes::new(),
        }
    }

    pub(crate) fn directory(store: Arc<MemoryStore>) -> (IdentityDirectory, Arc<FakeLogin>) {
        let login = Arc::new(FakeLogin::default());
        let tokens = Arc::new(TokenManager::new(login.clone(), creds()));
        (IdentityDirectory::new(tokens, store), login)
    }

    #[tokio::test]
    async fn calls_carry_a_valid_admin_token() {
        let store = Arc::new(MemoryStore::default());
        store.insert(identity("u1", Some("a@example.com")));
        let (dir, login) = directory(store.clone());

        let all = dir.list_identities().await.unwrap();
        assert_eq!(all.len(), 1);
        let one = dir.get_identity("u1").await.unwrap();
        assert_eq!(one.email.as_deref(), Some("a@example.com"));

        assert_eq!(login.calls(), 1);
        assert_eq!(store.tokens_seen(), vec!["token-1", "token-1"]);
    }

    #[tokio::test]
    async fn missing_identity_is_not_found() {
        let store = Arc::new(MemoryStore::default());
        let (dir, _) = directory(store);
        assert!(matches!(
            dir.get_identity("nope").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn auth_failure_short_circuits_store_access() {
        let store = Arc::new(MemoryStore::default());
        let (dir, login) = directory(store.clone());
        login.push(Err(Error::Auth("denied".to_string())));

        assert!(matches!(dir.list_identities().await, Err(Error::Auth(_))));
        assert!(store.tokens_seen().is_empty());
    }
}

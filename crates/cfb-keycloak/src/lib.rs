//! Keycloak adapter.
//!
//! Implements the `cfb-core` admin-login and identity-store ports over the
//! Keycloak admin REST API.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cfb_core::{
    domain::{AdminGrant, Attributes, Identity},
    errors::Error,
    ports::{AdminCredentials, AdminLogin, IdentityStore},
    Result,
};

/// Client id used for the admin password grant.
const ADMIN_CLIENT_ID: &str = "admin-cli";

#[derive(Clone, Debug)]
pub struct KeycloakClient {
    base_url: String,
    user_realm: String,
    page_size: usize,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Subset of Keycloak's `UserRepresentation` the bridge reads.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRepresentation {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    attributes: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Serialize)]
struct AttributesUpdate<'a> {
    attributes: &'a Attributes,
}

impl From<UserRepresentation> for Identity {
    fn from(u: UserRepresentation) -> Self {
        Identity {
            id: u.id,
            email: u.email,
            attributes: u.attributes.unwrap_or_default(),
        }
    }
}

impl KeycloakClient {
    pub fn new(
        base_url: impl Into<String>,
        user_realm: impl Into<String>,
        page_size: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("keycloak http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_realm: user_realm.into(),
            page_size: page_size.max(1),
            http,
        })
    }

    fn token_url(&self, realm: &str) -> String {
        format!(
            "{}/realms/{realm}/protocol/openid-connect/token",
            self.base_url
        )
    }

    fn users_url(&self) -> String {
        format!("{}/admin/realms/{}/users", self.base_url, self.user_realm)
    }

    fn user_url(&self, identity_id: &str) -> String {
        format!("{}/{identity_id}", self.users_url())
    }

    fn map_err(e: reqwest::Error) -> Error {
        Error::Transport(format!("keycloak request error: {e}"))
    }

    async fn fetch_user(&self, access_token: &str, identity_id: &str) -> Result<UserRepresentation> {
        let resp = self
            .http
            .get(self.user_url(identity_id))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(Self::map_err)?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("identity {identity_id}")));
        }
        if !status.is_success() {
            return Err(status_error("get user", status, resp).await);
        }
        resp.json()
            .await
            .map_err(|e| Error::External(format!("keycloak user json error: {e}")))
    }
}

async fn status_error(what: &str, status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    let body = resp.text().await.unwrap_or_default();
    let msg = format!(
        "keycloak {what} failed: {status} {}",
        body.chars().take(200).collect::<String>()
    );
    match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => Error::Auth(msg),
        _ => Error::External(msg),
    }
}

/// Merge `update` into `current`; keys in `update` replace existing values.
fn merge_attributes(current: Option<Attributes>, update: Attributes) -> Attributes {
    let mut merged = current.unwrap_or_default();
    merged.extend(update);
    merged
}

#[async_trait]
impl AdminLogin for KeycloakClient {
    async fn login(&self, creds: &AdminCredentials) -> Result<AdminGrant> {
        let resp = self
            .http
            .post(self.token_url(&creds.realm))
            .form(&[
                ("grant_type", "password"),
                ("client_id", ADMIN_CLIENT_ID),
                ("username", creds.username.as_str()),
                ("password", creds.password.as_str()),
            ])
            .send()
            .await
            .map_err(Self::map_err)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "keycloak admin login failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::Auth(format!("keycloak token json error: {e}")))?;

        Ok(AdminGrant {
            access_token: token.access_token,
            expires_in_seconds: token.expires_in,
        })
    }
}

#[async_trait]
impl IdentityStore for KeycloakClient {
    async fn get(&self, access_token: &str, identity_id: &str) -> Result<Identity> {
        Ok(self.fetch_user(access_token, identity_id).await?.into())
    }

    async fn list_all(&self, access_token: &str) -> Result<Vec<Identity>> {
        let mut out = Vec::new();
        let mut first = 0usize;
        loop {
            let resp = self
                .http
                .get(self.users_url())
                .bearer_auth(access_token)
                .query(&[
                    ("first", first.to_string()),
                    ("max", self.page_size.to_string()),
                    ("briefRepresentation", "false".to_string()),
                ])
                .send()
                .await
                .map_err(Self::map_err)?;

            let status = resp.status();
            if !status.is_success() {
                return Err(status_error("list users", status, resp).await);
            }
            let page: Vec<UserRepresentation> = resp
                .json()
                .await
                .map_err(|e| Error::External(format!("keycloak users json error: {e}")))?;

            let n = page.len();
            out.extend(page.into_iter().map(Identity::from));
            if n < self.page_size {
                break;
            }
            first += n;
        }
        tracing::debug!(count = out.len(), realm = %self.user_realm, "listed identities");
        Ok(out)
    }

    async fn update_attributes(
        &self,
        access_token: &str,
        identity_id: &str,
        attributes: Attributes,
    ) -> Result<()> {
        // Keycloak replaces the whole attribute map on PUT, so merge first.
        let current = self.fetch_user(access_token, identity_id).await?;
        let merged = merge_attributes(current.attributes, attributes);

        let resp = self
            .http
            .put(self.user_url(identity_id))
            .bearer_auth(access_token)
            .json(&AttributesUpdate {
                attributes: &merged,
            })
            .send()
            .await
            .map_err(|e| Error::Storage(format!("keycloak update request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Storage(format!(
                "keycloak update of {identity_id} failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        Ok(())
    }
}

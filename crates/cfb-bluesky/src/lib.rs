//! Bluesky (AT Protocol) adapter.
//!
//! Implements account provisioning, the feed source and per-identity
//! messaging over XRPC.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use cfb_core::{
    domain::{ProvisionedAccount, SecondaryCredential, TimelinePost},
    errors::Error,
    ports::{AccountProvisioner, FeedSource, SecondaryMessaging},
    Result,
};

/// Longest first handle segment we generate.
const MAX_HANDLE_PREFIX: usize = 18;
const MIN_HANDLE_PREFIX: usize = 3;

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("bluesky http client: {e}")))
}

fn xrpc_url(base: &str, method: &str) -> String {
    format!("{}/xrpc/{method}", base.trim_end_matches('/'))
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Handle for a new account: sanitized e-mail local part plus the PDS domain.
pub fn derive_handle(email: &str, domain: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let mut prefix: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_HANDLE_PREFIX)
        .collect();
    if prefix.len() < MIN_HANDLE_PREFIX {
        prefix = format!("user{prefix}");
    }
    format!("{prefix}.{}", domain.trim_start_matches('.'))
}

#[derive(Serialize)]
struct CreateAccountRequest<'a> {
    email: &'a str,
    handle: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    handle: String,
    #[serde(default)]
    did: String,
    access_jwt: String,
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

/// Creates accounts on a PDS.
#[derive(Clone, Debug)]
pub struct BlueskyProvisioner {
    pds_url: String,
    handle_domain: String,
    http: reqwest::Client,
}

impl BlueskyProvisioner {
    pub fn new(
        pds_url: impl Into<String>,
        handle_domain: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            pds_url: pds_url.into(),
            handle_domain: handle_domain.into(),
            http: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl AccountProvisioner for BlueskyProvisioner {
    async fn create_account(&self, email: &str, password: &str) -> Result<ProvisionedAccount> {
        let handle = derive_handle(email, &self.handle_domain);

        let resp = self
            .http
            .post(xrpc_url(&self.pds_url, "com.atproto.server.createAccount"))
            .json(&CreateAccountRequest {
                email,
                handle: &handle,
                password,
            })
            .send()
            .await
            .map_err(|e| Error::Provision(format!("bluesky request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provision(format!(
                "createAccount for {handle} failed: {status} {}",
                snippet(&body)
            )));
        }

        let session: SessionResponse = resp
            .json()
            .await
            .map_err(|e| Error::Provision(format!("bluesky createAccount json error: {e}")))?;

        Ok(ProvisionedAccount {
            handle: session.handle,
            access_token: session.access_jwt,
        })
    }
}

/// Logs in and reads one feed generator's feed.
#[derive(Clone)]
pub struct BlueskyFeed {
    service_url: String,
    identifier: String,
    password: String,
    feed_uri: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for BlueskyFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlueskyFeed")
            .field("service_url", &self.service_url)
            .field("identifier", &self.identifier)
            .field("feed_uri", &self.feed_uri)
            .finish_non_exhaustive()
    }
}

impl BlueskyFeed {
    pub fn new(
        service_url: impl Into<String>,
        identifier: impl Into<String>,
        password: impl Into<String>,
        feed_uri: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            service_url: service_url.into(),
            identifier: identifier.into(),
            password: password.into(),
            feed_uri: feed_uri.into(),
            http: http_client(timeout)?,
        })
    }

    async fn login(&self) -> Result<String> {
        let session =
            create_session(&self.http, &self.service_url, &self.identifier, &self.password)
                .await?;
        Ok(session.access_jwt)
    }
}

/// `com.atproto.server.createSession`; a rejected login is `Error::Auth`.
async fn create_session(
    http: &reqwest::Client,
    base: &str,
    identifier: &str,
    password: &str,
) -> Result<SessionResponse> {
    let resp = http
        .post(xrpc_url(base, "com.atproto.server.createSession"))
        .json(&CreateSessionRequest {
            identifier,
            password,
        })
        .send()
        .await
        .map_err(|e| Error::Transport(format!("bluesky login request error: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Auth(format!(
            "bluesky login for {identifier} failed: {status} {}",
            snippet(&body)
        )));
    }

    resp.json()
        .await
        .map_err(|e| Error::Auth(format!("bluesky session json error: {e}")))
}

#[async_trait]
impl FeedSource for BlueskyFeed {
    async fn fetch_feed(&self) -> Result<Vec<u8>> {
        let access = self.login().await?;

        let resp = self
            .http
            .get(xrpc_url(&self.service_url, "app.bsky.feed.getFeed"))
            .bearer_auth(access)
            .query(&[("feed", self.feed_uri.as_str())])
            .send()
            .await
            .map_err(|e| Error::Transport(format!("bluesky feed request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "getFeed failed: {status} {}",
                snippet(&body)
            )));
        }

        let feed: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Transport(format!("bluesky feed json error: {e}")))?;
        tracing::debug!(feed = %self.feed_uri, "fetched feed");
        Ok(serde_json::to_vec(&feed)?)
    }
}

#[derive(Serialize)]
struct CreateRecordRequest<'a> {
    repo: &'a str,
    collection: &'static str,
    record: PostRecord,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostRecord {
    #[serde(rename = "$type")]
    kind: &'static str,
    text: String,
    created_at: String,
}

const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Text of a post addressed to `recipient`.
fn addressed_text(recipient: &str, text: &str) -> String {
    format!("@{recipient} {text}")
}

#[derive(Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    feed: Vec<TimelineItem>,
}

#[derive(Deserialize)]
struct TimelineItem {
    post: TimelineItemPost,
}

#[derive(Deserialize)]
struct TimelineItemPost {
    uri: String,
    author: TimelineAuthor,
    #[serde(default)]
    record: TimelineRecord,
}

#[derive(Deserialize)]
struct TimelineAuthor {
    handle: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimelineRecord {
    #[serde(default)]
    text: String,
    created_at: Option<String>,
}

impl From<TimelineItem> for TimelinePost {
    fn from(item: TimelineItem) -> Self {
        Self {
            uri: item.post.uri,
            author: item.post.author.handle,
            text: item.post.record.text,
            created_at: item.post.record.created_at,
        }
    }
}

/// Posts and reads timelines as a provisioned account.
#[derive(Clone, Debug)]
pub struct BlueskyMessaging {
    pds_url: String,
    http: reqwest::Client,
}

impl BlueskyMessaging {
    pub fn new(pds_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            pds_url: pds_url.into(),
            http: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl SecondaryMessaging for BlueskyMessaging {
    async fn send_message(
        &self,
        credential: &SecondaryCredential,
        recipient: &str,
        text: &str,
    ) -> Result<()> {
        let session =
            create_session(&self.http, &self.pds_url, &credential.handle, &credential.secret)
                .await?;

        let resp = self
            .http
            .post(xrpc_url(&self.pds_url, "com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&CreateRecordRequest {
                repo: &session.did,
                collection: POST_COLLECTION,
                record: PostRecord {
                    kind: POST_COLLECTION,
                    text: addressed_text(recipient, text),
                    created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                },
            })
            .send()
            .await
            .map_err(|e| Error::Transport(format!("bluesky post request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "createRecord as {} failed: {status} {}",
                session.handle,
                snippet(&body)
            )));
        }
        tracing::debug!(handle = %session.handle, recipient, "posted message");
        Ok(())
    }

    async fn timeline(
        &self,
        credential: &SecondaryCredential,
        limit: usize,
    ) -> Result<Vec<TimelinePost>> {
        let session =
            create_session(&self.http, &self.pds_url, &credential.handle, &credential.secret)
                .await?;

        let resp = self
            .http
            .get(xrpc_url(&self.pds_url, "app.bsky.feed.getTimeline"))
            .bearer_auth(&session.access_jwt)
            .query(&[("limit", limit.to_string())])
            .send()
            .await
            .map_err(|e| Error::Transport(format!("bluesky timeline request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "getTimeline failed: {status} {}",
                snippet(&body)
            )));
        }

        let timeline: TimelineResponse = resp
            .json()
            .await
            .map_err(|e| Error::Transport(format!("bluesky timeline json error: {e}")))?;
        Ok(timeline.feed.into_iter().map(TimelinePost::from).collect())
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Attribute holding the secondary-platform handle on an identity record.
pub const HANDLE_ATTRIBUTE: &str = "bluesky_handle";

/// Attribute holding the encrypted secondary-platform secret.
pub const SECRET_ATTRIBUTE: &str = "bluesky_password";

/// Identity-provider attribute map (multi-valued, as the provider stores it).
pub type Attributes = BTreeMap<String, Vec<String>>;

/// Primary-system user record owned by the identity provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub attributes: Attributes,
}

impl Identity {
    /// First non-empty value of an attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(|values| values.iter().find(|v| !v.trim().is_empty()))
            .map(String::as_str)
    }

    pub fn has_secondary_handle(&self) -> bool {
        self.attribute(HANDLE_ATTRIBUTE).is_some()
    }
}

/// Result of a successful admin login, as returned by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminGrant {
    pub access_token: String,
    pub expires_in_seconds: i64,
}

/// Short-lived admin credential held by the token manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminToken {
    pub access_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_in_seconds: i64,
}

impl AdminToken {
    pub fn from_grant(grant: AdminGrant, issued_at: DateTime<Utc>) -> Self {
        Self {
            access_token: grant.access_token,
            issued_at,
            expires_in_seconds: grant.expires_in_seconds,
        }
    }

    /// Seconds of validity left at `now` (negative once expired).
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        let elapsed = (now - self.issued_at).num_seconds().max(0);
        self.expires_in_seconds - elapsed
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, margin_seconds: i64) -> bool {
        self.remaining_seconds(now) < margin_seconds
    }
}

/// Secondary-platform credential derived from an identity.
///
/// `secret` is plaintext here; it is only ever encrypted at rest.
#[derive(Clone, PartialEq, Eq)]
pub struct SecondaryCredential {
    pub handle: String,
    pub secret: String,
}

impl std::fmt::Debug for SecondaryCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryCredential")
            .field("handle", &self.handle)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Account returned by the secondary platform after provisioning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionedAccount {
    pub handle: String,
    pub access_token: String,
}

/// One post read from an account's timeline on the secondary platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimelinePost {
    pub uri: String,
    pub author: String,
    pub text: String,
    /// RFC 3339 timestamp as sent by the platform, if any.
    pub created_at: Option<String>,
}

/// Freshness of a single-entry cached resource (admin token, feed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    /// No value was ever fetched successfully.
    NeverPopulated,
    Fresh,
    /// A value exists but is past its freshness window; it is kept until a
    /// refresh succeeds.
    StaleButUsable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn admin_token_remaining_accounts_for_elapsed_time() {
        let issued = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let token = AdminToken::from_grant(
            AdminGrant {
                access_token: "t".to_string(),
                expires_in_seconds: 600,
            },
            issued,
        );

        assert_eq!(token.remaining_seconds(issued), 600);
        assert_eq!(token.remaining_seconds(issued + Duration::seconds(200)), 400);
        assert!(!token.needs_refresh(issued + Duration::seconds(200), 300));
        assert!(token.needs_refresh(issued + Duration::seconds(301), 300));
    }

    #[test]
    fn identity_ignores_blank_attribute_values() {
        let mut identity = Identity {
            id: "u1".to_string(),
            ..Default::default()
        };
        assert!(!identity.has_secondary_handle());

        identity
            .attributes
            .insert(HANDLE_ATTRIBUTE.to_string(), vec!["  ".to_string()]);
        assert!(!identity.has_secondary_handle());

        identity.attributes.insert(
            HANDLE_ATTRIBUTE.to_string(),
            vec!["".to_string(), "alice.bsky.social".to_string()],
        );
        assert_eq!(identity.attribute(HANDLE_ATTRIBUTE), Some("alice.bsky.social"));
    }

    #[test]
    fn credential_debug_redacts_secret() {
        let cred = SecondaryCredential {
            handle: "alice".to_string(),
            secret: "hunter2".to_string(),
        };
        let dbg = format!("{cred:?}");
        assert!(dbg.contains("alice"));
        assert!(!dbg.contains("hunter2"));
    }
}

use std::{env, fs, path::Path, time::Duration};

use crate::{
    cipher::{self, KEY_LENGTH},
    errors::Error,
    feed, reconcile, token, Result,
};

/// Typed configuration for the bridge, read from the environment.
#[derive(Clone)]
pub struct Config {
    // Identity provider
    pub keycloak_url: String,
    pub keycloak_admin: String,
    pub keycloak_admin_password: String,
    pub keycloak_admin_realm: String,
    pub keycloak_user_realm: String,
    pub keycloak_page_size: usize,
    pub token_refresh_margin: Duration,

    // Secrets
    pub encryption_key: [u8; KEY_LENGTH],

    // Secondary platform
    pub bluesky_host: String,
    pub bluesky_handle_domain: String,
    pub reconcile_interval: Duration,

    // Feed
    pub feed_service_url: String,
    pub feed_login: Option<FeedLogin>,
    pub feed_did: String,
    pub feed_name: String,
    pub feed_ttl: Duration,

    // HTTP adapters
    pub http_timeout: Duration,

    // Chat
    pub irc_server: String,
    pub irc_channel: String,
    pub irc_nickname: String,
    pub channel_history_limit: Option<usize>,
}

/// Account used to read the feed.
#[derive(Clone)]
pub struct FeedLogin {
    pub handle: String,
    pub password: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("keycloak_url", &self.keycloak_url)
            .field("keycloak_admin", &self.keycloak_admin)
            .field("keycloak_admin_realm", &self.keycloak_admin_realm)
            .field("keycloak_user_realm", &self.keycloak_user_realm)
            .field("bluesky_host", &self.bluesky_host)
            .field("feed_service_url", &self.feed_service_url)
            .field("feed_enabled", &self.feed_login.is_some())
            .field("irc_server", &self.irc_server)
            .field("irc_channel", &self.irc_channel)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key lookup (the process environment in
    /// `load`, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let required = |key: &str| {
            get(key).ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
        };

        let keycloak_url = required("KEYCLOAK_SERVER_URL")?
            .trim_end_matches('/')
            .to_string();
        let keycloak_admin = required("KEYCLOAK_ADMIN")?;
        let keycloak_admin_password = required("KEYCLOAK_ADMIN_PASSWORD")?;
        let keycloak_admin_realm = get("KEYCLOAK_ADMIN_REALM").unwrap_or("master".to_string());
        let keycloak_user_realm = get("KEYCLOAK_USER_REALM").unwrap_or("opentdf".to_string());
        let keycloak_page_size = parse_or(get("KEYCLOAK_PAGE_SIZE"), 100usize).max(1);
        let token_refresh_margin = Duration::from_secs(parse_or(
            get("TOKEN_REFRESH_MARGIN_SECS"),
            token::DEFAULT_REFRESH_MARGIN_SECS as u64,
        ));

        let encryption_key = cipher::parse_key(&required("ENCRYPTION_KEY")?)
            .map_err(|e| Error::Config(format!("ENCRYPTION_KEY is invalid: {e}")))?;

        let bluesky_host = get("BLUESKY_HOST")
            .unwrap_or("https://bsky.social".to_string())
            .trim_end_matches('/')
            .to_string();
        let bluesky_handle_domain = get("BLUESKY_HANDLE_DOMAIN")
            .or_else(|| host_of(&bluesky_host))
            .ok_or_else(|| Error::Config(format!("cannot derive handle domain from {bluesky_host}")))?;
        let reconcile_interval = Duration::from_secs(
            parse_or(
                get("RECONCILE_INTERVAL_SECS"),
                reconcile::DEFAULT_INTERVAL.as_secs(),
            )
            .max(1),
        );

        let feed_service_url = get("FEED_SERVICE_URL")
            .unwrap_or("https://bsky.social".to_string())
            .trim_end_matches('/')
            .to_string();
        let feed_login = match (get("BLUESKY_HANDLE"), get("BLUESKY_PASSWORD")) {
            (Some(handle), Some(password)) => Some(FeedLogin { handle, password }),
            _ => None,
        };
        let feed_did = get("FEED_DID").unwrap_or("did:plc:y7crv2yh74s7qhmtx3mvbgv5".to_string());
        let feed_name = get("FEED_NAME").unwrap_or("art-new".to_string());
        let feed_ttl =
            Duration::from_secs(parse_or(get("FEED_TTL_SECS"), feed::DEFAULT_TTL.as_secs()));

        let http_timeout = Duration::from_millis(parse_or(get("HTTP_TIMEOUT_MS"), 10_000u64));

        let irc_server = get("IRC_SERVER").unwrap_or("irc:6667".to_string());
        let irc_channel = get("IRC_CHANNEL").unwrap_or("#ollama".to_string());
        let irc_nickname = get("IRC_NICKNAME").unwrap_or("ircbridge".to_string());
        let channel_history_limit = get("CHANNEL_HISTORY_LIMIT").and_then(|s| s.trim().parse().ok());

        Ok(Self {
            keycloak_url,
            keycloak_admin,
            keycloak_admin_password,
            keycloak_admin_realm,
            keycloak_user_realm,
            keycloak_page_size,
            token_refresh_margin,
            encryption_key,
            bluesky_host,
            bluesky_handle_domain,
            reconcile_interval,
            feed_service_url,
            feed_login,
            feed_did,
            feed_name,
            feed_ttl,
            http_timeout,
            irc_server,
            irc_channel,
            irc_nickname,
            channel_history_limit,
        })
    }

    /// `at://` locator of the configured feed generator.
    pub fn feed_uri(&self) -> String {
        format!(
            "at://{}/app.bsky.feed.generator/{}",
            self.feed_did, self.feed_name
        )
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(v: &str) -> &str {
    if v.len() >= 2
        && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\'')))
    {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

fn parse_or<T: std::str::FromStr>(v: Option<String>, default: T) -> T {
    v.and_then(|s| s.trim().parse::<T>().ok()).unwrap_or(default)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Host part of a URL like `https://pds.example.com:2583/`.
fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let host = rest.split(['/', ':']).next()?.trim();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("KEYCLOAK_SERVER_URL", "https://kc.example.com/"),
            ("KEYCLOAK_ADMIN", "admin"),
            ("KEYCLOAK_ADMIN_PASSWORD", "pw"),
            ("ENCRYPTION_KEY", "0123456789abcdef0123456789abcdef"),
        ]
    }

    #[test]
    fn defaults_apply_when_only_required_values_are_set() {
        let cfg = Config::from_lookup(lookup(&minimal())).unwrap();
        assert_eq!(cfg.keycloak_url, "https://kc.example.com");
        assert_eq!(cfg.keycloak_admin_realm, "master");
        assert_eq!(cfg.keycloak_user_realm, "opentdf");
        assert_eq!(cfg.token_refresh_margin, Duration::from_secs(300));
        assert_eq!(cfg.reconcile_interval, Duration::from_secs(300));
        assert_eq!(cfg.feed_ttl, Duration::from_secs(300));
        assert_eq!(cfg.bluesky_handle_domain, "bsky.social");
        assert_eq!(cfg.irc_server, "irc:6667");
        assert_eq!(cfg.irc_channel, "#ollama");
        assert!(cfg.feed_login.is_none());
        assert!(cfg.channel_history_limit.is_none());
        assert_eq!(
            cfg.feed_uri(),
            "at://did:plc:y7crv2yh74s7qhmtx3mvbgv5/app.bsky.feed.generator/art-new"
        );
    }

    #[test]
    fn missing_required_value_is_config_error() {
        let mut pairs = minimal();
        pairs.retain(|(k, _)| *k != "KEYCLOAK_ADMIN");
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("KEYCLOAK_ADMIN")));
    }

    #[test]
    fn bad_encryption_key_is_config_error() {
        let mut pairs = minimal();
        pairs.retain(|(k, _)| *k != "ENCRYPTION_KEY");
        pairs.push(("ENCRYPTION_KEY", "too-short"));
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn overrides_and_lenient_numbers() {
        let mut pairs = minimal();
        pairs.extend([
            ("BLUESKY_HOST", "https://pds.example.com:2583/"),
            ("FEED_TTL_SECS", "60"),
            ("RECONCILE_INTERVAL_SECS", "not-a-number"),
            ("BLUESKY_HANDLE", "bot.bsky.social"),
            ("BLUESKY_PASSWORD", "app-pw"),
            ("CHANNEL_HISTORY_LIMIT", "500"),
        ]);
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.bluesky_host, "https://pds.example.com:2583");
        assert_eq!(cfg.bluesky_handle_domain, "pds.example.com");
        assert_eq!(cfg.feed_ttl, Duration::from_secs(60));
        assert_eq!(cfg.reconcile_interval, Duration::from_secs(300));
        assert_eq!(cfg.feed_login.as_ref().unwrap().handle, "bot.bsky.social");
        assert_eq!(cfg.channel_history_limit, Some(500));
    }

    #[test]
    fn strip_quotes_handles_both_quote_styles() {
        assert_eq!(strip_quotes("\"a b\""), "a b");
        assert_eq!(strip_quotes("'x'"), "x");
        assert_eq!(strip_quotes("plain"), "plain");
    }
}

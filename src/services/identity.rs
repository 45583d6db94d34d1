//! Canonical identities for connections and calendars.
//!
//! OAuth connections are identified by provider alone (one account per provider
//! per user) and their calendars by the id the provider hands out. ICS
//! connections are identified by their normalized feed URL, and the single
//! calendar behind a feed gets an id derived from that URL.

use std::net::{Ipv4Addr, Ipv6Addr};

use sha2::{Digest, Sha256};
use url::{Host, Url};

use crate::db::models::{AuthType, Provider};

/// Length of the hex prefix used as the external id of ICS calendars.
pub const ICS_EXTERNAL_ID_LEN: usize = 20;

const MAX_FEED_URL_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("unknown calendar provider '{0}'")]
    UnknownProvider(String),

    #[error("a feed url is required for ics sources")]
    MissingFeedUrl,

    #[error("invalid feed url: {0}")]
    InvalidFeedUrl(String),

    #[error("external calendar id is required for {0} calendars")]
    MissingExternalCalendarId(&'static str),
}

/// How a connection is identified, and therefore how its calendars are identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionKind {
    OAuth(Provider),
    Ics { feed_url: Url },
}

impl ConnectionKind {
    pub fn provider(&self) -> Provider {
        match self {
            ConnectionKind::OAuth(provider) => *provider,
            ConnectionKind::Ics { .. } => Provider::Ics,
        }
    }

    pub fn feed_url(&self) -> Option<&str> {
        match self {
            ConnectionKind::OAuth(_) => None,
            ConnectionKind::Ics { feed_url } => Some(feed_url.as_str()),
        }
    }

    pub fn identity_key(&self) -> String {
        connection_identity_key(self.provider(), self.feed_url())
    }

    /// Resolve the calendar's external id: derived for ICS, caller-supplied for OAuth.
    ///
    /// A caller-supplied id on an ICS item is ignored.
    pub fn external_calendar_id(&self, supplied: Option<&str>) -> Result<String, IdentityError> {
        match self {
            ConnectionKind::Ics { feed_url } => Ok(derive_external_calendar_id(feed_url.as_str())),
            ConnectionKind::OAuth(provider) => supplied
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .ok_or(IdentityError::MissingExternalCalendarId(provider.as_str())),
        }
    }

    /// Fallback display name for a calendar created without one.
    pub fn default_calendar_name(&self, external_calendar_id: &str) -> String {
        match self {
            ConnectionKind::OAuth(_) => external_calendar_id.to_string(),
            ConnectionKind::Ics { feed_url } => feed_url
                .host_str()
                .map(str::to_string)
                .unwrap_or_else(|| feed_url.to_string()),
        }
    }

    /// Build the kind for a raw provider label and optional feed URL.
    pub fn resolve(raw_provider: &str, raw_url: Option<&str>) -> Result<Self, IdentityError> {
        let provider = normalize_provider(raw_provider)
            .ok_or_else(|| IdentityError::UnknownProvider(raw_provider.trim().to_string()))?;

        match provider.auth_type() {
            AuthType::Oauth => Ok(ConnectionKind::OAuth(provider)),
            AuthType::Ics => {
                let raw_url = raw_url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or(IdentityError::MissingFeedUrl)?;
                Ok(ConnectionKind::Ics {
                    feed_url: normalize_feed_url(raw_url)?,
                })
            }
        }
    }
}

/// Map a raw provider label to the closed provider set, honouring common aliases.
pub fn normalize_provider(raw: &str) -> Option<Provider> {
    let label = raw.trim().to_lowercase();
    let canonical = match label.as_str() {
        "gmail" | "gcal" | "google-calendar" => "google",
        "outlook" | "office365" | "o365" | "hotmail" | "live" => "microsoft",
        "ews" => "exchange",
        "apple" | "ical" => "icloud",
        "webcal" | "ical-feed" => "ics",
        other => other,
    };
    Provider::from_str(canonical)
}

/// Normalize a feed URL: `webcal(s)://` becomes `https://`, and the result must be
/// a plain http(s) URL pointing at a public host.
pub fn normalize_feed_url(raw: &str) -> Result<Url, IdentityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdentityError::MissingFeedUrl);
    }
    if trimmed.len() > MAX_FEED_URL_LEN {
        return Err(IdentityError::InvalidFeedUrl("url is too long".to_string()));
    }

    let rewritten = match trimmed.split_once("://") {
        Some((scheme, rest))
            if scheme.eq_ignore_ascii_case("webcal") || scheme.eq_ignore_ascii_case("webcals") =>
        {
            format!("https://{}", rest)
        }
        _ => trimmed.to_string(),
    };

    let mut url =
        Url::parse(&rewritten).map_err(|e| IdentityError::InvalidFeedUrl(e.to_string()))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(IdentityError::InvalidFeedUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(IdentityError::InvalidFeedUrl(
            "credentials in url are not allowed".to_string(),
        ));
    }

    match url.host() {
        None => return Err(IdentityError::InvalidFeedUrl("missing host".to_string())),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.');
            if domain == "localhost" || domain.ends_with(".localhost") {
                return Err(IdentityError::InvalidFeedUrl(
                    "local hosts are not allowed".to_string(),
                ));
            }
        }
        Some(Host::Ipv4(ip)) if !is_public_v4(ip) => {
            return Err(IdentityError::InvalidFeedUrl(
                "non-public addresses are not allowed".to_string(),
            ));
        }
        Some(Host::Ipv6(ip)) if !is_public_v6(ip) => {
            return Err(IdentityError::InvalidFeedUrl(
                "non-public addresses are not allowed".to_string(),
            ));
        }
        Some(_) => {}
    }

    url.set_fragment(None);
    Ok(url)
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    // 0.0.0.0/8, 100.64.0.0/10, 198.18.0.0/15, 240.0.0.0/4
    let this_network = a == 0;
    let shared = a == 100 && (b & 0xc0) == 64;
    let benchmarking = a == 198 && (b & 0xfe) == 18;
    let reserved = a >= 240;
    !(ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || this_network
        || shared
        || benchmarking
        || reserved)
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_v4(v4);
    }
    !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local)
}

/// Stable external id for an ICS calendar: a SHA-256 hex prefix of the normalized URL.
pub fn derive_external_calendar_id(normalized_url: &str) -> String {
    let digest = Sha256::digest(normalized_url.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(ICS_EXTERNAL_ID_LEN);
    id
}

pub fn connection_identity_key(provider: Provider, feed_url: Option<&str>) -> String {
    match (provider.auth_type(), feed_url) {
        (AuthType::Ics, Some(url)) => format!("ics|{}", url),
        _ => provider.as_str().to_string(),
    }
}

pub fn calendar_identity_key(connection_id: &str, external_calendar_id: &str) -> String {
    format!("{}|{}", connection_id, external_calendar_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_aliases() {
        assert_eq!(normalize_provider("  Outlook "), Some(Provider::Microsoft));
        assert_eq!(normalize_provider("APPLE"), Some(Provider::Icloud));
        assert_eq!(normalize_provider("google"), Some(Provider::Google));
        assert_eq!(normalize_provider("webcal"), Some(Provider::Ics));
        assert_eq!(normalize_provider("gogle"), None);
        assert_eq!(normalize_provider(""), None);
    }

    #[test]
    fn webcal_is_rewritten_to_https() {
        let url = normalize_feed_url("webcal://example.com/a.ics").unwrap();
        assert_eq!(url.as_str(), "https://example.com/a.ics");

        let url = normalize_feed_url("WEBCALS://Example.COM/a.ics#top").unwrap();
        assert_eq!(url.as_str(), "https://example.com/a.ics");
    }

    #[test]
    fn unsafe_or_malformed_urls_are_rejected() {
        for raw in [
            "not a url",
            "ftp://example.com/a.ics",
            "file:///etc/passwd",
            "https://user:pw@example.com/a.ics",
            "http://localhost/a.ics",
            "http://127.0.0.1/a.ics",
            "http://10.1.2.3/a.ics",
            "http://192.168.0.10/a.ics",
            "http://[::1]/a.ics",
            "http://[fd00::1]/a.ics",
            "http://0.1.2.3/a.ics",
            "http://100.64.0.1/a.ics",
            "http://100.127.255.254/a.ics",
            "http://224.0.0.1/a.ics",
            "http://198.18.0.1/a.ics",
            "http://198.19.255.1/a.ics",
            "http://240.0.0.1/a.ics",
            "http://[::ffff:100.64.0.1]/a.ics",
            "   ",
        ] {
            assert!(normalize_feed_url(raw).is_err(), "accepted {}", raw);
        }
    }

    #[test]
    fn derived_id_is_deterministic_across_webcal_and_https() {
        let a = normalize_feed_url("webcal://example.com/a.ics").unwrap();
        let b = normalize_feed_url("https://example.com/a.ics").unwrap();
        let id_a = derive_external_calendar_id(a.as_str());
        let id_b = derive_external_calendar_id(b.as_str());

        assert_eq!(id_a, id_b);
        assert_eq!(id_a.len(), ICS_EXTERNAL_ID_LEN);
        assert!(id_a.chars().all(|c| c.is_ascii_hexdigit()));

        let other = derive_external_calendar_id("https://example.com/b.ics");
        assert_ne!(id_a, other);
    }

    #[test]
    fn identity_keys() {
        assert_eq!(connection_identity_key(Provider::Google, None), "google");
        assert_eq!(
            connection_identity_key(Provider::Ics, Some("https://example.com/a.ics")),
            "ics|https://example.com/a.ics"
        );
        assert_eq!(calendar_identity_key("conn-1", "cal-1"), "conn-1|cal-1");
    }

    #[test]
    fn resolve_connection_kinds() {
        let oauth = ConnectionKind::resolve("outlook", Some("https://ignored.example.com")).unwrap();
        assert_eq!(oauth, ConnectionKind::OAuth(Provider::Microsoft));
        assert_eq!(oauth.identity_key(), "microsoft");
        assert_eq!(
            oauth.external_calendar_id(None),
            Err(IdentityError::MissingExternalCalendarId("microsoft"))
        );
        assert_eq!(
            oauth.external_calendar_id(Some("  ")),
            Err(IdentityError::MissingExternalCalendarId("microsoft"))
        );
        assert_eq!(oauth.external_calendar_id(Some(" cal-1 ")).unwrap(), "cal-1");

        let ics = ConnectionKind::resolve("ics", Some("webcal://example.com/a.ics")).unwrap();
        assert_eq!(ics.identity_key(), "ics|https://example.com/a.ics");
        assert_eq!(ics.provider(), Provider::Ics);
        assert_eq!(
            ics.external_calendar_id(Some("caller-supplied")).unwrap(),
            derive_external_calendar_id("https://example.com/a.ics")
        );
        assert_eq!(ics.default_calendar_name("ignored"), "example.com");

        assert_eq!(
            ConnectionKind::resolve("ics", None),
            Err(IdentityError::MissingFeedUrl)
        );
        assert!(matches!(
            ConnectionKind::resolve("yahoo", None),
            Err(IdentityError::UnknownProvider(p)) if p == "yahoo"
        ));
    }
}

use serde::{Deserialize, Serialize};

/// External calendar source kind. Closed set; anything else is rejected at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Microsoft,
    Exchange,
    Icloud,
    Ics,
}

impl Provider {
    /// Exact, case-insensitive match against the canonical names (no aliases).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "google" => Some(Provider::Google),
            "microsoft" => Some(Provider::Microsoft),
            "exchange" => Some(Provider::Exchange),
            "icloud" => Some(Provider::Icloud),
            "ics" => Some(Provider::Ics),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Microsoft => "microsoft",
            Provider::Exchange => "exchange",
            Provider::Icloud => "icloud",
            Provider::Ics => "ics",
        }
    }

    /// The authentication mechanism is fully determined by the provider.
    pub fn auth_type(self) -> AuthType {
        match self {
            Provider::Ics => AuthType::Ics,
            _ => AuthType::Oauth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum AuthType {
    Oauth,
    Ics,
}

/// Read-only or read-write access, used both for connection scope and calendar access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Access {
    #[default]
    Ro,
    Rw,
}

impl Access {
    /// Accepts the short forms plus the spelled-out variants clients tend to send.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ro" | "read" | "readonly" | "read-only" => Some(Access::Ro),
            "rw" | "write" | "readwrite" | "read-write" => Some(Access::Rw),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_determines_auth_type() {
        assert_eq!(Provider::Google.auth_type(), AuthType::Oauth);
        assert_eq!(Provider::Exchange.auth_type(), AuthType::Oauth);
        assert_eq!(Provider::Ics.auth_type(), AuthType::Ics);
    }

    #[test]
    fn provider_from_str_is_exact() {
        assert_eq!(Provider::from_str("ICloud"), Some(Provider::Icloud));
        assert_eq!(Provider::from_str("outlook"), None);
        assert_eq!(Provider::from_str("yahoo"), None);
    }

    #[test]
    fn access_parsing() {
        assert_eq!(Access::from_str(" RW "), Some(Access::Rw));
        assert_eq!(Access::from_str("read-only"), Some(Access::Ro));
        assert_eq!(Access::from_str("admin"), None);
        assert_eq!(Access::default(), Access::Ro);
    }
}

//! User and signed-in identity models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Email/password sign-in credentials.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Emails are matched case-insensitively.
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// The signed-in identity for one session.
#[derive(Clone, PartialEq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub session_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("session_id", &self.session_id)
            .field("expires_at", &self.expires_at)
            .field("tokens", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials::new("field@example.com", "hunter22");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("field@example.com"));
        assert!(!debug.contains("hunter22"));
    }

    #[test]
    fn test_normalized_email() {
        let credentials = Credentials::new("  Field@Example.COM ", "x");
        assert_eq!(credentials.normalized_email(), "field@example.com");
    }

    #[test]
    fn test_identity_expiry() {
        let now = Utc::now();
        let identity = Identity {
            user_id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            display_name: "A".to_string(),
            session_id: Uuid::new_v4(),
            access_token: "secret-access".to_string(),
            refresh_token: "secret-refresh".to_string(),
            expires_at: now + Duration::minutes(5),
        };
        assert!(!identity.is_expired(now));
        assert!(identity.is_expired(now + Duration::minutes(5)));
        assert!(!format!("{:?}", identity).contains("secret-access"));
    }
}

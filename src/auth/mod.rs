pub mod gate;
pub mod refresh;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Deserializer, Serialize};

pub use gate::{AuthError, TokenGate};
pub use refresh::{HttpRefreshClient, RefreshClient, RefreshError};

/// Decoded fields of a platform bearer token.
///
/// `aud` is ordered as issued: the platform tag first, then the tenant
/// namespaces the token is bound to. Issuers may encode a single audience as
/// a plain string; both shapes decode into the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl Claims {
    pub fn new(subject: impl Into<String>, audience: Vec<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: subject.into(),
            exp: (now + ttl).timestamp(),
            aud: audience,
            iat: Some(now.timestamp()),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp < now.timestamp()
    }

    pub fn has_audience(&self, value: &str) -> bool {
        self.aud.iter().any(|a| a == value)
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Audience {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Audience::deserialize(deserializer)? {
        Audience::One(value) => vec![value],
        Audience::Many(values) => values,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),
    #[error("Invalid JWT secret")]
    InvalidSecret,
}

/// Sign claims with the shared HS256 secret. Used by the operator CLI and
/// tests; production tokens come from the external authentication service.
pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_accepts_string_or_list() {
        let single: Claims = serde_json::from_str(r#"{"sub":"u","exp":1,"aud":"postit-audience"}"#).unwrap();
        assert_eq!(single.aud, vec!["postit-audience"]);

        let many: Claims = serde_json::from_str(r#"{"sub":"u","exp":1,"aud":["postit-audience","acme"]}"#).unwrap();
        assert_eq!(many.aud, vec!["postit-audience", "acme"]);

        let none: Claims = serde_json::from_str(r#"{"sub":"u","exp":1}"#).unwrap();
        assert!(none.aud.is_empty());
    }

    #[test]
    fn expiry_compares_against_given_clock() {
        let claims = Claims::new("u", vec![], Duration::seconds(60));
        assert!(!claims.is_expired_at(Utc::now()));
        assert!(claims.is_expired_at(Utc::now() + Duration::seconds(120)));
        assert!(claims.expires_at().is_some());
    }

    #[test]
    fn refuses_empty_secret() {
        let claims = Claims::new("u", vec![], Duration::seconds(60));
        assert!(matches!(generate_jwt(&claims, ""), Err(JwtError::InvalidSecret)));
        assert!(generate_jwt(&claims, "s3cret").is_ok());
    }
}

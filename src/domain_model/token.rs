use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Safety margin applied before an access token's `exp` claim.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(pub String);

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshToken(pub String);

// bearer credentials stay out of logs
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(..{})", tail(&self.0))
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefreshToken(..{})", tail(&self.0))
    }
}

fn tail(s: &str) -> &str {
    let start = s.len().saturating_sub(6);
    s.get(start..).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: AccessToken(access_token.into()),
            refresh_token: RefreshToken(refresh_token.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("token decode failure: {0}")]
pub struct TokenDecodeError(String);

/// Claims read from an access token without checking its signature.
#[derive(Debug, Clone, Deserialize)]
pub struct DecodedClaims {
    pub exp: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DecodedClaims {
    pub fn decode(token: &str) -> Result<Self, TokenDecodeError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<DecodedClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| TokenDecodeError(e.to_string()))?;
        Ok(data.claims)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// A token counts as expired when it is missing, undecodable, or its expiry
/// falls within `buffer` of `now` (inclusive).
pub fn is_expired_at(token: Option<&str>, buffer: Duration, now: DateTime<Utc>) -> bool {
    let Some(token) = token else {
        return true;
    };
    match DecodedClaims::decode(token) {
        Ok(claims) => claims.exp - now.timestamp() <= buffer.as_secs() as i64,
        Err(e) => {
            tracing::debug!(error = %e, "treating undecodable token as expired");
            true
        }
    }
}

pub fn is_expired(token: Option<&str>, buffer: Duration) -> bool {
    is_expired_at(token, buffer, Utc::now())
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    /// Signs a throwaway HS256 token expiring at `exp`.
    pub fn token_expiring_at(exp: i64) -> String {
        let claims = json!({ "sub": "user-1", "exp": exp, "role": "CANDIDATE" });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-signing-key"),
        )
        .unwrap()
    }

    pub fn token_expiring_in(secs: i64) -> String {
        token_expiring_at(chrono::Utc::now().timestamp() + secs)
    }
}

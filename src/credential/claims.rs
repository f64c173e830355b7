//! Token claims the gateway is willing to trust.
//!
//! Claims are only ever taken from a token whose HS256 signature verifies
//! against the backend's signing key, or from the body of a login exchange
//! the gateway performed itself. Nothing is read out of an unverified token.

use std::collections::HashSet;

use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Backend user id.
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Claims {
    /// True once `exp` has passed. Claims without `exp` never expire locally;
    /// upstream answers 401 when it disagrees.
    pub fn is_expired(&self) -> bool {
        self.exp.is_some_and(|exp| exp <= Utc::now().timestamp())
    }

    fn normalized(mut self) -> Self {
        self.role = self.role.map(|r| r.trim().to_lowercase()).filter(|r| !r.is_empty());
        self
    }
}

/// Verify the signature of `token` and return its claims.
///
/// Expiry is not enforced here; callers check [`Claims::is_expired`].
pub fn verify(token: &str, secret: &[u8]) -> Option<Claims> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims = HashSet::from(["sub".to_string()]);

    match decode::<Claims>(token, &key, &validation) {
        Ok(data) => Some(data.claims.normalized()),
        Err(e) => {
            tracing::debug!(error = %e, "session token failed verification");
            None
        }
    }
}

/// Claims reported by the backend in a login response.
pub fn from_login(
    user_id: Option<String>,
    role: Option<String>,
    username: Option<String>,
    email: Option<String>,
    exp: Option<i64>,
) -> Option<Claims> {
    Some(
        Claims {
            sub: user_id?,
            role,
            exp,
            username,
            email,
        }
        .normalized(),
    )
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    pub fn sign(sub: &str, role: &str, exp: i64, secret: &[u8]) -> String {
        encode(
            &Header::default(),
            &json!({"sub": sub, "role": role, "exp": exp}),
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_tokens::sign;
    use super::*;

    const SECRET: &[u8] = b"backend-signing-key";

    #[test]
    fn test_verified_claims() {
        let exp = Utc::now().timestamp() + 600;
        let claims = verify(&sign("42", "ADMIN", exp, SECRET), SECRET).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.role.as_deref(), Some("admin"));
        assert!(!claims.is_expired());
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let token = sign("42", "admin", Utc::now().timestamp() + 600, b"someone-else");
        assert!(verify(&token, SECRET).is_none());
        assert!(verify("not-a-jwt", SECRET).is_none());
    }

    #[test]
    fn test_expired_token_still_verifies_but_reports_expiry() {
        let claims = verify(&sign("7", "client", 1_000_000_000, SECRET), SECRET).unwrap();
        assert!(claims.is_expired());
    }

    #[test]
    fn test_login_claims_need_a_subject() {
        assert!(from_login(None, Some("admin".into()), None, None, None).is_none());
        let claims = from_login(Some("5".into()), Some("Pentester".into()), None, None, None).unwrap();
        assert_eq!(claims.role.as_deref(), Some("pentester"));
        assert!(!claims.is_expired());
    }
}

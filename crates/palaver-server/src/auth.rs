//! JWT authentication at the upgrade edge.
//!
//! Join tokens are HS256 JWTs minted by whatever issues room invitations.
//! The claims bind a user id and display name, and optionally pin the token
//! to one room. Origin checking lives here too so the core stays free of
//! HTTP concerns.

use futures_util::future::BoxFuture;
use jsonwebtoken::{decode, DecodingKey, Validation};
use palaver_core::{AuthClaims, AuthError, Authenticator};
use serde::{Deserialize, Serialize};

/// JWT claims embedded in join tokens.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject: stable user id.
    pub sub: String,
    /// Display name shown to other participants.
    pub name: String,
    /// Room the token is valid for; `None` means any room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    allowed_origins: Vec<String>,
}

impl JwtAuthenticator {
    pub fn new(secret: &str, allowed_origins: Vec<String>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            allowed_origins,
        }
    }

    fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin.is_some_and(|origin| self.allowed_origins.iter().any(|allowed| allowed == origin))
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate<'a>(
        &'a self,
        token: &'a str,
        room_id: &'a str,
        origin: Option<&'a str>,
    ) -> BoxFuture<'a, Result<AuthClaims, AuthError>> {
        Box::pin(async move {
            if !self.origin_allowed(origin) {
                return Err(AuthError::OriginDenied);
            }

            let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
                .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
            let claims = data.claims;

            if let Some(room) = &claims.room {
                if room != room_id {
                    return Err(AuthError::WrongRoom(room_id.to_owned()));
                }
            }

            let display_name = if claims.name.is_empty() {
                claims.sub.clone()
            } else {
                claims.name
            };
            Ok(AuthClaims {
                user_id: claims.sub,
                display_name,
                rate_limited: true,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(sub: &str, room: Option<&str>) -> String {
        let claims = Claims {
            sub: sub.into(),
            name: format!("{sub} name"),
            room: room.map(str::to_owned),
            exp: unix_now() + 600,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn unix_now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[tokio::test]
    async fn valid_token_yields_claims() {
        let auth = JwtAuthenticator::new(SECRET, vec![]);
        let claims = auth
            .authenticate(&token("alice", None), "R1", None)
            .await
            .expect("authenticate");
        assert_eq!(claims.user_id, "alice");
        assert_eq!(claims.display_name, "alice name");
    }

    #[tokio::test]
    async fn room_scoped_token_is_pinned() {
        let auth = JwtAuthenticator::new(SECRET, vec![]);
        assert!(auth
            .authenticate(&token("alice", Some("R1")), "R1", None)
            .await
            .is_ok());
        let err = auth
            .authenticate(&token("alice", Some("R1")), "R2", None)
            .await;
        assert!(matches!(err, Err(AuthError::WrongRoom(_))));
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let auth = JwtAuthenticator::new("other-secret", vec![]);
        let err = auth.authenticate(&token("alice", None), "R1", None).await;
        assert!(matches!(err, Err(AuthError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn origin_allow_list_is_enforced() {
        let auth = JwtAuthenticator::new(SECRET, vec!["https://app.example".into()]);
        assert!(auth
            .authenticate(&token("alice", None), "R1", Some("https://app.example"))
            .await
            .is_ok());
        let err = auth
            .authenticate(&token("alice", None), "R1", Some("https://evil.example"))
            .await;
        assert!(matches!(err, Err(AuthError::OriginDenied)));
        let err = auth.authenticate(&token("alice", None), "R1", None).await;
        assert!(matches!(err, Err(AuthError::OriginDenied)));
    }
}

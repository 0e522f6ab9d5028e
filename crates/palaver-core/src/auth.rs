//! Authentication seam for the WebSocket upgrade edge.
//!
//! The engine never validates tokens itself; the server supplies an
//! [`Authenticator`] (JWT in production, a stub in tests) and the edge
//! rejects the upgrade before any room state is touched.

use futures_util::future::BoxFuture;

/// Identity established at the upgrade edge. The engine trusts these values
/// for the lifetime of the connection; there is no re-authentication after
/// admission.
#[derive(Debug, Clone)]
pub struct AuthClaims {
    /// Stable, opaque user id. Reconnects with the same id replace the old
    /// connection.
    pub user_id: String,
    /// Display name shown to other participants.
    pub display_name: String,
    /// Whether edge rate limiting applies to this client.
    pub rate_limited: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token not valid for room {0}")]
    WrongRoom(String),
    #[error("origin not allowed")]
    OriginDenied,
}

/// Validates a join token and the request origin for a room.
pub trait Authenticator: Send + Sync {
    fn authenticate<'a>(
        &'a self,
        token: &'a str,
        room_id: &'a str,
        origin: Option<&'a str>,
    ) -> BoxFuture<'a, Result<AuthClaims, AuthError>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Accepts any non-empty token and uses it as the user id.
    pub(crate) struct StaticAuthenticator;

    impl Authenticator for StaticAuthenticator {
        fn authenticate<'a>(
            &'a self,
            token: &'a str,
            _room_id: &'a str,
            _origin: Option<&'a str>,
        ) -> BoxFuture<'a, Result<AuthClaims, AuthError>> {
            Box::pin(async move {
                if token.is_empty() {
                    return Err(AuthError::InvalidToken("empty token".into()));
                }
                Ok(AuthClaims {
                    user_id: token.to_owned(),
                    display_name: format!("user-{token}"),
                    rate_limited: true,
                })
            })
        }
    }
}

use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::Utc;
use futures::future::BoxFuture;
use mongodb::{
    Collection, Database,
    bson::{DateTime, doc},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{error::ChatError, state::AppState, store::docs::UserSummaryDoc};

/// Identity resolved from a bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
}

/// Credential verification seam, used identically by the HTTP extractor and
/// the gateway handshake. Swappable so token issuance stays an external
/// collaborator.
pub trait Authenticator: Send + Sync {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<AuthUser, ChatError>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    #[serde(rename = "_id")]
    _token: String,
    user_id: String,
    expires_at: DateTime,
}

/// Looks tokens up in the `sessions` collection and checks the resolved
/// user's active flag.
pub struct SessionAuthenticator {
    sessions: Collection<Session>,
    users: Collection<UserSummaryDoc>,
}

impl SessionAuthenticator {
    pub fn new(db: &Database) -> Self {
        Self {
            sessions: db.collection("sessions"),
            users: db.collection("users"),
        }
    }
}

impl Authenticator for SessionAuthenticator {
    fn verify<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<AuthUser, ChatError>> {
        Box::pin(async move {
            let session = self
                .sessions
                .find_one(doc! { "_id": token })
                .await?
                .ok_or(ChatError::Unauthenticated)?;

            if session.expires_at.timestamp_millis() < Utc::now().timestamp_millis() {
                return Err(ChatError::Unauthenticated);
            }

            let user = self
                .users
                .find_one(doc! { "_id": &session.user_id })
                .await?
                .ok_or(ChatError::Unauthenticated)?;

            if !user.is_active {
                return Err(ChatError::Unauthenticated);
            }

            Ok(AuthUser {
                id: user.id,
                name: user.name,
                avatar: user.avatar,
            })
        })
    }
}

/// Pulls the token out of an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ChatError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ChatError::Unauthenticated)?;
        state.auth.verify(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    fn headers_with_auth(value: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(v) = value {
            headers.insert("Authorization", HeaderValue::from_str(v).unwrap());
        }
        headers
    }

    #[test]
    fn bearer_token_requires_the_scheme_prefix() {
        assert_eq!(
            bearer_token(&headers_with_auth(Some("Bearer abc123"))),
            Some("abc123")
        );
        assert_eq!(bearer_token(&headers_with_auth(Some("abc123"))), None);
        assert_eq!(bearer_token(&headers_with_auth(Some("Bearer "))), None);
        assert_eq!(bearer_token(&headers_with_auth(None)), None);
    }
}

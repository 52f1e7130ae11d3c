use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Error, Result},
    store::api_keys::{self, API_KEY_PREFIX},
    AppState,
};

/// The authenticated caller, inserted into request extensions by [`require_auth`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    /// Admin username, or `key:<id>` for API-key callers.
    pub subject: String,
    pub admin: bool,
}

impl Identity {
    /// Admins may manage every app; everyone else only their own.
    pub fn can_manage(&self, owner: &str) -> bool {
        self.admin || self.subject == owner
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.admin {
            Ok(())
        } else {
            Err(Error::Forbidden)
        }
    }

    /// `None` for admins (no filter), the subject otherwise.
    pub fn owner_filter(&self) -> Option<&str> {
        if self.admin {
            None
        } else {
            Some(&self.subject)
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    admin: bool,
    iat: i64,
    exp: i64,
}

/// HS256 signing material for admin session tokens.
#[derive(Clone)]
pub struct SessionKeys {
    secret: Arc<[u8]>,
    ttl: Duration,
}

impl SessionKeys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            secret: Arc::from(secret),
            ttl,
        }
    }

    /// Issue an admin token for `subject`. Returns the token and its expiry.
    pub fn issue(&self, subject: &str) -> Result<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(self.ttl)
                .map_err(|e| anyhow::anyhow!("session ttl out of range: {e}"))?;
        let claims = Claims {
            sub: subject.to_owned(),
            admin: true,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| anyhow::anyhow!("sign session token: {e}"))?;
        Ok((token, expires_at))
    }

    /// Verify signature, expiry and the admin claim.
    pub fn verify(&self, token: &str) -> Option<Identity> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map_err(|e| debug!(error = %e, "rejected session token"))
            .ok()?;
        if !data.claims.admin {
            return None;
        }
        Some(Identity {
            subject: data.claims.sub,
            admin: true,
        })
    }
}

/// Resolve a bearer token to an identity: API keys by hash lookup, anything
/// else as an admin session token.
pub fn resolve_identity(state: &AppState, token: &str) -> Result<Option<Identity>> {
    if token.starts_with(API_KEY_PREFIX) {
        let hash = api_keys::hash_key(token);
        return Ok(state
            .store
            .find_api_key_by_hash(&hash)?
            .map(|record| Identity {
                subject: record.subject(),
                admin: false,
            }));
    }
    Ok(state.sessions.verify(token))
}

/// Axum middleware that validates `Authorization: Bearer <token>`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let identity = match token {
        Some(t) if !t.is_empty() => resolve_identity(&state, t),
        _ => Ok(None),
    };

    match identity {
        Ok(Some(identity)) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Ok(None) => Error::Unauthorized.into_response(),
        Err(e) => e.into_response(),
    }
}

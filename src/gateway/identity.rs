//! Identity Context over HTTP
//!
//! A Bearer JWT (HS256) carries `{sub, name, role, exp}`. The middleware
//! verifies it and inserts the resulting [`Actor`] into request extensions;
//! handlers trust that actor as given.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::AppState;
use crate::custody::api::{ApiResponse, error_codes};
use crate::custody::{Actor, ActorRole};

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // Subject (actor id)
    pub name: String,
    /// manufacturer | supplier | retailer | admin
    pub role: String,
    pub exp: usize, // Expiration time (as UTC timestamp)
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("token has no subject")]
    MissingSubject,

    #[error(transparent)]
    Role(#[from] crate::custody::state::UnknownRole),
}

impl Claims {
    pub fn into_actor(self) -> Result<Actor, IdentityError> {
        if self.sub.trim().is_empty() {
            return Err(IdentityError::MissingSubject);
        }
        let role: ActorRole = self.role.parse()?;
        Ok(Actor::new(self.sub, self.name, role))
    }
}

pub fn verify_token(secret: &str, token: &str) -> Result<Actor, IdentityError> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<Claims>(token, &decoding_key, &validation)?;
    token_data.claims.into_actor()
}

/// Sign claims with the shared secret (used by tests and operator tooling)
pub fn issue_token(secret: &str, claims: &Claims) -> Result<String, IdentityError> {
    Ok(encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

fn unauthorized(msg: &str) -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(
            ApiResponse::<()>::error(error_codes::UNAUTHORIZED, msg).with_kind("UNAUTHENTICATED"),
        ),
    )
}

pub async fn identity_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    // 1. Extract Authorization header
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| unauthorized("Missing Authorization header"))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("Invalid token format"))?;

    // 2. Verify token and resolve the actor
    let actor = verify_token(state.jwt_secret(), token).map_err(|e| {
        debug!(error = %e, "Rejected bearer token");
        unauthorized("Invalid or expired token")
    })?;

    // 3. Inject actor
    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: &str) -> Claims {
        Claims {
            sub: "A".into(),
            name: "Acme".into(),
            role: role.into(),
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        }
    }

    #[test]
    fn test_token_round_trip_yields_actor() {
        let token = issue_token("secret", &claims("manufacturer")).unwrap();
        let actor = verify_token("secret", &token).unwrap();
        assert_eq!(actor, Actor::new("A", "Acme", ActorRole::Manufacturer));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_token("secret", &claims("supplier")).unwrap();
        assert!(matches!(
            verify_token("other", &token),
            Err(IdentityError::Token(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut c = claims("supplier");
        c.exp = (chrono::Utc::now().timestamp() - 3600) as usize;
        let token = issue_token("secret", &c).unwrap();
        assert!(verify_token("secret", &token).is_err());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let token = issue_token("secret", &claims("auditor")).unwrap();
        assert!(matches!(
            verify_token("secret", &token),
            Err(IdentityError::Role(_))
        ));
    }
}

//! JWT verification and the per-route authorization middleware.
//!
//! The middleware extracts the bearer token, runs the core AuthPipeline
//! with the route's `EndpointPolicy`, and stashes the resulting
//! `AuthContext` in request extensions. Rejected requests never reach a
//! handler, so no broker or persistence call happens for them.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use axum::Extension;
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use dx_core::auth::{AuthContext, AuthPipeline, EndpointPolicy, TokenClaims};
use dx_core::ports::TokenValidator;
use dx_core::{DxError, Result};

use crate::error::AppError;

/// Decoding configuration shared by every request.
#[derive(Clone)]
pub struct JwtConfig {
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtConfig {
    pub fn from_secret(secret: &[u8], audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        Self {
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

/// The introspection port: verifies signature, expiry, and audience, then
/// builds the request context from the claims.
pub struct JwtTokenValidator {
    config: JwtConfig,
}

impl JwtTokenValidator {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> Result<AuthContext> {
        let data = decode::<TokenClaims>(token, &self.config.decoding, &self.config.validation)
            .map_err(|e| {
                use jsonwebtoken::errors::ErrorKind;
                let detail = match e.kind() {
                    ErrorKind::ExpiredSignature => "token expired",
                    ErrorKind::InvalidAudience => "token audience mismatch",
                    _ => "token verification failed",
                };
                DxError::Unauthorized(detail.into())
            })?;
        AuthContext::from_claims(&data.claims)
    }
}

fn bearer_token(req: &Request) -> Result<&str> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| DxError::Unauthorized("missing authorization header".into()))?;
    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| DxError::Unauthorized("authorization header is not a bearer token".into()))
}

/// Route-level middleware: the chain runs here, before any handler.
pub async fn require_authorization(
    Extension(pipeline): Extension<Arc<AuthPipeline>>,
    Extension(policy): Extension<EndpointPolicy>,
    mut req: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let token = bearer_token(&req)?.to_string();
    let ctx = pipeline.authorize(&token, &policy).await?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

//! Request-scoped identity built from validated token claims.
//!
//! The server middleware verifies the token and calls
//! [`AuthContext::from_claims`]; core logic never reads raw tokens.

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::DxError;

/// Roles recognised by the resource server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DxRole {
    Delegate,
    Consumer,
    Provider,
    Admin,
}

impl DxRole {
    pub fn from_role(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "delegate" => Some(Self::Delegate),
            "consumer" => Some(Self::Consumer),
            "provider" => Some(Self::Provider),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delegate => "delegate",
            Self::Consumer => "consumer",
            Self::Provider => "provider",
            Self::Admin => "admin",
        }
    }
}

/// Named access capabilities carried in the token's constraint block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Api,
    Subscription,
    Ingest,
    Async,
}

impl Access {
    pub fn from_access(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "api" => Some(Self::Api),
            "sub" | "subscription" => Some(Self::Subscription),
            "ingest" => Some(Self::Ingest),
            "async" => Some(Self::Async),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Subscription => "subscription",
            Self::Ingest => "ingest",
            Self::Async => "async",
        }
    }
}

/// Claims shape expected from the identity provider.
/// Deserialised by the server JWT middleware.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    pub sub: Option<String>,
    pub aud: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    pub role: Option<String>,
    #[serde(default)]
    pub cons: ConstraintClaims,
}

/// The `cons` block: a list of granted access capability names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConstraintClaims {
    #[serde(default)]
    pub access: Vec<String>,
}

/// Ephemeral, request-scoped identity. Built once per request by token
/// introspection; never persisted.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject: String,
    pub role: DxRole,
    pub access: HashSet<Access>,
    pub audience: String,
    pub expiry: i64,
    pub issued_at: i64,
}

impl AuthContext {
    /// Construct from verified claims. Unknown access names are ignored;
    /// a missing subject or role is an authorization failure.
    pub fn from_claims(claims: &TokenClaims) -> Result<Self, DxError> {
        let subject = claims
            .sub
            .clone()
            .ok_or_else(|| DxError::Unauthorized("missing sub claim".into()))?;
        let role = claims
            .role
            .as_deref()
            .and_then(DxRole::from_role)
            .ok_or_else(|| DxError::Unauthorized("missing or unknown role claim".into()))?;
        let access = claims
            .cons
            .access
            .iter()
            .filter_map(|a| Access::from_access(a))
            .collect();
        Ok(Self {
            subject,
            role,
            access,
            audience: claims.aud.clone().unwrap_or_default(),
            expiry: claims.exp,
            issued_at: claims.iat,
        })
    }

    pub fn has_role(&self, role: DxRole) -> bool {
        self.role == role
    }

    pub fn is_consumer(&self) -> bool {
        self.role == DxRole::Consumer
    }
}

//! Error taxonomy for the resource server.
//!
//! Every failure that can reach a caller maps to an HTTP status plus a
//! stable `urn:dx:rs:*` reason code. Internal causes (connection resets,
//! timeouts) are classified here and never echoed verbatim to clients.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DxError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("partial provision: {0}")]
    PartialProvision(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DxError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Upstream(_) => 502,
            Self::PartialProvision(_) => 500,
            Self::Internal(_) => 500,
        }
    }

    pub fn reason(&self) -> Reason {
        match self {
            Self::BadRequest(_) => Reason::BadRequest,
            Self::Unauthorized(_) => Reason::InvalidToken,
            Self::Forbidden(_) => Reason::AccessDenied,
            Self::NotFound(_) => Reason::ResourceNotFound,
            Self::Conflict(_) => Reason::Conflict,
            Self::Upstream(_) => Reason::UpstreamFailure,
            Self::PartialProvision(_) => Reason::PartialProvision,
            Self::Internal(_) => Reason::InternalError,
        }
    }

    /// Client-facing detail. Internal causes are collapsed to a fixed
    /// phrase; the full error stays in the logs.
    pub fn detail(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            Self::Upstream(_) => "upstream service failure".to_string(),
            other => other.to_string(),
        }
    }

    /// The `{type, title, detail}` failure payload.
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            r#type: self.reason().urn(),
            title: self.reason().title(),
            detail: self.detail(),
        }
    }
}

/// Stable machine-readable reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Success,
    BadRequest,
    InvalidToken,
    AccessDenied,
    ResourceNotFound,
    Conflict,
    UpstreamFailure,
    PartialProvision,
    InternalError,
}

impl Reason {
    pub fn urn(&self) -> &'static str {
        match self {
            Reason::Success => "urn:dx:rs:success",
            Reason::BadRequest => "urn:dx:rs:badRequest",
            Reason::InvalidToken => "urn:dx:rs:invalidAuthorizationToken",
            Reason::AccessDenied => "urn:dx:rs:accessDenied",
            Reason::ResourceNotFound => "urn:dx:rs:resourceNotFound",
            Reason::Conflict => "urn:dx:rs:conflict",
            Reason::UpstreamFailure => "urn:dx:rs:upstreamFailure",
            Reason::PartialProvision => "urn:dx:rs:partialProvision",
            Reason::InternalError => "urn:dx:rs:internalError",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Reason::Success => "success",
            Reason::BadRequest => "bad request",
            Reason::InvalidToken => "invalid or expired token",
            Reason::AccessDenied => "access denied",
            Reason::ResourceNotFound => "resource not found",
            Reason::Conflict => "conflict",
            Reason::UpstreamFailure => "upstream failure",
            Reason::PartialProvision => "partially provisioned, reconciliation required",
            Reason::InternalError => "internal error",
        }
    }
}

/// Serialized failure body sent to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub r#type: &'static str,
    pub title: &'static str,
    pub detail: String,
}

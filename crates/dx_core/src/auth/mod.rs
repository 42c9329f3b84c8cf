//! Authorization: request identity, roles, access constraints, and the
//! ordered short-circuiting pipeline that gates every endpoint.

pub mod context;
pub mod pipeline;

pub use context::{Access, AuthContext, DxRole, TokenClaims};
pub use pipeline::{AuthPipeline, EndpointPolicy};

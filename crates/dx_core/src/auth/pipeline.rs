//! The ordered, short-circuiting authorization chain.
//!
//! Stage order is fixed at construction and enforced by a small driver
//! loop: token introspection builds the context, the revocation check needs
//! the subject it produced, role and constraint checks need both. The
//! revocation stage reads only the in-memory cache and never blocks on
//! network I/O. Failures stop the chain; nothing downstream runs.

use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::context::{Access, AuthContext, DxRole};
use crate::cache::RevocationCache;
use crate::catalogue::FilterResolver;
use crate::error::DxError;
use crate::ports::TokenValidator;
use crate::Result;

/// Per-endpoint authorization requirements, declared where routes are
/// built and carried to the pipeline by the middleware.
#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    pub allowed_roles: Vec<DxRole>,
    pub required_access: Vec<Access>,
}

impl EndpointPolicy {
    pub fn new(allowed_roles: Vec<DxRole>, required_access: Vec<Access>) -> Self {
        Self {
            allowed_roles,
            required_access,
        }
    }

    /// The subscription endpoints: every role may reach them, consumers
    /// additionally need the api and subscription capabilities.
    pub fn subscription() -> Self {
        Self::new(
            vec![DxRole::Delegate, DxRole::Consumer, DxRole::Provider, DxRole::Admin],
            vec![Access::Api, Access::Subscription],
        )
    }

    /// Credential reset: consumer-only, plain api capability.
    pub fn credential_reset() -> Self {
        Self::new(vec![DxRole::Consumer], vec![Access::Api])
    }
}

/// Mutable state threaded through the stages.
pub struct StageState<'a> {
    pub token: &'a str,
    pub policy: &'a EndpointPolicy,
    pub context: Option<AuthContext>,
}

impl StageState<'_> {
    fn context(&self) -> Result<&AuthContext> {
        self.context
            .as_ref()
            .ok_or_else(|| DxError::Internal(anyhow::anyhow!("stage ran before introspection")))
    }
}

/// One link in the chain. Each stage either augments the state or fails
/// the request.
#[async_trait]
pub trait AuthStage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn check(&self, state: &mut StageState<'_>) -> Result<()>;
}

// ── Stages ────────────────────────────────────────────────────

/// Signature, expiry, and audience verification via the validator port.
pub struct TokenIntrospection {
    validator: Arc<dyn TokenValidator>,
}

#[async_trait]
impl AuthStage for TokenIntrospection {
    fn name(&self) -> &'static str {
        "token-introspection"
    }

    async fn check(&self, state: &mut StageState<'_>) -> Result<()> {
        let context = self.validator.validate(state.token).await?;
        state.context = Some(context);
        Ok(())
    }
}

/// Cache-only check that the token wasn't invalidated after issuance.
pub struct RevocationCheck {
    cache: Arc<RevocationCache>,
}

#[async_trait]
impl AuthStage for RevocationCheck {
    fn name(&self) -> &'static str {
        "revocation-check"
    }

    async fn check(&self, state: &mut StageState<'_>) -> Result<()> {
        let ctx = state.context()?;
        if self.cache.is_revoked(&ctx.subject, ctx.issued_at) {
            return Err(DxError::Unauthorized("token has been revoked".into()));
        }
        Ok(())
    }
}

/// Endpoint role allow-set membership.
pub struct RoleAuthorization;

#[async_trait]
impl AuthStage for RoleAuthorization {
    fn name(&self) -> &'static str {
        "role-authorization"
    }

    async fn check(&self, state: &mut StageState<'_>) -> Result<()> {
        let ctx = state.context()?;
        if !state.policy.allowed_roles.contains(&ctx.role) {
            return Err(DxError::Forbidden(format!(
                "role {} not permitted for this endpoint",
                ctx.role.as_str()
            )));
        }
        Ok(())
    }
}

/// Consumer-only capability check: required minus granted must be empty.
/// Providers and admins are granted implicitly and bypass this stage.
pub struct ConsumerConstraints;

#[async_trait]
impl AuthStage for ConsumerConstraints {
    fn name(&self) -> &'static str {
        "consumer-constraints"
    }

    async fn check(&self, state: &mut StageState<'_>) -> Result<()> {
        let ctx = state.context()?;
        if !ctx.is_consumer() {
            return Ok(());
        }
        let missing: Vec<&'static str> = state
            .policy
            .required_access
            .iter()
            .filter(|required| !ctx.access.contains(required))
            .map(|a| a.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(DxError::Forbidden(format!(
                "missing_constraint: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

// ── Pipeline driver ───────────────────────────────────────────

/// The canonical chain plus the provider-ownership check used by
/// subscription mutations once the referenced entity is known.
pub struct AuthPipeline {
    stages: Vec<Box<dyn AuthStage>>,
    resolver: Arc<FilterResolver>,
}

impl AuthPipeline {
    pub fn new(
        validator: Arc<dyn TokenValidator>,
        revocations: Arc<RevocationCache>,
        resolver: Arc<FilterResolver>,
    ) -> Self {
        let stages: Vec<Box<dyn AuthStage>> = vec![
            Box::new(TokenIntrospection { validator }),
            Box::new(RevocationCheck { cache: revocations }),
            Box::new(RoleAuthorization),
            Box::new(ConsumerConstraints),
        ];
        Self { stages, resolver }
    }

    /// Run the chain for one request. Returns the validated context; any
    /// stage failure short-circuits.
    pub async fn authorize(&self, token: &str, policy: &EndpointPolicy) -> Result<AuthContext> {
        let mut state = StageState {
            token,
            policy,
            context: None,
        };
        for stage in &self.stages {
            if let Err(e) = stage.check(&mut state).await {
                tracing::debug!(stage = stage.name(), error = %e, "authorization rejected");
                return Err(e);
            }
        }
        state
            .context
            .ok_or_else(|| DxError::Internal(anyhow::anyhow!("pipeline produced no context")))
    }

    /// Providers and delegates may only mutate subscriptions on entities
    /// they are registered for; consult the catalogue before any broker or
    /// persistence side effect.
    pub async fn authorize_entity_mutation(
        &self,
        ctx: &AuthContext,
        entity: &str,
    ) -> Result<()> {
        if !matches!(ctx.role, DxRole::Provider | DxRole::Delegate) {
            return Ok(());
        }
        let provider = self.resolver.provider_user_id(entity).await?;
        if provider != ctx.subject {
            return Err(DxError::Forbidden(format!(
                "{} is not the registered provider for {entity}",
                ctx.subject
            )));
        }
        Ok(())
    }
}

//! Port traits for the external systems the core orchestrates.
//!
//! Consumed as `Arc<dyn Trait>` so the same logic runs against the real
//! adapters (dx_postgres, dx_broker, the server's HTTP clients) or test
//! doubles.

use async_trait::async_trait;

use crate::auth::AuthContext;
use crate::catalogue::CatalogueRecord;
use crate::subscription::{CredentialReset, Subscription, SubscriptionResources, Vhost};
use crate::Result;

/// Persistence over subscription metadata rows keyed by `(owner_id, alias)`.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert if absent. Returns `false` when the key already exists;
    /// other failures are errors.
    async fn insert_if_absent(&self, sub: &Subscription) -> Result<bool>;

    async fn fetch(&self, owner_id: &str, alias: &str) -> Result<Option<Subscription>>;

    async fn list_for_user(&self, owner_id: &str) -> Result<Vec<Subscription>>;

    /// Replace the stored entity list. Not-found is an error here: callers
    /// check existence first under the per-key lock.
    async fn replace_entities(&self, owner_id: &str, alias: &str, entities: &[String])
        -> Result<()>;

    /// Returns `false` when the row was already absent.
    async fn delete(&self, owner_id: &str, alias: &str) -> Result<bool>;

    /// Flag the row for out-of-band reconciliation.
    async fn mark_orphaned(&self, owner_id: &str, alias: &str) -> Result<()>;
}

/// Administrative control over the message broker. The provisioner owns
/// broker-side resource naming; callers pass the subscription identity and
/// never construct queue/exchange names themselves.
#[async_trait]
pub trait BrokerControl: Send + Sync {
    /// Declare exchange + queue, bind, and ensure a scoped credential.
    /// Rolls back everything created in this call on partial failure.
    async fn create_subscription_resources(
        &self,
        owner_id: &str,
        alias: &str,
        entity: &str,
        vhost: Vhost,
    ) -> Result<SubscriptionResources>;

    /// Add a binding for one more entity; queue and credential untouched.
    /// Returns the routing keys now bound.
    async fn append_binding(
        &self,
        owner_id: &str,
        alias: &str,
        entity: &str,
        vhost: Vhost,
    ) -> Result<Vec<String>>;

    /// Drop all current bindings and bind the new entity.
    /// Returns the routing keys now bound.
    async fn replace_bindings(
        &self,
        owner_id: &str,
        alias: &str,
        entity: &str,
        vhost: Vhost,
    ) -> Result<Vec<String>>;

    /// Unbind, delete the queue, and revoke the scoped credential.
    /// Deleting an already-absent resource is success.
    async fn delete_subscription_resources(
        &self,
        owner_id: &str,
        alias: &str,
        vhost: Vhost,
    ) -> Result<()>;

    /// Routing keys currently bound to the subscription's queue.
    async fn list_bindings(&self, owner_id: &str, alias: &str, vhost: Vhost)
        -> Result<Vec<String>>;

    /// Regenerate the password for an existing identity without altering
    /// its permissions.
    async fn reset_credential(&self, owner_id: &str) -> Result<CredentialReset>;
}

/// Remote catalogue lookups. Rate-sensitive: always reached through the
/// cache-shielded [`crate::catalogue::FilterResolver`].
#[async_trait]
pub trait CatalogueClient: Send + Sync {
    async fn lookup(&self, id: &str) -> Result<CatalogueRecord>;

    /// Resolve the registered provider's user id for a resource.
    async fn provider_of(&self, id: &str) -> Result<String>;
}

/// Token introspection: signature, expiry, and audience verification.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<AuthContext>;
}

/// Downstream consumer of async-query progress events arriving on the
/// broker's async-query queue.
#[async_trait]
pub trait AsyncQuerySink: Send + Sync {
    async fn handle(&self, payload: serde_json::Value) -> Result<()>;
}

//! BrokerProvisioner: the single choke point for broker topology changes.
//!
//! Owns the translation from subscription identity to broker resource
//! names: the queue is `owner/alias`, each entity gets a topic exchange of
//! its own id, and the routing key is the entity id followed by the data
//! wildcard. Credentials are per-owner users holding least-privilege
//! permissions: no configure rights, write limited to the exchange, read
//! limited to the queue.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use dx_core::ports::BrokerControl;
use dx_core::subscription::{CredentialReset, SubscriptionResources, Vhost};
use dx_core::{DxError, Result};

use crate::mgmt::MgmtApi;

/// Suffix appended to an entity id to match all of its data topics.
pub const DATA_WILDCARD_ROUTING_KEY: &str = "/.*";

/// Actual vhost names behind the [`Vhost`] selector.
#[derive(Debug, Clone)]
pub struct VhostNames {
    pub internal: String,
    pub prod: String,
    pub external: String,
}

impl VhostNames {
    pub fn resolve(&self, vhost: Vhost) -> &str {
        match vhost {
            Vhost::Internal => &self.internal,
            Vhost::Prod => &self.prod,
            Vhost::External => &self.external,
        }
    }
}

pub struct BrokerProvisioner {
    mgmt: Arc<dyn MgmtApi>,
    vhosts: VhostNames,
    amqp_url: String,
    amqp_port: u16,
}

impl BrokerProvisioner {
    pub fn new(
        mgmt: Arc<dyn MgmtApi>,
        vhosts: VhostNames,
        amqp_url: impl Into<String>,
        amqp_port: u16,
    ) -> Self {
        Self {
            mgmt,
            vhosts,
            amqp_url: amqp_url.into(),
            amqp_port,
        }
    }

    fn queue_name(owner_id: &str, alias: &str) -> String {
        format!("{owner_id}/{alias}")
    }

    fn exchange_name(entity: &str) -> &str {
        entity
    }

    fn routing_key(entity: &str) -> String {
        format!("{entity}{DATA_WILDCARD_ROUTING_KEY}")
    }

    fn random_password() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Absent-tolerant delete: reaching the desired end state counts.
    async fn tolerate_absent(result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(DxError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl BrokerControl for BrokerProvisioner {
    async fn create_subscription_resources(
        &self,
        owner_id: &str,
        alias: &str,
        entity: &str,
        vhost: Vhost,
    ) -> Result<SubscriptionResources> {
        let vh = self.vhosts.resolve(vhost);
        let queue = Self::queue_name(owner_id, alias);
        let exchange = Self::exchange_name(entity);

        // Track what this call created so a failure mid-sequence can undo
        // exactly that, concurrently, before propagating.
        self.mgmt.declare_exchange(vh, exchange).await?;
        self.mgmt.declare_queue(vh, &queue).await?;

        let rollback = |queue_created: bool, user_created: bool| {
            let mgmt = Arc::clone(&self.mgmt);
            let vh = vh.to_string();
            let queue = queue.clone();
            let owner = owner_id.to_string();
            async move {
                let queue_del = async {
                    if queue_created {
                        Self::tolerate_absent(mgmt.delete_queue(&vh, &queue).await).await
                    } else {
                        Ok(())
                    }
                };
                let user_del = async {
                    if user_created {
                        Self::tolerate_absent(mgmt.delete_user(&owner).await).await
                    } else {
                        Ok(())
                    }
                };
                let (q, u) = tokio::join!(queue_del, user_del);
                for err in [q, u].into_iter().filter_map(|r| r.err()) {
                    tracing::error!(error = %err, "rollback cleanup failed");
                }
            }
        };

        if let Err(e) = self
            .mgmt
            .bind(vh, exchange, &queue, &Self::routing_key(entity))
            .await
        {
            tracing::warn!(%queue, exchange, error = %e, "bind failed, rolling back queue");
            rollback(true, false).await;
            return Err(e);
        }

        // Per-owner credential: created on first registration, never reset
        // here. An existing owner keeps the key issued at registration.
        let mut api_key = None;
        let mut user_created = false;
        match self.mgmt.user_exists(owner_id).await {
            Ok(true) => {}
            Ok(false) => {
                let password = Self::random_password();
                if let Err(e) = self.mgmt.put_user(owner_id, &password).await {
                    rollback(true, false).await;
                    return Err(e);
                }
                user_created = true;
                api_key = Some(password);
            }
            Err(e) => {
                rollback(true, false).await;
                return Err(e);
            }
        }

        if let Err(e) = self
            .mgmt
            .set_permissions(vh, owner_id, "", exchange, &queue)
            .await
        {
            rollback(true, user_created).await;
            return Err(e);
        }

        tracing::info!(%queue, exchange, vhost = vh, "subscription resources provisioned");
        Ok(SubscriptionResources {
            queue,
            username: owner_id.to_string(),
            api_key,
            url: self.amqp_url.clone(),
            port: self.amqp_port,
            vhost: vh.to_string(),
        })
    }

    async fn append_binding(
        &self,
        owner_id: &str,
        alias: &str,
        entity: &str,
        vhost: Vhost,
    ) -> Result<Vec<String>> {
        let vh = self.vhosts.resolve(vhost);
        let queue = Self::queue_name(owner_id, alias);
        let exchange = Self::exchange_name(entity);

        self.mgmt.declare_exchange(vh, exchange).await?;
        self.mgmt
            .bind(vh, exchange, &queue, &Self::routing_key(entity))
            .await?;
        self.list_bindings(owner_id, alias, vhost).await
    }

    async fn replace_bindings(
        &self,
        owner_id: &str,
        alias: &str,
        entity: &str,
        vhost: Vhost,
    ) -> Result<Vec<String>> {
        let vh = self.vhosts.resolve(vhost);
        let queue = Self::queue_name(owner_id, alias);

        // Drop every current binding, then bind the new entity. The
        // default-exchange binding (empty source) is the broker's own and
        // stays.
        let current = self.mgmt.queue_bindings(vh, &queue).await?;
        for row in current.iter().filter(|b| !b.source.is_empty()) {
            Self::tolerate_absent(
                self.mgmt
                    .unbind(vh, &row.source, &queue, &row.routing_key)
                    .await,
            )
            .await?;
        }

        let exchange = Self::exchange_name(entity);
        self.mgmt.declare_exchange(vh, exchange).await?;
        self.mgmt
            .bind(vh, exchange, &queue, &Self::routing_key(entity))
            .await?;
        self.list_bindings(owner_id, alias, vhost).await
    }

    async fn delete_subscription_resources(
        &self,
        owner_id: &str,
        alias: &str,
        vhost: Vhost,
    ) -> Result<()> {
        let vh = self.vhosts.resolve(vhost);
        let queue = Self::queue_name(owner_id, alias);

        // Queue deletion drops its bindings with it; both deletes tolerate
        // an already-absent target.
        Self::tolerate_absent(self.mgmt.delete_queue(vh, &queue).await).await?;
        Self::tolerate_absent(self.mgmt.delete_user(owner_id).await).await?;
        tracing::info!(%queue, vhost = vh, "subscription resources deleted");
        Ok(())
    }

    async fn list_bindings(
        &self,
        owner_id: &str,
        alias: &str,
        vhost: Vhost,
    ) -> Result<Vec<String>> {
        let vh = self.vhosts.resolve(vhost);
        let queue = Self::queue_name(owner_id, alias);
        let mut keys: Vec<String> = self
            .mgmt
            .queue_bindings(vh, &queue)
            .await?
            .into_iter()
            .filter(|b| !b.source.is_empty())
            .map(|b| b.routing_key)
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn reset_credential(&self, owner_id: &str) -> Result<CredentialReset> {
        if !self.mgmt.user_exists(owner_id).await? {
            return Err(DxError::NotFound(format!("no credential for {owner_id}")));
        }
        let password = Self::random_password();
        self.mgmt.put_user(owner_id, &password).await?;
        tracing::info!(owner_id, "credential reset");
        Ok(CredentialReset {
            username: owner_id.to_string(),
            api_key: password,
        })
    }
}

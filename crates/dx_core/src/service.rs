//! SubscriptionService: the subscription lifecycle manager.
//!
//! Orchestrates the persistence store and the broker provisioner under the
//! ordering rules that keep the two systems consistent through partial
//! failure. For create/append/update the broker side effect lands before
//! the persistence write, so a crash leaves at worst an unreferenced broker
//! resource. For delete the broker teardown runs first, so a crash leaves
//! at worst a dangling metadata row. Operations on the same
//! `(owner_id, alias)` are serialized through a keyed async mutex; distinct
//! subscriptions proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::auth::{AuthContext, DxRole};
use crate::catalogue::FilterResolver;
use crate::error::DxError;
use crate::ports::{BrokerControl, SubscriptionStore};
use crate::subscription::{
    AppendSubscription, CreateSubscription, CredentialReset, DeliveryKind, Subscription,
    SubscriptionCreated, SubscriptionDetail, SubscriptionStatus, UpdateSubscription, Vhost,
};
use crate::Result;

/// The API surface handlers delegate to. All methods take the validated
/// `AuthContext`; the acting subject always comes from the token, never
/// from request parameters.
#[async_trait]
pub trait SubscriptionService: Send + Sync {
    async fn create_subscription(
        &self,
        ctx: &AuthContext,
        intent: CreateSubscription,
    ) -> Result<SubscriptionCreated>;

    async fn append_subscription(
        &self,
        ctx: &AuthContext,
        owner_id: &str,
        alias: &str,
        intent: AppendSubscription,
    ) -> Result<SubscriptionDetail>;

    async fn update_subscription(
        &self,
        ctx: &AuthContext,
        owner_id: &str,
        alias: &str,
        intent: UpdateSubscription,
    ) -> Result<SubscriptionDetail>;

    async fn get_subscription(
        &self,
        ctx: &AuthContext,
        owner_id: &str,
        alias: &str,
    ) -> Result<SubscriptionDetail>;

    async fn list_subscriptions_for_user(&self, ctx: &AuthContext) -> Result<Vec<Subscription>>;

    /// Idempotent: deleting an absent subscription succeeds.
    async fn delete_subscription(
        &self,
        ctx: &AuthContext,
        owner_id: &str,
        alias: &str,
    ) -> Result<()>;

    async fn reset_credential(&self, ctx: &AuthContext) -> Result<CredentialReset>;
}

/// Per-key serialization. Guards are handed out as owned mutex guards so
/// they can live across awaits inside one lifecycle transition.
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().await;
            Arc::clone(map.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

pub struct SubscriptionServiceImpl {
    store: Arc<dyn SubscriptionStore>,
    broker: Arc<dyn BrokerControl>,
    resolver: Arc<FilterResolver>,
    vhost: Vhost,
    locks: KeyedLocks,
}

impl SubscriptionServiceImpl {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        broker: Arc<dyn BrokerControl>,
        resolver: Arc<FilterResolver>,
        vhost: Vhost,
    ) -> Self {
        Self {
            store,
            broker,
            resolver,
            vhost,
            locks: KeyedLocks::new(),
        }
    }

    fn key(owner_id: &str, alias: &str) -> String {
        format!("{owner_id}/{alias}")
    }

    /// Non-admins may only act on their own subscriptions.
    fn require_owner(ctx: &AuthContext, owner_id: &str) -> Result<()> {
        if ctx.role != DxRole::Admin && ctx.subject != owner_id {
            return Err(DxError::Forbidden(format!(
                "{} may not act on subscriptions owned by {owner_id}",
                ctx.subject
            )));
        }
        Ok(())
    }

    async fn require_entities_exist(&self, entities: &[String]) -> Result<()> {
        if entities.is_empty() {
            return Err(DxError::BadRequest("entities must not be empty".into()));
        }
        if !self.resolver.all_exist(entities).await? {
            return Err(DxError::NotFound(
                "one or more referenced entities are not registered".into(),
            ));
        }
        Ok(())
    }

    /// Broker succeeded but the persistence write did not. The broker
    /// resource is live, so flag the row (where one exists) and surface
    /// the degraded condition instead of retrying in-request.
    async fn degraded(&self, owner_id: &str, alias: &str, cause: DxError) -> DxError {
        tracing::error!(
            owner_id,
            alias,
            error = %cause,
            "persistence failed after broker provisioning, flagging for reconciliation"
        );
        if let Err(mark) = self.store.mark_orphaned(owner_id, alias).await {
            tracing::error!(owner_id, alias, error = %mark, "orphan flagging also failed");
        }
        DxError::PartialProvision(format!(
            "broker resources exist for {owner_id}/{alias} but metadata was not saved"
        ))
    }
}

#[async_trait]
impl SubscriptionService for SubscriptionServiceImpl {
    async fn create_subscription(
        &self,
        ctx: &AuthContext,
        intent: CreateSubscription,
    ) -> Result<SubscriptionCreated> {
        let owner_id = ctx.subject.as_str();
        let alias = intent.name.trim().to_string();
        if alias.is_empty() {
            return Err(DxError::BadRequest("subscription name must not be empty".into()));
        }
        let _guard = self.locks.acquire(&Self::key(owner_id, &alias)).await;

        self.require_entities_exist(&intent.entities).await?;

        if self.store.fetch(owner_id, &alias).await?.is_some() {
            return Err(DxError::Conflict(format!(
                "subscription {owner_id}/{alias} already exists"
            )));
        }

        // Broker first: a crash here leaves only an unreferenced queue.
        let primary = &intent.entities[0];
        let resources = self
            .broker
            .create_subscription_resources(owner_id, &alias, primary, self.vhost)
            .await?;
        for extra in &intent.entities[1..] {
            if let Err(e) = self
                .broker
                .append_binding(owner_id, &alias, extra, self.vhost)
                .await
            {
                // Undo this call's provisioning before propagating.
                if let Err(cleanup) = self
                    .broker
                    .delete_subscription_resources(owner_id, &alias, self.vhost)
                    .await
                {
                    tracing::error!(owner_id, %alias, error = %cleanup, "rollback after failed binding also failed");
                }
                return Err(e);
            }
        }

        let subscription = Subscription {
            owner_id: owner_id.to_string(),
            alias: alias.clone(),
            entities: intent.entities.clone(),
            delivery: intent.delivery.unwrap_or(DeliveryKind::Streaming),
            instance_id: intent.instance_id.clone(),
            display_name: intent.display_name.clone().unwrap_or_else(|| alias.clone()),
            status: SubscriptionStatus::Provisioned,
        };

        match self.store.insert_if_absent(&subscription).await {
            Ok(true) => {}
            Ok(false) => {
                // Serialized per key and checked above; a lost race means
                // the record appeared outside this process.
                return Err(DxError::Conflict(format!(
                    "subscription {owner_id}/{alias} already exists"
                )));
            }
            Err(e) => return Err(self.degraded(owner_id, &alias, e).await),
        }

        tracing::info!(owner_id, %alias, queue = %resources.queue, "subscription created");
        Ok(SubscriptionCreated {
            subscription,
            resources,
        })
    }

    async fn append_subscription(
        &self,
        ctx: &AuthContext,
        owner_id: &str,
        alias: &str,
        intent: AppendSubscription,
    ) -> Result<SubscriptionDetail> {
        Self::require_owner(ctx, owner_id)?;
        let _guard = self.locks.acquire(&Self::key(owner_id, alias)).await;

        let mut existing = self
            .store
            .fetch(owner_id, alias)
            .await?
            .ok_or_else(|| DxError::NotFound(format!("subscription {owner_id}/{alias}")))?;

        self.require_entities_exist(&intent.entities).await?;

        // Bindings only: queue declaration and credential stay untouched.
        for entity in &intent.entities {
            self.broker
                .append_binding(owner_id, alias, entity, self.vhost)
                .await?;
        }

        for entity in &intent.entities {
            if !existing.entities.contains(entity) {
                existing.entities.push(entity.clone());
            }
        }
        if let Err(e) = self
            .store
            .replace_entities(owner_id, alias, &existing.entities)
            .await
        {
            return Err(self.degraded(owner_id, alias, e).await);
        }

        tracing::info!(owner_id, alias, entities = existing.entities.len(), "subscription appended");
        Ok(SubscriptionDetail {
            entities: existing.entities,
            delivery: existing.delivery,
        })
    }

    async fn update_subscription(
        &self,
        ctx: &AuthContext,
        owner_id: &str,
        alias: &str,
        intent: UpdateSubscription,
    ) -> Result<SubscriptionDetail> {
        Self::require_owner(ctx, owner_id)?;
        if !intent.name.eq_ignore_ascii_case(alias) {
            return Err(DxError::BadRequest(format!(
                "name {} does not match subscription alias {alias}",
                intent.name
            )));
        }
        let _guard = self.locks.acquire(&Self::key(owner_id, alias)).await;

        let existing = self
            .store
            .fetch(owner_id, alias)
            .await?
            .ok_or_else(|| DxError::NotFound(format!("subscription {owner_id}/{alias}")))?;

        self.require_entities_exist(&intent.entities).await?;

        // Rebind: drop every old binding, then bind the new entities.
        let first = &intent.entities[0];
        self.broker
            .replace_bindings(owner_id, alias, first, self.vhost)
            .await?;
        for extra in &intent.entities[1..] {
            self.broker
                .append_binding(owner_id, alias, extra, self.vhost)
                .await?;
        }

        if let Err(e) = self
            .store
            .replace_entities(owner_id, alias, &intent.entities)
            .await
        {
            return Err(self.degraded(owner_id, alias, e).await);
        }

        tracing::info!(owner_id, alias, "subscription updated");
        Ok(SubscriptionDetail {
            entities: intent.entities,
            delivery: existing.delivery,
        })
    }

    async fn get_subscription(
        &self,
        ctx: &AuthContext,
        owner_id: &str,
        alias: &str,
    ) -> Result<SubscriptionDetail> {
        Self::require_owner(ctx, owner_id)?;
        let sub = self
            .store
            .fetch(owner_id, alias)
            .await?
            .ok_or_else(|| DxError::NotFound(format!("subscription {owner_id}/{alias}")))?;
        Ok(SubscriptionDetail {
            entities: sub.entities,
            delivery: sub.delivery,
        })
    }

    async fn list_subscriptions_for_user(&self, ctx: &AuthContext) -> Result<Vec<Subscription>> {
        self.store.list_for_user(&ctx.subject).await
    }

    async fn delete_subscription(
        &self,
        ctx: &AuthContext,
        owner_id: &str,
        alias: &str,
    ) -> Result<()> {
        Self::require_owner(ctx, owner_id)?;
        let _guard = self.locks.acquire(&Self::key(owner_id, alias)).await;

        if self.store.fetch(owner_id, alias).await?.is_none() {
            // Already absent: the desired end state.
            tracing::debug!(owner_id, alias, "delete of absent subscription");
            return Ok(());
        }

        // Broker teardown first: a crash after it leaves a dangling row,
        // which is detectable, rather than a live queue with no record.
        self.broker
            .delete_subscription_resources(owner_id, alias, self.vhost)
            .await?;

        match self.store.delete(owner_id, alias).await {
            Ok(_) => {
                tracing::info!(owner_id, alias, "subscription deleted");
                Ok(())
            }
            Err(e) => Err(self.degraded(owner_id, alias, e).await),
        }
    }

    async fn reset_credential(&self, ctx: &AuthContext) -> Result<CredentialReset> {
        self.broker.reset_credential(&ctx.subject).await
    }
}

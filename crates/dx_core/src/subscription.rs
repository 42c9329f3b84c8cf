//! Subscription domain types and API intents.

use serde::{Deserialize, Serialize};

/// How delivered data reaches the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    Streaming,
    Callback,
}

impl DeliveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Callback => "callback",
        }
    }

    pub fn from_kind(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "streaming" => Some(Self::Streaming),
            "callback" => Some(Self::Callback),
            _ => None,
        }
    }
}

/// Row-level status. `Orphaned` flags a record whose broker resources are
/// out of step and needs operator reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Provisioned,
    Orphaned,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioned => "provisioned",
            Self::Orphaned => "orphaned",
        }
    }

    pub fn from_status(s: &str) -> Option<Self> {
        match s {
            "provisioned" => Some(Self::Provisioned),
            "orphaned" => Some(Self::Orphaned),
            _ => None,
        }
    }
}

/// A standing subscription, identified by `(owner_id, alias)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub owner_id: String,
    pub alias: String,
    pub entities: Vec<String>,
    pub delivery: DeliveryKind,
    pub instance_id: Option<String>,
    pub display_name: String,
    pub status: SubscriptionStatus,
}

impl Subscription {
    /// The subscription id, also the broker queue name.
    pub fn subscription_id(&self) -> String {
        format!("{}/{}", self.owner_id, self.alias)
    }
}

/// Isolated broker namespaces. Cross-vhost operations are never implicit;
/// every provisioning call names its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vhost {
    Internal,
    Prod,
    External,
}

/// Broker-side outcome of provisioning a subscription. The password is
/// `None` when the owner's credential already existed; it is only returned
/// on first registration or explicit reset.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResources {
    pub queue: String,
    pub username: String,
    #[serde(rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub url: String,
    pub port: u16,
    pub vhost: String,
}

/// Regenerated credential from a reset.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialReset {
    pub username: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

// ── API intents (post-validation, post-authorization) ─────────

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscription {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub entities: Vec<String>,
    #[serde(default)]
    pub delivery: Option<DeliveryKind>,
    #[serde(skip)]
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppendSubscription {
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSubscription {
    /// Must match the alias in the path; a mismatch is a client error.
    pub name: String,
    pub entities: Vec<String>,
}

// ── API results ───────────────────────────────────────────────

/// Result of create/append: resulting state plus delivery credential.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionCreated {
    pub subscription: Subscription,
    pub resources: SubscriptionResources,
}

/// Result of get: the stored record.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionDetail {
    pub entities: Vec<String>,
    pub delivery: DeliveryKind,
}

//! RabbitMQ management HTTP API client.
//!
//! Thin, typed wrappers over the admin endpoints the provisioner needs.
//! Every call carries the shared basic-auth credential and the configured
//! timeout; a timed-out call is a failure, never assumed success. 404 maps
//! to `DxError::NotFound` so the provisioner can treat "already absent" as
//! the desired end state on deletes.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use dx_core::{DxError, Result};

/// Queue arguments applied to every subscription queue.
pub const X_MESSAGE_TTL_VALUE: u64 = 86_400_000; // 24 hours
pub const X_MAXLENGTH_VALUE: u32 = 10_000;
pub const X_QUEUE_MODE_VALUE: &str = "lazy";

/// One binding row as the management API reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct BindingRow {
    pub source: String,
    pub routing_key: String,
}

/// The admin operations the provisioner is built on. A trait so the
/// rollback logic is testable against a scripted double.
#[async_trait]
pub trait MgmtApi: Send + Sync {
    async fn declare_exchange(&self, vhost: &str, name: &str) -> Result<()>;
    async fn declare_queue(&self, vhost: &str, name: &str) -> Result<()>;
    async fn delete_queue(&self, vhost: &str, name: &str) -> Result<()>;
    async fn bind(&self, vhost: &str, exchange: &str, queue: &str, routing_key: &str)
        -> Result<()>;
    async fn unbind(&self, vhost: &str, exchange: &str, queue: &str, routing_key: &str)
        -> Result<()>;
    async fn queue_bindings(&self, vhost: &str, queue: &str) -> Result<Vec<BindingRow>>;
    async fn user_exists(&self, username: &str) -> Result<bool>;
    async fn put_user(&self, username: &str, password: &str) -> Result<()>;
    async fn delete_user(&self, username: &str) -> Result<()>;
    async fn set_permissions(
        &self,
        vhost: &str,
        username: &str,
        configure: &str,
        write: &str,
        read: &str,
    ) -> Result<()>;
}

pub struct MgmtClient {
    http: reqwest::Client,
    base: String,
    username: String,
    password: String,
}

impl MgmtClient {
    pub fn new(
        base: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DxError::Internal(anyhow::anyhow!(e)))?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    /// Vhosts and queue names contain `/`; everything placed in a path
    /// segment goes through percent encoding.
    fn encode(segment: &str) -> String {
        utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string()
    }

    fn url(&self, parts: &[&str]) -> String {
        let mut url = format!("{}/api", self.base);
        for part in parts {
            url.push('/');
            url.push_str(&Self::encode(part));
        }
        url
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let resp = req
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DxError::Upstream("broker management call timed out".into())
                } else {
                    DxError::Upstream(format!("broker management call failed: {e}"))
                }
            })?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DxError::NotFound("broker resource".into()));
        }
        if !status.is_success() {
            return Err(DxError::Upstream(format!(
                "broker management call returned {status}"
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl MgmtApi for MgmtClient {
    async fn declare_exchange(&self, vhost: &str, name: &str) -> Result<()> {
        let url = self.url(&["exchanges", vhost, name]);
        let body = json!({"type": "topic", "durable": true});
        self.send(self.http.put(url).json(&body)).await?;
        Ok(())
    }

    async fn declare_queue(&self, vhost: &str, name: &str) -> Result<()> {
        let url = self.url(&["queues", vhost, name]);
        let body = json!({
            "durable": true,
            "arguments": {
                "x-message-ttl": X_MESSAGE_TTL_VALUE,
                "x-max-length": X_MAXLENGTH_VALUE,
                "x-queue-mode": X_QUEUE_MODE_VALUE,
            }
        });
        self.send(self.http.put(url).json(&body)).await?;
        Ok(())
    }

    async fn delete_queue(&self, vhost: &str, name: &str) -> Result<()> {
        let url = self.url(&["queues", vhost, name]);
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn bind(
        &self,
        vhost: &str,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<()> {
        let url = self.url(&["bindings", vhost, "e", exchange, "q", queue]);
        let body = json!({"routing_key": routing_key});
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    async fn unbind(
        &self,
        vhost: &str,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<()> {
        // With no binding arguments the properties key is the routing key.
        let url = self.url(&["bindings", vhost, "e", exchange, "q", queue, routing_key]);
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn queue_bindings(&self, vhost: &str, queue: &str) -> Result<Vec<BindingRow>> {
        let url = self.url(&["queues", vhost, queue, "bindings"]);
        let resp = self.send(self.http.get(url)).await?;
        resp.json::<Vec<BindingRow>>()
            .await
            .map_err(|e| DxError::Upstream(format!("malformed bindings response: {e}")))
    }

    async fn user_exists(&self, username: &str) -> Result<bool> {
        let url = self.url(&["users", username]);
        match self.send(self.http.get(url)).await {
            Ok(_) => Ok(true),
            Err(DxError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn put_user(&self, username: &str, password: &str) -> Result<()> {
        let url = self.url(&["users", username]);
        let body = json!({"password": password, "tags": ""});
        self.send(self.http.put(url).json(&body)).await?;
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> Result<()> {
        let url = self.url(&["users", username]);
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn set_permissions(
        &self,
        vhost: &str,
        username: &str,
        configure: &str,
        write: &str,
        read: &str,
    ) -> Result<()> {
        let url = self.url(&["permissions", vhost, username]);
        let body = json!({"configure": configure, "write": write, "read": read});
        self.send(self.http.put(url).json(&body)).await?;
        Ok(())
    }
}

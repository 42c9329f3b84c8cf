//! Env-var configuration.
//!
//! Required:
//!   DX_RS_DATABASE_URL     - Postgres connection string
//!   DX_RS_JWT_SECRET       - JWT HMAC secret
//!   DX_RS_AUDIENCE         - resource-server audience claim
//!   DX_RS_CATALOGUE_URL    - catalogue service base URL
//!   DX_RS_BROKER_MGMT_URL  - RabbitMQ management API base URL
//!   DX_RS_BROKER_USERNAME / DX_RS_BROKER_PASSWORD - admin credential
//! Everything else has a default.

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub audience: String,
    pub catalogue_base_url: String,
    pub broker: BrokerConfig,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub mgmt_base_url: String,
    pub mgmt_username: String,
    pub mgmt_password: String,
    pub mgmt_timeout_ms: u64,
    pub amqp_host: String,
    pub amqp_port: u16,
    pub internal_vhost: String,
    pub prod_vhost: String,
    pub external_vhost: String,
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bind_addr: var_or("DX_RS_BIND_ADDR", "0.0.0.0:8443"),
            database_url: required("DX_RS_DATABASE_URL")?,
            db_max_connections: parse_or("DX_RS_DB_MAX_CONNECTIONS", 10),
            jwt_secret: required("DX_RS_JWT_SECRET")?,
            audience: required("DX_RS_AUDIENCE")?,
            catalogue_base_url: required("DX_RS_CATALOGUE_URL")?,
            broker: BrokerConfig {
                mgmt_base_url: required("DX_RS_BROKER_MGMT_URL")?,
                mgmt_username: required("DX_RS_BROKER_USERNAME")?,
                mgmt_password: required("DX_RS_BROKER_PASSWORD")?,
                mgmt_timeout_ms: parse_or("DX_RS_BROKER_MGMT_TIMEOUT_MS", 10_000),
                amqp_host: var_or("DX_RS_BROKER_AMQP_HOST", "localhost"),
                amqp_port: parse_or("DX_RS_BROKER_AMQP_PORT", 5672),
                internal_vhost: var_or("DX_RS_VHOST_INTERNAL", "internal"),
                prod_vhost: var_or("DX_RS_VHOST_PROD", "prod"),
                external_vhost: var_or("DX_RS_VHOST_EXTERNAL", "external"),
            },
        })
    }
}

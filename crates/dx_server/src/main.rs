//! dx_server binary: wires the adapters to the core and serves HTTP.
//!
//! Reads config from env vars (see `config.rs`); `.env` is honoured in
//! development.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use dx_broker::listeners::{
    amqp_uri, AsyncQueryHandler, RevokedTokenHandler, RmqListener, UniqueAttributeHandler,
};
use dx_broker::{BrokerProvisioner, MgmtClient, VhostNames};
use dx_core::auth::AuthPipeline;
use dx_core::cache::{AttributeCache, RevocationCache};
use dx_core::catalogue::FilterResolver;
use dx_core::ports::{
    AsyncQuerySink, BrokerControl, CatalogueClient, SubscriptionStore, TokenValidator,
};
use dx_core::service::{SubscriptionService, SubscriptionServiceImpl};
use dx_core::subscription::Vhost;
use dx_postgres::PgSubscriptionStore;
use dx_server::catalogue::HttpCatalogueClient;
use dx_server::config::Config;
use dx_server::middleware::auth::{JwtConfig, JwtTokenValidator};
use dx_server::router::build_router;

/// Async-query progress currently only surfaces in the logs; the query
/// engine that consumes it is an external collaborator.
struct AsyncQueryLog;

#[async_trait::async_trait]
impl AsyncQuerySink for AsyncQueryLog {
    async fn handle(&self, payload: serde_json::Value) -> dx_core::Result<()> {
        tracing::info!(event = %payload, "async-query progress");
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dx_server=debug".into()),
        )
        .init();
    dotenvy::dotenv().ok();

    let config = Config::from_env().expect("invalid configuration");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    tracing::info!("connected to database");

    // Adapters behind the core ports.
    let store: Arc<dyn SubscriptionStore> = Arc::new(PgSubscriptionStore::new(pool));

    let mgmt = Arc::new(
        MgmtClient::new(
            config.broker.mgmt_base_url.clone(),
            config.broker.mgmt_username.clone(),
            config.broker.mgmt_password.clone(),
            Duration::from_millis(config.broker.mgmt_timeout_ms),
        )
        .expect("failed to build broker management client"),
    );
    let vhosts = VhostNames {
        internal: config.broker.internal_vhost.clone(),
        prod: config.broker.prod_vhost.clone(),
        external: config.broker.external_vhost.clone(),
    };
    let broker: Arc<dyn BrokerControl> = Arc::new(BrokerProvisioner::new(
        mgmt,
        vhosts,
        config.broker.amqp_host.clone(),
        config.broker.amqp_port,
    ));

    let catalogue: Arc<dyn CatalogueClient> = Arc::new(
        HttpCatalogueClient::new(config.catalogue_base_url.clone(), Duration::from_secs(10))
            .expect("failed to build catalogue client"),
    );
    let resolver = Arc::new(FilterResolver::new(catalogue));

    // Caches written by the listeners, read by the pipeline.
    let revocations = Arc::new(RevocationCache::new());
    let attributes = Arc::new(AttributeCache::new());

    let jwt_config = JwtConfig::from_secret(config.jwt_secret.as_bytes(), &config.audience);
    let validator: Arc<dyn TokenValidator> = Arc::new(JwtTokenValidator::new(jwt_config));
    let pipeline = Arc::new(AuthPipeline::new(
        validator,
        Arc::clone(&revocations),
        Arc::clone(&resolver),
    ));

    let service: Arc<dyn SubscriptionService> = Arc::new(SubscriptionServiceImpl::new(
        store,
        broker,
        Arc::clone(&resolver),
        Vhost::Prod,
    ));

    // Listener tasks on the internal vhost, one per queue.
    let listener_uri = amqp_uri(
        &config.broker.mgmt_username,
        &config.broker.mgmt_password,
        &config.broker.amqp_host,
        config.broker.amqp_port,
        &config.broker.internal_vhost,
    );
    tokio::spawn(
        RmqListener::new(
            listener_uri.clone(),
            Arc::new(RevokedTokenHandler {
                cache: revocations,
            }),
        )
        .run(),
    );
    tokio::spawn(
        RmqListener::new(
            listener_uri.clone(),
            Arc::new(UniqueAttributeHandler { cache: attributes }),
        )
        .run(),
    );
    tokio::spawn(
        RmqListener::new(
            listener_uri,
            Arc::new(AsyncQueryHandler {
                sink: Arc::new(AsyncQueryLog),
            }),
        )
        .run(),
    );
    tracing::info!("broker listeners spawned");

    let app = build_router(service, pipeline);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind to {}: {e}", config.bind_addr));
    tracing::info!("dx_server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("server error");
}

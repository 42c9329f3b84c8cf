//! HTTP-level integration tests for the subscription gateway.
//!
//! These tests prove the deployed HTTP contract: JWT authentication, the
//! authorization chain (role allow-sets, consumer constraints, revocation),
//! and the subscription lifecycle endpoints. The persistence store, broker
//! and catalogue are in-memory doubles; the JWT path is the real one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use http_body_util::BodyExt;
use hyper::{Request, StatusCode};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use tower::ServiceExt;

use dx_core::auth::AuthPipeline;
use dx_core::cache::RevocationCache;
use dx_core::catalogue::{CatalogueRecord, FilterResolver};
use dx_core::ports::{BrokerControl, CatalogueClient, SubscriptionStore, TokenValidator};
use dx_core::service::{SubscriptionService, SubscriptionServiceImpl};
use dx_core::subscription::{
    CredentialReset, Subscription, SubscriptionResources, SubscriptionStatus, Vhost,
};
use dx_core::{DxError, Result};
use dx_server::middleware::auth::{JwtConfig, JwtTokenValidator};
use dx_server::router::build_router;

// ── Test JWT helpers ───────────────────────────────────────────

const TEST_JWT_SECRET: &[u8] = b"test-secret-for-integration-tests";
const TEST_AUDIENCE: &str = "rs.example.org";

#[derive(Debug, Serialize)]
struct TestClaims {
    sub: String,
    aud: String,
    exp: i64,
    iat: i64,
    role: String,
    cons: TestCons,
}

#[derive(Debug, Serialize)]
struct TestCons {
    access: Vec<String>,
}

fn make_jwt(sub: &str, role: &str, access: &[&str], iat: i64) -> String {
    let claims = TestClaims {
        sub: sub.into(),
        aud: TEST_AUDIENCE.into(),
        exp: 4_102_444_800,
        iat,
        role: role.into(),
        cons: TestCons {
            access: access.iter().map(|a| a.to_string()).collect(),
        },
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET),
    )
    .expect("failed to encode test JWT")
}

fn consumer_jwt(sub: &str) -> String {
    make_jwt(sub, "consumer", &["api", "subscription"], 1_700_000_000)
}

// ── Port doubles ───────────────────────────────────────────────

#[derive(Default)]
struct MemoryStore {
    rows: Mutex<HashMap<String, Subscription>>,
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn insert_if_absent(&self, sub: &Subscription) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let key = format!("{}/{}", sub.owner_id, sub.alias);
        if rows.contains_key(&key) {
            return Ok(false);
        }
        rows.insert(key, sub.clone());
        Ok(true)
    }

    async fn fetch(&self, owner_id: &str, alias: &str) -> Result<Option<Subscription>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&format!("{owner_id}/{alias}"))
            .cloned())
    }

    async fn list_for_user(&self, owner_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn replace_entities(
        &self,
        owner_id: &str,
        alias: &str,
        entities: &[String],
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&format!("{owner_id}/{alias}")) {
            Some(row) => {
                row.entities = entities.to_vec();
                Ok(())
            }
            None => Err(DxError::NotFound(format!("{owner_id}/{alias}"))),
        }
    }

    async fn delete(&self, owner_id: &str, alias: &str) -> Result<bool> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .remove(&format!("{owner_id}/{alias}"))
            .is_some())
    }

    async fn mark_orphaned(&self, owner_id: &str, alias: &str) -> Result<()> {
        if let Some(row) = self
            .rows
            .lock()
            .unwrap()
            .get_mut(&format!("{owner_id}/{alias}"))
        {
            row.status = SubscriptionStatus::Orphaned;
        }
        Ok(())
    }
}

/// Broker double that counts provisioning calls so tests can assert the
/// pipeline rejected a request before any side effect.
#[derive(Default)]
struct CountingBroker {
    calls: AtomicUsize,
}

impl CountingBroker {
    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerControl for CountingBroker {
    async fn create_subscription_resources(
        &self,
        owner_id: &str,
        alias: &str,
        _entity: &str,
        _vhost: Vhost,
    ) -> Result<SubscriptionResources> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SubscriptionResources {
            queue: format!("{owner_id}/{alias}"),
            username: owner_id.to_string(),
            api_key: Some("fresh-key".into()),
            url: "rmq.example.org".into(),
            port: 5672,
            vhost: "prod".into(),
        })
    }

    async fn append_binding(
        &self,
        _owner_id: &str,
        _alias: &str,
        entity: &str,
        _vhost: Vhost,
    ) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![format!("{entity}/.*")])
    }

    async fn replace_bindings(
        &self,
        _owner_id: &str,
        _alias: &str,
        entity: &str,
        _vhost: Vhost,
    ) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![format!("{entity}/.*")])
    }

    async fn delete_subscription_resources(
        &self,
        _owner_id: &str,
        _alias: &str,
        _vhost: Vhost,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_bindings(
        &self,
        _owner_id: &str,
        _alias: &str,
        _vhost: Vhost,
    ) -> Result<Vec<String>> {
        Ok(vec![])
    }

    async fn reset_credential(&self, owner_id: &str) -> Result<CredentialReset> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CredentialReset {
            username: owner_id.to_string(),
            api_key: "rotated-key".into(),
        })
    }
}

struct StaticCatalogue;

#[async_trait]
impl CatalogueClient for StaticCatalogue {
    async fn lookup(&self, id: &str) -> Result<CatalogueRecord> {
        if id.starts_with("missing") {
            return Err(DxError::NotFound(format!("catalogue item {id}")));
        }
        Ok(CatalogueRecord {
            id: id.into(),
            types: vec!["dx:Resource".into()],
            resource_group: Some("g".into()),
            permitted_filters: vec!["TEMPORAL".into()],
        })
    }

    async fn provider_of(&self, _id: &str) -> Result<String> {
        Ok("provider-1".into())
    }
}

// ── Test app builder ───────────────────────────────────────────

struct TestApp {
    router: axum::Router,
    broker: Arc<CountingBroker>,
    revocations: Arc<RevocationCache>,
}

fn build_test_app() -> TestApp {
    let store = Arc::new(MemoryStore::default());
    let broker = Arc::new(CountingBroker::default());
    let revocations = Arc::new(RevocationCache::new());
    let resolver = Arc::new(FilterResolver::new(Arc::new(StaticCatalogue)));

    let jwt_config = JwtConfig::from_secret(TEST_JWT_SECRET, TEST_AUDIENCE);
    let validator: Arc<dyn TokenValidator> = Arc::new(JwtTokenValidator::new(jwt_config));
    let pipeline = Arc::new(AuthPipeline::new(
        validator,
        Arc::clone(&revocations),
        Arc::clone(&resolver),
    ));

    let service: Arc<dyn SubscriptionService> = Arc::new(SubscriptionServiceImpl::new(
        store,
        Arc::clone(&broker) as Arc<dyn BrokerControl>,
        resolver,
        Vhost::Prod,
    ));

    TestApp {
        router: build_router(service, pipeline),
        broker,
        revocations,
    }
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_body(name: &str, entities: &[&str]) -> serde_json::Value {
    serde_json::json!({ "name": name, "entities": entities })
}

// ── Authentication / authorization ─────────────────────────────

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = build_test_app();
    let resp = app
        .router
        .oneshot(request("GET", "/ngsi-ld/v1/subscription", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(resp).await;
    assert_eq!(json["type"], "urn:dx:rs:invalidAuthorizationToken");
}

#[tokio::test]
async fn garbage_token_is_unauthorized() {
    let app = build_test_app();
    let resp = app
        .router
        .oneshot(request(
            "GET",
            "/ngsi-ld/v1/subscription",
            Some("not-a-jwt"),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_audience_is_unauthorized() {
    let app = build_test_app();
    let claims = TestClaims {
        sub: "u1".into(),
        aud: "some.other.server".into(),
        exp: 4_102_444_800,
        iat: 1_700_000_000,
        role: "consumer".into(),
        cons: TestCons {
            access: vec!["subscription".into()],
        },
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET),
    )
    .unwrap();
    let resp = app
        .router
        .oneshot(request("GET", "/ngsi-ld/v1/subscription", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_outside_allow_set_is_forbidden_with_no_side_effects() {
    let app = build_test_app();
    // resetPassword is consumer-only; a provider must be rejected before
    // any broker call.
    let token = make_jwt("p1", "provider", &[], 1_700_000_000);
    let resp = app
        .router
        .oneshot(request(
            "POST",
            "/ngsi-ld/v1/user/resetPassword",
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.broker.call_count(), 0);
}

#[tokio::test]
async fn consumer_missing_constraint_is_forbidden_and_named() {
    let app = build_test_app();
    // Token for U1, role consumer, constraints {api}; the subscription
    // endpoint requires {subscription}.
    let token = make_jwt("U1", "consumer", &["api"], 1_700_000_000);
    let resp = app
        .router
        .oneshot(request(
            "POST",
            "/ngsi-ld/v1/subscription",
            Some(&token),
            Some(create_body("alerts", &["g/r1"])),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let json = body_json(resp).await;
    assert_eq!(json["type"], "urn:dx:rs:accessDenied");
    assert!(json["detail"]
        .as_str()
        .unwrap()
        .contains("missing_constraint: subscription"));
    assert_eq!(app.broker.call_count(), 0);
}

#[tokio::test]
async fn revocation_written_by_listener_is_visible_to_next_check() {
    let app = build_test_app();
    let token = consumer_jwt("u1");

    // Accepted before the revocation event arrives.
    let resp = app
        .router
        .clone()
        .oneshot(request("GET", "/ngsi-ld/v1/subscription", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // The listener records a revocation instant after this token's iat.
    app.revocations
        .record("u1", chrono::DateTime::from_timestamp(1_700_000_100, 0).unwrap());

    let resp = app
        .router
        .oneshot(request("GET", "/ngsi-ld/v1/subscription", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ── Lifecycle over HTTP ────────────────────────────────────────

#[tokio::test]
async fn create_then_get_round_trips() {
    let app = build_test_app();
    let token = consumer_jwt("u1");

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/ngsi-ld/v1/subscription",
            Some(&token),
            Some(create_body("alerts", &["g/r1"])),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body_json(resp).await;
    assert_eq!(json["type"], "urn:dx:rs:success");
    assert_eq!(json["results"][0]["id"], "u1/alerts");
    assert_eq!(json["results"][0]["queue"], "u1/alerts");
    assert_eq!(json["results"][0]["apiKey"], "fresh-key");

    let resp = app
        .router
        .oneshot(request(
            "GET",
            "/ngsi-ld/v1/subscription/u1/alerts",
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["results"][0]["entities"][0], "g/r1");
    assert_eq!(json["results"][0]["delivery"], "streaming");
}

#[tokio::test]
async fn create_duplicate_is_conflict() {
    let app = build_test_app();
    let token = consumer_jwt("u1");
    let body = create_body("alerts", &["g/r1"]);

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "POST",
            "/ngsi-ld/v1/subscription",
            Some(&token),
            Some(body.clone()),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .router
        .oneshot(request("POST", "/ngsi-ld/v1/subscription", Some(&token), Some(body)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let json = body_json(resp).await;
    assert_eq!(json["type"], "urn:dx:rs:conflict");
}

#[tokio::test]
async fn create_with_unknown_entity_is_not_found() {
    let app = build_test_app();
    let token = consumer_jwt("u1");
    let resp = app
        .router
        .oneshot(request(
            "POST",
            "/ngsi-ld/v1/subscription",
            Some(&token),
            Some(create_body("alerts", &["missing/r1"])),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.broker.call_count(), 0);
}

#[tokio::test]
async fn update_with_mismatched_name_is_bad_request() {
    let app = build_test_app();
    let token = consumer_jwt("u1");
    app.router
        .clone()
        .oneshot(request(
            "POST",
            "/ngsi-ld/v1/subscription",
            Some(&token),
            Some(create_body("alerts", &["g/r1"])),
        ))
        .await
        .unwrap();

    let resp = app
        .router
        .oneshot(request(
            "PUT",
            "/ngsi-ld/v1/subscription/u1/alerts",
            Some(&token),
            Some(serde_json::json!({"name": "renamed", "entities": ["g/r2"]})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["type"], "urn:dx:rs:badRequest");
}

#[tokio::test]
async fn append_extends_the_entity_list() {
    let app = build_test_app();
    let token = consumer_jwt("u1");
    app.router
        .clone()
        .oneshot(request(
            "POST",
            "/ngsi-ld/v1/subscription",
            Some(&token),
            Some(create_body("alerts", &["g/r1"])),
        ))
        .await
        .unwrap();

    let resp = app
        .router
        .clone()
        .oneshot(request(
            "PATCH",
            "/ngsi-ld/v1/subscription/u1/alerts",
            Some(&token),
            Some(serde_json::json!({"entities": ["g/r2"]})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body_json(resp).await;
    assert_eq!(json["results"][0]["entities"][1], "g/r2");
}

#[tokio::test]
async fn delete_is_idempotent_and_get_after_is_not_found() {
    let app = build_test_app();
    let token = consumer_jwt("u1");

    // Deleting a subscription that never existed succeeds.
    let resp = app
        .router
        .clone()
        .oneshot(request(
            "DELETE",
            "/ngsi-ld/v1/subscription/u1/ghost",
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .router
        .oneshot(request(
            "GET",
            "/ngsi-ld/v1/subscription/u1/ghost",
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_returns_the_callers_subscriptions() {
    let app = build_test_app();
    let token = consumer_jwt("u1");
    app.router
        .clone()
        .oneshot(request(
            "POST",
            "/ngsi-ld/v1/subscription",
            Some(&token),
            Some(create_body("alerts", &["g/r1"])),
        ))
        .await
        .unwrap();

    let resp = app
        .router
        .oneshot(request("GET", "/ngsi-ld/v1/subscription", Some(&token), None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["results"][0]["alias"], "alerts");
    assert_eq!(json["results"][0]["owner_id"], "u1");
}

#[tokio::test]
async fn reset_password_returns_rotated_credential() {
    let app = build_test_app();
    let token = make_jwt("u1", "consumer", &["api"], 1_700_000_000);
    let resp = app
        .router
        .oneshot(request(
            "POST",
            "/ngsi-ld/v1/user/resetPassword",
            Some(&token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["results"][0]["username"], "u1");
    assert_eq!(json["results"][0]["apiKey"], "rotated-key");
}

#[tokio::test]
async fn health_is_public() {
    let app = build_test_app();
    let resp = app
        .router
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

//! Subscription handlers.
//!
//! POST   /ngsi-ld/v1/subscription                  - create
//! GET    /ngsi-ld/v1/subscription                  - list for user
//! GET    /ngsi-ld/v1/subscription/:userid/:alias   - get
//! PATCH  /ngsi-ld/v1/subscription/:userid/:alias   - append entities
//! PUT    /ngsi-ld/v1/subscription/:userid/:alias   - replace entities
//! DELETE /ngsi-ld/v1/subscription/:userid/:alias   - delete
//! POST   /ngsi-ld/v1/user/resetPassword            - reset broker credential
//!
//! The auth middleware has already run; handlers receive the validated
//! `AuthContext` from request extensions and delegate to the service. The
//! provider-ownership stage runs here for mutations, once the referenced
//! entity is known from the body.

use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use dx_core::auth::{AuthContext, AuthPipeline};
use dx_core::service::SubscriptionService;
use dx_core::subscription::{AppendSubscription, CreateSubscription, UpdateSubscription};
use dx_core::DxError;

use crate::error::AppError;
use crate::responses::{success, success_detail, API_KEY_MESSAGE};

fn instance_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Provider/delegate mutations must be authorized for every referenced
/// entity, not just the first.
async fn authorize_entities(
    pipeline: &AuthPipeline,
    ctx: &AuthContext,
    entities: &[String],
) -> Result<(), AppError> {
    for entity in entities {
        pipeline.authorize_entity_mutation(ctx, entity).await?;
    }
    Ok(())
}

pub async fn create_subscription(
    Extension(service): Extension<Arc<dyn SubscriptionService>>,
    Extension(pipeline): Extension<Arc<AuthPipeline>>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(mut intent): Json<CreateSubscription>,
) -> Result<impl IntoResponse, AppError> {
    authorize_entities(&pipeline, &ctx, &intent.entities).await?;
    intent.instance_id = instance_id(&headers);

    let created = service.create_subscription(&ctx, intent).await?;

    let mut result = serde_json::to_value(&created.resources)
        .map_err(|e| DxError::Internal(e.into()))?;
    result["id"] = json!(created.subscription.subscription_id());
    result["entities"] = json!(created.subscription.entities);
    if created.resources.api_key.is_none() {
        result["apiKey"] = json!(API_KEY_MESSAGE);
    }
    Ok((StatusCode::CREATED, Json(success(json!([result])))))
}

pub async fn append_subscription(
    Extension(service): Extension<Arc<dyn SubscriptionService>>,
    Extension(pipeline): Extension<Arc<AuthPipeline>>,
    Extension(ctx): Extension<AuthContext>,
    Path((userid, alias)): Path<(String, String)>,
    Json(intent): Json<AppendSubscription>,
) -> Result<impl IntoResponse, AppError> {
    authorize_entities(&pipeline, &ctx, &intent.entities).await?;
    let detail = service
        .append_subscription(&ctx, &userid, &alias, intent)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(success(json!([{ "entities": detail.entities }]))),
    ))
}

pub async fn update_subscription(
    Extension(service): Extension<Arc<dyn SubscriptionService>>,
    Extension(pipeline): Extension<Arc<AuthPipeline>>,
    Extension(ctx): Extension<AuthContext>,
    Path((userid, alias)): Path<(String, String)>,
    Json(intent): Json<UpdateSubscription>,
) -> Result<impl IntoResponse, AppError> {
    authorize_entities(&pipeline, &ctx, &intent.entities).await?;
    let detail = service
        .update_subscription(&ctx, &userid, &alias, intent)
        .await?;
    Ok(Json(success(json!([{ "entities": detail.entities }]))))
}

pub async fn get_subscription(
    Extension(service): Extension<Arc<dyn SubscriptionService>>,
    Extension(ctx): Extension<AuthContext>,
    Path((userid, alias)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let detail = service.get_subscription(&ctx, &userid, &alias).await?;
    Ok(Json(success(json!([{
        "entities": detail.entities,
        "delivery": detail.delivery,
    }]))))
}

pub async fn list_subscriptions(
    Extension(service): Extension<Arc<dyn SubscriptionService>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, AppError> {
    let subs = service.list_subscriptions_for_user(&ctx).await?;
    let results = serde_json::to_value(&subs).map_err(|e| DxError::Internal(e.into()))?;
    Ok(Json(success(results)))
}

pub async fn delete_subscription(
    Extension(service): Extension<Arc<dyn SubscriptionService>>,
    Extension(ctx): Extension<AuthContext>,
    Path((userid, alias)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    service.delete_subscription(&ctx, &userid, &alias).await?;
    Ok(Json(success_detail("Subscription deleted")))
}

pub async fn reset_password(
    Extension(service): Extension<Arc<dyn SubscriptionService>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, AppError> {
    let reset = service.reset_credential(&ctx).await?;
    Ok(Json(success(json!([{
        "username": reset.username,
        "apiKey": reset.api_key,
    }]))))
}

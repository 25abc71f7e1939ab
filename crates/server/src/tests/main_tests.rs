use super::*;
use axum::{body, body::Body, http::Request};
use tower::ServiceExt;

async fn test_app() -> (Router, Storage) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let app = build_router(Arc::new(AppState {
        storage: storage.clone(),
        default_service_account_limit: 10,
    }));
    (app, storage)
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _storage) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(bytes.as_ref(), b"ok");
}

#[tokio::test]
async fn tenant_and_group_admin_routes_work() {
    let (app, _storage) = test_app().await;

    let request = Request::post("/tenants")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "name": "acme", "service_account_limit": 3 }).to_string(),
        ))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let tenant: serde_json::Value = json_body(response).await;
    let tenant_id = tenant["tenant_id"].as_i64().expect("tenant id");

    let request = Request::post(format!("/tenants/{tenant_id}/groups"))
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "name": "ops" }).to_string(),
        ))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::get(format!("/tenants/{tenant_id}/groups"))
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let groups: Vec<GroupSummary> = json_body(response).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "ops");
}

#[tokio::test]
async fn created_actor_is_reachable_for_the_next_stage() {
    let (app, storage) = test_app().await;
    let tenant = storage.create_tenant("acme", 1).await.expect("tenant");

    // The actor arrives through the form channel; the second stage then
    // resolves the handoff id over HTTP.
    let mut session = FormSession::new(tenant, storage.clone());
    let response = session
        .handle(FormEvent::Submit {
            attrs: shared::protocol::ActorAttrs {
                name: Some("svc-1".to_string()),
                memberships: None,
            },
        })
        .await;
    let FormResponse::Navigate { to } = response else {
        panic!("expected navigation");
    };
    let actor_id = to
        .split('/')
        .rev()
        .nth(1)
        .and_then(|raw| raw.parse::<i64>().ok())
        .expect("actor id in handoff path");

    let request = Request::get(format!("/service_accounts/{actor_id}"))
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let actor: ActorSummary = json_body(response).await;
    assert_eq!(actor.name, "svc-1");
    assert_eq!(actor.actor_id.0, actor_id);

    let request = Request::get("/service_accounts/9999")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn limit_updates_require_an_existing_tenant() {
    let (app, storage) = test_app().await;
    let tenant = storage.create_tenant("acme", 1).await.expect("tenant");

    let request = Request::put(format!("/tenants/{}/limit", tenant.0))
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "service_account_limit": 5 }).to_string(),
        ))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let request = Request::put("/tenants/999/limit")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "service_account_limit": 5 }).to_string(),
        ))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blank_tenant_name_is_rejected() {
    let (app, _storage) = test_app().await;
    let request = Request::post("/tenants")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::json!({ "name": "  " }).to_string()))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

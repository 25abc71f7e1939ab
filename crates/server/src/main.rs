use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ActorId, ActorKind, TenantId},
    error::{ApiError, ErrorCode},
    protocol::{ActorSummary, FormEvent, FormResponse, GroupSummary},
};
use storage::Storage;
use tracing::{debug, error, info};

mod config;
mod session;

use config::{load_settings, prepare_database_url};
use session::FormSession;

#[derive(Clone)]
struct AppState {
    storage: Storage,
    default_service_account_limit: i64,
}

#[derive(Debug, Deserialize)]
struct CreateTenantRequest {
    name: String,
    service_account_limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct TenantCreatedResponse {
    tenant_id: i64,
}

#[derive(Debug, Deserialize)]
struct UpdateLimitRequest {
    service_account_limit: i64,
}

#[derive(Debug, Deserialize)]
struct CreateGroupRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct GroupCreatedResponse {
    group_id: i64,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    tenant_id: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState {
        storage,
        default_service_account_limit: settings.default_service_account_limit,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/tenants", post(create_tenant))
        .route("/tenants/:tenant_id/limit", put(update_limit))
        .route("/tenants/:tenant_id/groups", post(create_group))
        .route("/tenants/:tenant_id/groups", get(list_groups))
        .route(
            "/tenants/:tenant_id/service_accounts",
            get(list_service_accounts),
        )
        .route("/service_accounts/:actor_id", get(get_service_account))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz(
    State(state): State<Arc<AppState>>,
) -> Result<&'static str, (StatusCode, Json<ApiError>)> {
    state.storage.health_check().await.map_err(internal)?;
    Ok("ok")
}

async fn create_tenant(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTenantRequest>,
) -> Result<Json<TenantCreatedResponse>, (StatusCode, Json<ApiError>)> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                ErrorCode::Validation,
                "tenant name cannot be empty",
            )),
        ));
    }
    let limit = req
        .service_account_limit
        .unwrap_or(state.default_service_account_limit);
    if limit < 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                ErrorCode::Validation,
                "service account limit cannot be negative",
            )),
        ));
    }

    let tenant_id = state
        .storage
        .create_tenant(name, limit)
        .await
        .map_err(internal)?;
    Ok(Json(TenantCreatedResponse {
        tenant_id: tenant_id.0,
    }))
}

async fn update_limit(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<i64>,
    Json(req): Json<UpdateLimitRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    if req.service_account_limit < 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                ErrorCode::Validation,
                "service account limit cannot be negative",
            )),
        ));
    }
    let updated = state
        .storage
        .set_service_account_limit(TenantId(tenant_id), req.service_account_limit)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(tenant_not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn create_group(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<i64>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<GroupCreatedResponse>, (StatusCode, Json<ApiError>)> {
    let tenant_id = TenantId(tenant_id);
    ensure_tenant_exists(&state, tenant_id).await?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                ErrorCode::Validation,
                "group name cannot be empty",
            )),
        ));
    }

    let group_id = state
        .storage
        .create_group(tenant_id, name)
        .await
        .map_err(internal)?;
    Ok(Json(GroupCreatedResponse {
        group_id: group_id.0,
    }))
}

async fn list_groups(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<i64>,
) -> Result<Json<Vec<GroupSummary>>, (StatusCode, Json<ApiError>)> {
    let tenant_id = TenantId(tenant_id);
    ensure_tenant_exists(&state, tenant_id).await?;

    let groups = state
        .storage
        .list_groups_for_tenant(tenant_id)
        .await
        .map_err(internal)?;
    Ok(Json(
        groups
            .into_iter()
            .map(|group| GroupSummary {
                group_id: group.group_id,
                tenant_id: group.tenant_id,
                name: group.name,
            })
            .collect(),
    ))
}

async fn list_service_accounts(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<i64>,
) -> Result<Json<Vec<ActorSummary>>, (StatusCode, Json<ApiError>)> {
    let tenant_id = TenantId(tenant_id);
    ensure_tenant_exists(&state, tenant_id).await?;

    let actors = state
        .storage
        .list_actors_for_tenant(tenant_id, ActorKind::ServiceAccount)
        .await
        .map_err(internal)?;
    Ok(Json(actors.into_iter().map(actor_summary).collect()))
}

async fn get_service_account(
    State(state): State<Arc<AppState>>,
    Path(actor_id): Path<i64>,
) -> Result<Json<ActorSummary>, (StatusCode, Json<ApiError>)> {
    let actor = state
        .storage
        .load_actor(ActorId(actor_id))
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ApiError::new(ErrorCode::NotFound, "actor not found")),
            )
        })?;
    Ok(Json(actor_summary(actor)))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket, TenantId(q.tenant_id)))
}

async fn ws_connection(
    state: Arc<AppState>,
    socket: axum::extract::ws::WebSocket,
    tenant_id: TenantId,
) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let mut session = FormSession::new(tenant_id, state.storage.clone());
    let (mut sender, mut receiver) = socket.split();

    // Each event is handled to completion before the next frame is read,
    // which keeps per-session ordering strict.
    while let Some(Ok(message)) = receiver.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let response = match serde_json::from_str::<FormEvent>(&text) {
            Ok(event) => {
                debug!(tenant_id = tenant_id.0, "form event received");
                session.handle(event).await
            }
            Err(err) => FormResponse::Error(ApiError::new(
                ErrorCode::Validation,
                format!("malformed form event: {err}"),
            )),
        };
        let Ok(frame) = serde_json::to_string(&response) else {
            continue;
        };
        if sender.send(Message::Text(frame)).await.is_err() {
            break;
        }
    }
}

fn actor_summary(actor: workflow::ActorRecord) -> ActorSummary {
    ActorSummary {
        actor_id: actor.id,
        tenant_id: actor.tenant_id,
        kind: actor.kind,
        name: actor.name,
        memberships: actor.memberships.into_iter().collect(),
        created_at: actor.created_at,
    }
}

async fn ensure_tenant_exists(
    state: &AppState,
    tenant_id: TenantId,
) -> Result<(), (StatusCode, Json<ApiError>)> {
    state
        .storage
        .load_tenant(tenant_id)
        .await
        .map_err(internal)?
        .ok_or_else(tenant_not_found)?;
    Ok(())
}

fn tenant_not_found() -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new(ErrorCode::NotFound, "tenant not found")),
    )
}

fn internal(err: anyhow::Error) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::new(ErrorCode::Internal, err.to_string())),
    )
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

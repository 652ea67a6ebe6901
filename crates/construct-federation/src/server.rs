//! The federation HTTP resource server (§4.9, §6): one route per endpoint
//! in the table, each wrapped with the same payload-size cap, timeout, and
//! CORS handling rather than repeating it per handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::error::FedError;

/// Default payload-size cap (§4.9): 128 KiB per request body.
pub const DEFAULT_PAYLOAD_CAP: usize = 128 * 1024;
/// Default per-handler timeout (§4.9, §5).
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

impl IntoResponse for FedError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({ "errcode": error_code(&self), "error": self.to_string() }))).into_response()
    }
}

fn error_code(err: &FedError) -> &'static str {
    match err {
        FedError::Conform => "M_BAD_JSON",
        FedError::AuthFail => "M_FORBIDDEN",
        FedError::NotFound(_) => "M_NOT_FOUND",
        FedError::Inauthentic => "M_UNAUTHORIZED",
        FedError::Timeout => "M_TIMEOUT",
        FedError::Network(_) => "M_UNKNOWN",
        FedError::Protocol(_) => "M_BAD_JSON",
        FedError::Overload(_) => "M_LIMIT_EXCEEDED",
        FedError::Cancelled => "M_UNKNOWN",
        FedError::Internal(_) => "M_UNKNOWN",
    }
}

/// Implemented by the homeserver library; the server here only does HTTP
/// plumbing (routing, size caps, timeouts, response shaping).
#[async_trait::async_trait]
pub trait ResourceHandlers: Send + Sync + 'static {
    async fn version(&self) -> Result<Value, FedError>;
    async fn key_server(&self, keyid: String) -> Result<Value, FedError>;
    async fn key_query(&self, body: Value) -> Result<Value, FedError>;
    async fn send(&self, txn_id: String, origin: Option<String>, body: Value) -> Result<Value, FedError>;
    async fn event(&self, event_id: String) -> Result<Value, FedError>;
    async fn event_auth(&self, room_id: String, event_id: String) -> Result<Value, FedError>;
    async fn state(&self, room_id: String, event_id: Option<String>) -> Result<Value, FedError>;
    async fn state_ids(&self, room_id: String, event_id: Option<String>) -> Result<Value, FedError>;
    async fn backfill(&self, room_id: String, limit: u32, v: Vec<String>) -> Result<Value, FedError>;
    async fn make_join(&self, room_id: String, user_id: String) -> Result<Value, FedError>;
    async fn send_join(&self, room_id: String, event_id: String, body: Value) -> Result<Value, FedError>;
    async fn invite(&self, room_id: String, event_id: String, body: Value) -> Result<Value, FedError>;
    async fn query_directory(&self, room_alias: Option<String>) -> Result<Value, FedError>;
    async fn query_profile(&self, user_id: Option<String>) -> Result<Value, FedError>;
    async fn user_devices(&self, user_id: String) -> Result<Value, FedError>;
    async fn public_rooms(&self) -> Result<Value, FedError>;
}

type Handlers = Arc<dyn ResourceHandlers>;

async fn version(State(h): State<Handlers>) -> Result<Json<Value>, FedError> {
    h.version().await.map(Json)
}

async fn key_server(State(h): State<Handlers>, Path(keyid): Path<String>) -> Result<Json<Value>, FedError> {
    h.key_server(keyid).await.map(Json)
}

async fn key_query(State(h): State<Handlers>, Json(body): Json<Value>) -> Result<Json<Value>, FedError> {
    h.key_query(body).await.map(Json)
}

async fn send(
    State(h): State<Handlers>,
    Path(txn_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, FedError> {
    let origin = body.get("origin").and_then(Value::as_str).map(str::to_owned);
    h.send(txn_id, origin, body).await.map(Json)
}

async fn event(State(h): State<Handlers>, Path(event_id): Path<String>) -> Result<Json<Value>, FedError> {
    h.event(event_id).await.map(Json)
}

async fn event_auth(
    State(h): State<Handlers>,
    Path((room_id, event_id)): Path<(String, String)>,
) -> Result<Json<Value>, FedError> {
    h.event_auth(room_id, event_id).await.map(Json)
}

async fn state(
    State(h): State<Handlers>,
    Path(room_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, FedError> {
    h.state(room_id, params.get("event_id").cloned()).await.map(Json)
}

async fn state_ids(
    State(h): State<Handlers>,
    Path(room_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, FedError> {
    h.state_ids(room_id, params.get("event_id").cloned()).await.map(Json)
}

async fn backfill(
    State(h): State<Handlers>,
    Path(room_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, FedError> {
    let limit = params.get("limit").and_then(|s| s.parse().ok()).unwrap_or(100);
    let v = params.get("v").map(|s| s.split(',').map(str::to_owned).collect()).unwrap_or_default();
    h.backfill(room_id, limit, v).await.map(Json)
}

async fn make_join(
    State(h): State<Handlers>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> Result<Json<Value>, FedError> {
    h.make_join(room_id, user_id).await.map(Json)
}

async fn send_join(
    State(h): State<Handlers>,
    Path((room_id, event_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, FedError> {
    h.send_join(room_id, event_id, body).await.map(Json)
}

async fn invite(
    State(h): State<Handlers>,
    Path((room_id, event_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, FedError> {
    h.invite(room_id, event_id, body).await.map(Json)
}

async fn query(
    State(h): State<Handlers>,
    Path(kind): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, FedError> {
    match kind.as_str() {
        "directory" => h.query_directory(params.get("room_alias").cloned()).await.map(Json),
        "profile" => h.query_profile(params.get("user_id").cloned()).await.map(Json),
        _ => Err(FedError::NotFound(format!("unknown query kind {kind}"))),
    }
}

async fn user_devices(State(h): State<Handlers>, Path(user_id): Path<String>) -> Result<Json<Value>, FedError> {
    h.user_devices(user_id).await.map(Json)
}

async fn public_rooms(State(h): State<Handlers>) -> Result<Json<Value>, FedError> {
    h.public_rooms().await.map(Json)
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "errcode": "M_NOT_FOUND", "error": "unrecognized endpoint" })),
    )
}

/// Builds the router described by §6's endpoint table, with the default
/// payload cap, handler timeout, and CORS policy applied uniformly.
pub fn router(handlers: Handlers) -> Router {
    Router::new()
        .route("/_matrix/key/v2/server/:keyid", get(key_server))
        .route("/_matrix/key/v2/query", post(key_query))
        .route("/_matrix/federation/v1/version", get(version))
        .route("/_matrix/federation/v1/send/:txn_id", put(send))
        .route("/_matrix/federation/v1/event/:event_id", get(event))
        .route("/_matrix/federation/v1/event_auth/:room_id/:event_id", get(event_auth))
        .route("/_matrix/federation/v1/state/:room_id", get(state))
        .route("/_matrix/federation/v1/state_ids/:room_id", get(state_ids))
        .route("/_matrix/federation/v1/backfill/:room_id", get(backfill))
        .route("/_matrix/federation/v1/make_join/:room_id/:user_id", get(make_join))
        .route("/_matrix/federation/v1/send_join/:room_id/:event_id", put(send_join))
        .route("/_matrix/federation/v1/invite/:room_id/:event_id", put(invite))
        .route("/_matrix/federation/v1/query/:kind", get(query))
        .route("/_matrix/federation/v1/user/devices/:user_id", get(user_devices))
        .route("/_matrix/federation/v1/publicRooms", get(public_rooms))
        .fallback(not_found)
        .layer(TimeoutLayer::new(DEFAULT_HANDLER_TIMEOUT))
        .layer(RequestBodyLimitLayer::new(DEFAULT_PAYLOAD_CAP))
        .layer(CorsLayer::permissive())
        .with_state(handlers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct StubHandlers;

    #[async_trait::async_trait]
    impl ResourceHandlers for StubHandlers {
        async fn version(&self) -> Result<Value, FedError> {
            Ok(serde_json::json!({ "server": { "name": "construct", "version": "0.1.0" } }))
        }
        async fn key_server(&self, _keyid: String) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn key_query(&self, _body: Value) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn send(&self, _txn_id: String, _origin: Option<String>, _body: Value) -> Result<Value, FedError> {
            Ok(serde_json::json!({ "pdus": {} }))
        }
        async fn event(&self, event_id: String) -> Result<Value, FedError> {
            if event_id == "$missing:x" {
                Err(FedError::NotFound(event_id))
            } else {
                Ok(Value::Null)
            }
        }
        async fn event_auth(&self, _room_id: String, _event_id: String) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn state(&self, _room_id: String, _event_id: Option<String>) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn state_ids(&self, _room_id: String, _event_id: Option<String>) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn backfill(&self, _room_id: String, _limit: u32, _v: Vec<String>) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn make_join(&self, _room_id: String, _user_id: String) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn send_join(&self, _room_id: String, _event_id: String, _body: Value) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn invite(&self, _room_id: String, _event_id: String, _body: Value) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn query_directory(&self, _room_alias: Option<String>) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn query_profile(&self, _user_id: Option<String>) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn user_devices(&self, _user_id: String) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
        async fn public_rooms(&self) -> Result<Value, FedError> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn version_endpoint_serves_json() {
        let app = router(Arc::new(StubHandlers));
        let response = app
            .oneshot(Request::get("/_matrix/federation/v1/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn not_found_event_maps_to_404() {
        let app = router(Arc::new(StubHandlers));
        let response = app
            .oneshot(
                Request::get("/_matrix/federation/v1/event/$missing:x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_path_falls_through_to_the_default_handler() {
        let app = router(Arc::new(StubHandlers));
        let response = app
            .oneshot(Request::get("/not/a/real/path").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

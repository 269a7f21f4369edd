//! Operator HTTP API.
//!
//! Read-only views over sessions and chains, behind a bearer token.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::{RelayContext, Shutdown};

#[derive(Clone)]
pub struct AdminState {
    pub ctx: Arc<RelayContext>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(ctx: Arc<RelayContext>) -> Self {
        let api_key = Arc::from(ctx.config.admin.api_key.as_str());
        Self { ctx, api_key }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/devices", get(get_devices))
        .route("/admin/devices/{device_id}", get(get_device))
        .route("/admin/chains", get(get_chains))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until shutdown.
pub async fn serve_admin(
    listener: TcpListener,
    state: AdminState,
    shutdown: Arc<Shutdown>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    tracing::info!("Admin API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::MockRpc;
    use crate::blockchain::{BlockchainResult, ChainRpc, RpcConnector};
    use crate::config::{ChainConfig, RelayConfig};
    use crate::crypto::RelayIdentity;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    struct MockConnector;

    impl RpcConnector for MockConnector {
        fn connect(&self, chain: &ChainConfig) -> BlockchainResult<Arc<dyn ChainRpc>> {
            Ok(Arc::new(MockRpc::new(chain.chain_id)))
        }
    }

    fn state() -> AdminState {
        let mut config = RelayConfig::default();
        config.admin.api_key = "test-key".to_string();
        config.chains = vec![ChainConfig {
            chain_id: 84532,
            name: "base-sepolia".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            failover_urls: Vec::new(),
            contract_address: None,
        }];
        let ctx = RelayContext::build(
            config,
            RelayIdentity::generate(),
            Arc::new(MockConnector),
            Arc::new(MemoryStore::new()),
        );
        AdminState::new(Arc::new(ctx))
    }

    fn get(uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(key) = key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let app = setup_admin_router(state());
        let response = app.clone().oneshot(get("/admin/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(get("/admin/status", Some("wrong"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status_and_chains() {
        let state = state();
        let app = setup_admin_router(state.clone());

        let response = app.clone().oneshot(get("/admin/status", Some("test-key"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["status"], "operational");
        assert_eq!(body["sessions"]["devices"], 0);

        state.ctx.registry.get_provider(84532).unwrap();
        let response = app.oneshot(get("/admin/chains", Some("test-key"))).await.unwrap();
        let body = json(response).await;
        assert_eq!(body[0]["chainId"], 84532);
        assert_eq!(body[0]["connected"], true);
        assert!(body[0]["contractAddress"].is_null());
    }

    #[tokio::test]
    async fn test_devices() {
        let state = state();
        state.ctx.sessions.connect("dev-1").await;
        let app = setup_admin_router(state);

        let response = app.clone().oneshot(get("/admin/devices", Some("test-key"))).await.unwrap();
        let body = json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let response = app.clone().oneshot(get("/admin/devices/dev-1", Some("test-key"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/admin/devices/missing", Some("test-key"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

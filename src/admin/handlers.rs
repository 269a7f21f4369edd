use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use super::AdminState;
use crate::session::{DeviceStatus, SessionSummary};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub relay_public_key: String,
    pub sessions: SessionSummary,
    pub chains: usize,
    pub connected_chains: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatus {
    pub chain_id: u64,
    pub name: String,
    pub connected: bool,
    pub contract_address: Option<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let ctx = &state.ctx;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: ctx.uptime().as_secs(),
        relay_public_key: ctx.identity.public_key_hex(),
        sessions: ctx.sessions.summary().await,
        chains: ctx.registry.chain_ids().len(),
        connected_chains: ctx.registry.cached_count(),
    })
}

pub async fn get_devices(State(state): State<AdminState>) -> Json<Vec<DeviceStatus>> {
    Json(state.ctx.sessions.list_devices().await)
}

pub async fn get_device(
    State(state): State<AdminState>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceStatus>, StatusCode> {
    state
        .ctx
        .sessions
        .device_status(&device_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_chains(State(state): State<AdminState>) -> Json<Vec<ChainStatus>> {
    let registry = &state.ctx.registry;
    let chains = registry
        .chain_ids()
        .into_iter()
        .filter_map(|chain_id| {
            let config = registry.chain_config(chain_id)?;
            Some(ChainStatus {
                chain_id,
                name: config.name.clone(),
                connected: registry.is_cached(chain_id),
                contract_address: config.contract_address.clone(),
            })
        })
        .collect();
    Json(chains)
}

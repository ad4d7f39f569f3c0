use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use ixp_gate_domain::model::IxpId;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct IxpStatusView {
    pub ixp_id: String,
    pub status: String,
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IxpStatusResponse {
    pub ixps: Vec<IxpStatusView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrioritizeRequest {
    pub ixp_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrioritizeResponse {
    pub ixp_ids: Vec<String>,
}

pub async fn ixp_status_handler(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.status().snapshot();
    let mut ixps: Vec<IxpStatusView> = snapshot
        .entries()
        .map(|entry| IxpStatusView {
            ixp_id: entry.ixp_id.as_str().to_string(),
            status: entry.status.to_string(),
            observed_at: entry.observed_at,
        })
        .collect();
    ixps.sort_by(|left, right| left.ixp_id.cmp(&right.ixp_id));
    HttpResponse::Ok().json(IxpStatusResponse { ixps })
}

pub async fn prioritize_handler(
    state: web::Data<AppState>,
    payload: web::Json<PrioritizeRequest>,
) -> Result<HttpResponse, ApiError> {
    let candidates = payload
        .ixp_ids
        .iter()
        .map(|raw| IxpId::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let ranked = state.admission().prioritize(&candidates);
    Ok(HttpResponse::Ok().json(PrioritizeResponse {
        ixp_ids: ranked.into_iter().map(IxpId::into_inner).collect(),
    }))
}

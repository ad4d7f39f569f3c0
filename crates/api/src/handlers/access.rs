use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use ixp_gate_domain::model::{AccessRecord, NetworkId};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessRequest {
    pub network_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessResponse {
    pub network_id: String,
    pub state: String,
    pub last_transition_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl From<AccessRecord> for AccessResponse {
    fn from(record: AccessRecord) -> Self {
        Self {
            network_id: record.network_id.into_inner(),
            state: record.state.as_ref().to_string(),
            last_transition_at: record.last_transition_at,
            lease_expires_at: record.lease_expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub network_id: String,
    pub released: bool,
}

pub async fn access_handler(
    state: web::Data<AppState>,
    payload: web::Json<AccessRequest>,
) -> Result<HttpResponse, ApiError> {
    let network_id = NetworkId::parse(&payload.network_id)?;
    let record = state.admission().access(&network_id).await?;
    Ok(HttpResponse::Ok().json(AccessResponse::from(record)))
}

pub async fn release_access_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let network_id = NetworkId::parse(&path.into_inner())?;
    let released = state.admission().release(&network_id).await?;
    Ok(HttpResponse::Ok().json(ReleaseResponse {
        network_id: network_id.into_inner(),
        released,
    }))
}

pub async fn access_status_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let network_id = NetworkId::parse(&path.into_inner())?;
    match state.admission().status(&network_id).await? {
        Some(record) => {
            counter!("api_access_lookups_total", "status" => "found").increment(1);
            Ok(HttpResponse::Ok().json(AccessResponse::from(record)))
        }
        None => {
            counter!("api_access_lookups_total", "status" => "not_found").increment(1);
            Err(ApiError::NotFound)
        }
    }
}

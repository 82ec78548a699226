//! Metric update and read routes.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    routing::{get, post},
};
use metrics_model::{MetricRecord, MetricType};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::error::Error;

const APPLICATION_JSON: &str = "application/json";

/// Create the metrics router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/update/{kind}/{name}/{value}", post(update_by_path))
        .route("/value/{kind}/{name}", get(value_by_path))
        .route("/update/", post(update_json))
        .route("/value/", post(value_json))
        .route("/updates/", post(update_batch))
}

/// `POST /update/{kind}/{name}/{value}`
async fn update_by_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    match kind.parse::<MetricType>()? {
        MetricType::Gauge => {
            let value = value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ApiError::bad_request("Wrong float value"))?;
            state.store.update_gauge(&name, value).await?;
        }
        MetricType::Counter => {
            let delta: i64 = value
                .parse()
                .map_err(|_| ApiError::bad_request("Wrong integer value"))?;
            state.store.increment_counter(&name, delta).await?;
        }
        MetricType::Unknown => return Err(ApiError::bad_request("Wrong metric type")),
    }
    Ok(StatusCode::OK)
}

/// `GET /value/{kind}/{name}`, plain-text value.
async fn value_by_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<String> {
    let kind = kind
        .parse::<MetricType>()
        .map_err(|_| ApiError::not_found("Wrong metric type"))?;
    match kind {
        MetricType::Gauge => Ok(state.store.get_gauge(&name).await?.to_string()),
        MetricType::Counter => Ok(state.store.get_counter(&name).await?.to_string()),
        MetricType::Unknown => Err(ApiError::not_found("Wrong metric type")),
    }
}

/// `POST /update/`, responds with the stored value after the update.
async fn update_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<MetricRecord>> {
    let mut record: MetricRecord = parse_json(&headers, &body)?;
    if record.id.is_empty() {
        return Err(ApiError::bad_request("Metric id is required"));
    }

    match record.mtype {
        MetricType::Gauge => {
            let value = record
                .value
                .ok_or_else(|| ApiError::bad_request("Provide value field for update"))?;
            state.store.update_gauge(&record.id, value).await?;
            record.value = Some(read_back(state.store.get_gauge(&record.id).await, value)?);
        }
        MetricType::Counter => {
            let delta = record
                .delta
                .ok_or_else(|| ApiError::bad_request("Provide delta field for increment"))?;
            state.store.increment_counter(&record.id, delta).await?;
            record.delta = Some(read_back(state.store.get_counter(&record.id).await, delta)?);
        }
        MetricType::Unknown => return Err(ApiError::bad_request("Wrong metric type")),
    }

    Ok(Json(record))
}

/// `POST /value/`, fills in the current value of the queried metric.
async fn value_json(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<MetricRecord>> {
    let mut record: MetricRecord = parse_json(&headers, &body)?;

    match record.mtype {
        MetricType::Gauge => {
            record.value = Some(state.store.get_gauge(&record.id).await?);
            record.delta = None;
        }
        MetricType::Counter => {
            record.delta = Some(state.store.get_counter(&record.id).await?);
            record.value = None;
        }
        MetricType::Unknown => return Err(ApiError::bad_request("Wrong metric type")),
    }

    Ok(Json(record))
}

/// `POST /updates/`, applies a batch; invalid records are skipped.
async fn update_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let records: Vec<MetricRecord> = parse_json(&headers, &body)?;
    debug!(count = records.len(), "Applying metric batch");
    state.store.bulk_apply(&records).await?;
    Ok(StatusCode::OK)
}

fn parse_json<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8]) -> ApiResult<T> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(APPLICATION_JSON));
    if !is_json {
        return Err(ApiError::bad_request(
            "Wrong Content-Type, use application/json",
        ));
    }

    serde_json::from_slice(body).map_err(|e| ApiError::from(Error::Serialization(e)))
}

/// The stored value after a write, or the written value when the backend
/// accepted the write without keeping it.
fn read_back<T>(stored: crate::Result<T>, written: T) -> ApiResult<T> {
    match stored {
        Ok(value) => Ok(value),
        Err(e) if e.is_not_found() => Ok(written),
        Err(e) => Err(e.into()),
    }
}

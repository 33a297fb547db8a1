//! HTTP route handlers

pub mod health;
pub mod issues;
pub mod notifications;

pub use health::health_check;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::{self, Actor};
use crate::server::response::{error_response, json_response};
use crate::server::AppState;
use crate::types::{PulseError, Result};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Render a handler result, logging server-side failures
fn respond<T: Serialize>(status: StatusCode, result: Result<T>) -> Response<Full<Bytes>> {
    match result {
        Ok(body) => json_response(status, &body),
        Err(err) => {
            if err.status_code().is_server_error() {
                warn!(code = err.code(), "Request failed: {}", err);
            } else {
                debug!(code = err.code(), "Request rejected: {}", err);
            }
            error_response(&err)
        }
    }
}

fn actor(req: &Request<Incoming>, state: &AppState) -> Result<Actor> {
    let header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok());
    auth::authenticate(&state.jwt, header)
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| PulseError::BadRequest(format!("Invalid body: {}", e)))?
        .to_bytes();

    if body.len() > MAX_BODY_BYTES {
        return Err(PulseError::BadRequest("Request body too large".into()));
    }
    Ok(serde_json::from_slice(&body)?)
}

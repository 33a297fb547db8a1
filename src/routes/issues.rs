//! Issue endpoints
//!
//! - `POST /api/issues` - report an issue
//! - `GET /api/issues/{id}` - read the aggregate
//! - `POST /api/issues/{id}/verifications` - `{rating, comment?}`
//! - `POST /api/issues/{id}/like` - toggle the caller's like
//! - `PUT /api/issues/{id}/status` - `{status}`, officials and admins only

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{actor, read_json, respond};
use crate::auth::Role;
use crate::db::schemas::{IssueStatus, IssueSummary, NewIssue};
use crate::server::AppState;
use crate::types::PulseError;

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub rating: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub issue: IssueSummary,
    pub previous_status: IssueStatus,
    pub status_changed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub liked: bool,
    pub like_count: u32,
}

pub async fn create(req: Request<Incoming>, state: &AppState) -> Response<Full<Bytes>> {
    let result = async {
        let actor = actor(&req, state)?;
        let mut input: NewIssue = read_json(req).await?;
        input.created_by = actor.user_id;
        let issue = state.engine.create_issue(input).await?;
        Ok::<_, PulseError>(issue.summary())
    }
    .await;
    respond(StatusCode::CREATED, result)
}

pub async fn get(state: &AppState, issue_id: &str) -> Response<Full<Bytes>> {
    let result = state
        .engine
        .get_issue(issue_id)
        .await
        .map(|issue| issue.summary());
    respond(StatusCode::OK, result)
}

pub async fn verify(
    req: Request<Incoming>,
    state: &AppState,
    issue_id: &str,
) -> Response<Full<Bytes>> {
    let result = async {
        let actor = actor(&req, state)?;
        let body: VerifyRequest = read_json(req).await?;
        let outcome = state
            .engine
            .add_verification(issue_id, &actor.user_id, body.rating, body.comment)
            .await?;
        Ok::<_, PulseError>(VerifyResponse {
            status_changed: outcome.status_changed(),
            previous_status: outcome.previous_status,
            issue: outcome.issue.summary(),
        })
    }
    .await;
    respond(StatusCode::CREATED, result)
}

pub async fn like(
    req: Request<Incoming>,
    state: &AppState,
    issue_id: &str,
) -> Response<Full<Bytes>> {
    let result = async {
        let actor = actor(&req, state)?;
        let outcome = state.engine.toggle_like(issue_id, &actor.user_id).await?;
        Ok::<_, PulseError>(LikeResponse {
            liked: outcome.liked,
            like_count: outcome.like_count,
        })
    }
    .await;
    respond(StatusCode::OK, result)
}

pub async fn set_status(
    req: Request<Incoming>,
    state: &AppState,
    issue_id: &str,
) -> Response<Full<Bytes>> {
    let result = async {
        let actor = actor(&req, state)?;
        actor.require(Role::Official)?;
        let body: StatusRequest = read_json(req).await?;
        let issue = state
            .engine
            .set_status(issue_id, &body.status, &actor.user_id)
            .await?;
        Ok::<_, PulseError>(issue.summary())
    }
    .await;
    respond(StatusCode::OK, result)
}

//! HTTP-shaped entry points.
//!
//! No server lives here: [`Routes::dispatch`] maps a method, path and body
//! to a status code and JSON body, and any transport can sit in front.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{HandlerError, JobError};
use crate::handler::{CacheCheck, RenderRequestHandler};
use crate::jobs::{JobBoard, DEFAULT_PRIORITY};
use crate::request::RawRequest;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteResponse {
    pub status: u16,
    pub body: Value,
}

impl RouteResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self { status, body: json!({ "error": message.into() }) }
    }
}

impl From<HandlerError> for RouteResponse {
    fn from(e: HandlerError) -> Self {
        let mut response = RouteResponse::error(e.status_code(), e.to_string());
        if let Some(field) = e.field() {
            response.body["field"] = json!(field);
        }
        response
    }
}

impl From<JobError> for RouteResponse {
    fn from(e: JobError) -> Self {
        HandlerError::from(e).into()
    }
}

pub struct Routes {
    handler: Arc<RenderRequestHandler>,
    jobs: Arc<JobBoard>,
}

impl Routes {
    pub fn new(handler: Arc<RenderRequestHandler>, jobs: Arc<JobBoard>) -> Self {
        Self { handler, jobs }
    }

    pub fn dispatch(&self, method: &str, path: &str, body: &str) -> RouteResponse {
        debug!(method, path, "dispatch");
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let response = match (method, segments.as_slice()) {
            ("POST", ["render"]) => self.post_render(body),
            ("GET", ["job", id, "status"]) => self.job_status(id),
            ("GET", ["job", id, "result"]) => self.job_result(id),
            ("DELETE", ["job", id]) => self.job_cancel(id),
            (_, ["render"]) | (_, ["job", _, "status" | "result"]) | (_, ["job", _]) => {
                Err(RouteResponse::error(405, format!("method {method} not allowed on {path}")))
            }
            _ => Err(RouteResponse::error(404, format!("no route for {path}"))),
        };
        response.unwrap_or_else(|e| e)
    }

    /// Cached or small scores render inline; larger ones are queued.
    fn post_render(&self, body: &str) -> Result<RouteResponse, RouteResponse> {
        let raw = RawRequest::from_json(body).map_err(HandlerError::from)?;
        let prepared = match self.handler.check_cache(&raw)? {
            CacheCheck::Hit(envelope) => return Ok(RouteResponse::ok(envelope.summary())),
            CacheCheck::Miss(prepared) => prepared,
        };

        if prepared.score.measure_count() <= self.handler.config().sync_measure_limit {
            let envelope = self.handler.render_prepared(&prepared, &Default::default())?;
            return Ok(RouteResponse::ok(envelope.summary()));
        }

        let priority = raw.priority.unwrap_or(DEFAULT_PRIORITY);
        let handle = self.jobs.submit_prepared(raw.job_id, prepared, priority)?;
        Ok(RouteResponse {
            status: 202,
            body: json!({ "jobId": handle.job_id, "status": handle.status }),
        })
    }

    fn job_status(&self, id: &str) -> Result<RouteResponse, RouteResponse> {
        let snapshot = self.jobs.status(id)?;
        Ok(RouteResponse::ok(json!(snapshot)))
    }

    fn job_result(&self, id: &str) -> Result<RouteResponse, RouteResponse> {
        let envelope = self.jobs.result(id)?;
        Ok(RouteResponse::ok(envelope.summary()))
    }

    fn job_cancel(&self, id: &str) -> Result<RouteResponse, RouteResponse> {
        let status = self.jobs.cancel(id)?;
        Ok(RouteResponse::ok(json!({ "jobId": id, "status": status })))
    }
}

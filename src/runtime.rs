// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Serverless entrypoint.
//!
//! A function runtime hands us one JSON event. Queue batches go to the
//! dispatcher; HTTP events run through the same router as the long-running
//! server. [`RuntimeApi`] pulls events from the host's runtime API and posts
//! the results back.

use crate::routes::create_router;
use crate::services::dispatcher::{BatchSummary, DispatchError};
use crate::services::QueueRecord;
use crate::AppState;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, Request};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_body_util::BodyExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use tracing::Instrument;

const QUEUE_EVENT_SOURCE: &str = "aws:sqs";

const RUNTIME_API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";
const ERROR_TYPE_HEADER: &str = "lambda-runtime-function-error-type";

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("unrecognized event shape")]
    UnknownEvent,

    #[error("invalid HTTP event: {0}")]
    InvalidHttpEvent(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("router failed: {0}")]
    Router(String),

    #[error("runtime API: {0}")]
    Transport(String),
}

impl RuntimeError {
    /// Short name reported to the runtime API.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::UnknownEvent => "UnknownEvent",
            RuntimeError::InvalidHttpEvent(_) => "InvalidHttpEvent",
            RuntimeError::Dispatch(_) => "DispatchError",
            RuntimeError::Router(_) => "RouterError",
            RuntimeError::Transport(_) => "TransportError",
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueueEvent {
    #[serde(rename = "Records")]
    records: Vec<QueueEventRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueEventRecord {
    message_id: String,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpEvent {
    request_context: HttpRequestContext,
    raw_path: String,
    #[serde(default)]
    raw_query_string: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    is_base64_encoded: bool,
}

#[derive(Debug, Deserialize)]
struct HttpRequestContext {
    http: HttpDescription,
}

#[derive(Debug, Deserialize)]
struct HttpDescription {
    method: String,
}

/// Handle one runtime event and produce the runtime's response value.
pub async fn dispatch_event(state: Arc<AppState>, event: Value) -> Result<Value, RuntimeError> {
    if is_queue_event(&event) {
        let batch: QueueEvent =
            serde_json::from_value(event).map_err(|_| RuntimeError::UnknownEvent)?;
        let summary = dispatch_queue(&state, batch).await?;
        return Ok(json!({
            "handled": summary.handled,
            "discarded": summary.discarded,
        }));
    }

    if event.pointer("/requestContext/http/method").is_some() {
        let http: HttpEvent = serde_json::from_value(event)
            .map_err(|e| RuntimeError::InvalidHttpEvent(e.to_string()))?;
        return dispatch_http(state, http).await;
    }

    tracing::warn!("Rejecting unrecognized runtime event");
    Err(RuntimeError::UnknownEvent)
}

fn is_queue_event(event: &Value) -> bool {
    match event.get("Records").and_then(Value::as_array) {
        Some(records) => records.iter().all(|r| {
            r.get("eventSource").and_then(Value::as_str) == Some(QUEUE_EVENT_SOURCE)
        }),
        None => false,
    }
}

async fn dispatch_queue(
    state: &AppState,
    batch: QueueEvent,
) -> Result<BatchSummary, DispatchError> {
    let records: Vec<QueueRecord> = batch
        .records
        .into_iter()
        .map(|r| QueueRecord {
            message_id: r.message_id,
            body: r.body,
        })
        .collect();

    tracing::info!(count = records.len(), "Dispatching queue batch");
    state.dispatcher.dispatch_batch(&records).await
}

async fn dispatch_http(state: Arc<AppState>, event: HttpEvent) -> Result<Value, RuntimeError> {
    let request = build_request(event)?;
    let response = create_router(state)
        .oneshot(request)
        .await
        .map_err(|e| RuntimeError::Router(e.to_string()))?;

    let (parts, body) = response.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| RuntimeError::Router(e.to_string()))?
        .to_bytes();

    let mut headers = Map::new();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), Value::String(value.to_string()));
        }
    }

    let (body, is_base64_encoded) = match String::from_utf8(bytes.to_vec()) {
        Ok(text) => (text, false),
        Err(_) => (STANDARD.encode(&bytes), true),
    };

    Ok(json!({
        "statusCode": parts.status.as_u16(),
        "headers": headers,
        "body": body,
        "isBase64Encoded": is_base64_encoded,
    }))
}

fn build_request(event: HttpEvent) -> Result<Request<Body>, RuntimeError> {
    let method = Method::from_bytes(event.request_context.http.method.as_bytes())
        .map_err(|e| RuntimeError::InvalidHttpEvent(e.to_string()))?;

    let uri = if event.raw_query_string.is_empty() {
        event.raw_path
    } else {
        format!("{}?{}", event.raw_path, event.raw_query_string)
    };

    let body = match event.body {
        Some(body) if event.is_base64_encoded => STANDARD
            .decode(body.as_bytes())
            .map_err(|e| RuntimeError::InvalidHttpEvent(e.to_string()))?,
        Some(body) => body.into_bytes(),
        None => Vec::new(),
    };

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body))
        .map_err(|e| RuntimeError::InvalidHttpEvent(e.to_string()))?;

    let headers = request.headers_mut();
    for (name, value) in event.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RuntimeError::InvalidHttpEvent(e.to_string()))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| RuntimeError::InvalidHttpEvent(e.to_string()))?;
        headers.append(name, value);
    }

    Ok(request)
}

/// One event handed out by the runtime API.
#[derive(Debug)]
pub struct Invocation {
    pub request_id: String,
    pub event: Value,
}

/// Client for the function host's runtime API.
#[derive(Clone)]
pub struct RuntimeApi {
    client: reqwest::Client,
    base_url: String,
}

impl RuntimeApi {
    /// `endpoint` is the `host:port` the host exports in
    /// `AWS_LAMBDA_RUNTIME_API`.
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!(
                "http://{}/{}/runtime",
                endpoint.trim_end_matches('/'),
                RUNTIME_API_VERSION
            ),
        }
    }

    /// Long-poll for the next event.
    pub async fn next_invocation(&self) -> Result<Invocation, RuntimeError> {
        let response = self
            .client
            .get(format!("{}/invocation/next", self.base_url))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(transport)?;

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| RuntimeError::Transport("invocation without request id".to_string()))?;
        let event = response.json().await.map_err(transport)?;

        Ok(Invocation { request_id, event })
    }

    pub async fn respond(&self, request_id: &str, body: &Value) -> Result<(), RuntimeError> {
        self.client
            .post(format!("{}/invocation/{}/response", self.base_url, request_id))
            .json(body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(transport)?;
        Ok(())
    }

    pub async fn report_error(
        &self,
        request_id: &str,
        err: &RuntimeError,
    ) -> Result<(), RuntimeError> {
        self.client
            .post(format!("{}/invocation/{}/error", self.base_url, request_id))
            .header(ERROR_TYPE_HEADER, "Unhandled")
            .json(&json!({
                "errorMessage": err.to_string(),
                "errorType": err.kind(),
            }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(transport)?;
        Ok(())
    }
}

fn transport(e: reqwest::Error) -> RuntimeError {
    RuntimeError::Transport(e.to_string())
}

/// Take one event from the runtime API, handle it and report the result.
///
/// Handler failures are reported to the runtime API (which redelivers queue
/// batches); only runtime API failures are returned.
pub async fn handle_next(state: Arc<AppState>, api: &RuntimeApi) -> Result<(), RuntimeError> {
    let Invocation { request_id, event } = api.next_invocation().await?;
    let span = tracing::info_span!("invocation", request_id = %request_id);

    async move {
        match dispatch_event(state, event).await {
            Ok(body) => api.respond(&request_id, &body).await,
            Err(e) => {
                tracing::error!(error = %e, kind = e.kind(), "Invocation failed");
                api.report_error(&request_id, &e).await
            }
        }
    }
    .instrument(span)
    .await
}

/// Serve events until the runtime API fails.
pub async fn run(state: Arc<AppState>, api: RuntimeApi) -> Result<(), RuntimeError> {
    loop {
        handle_next(state.clone(), &api).await?;
    }
}

//! Typed handlers over axum.
//!
//! A [`Handler`] declares its request and response types; [`serve`] binds the
//! transport input into the request, runs the handler and renders either the
//! response or a [`ServiceError`] envelope.
//!
//! Inputs are merged in a fixed order: JSON body, path parameters, query
//! parameters, headers. A later source only fills a field that is still unset
//! (or `null`). Header names are lower-cased with `-` replaced by `_`, so
//! `X-Client-Version` binds to `x_client_version`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::extract::rejection::RawPathParamsRejection;
use axum::extract::{FromRequestParts, Query, RawPathParams, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{self, MethodRouter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use bastion_core::ServiceError;

use crate::app::errors::{classify, render};
use crate::context::RequestContext;

/// Largest JSON body the adapter will buffer.
pub const BODY_LIMIT: usize = 4 * 1024 * 1024;

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: ApiResponse + Send + 'static;

    /// Return a `ServiceError` (optionally wrapped in context) to choose the
    /// client-visible failure; any other error is rendered as internal.
    async fn handle(&self, ctx: RequestContext, request: Self::Request)
    -> anyhow::Result<Self::Response>;
}

/// A serializable handler result.
pub trait ApiResponse: Serialize {
    fn status(&self) -> StatusCode {
        StatusCode::OK
    }
}

/// Responds `201 Created` with the wrapped body.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Created<T>(pub T);

impl<T: Serialize> ApiResponse for Created<T> {
    fn status(&self) -> StatusCode {
        StatusCode::CREATED
    }
}

/// Mount `handler` for GET.
pub fn get<H, S>(handler: H) -> MethodRouter<S>
where
    H: Handler,
    S: Clone + Send + Sync + 'static,
{
    routing::get(serve::<H>).with_state(Arc::new(handler))
}

/// Mount `handler` for POST.
pub fn post<H, S>(handler: H) -> MethodRouter<S>
where
    H: Handler,
    S: Clone + Send + Sync + 'static,
{
    routing::post(serve::<H>).with_state(Arc::new(handler))
}

pub async fn serve<H: Handler>(State(handler): State<Arc<H>>, req: Request) -> Response {
    let ctx = RequestContext::from_extensions(req.extensions());

    let request = match bind_request::<H::Request>(req).await {
        Ok(request) => request,
        Err(err) => return render(err),
    };

    match handler.handle(ctx, request).await {
        Ok(response) => (response.status(), Json(response)).into_response(),
        Err(err) => render(classify(err)),
    }
}

/// Merge every input source of `req` and deserialize the result into `T`.
pub async fn bind_request<T: DeserializeOwned>(req: Request) -> Result<T, ServiceError> {
    let (mut parts, body) = req.into_parts();
    let mut fields = Map::new();

    if is_json(&parts.headers) {
        let bytes = axum::body::to_bytes(body, BODY_LIMIT)
            .await
            .map_err(|e| ServiceError::validation("Invalid request body").with_cause(e))?;

        if !bytes.is_empty() {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(object)) => fields = object,
                Ok(_) => {
                    return Err(ServiceError::validation("Invalid request body")
                        .with_detail("reason", "expected a JSON object"));
                }
                Err(e) => {
                    return Err(ServiceError::validation("Invalid request body")
                        .with_detail("reason", e.to_string()));
                }
            }
        }
    }

    for (key, value) in path_params(&mut parts).await? {
        fill(&mut fields, key, value);
    }

    let query = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri).map_err(|e| {
        ServiceError::validation("Invalid request").with_detail("reason", e.body_text())
    })?;
    for (key, value) in query.0 {
        fill(&mut fields, key, value);
    }

    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            fill(&mut fields, header_field(name.as_str()), value.to_string());
        }
    }

    serde_json::from_value(Value::Object(fields)).map_err(|e| {
        ServiceError::validation("Invalid request").with_detail("reason", e.to_string())
    })
}

async fn path_params(parts: &mut Parts) -> Result<Vec<(String, String)>, ServiceError> {
    match RawPathParams::from_request_parts(parts, &()).await {
        Ok(params) => Ok(params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()),
        Err(RawPathParamsRejection::MissingPathParams(_)) => Ok(Vec::new()),
        Err(e) => Err(ServiceError::validation("Invalid request").with_detail("reason", e.body_text())),
    }
}

fn fill(fields: &mut Map<String, Value>, key: String, value: String) {
    match fields.get(&key) {
        None | Some(Value::Null) => {
            fields.insert(key, Value::String(value));
        }
        Some(_) => {}
    }
}

fn header_field(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "_")
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
        })
        .unwrap_or(false)
}

/// Field deserializers for values that may arrive as strings.
pub mod bind {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::Deserialize;
    use serde::de::{self, Deserializer};

    /// Accept either the native JSON value or its string form, so a field
    /// binds the same from a body, a path segment, the query or a header.
    pub fn from_str_or_native<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr + Deserialize<'de>,
        T::Err: Display,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw<T> {
            Text(String),
            Native(T),
        }

        match Raw::<T>::deserialize(deserializer)? {
            Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
            Raw::Native(value) => Ok(value),
        }
    }
}

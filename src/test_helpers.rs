//! Test helpers for standing in for cloud HTTP endpoints
//!
//! [`FakeCloud`] serves canned responses on a local port and records every
//! request it receives, so the STS, Google, S3 and SQS clients can be
//! exercised end to end without network access.

#![cfg(test)]

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A request captured by the fake endpoint
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Decode an `application/x-www-form-urlencoded` body
    pub fn form(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .into_owned()
            .collect()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Clone)]
struct Route {
    method: String,
    path: String,
    needle: Option<String>,
    status: u16,
    content_type: &'static str,
    body: String,
}

struct FakeState {
    routes: Vec<Route>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Builder for a [`FakeCloud`]; the first matching route wins
#[derive(Default)]
pub struct FakeCloudBuilder {
    routes: Vec<Route>,
}

impl FakeCloudBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method path` with an XML body
    pub fn xml(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.add(method, path, None, status, "text/xml", body)
    }

    /// Answer `method path` with a JSON body
    pub fn json(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.add(method, path, None, status, "application/json", body)
    }

    /// Answer `method path` with XML only when the query or body contains `needle`
    pub fn xml_when(self, method: &str, path: &str, needle: &str, status: u16, body: &str) -> Self {
        self.add(method, path, Some(needle), status, "text/xml", body)
    }

    fn add(
        mut self,
        method: &str,
        path: &str,
        needle: Option<&str>,
        status: u16,
        content_type: &'static str,
        body: &str,
    ) -> Self {
        self.routes.push(Route {
            method: method.to_uppercase(),
            path: path.to_string(),
            needle: needle.map(str::to_string),
            status,
            content_type,
            body: body.to_string(),
        });
        self
    }

    pub async fn start(self) -> FakeCloud {
        let state = Arc::new(FakeState {
            routes: self.routes,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake cloud listener");
        let addr = listener.local_addr().expect("Fake cloud has no local address");

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        FakeCloud {
            base_url: format!("http://{}", addr),
            state,
        }
    }
}

/// Local HTTP endpoint serving canned cloud responses
pub struct FakeCloud {
    pub base_url: String,
    state: Arc<FakeState>,
}

impl FakeCloud {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }
}

async fn handle(
    State(state): State<Arc<FakeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        headers: headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_lowercase(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
        body,
    };

    let route = state
        .routes
        .iter()
        .find(|route| {
            route.method == request.method
                && route.path == request.path
                && route.needle.as_ref().is_none_or(|needle| {
                    request.query.contains(needle.as_str()) || request.body.contains(needle.as_str())
                })
        })
        .cloned();

    state.requests.lock().unwrap().push(request);

    match route {
        Some(route) => (
            StatusCode::from_u16(route.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            [(header::CONTENT_TYPE, route.content_type)],
            route.body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "no canned response").into_response(),
    }
}

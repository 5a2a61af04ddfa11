//! reqwest-backed [`Transport`]

use std::time::Duration;

use async_trait::async_trait;
use camp_core::types::Method;
use camp_core::{CampError, CampResult};
use serde_json::Value;

use crate::platform::{HttpRequest, HttpResponse, Transport};

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> CampResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CampError::Config(format!("building HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> CampResult<HttpResponse> {
        let mut builder = self.client.request(reqwest_method(request.method), &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = if request.method.uses_query() {
                builder.query(&query_pairs(body)?)
            } else {
                builder.json(body)
            };
        }

        let response = builder.send().await.map_err(|e| {
            CampError::Transport(format!("{} {}: {e}", request.method, request.url))
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CampError::Transport(format!("reading response body: {e}")))?;

        match serde_json::from_str::<Value>(&text) {
            Ok(body) => Ok(HttpResponse {
                status: status.as_u16(),
                body,
            }),
            Err(_) if !status.is_success() => Err(CampError::Transport(format!(
                "{} {} returned HTTP {status}",
                request.method, request.url
            ))),
            Err(e) => Err(CampError::Decode(format!("response is not JSON: {e}"))),
        }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

/// Flatten an object body into query pairs. Strings are sent bare, other
/// values as their JSON text; nulls are skipped.
pub(crate) fn query_pairs(body: &Value) -> CampResult<Vec<(String, String)>> {
    match body {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect()),
        other => Err(CampError::Transport(format!(
            "query requests need an object body, got {other}"
        ))),
    }
}

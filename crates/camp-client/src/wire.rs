//! Plaintext request layer shared by the dispatcher, credential manager
//! and key cache. It does not touch the in-flight registry.

use std::sync::Arc;

use camp_core::config::ApiConfig;
use camp_core::types::{Method, ResponseEnvelope};
use camp_core::{CampError, CampResult};
use serde_json::Value;

use crate::platform::{Headers, HttpRequest, Transport};

pub struct WireClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    platform: String,
}

impl WireClient {
    pub fn new(transport: Arc<dyn Transport>, api: &ApiConfig) -> Self {
        Self {
            transport,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            platform: api.platform.clone(),
        }
    }

    /// Absolute URL for `path`. Absolute inputs pass through.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Build a request carrying the base headers, then `extra` on top.
    pub fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        extra: &Headers,
    ) -> HttpRequest {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");
        headers.insert("platform", self.platform.as_str());
        headers.extend(extra);
        HttpRequest {
            method,
            url: self.url(path),
            headers,
            body,
        }
    }

    /// Send and parse the `{code, data, msg, compressed?}` envelope.
    pub async fn send(&self, request: HttpRequest) -> CampResult<ResponseEnvelope> {
        let response = self.transport.send(request).await?;
        serde_json::from_value(response.body).map_err(|e| {
            CampError::Decode(format!(
                "unexpected response shape (HTTP {}): {e}",
                response.status
            ))
        })
    }

    pub async fn get(&self, path: &str, query: Value) -> CampResult<ResponseEnvelope> {
        let request = self.request(Method::Get, path, Some(query), &Headers::new());
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HttpResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct Echo {
        seen: Mutex<Vec<HttpRequest>>,
        reply: Value,
    }

    #[async_trait]
    impl Transport for Echo {
        async fn send(&self, request: HttpRequest) -> CampResult<HttpResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: 200,
                body: self.reply.clone(),
            })
        }
    }

    fn client(reply: Value) -> (Arc<Echo>, WireClient) {
        let echo = Arc::new(Echo {
            seen: Mutex::new(Vec::new()),
            reply,
        });
        let api = ApiConfig {
            base_url: "https://api.example.com/".into(),
            ..ApiConfig::default()
        };
        (echo.clone(), WireClient::new(echo, &api))
    }

    #[test]
    fn joins_urls() {
        let (_, wire) = client(Value::Null);
        assert_eq!(wire.url("/api/x"), "https://api.example.com/api/x");
        assert_eq!(wire.url("api/x"), "https://api.example.com/api/x");
        assert_eq!(wire.url("https://cdn.example.com/a"), "https://cdn.example.com/a");
    }

    #[tokio::test]
    async fn get_sends_platform_header_and_parses_envelope() {
        let (echo, wire) = client(json!({"code": 0, "data": {"a": 1}, "msg": "ok"}));
        let envelope = wire.get("/api/ping", json!({"id": "1"})).await.unwrap();
        assert_eq!(envelope.code, 0);
        assert_eq!(envelope.data, json!({"a": 1}));

        let seen = echo.seen.lock().unwrap();
        assert_eq!(seen[0].headers.get("platform"), Some("mp-weixin"));
        assert_eq!(seen[0].method, Method::Get);
        assert_eq!(seen[0].body, Some(json!({"id": "1"})));
    }

    #[tokio::test]
    async fn non_envelope_body_is_decode_error() {
        let (_, wire) = client(json!(["not", "an", "envelope"]));
        let err = wire.get("/api/ping", json!({})).await.unwrap_err();
        assert!(matches!(err, CampError::Decode(_)));
    }
}

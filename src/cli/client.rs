use anyhow::{anyhow, Context};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

/// Thin HTTP client for the gate server
pub struct GateClient {
    http: Client,
    base: Url,
    token: Option<String>,
}

/// Status and parsed JSON body of a gate response
#[derive(Debug)]
pub struct GateResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl GateResponse {
    /// Payload inside the `{ success, data }` envelope, or the whole body
    pub fn data(&self) -> &Value {
        self.body.get("data").unwrap_or(&self.body)
    }

    pub fn error_message(&self) -> String {
        self.body
            .get("message")
            .or_else(|| self.body.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.status.to_string())
    }
}

impl GateClient {
    pub fn new(server: &str, token: Option<String>) -> anyhow::Result<Self> {
        let base = Url::parse(server).with_context(|| format!("invalid server URL '{}'", server))?;
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { http, base, token })
    }

    fn request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let url = self.base.join(path)?;
        let builder = self.http.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder) -> anyhow::Result<GateResponse> {
        let response = builder
            .send()
            .await
            .map_err(|e| anyhow!("gate server unreachable: {}", e))?;
        let status = response.status();
        let text = response.text().await?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(GateResponse { status, body })
    }

    pub async fn resolve(&self, role: Option<&str>) -> anyhow::Result<GateResponse> {
        let mut builder = self.request(Method::GET, "/api/session/resolve")?;
        if let Some(role) = role {
            builder = builder.query(&[("role", role)]);
        }
        self.send(builder).await
    }

    pub async fn landing(&self) -> anyhow::Result<GateResponse> {
        self.send(self.request(Method::GET, "/api/session/landing")?).await
    }

    pub async fn choose_role(&self, role: &str) -> anyhow::Result<GateResponse> {
        let builder = self
            .request(Method::POST, "/functions/set-role")?
            .json(&json!({ "role": role }));
        self.send(builder).await
    }

    pub async fn sign_out(&self) -> anyhow::Result<GateResponse> {
        self.send(self.request(Method::DELETE, "/api/session")?).await
    }

    pub async fn health(&self) -> anyhow::Result<GateResponse> {
        self.send(self.request(Method::GET, "/health")?).await
    }
}

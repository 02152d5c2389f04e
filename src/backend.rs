use crate::config::Config;
use crate::step::{
    CveLookupRequest, CveLookupResponse, CveRecord, ExecuteRequest, ExecuteResponse,
    ExecutionStep, ExploitLookupResponse, ExploitRecord, ScanHostRequest, ScanHostResponse,
    ScanStatusResponse, VersionDetectionRequest, VersionDetectionResponse,
};
use crate::types::DetectedService;
use crate::{Result, ScanError};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Caller identity passed explicitly into every operation that reaches the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    token: Option<String>,
}

impl AuthContext {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: Some(token).filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }

    pub fn from_option(token: Option<String>) -> Self {
        token.map(Self::new).unwrap_or_default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// The bearer token, or a precondition failure when none is present.
    pub fn require_token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| ScanError::Precondition("Not authenticated: no access token available".to_string()))
    }
}

/// The request surface consumed by the engine. One method per execution step.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Submit a host scan and return the backend scan id.
    async fn submit_scan(&self, ctx: &AuthContext, request: &ScanHostRequest) -> Result<String>;

    async fn scan_status(&self, ctx: &AuthContext, scan_id: &str) -> Result<ScanStatusResponse>;

    async fn detect_versions(&self, ctx: &AuthContext, host: &str, ports: &[u16]) -> Result<Vec<DetectedService>>;

    async fn lookup_cves(&self, ctx: &AuthContext, product: &str, version: &str) -> Result<Vec<CveRecord>>;

    async fn lookup_exploits(&self, ctx: &AuthContext, cve_id: &str) -> Result<Vec<ExploitRecord>>;

    async fn execute_exploit(&self, ctx: &AuthContext, request: &ExecuteRequest) -> Result<ExecuteResponse>;
}

/// `Backend` over JSON/HTTP.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_base_url(&config.backend.base_url, config.request_timeout(), &config.backend.user_agent)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration, user_agent: &str) -> Result<Self> {
        // Url::join drops the last path segment unless the base ends with '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| ScanError::InvalidInput(format!("Invalid backend URL {}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ScanError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ScanError::InvalidInput(format!("Invalid endpoint {}: {}", path, e)))
    }

    fn authorized(&self, builder: RequestBuilder, ctx: &AuthContext) -> Result<RequestBuilder> {
        Ok(builder.bearer_auth(ctx.require_token()?))
    }

    async fn send(&self, step: ExecutionStep, builder: RequestBuilder) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| ScanError::transport(step, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ScanError::backend(step, Some(status.as_u16()), error_message(&body, status.as_u16())))
    }

    async fn decode<T: DeserializeOwned>(&self, step: ExecutionStep, response: Response) -> Result<T> {
        let body = response
            .bytes()
            .await
            .map_err(|e| ScanError::transport(step, e))?;
        serde_json::from_slice(&body)
            .map_err(|e| ScanError::backend(step, None, format!("Malformed response: {}", e)))
    }

    async fn post_json<B, T>(&self, step: ExecutionStep, ctx: &AuthContext, path: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!("POST {} ({})", url, step);
        let builder = self.authorized(self.client.post(url).json(body), ctx)?;
        let response = self.send(step, builder).await?;
        self.decode(step, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, step: ExecutionStep, ctx: &AuthContext, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!("GET {} ({})", url, step);
        let builder = self.authorized(self.client.get(url), ctx)?;
        let response = self.send(step, builder).await?;
        self.decode(step, response).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn submit_scan(&self, ctx: &AuthContext, request: &ScanHostRequest) -> Result<String> {
        let response: ScanHostResponse = self
            .post_json(ExecutionStep::ScanHost, ctx, "scan/host", request)
            .await?;
        Ok(response.scan_id)
    }

    async fn scan_status(&self, ctx: &AuthContext, scan_id: &str) -> Result<ScanStatusResponse> {
        let path = format!("scan/status/{}", urlencoding::encode(scan_id));
        self.get_json(ExecutionStep::ScanStatus, ctx, &path).await
    }

    async fn detect_versions(&self, ctx: &AuthContext, host: &str, ports: &[u16]) -> Result<Vec<DetectedService>> {
        let request = VersionDetectionRequest { host, ports };
        let response: VersionDetectionResponse = self
            .post_json(ExecutionStep::DetectVersions, ctx, "version-detection", &request)
            .await?;
        Ok(response.services)
    }

    async fn lookup_cves(&self, ctx: &AuthContext, product: &str, version: &str) -> Result<Vec<CveRecord>> {
        let request = CveLookupRequest { product, version };
        let response: CveLookupResponse = self
            .post_json(ExecutionStep::LookupCve, ctx, "lookup-cve", &request)
            .await?;
        Ok(response.cves)
    }

    async fn lookup_exploits(&self, ctx: &AuthContext, cve_id: &str) -> Result<Vec<ExploitRecord>> {
        let path = format!("exploits/{}", urlencoding::encode(cve_id));
        let response: ExploitLookupResponse = self
            .get_json(ExecutionStep::LookupExploits, ctx, &path)
            .await?;
        Ok(response.into_records())
    }

    async fn execute_exploit(&self, ctx: &AuthContext, request: &ExecuteRequest) -> Result<ExecuteResponse> {
        let step = if request.command.is_some() {
            ExecutionStep::ShellCommand
        } else {
            ExecutionStep::ExecutePayload
        };
        self.post_json(step, ctx, "exploit/execute", request).await
    }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str, status: u16) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error", "message", "detail"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status)
    } else {
        trimmed.to_string()
    }
}


//! HTTP implementation of [`ClusterClient`]
//!
//! Talks to the cluster's JSON API:
//! - `POST /api/v1/auth/login` returns a bearer token and the cluster info
//! - `POST /api/v1/hardware/rack/retrieve` looks racks up by key
//! - `POST /api/v1/hardware/rack/create` registers new racks

use rackd_core::{Rack, RackKey};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::client::{ClusterClient, ClusterError, ClusterInfo};

/// Connection parameters for the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub host: String,
    pub port: u16,
    /// Use HTTPS
    pub secure: bool,
    pub username: String,
    pub password: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9090,
            secure: false,
            username: "admin".to_string(),
            password: String::new(),
            timeout_ms: 5_000,
        }
    }
}

impl ClusterConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    cluster_info: ClusterInfo,
}

#[derive(Serialize)]
struct RetrieveRackRequest {
    keys: Vec<RackKey>,
}

#[derive(Serialize)]
struct NewRack<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct CreateRackRequest<'a> {
    racks: Vec<NewRack<'a>>,
}

#[derive(Deserialize)]
struct RacksResponse {
    #[serde(default)]
    racks: Option<Vec<Rack>>,
}

/// Blocking HTTP client for the cluster API
pub struct HttpClusterClient {
    client: Client,
    config: ClusterConfig,
    base_url: String,
    token: Option<String>,
}

impl HttpClusterClient {
    /// Create a client. Must not be called from within an async runtime.
    pub fn new(config: ClusterConfig) -> Result<Self, ClusterError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClusterError::Unexpected(format!("failed to create HTTP client: {e}")))?;
        let base_url = config.base_url();
        Ok(Self {
            client,
            config,
            base_url,
            token: None,
        })
    }

    fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, ClusterError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        debug!(url = %url, "Cluster request");
        let response = check_status(request.send().map_err(transport_error)?)?;
        response
            .json::<R>()
            .map_err(|e| ClusterError::Unexpected(format!("invalid response from {path}: {e}")))
    }
}

/// Map connection-level failures to [`ClusterError::Unreachable`]
fn transport_error(e: reqwest::Error) -> ClusterError {
    if e.is_connect() || e.is_timeout() {
        ClusterError::Unreachable(e.to_string())
    } else {
        ClusterError::Unexpected(e.to_string())
    }
}

fn check_status(response: Response) -> Result<Response, ClusterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(status_error(status, body))
}

fn status_error(status: StatusCode, body: String) -> ClusterError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClusterError::Unauthorized(message),
        StatusCode::NOT_FOUND => ClusterError::NotFound(message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ClusterError::Unreachable(message)
        }
        _ => ClusterError::Unexpected(message),
    }
}

impl ClusterClient for HttpClusterClient {
    fn authenticate(&mut self) -> Result<ClusterInfo, ClusterError> {
        self.token = None;
        let response: LoginResponse = self.post(
            "/api/v1/auth/login",
            &LoginRequest {
                username: &self.config.username,
                password: &self.config.password,
            },
        )?;
        self.token = Some(response.token);
        info!(
            cluster = %response.cluster_info.cluster_key,
            url = %self.base_url,
            "Authenticated with cluster"
        );
        Ok(response.cluster_info)
    }

    fn retrieve_rack(&mut self, key: RackKey) -> Result<Rack, ClusterError> {
        let response: RacksResponse =
            self.post("/api/v1/hardware/rack/retrieve", &RetrieveRackRequest { keys: vec![key] })?;
        response
            .racks
            .unwrap_or_default()
            .into_iter()
            .find(|r| r.key == key)
            .ok_or_else(|| ClusterError::NotFound(format!("rack {key}")))
    }

    fn create_rack(&mut self, name: &str) -> Result<Rack, ClusterError> {
        let response: RacksResponse = self.post(
            "/api/v1/hardware/rack/create",
            &CreateRackRequest {
                racks: vec![NewRack { name }],
            },
        )?;
        response
            .racks
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| ClusterError::Unexpected("rack create returned no racks".to_string()))
    }
}

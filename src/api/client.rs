use crate::config::CentralManagerConfig;
use crate::shared::record::{RecordExt, RemoteRecord};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Central Manager returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Resource not found at '{0}'")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("JSON parsing failed: {0}")]
    Json(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        ApiError::Http(error.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        ApiError::Json(error.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(error: std::io::Error) -> Self {
        ApiError::Io(error.to_string())
    }
}

/// Outgoing payload for create and update calls
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    /// Multipart upload of a local file alongside plain form fields
    Upload {
        file_path: PathBuf,
        fields: Map<String, Value>,
    },
}

impl RequestBody {
    /// JSON view of the body; for uploads this is the form fields
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            RequestBody::Json(value) => value.as_object(),
            RequestBody::Upload { fields, .. } => Some(fields),
        }
    }
}

/// Remote management-plane API consumed by the synchronizer.
///
/// Implementations own transport, authentication and session refresh.
/// They must be usable from several synchronizers at once.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create(&self, path: &str, body: RequestBody) -> Result<RemoteRecord, ApiError>;

    async fn get(&self, path: &str) -> Result<RemoteRecord, ApiError>;

    async fn update(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<RemoteRecord, ApiError>;

    async fn delete(&self, path: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    refresh_token: Option<String>,
}

/// REST client for BIG-IP Next Central Manager
pub struct CentralManagerClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    token: RwLock<Option<String>>,
}

impl CentralManagerClient {
    pub fn new(config: &CentralManagerConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("cmsync/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&config.host),
            username: config.username.clone(),
            password: config.password.clone(),
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn login(&self) -> Result<String, ApiError> {
        let url = self.url("/api/login");
        debug!("Logging in to Central Manager at {}", url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Login failed with HTTP {}", status);
            return Err(ApiError::Auth(format!(
                "HTTP {}: {}",
                status,
                extract_message(&text)
            )));
        }

        let login: LoginResponse = response.json().await?;
        *self.token.write().await = Some(login.access_token.clone());
        info!("Authenticated to Central Manager as {}", self.username);
        Ok(login.access_token)
    }

    async fn current_token(&self) -> Result<String, ApiError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    /// Send a request with the current session; on 401 log in again and
    /// replay it once. `build` is called per attempt since a request
    /// builder cannot be reused.
    async fn send<F>(&self, method: Method, path: &str, build: F) -> Result<RemoteRecord, ApiError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send,
    {
        let url = self.url(path);
        let mut token = self.current_token().await?;

        for attempt in 0..2 {
            debug!("{} {} (attempt {})", method, url, attempt + 1);
            let request = build(self.client.request(method.clone(), &url).bearer_auth(&token));
            let response = request.send().await?;
            let status = response.status();
            debug!("{} {} -> {}", method, url, status);

            if status == StatusCode::UNAUTHORIZED && attempt == 0 {
                warn!("Session rejected for {} {}, logging in again", method, url);
                token = self.login().await?;
                continue;
            }

            let text = response.text().await?;
            return parse_response(status, path, &text);
        }

        Err(ApiError::Auth(format!(
            "session was rejected twice for {} {}",
            method, url
        )))
    }

    async fn send_body(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<RemoteRecord, ApiError> {
        match body {
            RequestBody::Json(value) => self.send(method, path, |req| req.json(&value)).await,
            RequestBody::Upload { file_path, fields } => {
                let content = tokio::fs::read(&file_path).await?;
                let file_name = file_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "policy.json".to_string());
                debug!(
                    "Uploading {} ({} bytes) to {}",
                    file_path.display(),
                    content.len(),
                    path
                );
                self.send(method, path, |req| {
                    req.multipart(build_form(&fields, &file_name, &content))
                })
                .await
            }
        }
    }
}

#[async_trait]
impl RemoteApi for CentralManagerClient {
    async fn create(&self, path: &str, body: RequestBody) -> Result<RemoteRecord, ApiError> {
        self.send_body(Method::POST, path, body).await
    }

    async fn get(&self, path: &str) -> Result<RemoteRecord, ApiError> {
        self.send(Method::GET, path, |req| req).await
    }

    async fn update(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<RemoteRecord, ApiError> {
        self.send_body(method, path, body).await
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, path, |req| req).await.map(|_| ())
    }
}

fn build_form(
    fields: &Map<String, Value>,
    file_name: &str,
    content: &[u8],
) -> reqwest::multipart::Form {
    let mut form = reqwest::multipart::Form::new();
    for (key, value) in fields {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        form = form.text(key.clone(), text);
    }
    form.part(
        "content",
        reqwest::multipart::Part::bytes(content.to_vec()).file_name(file_name.to_string()),
    )
}

/// Accept `host`, `host:port` or a full URL
pub fn normalize_base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

/// Map a raw HTTP response onto a record or a typed error
pub fn parse_response(status: StatusCode, path: &str, text: &str) -> Result<RemoteRecord, ApiError> {
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound(path.to_string()));
    }
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: extract_message(text),
        });
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(text)?)
}

/// Prefer the API's own `message` field over the raw body
fn extract_message(text: &str) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|v| v.str_at(&["message"]).map(str::to_string))
        .unwrap_or_else(|| text.chars().take(500).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("10.0.0.5"), "https://10.0.0.5");
        assert_eq!(normalize_base_url("cm.local:8443/"), "https://cm.local:8443");
        assert_eq!(normalize_base_url("http://cm.local"), "http://cm.local");
    }

    #[test]
    fn test_client_url_joining() {
        let config = CentralManagerConfig {
            host: "cm.example.com".to_string(),
            ..CentralManagerConfig::default()
        };
        let client = CentralManagerClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://cm.example.com");
        assert_eq!(
            client.url("/api/v1/spaces/default/security/waf-policies"),
            "https://cm.example.com/api/v1/spaces/default/security/waf-policies"
        );
        assert_eq!(client.url("api/login"), "https://cm.example.com/api/login");
    }

    #[test]
    fn test_parse_response_success() {
        let record = parse_response(StatusCode::CREATED, "/x", r#"{"id": "abc"}"#).unwrap();
        assert_eq!(record, json!({"id": "abc"}));
        assert_eq!(
            parse_response(StatusCode::NO_CONTENT, "/x", "").unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_parse_response_errors() {
        assert_eq!(
            parse_response(StatusCode::NOT_FOUND, "/api/x/1", ""),
            Err(ApiError::NotFound("/api/x/1".to_string()))
        );
        assert_eq!(
            parse_response(
                StatusCode::BAD_REQUEST,
                "/x",
                r#"{"status": 400, "message": "name already exists"}"#
            ),
            Err(ApiError::Status {
                status: 400,
                message: "name already exists".to_string()
            })
        );
        assert!(matches!(
            parse_response(StatusCode::OK, "/x", "<html>"),
            Err(ApiError::Json(_))
        ));
    }

    #[test]
    fn test_request_body_fields() {
        let body = RequestBody::Json(json!({"name": "p1"}));
        assert_eq!(body.fields().unwrap()["name"], "p1");

        let mut fields = Map::new();
        fields.insert("override".to_string(), json!(true));
        let upload = RequestBody::Upload {
            file_path: PathBuf::from("/tmp/policy.json"),
            fields,
        };
        assert_eq!(upload.fields().unwrap()["override"], true);
    }
}

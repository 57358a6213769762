//! HTTP client for the ingestion service's control plane.

use regex::Regex;
use reqwest::StatusCode;
use seqdrop_types::{
    ApiKeyResponse, ApiToken, ConfirmUploadRequest, InitUploadResponse, UploadParameters,
    VersionCheckForm, VersionResponse,
};
use std::time::Duration;

use crate::config::Config;
use crate::error::ServiceError;
use crate::version::{evaluate, ClientKind, VersionCheck};

const CSRF_PATTERN: &str = r#"type="hidden" value="([^"]+)""#;

#[derive(Clone, Debug)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ServiceClient {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: server_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        Self::new(&config.server_url, config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Ask the service for single-use storage credentials and an object id.
    pub async fn init_multipart_upload(
        &self,
        token: &ApiToken,
    ) -> Result<UploadParameters, ServiceError> {
        let response = self
            .http
            .get(self.endpoint("api/v0/init_multipart_upload"))
            .basic_auth(token.as_str(), Some(""))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!("init_multipart_upload returned {}", status);
            return Err(ServiceError::Status(status));
        }

        let body = response.text().await?;
        let parsed: InitUploadResponse = serde_json::from_str(&body).map_err(|e| {
            ServiceError::Protocol(format!("invalid init_multipart_upload response: {}", e))
        })?;

        let params = UploadParameters::from(parsed);
        if params.bucket.is_empty() || params.file_id.is_empty() {
            return Err(ServiceError::Protocol(
                "init_multipart_upload response has an empty bucket or file id".to_string(),
            ));
        }
        tracing::debug!(bucket = %params.bucket, file_id = %params.file_id, "acquired upload parameters");
        Ok(params)
    }

    /// Tell the service the object is stored. Only HTTP 200 counts as success.
    pub async fn confirm_upload(
        &self,
        token: &ApiToken,
        params: &UploadParameters,
        filename: &str,
    ) -> Result<(), ServiceError> {
        let url = if params.callback_url.starts_with('/') {
            format!("{}{}", self.base_url, params.callback_url)
        } else {
            format!("{}/{}", self.base_url, params.callback_url)
        };
        let body = ConfirmUploadRequest {
            s3_path: params.s3_path(),
            filename: filename.to_string(),
        };

        let response = self
            .http
            .post(url)
            .basic_auth(token.as_str(), Some(""))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!("upload confirmation returned {}", status);
            return Err(ServiceError::Status(status));
        }
        Ok(())
    }

    /// Check whether this client version is still supported.
    ///
    /// An unreachable or unhappy service is not an error: the check degrades
    /// to a warning message and never forces an upgrade.
    pub async fn check_version(
        &self,
        version: &str,
        kind: ClientKind,
    ) -> Result<VersionCheck, ServiceError> {
        let form = VersionCheckForm {
            version: version.to_string(),
        };
        let response = self
            .http
            .post(self.endpoint(kind.route()))
            .form(&form)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Ok(VersionCheck::unreachable());
        }

        let body = response.text().await?;
        let parsed: VersionResponse = serde_json::from_str(&body)
            .map_err(|e| ServiceError::Protocol(format!("invalid version response: {}", e)))?;

        Ok(evaluate(
            version,
            kind,
            &parsed,
            &self.endpoint("uploader.html"),
        ))
    }

    /// Exchange a username and password for an API token.
    ///
    /// Returns `Ok(None)` when the service does not hand out a key, whether
    /// because the credentials are wrong or because the account has none.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<ApiToken>, ServiceError> {
        // The login form is CSRF protected, so the session cookie has to
        // survive between the two requests.
        let session = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .build()?;
        let login_url = self.endpoint("login");

        let page = session.get(&login_url).send().await?.text().await?;
        let pattern = Regex::new(CSRF_PATTERN)
            .map_err(|e| ServiceError::Protocol(format!("invalid CSRF pattern: {}", e)))?;
        let csrf = pattern
            .captures(&page)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ServiceError::Protocol("login page has no CSRF token".to_string()))?;

        let form = [
            ("email", username),
            ("password", password),
            ("csrf_token", csrf.as_str()),
            ("next", "/api/get_token"),
        ];
        let reply = session.post(&login_url).form(&form).send().await?;
        let body = reply.text().await?;

        let key = serde_json::from_str::<ApiKeyResponse>(&body)
            .ok()
            .and_then(|response| response.key)
            .map(ApiToken::new)
            .filter(|token| !token.is_blank());
        if key.is_none() {
            tracing::info!("login did not return an API key");
        }
        Ok(key)
    }
}

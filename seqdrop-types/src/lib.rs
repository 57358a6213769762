use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque credential identifying the user to the ingestion service.
///
/// Sent as the username half of HTTP basic auth with an empty password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A token of only whitespace is what the service hands out to users
    /// without an API key.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(***)")
    }
}

// Response types

/// Body of `GET /api/v0/init_multipart_upload`.
#[derive(Serialize, Deserialize, Clone)]
pub struct InitUploadResponse {
    pub upload_aws_access_key_id: String,
    pub upload_aws_secret_access_key: String,
    pub s3_bucket: String,
    pub file_id: String,
    pub callback_url: String,
}

/// Body of the login exchange's final `POST /login`.
#[derive(Serialize, Deserialize, Clone)]
pub struct ApiKeyResponse {
    pub key: Option<String>,
}

/// Body of either version-check route.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VersionResponse {
    pub latest_version: String,
    pub min_supported_version: Option<String>,
}

// Request types

/// Body posted to the server-supplied callback URL once the object is stored.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConfirmUploadRequest {
    pub s3_path: String,
    pub filename: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VersionCheckForm {
    pub version: String,
}

/// Server-issued parameters for exactly one upload attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadParameters {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub file_id: String,
    pub callback_url: String,
}

impl UploadParameters {
    /// Full storage path of the object, as reported back to the service.
    pub fn s3_path(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.file_id)
    }
}

impl From<InitUploadResponse> for UploadParameters {
    fn from(response: InitUploadResponse) -> Self {
        Self {
            access_key_id: response.upload_aws_access_key_id,
            secret_access_key: response.upload_aws_secret_access_key,
            bucket: response.s3_bucket,
            file_id: response.file_id,
            callback_url: response.callback_url,
        }
    }
}

impl fmt::Debug for UploadParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadParameters")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("bucket", &self.bucket)
            .field("file_id", &self.file_id)
            .field("callback_url", &self.callback_url)
            .finish()
    }
}

use std::path::Path;

use bytes::Bytes;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::sinks::bucket::{Bucket, StorageError};

pub const STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
const READ_WRITE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const ASSERTION_LIFETIME_SECS: i64 = 3_600;

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    token_uri: String,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Authenticate with a service-account key file and return a handle to
/// `bucket_name`. The bucket is looked up once so a wrong name or missing
/// permission fails here rather than on first use.
pub async fn get_bucket(
    bucket_name: &str,
    project: &str,
    credentials_path: &Path,
) -> Result<GcsBucket, StorageError> {
    let key = read_service_account(credentials_path)?;
    let client = reqwest::Client::new();
    let token = fetch_access_token(&client, &key).await?;

    let bucket = GcsBucket {
        client,
        endpoint: STORAGE_ENDPOINT.to_string(),
        name: bucket_name.to_string(),
        project: project.to_string(),
        token,
    };
    bucket.check_bucket().await?;

    tracing::info!(bucket = bucket_name, project, "connected to storage bucket");
    Ok(bucket)
}

fn read_service_account(path: &Path) -> Result<ServiceAccountKey, StorageError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        StorageError::Auth(format!("cannot read credentials {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        StorageError::Auth(format!("invalid service account key {}: {e}", path.display()))
    })
}

async fn fetch_access_token(
    client: &reqwest::Client,
    key: &ServiceAccountKey,
) -> Result<String, StorageError> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: READ_WRITE_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| StorageError::Auth(format!("invalid private key: {e}")))?;
    let assertion = jsonwebtoken::encode(&header, &claims, &signing_key)
        .map_err(|e| StorageError::Auth(format!("cannot sign token request: {e}")))?;

    let response = client
        .post(&key.token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .await
        .map_err(|e| StorageError::Auth(format!("token request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StorageError::Auth(format!("token endpoint returned {status}: {body}")));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| StorageError::Auth(format!("unreadable token response: {e}")))?;
    Ok(token.access_token)
}

/// Bucket in Google Cloud Storage, reached through the JSON API.
///
/// The access token is obtained once by `get_bucket` and not refreshed, which
/// covers a single pipeline run.
#[derive(Clone)]
pub struct GcsBucket {
    client: reqwest::Client,
    endpoint: String,
    name: String,
    project: String,
    token: String,
}

impl std::fmt::Debug for GcsBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsBucket")
            .field("endpoint", &self.endpoint)
            .field("name", &self.name)
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

impl GcsBucket {
    /// Handle for callers that already hold an access token.
    pub fn with_token(endpoint: &str, bucket_name: &str, project: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            name: bucket_name.to_string(),
            project: project.to_string(),
            token: token.to_string(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| StorageError::Backend(format!("invalid endpoint {}: {e}", self.endpoint)))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Backend(format!("invalid endpoint {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, blob_name: &str) -> Result<Url, StorageError> {
        self.url(&["storage", "v1", "b", &self.name, "o", blob_name])
    }

    async fn check_bucket(&self) -> Result<(), StorageError> {
        let url = self.url(&["storage", "v1", "b", &self.name])?;
        let response = self.get(url).await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(format!("bucket {}", self.name))),
            _ => Err(error_from_response(response, &self.name).await),
        }
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, StorageError> {
        self.client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

async fn error_from_response(response: reqwest::Response, what: &str) -> StorageError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("{what}: {status}: {body}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::Auth(message),
        StatusCode::NOT_FOUND => StorageError::NotFound(message),
        _ => StorageError::Backend(message),
    }
}

#[async_trait::async_trait]
impl Bucket for GcsBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, blob_name: &str) -> Result<bool, StorageError> {
        let response = self.get(self.object_url(blob_name)?).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_from_response(response, blob_name).await),
        }
    }

    async fn read(&self, blob_name: &str) -> Result<Bytes, StorageError> {
        let mut url = self.object_url(blob_name)?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self.get(url).await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, blob_name).await);
        }
        response
            .bytes()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn write(&self, blob_name: &str, data: Bytes) -> Result<(), StorageError> {
        let mut url = self.url(&["upload", "storage", "v1", "b", &self.name, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", blob_name);

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, blob_name).await);
        }
        Ok(())
    }
}

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::config::Config;
use crate::error::RelayError;

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ARCHIVE_MIME: &str = "application/gzip";
const TOKEN_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a Google service-account key file we need
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccount {
    pub fn from_file(path: &Path) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::upload("read service account credentials", format!("{}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            RelayError::upload("parse service account credentials", format!("{}: {}", path.display(), e))
        })
    }

    /// Sign the RS256 assertion exchanged for an access token
    fn assertion(&self) -> Result<String, RelayError> {
        let iat = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.token_uri,
            iat,
            exp: iat + TOKEN_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| RelayError::upload("load service account key", e))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| RelayError::upload("sign token request", e))
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    TOKEN_LIFETIME_SECS as u64
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// A file object as returned by the Drive API
#[derive(Debug, Deserialize)]
pub struct DriveFile {
    pub id: String,
    #[serde(rename = "webViewLink", default)]
    pub web_view_link: Option<String>,
}

impl DriveFile {
    pub fn share_link(&self) -> String {
        self.web_view_link
            .clone()
            .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view?usp=drivesdk", self.id))
    }
}

/// Uploads archives into one Drive folder and makes them link-readable
pub struct DriveUploader {
    api_base: String,
    folder_id: String,
    credentials_path: PathBuf,
    chunk_size: usize,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl DriveUploader {
    pub fn new(cfg: &Config) -> Result<Self, RelayError> {
        // Drive answers incomplete chunks with 308; that must reach us, not be followed.
        let mut builder = reqwest::Client::builder()
            .user_agent(format!("pterodrive/{}", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = cfg.http_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            api_base: cfg.drive.api_base.trim_end_matches('/').to_string(),
            folder_id: cfg.drive.folder_id.clone(),
            credentials_path: cfg.drive.credentials_path.clone(),
            chunk_size: cfg.drive.aligned_chunk_size(),
            client: builder.build()?,
            token: Mutex::new(None),
        })
    }

    /// Upload a local file into the configured folder, grant "anyone with the
    /// link can view", and return the view link.
    pub async fn upload(&self, path: &Path) -> Result<String, RelayError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| RelayError::upload("prepare upload", format!("{} has no file name", path.display())))?;
        let total = tokio::fs::metadata(path).await?.len();

        let token = self.access_token().await?;
        let session = self.start_session(&token, &name, total).await?;
        let file = self.send_chunks(&token, &session, path, total).await?;
        self.share(&token, &file.id).await?;

        let link = file.share_link();
        tracing::info!("Uploaded {} to Drive as {}", name, file.id);
        Ok(link)
    }

    /// Current access token, exchanging a fresh JWT when the cached one is stale
    async fn access_token(&self) -> Result<String, RelayError> {
        {
            let cached = self.token.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(token) = cached.as_ref() {
                if Instant::now() < token.refresh_at {
                    return Ok(token.value.clone());
                }
            }
        }

        let account = ServiceAccount::from_file(&self.credentials_path)?;
        let assertion = account.assertion()?;

        let response = self
            .client
            .post(&account.token_uri)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| RelayError::upload("authenticate", e))?;
        let response = check(response, "authenticate").await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::upload("authenticate", e))?;

        tracing::debug!("Authenticated to Drive as {}", account.client_email);

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        let mut cached = self.token.lock().unwrap_or_else(|e| e.into_inner());
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    /// Open a resumable upload session; returns the session URI
    async fn start_session(&self, token: &str, name: &str, total: u64) -> Result<String, RelayError> {
        let url = format!("{}/upload/drive/v3/files", self.api_base);
        let metadata = serde_json::json!({
            "name": name,
            "parents": [self.folder_id],
        });

        let response = self
            .client
            .post(&url)
            .query(&[
                ("uploadType", "resumable"),
                ("fields", "id,webViewLink"),
                ("supportsAllDrives", "true"),
            ])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", ARCHIVE_MIME)
            .header("X-Upload-Content-Length", total.to_string())
            .json(&metadata)
            .send()
            .await
            .map_err(|e| RelayError::upload("create file", e))?;
        let response = check(response, "create file").await?;

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| RelayError::upload("create file", "no upload session URI in response"))
    }

    async fn send_chunks(
        &self,
        token: &str,
        session: &str,
        path: &Path,
        total: u64,
    ) -> Result<DriveFile, RelayError> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut offset: u64 = 0;

        loop {
            let len = (total - offset).min(self.chunk_size as u64);
            let mut buf = vec![0u8; len as usize];
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut buf).await?;

            let response = self
                .client
                .put(session)
                .bearer_auth(token)
                .header(CONTENT_RANGE, content_range(offset, len, total))
                .body(buf)
                .send()
                .await
                .map_err(|e| RelayError::upload("transfer file", e))?;

            let status = response.status();
            if status == StatusCode::PERMANENT_REDIRECT {
                let next = response
                    .headers()
                    .get(RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(next_offset)
                    .unwrap_or(0);
                if next <= offset || next >= total {
                    return Err(RelayError::upload(
                        "transfer file",
                        format!("upload stalled at byte {} of {}", next, total),
                    ));
                }
                tracing::debug!("Drive acknowledged {} of {} bytes", next, total);
                offset = next;
                continue;
            }

            let response = check(response, "transfer file").await?;
            return response
                .json::<DriveFile>()
                .await
                .map_err(|e| RelayError::upload("transfer file", e));
        }
    }

    /// Grant "anyone with the link" read access
    async fn share(&self, token: &str, file_id: &str) -> Result<(), RelayError> {
        let url = format!("{}/drive/v3/files/{}/permissions", self.api_base, file_id);
        let response = self
            .client
            .post(&url)
            .query(&[("supportsAllDrives", "true")])
            .bearer_auth(token)
            .json(&serde_json::json!({ "type": "anyone", "role": "reader" }))
            .send()
            .await
            .map_err(|e| RelayError::upload("create permission", e))?;
        check(response, "create permission").await?;
        Ok(())
    }
}

/// Turn a non-2xx Drive/OAuth response into an upload error carrying the body
async fn check(response: reqwest::Response, stage: &str) -> Result<reqwest::Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RelayError::upload(stage, format!("{}: {}", status, body)))
}

/// `Content-Range` for the chunk starting at `offset`
fn content_range(offset: u64, len: u64, total: u64) -> String {
    if total == 0 {
        "bytes */0".to_string()
    } else {
        format!("bytes {}-{}/{}", offset, offset + len - 1, total)
    }
}

/// Parse a 308 `Range: bytes=0-N` header into the next offset to send
fn next_offset(range: &str) -> Option<u64> {
    let (_, end) = range.trim().strip_prefix("bytes=")?.split_once('-')?;
    end.trim().parse::<u64>().ok().map(|n| n + 1)
}

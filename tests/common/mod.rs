//! Mock panel, download host, Drive, OAuth and webhook on one mockito server.

#![allow(dead_code)]

use mockito::{Matcher, Mock, Server, ServerGuard};
use pterodrive::config::{Config, DriveConfig, PanelConfig, WebhookConfig};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SERVER_ID: &str = "srv-1";
pub const API_KEY: &str = "ptlc_test_key";
pub const ACCESS_TOKEN: &str = "ya29.test-token";

pub struct TestHarness {
    pub server: ServerGuard,
    pub work_dir: TempDir,
    creds_dir: TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self {
            server: Server::new_async().await,
            work_dir: tempfile::tempdir().unwrap(),
            creds_dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Config pointing every collaborator at the mock server
    pub fn config(&self) -> Config {
        Config {
            panel: PanelConfig {
                url: format!("{}/", self.url()),
                api_key: API_KEY.to_string(),
                server_id: SERVER_ID.to_string(),
            },
            drive: DriveConfig {
                folder_id: "folder-xyz".to_string(),
                credentials_path: self.write_credentials(),
                api_base: self.url(),
                ..DriveConfig::default()
            },
            webhook: WebhookConfig {
                url: format!("{}/webhook", self.url()),
            },
            work_dir: self.work_dir.path().to_path_buf(),
            cleanup_on_failure: false,
            http_timeout_secs: Some(10),
        }
    }

    /// The fixture key file, with `token_uri` redirected to the mock server
    fn write_credentials(&self) -> PathBuf {
        let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/service_account.json");
        let mut account: Value = serde_json::from_str(&fs::read_to_string(fixture).unwrap()).unwrap();
        account["token_uri"] = json!(format!("{}/token", self.url()));

        let path = self.creds_dir.path().join("credentials.json");
        fs::write(&path, serde_json::to_string_pretty(&account).unwrap()).unwrap();
        path
    }

    /// Files left in the work directory
    pub fn residual_files(&self) -> Vec<String> {
        fs::read_dir(self.work_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect()
    }

    fn backups_path() -> String {
        format!("/api/client/servers/{}/backups", SERVER_ID)
    }

    /// One page of the backup listing
    pub async fn mock_backup_page(&mut self, page: u32, total_pages: u32, backups: Vec<Value>) -> Mock {
        self.server
            .mock("GET", Self::backups_path().as_str())
            .match_query(Matcher::UrlEncoded("page".into(), page.to_string()))
            .match_header("authorization", format!("Bearer {}", API_KEY).as_str())
            .match_header("accept", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "object": "list",
                    "data": backups,
                    "meta": { "pagination": { "current_page": page, "total_pages": total_pages } }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await
    }

    pub async fn mock_backups(&mut self, backups: Vec<Value>) -> Mock {
        self.mock_backup_page(1, 1, backups).await
    }

    pub async fn mock_backups_failure(&mut self, status: usize, body: &str) -> Mock {
        self.server
            .mock("GET", Self::backups_path().as_str())
            .match_query(Matcher::Any)
            .with_status(status)
            .with_body(body)
            .create_async()
            .await
    }

    /// Signed-URL resolution for one backup; returns a mock expecting `hits` calls
    pub async fn mock_signed_url(&mut self, uuid: &str, hits: usize) -> Mock {
        let direct = format!("{}/node/download/{}?token=signed", self.url(), uuid);
        self.server
            .mock("GET", format!("{}/{}/download", Self::backups_path(), uuid).as_str())
            .match_query(Matcher::Any)
            .match_header("authorization", format!("Bearer {}", API_KEY).as_str())
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "object": "signed_url", "attributes": { "url": direct } }).to_string())
            .expect(hits)
            .create_async()
            .await
    }

    /// The archive bytes served at the signed URL
    pub async fn mock_archive(&mut self, uuid: &str, status: usize, content: &[u8]) -> Mock {
        self.server
            .mock("GET", format!("/node/download/{}", uuid).as_str())
            .match_query(Matcher::UrlEncoded("token".into(), "signed".into()))
            .with_status(status)
            .with_body(content)
            .create_async()
            .await
    }

    pub async fn mock_download(&mut self, uuid: &str, content: &[u8]) -> (Mock, Mock) {
        let signed = self.mock_signed_url(uuid, 1).await;
        let archive = self.mock_archive(uuid, 200, content).await;
        (signed, archive)
    }

    pub async fn mock_token(&mut self, hits: usize) -> Mock {
        self.server
            .mock("POST", "/token")
            .match_body(Matcher::Regex("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "access_token": ACCESS_TOKEN, "expires_in": 3599, "token_type": "Bearer" }).to_string())
            .expect(hits)
            .create_async()
            .await
    }

    /// Resumable session start for the archive of `uuid`
    pub async fn mock_upload_session(&mut self, uuid: &str) -> Mock {
        let session = format!("{}/upload/session/{}", self.url(), uuid);
        self.server
            .mock("POST", "/upload/drive/v3/files")
            .match_query(Matcher::UrlEncoded("uploadType".into(), "resumable".into()))
            .match_header("authorization", format!("Bearer {}", ACCESS_TOKEN).as_str())
            .match_header("x-upload-content-type", "application/gzip")
            .match_body(Matcher::PartialJson(json!({
                "name": format!("{}.tar.gz", uuid),
                "parents": ["folder-xyz"],
            })))
            .with_status(200)
            .with_header("location", session.as_str())
            .expect(1)
            .create_async()
            .await
    }

    /// Single-chunk transfer that completes the file
    pub async fn mock_upload_complete(&mut self, uuid: &str) -> Mock {
        self.server
            .mock("PUT", format!("/upload/session/{}", uuid).as_str())
            .match_header("content-range", Matcher::Regex(r"^bytes 0-\d+/\d+$".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(drive_file(uuid).to_string())
            .expect(1)
            .create_async()
            .await
    }

    pub async fn mock_permission(&mut self, uuid: &str) -> Mock {
        self.server
            .mock("POST", format!("/drive/v3/files/file-{}/permissions", uuid).as_str())
            .match_query(Matcher::Any)
            .match_header("authorization", format!("Bearer {}", ACCESS_TOKEN).as_str())
            .match_body(Matcher::Json(json!({ "type": "anyone", "role": "reader" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "id": "anyoneWithLink", "type": "anyone", "role": "reader" }).to_string())
            .expect(1)
            .create_async()
            .await
    }

    /// Everything Drive needs for one small archive
    pub async fn mock_drive_upload(&mut self, uuid: &str) -> Vec<Mock> {
        vec![
            self.mock_upload_session(uuid).await,
            self.mock_upload_complete(uuid).await,
            self.mock_permission(uuid).await,
        ]
    }

    /// Webhook messages whose body matches `pattern`
    pub async fn mock_webhook(&mut self, pattern: &str, status: usize, hits: usize) -> Mock {
        self.server
            .mock("POST", "/webhook")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Regex(pattern.into()))
            .with_status(status)
            .expect(hits)
            .create_async()
            .await
    }
}

pub fn drive_link(uuid: &str) -> String {
    format!("https://drive.google.com/file/d/file-{}/view?usp=drivesdk", uuid)
}

pub fn drive_file(uuid: &str) -> Value {
    json!({ "id": format!("file-{}", uuid), "webViewLink": drive_link(uuid) })
}

/// A backup entry as the panel lists it
pub fn backup_json(uuid: &str, created_at: &str) -> Value {
    json!({
        "object": "backup",
        "attributes": {
            "uuid": uuid,
            "is_successful": true,
            "is_locked": false,
            "name": format!("Backup {}", uuid),
            "ignored_files": [],
            "checksum": null,
            "bytes": 4096,
            "created_at": created_at,
            "completed_at": created_at
        }
    })
}

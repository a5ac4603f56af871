use chrono::{DateTime, FixedOffset};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::Config;
use crate::error::RelayError;

/// A backup as reported by the panel
#[derive(Debug, Clone, Deserialize)]
pub struct Backup {
    pub uuid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bytes: u64,
    pub created_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub completed_at: Option<DateTime<FixedOffset>>,
}

/// Panel responses wrap every object in `{ "attributes": ... }`
#[derive(Debug, Deserialize)]
struct Item<T> {
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct BackupPage {
    data: Vec<Item<Backup>>,
    #[serde(default)]
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: String,
}

/// Client for the panel's client API, scoped to one server
pub struct PanelClient {
    base_url: String,
    api_key: String,
    server_id: String,
    client: reqwest::Client,
}

impl PanelClient {
    pub fn new(cfg: &Config) -> Result<Self, RelayError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(format!("pterodrive/{}", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = cfg.http_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            base_url: cfg.panel.base_url().to_string(),
            api_key: cfg.panel.api_key.clone(),
            server_id: cfg.panel.server_id.clone(),
            client: builder.build()?,
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    fn backups_url(&self) -> String {
        format!("{}/api/client/servers/{}/backups", self.base_url, self.server_id)
    }

    /// List every backup of the server, in panel order, following pagination
    pub async fn list_backups(&self) -> Result<Vec<Backup>, RelayError> {
        let url = self.backups_url();
        let first: BackupPage = self.get_json(&url, Some(1)).await?;

        let total_pages = first
            .meta
            .as_ref()
            .and_then(|m| m.pagination.as_ref())
            .map_or(1, |p| p.total_pages);
        let mut backups: Vec<Backup> = first.data.into_iter().map(|i| i.attributes).collect();

        for page in 2..=total_pages {
            let next: BackupPage = self.get_json(&url, Some(page)).await?;
            backups.extend(next.data.into_iter().map(|i| i.attributes));
        }

        tracing::info!(
            "Panel reports {} backup(s) for server {}",
            backups.len(),
            self.server_id
        );
        Ok(backups)
    }

    /// Ask the panel for a short-lived direct download URL for one backup
    pub async fn download_url(&self, backup: &Backup) -> Result<String, RelayError> {
        let url = format!("{}/{}/download", self.backups_url(), backup.uuid);
        let signed: Item<SignedUrl> = self.get_json(&url, None).await?;
        Ok(signed.attributes.url)
    }

    /// Plain GET against an arbitrary host; used for the signed download URL
    pub(crate) async fn get_raw(&self, url: &str) -> Result<reqwest::Response, RelayError> {
        let response = self.client.get(url).send().await?;
        Ok(response.error_for_status()?)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        page: Option<u32>,
    ) -> Result<T, RelayError> {
        let mut request = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "application/json");
        if let Some(page) = page {
            request = request.query(&[("page", page)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::PanelRequest { status, body });
        }

        Ok(response.json().await?)
    }
}

//! Coverage badges in the shields.io endpoint format

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Default GitHub API root
pub const GITHUB_API: &str = "https://api.github.com";

/// Errors raised by badge stores
#[derive(Debug, Error)]
pub enum BadgeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed badge: {0}")]
    Malformed(String),

    #[error("Badge I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// shields.io endpoint badge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u8,
    pub label: String,
    pub message: String,
    pub color: String,
}

impl Badge {
    pub fn for_coverage(label: &str, percent: f64) -> Self {
        Self {
            schema_version: 1,
            label: label.to_string(),
            message: format!("{:.1}%", percent),
            color: badge_color(percent).to_string(),
        }
    }

    /// Percentage shown on the badge, if it is a coverage badge
    pub fn percent(&self) -> Option<f64> {
        self.message.trim().trim_end_matches('%').trim().parse().ok()
    }

    pub fn to_json(&self) -> Result<String, BadgeError> {
        serde_json::to_string(self).map_err(|e| BadgeError::Malformed(e.to_string()))
    }

    pub fn from_json(content: &str) -> Result<Self, BadgeError> {
        serde_json::from_str(content).map_err(|e| BadgeError::Malformed(e.to_string()))
    }
}

/// Color band for a coverage percentage
pub fn badge_color(percent: f64) -> &'static str {
    match percent {
        p if p >= 90.0 => "brightgreen",
        p if p >= 75.0 => "green",
        p if p >= 60.0 => "yellowgreen",
        p if p >= 40.0 => "yellow",
        _ => "red",
    }
}

/// Where badges are read from and published to
#[async_trait]
pub trait BadgeStore: Send + Sync {
    /// The currently published badge, if any
    async fn load(&self) -> Result<Option<Badge>, BadgeError>;

    async fn save(&self, badge: &Badge) -> Result<(), BadgeError>;

    /// Human-readable location for logs
    fn location(&self) -> String;
}

/// Badge kept in a local JSON file
#[derive(Debug, Clone)]
pub struct FileBadgeStore {
    path: PathBuf,
}

impl FileBadgeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BadgeStore for FileBadgeStore {
    async fn load(&self) -> Result<Option<Badge>, BadgeError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Badge::from_json(&content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(BadgeError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn save(&self, badge: &Badge) -> Result<(), BadgeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| BadgeError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&self.path, badge.to_json()?)
            .await
            .map_err(|source| BadgeError::Io {
                path: self.path.clone(),
                source,
            })
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Badge kept as a file of a GitHub gist
#[derive(Debug, Clone)]
pub struct GistBadgeStore {
    client: reqwest::Client,
    api_base: String,
    gist_id: String,
    file_name: String,
    token: String,
}

impl GistBadgeStore {
    pub fn new(
        gist_id: impl Into<String>,
        file_name: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, BadgeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("devtools/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: GITHUB_API.to_string(),
            gist_id: gist_id.into(),
            file_name: file_name.into(),
            token: token.into(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self) -> String {
        format!("{}/gists/{}", self.api_base, self.gist_id)
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url())
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BadgeError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(BadgeError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Extract the badge file from a gist API response
fn badge_from_gist(gist: &serde_json::Value, file_name: &str) -> Result<Option<Badge>, BadgeError> {
    match gist["files"][file_name]["content"].as_str() {
        Some(content) => Badge::from_json(content).map(Some),
        None => Ok(None),
    }
}

fn gist_update_body(file_name: &str, badge: &Badge) -> Result<serde_json::Value, BadgeError> {
    Ok(json!({ "files": { file_name: { "content": badge.to_json()? } } }))
}

#[async_trait]
impl BadgeStore for GistBadgeStore {
    async fn load(&self) -> Result<Option<Badge>, BadgeError> {
        debug!("Fetching gist {}", self.gist_id);
        let response = Self::check(self.request(reqwest::Method::GET).send().await?).await?;
        let gist: serde_json::Value = response.json().await?;
        badge_from_gist(&gist, &self.file_name)
    }

    async fn save(&self, badge: &Badge) -> Result<(), BadgeError> {
        let body = gist_update_body(&self.file_name, badge)?;
        Self::check(self.request(reqwest::Method::PATCH).json(&body).send().await?).await?;
        info!("Published badge '{}' to gist {}", badge.message, self.gist_id);
        Ok(())
    }

    fn location(&self) -> String {
        format!("gist {} ({})", self.gist_id, self.file_name)
    }
}

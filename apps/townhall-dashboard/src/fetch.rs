use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde_json::Value;

use crate::section::{Role, Section};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status { url: String, status: StatusCode },
    #[error("could not decode {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Authoritative queries a dashboard runs against the backend.
#[async_trait]
pub trait SectionFetcher: Send + Sync {
    /// Current collection of one section.
    async fn fetch_section(&self, section: Section) -> Result<Value, FetchError>;

    /// Summary counters and recent activity.
    async fn fetch_summary(&self) -> Result<Value, FetchError>;

    /// Ends the server-side session. Best effort.
    async fn sign_out(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Fetcher over the role's JSON API.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base: String,
    role: Role,
    token: Option<String>,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, base: &str, role: Role, token: Option<String>) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            role,
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn section_url(&self, section: Section) -> String {
        format!("{}{}/{}", self.base, self.role.api_base(), section.path())
    }

    fn with_session(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.as_deref() {
            Some(t) => req.header(AUTHORIZATION, format!("Bearer {}", t.trim())),
            None => req,
        }
    }

    async fn get_json(&self, url: String) -> Result<Value, FetchError> {
        let req = self
            .with_session(self.client.get(&url))
            .header(ACCEPT, "application/json");
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(source) => return Err(FetchError::Transport { url, source }),
        };
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                status: resp.status(),
                url,
            });
        }
        match resp.json::<Value>().await {
            Ok(body) => Ok(body),
            Err(source) => Err(FetchError::Decode { url, source }),
        }
    }
}

#[async_trait]
impl SectionFetcher for HttpFetcher {
    async fn fetch_section(&self, section: Section) -> Result<Value, FetchError> {
        self.get_json(self.section_url(section)).await
    }

    async fn fetch_summary(&self) -> Result<Value, FetchError> {
        self.get_json(self.section_url(Section::Dashboard)).await
    }

    async fn sign_out(&self) -> Result<(), FetchError> {
        let url = format!("{}/api/auth/logout", self.base);
        let resp = self
            .with_session(self.client.post(&url))
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                status: resp.status(),
                url,
            });
        }
        Ok(())
    }
}

/// Number of entries in a section response. Resident endpoints answer with a
/// bare array; the others wrap it under the section's collection key.
pub fn collection_len(section: Section, body: &Value) -> Option<usize> {
    if let Some(items) = body.as_array() {
        return Some(items.len());
    }
    body.get(section.collection_key())
        .and_then(Value::as_array)
        .map(Vec::len)
}

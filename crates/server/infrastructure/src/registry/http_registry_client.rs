//! Docker Registry HTTP API v2 client
//!
//! Lists the catalog and the tags of a repository, following `Link`
//! pagination. Local registries are reached over plain http, everything else
//! over https.

use async_trait::async_trait;
use reqwest::header::LINK;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use orch_server_domain::{DomainError, RegistryClient, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

#[derive(Debug, Deserialize)]
struct CatalogPage {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagsPage {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct HttpRegistryClient {
    /// Registry host as used in image references, e.g. `myregistry.azurecr.io`
    endpoint: String,
    base_url: String,
    credentials: Option<(String, String)>,
    client: reqwest::Client,
}

impl HttpRegistryClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let scheme = if is_local(&endpoint) { "http" } else { "https" };
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DomainError::Registry {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            base_url: format!("{scheme}://{endpoint}"),
            endpoint,
            credentials: None,
            client,
        })
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_page<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<(T, Option<String>)> {
        let mut request = self.client.get(url);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|e| DomainError::Registry {
            message: format!("request to {url} failed: {e}"),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::Registry {
                message: format!("{url} returned {status}: {body}"),
            });
        }

        let next = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_link)
            .map(|path| self.resolve(&path));

        let page = response.json::<T>().await.map_err(|e| DomainError::Registry {
            message: format!("invalid response from {url}: {e}"),
        })?;
        Ok((page, next))
    }

    fn resolve(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!("{}{}", self.base_url, link)
        }
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn list_repositories(&self) -> Result<Vec<String>> {
        let mut repositories = Vec::new();
        let mut url = Some(format!("{}/v2/_catalog", self.base_url));
        while let Some(current) = url {
            let (page, next): (CatalogPage, _) = self.get_page(&current).await?;
            repositories.extend(page.repositories);
            url = next;
        }
        debug!(count = repositories.len(), "Registry catalog listed");
        Ok(repositories)
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let mut tags = Vec::new();
        let mut url = Some(format!("{}/v2/{}/tags/list", self.base_url, repository));
        while let Some(current) = url {
            let (page, next): (TagsPage, _) = self.get_page(&current).await?;
            tags.extend(page.tags.unwrap_or_default());
            url = next;
        }
        Ok(tags)
    }

    fn image_prefix(&self) -> &str {
        &self.endpoint
    }
}

fn is_local(endpoint: &str) -> bool {
    LOCAL_HOSTS.iter().any(|host| endpoint.contains(host))
}

/// Target of a `Link: <...>; rel="next"` header
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.contains("rel=\"next\"") {
            return None;
        }
        let target = target.trim();
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

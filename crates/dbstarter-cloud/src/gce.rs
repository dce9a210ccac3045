//! Compute Engine v1 REST client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, instrument};

use crate::client::CloudDiskApi;
use crate::error::{CloudError, CloudResult};
use crate::types::{Disk, DiskInsert, Operation, SnapshotPage};

const DEFAULT_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Project/zone addressing for the Compute Engine client.
#[derive(Debug, Clone)]
pub struct GceConfig {
    pub project: String,
    pub zone: String,
    pub base_url: String,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl GceConfig {
    pub fn new(project: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }

    fn zone_url(&self, tail: &str) -> String {
        format!(
            "{}/projects/{}/zones/{}/{tail}",
            self.base_url, self.project, self.zone
        )
    }

    fn global_url(&self, tail: &str) -> String {
        format!("{}/projects/{}/global/{tail}", self.base_url, self.project)
    }
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Cloud disk client using Application Default Credentials.
#[derive(Clone)]
pub struct GceCompute {
    config: GceConfig,
    http: Client,
    auth: Arc<RwLock<Option<Arc<dyn TokenProvider>>>>,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl std::fmt::Debug for GceCompute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GceCompute")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GceCompute {
    /// Build a client. Authentication is initialized lazily.
    pub fn new(config: GceConfig) -> CloudResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CloudError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            auth: Arc::new(RwLock::new(None)),
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &GceConfig {
        &self.config
    }

    async fn access_token(&self) -> CloudResult<String> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref()
                && token.expires_at > Instant::now() + Duration::from_secs(60)
            {
                return Ok(token.token.clone());
            }
        }

        let provider = {
            let mut guard = self.auth.write().await;
            match guard.as_ref() {
                Some(provider) => provider.clone(),
                None => {
                    debug!("initializing GCP authentication provider");
                    let provider = gcp_auth::provider().await.map_err(|e| {
                        error!(error = %e, "failed to initialize GCP auth");
                        CloudError::Auth(e.to_string())
                    })?;
                    *guard = Some(provider.clone());
                    provider
                }
            }
        };

        let token = provider
            .token(SCOPES)
            .await
            .map_err(|e| CloudError::Auth(e.to_string()))?;
        let token = token.as_str().to_string();

        *self.cached_token.write().await = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(3500),
        });

        Ok(token)
    }

    async fn send<B, T>(
        &self,
        method: Method,
        url: &str,
        resource: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> CloudResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let token = self.access_token().await?;

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudError::Http(e.to_string()))?;

        let status = response.status();
        debug!(%status, %resource, "compute API response");

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CloudError::from_status(status.as_u16(), resource, message));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CloudError::InvalidResponse(format!("{resource}: {e}")))
    }
}

#[async_trait]
impl CloudDiskApi for GceCompute {
    #[instrument(skip(self))]
    async fn get_disk(&self, name: &str) -> CloudResult<Disk> {
        let url = self.config.zone_url(&format!("disks/{name}"));
        self.send::<(), _>(Method::GET, &url, &format!("disks/{name}"), &[], None)
            .await
    }

    #[instrument(skip(self))]
    async fn list_snapshots_page(
        &self,
        filter: &str,
        page_token: Option<&str>,
    ) -> CloudResult<SnapshotPage> {
        let url = self.config.global_url("snapshots");
        let mut query = vec![("filter", filter)];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.send::<(), _>(Method::GET, &url, "snapshots", &query, None)
            .await
    }

    #[instrument(skip(self, disk), fields(disk = %disk.name))]
    async fn insert_disk(&self, disk: &DiskInsert) -> CloudResult<Operation> {
        let url = self.config.zone_url("disks");
        self.send(
            Method::POST,
            &url,
            &format!("disks/{}", disk.name),
            &[],
            Some(disk),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete_disk(&self, name: &str) -> CloudResult<Operation> {
        let url = self.config.zone_url(&format!("disks/{name}"));
        self.send::<(), _>(Method::DELETE, &url, &format!("disks/{name}"), &[], None)
            .await
    }

    #[instrument(skip(self))]
    async fn get_operation(&self, name: &str) -> CloudResult<Operation> {
        let url = self.config.zone_url(&format!("operations/{name}"));
        self.send::<(), _>(Method::GET, &url, &format!("operations/{name}"), &[], None)
            .await
    }
}

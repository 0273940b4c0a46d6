//! Project membership directory.
//!
//! Notification assembly derives an event's audience from the project's
//! membership list. The lookup goes to the project-management service every
//! time, never to the entity cache: the audience must be fresh relative to
//! the event being announced.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::models::{ProjectId, ProjectMember};
use crate::{Error, Result};

/// Resolves the current membership of a project.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn project_members(&self, project_id: &ProjectId) -> Result<Vec<ProjectMember>>;
}

/// Membership lookup response from the project-management service.
#[derive(Debug, Deserialize)]
struct MembersResponse {
    users: Vec<ProjectMember>,
}

/// HTTP implementation against the project-management service's
/// `GET /projects/{id}/users` endpoint.
pub struct HttpProjectDirectory {
    base_url: String,
    client: Client,
}

impl HttpProjectDirectory {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::Config(format!("membership HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        Self::new(
            config.membership_base_url.clone(),
            Duration::from_secs(config.request_timeout_seconds),
        )
    }
}

#[async_trait]
impl ProjectDirectory for HttpProjectDirectory {
    async fn project_members(&self, project_id: &ProjectId) -> Result<Vec<ProjectMember>> {
        let url = format!("{}/projects/{}/users", self.base_url, project_id);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "membership lookup for project {project_id} returned {status}"
            )));
        }

        let body: MembersResponse = response.json().await?;
        tracing::debug!(
            project_id = %project_id,
            members = body.users.len(),
            "Resolved project membership"
        );
        Ok(body.users)
    }
}

impl std::fmt::Debug for HttpProjectDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProjectDirectory")
            .field("base_url", &self.base_url)
            .finish()
    }
}

//! HTTP client for the registry API, used by spokes.

use finhub_core::{
    DiscoverFilter, HealthStatus, InstanceId, ServiceInstance, ServiceRegistration,
    ToolDescriptor,
};

#[derive(Debug, thiserror::Error)]
pub enum RegistryClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The registry refused the request (e.g. a tool-name conflict).
    #[error("Registry rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Client for the hub's registry API.
#[derive(Clone)]
pub struct RegistryClient {
    base_url: String,
    client: reqwest::Client,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn register(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<ServiceInstance, RegistryClientError> {
        let response = self
            .client
            .post(format!("{}/registry/register", self.base_url))
            .json(registration)
            .send()
            .await?;
        Self::check(response).await?.json().await.map_err(Into::into)
    }

    pub async fn deregister(&self, id: &InstanceId) -> Result<(), RegistryClientError> {
        let response = self
            .client
            .delete(format!("{}/registry/{}", self.base_url, id))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn heartbeat(&self, id: &InstanceId) -> Result<(), RegistryClientError> {
        let response = self
            .client
            .post(format!("{}/registry/{}/heartbeat", self.base_url, id))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn discover(
        &self,
        filter: &DiscoverFilter,
    ) -> Result<Vec<ServiceInstance>, RegistryClientError> {
        let mut request = self
            .client
            .get(format!("{}/registry/discover", self.base_url))
            .query(&[("min_status", filter.min_status.to_string())]);
        if let Some(name) = &filter.name {
            request = request.query(&[("name", name)]);
        }
        if let Some(tag) = &filter.tag {
            request = request.query(&[("tag", tag)]);
        }
        let response = request.send().await?;
        Self::check(response).await?.json().await.map_err(Into::into)
    }

    pub async fn list_tools(
        &self,
        min_status: HealthStatus,
    ) -> Result<Vec<ToolDescriptor>, RegistryClientError> {
        let response = self
            .client
            .get(format!("{}/registry/tools", self.base_url))
            .query(&[("min_status", min_status.to_string())])
            .send()
            .await?;
        Self::check(response).await?.json().await.map_err(Into::into)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RegistryClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v["error"].as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| status.to_string());
        Err(RegistryClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

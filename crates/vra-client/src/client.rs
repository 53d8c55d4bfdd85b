//! Aria Automation API client
//!
//! Implements the subset of the IaaS API the VirtualMachine controller needs:
//! machine lookup by tag, machine create/delete, and request tracking.

use crate::common::query::{machines_path, tag_filter};
use crate::common::HttpClient;
use crate::error::VraError;
use crate::models::*;
use crate::vra_trait::VraClientTrait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Aria Automation API client
pub struct VraClient {
    http: HttpClient,
}

impl VraClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - Aria Automation base URL (e.g., "https://vra.example.com")
    /// * `refresh_token` - API refresh token, exchanged for a bearer token on first use
    /// * `insecure` - Skip TLS certificate verification (lab installs with self-signed certs)
    pub fn new(base_url: String, refresh_token: String, insecure: bool) -> Result<Self, VraError> {
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(VraError::InvalidUrl(base_url));
        }
        if refresh_token.is_empty() {
            return Err(VraError::Authentication("refresh token is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(VraError::Http)?;

        Ok(Self {
            http: HttpClient::new(client, base_url, refresh_token),
        })
    }

    /// Create a client and log in immediately, failing fast on a bad token
    pub async fn connect(
        base_url: String,
        refresh_token: String,
        insecure: bool,
    ) -> Result<Self, VraError> {
        let client = Self::new(base_url, refresh_token, insecure)?;
        client.http.login().await?;
        Ok(client)
    }
}

#[async_trait::async_trait]
impl VraClientTrait for VraClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn validate_token(&self) -> Result<(), VraError> {
        debug!("Validating Aria Automation token");
        self.http.login().await.map(|_| ())
    }

    async fn find_machines_by_tag(&self, key: &str, value: &str) -> Result<Vec<Machine>, VraError> {
        let filter = tag_filter(key, value);
        debug!("Querying machines with filter: {}", filter);
        let result: MachineResult = self.http.get(&machines_path(&filter)).await?;
        debug!(
            "Machine query returned {} of {} machines",
            result.content.len(),
            result.total_elements
        );
        if result.is_truncated() {
            // A hidden page could hold a duplicate; never report a partial match set
            return Err(VraError::IncompleteResult {
                returned: result.content.len(),
                total: result.total_elements,
            });
        }
        Ok(result.content)
    }

    async fn create_machine(&self, spec: &MachineSpecification) -> Result<RequestTracker, VraError> {
        if spec.name.is_empty() || spec.project_id.is_empty() {
            return Err(VraError::InvalidRequest(
                "machine name and projectId are required".to_string(),
            ));
        }
        let body = serde_json::to_value(spec)?;
        self.http.post("/iaas/api/machines", &body).await
    }

    async fn delete_machine(&self, id: &str) -> Result<RequestTracker, VraError> {
        let path = format!("/iaas/api/machines/{}", urlencoding::encode(id));
        self.http.delete(&path).await
    }

    async fn get_request_tracker(&self, id: &str) -> Result<RequestTracker, VraError> {
        let path = format!("/iaas/api/request-tracker/{}", urlencoding::encode(id));
        self.http.get(&path).await
    }
}

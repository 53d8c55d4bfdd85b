//! VraClient trait for mocking
//!
//! This trait abstracts the VraClient to enable mocking in unit tests.
//! The concrete VraClient implements this trait, and tests use `MockVraClient`.

use crate::error::VraError;
use crate::models::*;

/// Trait for Aria Automation API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait VraClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Validate the refresh token by logging in
    async fn validate_token(&self) -> Result<(), VraError>;

    /// Machines carrying the tag `key=value`
    async fn find_machines_by_tag(&self, key: &str, value: &str) -> Result<Vec<Machine>, VraError>;

    /// Submit a machine creation request
    async fn create_machine(&self, spec: &MachineSpecification) -> Result<RequestTracker, VraError>;

    /// Submit a machine deletion request
    async fn delete_machine(&self, id: &str) -> Result<RequestTracker, VraError>;

    /// Current state of an asynchronous request
    async fn get_request_tracker(&self, id: &str) -> Result<RequestTracker, VraError>;
}

//! Aria Automation IaaS API models
//!
//! These models match the `/iaas/api` JSON payloads (camelCase). Only the
//! fields the controller reads or writes are modelled; unknown fields are
//! ignored on decode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request body for `POST /iaas/api/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub refresh_token: String,
}

/// Response of `POST /iaas/api/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    pub token_type: String,
    pub token: String,
}

/// Key/value tag attached to a machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Placement constraint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraint {
    pub mandatory: bool,
    pub expression: String,
}

/// Cloud config applied at first boot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MachineBootConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Request body for `POST /iaas/api/machines`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpecification {
    pub name: String,
    pub flavor: String,
    pub image: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Machine as returned by `GET /iaas/api/machines`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub boot_config: Option<MachineBootConfig>,
    #[serde(default)]
    pub cloud_account_ids: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub deployment_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub external_region_id: Option<String>,
    #[serde(default)]
    pub external_zone_id: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub power_state: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Machine {
    /// Value of the first tag with `key`
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// Paged machine list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineResult {
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub number_of_elements: u64,
    #[serde(default)]
    pub content: Vec<Machine>,
}

impl MachineResult {
    /// Whether the service matched more machines than this page carries
    pub fn is_truncated(&self) -> bool {
        self.total_elements > self.content.len() as u64
    }
}

/// Asynchronous request handle returned by create/delete calls and by
/// `GET /iaas/api/request-tracker/{id}`.
///
/// `status` is kept as the raw service string (`INPROGRESS`, `FINISHED`,
/// `FAILED`); callers decode it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestTracker {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub progress: Option<u32>,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Raw request tracker status values
pub mod tracker_status {
    pub const IN_PROGRESS: &str = "INPROGRESS";
    pub const FINISHED: &str = "FINISHED";
    pub const FAILED: &str = "FAILED";
}

/// Error body returned by the IaaS API on 4xx/5xx
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_code: Option<u32>,
}

//! VirtualMachine CRD
//!
//! Declares a virtual machine that is provisioned in VMware Aria Automation
//! (vRealize Automation). The user owns `spec.flavor`, `spec.image`,
//! `spec.projectId`, `spec.constraints` and `spec.tags`; every other spec field
//! is mirrored from the provisioned machine by the controller.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// API group of the VirtualMachine CRD
pub const GROUP: &str = "machine.cmbu.local";

/// Finalizer added to every VirtualMachine before any machine is requested
pub const VIRTUAL_MACHINE_FINALIZER: &str = "virtualmachine.machine.cmbu.local/finalizer";

/// Machine tag key carrying the VirtualMachine name
pub const IDENTITY_NAME_TAG: &str = "k8s_name";

/// Machine tag key carrying the VirtualMachine namespace
pub const IDENTITY_NAMESPACE_TAG: &str = "k8s_namespace";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "machine.cmbu.local",
    version = "v1alpha1",
    kind = "VirtualMachine",
    namespaced,
    status = "VirtualMachineStatus",
    shortname = "vm",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"External_ID","type":"string","jsonPath":".status.externalID"}"#,
    printcolumn = r#"{"name":"External_Request_ID","type":"string","jsonPath":".status.externalRequestID"}"#,
    printcolumn = r#"{"name":"Last_Message","type":"string","jsonPath":".status.lastMessage"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Flavor (size) of the machine
    #[serde(default)]
    pub flavor: String,

    /// Image the machine boots from
    #[serde(default)]
    pub image: String,

    /// Project the machine is provisioned into
    #[serde(default)]
    pub project_id: String,

    /// Placement constraints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,

    /// Label tags applied to the machine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,

    /// Machine id in Aria Automation (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Primary address of the machine (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Cloud config applied at first boot (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_config: Option<MachineBootConfig>,

    /// Cloud accounts the machine belongs to (mirrored)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cloud_account_ids: Vec<String>,

    /// Creation time, ISO 8601 UTC (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    /// Last update time, ISO 8601 UTC (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    /// Custom properties (mirrored)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_properties: BTreeMap<String, String>,

    /// Deployment the machine is part of (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,

    /// Description (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Provider-side id, e.g. the vSphere moref (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Provider-side region (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_region_id: Option<String>,

    /// Provider-side zone (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_zone_id: Option<String>,

    /// Guest hostname (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Organization (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    /// Owner email (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Power state: ON, OFF, GUEST_OFF, UNKNOWN or SUSPEND (mirrored)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<String>,
}

/// Placement constraint, e.g. `{ mandatory: true, expression: "env:dev" }`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub mandatory: bool,
    pub expression: String,
}

/// Key/value label tag
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Cloud config data in json-escaped yaml syntax
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineBootConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Observed state, written only by the controller.
///
/// The JSON field names (`externalRequestID`, `externalID`) are part of the
/// printer columns and must not change.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct VirtualMachineStatus {
    #[serde(default)]
    pub phase: StatusPhase,

    /// Human readable outcome of the last reconcile pass
    #[serde(default, rename = "lastMessage")]
    pub last_message: String,

    /// In-flight Aria Automation request, empty when none is outstanding
    #[serde(default, rename = "externalRequestID")]
    pub external_request_id: String,

    /// Provisioned machine id, empty until the machine exists
    #[serde(default, rename = "externalID")]
    pub external_id: String,
}

impl VirtualMachineStatus {
    /// Whether an Aria Automation request is outstanding
    pub fn has_request(&self) -> bool {
        !self.external_request_id.is_empty()
    }

    /// Whether a provisioned machine is known
    pub fn has_machine(&self) -> bool {
        !self.external_id.is_empty()
    }
}

/// Lifecycle phase
///
/// Serializes as upper case ("RUNNING", "INPROGRESS", ...) to stay compatible
/// with existing objects and printer columns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusPhase {
    /// Nothing requested yet, or a machine vanished / is being deleted
    #[default]
    Pending,

    /// Create request submitted
    Creating,

    /// Request still running in Aria Automation
    InProgress,

    /// Machine exists and the spec mirror is current
    Running,

    /// Last pass failed, see `lastMessage`
    Error,
}

impl std::fmt::Display for StatusPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Creating => "CREATING",
            Self::InProgress => "INPROGRESS",
            Self::Running => "RUNNING",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl VirtualMachine {
    /// Whether the user requested deletion
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether our finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == VIRTUAL_MACHINE_FINALIZER))
    }

    /// Current status, or the default (PENDING, all ids empty) when unset
    pub fn status_or_default(&self) -> VirtualMachineStatus {
        self.status.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_uses_legacy_field_names() {
        let status = VirtualMachineStatus {
            phase: StatusPhase::InProgress,
            last_message: "request in progress".to_string(),
            external_request_id: "req-1".to_string(),
            external_id: String::new(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "INPROGRESS");
        assert_eq!(json["externalRequestID"], "req-1");
        assert_eq!(json["externalID"], "");
        assert_eq!(json["lastMessage"], "request in progress");
    }

    #[test]
    fn test_status_defaults_when_fields_missing() {
        let status: VirtualMachineStatus = serde_json::from_str(r#"{"phase":"RUNNING"}"#).unwrap();
        assert_eq!(status.phase, StatusPhase::Running);
        assert!(!status.has_request());
        assert!(!status.has_machine());
    }

    #[test]
    fn test_finalizer_detection() {
        let mut vm = VirtualMachine::new("web-01", VirtualMachineSpec::default());
        assert!(!vm.has_finalizer());
        vm.metadata.finalizers = Some(vec!["other/finalizer".to_string()]);
        assert!(!vm.has_finalizer());
        vm.metadata.finalizers = Some(vec![VIRTUAL_MACHINE_FINALIZER.to_string()]);
        assert!(vm.has_finalizer());
    }

    #[test]
    fn test_spec_omits_unset_mirrored_fields() {
        let spec = VirtualMachineSpec {
            flavor: "small".to_string(),
            image: "ubuntu".to_string(),
            project_id: "proj-1".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["flavor"], "small");
        assert_eq!(json["projectId"], "proj-1");
        assert!(json.get("address").is_none());
        assert!(json.get("tags").is_none());
    }
}

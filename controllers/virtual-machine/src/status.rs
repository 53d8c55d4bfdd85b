//! Status composition and spec mirroring helpers.

use crds::{MachineBootConfig, StatusPhase, VirtualMachineSpec, VirtualMachineStatus};
use std::fmt::Display;
use vra_client::Machine;

pub const MSG_CREATED: &str = "created VirtualMachine in vRealize Automation";
pub const MSG_CREATE_FAILED: &str = "unable to create VirtualMachine in vRealize Automation";
pub const MSG_DELETING: &str = "deleting Virtual Machine";
pub const MSG_DELETE_FAILED: &str = "unable to delete VirtualMachine in vRealize Automation";
pub const MSG_LOOKUP_FAILED: &str = "unable to look up VirtualMachine in vRealize Automation";
pub const MSG_REQUEST_IN_PROGRESS: &str = "request in progress";
pub const MSG_REQUEST_FAILED: &str = "request failed";
pub const MSG_REQUEST_COMPLETED: &str = "request completed";
pub const MSG_REQUEST_UNKNOWN: &str = "request reported unknown status";
pub const MSG_POLL_FAILED: &str = "unable to check request status";
pub const MSG_VANISHED: &str = "VirtualMachine no longer exists in vRealize Automation";
pub const MSG_READY: &str = "ready";

/// Build a status, appending `": <err>"` to the message when an error is given.
pub fn compose_status(
    phase: StatusPhase,
    msg: &str,
    err: Option<&dyn Display>,
    request_id: &str,
    machine_id: &str,
) -> VirtualMachineStatus {
    let last_message = match err {
        Some(err) => format!("{msg}: {err}"),
        None => msg.to_string(),
    };
    VirtualMachineStatus {
        phase,
        last_message,
        external_request_id: request_id.to_string(),
        external_id: machine_id.to_string(),
    }
}

/// Copy the observed machine attributes into the mirrored spec fields.
///
/// Mirrored fields are overwritten unconditionally; the user-owned fields
/// (flavor, image, constraints, tags) are left alone. `projectId` is only
/// overwritten when the service reports one. Returns whether anything changed.
pub fn mirror_machine(spec: &mut VirtualMachineSpec, machine: &Machine) -> bool {
    let before = spec.clone();

    spec.id = Some(machine.id.clone());
    spec.address = machine.address.clone();
    spec.boot_config = machine.boot_config.as_ref().map(|b| MachineBootConfig {
        content: b.content.clone(),
    });
    spec.cloud_account_ids = machine.cloud_account_ids.clone();
    spec.created_at = machine.created_at.clone();
    spec.updated_at = machine.updated_at.clone();
    spec.custom_properties = machine.custom_properties.clone();
    spec.deployment_id = machine.deployment_id.clone();
    spec.description = machine.description.clone();
    spec.external_id = machine.external_id.clone();
    spec.external_region_id = machine.external_region_id.clone();
    spec.external_zone_id = machine.external_zone_id.clone();
    spec.hostname = machine.hostname.clone();
    spec.org_id = machine.org_id.clone();
    spec.owner = machine.owner.clone();
    spec.power_state = machine.power_state.clone();
    if let Some(project_id) = &machine.project_id {
        spec.project_id = project_id.clone();
    }

    *spec != before
}

//! External operation tracking.
//!
//! `OperationTracker` wraps the Aria Automation client and turns its
//! asynchronous request trackers into a closed `OperationStatus`. It holds no
//! state of its own; every method is a single request/response round trip and
//! nothing is retried here.

use crds::{IDENTITY_NAMESPACE_TAG, IDENTITY_NAME_TAG, VirtualMachine};
use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, warn};
use vra_client::{
    Constraint, Machine, MachineSpecification, RequestTracker, Tag, VraClientTrait, VraError,
    tracker_status,
};

/// Errors surfaced by the tracker
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// Network, authentication or server-side failure
    #[error("{0}")]
    Transport(String),

    /// The service refused the request content
    #[error("{0}")]
    ServiceRejected(String),

    /// More than one machine carries the identity tags of one VirtualMachine
    #[error("{count} machines match identity {key}, refusing to pick one")]
    AmbiguousResult { key: String, count: usize },
}

impl From<VraError> for TrackerError {
    fn from(err: VraError) -> Self {
        if err.is_rejection() {
            Self::ServiceRejected(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Decoded state of an asynchronous request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Finished,
    /// Carries the service's message, possibly empty
    Failed(String),
    /// Status string outside the known set, kept verbatim
    Unknown(String),
}

impl OperationStatus {
    pub fn from_tracker(tracker: &RequestTracker) -> Self {
        match tracker.status.as_str() {
            tracker_status::IN_PROGRESS => Self::InProgress,
            tracker_status::FINISHED => Self::Finished,
            tracker_status::FAILED => Self::Failed(tracker.message.clone().unwrap_or_default()),
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Tracks create/delete requests against Aria Automation
pub struct OperationTracker {
    client: Box<dyn VraClientTrait>,
}

impl OperationTracker {
    pub fn new(client: Box<dyn VraClientTrait>) -> Self {
        Self { client }
    }

    /// Submit a machine creation request, returning the request id
    pub async fn submit_create(&self, vm: &VirtualMachine) -> Result<String, TrackerError> {
        let spec = machine_specification(vm);
        debug!("Submitting create for machine {}", spec.name);
        let tracker = self.client.create_machine(&spec).await?;
        Ok(tracker.id)
    }

    /// Submit a machine deletion request, returning the request id.
    ///
    /// `Ok(None)` when the service no longer knows the machine.
    pub async fn submit_delete(&self, external_id: &str) -> Result<Option<String>, TrackerError> {
        debug!("Submitting delete for machine {}", external_id);
        match self.client.delete_machine(external_id).await {
            Ok(tracker) => Ok(Some(tracker.id)),
            Err(VraError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Current state of a request.
    ///
    /// `Err` means the poll itself failed; a failed request is `Ok(Failed)`.
    pub async fn poll(&self, request_id: &str) -> Result<OperationStatus, TrackerError> {
        let tracker = self
            .client
            .get_request_tracker(request_id)
            .await
            .map_err(|e| TrackerError::Transport(e.to_string()))?;
        let status = OperationStatus::from_tracker(&tracker);
        debug!("Request {} is {:?}", request_id, status);
        Ok(status)
    }

    /// The machine provisioned for `namespace/name`, if any
    pub async fn find_by_identity(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Machine>, TrackerError> {
        let mut matches: Vec<Machine> = self
            .client
            .find_machines_by_tag(IDENTITY_NAME_TAG, name)
            .await?
            .into_iter()
            // The server filter may pair the key of one tag with the value of another
            .filter(|m| m.tag_value(IDENTITY_NAME_TAG) == Some(name))
            .filter(|m| {
                // Machines created without a namespace tag still match by name
                m.tag_value(IDENTITY_NAMESPACE_TAG)
                    .is_none_or(|ns| ns == namespace)
            })
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            count => {
                let key = format!("{namespace}/{name}");
                warn!("{} machines carry identity {}", count, key);
                Err(TrackerError::AmbiguousResult { key, count })
            }
        }
    }
}

/// Build the creation request for a VirtualMachine.
///
/// User tags are sent as-is except for the identity keys, which are always
/// set from the object's name and namespace.
pub fn machine_specification(vm: &VirtualMachine) -> MachineSpecification {
    let name = vm.name_any();
    let namespace = vm.namespace().unwrap_or_default();

    let mut tags: Vec<Tag> = vm
        .spec
        .tags
        .iter()
        .filter(|t| t.key != IDENTITY_NAME_TAG && t.key != IDENTITY_NAMESPACE_TAG)
        .map(|t| Tag::new(t.key.clone(), t.value.clone()))
        .collect();
    tags.push(Tag::new(IDENTITY_NAME_TAG, name.clone()));
    tags.push(Tag::new(IDENTITY_NAMESPACE_TAG, namespace));

    MachineSpecification {
        name,
        flavor: vm.spec.flavor.clone(),
        image: vm.spec.image.clone(),
        project_id: vm.spec.project_id.clone(),
        constraints: vm
            .spec
            .constraints
            .iter()
            .map(|c| Constraint {
                mandatory: c.mandatory,
                expression: c.expression.clone(),
            })
            .collect(),
        tags,
        description: None,
    }
}

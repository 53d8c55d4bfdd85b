//! Mock VraClient for unit testing
//!
//! This module provides a mock implementation of VraClientTrait that can be used
//! in unit tests without requiring an Aria Automation instance.
//!
//! Submitted create/delete requests stay `INPROGRESS` until the test calls
//! `complete_request` (which applies the change to the machine store) or
//! `fail_request`. Faults can be queued per operation and are consumed one
//! per call.

use crate::error::VraError;
use crate::models::*;
use crate::vra_trait::VraClientTrait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Operations recorded by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    FindMachines,
    CreateMachine,
    DeleteMachine,
    GetRequestTracker,
}

/// A failure to return from the next call of an operation
#[derive(Debug, Clone)]
pub enum MockFault {
    /// Service unreachable (5xx / network)
    Unavailable(String),
    /// Request content refused (4xx)
    Rejected { status: u16, message: String },
    /// Token rejected
    Authentication(String),
    /// Listing matched more results than one page carries
    Truncated { returned: usize, total: u64 },
}

impl MockFault {
    fn into_error(self) -> VraError {
        match self {
            Self::Unavailable(msg) => VraError::Unavailable(msg),
            Self::Rejected { status, message } => VraError::Api { status, message },
            Self::Authentication(msg) => VraError::Authentication(msg),
            Self::Truncated { returned, total } => VraError::IncompleteResult { returned, total },
        }
    }
}

#[derive(Debug, Clone)]
enum PendingAction {
    Create(Machine),
    Delete(String),
}

/// Mock VraClient for testing
///
/// This mock stores machines and request trackers in memory and can be
/// configured to return specific responses for testing different scenarios.
#[derive(Clone)]
pub struct MockVraClient {
    base_url: String,
    // In-memory storage
    machines: Arc<Mutex<BTreeMap<String, Machine>>>,
    trackers: Arc<Mutex<HashMap<String, RequestTracker>>>,
    pending: Arc<Mutex<HashMap<String, PendingAction>>>,
    // Test controls
    faults: Arc<Mutex<HashMap<MockOperation, VecDeque<MockFault>>>>,
    calls: Arc<Mutex<HashMap<MockOperation, usize>>>,
    submitted: Arc<Mutex<Vec<MachineSpecification>>>,
    // Counter for generating IDs
    next_id: Arc<Mutex<u64>>,
}

impl MockVraClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            machines: Arc::new(Mutex::new(BTreeMap::new())),
            trackers: Arc::new(Mutex::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            faults: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            submitted: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Add a machine to the mock store (for test setup)
    pub fn add_machine(&self, machine: Machine) {
        self.machines.lock().unwrap().insert(machine.id.clone(), machine);
    }

    /// Remove a machine behind the controller's back (drift)
    pub fn remove_machine(&self, id: &str) -> Option<Machine> {
        self.machines.lock().unwrap().remove(id)
    }

    /// Snapshot of all machines
    pub fn machines(&self) -> Vec<Machine> {
        self.machines.lock().unwrap().values().cloned().collect()
    }

    /// Register a request tracker directly (for test setup)
    pub fn add_request(&self, tracker: RequestTracker) {
        self.trackers.lock().unwrap().insert(tracker.id.clone(), tracker);
    }

    /// Finish a request and apply its effect to the machine store
    pub fn complete_request(&self, id: &str) {
        if let Some(action) = self.pending.lock().unwrap().remove(id) {
            match action {
                PendingAction::Create(machine) => self.add_machine(machine),
                PendingAction::Delete(machine_id) => {
                    self.remove_machine(&machine_id);
                }
            }
        }
        self.set_request_status(id, tracker_status::FINISHED, None);
    }

    /// Fail a request without applying its effect
    pub fn fail_request(&self, id: &str, message: &str) {
        self.pending.lock().unwrap().remove(id);
        self.set_request_status(id, tracker_status::FAILED, Some(message.to_string()));
    }

    /// Force the raw status string of a request
    pub fn set_request_status(&self, id: &str, status: &str, message: Option<String>) {
        let mut trackers = self.trackers.lock().unwrap();
        let tracker = trackers.entry(id.to_string()).or_insert_with(|| RequestTracker {
            id: id.to_string(),
            name: None,
            progress: None,
            status: String::new(),
            message: None,
            resources: Vec::new(),
        });
        tracker.status = status.to_string();
        tracker.message = message;
        if status == tracker_status::FINISHED {
            tracker.progress = Some(100);
        }
    }

    /// Make the next call of `operation` fail with `fault`
    pub fn inject_fault(&self, operation: MockOperation, fault: MockFault) {
        self.faults
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .push_back(fault);
    }

    /// Number of calls made to `operation`
    pub fn call_count(&self, operation: MockOperation) -> usize {
        self.calls.lock().unwrap().get(&operation).copied().unwrap_or(0)
    }

    /// Total number of calls across all operations
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Specifications received by `create_machine`, in order
    pub fn submitted_specs(&self) -> Vec<MachineSpecification> {
        self.submitted.lock().unwrap().clone()
    }

    /// Generate next ID
    fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock().unwrap();
        let current = *id;
        *id += 1;
        current
    }

    /// Record a call and return the queued fault, if any
    fn record(&self, operation: MockOperation) -> Result<(), VraError> {
        *self.calls.lock().unwrap().entry(operation).or_insert(0) += 1;
        match self
            .faults
            .lock()
            .unwrap()
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(fault) => Err(fault.into_error()),
            None => Ok(()),
        }
    }

    fn new_tracker(&self, name: &str, action: PendingAction) -> RequestTracker {
        let tracker = RequestTracker {
            id: uuid::Uuid::new_v4().to_string(),
            name: Some(name.to_string()),
            progress: Some(0),
            status: tracker_status::IN_PROGRESS.to_string(),
            message: None,
            resources: Vec::new(),
        };
        self.trackers
            .lock()
            .unwrap()
            .insert(tracker.id.clone(), tracker.clone());
        self.pending.lock().unwrap().insert(tracker.id.clone(), action);
        tracker
    }
}

#[async_trait::async_trait]
impl VraClientTrait for MockVraClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_token(&self) -> Result<(), VraError> {
        Ok(())
    }

    async fn find_machines_by_tag(&self, key: &str, value: &str) -> Result<Vec<Machine>, VraError> {
        self.record(MockOperation::FindMachines)?;
        Ok(self
            .machines
            .lock()
            .unwrap()
            .values()
            // Same looseness as the service's `tags.item` filter: key and value
            // may come from different tags
            .filter(|m| {
                m.tags.iter().any(|t| t.key == key) && m.tags.iter().any(|t| t.value == value)
            })
            .cloned()
            .collect())
    }

    async fn create_machine(&self, spec: &MachineSpecification) -> Result<RequestTracker, VraError> {
        self.record(MockOperation::CreateMachine)?;
        self.submitted.lock().unwrap().push(spec.clone());

        let n = self.next_id();
        let machine = Machine {
            id: format!("machine-{n}"),
            name: spec.name.clone(),
            address: Some(format!("10.0.0.{n}")),
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            hostname: Some(spec.name.clone()),
            power_state: Some("ON".to_string()),
            project_id: Some(spec.project_id.clone()),
            description: spec.description.clone(),
            tags: spec.tags.clone(),
            ..Default::default()
        };
        Ok(self.new_tracker("Provisioning", PendingAction::Create(machine)))
    }

    async fn delete_machine(&self, id: &str) -> Result<RequestTracker, VraError> {
        self.record(MockOperation::DeleteMachine)?;
        if !self.machines.lock().unwrap().contains_key(id) {
            return Err(VraError::NotFound(format!("machine {id}")));
        }
        Ok(self.new_tracker("Delete", PendingAction::Delete(id.to_string())))
    }

    async fn get_request_tracker(&self, id: &str) -> Result<RequestTracker, VraError> {
        self.record(MockOperation::GetRequestTracker)?;
        self.trackers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| VraError::NotFound(format!("request tracker {id}")))
    }
}

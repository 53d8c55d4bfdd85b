//! Test utilities for unit testing the reconciler
//!
//! `MemoryStore` stands in for the Kubernetes API: it keeps VirtualMachines in
//! memory, bumps `resourceVersion` on every write, rejects stale spec updates
//! with `Conflict`, and deletes an object once its last finalizer is removed
//! after deletion was requested.

use crate::reconciler::Reconciler;
use crate::store::{ResourceKey, ResourceStore, StoreError};
use crds::{VIRTUAL_MACHINE_FINALIZER, VirtualMachine, VirtualMachineSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vra_client::MockVraClient;

/// Poll delay used by test reconcilers
pub const TEST_REQUEUE: Duration = Duration::from_secs(20);
/// Backoff ceiling used by test reconcilers
pub const TEST_MAX_REQUEUE: Duration = Duration::from_secs(300);

/// Helper to create a test VirtualMachine CRD
pub fn create_test_vm(name: &str, namespace: &str) -> VirtualMachine {
    let mut vm = VirtualMachine::new(
        name,
        VirtualMachineSpec {
            flavor: "small".to_string(),
            image: "ubuntu".to_string(),
            project_id: "proj-1".to_string(),
            ..Default::default()
        },
    );
    vm.metadata.namespace = Some(namespace.to_string());
    vm
}

/// Helper to create a reconciler over a mock client and an in-memory store
pub fn create_test_reconciler(mock: &MockVraClient, store: &MemoryStore) -> Reconciler {
    Reconciler::new(
        Box::new(mock.clone()),
        Box::new(store.clone()),
        TEST_REQUEUE,
        TEST_MAX_REQUEUE,
    )
}

#[derive(Debug, Default)]
struct StoreCounters {
    spec_writes: usize,
    status_writes: usize,
    pending_conflicts: usize,
}

/// In-memory `ResourceStore`
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<ResourceKey, VirtualMachine>>>,
    counters: Arc<Mutex<StoreCounters>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as if a user applied it, returning its key
    pub fn insert(&self, mut vm: VirtualMachine) -> ResourceKey {
        let key = ResourceKey::of(&vm);
        vm.metadata.resource_version = Some("1".to_string());
        self.objects.lock().unwrap().insert(key.clone(), vm);
        key
    }

    /// Current object, if it still exists
    pub fn object(&self, key: &ResourceKey) -> Option<VirtualMachine> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Status of an object that must exist
    pub fn status(&self, key: &ResourceKey) -> crds::VirtualMachineStatus {
        self.object(key)
            .map(|vm| vm.status_or_default())
            .unwrap_or_else(|| panic!("{key} does not exist"))
    }

    /// Set the deletion timestamp, as the API server does on delete
    pub fn request_deletion(&self, key: &ResourceKey) {
        let mut objects = self.objects.lock().unwrap();
        let vm = objects.get_mut(key).unwrap();
        let now: Time = serde_json::from_value(serde_json::json!("2025-01-01T00:00:00Z")).unwrap();
        vm.metadata.deletion_timestamp = Some(now);
        bump(vm);
    }

    /// Simulate a user edit: overwrite the spec and bump the resourceVersion
    pub fn edit_spec(&self, key: &ResourceKey, edit: impl FnOnce(&mut VirtualMachineSpec)) {
        let mut objects = self.objects.lock().unwrap();
        let vm = objects.get_mut(key).unwrap();
        edit(&mut vm.spec);
        bump(vm);
    }

    /// Make the next `update_spec` fail with `Conflict`
    pub fn inject_spec_conflict(&self) {
        self.counters.lock().unwrap().pending_conflicts += 1;
    }

    pub fn spec_writes(&self) -> usize {
        self.counters.lock().unwrap().spec_writes
    }

    pub fn status_writes(&self) -> usize {
        self.counters.lock().unwrap().status_writes
    }
}

fn bump(vm: &mut VirtualMachine) {
    let next = vm
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    vm.metadata.resource_version = Some(next.to_string());
}

#[async_trait::async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> Result<VirtualMachine, StoreError> {
        self.object(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn update_spec(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        let key = ResourceKey::of(vm);
        {
            let mut counters = self.counters.lock().unwrap();
            if counters.pending_conflicts > 0 {
                counters.pending_conflicts -= 1;
                return Err(StoreError::Conflict(key.to_string()));
            }
        }
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if stored.metadata.resource_version != vm.metadata.resource_version {
            return Err(StoreError::Conflict(key.to_string()));
        }
        // Status is a subresource; a spec update leaves it alone
        stored.spec = vm.spec.clone();
        bump(stored);
        self.counters.lock().unwrap().spec_writes += 1;
        Ok(stored.clone())
    }

    async fn update_status(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        let key = ResourceKey::of(vm);
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        stored.status = vm.status.clone();
        bump(stored);
        self.counters.lock().unwrap().status_writes += 1;
        Ok(stored.clone())
    }

    async fn add_finalizer(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        let key = ResourceKey::of(vm);
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if !stored.has_finalizer() {
            stored
                .metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(VIRTUAL_MACHINE_FINALIZER.to_string());
            bump(stored);
        }
        Ok(stored.clone())
    }

    async fn remove_finalizer(&self, vm: &VirtualMachine) -> Result<(), StoreError> {
        let key = ResourceKey::of(vm);
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get_mut(&key) else {
            return Ok(());
        };
        if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != VIRTUAL_MACHINE_FINALIZER);
        }
        bump(stored);
        let released = stored.is_deleting()
            && stored.metadata.finalizers.as_ref().is_none_or(|f| f.is_empty());
        if released {
            objects.remove(&key);
        }
        Ok(())
    }
}

//! VirtualMachine persistence.
//!
//! The reconciler reads and writes VirtualMachine objects only through
//! `ResourceStore`, so the state machine can run against the Kubernetes API
//! in production and an in-memory store in tests.

use crds::{VIRTUAL_MACHINE_FINALIZER, VirtualMachine};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Errors from the resource store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object is gone; callers treat this as nothing to do
    #[error("VirtualMachine {0} not found")]
    NotFound(String),

    /// The object changed since it was read
    #[error("VirtualMachine {0} was modified concurrently")]
    Conflict(String),

    /// Any other API failure
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),
}

impl StoreError {
    fn from_kube(key: &ResourceKey, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 404 => Self::NotFound(key.to_string()),
            kube::Error::Api(api_err) if api_err.code == 409 => Self::Conflict(key.to_string()),
            other => Self::Kube(other),
        }
    }
}

/// Namespace/name of a VirtualMachine
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an object; objects without a namespace fall back to "default"
    pub fn of(vm: &VirtualMachine) -> Self {
        Self::new(
            vm.namespace().unwrap_or_else(|| "default".to_string()),
            vm.name_any(),
        )
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Read/write access to VirtualMachine objects
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    /// Current object
    async fn get(&self, key: &ResourceKey) -> Result<VirtualMachine, StoreError>;

    /// Replace the spec. Fails with `Conflict` if the object changed since `vm` was read.
    async fn update_spec(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError>;

    /// Write `vm.status`. Last write wins.
    async fn update_status(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError>;

    /// Add the controller finalizer if missing
    async fn add_finalizer(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError>;

    /// Remove the controller finalizer. The object may be deleted right after.
    async fn remove_finalizer(&self, vm: &VirtualMachine) -> Result<(), StoreError>;
}

/// `ResourceStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<VirtualMachine> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        key: &ResourceKey,
        finalizers: Vec<String>,
    ) -> Result<VirtualMachine, StoreError> {
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        self.api(&key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(key, e))
    }
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, key: &ResourceKey) -> Result<VirtualMachine, StoreError> {
        self.api(&key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| StoreError::from_kube(key, e))
    }

    async fn update_spec(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        let key = ResourceKey::of(vm);
        debug!("Updating spec of {}", key);
        // replace() carries the resourceVersion, so a stale read comes back 409
        self.api(&key.namespace)
            .replace(&key.name, &PostParams::default(), vm)
            .await
            .map_err(|e| StoreError::from_kube(&key, e))
    }

    async fn update_status(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        let key = ResourceKey::of(vm);
        let patch = json!({ "status": vm.status_or_default() });
        debug!("Updating status of {}: {}", key, patch);
        self.api(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(&key, e))
    }

    async fn add_finalizer(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        if vm.has_finalizer() {
            return Ok(vm.clone());
        }
        let key = ResourceKey::of(vm);
        let mut finalizers = vm.finalizers().to_vec();
        finalizers.push(VIRTUAL_MACHINE_FINALIZER.to_string());
        self.patch_finalizers(&key, finalizers).await
    }

    async fn remove_finalizer(&self, vm: &VirtualMachine) -> Result<(), StoreError> {
        if !vm.has_finalizer() {
            return Ok(());
        }
        let key = ResourceKey::of(vm);
        let finalizers: Vec<String> = vm
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != VIRTUAL_MACHINE_FINALIZER)
            .cloned()
            .collect();
        match self.patch_finalizers(&key, finalizers).await {
            // Last finalizer gone, the API server may already have removed the object
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_vm;

    #[test]
    fn test_resource_key_display() {
        let key = ResourceKey::of(&create_test_vm("web-01", "apps"));
        assert_eq!(key, ResourceKey::new("apps", "web-01"));
        assert_eq!(key.to_string(), "apps/web-01");
    }
}

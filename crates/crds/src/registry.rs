//! Kind registry
//!
//! Maps each custom resource kind served by this project to its generated
//! CustomResourceDefinition. Built once at startup and handed to whoever needs
//! it (the controller checks the CRDs are installed, `crdgen` prints them).

use crate::VirtualMachine;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;
use std::collections::BTreeMap;

/// A registered custom resource kind
#[derive(Debug, Clone)]
pub struct RegisteredKind {
    /// Kind, e.g. "VirtualMachine"
    pub kind: String,
    /// Full CRD name, e.g. "virtualmachines.machine.cmbu.local"
    pub crd_name: String,
    /// Generated definition
    pub definition: CustomResourceDefinition,
}

/// Registry of custom resource kinds, keyed by kind
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: BTreeMap<String, RegisteredKind>,
}

impl KindRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every kind this project defines
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<VirtualMachine>();
        registry
    }

    /// Register a kind. Re-registering the same kind replaces the entry.
    pub fn register<K>(&mut self)
    where
        K: CustomResourceExt,
    {
        let kind = K::api_resource().kind;
        let entry = RegisteredKind {
            kind: kind.clone(),
            crd_name: K::crd_name().to_string(),
            definition: K::crd(),
        };
        self.kinds.insert(kind, entry);
    }

    /// Look up a kind
    pub fn get(&self, kind: &str) -> Option<&RegisteredKind> {
        self.kinds.get(kind)
    }

    /// All registered kinds, ordered by kind name
    pub fn kinds(&self) -> impl Iterator<Item = &RegisteredKind> {
        self.kinds.values()
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

//! Controller-specific error types.
//!
//! This module defines error types specific to the VirtualMachine controller
//! that are not covered by upstream library errors.

use crate::store::StoreError;
use crate::tracker::TrackerError;
use kube::Error as KubeError;
use thiserror::Error;
use vra_client::VraError;

/// Errors that can occur in the VirtualMachine controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Resource store error (read or write of a VirtualMachine)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// External operation error
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// Aria Automation client error outside a reconcile pass (login, setup)
    #[error("Aria Automation error: {0}")]
    VraClient(#[from] VraError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe server failed
    #[error("Probe server failed: {0}")]
    Server(String),
}

impl ControllerError {
    /// Whether the pass was aborted because the stored object changed underneath it
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict(_)))
    }

    /// Whether the identity lookup matched more than one machine
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Tracker(TrackerError::AmbiguousResult { .. }))
    }
}

//! VirtualMachine CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the VirtualMachine controller,
//! plus the kind registry used at startup and by `crdgen`.

pub mod registry;
pub mod virtual_machine;

pub use registry::*;
pub use virtual_machine::*;

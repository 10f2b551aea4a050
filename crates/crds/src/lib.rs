//! VirtualIP CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the VirtualIP controller.

pub mod address_claim;
pub mod segment_mapping;
pub mod virtual_ip;

pub use address_claim::*;
pub use segment_mapping::*;
pub use virtual_ip::*;

//! Cluster Client
//!
//! Typed access to the Kubernetes objects the VirtualIP controller reads and
//! writes: `VirtualIP`, `GroupSegmentMapping`, `IP` and `Service`.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClient, ClusterClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClusterClient::try_default().await?;
//!
//! // Addresses already claimed from one segment mapping
//! let claims = client.list_address_claims("gsm=edge-pool").await?;
//! println!("{} addresses in use", claims.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Create-if-absent**: `create_address_claim` reports a taken name as
//!   `ClusterError::AlreadyExists`, which is what makes an `IP` create an
//!   atomic claim
//! - **Create-or-update**: fetch-or-build, mutate, write
//! - **Mocking**: `MockClusterClient` behind the `test-util` feature

pub mod client;
pub mod common;
pub mod error;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::ClusterClient;
pub use cluster_trait::{ClusterClientTrait, Mutation};
pub use common::label_selector;
pub use error::ClusterError;
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, MockOperation};

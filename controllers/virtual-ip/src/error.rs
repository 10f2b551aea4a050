//! Controller-specific error types.
//!
//! Store failures arrive as `ClusterError`; everything the lifecycle can fail
//! on is expressed here so the text written into `status.message` reads the
//! same whichever step produced it.

use cluster_client::ClusterError;
use thiserror::Error;

/// Errors that can occur in the VirtualIP Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Object-store error
    #[error("{0}")]
    Cluster(#[from] ClusterError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// VirtualIP spec is missing a required field
    #[error("invalid VirtualIP spec: {0}")]
    InvalidSpec(String),

    /// Segment CIDR could not be parsed
    #[error("invalid segment {segment:?}: {reason}")]
    InvalidSegment { segment: String, reason: String },

    /// No GroupSegmentMapping carries the requested segment
    #[error("GroupSegmentMapping not found for the requested segment {0:?}")]
    SegmentNotFound(String),

    /// Every candidate address of a segment mapping is taken
    #[error("there are no available IPs in GroupSegmentMapping {0}")]
    PoolExhausted(String),

    /// Reservation aborted on a store error other than AlreadyExists
    #[error("an error occurred while allocating IP: {0}")]
    Reservation(#[source] ClusterError),

    /// No segment mapping produced an address
    #[error("no IP could be allocated")]
    NoAddressAllocated,

    /// Target Service does not exist
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Owner reference for a cloned Service could not be built
    #[error("received error while setting service's owner: {0}")]
    OwnerReference(String),

    /// A lifecycle step failed; `context` names the step
    #[error("{context}: {source}")]
    Transition {
        context: &'static str,
        #[source]
        source: Box<ControllerError>,
    },

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe/metrics server failed
    #[error("Probe server failed: {0}")]
    Server(String),
}

/// Attaches a lifecycle step name to a failure.
pub trait ResultExt<T> {
    /// Wraps the error in `ControllerError::Transition` with `context`.
    fn context(self, context: &'static str) -> Result<T, ControllerError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<ControllerError>,
{
    fn context(self, context: &'static str) -> Result<T, ControllerError> {
        self.map_err(|e| ControllerError::Transition {
            context,
            source: Box::new(e.into()),
        })
    }
}

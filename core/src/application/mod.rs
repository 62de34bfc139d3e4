//! Application layer - use cases.
//!
//! These services orchestrate domain logic through the ports:
//! - [`WorkloadLocator`] turns a name into an attachable pod
//! - [`TunnelSession`] dials a channel and runs the forward loop
//! - [`MetadataClient`] queries the chart museum behind the tunnel

mod locator;
mod metadata;
mod session;

pub use locator::{Located, WorkloadLocator, DEFAULT_POLL_INTERVAL};
pub use metadata::{MetadataClient, DEFAULT_REQUEST_TIMEOUT};
pub use session::{SessionOptions, SessionState, TunnelSession, DEFAULT_ATTACH_TIMEOUT};

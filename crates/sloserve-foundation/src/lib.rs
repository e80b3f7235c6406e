//! sloserve foundation
//!
//! Execution machinery of the SLO-aware edge/cloud inference scheduler:
//!
//! - [`variant`]: on-device and remote model variants
//! - [`network`]: RTT/bandwidth estimation, discovery, remote calls
//! - [`model`]: per-application selection policy and orchestration
//! - [`scheduler`]: admission queue and worker pool
//! - [`runtime`]: a simulated on-device runtime

pub mod error;
pub mod model;
pub mod network;
pub mod runtime;
pub mod scheduler;
pub mod variant;

pub use error::{ModelError, RemoteError, SchedulerError};
pub use model::{Model, ModelPolicy};
pub use network::{
    HttpEndpointInvoker, HttpProxyTransport, NetworkEstimator, ProxySelection, RemoteClient,
};
pub use runtime::SimulatedRuntime;
pub use scheduler::Scheduler;
pub use variant::{LocalVariant, RemoteVariant, Variant};

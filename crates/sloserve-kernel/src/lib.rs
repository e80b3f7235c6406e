//! sloserve kernel
//!
//! Contracts shared by every sloserve crate:
//!
//! - [`request`]: the [`Request`] lifecycle and its complete-once protocol
//! - [`payload`]: image and text payloads
//! - [`wire`]: JSON messages of the remote proxy and cloud endpoints
//! - [`transport`]: traits for proxy calls, endpoint invocations and the
//!   on-device runtime
//! - [`config`]: [`SloServeConfig`] and its multi-format loader
//!
//! Concrete machinery (variants, estimator, models, scheduler) lives in
//! `sloserve-foundation`.

pub mod config;
pub mod error;
pub mod payload;
pub mod request;
pub mod transport;
pub mod types;
pub mod wire;

pub use config::{ConfigError, ConfigResult, SloServeConfig};
pub use error::{RuntimeError, RuntimeResult, TransportError, TransportResult};
pub use payload::RequestData;
pub use request::{Outcome, Request, RequestId, RequestReport, Slo, VariantRef};
pub use transport::{EndpointInvoker, LocalRuntime, ProxyTransport};
pub use types::{Application, Placement, QueueOrdering};

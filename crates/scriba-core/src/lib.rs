//! Core library for the scriba conversion service.
//!
//! A long-running listener wraps one warm instance of a heavyweight
//! document-processing engine and exposes `convert`, `compare` and
//! `get_version` over a framed JSON-RPC channel. This crate holds
//! everything both binaries share:
//!
//! - [`engine`]: the engine trait, process supervision and the control
//!   socket client
//! - [`filters`]: the filter registry queried from the live engine
//! - [`rpc`]: wire protocol, server and client
//! - [`service`]: request validation and dispatch over the engine
//! - [`transport`]: path-vs-inline-bytes file transport resolution
//! - [`watchdog`]: the conversion timeout guard

pub mod config;
pub mod engine;
pub mod error;
pub mod filters;
pub mod rpc;
pub mod service;
pub mod transport;
pub mod watchdog;

pub use engine::{
    ComparisonJob, ConversionJob, DocumentEngine, EngineHandle, EngineState, EngineSupervisor,
    FilterOption, FilterOptionValue, LaunchSpec, RemoteEngine,
};
pub use error::{Result, ScribaError};
pub use filters::{DocumentFamily, FilterDescriptor, FilterDirection, FilterRegistry};
pub use rpc::{CompareRequest, ConversionRequest, RpcServer, RpcServerHandle, ServiceClient};
pub use service::ConversionService;
pub use transport::{HostLocation, Locator, WireDocument};
pub use watchdog::TimeoutGuard;

/// Version string negotiated between client and server.
///
/// Exact match is required: the wire protocol carries no compatibility
/// guarantees across releases.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

//! RPC channel: wire protocol, server and client.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{CompareRequest, ConversionRequest, ServiceClient};
pub use protocol::{CompareParams, ConvertOutcome, ConvertParams};
pub use server::{RpcDispatch, RpcServer, RpcServerHandle};

//! Engine driven over its control socket.
//!
//! The supervised engine process exposes the same framed JSON-RPC wire
//! format as the public channel on its own port. `RemoteEngine` is the
//! production [`DocumentEngine`]: one connection, requests serialized by
//! a tokio `Mutex` on the stream.

use super::{ComparisonJob, ConversionJob, DocumentEngine};
use crate::config::EngineConfig;
use crate::error::{Result, ScribaError};
use crate::filters::FilterDescriptor;
use crate::rpc::protocol::{read_frame, write_frame, ConvertOutcome, RpcRequest, RpcResponse};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Client side of the engine control socket.
#[derive(Debug)]
pub struct RemoteEngine {
    stream: Mutex<TcpStream>,
    next_id: AtomicU64,
}

impl RemoteEngine {
    /// Connect to the engine control socket.
    pub async fn connect(interface: &str, port: u16) -> Result<Self> {
        let stream = tokio::time::timeout(
            EngineConfig::CONTROL_CONNECT_TIMEOUT,
            TcpStream::connect((interface, port)),
        )
        .await
        .map_err(|_| ScribaError::EngineUnavailable)?
        .map_err(|e| {
            debug!("Engine control connect failed: {}", e);
            ScribaError::EngineUnavailable
        })?;

        debug!("Connected to engine control socket {}:{}", interface, port);

        Ok(Self {
            stream: Mutex::new(stream),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);
        let request_bytes = serde_json::to_vec(&request)?;

        let mut stream = self.stream.lock().await;
        let (mut reader, mut writer) = stream.split();

        write_frame(&mut writer, &request_bytes)
            .await
            .map_err(|_| ScribaError::EngineUnavailable)?;

        let response_bytes = read_frame(&mut reader)
            .await
            .map_err(|_| ScribaError::EngineUnavailable)?
            .ok_or(ScribaError::EngineUnavailable)?;

        let response: RpcResponse =
            serde_json::from_slice(&response_bytes).map_err(|e| ScribaError::Json {
                message: format!("Failed to parse engine response: {}", e),
                source: Some(e),
            })?;

        if let Some(fault) = response.error {
            return Err(ScribaError::from_fault(fault.code, fault.message, fault.data));
        }

        response.result.ok_or_else(|| ScribaError::Protocol {
            message: "Engine response missing result".to_string(),
        })
    }

    async fn run_job(&self, method: &str, job: serde_json::Value) -> Result<Option<Vec<u8>>> {
        let result = self.call(method, job).await?;
        let outcome: ConvertOutcome = serde_json::from_value(result)?;
        Ok(match outcome {
            ConvertOutcome::Data { data } => Some(data),
            ConvertOutcome::Written { .. } => None,
        })
    }
}

#[async_trait::async_trait]
impl DocumentEngine for RemoteEngine {
    async fn import_filters(&self) -> Result<Vec<FilterDescriptor>> {
        let result = self.call("import_filters", serde_json::json!({})).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn export_filters(&self) -> Result<Vec<FilterDescriptor>> {
        let result = self.call("export_filters", serde_json::json!({})).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn convert(&self, job: &ConversionJob) -> Result<Option<Vec<u8>>> {
        self.run_job("convert", serde_json::to_value(job)?).await
    }

    async fn compare(&self, job: &ComparisonJob) -> Result<Option<Vec<u8>>> {
        self.run_job("compare", serde_json::to_value(job)?).await
    }
}

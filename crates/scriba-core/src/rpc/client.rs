//! RPC client for the conversion service.
//!
//! `ServiceClient::connect` retries while the server comes up, then
//! negotiates an exact version match before anything else crosses the
//! wire. `submit_conversion`/`submit_comparison` apply the file
//! transport policy and translate server faults back into error kinds.
//!
//! # Thread Safety
//!
//! A tokio `Mutex` serializes access to the TCP stream, allowing safe
//! concurrent use from multiple async tasks.

use super::protocol::{
    read_frame, write_frame, CompareParams, ConvertOutcome, ConvertParams, RpcRequest,
    RpcResponse,
};
use crate::config::ClientConfig;
use crate::engine::FilterOption;
use crate::transport::{encode_for_send, uses_path_transport, HostLocation, Locator};
use crate::{Result, ScribaError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A conversion as specified by the caller, before transport resolution.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input: Locator,
    /// Where the result ends up; `None` means the caller wants the bytes.
    pub output_path: Option<PathBuf>,
    /// Target format name or suffix; inferred from `output_path` when absent.
    pub convert_to: Option<String>,
    pub input_filter: Option<String>,
    pub output_filter: Option<String>,
    pub filter_options: Vec<FilterOption>,
    pub update_index: bool,
    pub host_location: HostLocation,
}

impl ConversionRequest {
    pub fn new(input: Locator) -> Self {
        Self {
            input,
            output_path: None,
            convert_to: None,
            input_filter: None,
            output_filter: None,
            filter_options: Vec::new(),
            update_index: true,
            host_location: HostLocation::Auto,
        }
    }
}

/// A comparison as specified by the caller.
#[derive(Debug, Clone)]
pub struct CompareRequest {
    pub old: Locator,
    pub new: Locator,
    pub output_path: Option<PathBuf>,
    /// Output format name or suffix; inferred from `output_path` when absent.
    pub file_type: Option<String>,
    pub host_location: HostLocation,
}

/// Client connected to a conversion service.
#[derive(Debug)]
pub struct ServiceClient {
    stream: Mutex<TcpStream>,
    host: String,
    port: u16,
    next_id: AtomicU64,
}

impl ServiceClient {
    /// Connect to the service, retrying while it comes up.
    ///
    /// `max_retries` is the total number of attempts. Each attempt opens
    /// a connection and negotiates the version; connection-refused,
    /// reset and timeout errors count as "server not up yet" and are
    /// retried after a fixed interval. Anything else, including a
    /// version mismatch, fails immediately.
    pub async fn connect(
        host: &str,
        port: u16,
        max_retries: u32,
        retry_interval: Duration,
    ) -> Result<Self> {
        let max_attempts = max_retries.max(1);
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;

            match Self::try_connect(host, port).await {
                Ok(client) => match client.negotiate_version().await {
                    Ok(()) => {
                        debug!("Connected to {}:{} on attempt {}", host, port, attempts);
                        return Ok(client);
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(
                            "Handshake attempt {}/{} against {}:{} failed: {}",
                            attempts, max_attempts, host, port, e
                        );
                    }
                    Err(e) => return Err(e),
                },
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Connection attempt {}/{} to {}:{} failed: {}",
                        attempts, max_attempts, host, port, e
                    );
                }
                Err(e) => return Err(e),
            }

            if attempts < max_attempts {
                tokio::time::sleep(retry_interval).await;
            }
        }

        Err(ScribaError::ConnectionRetryExhausted {
            host: host.to_string(),
            port,
            attempts,
        })
    }

    async fn try_connect(host: &str, port: u16) -> Result<Self> {
        let stream = tokio::time::timeout(
            ClientConfig::CONNECT_TIMEOUT,
            TcpStream::connect((host, port)),
        )
        .await
        .map_err(|_| {
            ScribaError::from(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("Connect to {}:{} timed out", host, port),
            ))
        })??;

        Ok(Self {
            stream: Mutex::new(stream),
            host: host.to_string(),
            port,
            next_id: AtomicU64::new(1),
        })
    }

    /// Require an exact version match before any conversion is sent.
    async fn negotiate_version(&self) -> Result<()> {
        let server = self.get_version().await?;
        if server != crate::SERVICE_VERSION {
            return Err(ScribaError::VersionMismatch {
                client: crate::SERVICE_VERSION.to_string(),
                server,
            });
        }
        Ok(())
    }

    /// Fetch the server's version string.
    pub async fn get_version(&self) -> Result<String> {
        let result = self.call("get_version", serde_json::json!({})).await?;
        result
            .as_str()
            .map(String::from)
            .ok_or_else(|| ScribaError::Protocol {
                message: "get_version did not return a string".to_string(),
            })
    }

    /// Run a conversion.
    ///
    /// Returns `Some(bytes)` when the caller asked for the bytes
    /// (`output_path` was `None`); otherwise the output file has been
    /// written, by the server directly or from returned bytes here, and
    /// `None` comes back.
    pub async fn submit_conversion(&self, request: &ConversionRequest) -> Result<Option<Vec<u8>>> {
        let target_known = request.output_filter.is_some()
            || request.convert_to.is_some()
            || request
                .output_path
                .as_ref()
                .is_some_and(|p| p.extension().is_some());
        if !target_known {
            return Err(ScribaError::InvalidRequest {
                message: "Output format could not be determined: give an output path with a \
                          suffix, a target format, or an explicit output filter"
                    .to_string(),
            });
        }

        let path_transport = uses_path_transport(request.host_location, &self.host);
        let input = encode_for_send(&request.input, request.host_location, &self.host)?;

        // The server only sees the output path when it shares our
        // filesystem; otherwise the bytes come back and we place them.
        let remote_output_path = if path_transport {
            request.output_path.clone()
        } else {
            None
        };

        let convert_to = request.convert_to.clone().or_else(|| {
            request
                .output_path
                .as_ref()
                .and_then(|p| p.extension())
                .map(|e| e.to_string_lossy().into_owned())
        });

        let params = ConvertParams {
            input,
            output_path: remote_output_path.clone(),
            convert_to,
            input_filter: request.input_filter.clone(),
            output_filter: request.output_filter.clone(),
            filter_options: request.filter_options.clone(),
            update_index: request.update_index,
        };

        let result = self.call("convert", serde_json::to_value(&params)?).await?;
        let outcome: ConvertOutcome = serde_json::from_value(result)?;

        self.deliver(outcome, request.output_path.as_deref(), remote_output_path)
    }

    /// Run a comparison. Delivery semantics match `submit_conversion`.
    pub async fn submit_comparison(&self, request: &CompareRequest) -> Result<Option<Vec<u8>>> {
        let target_known = request.file_type.is_some()
            || request
                .output_path
                .as_ref()
                .is_some_and(|p| p.extension().is_some());
        if !target_known {
            return Err(ScribaError::InvalidRequest {
                message: "Output format could not be determined: give an output path with a \
                          suffix or an explicit file type"
                    .to_string(),
            });
        }

        let path_transport = uses_path_transport(request.host_location, &self.host);
        let old = encode_for_send(&request.old, request.host_location, &self.host)?;
        let new = encode_for_send(&request.new, request.host_location, &self.host)?;

        let remote_output_path = if path_transport {
            request.output_path.clone()
        } else {
            None
        };

        let file_type = request.file_type.clone().or_else(|| {
            request
                .output_path
                .as_ref()
                .and_then(|p| p.extension())
                .map(|e| e.to_string_lossy().into_owned())
        });

        let params = CompareParams {
            old,
            new,
            output_path: remote_output_path.clone(),
            file_type,
        };

        let result = self.call("compare", serde_json::to_value(&params)?).await?;
        let outcome: ConvertOutcome = serde_json::from_value(result)?;

        self.deliver(outcome, request.output_path.as_deref(), remote_output_path)
    }

    fn deliver(
        &self,
        outcome: ConvertOutcome,
        output_path: Option<&std::path::Path>,
        remote_output_path: Option<PathBuf>,
    ) -> Result<Option<Vec<u8>>> {
        match outcome {
            ConvertOutcome::Written { path } => {
                debug!("Server wrote output to {}", path.display());
                Ok(None)
            }
            ConvertOutcome::Data { data } => match output_path {
                // Output stayed on our side of the wire
                Some(path) if remote_output_path.is_none() => {
                    std::fs::write(path, &data)
                        .map_err(|e| ScribaError::io_with_path(e, path))?;
                    debug!("Wrote {} bytes to {}", data.len(), path.display());
                    Ok(None)
                }
                _ => Ok(Some(data)),
            },
        }
    }

    /// Call a JSON-RPC method on the service.
    pub async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);
        let request_bytes = serde_json::to_vec(&request)?;

        let mut stream = self.stream.lock().await;
        let (mut reader, mut writer) = stream.split();

        write_frame(&mut writer, &request_bytes).await?;

        let response_bytes = read_frame(&mut reader)
            .await?
            .ok_or_else(|| ScribaError::Protocol {
                message: format!("Server {}:{} closed the connection", self.host, self.port),
            })?;

        let response: RpcResponse =
            serde_json::from_slice(&response_bytes).map_err(|e| ScribaError::Json {
                message: format!("Failed to parse response: {}", e),
                source: Some(e),
            })?;

        if let Some(fault) = response.error {
            return Err(ScribaError::from_fault(fault.code, fault.message, fault.data));
        }

        response.result.ok_or_else(|| ScribaError::Protocol {
            message: "Response missing result".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::server::{RpcDispatch, RpcServer};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Dispatcher that reports a configurable version and counts the
    /// conversion requests it sees.
    struct RecordingDispatch {
        version: String,
        conversions: AtomicUsize,
    }

    impl RecordingDispatch {
        fn new(version: &str) -> Self {
            Self {
                version: version.to_string(),
                conversions: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl RpcDispatch for RecordingDispatch {
        async fn dispatch(
            &self,
            method: &str,
            params: serde_json::Value,
        ) -> std::result::Result<serde_json::Value, ScribaError> {
            match method {
                "get_version" => Ok(serde_json::json!(self.version)),
                "convert" => {
                    self.conversions.fetch_add(1, Ordering::Relaxed);
                    let params: ConvertParams = serde_json::from_value(params)
                        .map_err(|e| ScribaError::InvalidRequest {
                            message: e.to_string(),
                        })?;
                    match params.output_filter.as_deref() {
                        Some("bogus") => Err(ScribaError::UnknownFilter {
                            name: "bogus".into(),
                            direction: "export".into(),
                            known: vec!["writer_pdf_Export".into()],
                        }),
                        _ => Ok(serde_json::to_value(ConvertOutcome::Data {
                            data: b"%PDF-1.7 converted".to_vec(),
                        })
                        .unwrap()),
                    }
                }
                other => Err(ScribaError::UnknownMethod(other.to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_retry_exhausted_counts_attempts() {
        // Port 1 has nothing listening
        let result = ServiceClient::connect(
            "127.0.0.1",
            1,
            3,
            Duration::from_millis(10),
        )
        .await;

        match result {
            Err(ScribaError::ConnectionRetryExhausted {
                host,
                port,
                attempts,
            }) => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 1);
                assert_eq!(attempts, 3);
            }
            other => panic!(
                "Expected ConnectionRetryExhausted, got: {:?}",
                other.map(|_| ())
            ),
        }
    }

    #[tokio::test]
    async fn test_version_mismatch_sends_no_conversion() {
        let dispatch = Arc::new(RecordingDispatch::new("0.0.1-other"));
        let mut handle = RpcServer::start("127.0.0.1", 0, dispatch.clone())
            .await
            .unwrap();

        let result = ServiceClient::connect(
            "127.0.0.1",
            handle.addr().port(),
            2,
            Duration::from_millis(10),
        )
        .await;

        match result {
            Err(ScribaError::VersionMismatch { client, server }) => {
                assert_eq!(client, crate::SERVICE_VERSION);
                assert_eq!(server, "0.0.1-other");
            }
            other => panic!("Expected VersionMismatch, got: {:?}", other.map(|_| ())),
        }
        assert_eq!(dispatch.conversions.load(Ordering::Relaxed), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_conversion_bytes_returned_for_byte_transport() {
        let dispatch = Arc::new(RecordingDispatch::new(crate::SERVICE_VERSION));
        let mut handle = RpcServer::start("127.0.0.1", 0, dispatch.clone())
            .await
            .unwrap();

        let client = ServiceClient::connect(
            "127.0.0.1",
            handle.addr().port(),
            2,
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        let mut request = ConversionRequest::new(Locator::Bytes(b"source".to_vec()));
        request.convert_to = Some("pdf".into());

        let bytes = client.submit_conversion(&request).await.unwrap();
        assert_eq!(bytes, Some(b"%PDF-1.7 converted".to_vec()));
        assert_eq!(dispatch.conversions.load(Ordering::Relaxed), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_conversion_fault_maps_back_to_unknown_filter() {
        let dispatch = Arc::new(RecordingDispatch::new(crate::SERVICE_VERSION));
        let mut handle = RpcServer::start("127.0.0.1", 0, dispatch)
            .await
            .unwrap();

        let client = ServiceClient::connect(
            "127.0.0.1",
            handle.addr().port(),
            2,
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        let mut request = ConversionRequest::new(Locator::Bytes(b"source".to_vec()));
        request.output_filter = Some("bogus".into());

        let err = client.submit_conversion(&request).await.unwrap_err();
        match err {
            ScribaError::UnknownFilter { name, known, .. } => {
                assert_eq!(name, "bogus");
                assert_eq!(known, vec!["writer_pdf_Export".to_string()]);
            }
            other => panic!("Expected UnknownFilter, got: {:?}", other),
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_without_output_format_rejected_locally() {
        let dispatch = Arc::new(RecordingDispatch::new(crate::SERVICE_VERSION));
        let mut handle = RpcServer::start("127.0.0.1", 0, dispatch.clone())
            .await
            .unwrap();

        let client = ServiceClient::connect(
            "127.0.0.1",
            handle.addr().port(),
            2,
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        let request = ConversionRequest::new(Locator::Bytes(b"source".to_vec()));
        let err = client.submit_conversion(&request).await.unwrap_err();

        assert!(matches!(err, ScribaError::InvalidRequest { .. }));
        assert_eq!(dispatch.conversions.load(Ordering::Relaxed), 0);

        handle.shutdown().await;
    }
}

//! TCP RPC server.
//!
//! Listens on the configured interface/port, accepts client connections,
//! and dispatches JSON-RPC method calls to the conversion service. Each
//! connection is handled in its own spawned task; request handling
//! itself is serialized further down by the service's engine lock.

use super::protocol::{read_frame, write_frame, RpcRequest, RpcResponse};
use crate::config::ListenerConfig;
use crate::{Result, ScribaError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running RPC server. Dropping shuts down the server.
pub struct RpcServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shut down the server gracefully.
    ///
    /// Stops accepting new connections, signals all active connection
    /// handlers to close, and waits (bounded) until in-flight responses
    /// have been written. A fault for a conversion that just timed out
    /// still reaches its client before the socket closes.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Trait for dispatching RPC method calls.
#[async_trait::async_trait]
pub trait RpcDispatch: Send + Sync + 'static {
    /// Dispatch a JSON-RPC method call and return the result.
    async fn dispatch(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ScribaError>;
}

/// RPC server accepting conversion clients.
pub struct RpcServer;

impl RpcServer {
    /// Start the server on the given interface and port.
    ///
    /// Port 0 binds an OS-assigned port, which tests rely on. The server
    /// runs in background tokio tasks until the handle shuts it down.
    pub async fn start<D: RpcDispatch>(
        interface: &str,
        port: u16,
        dispatch: Arc<D>,
    ) -> Result<RpcServerHandle> {
        let listener = TcpListener::bind((interface, port)).await.map_err(|e| {
            ScribaError::Io {
                message: format!("Failed to bind {}:{}: {}", interface, port, e),
                path: None,
                source: Some(e),
            }
        })?;
        let addr = listener.local_addr()?;

        info!("RPC server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            dispatch,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(RpcServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop<D: RpcDispatch>(
        listener: TcpListener,
        dispatch: Arc<D>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        let mut connections = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("RPC server shutting down");
                    break;
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= ListenerConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr,
                                    ListenerConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let dispatch = dispatch.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            connections.spawn(async move {
                                debug!("Connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, &*dispatch, &mut conn_shutdown).await {
                                    debug!("Connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }

        // In-flight requests finish their response writes before the
        // process tears anything else down
        let drain = async {
            while connections.join_next().await.is_some() {}
        };
        if tokio::time::timeout(ListenerConfig::SHUTDOWN_DRAIN_TIMEOUT, drain)
            .await
            .is_err()
        {
            warn!(
                "Dropping {} connection(s) that did not finish in time",
                connections.len()
            );
            connections.shutdown().await;
        }
    }

    async fn handle_connection<D: RpcDispatch>(
        mut stream: TcpStream,
        dispatch: &D,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (mut reader, mut writer) = stream.split();

        loop {
            // Wait for either a frame or a shutdown signal
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(()), // Clean disconnect
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(()); // Server shutting down
                }
            };

            let request_str = String::from_utf8(frame).map_err(|_| ScribaError::Protocol {
                message: "Invalid UTF-8 in frame".to_string(),
            })?;

            let response = Self::process_request(&request_str, dispatch).await;

            let response_bytes = serde_json::to_vec(&response)?;
            write_frame(&mut writer, &response_bytes).await?;
        }
    }

    async fn process_request<D: RpcDispatch>(request_str: &str, dispatch: &D) -> RpcResponse {
        let request: RpcRequest = match serde_json::from_str(request_str) {
            Ok(req) => req,
            Err(e) => {
                return RpcResponse::error(None, -32700, format!("Parse error: {}", e));
            }
        };

        if request.jsonrpc != "2.0" {
            return RpcResponse::error(
                request.id,
                -32600,
                "Invalid Request: expected jsonrpc 2.0".to_string(),
            );
        }

        let params = request
            .params
            .unwrap_or(serde_json::Value::Object(Default::default()));

        let started = std::time::Instant::now();
        match dispatch.dispatch(&request.method, params).await {
            Ok(result) => {
                debug!(
                    method = %request.method,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request served"
                );
                RpcResponse::success(request.id, result)
            }
            Err(e) => {
                debug!(
                    method = %request.method,
                    code = e.to_rpc_error_code(),
                    "Request failed: {}",
                    e
                );
                RpcResponse::fault(request.id, &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoDispatch;

    #[async_trait::async_trait]
    impl RpcDispatch for EchoDispatch {
        async fn dispatch(
            &self,
            method: &str,
            params: serde_json::Value,
        ) -> std::result::Result<serde_json::Value, ScribaError> {
            match method {
                "echo" => Ok(params),
                "fail" => Err(ScribaError::ConversionFailed {
                    message: "test failure".to_string(),
                }),
                "slow_fail" => {
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    Err(ScribaError::ConversionTimeout(
                        std::time::Duration::from_millis(200),
                    ))
                }
                other => Err(ScribaError::UnknownMethod(other.to_string())),
            }
        }
    }

    async fn start_echo_server() -> RpcServerHandle {
        RpcServer::start("127.0.0.1", 0, Arc::new(EchoDispatch))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_server_start_and_shutdown() {
        let mut handle = start_echo_server().await;

        assert!(handle.addr().port() > 0);
        assert_eq!(handle.addr().ip(), std::net::Ipv4Addr::LOCALHOST);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_response() {
        let mut handle = start_echo_server().await;

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (mut reader, mut writer) = stream.split();

        let request = RpcRequest::new("slow_fail", serde_json::json!({}), 7);
        let request_bytes = serde_json::to_vec(&request).unwrap();
        write_frame(&mut writer, &request_bytes).await.unwrap();

        // Shut down while the request is still being handled
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.shutdown().await;

        // The fault frame was flushed before the server went away
        let response_bytes = read_frame(&mut reader).await.unwrap().unwrap();
        let response: RpcResponse = serde_json::from_slice(&response_bytes).unwrap();
        assert_eq!(response.error.unwrap().code, -32003);
    }

    #[tokio::test]
    async fn test_server_echo_roundtrip() {
        let mut handle = start_echo_server().await;

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (mut reader, mut writer) = stream.split();

        let request = RpcRequest::new("echo", serde_json::json!({"hello": "world"}), 1);
        let request_bytes = serde_json::to_vec(&request).unwrap();
        write_frame(&mut writer, &request_bytes).await.unwrap();

        let response_bytes = read_frame(&mut reader).await.unwrap().unwrap();
        let response: RpcResponse = serde_json::from_slice(&response_bytes).unwrap();

        assert!(response.error.is_none());
        assert_eq!(response.result, Some(serde_json::json!({"hello": "world"})));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_fault_carries_error_code() {
        let mut handle = start_echo_server().await;

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (mut reader, mut writer) = stream.split();

        let request = RpcRequest::new("fail", serde_json::json!({}), 2);
        let request_bytes = serde_json::to_vec(&request).unwrap();
        write_frame(&mut writer, &request_bytes).await.unwrap();

        let response_bytes = read_frame(&mut reader).await.unwrap().unwrap();
        let response: RpcResponse = serde_json::from_slice(&response_bytes).unwrap();

        let err = response.error.unwrap();
        assert_eq!(err.code, -32002);
        assert!(err.message.contains("test failure"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_unknown_method_is_method_not_found() {
        let mut handle = start_echo_server().await;

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (mut reader, mut writer) = stream.split();

        let request = RpcRequest::new("frobnicate", serde_json::json!({}), 3);
        let request_bytes = serde_json::to_vec(&request).unwrap();
        write_frame(&mut writer, &request_bytes).await.unwrap();

        let response_bytes = read_frame(&mut reader).await.unwrap().unwrap();
        let response: RpcResponse = serde_json::from_slice(&response_bytes).unwrap();

        assert_eq!(response.error.unwrap().code, -32601);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_invalid_json_returns_parse_error() {
        let mut handle = start_echo_server().await;

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        let (mut reader, mut writer) = stream.split();

        write_frame(&mut writer, b"not valid json").await.unwrap();

        let response_bytes = read_frame(&mut reader).await.unwrap().unwrap();
        let response: RpcResponse = serde_json::from_slice(&response_bytes).unwrap();

        assert_eq!(response.error.unwrap().code, -32700);

        handle.shutdown().await;
    }
}

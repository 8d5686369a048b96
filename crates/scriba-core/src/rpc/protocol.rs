//! Wire protocol types and framing.
//!
//! Both the public channel and the engine control socket speak JSON-RPC
//! 2.0 over TCP with a 4-byte big-endian length prefix:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```

use crate::config::ListenerConfig;
use crate::engine::FilterOption;
use crate::transport::WireDocument;
use crate::{Result, ScribaError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

impl RpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(method: impl Into<String>, params: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(serde_json::Value::Number(id.into())),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcFault>,
    pub id: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response from a service error, carrying its code
    /// and structured payload.
    pub fn fault(id: Option<serde_json::Value>, err: &ScribaError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcFault {
                code: err.to_rpc_error_code(),
                message: err.to_string(),
                data: err.fault_data(),
            }),
            id,
        }
    }

    /// Create an error response from raw parts.
    pub fn error(id: Option<serde_json::Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcFault {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFault {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Parameters of the `convert` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertParams {
    pub input: WireDocument,
    /// Server-side output path; absent when the client wants bytes back.
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    /// Target format name or suffix, e.g. `pdf`.
    #[serde(default)]
    pub convert_to: Option<String>,
    /// Explicit import filter name.
    #[serde(default)]
    pub input_filter: Option<String>,
    /// Explicit export filter name; overrides `convert_to`.
    #[serde(default)]
    pub output_filter: Option<String>,
    #[serde(default)]
    pub filter_options: Vec<FilterOption>,
    #[serde(default = "default_update_index")]
    pub update_index: bool,
}

fn default_update_index() -> bool {
    true
}

/// Parameters of the `compare` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareParams {
    pub old: WireDocument,
    pub new: WireDocument,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    /// Output format name or suffix for the comparison result.
    #[serde(default)]
    pub file_type: Option<String>,
}

/// Result of `convert` and `compare`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertOutcome {
    /// The server wrote the output file itself.
    Written { path: PathBuf },
    /// Produced bytes, returned inline.
    Data {
        #[serde(with = "crate::transport::base64_bytes")]
        data: Vec<u8>,
    },
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > ListenerConfig::MAX_FRAME_SIZE {
        return Err(ScribaError::Protocol {
            message: format!(
                "Frame size {} exceeds maximum {}",
                len,
                ListenerConfig::MAX_FRAME_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_roundtrip() {
        let req = RpcRequest::new("get_version", serde_json::json!({}), 1);
        let json = serde_json::to_string(&req).unwrap();
        let parsed: RpcRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.jsonrpc, "2.0");
        assert_eq!(parsed.method, "get_version");
        assert_eq!(parsed.id, Some(serde_json::Value::Number(1.into())));
    }

    #[test]
    fn test_fault_response_carries_data() {
        let err = ScribaError::UnknownFilter {
            name: "bogus".into(),
            direction: "export".into(),
            known: vec!["writer_pdf_Export".into()],
        };
        let resp = RpcResponse::fault(Some(serde_json::Value::Number(7.into())), &err);

        let fault = resp.error.unwrap();
        assert_eq!(fault.code, -32001);
        assert_eq!(fault.data.unwrap()["known"][0], "writer_pdf_Export");
    }

    #[test]
    fn test_convert_params_defaults() {
        let params: ConvertParams = serde_json::from_value(serde_json::json!({
            "input": { "path": "/tmp/in.odt" },
        }))
        .unwrap();

        assert!(params.update_index);
        assert!(params.filter_options.is_empty());
        assert!(params.output_filter.is_none());
    }

    #[test]
    fn test_convert_outcome_roundtrip() {
        let outcome = ConvertOutcome::Data {
            data: b"%PDF-1.7".to_vec(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        let back: ConvertOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);

        let written = ConvertOutcome::Written {
            path: "/tmp/out.pdf".into(),
        };
        let json = serde_json::to_string(&written).unwrap();
        let back: ConvertOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, written);
    }

    #[tokio::test]
    async fn test_frame_read_write_roundtrip() {
        let payload = b"hello world";
        let mut buf = Vec::new();

        write_frame(&mut buf, payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor).await.unwrap();

        assert_eq!(read_back, Some(payload.to_vec()));
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_frame_read_oversized_returns_error() {
        // Craft a frame header claiming a huge payload
        let huge_len: u32 = (ListenerConfig::MAX_FRAME_SIZE + 1) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&huge_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]); // some bytes but not enough

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(result.is_err());
    }
}

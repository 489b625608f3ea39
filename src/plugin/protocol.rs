//! JSON-RPC 2.0 over JSONL, the wire format between the host and its plugins.
//!
//! Both sides send requests, notifications and responses over the same pair of
//! pipes, so a single [`RpcMessage`] shape covers all three.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Message identifier (number or string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Num(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    #[serde(default = "version")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// What an incoming message means to us.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request {
        id: RpcId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: RpcId,
        result: Result<Value, RpcError>,
    },
    /// Neither a method nor an id.
    Invalid,
}

fn version() -> String {
    "2.0".to_string()
}

impl RpcMessage {
    fn empty() -> Self {
        RpcMessage {
            jsonrpc: version(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    pub fn request(id: RpcId, method: impl Into<String>, params: Value) -> Self {
        RpcMessage {
            id: Some(id),
            method: Some(method.into()),
            params: Some(params),
            ..Self::empty()
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        RpcMessage {
            method: Some(method.into()),
            params: Some(params),
            ..Self::empty()
        }
    }

    /// A response always carries `result`, even when it is null.
    pub fn response(id: RpcId, result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(value) => RpcMessage {
                id: Some(id),
                result: Some(value),
                ..Self::empty()
            },
            Err(error) => RpcMessage {
                id: Some(id),
                error: Some(error),
                ..Self::empty()
            },
        }
    }

    pub fn classify(self) -> Incoming {
        let params = self.params.unwrap_or(Value::Null);
        match (self.method, self.id) {
            (Some(method), Some(id)) => Incoming::Request { id, method, params },
            (Some(method), None) => Incoming::Notification { method, params },
            (None, Some(id)) => Incoming::Response {
                id,
                result: match self.error {
                    Some(error) => Err(error),
                    // serde reads `"result": null` as None
                    None => Ok(self.result.unwrap_or(Value::Null)),
                },
            },
            (None, None) => Incoming::Invalid,
        }
    }
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        RpcError {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("line is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

impl TransportError {
    /// A bad line that can be skipped, as opposed to a broken pipe.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TransportError::Io(_))
    }
}

/// Reads one JSON-RPC message per line.
pub struct JsonlReader<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> JsonlReader<R> {
    pub fn new(reader: R) -> Self {
        JsonlReader {
            reader,
            line: Vec::new(),
        }
    }

    /// `Ok(None)` on EOF. Blank lines are skipped. A line that isn't UTF-8 or
    /// isn't valid JSON is an error, but the whole line has been consumed and
    /// the reader can keep going afterwards.
    pub async fn read_message(&mut self) -> Result<Option<RpcMessage>, TransportError> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
                return Ok(None);
            }
            let text = String::from_utf8(std::mem::take(&mut self.line))?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(trimmed)?));
        }
    }
}

pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        JsonlWriter { writer }
    }

    pub async fn write_message(&mut self, message: &RpcMessage) -> Result<(), TransportError> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

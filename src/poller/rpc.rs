//! lightningd RPC client
//!
//! One persistent unix-socket connection per lightningd instance. Requests are
//! written as bare JSON objects; responses are read until a complete JSON
//! value has arrived, however the bytes are split across reads. Each byte is
//! scanned once and the value is parsed once it is known to be complete, so a
//! multi-megabyte `listnodes` reply costs time linear in its size.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use super::protocol::{JsonRpcRequest, JsonRpcResponse, ListNodesResult, ListedNode};
use crate::types::NodeId;

const READ_CHUNK: usize = 16 * 1024;

/// Upstream failure. Any of these aborts the current poll cycle only.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("cannot connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("rpc i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed rpc response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rpc error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("rpc response has neither result nor error")]
    MissingResult,

    #[error("rpc response id {got} does not match request id {expected}")]
    UnexpectedId { expected: u64, got: String },

    #[error("rpc connection closed by peer")]
    Closed,
}

/// Where a poller gets the current node list from
#[async_trait]
pub trait NodeSource: Send {
    /// Check the upstream is reachable; returns a short description of it
    async fn probe(&mut self) -> Result<String, RpcError>;

    /// Every node the upstream currently knows about
    async fn list_nodes(&mut self) -> Result<Vec<ListedNode>, RpcError>;

    /// For log lines
    fn describe(&self) -> String;
}

/// Subset of `getinfo` used for the startup probe
#[derive(Debug, Clone, Deserialize)]
pub struct GetInfo {
    pub id: String,

    #[serde(default)]
    pub alias: String,

    #[serde(default)]
    pub network: String,
}

/// JSON-RPC client for a lightningd unix socket
pub struct LightningRpc {
    socket_path: PathBuf,
    timeout: Duration,
    stream: Option<UnixStream>,
    buffer: Vec<u8>,
    scanner: FrameScanner,
    next_id: u64,
}

impl LightningRpc {
    pub fn new(socket_path: PathBuf, timeout: Duration) -> Self {
        Self {
            socket_path,
            timeout,
            stream: None,
            buffer: Vec::new(),
            scanner: FrameScanner::default(),
            next_id: 1,
        }
    }

    pub async fn getinfo(&mut self) -> Result<GetInfo, RpcError> {
        self.call("getinfo").await
    }

    pub async fn listnodes(&mut self) -> Result<ListNodesResult, RpcError> {
        self.call("listnodes").await
    }

    /// One request/response exchange. On any failure the connection is
    /// dropped and re-established by the next call.
    async fn call<T: DeserializeOwned>(&mut self, method: &str) -> Result<T, RpcError> {
        let result = match tokio::time::timeout(self.timeout, self.round_trip(method)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(self.timeout)),
        };

        if result.is_err() {
            self.stream = None;
            self.buffer.clear();
            self.scanner = FrameScanner::default();
        }

        Ok(serde_json::from_value(result?)?)
    }

    async fn round_trip(&mut self, method: &str) -> Result<serde_json::Value, RpcError> {
        if self.stream.is_none() {
            let stream = UnixStream::connect(&self.socket_path)
                .await
                .map_err(|source| RpcError::Connect {
                    path: self.socket_path.clone(),
                    source,
                })?;
            debug!("Connected to lightningd at {}", self.socket_path.display());
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(RpcError::Closed);
        };

        let id = self.next_id;
        self.next_id += 1;

        let request = serde_json::to_vec(&JsonRpcRequest::new(id, method))?;
        stream.write_all(&request).await?;

        let response = loop {
            if let Some(response) = take_response(&mut self.buffer, &mut self.scanner)? {
                break response;
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(RpcError::Closed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        };

        match &response.id {
            Some(serde_json::Value::Number(n)) if n.as_u64() == Some(id) => {}
            other => {
                return Err(RpcError::UnexpectedId {
                    expected: id,
                    got: other.as_ref().map(|v| v.to_string()).unwrap_or_default(),
                })
            }
        }

        if let Some(error) = response.error {
            return Err(RpcError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        response.result.ok_or(RpcError::MissingResult)
    }
}

/// Finds where the first top-level JSON value in a growing buffer ends.
/// State carries across calls so every byte is looked at once.
#[derive(Debug, Default)]
struct FrameScanner {
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl FrameScanner {
    /// End offset of the first complete value, once one has arrived. A
    /// top-level byte that cannot open an object or array also ends the
    /// frame, leaving the parser to report it.
    fn frame_end(&mut self, buffer: &[u8]) -> Option<usize> {
        while self.scanned < buffer.len() {
            let byte = buffer[self.scanned];
            self.scanned += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Some(self.scanned);
                    }
                }
                _ if self.depth == 0 && !byte.is_ascii_whitespace() => {
                    return Some(self.scanned);
                }
                _ => {}
            }
        }
        None
    }
}

/// Pop the first complete JSON value off `buffer`, if one has fully arrived
fn take_response(
    buffer: &mut Vec<u8>,
    scanner: &mut FrameScanner,
) -> Result<Option<JsonRpcResponse>, RpcError> {
    let Some(end) = scanner.frame_end(buffer) else {
        return Ok(None);
    };
    *scanner = FrameScanner::default();

    let response = serde_json::from_slice(&buffer[..end]);
    buffer.drain(..end);
    Ok(Some(response?))
}

#[async_trait]
impl NodeSource for LightningRpc {
    async fn probe(&mut self) -> Result<String, RpcError> {
        let info = self.getinfo().await?;
        let short_id = NodeId::from_hex(&info.id)
            .map(|id| id.short())
            .unwrap_or(info.id);
        Ok(format!("{} ({}) on {}", info.alias, short_id, info.network))
    }

    async fn list_nodes(&mut self) -> Result<Vec<ListedNode>, RpcError> {
        let result = self.listnodes().await?;
        let total = result.nodes.len();

        let nodes: Vec<ListedNode> = result
            .nodes
            .into_iter()
            .filter_map(|node| node.into_listed())
            .collect();

        if nodes.len() < total {
            debug!("Ignored {} nodes with invalid ids", total - nodes.len());
        }
        Ok(nodes)
    }

    fn describe(&self) -> String {
        self.socket_path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::net::UnixListener;

    const NODE_A: &str = "02eec7245d6b7d2ccb30380bfbe2a3648cd7a942653f5aa340edcea1f283686619";

    /// Minimal lightningd stand-in: answers every request with `reply(method)`,
    /// writing each response in two halves
    fn spawn_fake_lightningd(path: PathBuf, reply: fn(&str) -> Option<Value>) {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    loop {
                        let mut chunk = [0u8; 1024];
                        let n = match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buffer.extend_from_slice(&chunk[..n]);

                        let Ok(request) = serde_json::from_slice::<Value>(&buffer) else {
                            continue;
                        };
                        buffer.clear();

                        let method = request["method"].as_str().unwrap_or_default();
                        let Some(body) = reply(method) else {
                            continue; // never answer
                        };
                        let mut response = json!({ "jsonrpc": "2.0", "id": request["id"] });
                        let object = response.as_object_mut().unwrap();
                        for (k, v) in body.as_object().unwrap() {
                            object.insert(k.clone(), v.clone());
                        }

                        let bytes = format!("{}\n\n", response).into_bytes();
                        let (head, tail) = bytes.split_at(bytes.len() / 2);
                        stream.write_all(head).await.unwrap();
                        stream.flush().await.unwrap();
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        stream.write_all(tail).await.unwrap();
                    }
                });
            }
        });
    }

    fn lightningd_reply(method: &str) -> Option<Value> {
        match method {
            "getinfo" => Some(json!({ "result": { "id": NODE_A, "alias": "fake", "network": "bitcoin" } })),
            "listnodes" => Some(json!({ "result": { "nodes": [
                { "nodeid": NODE_A, "addresses": [
                    { "type": "ipv4", "address": "203.0.113.7", "port": 9735 },
                    { "type": "torv3", "address": "x.onion", "port": 9735 }
                ]},
                { "nodeid": "not-hex" }
            ]}})),
            "hang" => None,
            _ => Some(json!({ "error": { "code": -32601, "message": "Unknown command" } })),
        }
    }

    #[tokio::test]
    async fn test_listnodes_over_split_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lightning-rpc");
        spawn_fake_lightningd(path.clone(), lightningd_reply);

        let mut rpc = LightningRpc::new(path, Duration::from_secs(2));
        let nodes = rpc.list_nodes().await.unwrap();

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id.to_string(), NODE_A);
        assert_eq!(nodes[0].addresses.len(), 1);
    }

    #[tokio::test]
    async fn test_connection_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lightning-rpc");
        spawn_fake_lightningd(path.clone(), lightningd_reply);

        let mut rpc = LightningRpc::new(path, Duration::from_secs(2));
        let description = rpc.probe().await.unwrap();
        assert_eq!(description, "fake (02eec7245d6b7d2c) on bitcoin");
        assert!(rpc.stream.is_some());

        rpc.list_nodes().await.unwrap();
        rpc.list_nodes().await.unwrap();
        assert_eq!(rpc.next_id, 4);
        assert!(rpc.buffer.iter().all(|b| b.is_ascii_whitespace()));
    }

    #[tokio::test]
    async fn test_remote_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lightning-rpc");
        spawn_fake_lightningd(path.clone(), lightningd_reply);

        let mut rpc = LightningRpc::new(path, Duration::from_secs(2));
        let err = rpc.call::<Value>("bogus").await.unwrap_err();
        assert!(matches!(err, RpcError::Remote { code: -32601, .. }));

        // Connection is re-established after a failure
        assert!(rpc.list_nodes().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut rpc = LightningRpc::new(dir.path().join("missing"), Duration::from_secs(1));

        let err = rpc.list_nodes().await.unwrap_err();
        assert!(matches!(err, RpcError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_timeout_drops_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lightning-rpc");
        spawn_fake_lightningd(path.clone(), lightningd_reply);

        let mut rpc = LightningRpc::new(path, Duration::from_millis(200));
        let err = rpc.call::<Value>("hang").await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
        assert!(rpc.stream.is_none());

        assert_eq!(rpc.list_nodes().await.unwrap().len(), 1);
    }

    #[test]
    fn test_take_response_waits_for_complete_value() {
        let mut scanner = FrameScanner::default();
        let mut buffer = br#"{"jsonrpc":"2.0","id":1,"result":{"no"#.to_vec();
        assert!(take_response(&mut buffer, &mut scanner).unwrap().is_none());

        buffer.extend_from_slice(br#"des":[]}}  {"id":2"#);
        let response = take_response(&mut buffer, &mut scanner).unwrap().unwrap();
        assert!(response.result.is_some());
        assert_eq!(buffer, br#"  {"id":2"#.to_vec());
        assert!(take_response(&mut buffer, &mut scanner).unwrap().is_none());

        let mut garbage = b"}{".to_vec();
        assert!(take_response(&mut garbage, &mut FrameScanner::default()).is_err());
    }

    #[test]
    fn test_braces_inside_strings_do_not_end_frame() {
        let mut scanner = FrameScanner::default();
        let mut buffer = br#"{"id":1,"result":{"alias":"}\"{]"#.to_vec();
        assert!(take_response(&mut buffer, &mut scanner).unwrap().is_none());

        buffer.extend_from_slice(br#"","nodes":[]}}"#);
        let response = take_response(&mut buffer, &mut scanner).unwrap().unwrap();
        assert_eq!(response.result.unwrap()["alias"], "}\"{]");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_large_listnodes_reply_read_in_chunks() {
        let node = json!({ "nodeid": NODE_A, "alias": "{\"node\"}", "addresses": [
            { "type": "ipv4", "address": "203.0.113.7", "port": 9735 },
            { "type": "ipv6", "address": "2001:db8::7", "port": 9735 }
        ]});
        let nodes: Vec<Value> = std::iter::repeat(node).take(30_000).collect();
        let body = format!(
            "{}\n\n",
            json!({ "jsonrpc": "2.0", "id": 1, "result": { "nodes": nodes } })
        )
        .into_bytes();
        assert!(body.len() > 4 * 1024 * 1024);

        let started = std::time::Instant::now();
        let mut scanner = FrameScanner::default();
        let mut buffer = Vec::new();
        let mut response = None;
        for chunk in body.chunks(READ_CHUNK) {
            buffer.extend_from_slice(chunk);
            if let Some(parsed) = take_response(&mut buffer, &mut scanner).unwrap() {
                response = Some(parsed);
                break;
            }
            // Nothing already seen is scanned again
            assert_eq!(scanner.scanned, buffer.len());
        }

        let result: ListNodesResult = serde_json::from_value(response.unwrap().result.unwrap()).unwrap();
        assert_eq!(result.nodes.len(), 30_000);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}

//! Remote storage calls
//!
//! The wire protocol is not part of this crate. Remote nodes are reached
//! through [`RpcClient`]; the storage side of every call is [`NodeService`],
//! which executes a method against its local disks and answers with a
//! `{code, message, result}` envelope.
//!
//! [`InProcessRpc`] connects clients to `NodeService`s living in the same
//! process, with per-node fault injection, so several nodes can be simulated
//! without sockets.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::local::LocalDiskStore;
use crate::error::{Error, Result};
use crate::topology::split_endpoint;

/// Storage method names
pub mod methods {
    pub const WRITE_CHUNK: &str = "storage.writeChunk";
    pub const READ_CHUNK: &str = "storage.readChunk";
    pub const WRITE_META: &str = "storage.writeMeta";
    pub const READ_META: &str = "storage.readMeta";
    pub const DELETE_CHUNK: &str = "storage.deleteChunk";
    pub const DELETE_OBJECT: &str = "storage.deleteObject";
}

pub(crate) fn b64_encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub(crate) fn b64_decode(text: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| Error::Corrupt(format!("invalid base64 payload: {}", e)))
}

// =============================================================================
// Client Contract
// =============================================================================

/// Client side of the storage RPC
pub trait RpcClient: Send + Sync {
    /// JSON request/response call
    fn call(&self, endpoint: &str, method: &str, params: Value, timeout: Duration) -> Result<Value>;

    /// Whether `send_binary` / `fetch_binary` are available
    fn supports_binary(&self) -> bool {
        false
    }

    /// Call carrying a raw payload alongside the JSON params
    fn send_binary(
        &self,
        endpoint: &str,
        method: &str,
        _params: Value,
        _payload: &[u8],
        _timeout: Duration,
    ) -> Result<Value> {
        Err(Error::Network {
            endpoint: endpoint.to_string(),
            reason: format!("binary transport unsupported for {}", method),
        })
    }

    /// Call whose answer is a raw payload
    fn fetch_binary(
        &self,
        endpoint: &str,
        method: &str,
        _params: Value,
        _timeout: Duration,
    ) -> Result<Vec<u8>> {
        Err(Error::Network {
            endpoint: endpoint.to_string(),
            reason: format!("binary transport unsupported for {}", method),
        })
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Status codes carried in the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RpcCode {
    Ok = 0,
    InvalidArgument = 1,
    NotFound = 2,
    Io = 3,
    Corrupt = 4,
    NoMemory = 5,
    Internal = 6,
    Timeout = 7,
    Quorum = 8,
    Unavailable = 9,
}

impl RpcCode {
    fn from_i32(code: i32) -> Self {
        match code {
            0 => RpcCode::Ok,
            1 => RpcCode::InvalidArgument,
            2 => RpcCode::NotFound,
            3 => RpcCode::Io,
            4 => RpcCode::Corrupt,
            5 => RpcCode::NoMemory,
            7 => RpcCode::Timeout,
            8 => RpcCode::Quorum,
            9 => RpcCode::Unavailable,
            _ => RpcCode::Internal,
        }
    }

    fn for_error(err: &Error) -> Self {
        match err {
            Error::InvalidArgument(_) => RpcCode::InvalidArgument,
            Error::NotFound(_) => RpcCode::NotFound,
            Error::Io(_) => RpcCode::Io,
            Error::Corrupt(_) => RpcCode::Corrupt,
            Error::NoMemory(_) => RpcCode::NoMemory,
            Error::Timeout { .. } => RpcCode::Timeout,
            Error::Quorum { .. } => RpcCode::Quorum,
            Error::Network { .. } => RpcCode::Unavailable,
            _ => RpcCode::Internal,
        }
    }
}

/// `{code, message, result}` response envelope
///
/// Errors that carry fields (timeouts, quorum shortfalls, unreachable
/// peers) put them under `result` so the caller can rebuild the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub result: Value,
}

impl RpcResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            code: RpcCode::Ok as i32,
            message: String::new(),
            result,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        let result = match err {
            Error::Timeout {
                endpoint,
                method,
                timeout_ms,
            } => serde_json::json!({ "endpoint": endpoint, "method": method, "timeout_ms": timeout_ms }),
            Error::Quorum {
                available,
                required,
            } => serde_json::json!({ "available": available, "required": required }),
            Error::Network { endpoint, reason } => {
                serde_json::json!({ "endpoint": endpoint, "reason": reason })
            }
            _ => Value::Null,
        };
        Self {
            code: RpcCode::for_error(err) as i32,
            message: err.to_string(),
            result,
        }
    }

    /// Map the envelope back onto the error taxonomy
    pub fn into_result(self, endpoint: &str) -> Result<Value> {
        let field = |name: &str| self.result.get(name).and_then(Value::as_u64);
        let text = |name: &str| {
            self.result
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        match RpcCode::from_i32(self.code) {
            RpcCode::Ok => Ok(self.result),
            RpcCode::InvalidArgument => Err(Error::InvalidArgument(self.message)),
            RpcCode::NotFound => Err(Error::NotFound(self.message)),
            RpcCode::Io => Err(Error::Io(std::io::Error::other(self.message))),
            RpcCode::Corrupt => Err(Error::Corrupt(self.message)),
            RpcCode::NoMemory => Err(Error::NoMemory(self.message)),
            RpcCode::Timeout => Err(Error::Timeout {
                endpoint: text("endpoint").unwrap_or_else(|| endpoint.to_string()),
                method: text("method").unwrap_or_default(),
                timeout_ms: field("timeout_ms").unwrap_or_default(),
            }),
            RpcCode::Quorum => Err(Error::Quorum {
                available: field("available").unwrap_or_default() as usize,
                required: field("required").unwrap_or_default() as usize,
            }),
            RpcCode::Unavailable => Err(Error::Network {
                endpoint: text("endpoint").unwrap_or_else(|| endpoint.to_string()),
                reason: text("reason").unwrap_or(self.message),
            }),
            RpcCode::Internal => Err(Error::Network {
                endpoint: endpoint.to_string(),
                reason: self.message,
            }),
        }
    }
}

/// Parameters shared by every storage method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageParams {
    pub disk_path: PathBuf,
    /// Object hash as 16 hex digits
    pub object_hash: String,
    /// 1-based chunk index, absent for metadata and delete calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Base64 payload on the JSON fallback path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl StorageParams {
    pub fn new(disk_path: PathBuf, object_hash: u64) -> Self {
        Self {
            disk_path,
            object_hash: crate::hash::object_hash_hex(object_hash),
            index: None,
            data: None,
        }
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_data(mut self, data: &[u8]) -> Self {
        self.data = Some(b64_encode(data));
        self
    }

    fn hash(&self) -> Result<u64> {
        u64::from_str_radix(&self.object_hash, 16).map_err(|_| {
            Error::InvalidArgument(format!("malformed object hash '{}'", self.object_hash))
        })
    }

    fn chunk_index(&self) -> Result<usize> {
        match self.index {
            Some(i) if i >= 1 => Ok(i),
            _ => Err(Error::InvalidArgument("chunk index must be >= 1".to_string())),
        }
    }

    fn payload(&self, binary: Option<&[u8]>) -> Result<Vec<u8>> {
        match (binary, &self.data) {
            (Some(bytes), _) => Ok(bytes.to_vec()),
            (None, Some(text)) => b64_decode(text),
            (None, None) => Err(Error::InvalidArgument("missing payload".to_string())),
        }
    }
}

// =============================================================================
// Storage Side
// =============================================================================

/// Reply produced by the storage dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceReply {
    Json(Value),
    Binary(Vec<u8>),
}

/// Executes storage methods against the disks of one node
#[derive(Debug, Clone, Default)]
pub struct NodeService {
    store: LocalDiskStore,
}

impl NodeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one method; `payload` carries the binary body when present
    pub fn dispatch(&self, method: &str, params: Value, payload: Option<&[u8]>) -> Result<ServiceReply> {
        let params: StorageParams = serde_json::from_value(params)
            .map_err(|e| Error::InvalidArgument(format!("bad params for {}: {}", method, e)))?;
        let hash = params.hash()?;
        let disk = params.disk_path.as_path();

        match method {
            methods::WRITE_CHUNK => {
                let data = params.payload(payload)?;
                self.store.write_chunk(disk, hash, params.chunk_index()?, &data)?;
                Ok(ServiceReply::Json(serde_json::json!({ "written": data.len() })))
            }
            methods::READ_CHUNK => Ok(ServiceReply::Binary(
                self.store.read_chunk(disk, hash, params.chunk_index()?)?,
            )),
            methods::WRITE_META => {
                let data = params.payload(payload)?;
                self.store.write_meta(disk, hash, &data)?;
                Ok(ServiceReply::Json(serde_json::json!({ "written": data.len() })))
            }
            methods::READ_META => Ok(ServiceReply::Binary(self.store.read_meta(disk, hash)?)),
            methods::DELETE_CHUNK => {
                self.store.delete_chunk(disk, hash, params.chunk_index()?)?;
                Ok(ServiceReply::Json(serde_json::json!({ "deleted": true })))
            }
            methods::DELETE_OBJECT => {
                self.store.delete_object(disk, hash)?;
                Ok(ServiceReply::Json(serde_json::json!({ "deleted": true })))
            }
            other => Err(Error::InvalidArgument(format!("unknown method '{}'", other))),
        }
    }

    /// JSON entry point: binary replies are base64 encoded under `data`
    pub fn handle(&self, method: &str, params: Value) -> RpcResponse {
        match self.dispatch(method, params, None) {
            Ok(ServiceReply::Json(v)) => RpcResponse::ok(v),
            Ok(ServiceReply::Binary(bytes)) => {
                RpcResponse::ok(serde_json::json!({ "data": b64_encode(&bytes) }))
            }
            Err(e) => {
                if !e.is_not_found() {
                    warn!(method, error = %e, "Storage call failed");
                }
                RpcResponse::from_error(&e)
            }
        }
    }
}

// =============================================================================
// In-Process Client
// =============================================================================

/// Routes calls to `NodeService`s registered by endpoint
pub struct InProcessRpc {
    nodes: DashMap<String, Arc<NodeService>>,
    down: DashSet<String>,
    delays: DashMap<String, Duration>,
    binary: bool,
}

impl InProcessRpc {
    pub fn new() -> Self {
        Self::with_binary(true)
    }

    /// Client that does (or does not) advertise the binary path
    pub fn with_binary(binary: bool) -> Self {
        Self {
            nodes: DashMap::new(),
            down: DashSet::new(),
            delays: DashMap::new(),
            binary,
        }
    }

    pub fn register(&self, endpoint: &str, service: Arc<NodeService>) {
        self.nodes.insert(route_key(endpoint), service);
    }

    /// Mark a node unreachable (or reachable again)
    pub fn set_down(&self, endpoint: &str, down: bool) {
        let key = route_key(endpoint);
        if down {
            self.down.insert(key);
        } else {
            self.down.remove(&key);
        }
    }

    /// Simulated response latency for a node
    pub fn set_delay(&self, endpoint: &str, delay: Option<Duration>) {
        let key = route_key(endpoint);
        match delay {
            Some(d) => {
                self.delays.insert(key, d);
            }
            None => {
                self.delays.remove(&key);
            }
        }
    }

    fn route(&self, endpoint: &str, method: &str, timeout: Duration) -> Result<Arc<NodeService>> {
        let key = route_key(endpoint);
        if self.down.contains(&key) {
            return Err(Error::Network {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        if let Some(delay) = self.delays.get(&key).map(|d| *d) {
            if delay >= timeout {
                return Err(Error::Timeout {
                    endpoint: endpoint.to_string(),
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(delay);
        }
        let node = self.nodes.get(&key).map(|n| n.value().clone());
        node.ok_or_else(|| Error::Network {
            endpoint: endpoint.to_string(),
            reason: "no route to node".to_string(),
        })
    }
}

impl Default for InProcessRpc {
    fn default() -> Self {
        Self::new()
    }
}

fn route_key(endpoint: &str) -> String {
    split_endpoint(endpoint).0.to_ascii_lowercase()
}

/// Serialize the envelope the way a wire would, then unwrap it
fn over_the_wire(endpoint: &str, response: RpcResponse) -> Result<Value> {
    let bytes = serde_json::to_vec(&response)?;
    let decoded: RpcResponse = serde_json::from_slice(&bytes)?;
    decoded.into_result(endpoint)
}

impl RpcClient for InProcessRpc {
    fn call(&self, endpoint: &str, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let node = self.route(endpoint, method, timeout)?;
        debug!(endpoint, method, "In-process RPC call");
        over_the_wire(endpoint, node.handle(method, params))
    }

    fn supports_binary(&self) -> bool {
        self.binary
    }

    fn send_binary(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Value> {
        let node = self.route(endpoint, method, timeout)?;
        let response = match node.dispatch(method, params, Some(payload)) {
            Ok(ServiceReply::Json(v)) => RpcResponse::ok(v),
            Ok(ServiceReply::Binary(_)) => RpcResponse::from_error(&Error::InvalidArgument(
                format!("{} does not return a body", method),
            )),
            Err(e) => RpcResponse::from_error(&e),
        };
        over_the_wire(endpoint, response)
    }

    fn fetch_binary(&self, endpoint: &str, method: &str, params: Value, timeout: Duration) -> Result<Vec<u8>> {
        let node = self.route(endpoint, method, timeout)?;
        match node.dispatch(method, params, None) {
            Ok(ServiceReply::Binary(bytes)) => Ok(bytes),
            Ok(ServiceReply::Json(_)) => Err(Error::Corrupt(format!(
                "{} answered without a body",
                method
            ))),
            Err(e) => over_the_wire(endpoint, RpcResponse::from_error(&e)).map(|_| Vec::new()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const NODE: &str = "http://node1:9000";
    const TIMEOUT: Duration = Duration::from_secs(5);

    fn setup() -> (tempfile::TempDir, InProcessRpc) {
        let disk = tempfile::tempdir().unwrap();
        let rpc = InProcessRpc::new();
        rpc.register(NODE, Arc::new(NodeService::new()));
        (disk, rpc)
    }

    fn params(disk: &tempfile::TempDir) -> StorageParams {
        StorageParams::new(disk.path().to_path_buf(), 0x1234)
    }

    #[test]
    fn test_envelope_code_mapping() {
        let not_found = RpcResponse::from_error(&Error::NotFound("x".into()));
        assert_eq!(not_found.code, 2);
        assert_matches!(not_found.into_result(NODE), Err(Error::NotFound(_)));

        let corrupt = RpcResponse::from_error(&Error::Corrupt("bad".into()));
        assert_matches!(corrupt.into_result(NODE), Err(Error::Corrupt(_)));

        let unknown = RpcResponse {
            code: 99,
            message: "boom".into(),
            result: Value::Null,
        };
        assert_matches!(unknown.into_result(NODE), Err(Error::Network { .. }));
    }

    #[test]
    fn test_timeout_and_quorum_cross_the_envelope() {
        let timeout = RpcResponse::from_error(&Error::Timeout {
            endpoint: "http://node3:9000".into(),
            method: methods::READ_CHUNK.into(),
            timeout_ms: 750,
        });
        assert_eq!(timeout.code, RpcCode::Timeout as i32);
        let wire: RpcResponse = serde_json::from_slice(&serde_json::to_vec(&timeout).unwrap()).unwrap();
        assert_matches!(
            wire.into_result(NODE),
            Err(Error::Timeout { endpoint, method, timeout_ms: 750 })
                if endpoint == "http://node3:9000" && method == methods::READ_CHUNK
        );

        let quorum = RpcResponse::from_error(&Error::Quorum {
            available: 3,
            required: 4,
        });
        assert_eq!(quorum.code, RpcCode::Quorum as i32);
        assert_matches!(
            quorum.into_result(NODE),
            Err(Error::Quorum {
                available: 3,
                required: 4
            })
        );

        let unreachable = RpcResponse::from_error(&Error::Network {
            endpoint: "http://node4:9000".into(),
            reason: "connection refused".into(),
        });
        assert_matches!(
            unreachable.into_result(NODE),
            Err(Error::Network { endpoint, reason })
                if endpoint == "http://node4:9000" && reason == "connection refused"
        );
    }

    #[test]
    fn test_binary_chunk_roundtrip() {
        let (disk, rpc) = setup();
        let p = serde_json::to_value(params(&disk).with_index(2)).unwrap();

        rpc.send_binary(NODE, methods::WRITE_CHUNK, p.clone(), b"payload", TIMEOUT)
            .unwrap();
        let back = rpc.fetch_binary(NODE, methods::READ_CHUNK, p, TIMEOUT).unwrap();
        assert_eq!(back, b"payload");
    }

    #[test]
    fn test_json_fallback_roundtrip() {
        let (disk, rpc) = setup();
        let write = serde_json::to_value(params(&disk).with_data(b"meta-doc")).unwrap();
        rpc.call(NODE, methods::WRITE_META, write, TIMEOUT).unwrap();

        let read = serde_json::to_value(params(&disk)).unwrap();
        let result = rpc.call(NODE, methods::READ_META, read, TIMEOUT).unwrap();
        let data = b64_decode(result["data"].as_str().unwrap()).unwrap();
        assert_eq!(data, b"meta-doc");
    }

    #[test]
    fn test_missing_chunk_is_not_found() {
        let (disk, rpc) = setup();
        let p = serde_json::to_value(params(&disk).with_index(1)).unwrap();
        assert_matches!(
            rpc.fetch_binary(NODE, methods::READ_CHUNK, p, TIMEOUT),
            Err(Error::NotFound(_))
        );
    }

    #[test]
    fn test_node_down_and_unknown_route() {
        let (disk, rpc) = setup();
        let p = serde_json::to_value(params(&disk)).unwrap();

        rpc.set_down(NODE, true);
        assert_matches!(
            rpc.call(NODE, methods::READ_META, p.clone(), TIMEOUT),
            Err(Error::Network { .. })
        );
        rpc.set_down(NODE, false);

        assert_matches!(
            rpc.call("http://ghost:9000", methods::READ_META, p, TIMEOUT),
            Err(Error::Network { .. })
        );
    }

    #[test]
    fn test_delay_beyond_timeout() {
        let (disk, rpc) = setup();
        rpc.set_delay(NODE, Some(Duration::from_secs(10)));
        let p = serde_json::to_value(params(&disk)).unwrap();
        assert_matches!(
            rpc.call(NODE, methods::READ_META, p, TIMEOUT),
            Err(Error::Timeout { timeout_ms: 5000, .. })
        );
    }

    #[test]
    fn test_unknown_method_and_bad_index() {
        let (disk, rpc) = setup();
        let p = serde_json::to_value(params(&disk)).unwrap();
        assert_matches!(
            rpc.call(NODE, "storage.format", p.clone(), TIMEOUT),
            Err(Error::InvalidArgument(_))
        );
        assert_matches!(
            rpc.fetch_binary(NODE, methods::READ_CHUNK, p, TIMEOUT),
            Err(Error::InvalidArgument(_))
        );
    }
}

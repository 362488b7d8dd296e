//! Distributed Chunk Transport
//!
//! Moves single chunks and metadata documents to and from one disk,
//! choosing between direct file I/O and an RPC to the owning node:
//!
//! ```text
//!   DiskTarget ──▶ Locality::is_local(endpoint)?
//!                     │ yes                      │ no
//!                     ▼                          ▼
//!              LocalDiskStore            RpcClient (binary, or
//!              (temp + fsync + rename)   JSON + base64 fallback)
//! ```

pub mod local;
pub mod locality;
pub mod rpc;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::placement::DiskTarget;

pub use local::{atomic_write, chunk_file_name, LocalDiskStore, META_FILE};
pub use locality::Locality;
pub use rpc::{methods, InProcessRpc, NodeService, RpcClient, RpcResponse, StorageParams};

/// Per-direction RPC deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcTimeouts {
    pub read: Duration,
    pub write: Duration,
}

impl Default for RpcTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_millis(5_000),
            write: Duration::from_millis(60_000),
        }
    }
}

/// Chunk and metadata I/O against one disk at a time
pub struct ChunkTransport {
    locality: Locality,
    store: LocalDiskStore,
    rpc: Option<Arc<dyn RpcClient>>,
    timeouts: RpcTimeouts,
    binary_enabled: bool,
}

impl ChunkTransport {
    pub fn new(
        locality: Locality,
        rpc: Option<Arc<dyn RpcClient>>,
        timeouts: RpcTimeouts,
        binary_enabled: bool,
    ) -> Self {
        Self {
            locality,
            store: LocalDiskStore,
            rpc,
            timeouts,
            binary_enabled,
        }
    }

    /// Transport with no remote reach
    pub fn local_only() -> Self {
        Self::new(Locality::all_local(), None, RpcTimeouts::default(), true)
    }

    pub fn is_local(&self, target: &DiskTarget) -> bool {
        self.locality.is_local(&target.endpoint)
    }

    fn client(&self, target: &DiskTarget) -> Result<&Arc<dyn RpcClient>> {
        self.rpc.as_ref().ok_or_else(|| Error::Network {
            endpoint: target.endpoint.clone(),
            reason: "no RPC client configured for remote disk".to_string(),
        })
    }

    fn use_binary(&self, client: &Arc<dyn RpcClient>) -> bool {
        self.binary_enabled && client.supports_binary()
    }

    fn params(target: &DiskTarget, object_hash: u64) -> StorageParams {
        StorageParams::new(target.disk_path.clone(), object_hash)
    }

    fn send(&self, target: &DiskTarget, method: &str, params: StorageParams, data: &[u8]) -> Result<()> {
        let client = self.client(target)?;
        if self.use_binary(client) {
            client.send_binary(
                &target.endpoint,
                method,
                serde_json::to_value(&params)?,
                data,
                self.timeouts.write,
            )?;
        } else {
            client.call(
                &target.endpoint,
                method,
                serde_json::to_value(params.with_data(data))?,
                self.timeouts.write,
            )?;
        }
        Ok(())
    }

    fn fetch(&self, target: &DiskTarget, method: &str, params: StorageParams) -> Result<Vec<u8>> {
        let client = self.client(target)?;
        let params = serde_json::to_value(&params)?;
        if self.use_binary(client) {
            return client.fetch_binary(&target.endpoint, method, params, self.timeouts.read);
        }
        let result = client.call(&target.endpoint, method, params, self.timeouts.read)?;
        match result.get("data").and_then(Value::as_str) {
            Some(text) => rpc::b64_decode(text),
            None => Err(Error::Corrupt(format!(
                "{} from {} carried no data",
                method, target.endpoint
            ))),
        }
    }

    /// Store chunk `index` (1-based)
    #[instrument(skip(self, target, data), fields(disk = %target.disk_path.display(), len = data.len()))]
    pub fn write_chunk(&self, target: &DiskTarget, object_hash: u64, index: usize, data: &[u8]) -> Result<()> {
        if self.is_local(target) {
            return self.store.write_chunk(&target.disk_path, object_hash, index, data);
        }
        debug!(endpoint = %target.endpoint, index, "Writing chunk remotely");
        self.send(
            target,
            methods::WRITE_CHUNK,
            Self::params(target, object_hash).with_index(index),
            data,
        )
    }

    /// Fetch chunk `index` (1-based)
    pub fn read_chunk(&self, target: &DiskTarget, object_hash: u64, index: usize) -> Result<Vec<u8>> {
        if self.is_local(target) {
            return self.store.read_chunk(&target.disk_path, object_hash, index);
        }
        self.fetch(
            target,
            methods::READ_CHUNK,
            Self::params(target, object_hash).with_index(index),
        )
    }

    pub fn write_meta(&self, target: &DiskTarget, object_hash: u64, data: &[u8]) -> Result<()> {
        if self.is_local(target) {
            return self.store.write_meta(&target.disk_path, object_hash, data);
        }
        self.send(target, methods::WRITE_META, Self::params(target, object_hash), data)
    }

    pub fn read_meta(&self, target: &DiskTarget, object_hash: u64) -> Result<Vec<u8>> {
        if self.is_local(target) {
            return self.store.read_meta(&target.disk_path, object_hash);
        }
        self.fetch(target, methods::READ_META, Self::params(target, object_hash))
    }

    /// Remove chunk `index` (1-based), leaving the rest of the object in place
    pub fn delete_chunk(&self, target: &DiskTarget, object_hash: u64, index: usize) -> Result<()> {
        if self.is_local(target) {
            return self.store.delete_chunk(&target.disk_path, object_hash, index);
        }
        let client = self.client(target)?;
        client.call(
            &target.endpoint,
            methods::DELETE_CHUNK,
            serde_json::to_value(Self::params(target, object_hash).with_index(index))?,
            self.timeouts.write,
        )?;
        Ok(())
    }

    /// Remove the object directory from one disk
    pub fn delete_object(&self, target: &DiskTarget, object_hash: u64) -> Result<()> {
        if self.is_local(target) {
            return self.store.delete_object(&target.disk_path, object_hash);
        }
        let client = self.client(target)?;
        client.call(
            &target.endpoint,
            methods::DELETE_OBJECT,
            serde_json::to_value(Self::params(target, object_hash))?,
            self.timeouts.write,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn target(path: PathBuf, endpoint: &str) -> DiskTarget {
        DiskTarget {
            disk_path: path,
            endpoint: endpoint.to_string(),
            uuid: "d0".to_string(),
            ordinal: 0,
        }
    }

    fn remote_transport(binary: bool) -> (ChunkTransport, Arc<InProcessRpc>) {
        let rpc = Arc::new(InProcessRpc::with_binary(binary));
        rpc.register("http://node2:9000", Arc::new(NodeService::new()));
        let transport = ChunkTransport::new(
            Locality::new(Some("http://node1:9000")),
            Some(rpc.clone() as Arc<dyn RpcClient>),
            RpcTimeouts::default(),
            true,
        );
        (transport, rpc)
    }

    #[test]
    fn test_local_routing() {
        let disk = tempfile::tempdir().unwrap();
        let transport = ChunkTransport::local_only();
        let t = target(disk.path().to_path_buf(), "");

        transport.write_chunk(&t, 7, 1, b"abc").unwrap();
        assert_eq!(transport.read_chunk(&t, 7, 1).unwrap(), b"abc");
        transport.delete_object(&t, 7).unwrap();
        assert!(transport.read_chunk(&t, 7, 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_remote_binary_and_json_paths() {
        for binary in [true, false] {
            let disk = tempfile::tempdir().unwrap();
            let (transport, _rpc) = remote_transport(binary);
            let t = target(disk.path().to_path_buf(), "http://node2:9000/mnt/d0");
            assert!(!transport.is_local(&t));

            transport.write_chunk(&t, 9, 2, b"remote chunk").unwrap();
            transport.write_meta(&t, 9, b"{\"v\":1}").unwrap();
            assert_eq!(transport.read_chunk(&t, 9, 2).unwrap(), b"remote chunk");
            assert_eq!(transport.read_meta(&t, 9).unwrap(), b"{\"v\":1}");

            transport.delete_chunk(&t, 9, 2).unwrap();
            assert!(transport.read_chunk(&t, 9, 2).unwrap_err().is_not_found());
            assert!(transport.delete_chunk(&t, 9, 2).unwrap_err().is_not_found());

            transport.delete_object(&t, 9).unwrap();
            assert!(transport.read_meta(&t, 9).unwrap_err().is_not_found());
        }
    }

    #[test]
    fn test_remote_without_client() {
        let transport = ChunkTransport::new(
            Locality::new(Some("node1:9000")),
            None,
            RpcTimeouts::default(),
            true,
        );
        let t = target(PathBuf::from("/nowhere"), "http://node2:9000/d");
        assert!(matches!(
            transport.read_meta(&t, 1),
            Err(Error::Network { .. })
        ));
    }
}

//! Erasure data path
//!
//! Turns a payload into chunks and metadata copies on the disks of one
//! placement, and back. Three layouts exist:
//!
//! ```text
//!   len < inline_threshold   xl.meta (base64 payload) on every disk
//!   disks < K+M              chunk.1 + xl.meta on disk 0 (algorithm "none")
//!   otherwise                chunk.1..chunk.{K+M} + xl.meta on disks 0..K+M
//! ```
//!
//! Chunk writes all finish before any metadata copy is written, so a
//! metadata document never points at chunks that failed to land. Once a
//! write succeeds, files an earlier layout of the same object left on the
//! set are removed.

use std::sync::Arc;

use chrono::Utc;
use md5::{Digest, Md5};
use tracing::{debug, instrument, warn};

use crate::config::ErasureConfig;
use crate::ec::ReedSolomonCodec;
use crate::error::{Error, Result};
use crate::io::{DeleteOutcome, ParallelIo, WriteFailure};
use crate::meta::{
    ChecksumInfo, ErasureInfo, ObjectAttributes, StatInfo, VersioningInfo, XlMeta,
    ALGORITHM_NONE, ALGORITHM_REED_SOLOMON,
};
use crate::metrics::EngineMetrics;
use crate::placement::{DiskTarget, PlacementResult};
use crate::registry::VersionSelector;
use crate::transport::rpc::b64_encode;
use crate::transport::ChunkTransport;

use super::status::StatusTracker;
use super::types::{MetadataReadPolicy, PutOptions, DEFAULT_CONTENT_TYPE};

/// What a successful write left on disk
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub meta: XlMeta,
    /// Set positions holding chunks or metadata copies
    pub disk_idxs: Vec<usize>,
}

/// Chunk and metadata I/O for whole objects
pub struct DataPath {
    transport: ChunkTransport,
    io: ParallelIo,
    erasure: ErasureConfig,
    codec: ReedSolomonCodec,
    inline_threshold: usize,
    read_policy: MetadataReadPolicy,
    metrics: Arc<EngineMetrics>,
    status: Arc<StatusTracker>,
}

impl DataPath {
    pub fn new(
        transport: ChunkTransport,
        io: ParallelIo,
        erasure: ErasureConfig,
        inline_threshold: usize,
        metrics: Arc<EngineMetrics>,
        status: Arc<StatusTracker>,
    ) -> Result<Self> {
        let codec = ReedSolomonCodec::new(erasure.data_shards, erasure.parity_shards)?;
        if io.max_fanout() < erasure.total() {
            return Err(Error::InvalidEcConfig(format!(
                "fan-out limit {} is below {} chunks",
                io.max_fanout(),
                erasure.total()
            )));
        }
        Ok(Self {
            transport,
            io,
            erasure,
            codec,
            inline_threshold,
            read_policy: MetadataReadPolicy::FirstValid,
            metrics,
            status,
        })
    }

    pub fn erasure(&self) -> ErasureConfig {
        self.erasure
    }

    pub fn inline_threshold(&self) -> usize {
        self.inline_threshold
    }

    pub fn transport(&self) -> &ChunkTransport {
        &self.transport
    }

    /// Run `op` on every target, in batches no larger than the fan-out limit
    fn each_disk<R, F>(&self, targets: &[DiskTarget], op: F) -> Result<Vec<Result<R>>>
    where
        R: Send,
        F: Fn(&DiskTarget) -> Result<R> + Sync,
    {
        let mut results = Vec::with_capacity(targets.len());
        for batch in targets.chunks(self.io.max_fanout()) {
            results.extend(self.io.fan_out(batch, |_, target| op(target))?);
        }
        Ok(results)
    }

    /// Write one metadata copy per target; each copy carries `index = ordinal + 1`
    fn write_meta_copies(
        &self,
        targets: &[DiskTarget],
        object_hash: u64,
        meta: &XlMeta,
        required: usize,
    ) -> Result<()> {
        let results = self.each_disk(targets, |target| {
            let copy = meta.for_index(target.ordinal + 1);
            self.transport
                .write_meta(target, object_hash, &copy.to_json()?)
        })?;

        let mut written = 0;
        for (target, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => written += 1,
                Err(e) => warn!(disk = %target.disk_path.display(), error = %e, "Metadata write failed"),
            }
        }
        if written < required {
            return Err(Error::Quorum {
                available: written,
                required,
            });
        }
        Ok(())
    }

    /// Best-effort removal of files the new layout no longer uses
    fn prune_stale<F>(&self, targets: &[DiskTarget], op: F)
    where
        F: Fn(&DiskTarget) -> Result<()> + Sync,
    {
        if targets.is_empty() {
            return;
        }
        match self.each_disk(targets, op) {
            Ok(results) => {
                for (target, result) in targets.iter().zip(results) {
                    match result {
                        Err(e) if !e.is_not_found() => {
                            warn!(disk = %target.disk_path.display(), error = %e, "Stale object files left behind")
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => warn!(error = %e, "Stale object cleanup skipped"),
        }
    }

    fn attributes(data: &[u8], opts: &PutOptions) -> ObjectAttributes {
        ObjectAttributes {
            content_type: opts
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            etag: hex::encode(Md5::digest(data)),
            cache_control: opts.cache_control.clone(),
            user: opts.user_metadata.clone(),
        }
    }

    /// Store `data` on the disks of `placement`
    #[instrument(skip(self, placement, data, opts), fields(len = data.len(), set = placement.set_idx))]
    pub fn write(&self, placement: &PlacementResult, data: &[u8], opts: &PutOptions) -> Result<WriteOutcome> {
        let targets = placement.targets();
        if targets.is_empty() {
            return Err(Error::Quorum {
                available: 0,
                required: 1,
            });
        }

        let stat = StatInfo {
            size: data.len() as u64,
            mod_time: Utc::now(),
        };
        let versioning = VersioningInfo {
            version_id: opts
                .version_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            is_latest: true,
            is_delete_marker: false,
        };
        let attributes = Self::attributes(data, opts);

        if data.len() < self.inline_threshold || data.is_empty() {
            let meta = XlMeta::new(
                stat,
                ErasureInfo::inline(),
                attributes,
                versioning,
                Some(b64_encode(data)),
            );
            let required = self.erasure.data_shards.min(targets.len());
            self.write_meta_copies(&targets, placement.object_hash, &meta, required)?;
            self.prune_stale(&targets, |target| {
                self.transport
                    .delete_chunk(target, placement.object_hash, target.ordinal + 1)
            });
            debug!(copies = targets.len(), "Stored inline object");
            return Ok(WriteOutcome {
                meta,
                disk_idxs: (0..targets.len()).collect(),
            });
        }

        if targets.len() < self.erasure.total() {
            let outcome = self.write_single_disk(&targets[0], placement, data, stat, attributes, versioning)?;
            self.prune_stale(&targets[1..], |target| {
                self.transport.delete_object(target, placement.object_hash)
            });
            return Ok(outcome);
        }

        let total = self.erasure.total();
        let encoded = self.codec.encode(data)?;
        let chunk_size = encoded.chunk_size;
        let chunks = encoded.into_chunks();
        let checksums: Vec<ChecksumInfo> = chunks.iter().map(|c| ChecksumInfo::sha256(c)).collect();

        let (targets, spare) = targets.split_at(total);
        let items: Vec<(&DiskTarget, &Vec<u8>)> = targets.iter().zip(chunks.iter()).collect();
        self.io
            .write_all(&items, |i, (target, chunk)| {
                self.transport
                    .write_chunk(target, placement.object_hash, i + 1, chunk)
            })
            .map_err(|failure| {
                for (i, e) in &failure.errors {
                    warn!(chunk = i + 1, error = %e, "Chunk write failed");
                }
                failure.into_error()
            })?;

        let erasure = ErasureInfo {
            algorithm: ALGORITHM_REED_SOLOMON.to_string(),
            data: self.erasure.data_shards,
            parity: self.erasure.parity_shards,
            block_size: chunk_size,
            index: 1,
            distribution: (1..=total).collect(),
            checksums,
        };
        let meta = XlMeta::new(stat, erasure, attributes, versioning, None);
        self.write_meta_copies(targets, placement.object_hash, &meta, self.erasure.data_shards)?;
        self.prune_stale(spare, |target| {
            self.transport.delete_object(target, placement.object_hash)
        });

        debug!(chunks = total, chunk_size, "Stored erasure-coded object");
        Ok(WriteOutcome {
            meta,
            disk_idxs: (0..total).collect(),
        })
    }

    fn write_single_disk(
        &self,
        target: &DiskTarget,
        placement: &PlacementResult,
        data: &[u8],
        stat: StatInfo,
        attributes: ObjectAttributes,
        versioning: VersioningInfo,
    ) -> Result<WriteOutcome> {
        warn!(
            pool = placement.pool_idx,
            set = placement.set_idx,
            disks = placement.disk_count,
            required = self.erasure.total(),
            "Erasure set too small, storing object on a single disk without redundancy"
        );

        let erasure = ErasureInfo {
            algorithm: ALGORITHM_NONE.to_string(),
            data: 1,
            parity: 0,
            block_size: data.len(),
            index: 1,
            distribution: vec![target.ordinal + 1],
            checksums: vec![ChecksumInfo::sha256(data)],
        };
        let meta = XlMeta::new(stat, erasure, attributes, versioning, None);

        let stored = self
            .transport
            .write_chunk(target, placement.object_hash, 1, data)
            .and_then(|()| meta.to_json())
            .and_then(|json| self.transport.write_meta(target, placement.object_hash, &json));
        if let Err(e) = stored {
            return Err(WriteFailure {
                failed: 1,
                total: 1,
                errors: vec![(0, e)],
            }
            .into_error());
        }

        self.metrics.record_degraded_write();
        self.status.note_degraded_write();
        Ok(WriteOutcome {
            meta,
            disk_idxs: vec![target.ordinal],
        })
    }

    /// Candidate disks in read order
    fn read_order(&self, placement: &PlacementResult) -> Vec<DiskTarget> {
        let (mut local, remote): (Vec<_>, Vec<_>) = placement
            .targets()
            .into_iter()
            .partition(|t| self.transport.is_local(t));
        local.extend(remote);
        local
    }

    /// Find the metadata document of `version` among the disks of `placement`
    pub fn read_meta(&self, placement: &PlacementResult, version: &VersionSelector) -> Result<XlMeta> {
        match self.read_policy {
            MetadataReadPolicy::FirstValid => self.read_first_valid(placement, version),
        }
    }

    fn read_first_valid(&self, placement: &PlacementResult, version: &VersionSelector) -> Result<XlMeta> {
        let mut first_error: Option<Error> = None;
        for target in self.read_order(placement) {
            let attempt = self
                .transport
                .read_meta(&target, placement.object_hash)
                .and_then(|bytes| XlMeta::from_json(&bytes));
            match attempt {
                Ok(meta) if meta.versioning.is_delete_marker => {
                    debug!(disk = %target.disk_path.display(), "Skipping delete marker");
                }
                Ok(meta) => match version {
                    VersionSelector::Id(id) if *id != meta.versioning.version_id => {
                        debug!(found = %meta.versioning.version_id, wanted = %id, "Version mismatch");
                    }
                    _ => return Ok(meta),
                },
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    debug!(disk = %target.disk_path.display(), error = %e, "Metadata copy unusable");
                    first_error.get_or_insert(e);
                }
            }
        }

        Err(first_error.unwrap_or_else(|| {
            Error::NotFound(format!("metadata ({}) on set {}", version, placement.set_idx))
        }))
    }

    /// Reassemble the payload described by `meta`
    #[instrument(skip(self, placement, meta), fields(size = meta.stat.size))]
    pub fn read_data(&self, placement: &PlacementResult, meta: &XlMeta) -> Result<Vec<u8>> {
        let size = meta.stat.size as usize;

        if meta.is_inline() {
            let data = meta.inline_bytes()?;
            if data.len() != size {
                return Err(Error::Corrupt(format!(
                    "inline payload is {} bytes, metadata says {}",
                    data.len(),
                    size
                )));
            }
            return Ok(data);
        }

        let erasure = &meta.erasure;
        let targets = placement.targets();

        if erasure.algorithm == ALGORITHM_NONE {
            let target = chunk_target(&targets, erasure, 0).ok_or_else(|| {
                Error::NotFound(format!("disk of chunk 1 not in set {}", placement.set_idx))
            })?;
            let data = self.transport.read_chunk(target, placement.object_hash, 1)?;
            if data.len() != size || !erasure.checksums[0].verify(&data) {
                return Err(Error::Corrupt("single-disk chunk failed verification".to_string()));
            }
            return Ok(data);
        }

        let codec = if erasure.data == self.codec.data_shards()
            && erasure.parity == self.codec.parity_shards()
        {
            self.codec.clone()
        } else {
            ReedSolomonCodec::new(erasure.data, erasure.parity)?
        };

        let items: Vec<Option<&DiskTarget>> = (0..erasure.total_chunks())
            .map(|chunk| chunk_target(&targets, erasure, chunk))
            .collect();
        let outcome = self.io.read_all(&items, |i, target| {
            let target = (*target).ok_or_else(|| {
                Error::NotFound(format!("disk of chunk {} not in set", i + 1))
            })?;
            let chunk = self.transport.read_chunk(target, placement.object_hash, i + 1)?;
            if chunk.len() != erasure.block_size || !erasure.checksums[i].verify(&chunk) {
                return Err(Error::Corrupt(format!("chunk {} failed its checksum", i + 1)));
            }
            Ok(chunk)
        })?;

        for (i, e) in &outcome.errors {
            debug!(chunk = i + 1, error = %e, "Chunk unavailable");
        }
        if outcome.succeeded < erasure.data {
            return Err(Error::Quorum {
                available: outcome.succeeded,
                required: erasure.data,
            });
        }

        let mut chunks = outcome.chunks;
        let data = codec.decode(&mut chunks, size)?;
        if data.len() != size {
            return Err(Error::Corrupt(format!(
                "decoded {} bytes, metadata says {}",
                data.len(),
                size
            )));
        }
        Ok(data)
    }

    /// Remove the object directory from every disk of `placement`
    pub fn remove(&self, placement: &PlacementResult) -> Result<DeleteOutcome> {
        let targets = placement.targets();
        let mut outcome = DeleteOutcome::default();
        for batch in targets.chunks(self.io.max_fanout()) {
            let part = self.io.delete_all(batch, |_, target| {
                self.transport.delete_object(target, placement.object_hash)
            })?;
            outcome.deleted += part.deleted;
            outcome.missing += part.missing;
            outcome
                .errors
                .extend(part.errors.into_iter().map(|(i, e)| (batch[i].ordinal, e)));
        }
        for (ordinal, e) in &outcome.errors {
            warn!(disk = ordinal, error = %e, "Object delete failed on disk");
        }
        Ok(outcome)
    }
}

/// Disk holding chunk `chunk` (0-based) according to the distribution
fn chunk_target<'a>(targets: &'a [DiskTarget], erasure: &ErasureInfo, chunk: usize) -> Option<&'a DiskTarget> {
    erasure
        .distribution
        .get(chunk)
        .and_then(|pos| pos.checked_sub(1))
        .and_then(|ordinal| targets.get(ordinal))
}

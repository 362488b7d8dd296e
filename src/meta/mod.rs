//! Object metadata
//!
//! - **Document** (`xlmeta.rs`): the `xl.meta` JSON stored beside the chunks
//! - **Cache** (`cache.rs`): LRU/TTL cache of parsed documents

pub mod cache;
pub mod xlmeta;

pub use cache::MetadataCache;
pub use xlmeta::{
    ChecksumInfo, ErasureInfo, ObjectAttributes, StatInfo, VersioningInfo, XlMeta,
    ALGORITHM_NONE, ALGORITHM_REED_SOLOMON,
};

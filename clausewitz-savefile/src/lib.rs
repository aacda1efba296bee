//! Save archive handling for Clausewitz binary saves.
//!
//! Builds on `clausewitz-codec` with the pieces that deal with whole save
//! files: the ZIP driver that extracts the `meta` and `gamestate` streams,
//! the byte-level splitter that cuts the oversized `countries` and
//! `provinces` bodies along entry boundaries, and the worker pool that
//! decodes those entries in parallel and merges them back into the tree.

/// The ZIP driver and top-level decode entry points.
pub mod archive;

/// Worker orchestration over entry shards.
pub mod parallel;

/// Bulk body location and entry splitting.
pub mod shard;

pub use archive::SaveDecoder;
pub use parallel::{SaveOptions, ShardedDecoder};
pub use shard::{EntryKind, ShardRegion};

//! Rust-native decoding for Clausewitz binary save-game archives.
//!
//! A save produced by the Clausewitz engine is a ZIP archive holding two
//! token-prefixed binary streams. This crate bundles the pieces that turn
//! one into a JSON-serializable tree: the token-level codec and the archive
//! driver with its parallel shard workers. It provides no application of its
//! own; it is meant as a base layer for trackers, analyzers and similar
//! tooling.

#[doc(inline)]
pub use clausewitz_codec as codec;

#[doc(inline)]
pub use clausewitz_savefile as savefile;

//! Token-level codec for Clausewitz binary save-game streams.
//!
//! A save stream is a sequence of 16-bit opcodes with typed payloads that
//! spells out a nested object graph. This crate owns the sequential side of
//! decoding it: the opcode/identifier table, the primitive payload readers,
//! the calendar used by packed dates, the hybrid map/list tree the stream
//! reconstructs, and the decoder loop that drives them. Parallel decoding of
//! the oversized bulk bodies plugs in from the outside through
//! [`decode::BulkDelegate`].

/// Little-endian byte cursor shared by every reader.
pub mod cursor;

/// The non-leap calendar behind packed date payloads.
pub mod date;

/// The sequential decoder loop.
pub mod decode;

/// Whitelist of keys worth keeping during decode.
pub mod filter;

/// Opcode constants, token classes and the identifier table.
pub mod tokens;

/// The decoded tree and its building container.
pub mod tree;

pub use decode::{BulkDelegate, Decoder};
pub use filter::KeyFilter;
pub use tokens::TokenTable;
pub use tree::Value;

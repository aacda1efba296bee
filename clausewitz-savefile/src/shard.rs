//! Locating and splitting the oversized bulk bodies.
//!
//! The `countries` and `provinces` objects are hundreds of megabytes of
//! entries that decode independently of each other. This module finds where
//! such a body ends (the first `}` directly followed by the encoding of
//! `<sibling>={`) and cuts it along entry boundaries so the workers can
//! decode the pieces in isolation.

use clausewitz_codec::TokenTable;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Shape of the header that starts every entry of a bulk body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A three-character country tag: `<string opcode><len 3>XXX={`.
    Tag,
    /// A province id: `<int opcode><i32>={`.
    Index,
}

/// One bulk region: the key that triggers shard decoding, the sibling key
/// whose `={` marks the end of the body, and the entry header shape.
///
/// The sibling pairs are configuration because they drift across game
/// versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRegion {
    pub key: String,
    pub terminator: String,
    pub entry: EntryKind,
}

impl ShardRegion {
    pub fn countries() -> Self {
        Self {
            key: "countries".to_owned(),
            terminator: "active_advisors".to_owned(),
            entry: EntryKind::Tag,
        }
    }

    pub fn provinces() -> Self {
        Self {
            key: "provinces".to_owned(),
            terminator: "countries".to_owned(),
            entry: EntryKind::Index,
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self::countries(), Self::provinces()]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("terminator key {0:?} is not in the token table")]
    UnknownTerminator(String),
    #[error("cannot locate the end of the {0} body")]
    MissingTerminator(String),
    #[error("no entry boundaries found in the {0} body")]
    NoEntries(String),
    #[error("invalid boundary pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Byte-level boundary finder for one bulk region.
pub struct Splitter {
    key: String,
    terminator: Regex,
    header: Regex,
}

impl Splitter {
    pub fn new(region: &ShardRegion, table: &TokenTable) -> Result<Self, Error> {
        let sibling = table
            .opcode(&region.terminator)
            .ok_or_else(|| Error::UnknownTerminator(region.terminator.clone()))?;

        // '}' then the sibling opcode then '={'
        let terminator = Regex::new(&format!(
            r"(?s-u)\x04\x00{}\x01\x00\x03\x00",
            escape_bytes(&sibling.to_le_bytes())
        ))?;

        let header = match region.entry {
            EntryKind::Tag => Regex::new(r"(?s-u)\x0f\x00\x03\x00[A-Z0-9\-]{3}\x01\x00\x03\x00")?,
            EntryKind::Index => Regex::new(r"(?s-u)\x14\x00.{4}\x01\x00\x03\x00")?,
        };

        Ok(Self {
            key: region.key.clone(),
            terminator,
            header,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Offset of the body's closing brace inside `rest`, the stream
    /// remainder directly past the region's `={`.
    pub fn body_end(&self, rest: &[u8]) -> Result<usize, Error> {
        let end = self
            .terminator
            .find(rest)
            .map(|m| m.start())
            .ok_or_else(|| Error::MissingTerminator(self.key.clone()))?;

        trace!(key = %self.key, end, "located bulk body terminator");
        Ok(end)
    }

    /// Cuts a body into independent entry slices. Each entry spans from its
    /// header to the start of the next one; the last runs to the end of the
    /// body.
    pub fn entries<'b>(&self, body: &'b [u8]) -> Result<Vec<&'b [u8]>, Error> {
        if body.is_empty() {
            return Ok(Vec::new());
        }

        let starts: Vec<usize> = self.header.find_iter(body).map(|m| m.start()).collect();
        if starts.is_empty() {
            return Err(Error::NoEntries(self.key.clone()));
        }
        if starts[0] != 0 {
            debug!(key = %self.key, prefix = starts[0], "bytes before first entry header, skipped");
        }

        let slices = starts
            .iter()
            .zip(starts.iter().skip(1).chain(std::iter::once(&body.len())))
            .map(|(start, end)| &body[*start..*end])
            .collect();

        Ok(slices)
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!(r"\x{b:02x}")).collect()
}

//! Worker orchestration for bulk bodies.
//!
//! Entry slices are partitioned into roughly equal groups, each group is
//! concatenated into a private buffer and decoded by its own thread. A
//! worker never shares memory with the rest of the decode: it ferries its
//! finished tree back as a JSON scratch file under the system temp
//! directory, named by a fresh UUID. The orchestrator joins every worker,
//! merges the artifacts in shard order and deletes them; one failed worker
//! fails the whole archive.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clausewitz_codec::decode::{BulkDelegate, BulkError};
use clausewitz_codec::{Decoder, KeyFilter, TokenTable, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::shard::{self, ShardRegion, Splitter};

/// Decode configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveOptions {
    /// Number of parallel shard workers, at least 1.
    pub chunks: usize,
    /// Bulk regions decoded through the shard splitter.
    pub regions: Vec<ShardRegion>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            chunks: 8,
            regions: ShardRegion::defaults(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Split(#[from] shard::Error),
    #[error("no shard region configured for bulk key {0:?}")]
    UnknownRegion(String),
    #[error("shard worker {0} failed: {1}")]
    Worker(usize, clausewitz_codec::decode::Error),
    #[error("shard worker {0} panicked")]
    WorkerPanicked(usize),
    #[error("scratch artifact of worker {0}: {1}")]
    Scratch(usize, std::io::Error),
    #[error("scratch artifact of worker {0} is not valid JSON: {1}")]
    BadArtifact(usize, serde_json::Error),
    #[error("shard worker {0} produced a non-object tree")]
    NotAnObject(usize),
}

/// The out-of-band decoder plugged into the sequential decoder for bulk
/// keys. Holds the shared read-only tables and one [`Splitter`] per
/// configured region.
pub struct ShardedDecoder {
    table: Arc<TokenTable>,
    filter: Option<Arc<KeyFilter>>,
    chunks: usize,
    splitters: HashMap<String, Splitter>,
}

impl ShardedDecoder {
    pub fn new(
        table: Arc<TokenTable>,
        filter: Option<Arc<KeyFilter>>,
        options: &SaveOptions,
    ) -> Result<Self, shard::Error> {
        let mut splitters = HashMap::new();
        for region in &options.regions {
            splitters.insert(region.key.clone(), Splitter::new(region, &table)?);
        }

        Ok(Self {
            table,
            filter,
            chunks: options.chunks.max(1),
            splitters,
        })
    }

    fn decode_entries(&self, slices: &[&[u8]]) -> Result<Vec<(String, Value)>, Error> {
        if slices.is_empty() {
            return Ok(Vec::new());
        }

        let groups = partition(slices, self.chunks);
        debug!(
            workers = groups.len(),
            entries = slices.len(),
            "spawning shard workers"
        );

        let mut handles = Vec::with_capacity(groups.len());
        for (index, buffer) in groups.into_iter().enumerate() {
            let table = Arc::clone(&self.table);
            let filter = self.filter.clone();
            handles.push(std::thread::spawn(move || {
                worker(index, buffer, table, filter)
            }));
        }

        // join everything and clean up every artifact before surfacing the
        // first failure, so scratch files never outlive the decode
        let mut merged = Vec::new();
        let mut failure: Option<Error> = None;

        for (index, handle) in handles.into_iter().enumerate() {
            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => {
                    failure.get_or_insert(Error::WorkerPanicked(index));
                    continue;
                }
            };

            let path = match outcome {
                Ok(path) => path,
                Err(err) => {
                    failure.get_or_insert(err);
                    continue;
                }
            };

            let collected = collect_artifact(index, &path);
            if let Err(err) = std::fs::remove_file(&path) {
                warn!(worker = index, error = %err, "cannot remove scratch artifact");
            }

            match collected {
                Ok(entries) if failure.is_none() => merged.extend(entries),
                Ok(_) => {}
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(merged),
        }
    }
}

impl BulkDelegate for ShardedDecoder {
    fn decode_bulk(
        &self,
        key: &str,
        rest: &[u8],
    ) -> Result<(Vec<(String, Value)>, usize), BulkError> {
        let splitter = self
            .splitters
            .get(key)
            .ok_or_else(|| Error::UnknownRegion(key.to_owned()))?;

        let end = splitter.body_end(rest).map_err(Error::from)?;
        let slices = splitter.entries(&rest[..end]).map_err(Error::from)?;
        debug!(key, entries = slices.len(), "split bulk body");

        let merged = self.decode_entries(&slices)?;
        Ok((merged, end))
    }
}

/// Splits `slices` into `min(chunks, len)` groups of near-equal entry
/// count, each concatenated into one owned buffer. The first `len % k`
/// groups carry the extra entry.
fn partition(slices: &[&[u8]], chunks: usize) -> Vec<Vec<u8>> {
    let count = chunks.min(slices.len());
    let base = slices.len() / count;
    let extra = slices.len() % count;

    let mut groups = Vec::with_capacity(count);
    let mut next = 0;
    for index in 0..count {
        let len = base + usize::from(index < extra);
        groups.push(slices[next..next + len].concat());
        next += len;
    }

    groups
}

fn worker(
    index: usize,
    buffer: Vec<u8>,
    table: Arc<TokenTable>,
    filter: Option<Arc<KeyFilter>>,
) -> Result<PathBuf, Error> {
    trace!(worker = index, bytes = buffer.len(), "shard worker started");

    let mut decoder = Decoder::new(&buffer, &table);
    if let Some(filter) = filter.as_deref() {
        decoder = decoder.with_filter(filter);
    }
    decoder.run().map_err(|err| Error::Worker(index, err))?;
    let tree = decoder.finish();

    let path = std::env::temp_dir().join(format!("clausewitz-shard-{}.json", Uuid::new_v4()));
    let file = File::create(&path).map_err(|err| Error::Scratch(index, err))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, &tree).map_err(|err| Error::BadArtifact(index, err))?;
    out.flush().map_err(|err| Error::Scratch(index, err))?;

    trace!(worker = index, path = %path.display(), "shard worker finished");
    Ok(path)
}

fn collect_artifact(index: usize, path: &Path) -> Result<Vec<(String, Value)>, Error> {
    let file = File::open(path).map_err(|err| Error::Scratch(index, err))?;
    let tree: Value =
        serde_json::from_reader(BufReader::new(file)).map_err(|err| Error::BadArtifact(index, err))?;

    match tree {
        Value::Object(entries) => Ok(entries),
        Value::Array(items) if items.is_empty() => Ok(Vec::new()),
        _ => Err(Error::NotAnObject(index)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_spreads_the_remainder_over_the_first_groups() {
        let entries: Vec<Vec<u8>> = (0u8..17).map(|n| vec![n]).collect();
        let slices: Vec<&[u8]> = entries.iter().map(Vec::as_slice).collect();

        let groups = partition(&slices, 4);
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();

        assert_eq!(sizes, vec![5, 4, 4, 4]);
        assert_eq!(groups.concat(), (0u8..17).collect::<Vec<u8>>());
    }

    #[test]
    fn partition_never_exceeds_the_entry_count() {
        let entries: Vec<Vec<u8>> = (0u8..3).map(|n| vec![n]).collect();
        let slices: Vec<&[u8]> = entries.iter().map(Vec::as_slice).collect();

        let groups = partition(&slices, 8);
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn single_chunk_keeps_source_order() {
        let entries: Vec<Vec<u8>> = (0u8..5).map(|n| vec![n]).collect();
        let slices: Vec<&[u8]> = entries.iter().map(Vec::as_slice).collect();

        let groups = partition(&slices, 1);
        assert_eq!(groups, vec![(0u8..5).collect::<Vec<u8>>()]);
    }
}

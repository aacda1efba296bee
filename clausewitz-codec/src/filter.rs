use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read key whitelist: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed key whitelist: {0}")]
    Csv(#[from] csv::Error),
}

/// The set of identifiers worth keeping. When active, assignments keyed by a
/// decoded identifier outside this set are dropped during construction.
///
/// Loaded from a CSV whose first column is the identifier; any further
/// columns are ignored.
#[derive(Debug, Default, Clone)]
pub struct KeyFilter {
    keep: HashSet<String>,
}

impl KeyFilter {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        Self::parse(file)
    }

    pub fn parse(reader: impl Read) -> Result<Self, Error> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut keep = HashSet::new();
        for record in csv.records() {
            let record = record?;
            if let Some(identifier) = record.get(0) {
                let identifier = identifier.trim();
                if !identifier.is_empty() {
                    keep.insert(identifier.to_owned());
                }
            }
        }

        debug!(keys = keep.len(), "loaded key whitelist");

        Ok(Self { keep })
    }

    pub fn retains(&self, identifier: &str) -> bool {
        self.keep.contains(identifier)
    }

    pub fn len(&self) -> usize {
        self.keep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }
}

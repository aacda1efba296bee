//! The save archive driver.
//!
//! A save is a ZIP holding two token streams: `meta` (small, carries the
//! `EU4bin` header) and `gamestate` (large, no header). The driver extracts
//! both, decodes meta with the whitelist off and gamestate with the
//! whitelist on, and assembles the `{meta, gamestate}` root.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

use clausewitz_codec::{filter, tokens, Decoder, KeyFilter, TokenTable, Value};
use tracing::debug;

use crate::parallel::{SaveOptions, ShardedDecoder};
use crate::shard;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read save archive: {0}")]
    Io(#[from] std::io::Error),
    #[error("broken save archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("bad token table: {0}")]
    Tokens(#[from] tokens::Error),
    #[error("bad key whitelist: {0}")]
    Whitelist(#[from] filter::Error),
    #[error(transparent)]
    Shard(#[from] shard::Error),
    #[error(transparent)]
    Decode(#[from] clausewitz_codec::decode::Error),
}

/// Reads the `meta` and `gamestate` entries out of a save archive.
pub fn read_entries<R: Read + Seek>(reader: R) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let mut archive = zip::ZipArchive::new(reader)?;

    let mut meta = Vec::new();
    archive.by_name("meta")?.read_to_end(&mut meta)?;

    let mut gamestate = Vec::new();
    archive.by_name("gamestate")?.read_to_end(&mut gamestate)?;

    debug!(
        meta = meta.len(),
        gamestate = gamestate.len(),
        "extracted save archive entries"
    );

    Ok((meta, gamestate))
}

/// Decodes whole save archives with one set of shared tables.
pub struct SaveDecoder {
    table: Arc<TokenTable>,
    filter: Arc<KeyFilter>,
    options: SaveOptions,
}

impl SaveDecoder {
    pub fn new(table: TokenTable, filter: KeyFilter, options: SaveOptions) -> Self {
        Self {
            table: Arc::new(table),
            filter: Arc::new(filter),
            options,
        }
    }

    /// Loads the token table and whitelist from disk. The bulk keys held
    /// out of the identifier table are the configured region keys.
    pub fn load(
        tokens: impl AsRef<Path>,
        whitelist: impl AsRef<Path>,
        options: SaveOptions,
    ) -> Result<Self, Error> {
        let bulk: Vec<&str> = options.regions.iter().map(|r| r.key.as_str()).collect();
        let table = TokenTable::load(tokens, &bulk)?;
        let filter = KeyFilter::load(whitelist)?;
        Ok(Self::new(table, filter, options))
    }

    pub fn decode_path(&self, path: impl AsRef<Path>) -> Result<Value, Error> {
        let file = File::open(path)?;
        self.decode_archive(file)
    }

    pub fn decode_archive<R: Read + Seek>(&self, reader: R) -> Result<Value, Error> {
        let (meta, gamestate) = read_entries(reader)?;
        self.decode_streams(&meta, &gamestate)
    }

    /// Decodes the two streams directly, for callers that already unpacked
    /// the archive.
    pub fn decode_streams(&self, meta: &[u8], gamestate: &[u8]) -> Result<Value, Error> {
        let meta_tree = {
            let mut decoder = Decoder::new(meta, &self.table);
            decoder.check_magic()?;
            decoder.run()?;
            decoder.finish()
        };

        let delegate = ShardedDecoder::new(
            Arc::clone(&self.table),
            Some(Arc::clone(&self.filter)),
            &self.options,
        )?;

        let gamestate_tree = {
            let mut decoder = Decoder::new(gamestate, &self.table)
                .with_filter(&self.filter)
                .with_delegate(&delegate);
            decoder.run()?;
            decoder.finish()
        };

        Ok(Value::Object(vec![
            ("meta".to_owned(), meta_tree),
            ("gamestate".to_owned(), gamestate_tree),
        ]))
    }
}

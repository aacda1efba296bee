use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use tracing::debug;

/// 16-bit little-endian code that begins every element of the stream.
pub type Opcode = u16;

pub const EQUALS: Opcode = 0x0001;
pub const OPEN: Opcode = 0x0003;
pub const CLOSE: Opcode = 0x0004;
pub const DATE: Opcode = 0x000c;
pub const FLOAT: Opcode = 0x000d;
pub const BOOL: Opcode = 0x000e;
pub const STRING: Opcode = 0x000f;
pub const INT: Opcode = 0x0014;
pub const STRING_ALT: Opcode = 0x0017;
pub const FLOAT5_LO: Opcode = 0x0167;
pub const FLOAT5_HI: Opcode = 0x0190;

/// How the payload (if any) following an opcode must be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Equals,
    Open,
    Close,
    Date,
    Float,
    Bool,
    String,
    Int,
    Float5,
    Identifier,
}

/// Classifies an opcode. Everything outside the fixed primitive set is an
/// identifier and resolves through the [`TokenTable`].
pub fn classify(opcode: Opcode) -> TokenClass {
    match opcode {
        EQUALS => TokenClass::Equals,
        OPEN => TokenClass::Open,
        CLOSE => TokenClass::Close,
        DATE => TokenClass::Date,
        FLOAT => TokenClass::Float,
        BOOL => TokenClass::Bool,
        STRING | STRING_ALT => TokenClass::String,
        INT => TokenClass::Int,
        FLOAT5_LO | FLOAT5_HI => TokenClass::Float5,
        _ => TokenClass::Identifier,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read token table: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed token table line {0}: {1:?}")]
    MalformedLine(usize, String),
    #[error("bad opcode on token table line {0}: {1:?}")]
    BadOpcode(usize, String),
    #[error("duplicate token table entry for opcode {0:#06x}")]
    DuplicateOpcode(Opcode),
    #[error("duplicate token table entry for identifier {0:?}")]
    DuplicateIdentifier(String),
}

/// Bidirectional mapping between identifier opcodes and their names, loaded
/// once from a `<hex> <identifier>` text file.
///
/// Opcodes whose identifiers are named in the *bulk* set (the keys whose
/// bodies are decoded by parallel shard workers, `countries` and `provinces`
/// by default) are diverted into a separate map so they never resolve as
/// ordinary keys. Primitive-type opcodes appearing in the file are skipped.
#[derive(Debug, Default, Clone)]
pub struct TokenTable {
    by_opcode: HashMap<Opcode, String>,
    by_identifier: HashMap<String, Opcode>,
    bulk_by_opcode: HashMap<Opcode, String>,
    bulk_by_identifier: HashMap<String, Opcode>,
}

impl TokenTable {
    pub fn load(path: impl AsRef<Path>, bulk_keys: &[&str]) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        Self::parse(file, bulk_keys)
    }

    pub fn parse(reader: impl Read, bulk_keys: &[&str]) -> Result<Self, Error> {
        let mut table = TokenTable::default();

        for (number, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();

            if trimmed.is_empty() {
                continue;
            }

            let mut fields = trimmed.split_whitespace();
            let (hex, identifier) = match (fields.next(), fields.next()) {
                (Some(hex), Some(identifier)) => (hex, identifier),
                _ => return Err(Error::MalformedLine(number + 1, line.clone())),
            };

            let opcode = Opcode::from_str_radix(hex.trim_start_matches("0x"), 16)
                .map_err(|_| Error::BadOpcode(number + 1, hex.to_owned()))?;

            if classify(opcode) != TokenClass::Identifier {
                debug!(opcode, identifier, "primitive opcode in token table, ignored");
                continue;
            }

            table.insert(opcode, identifier, bulk_keys)?;
        }

        debug!(
            identifiers = table.by_opcode.len(),
            bulk = table.bulk_by_opcode.len(),
            "loaded token table"
        );

        Ok(table)
    }

    fn insert(&mut self, opcode: Opcode, identifier: &str, bulk_keys: &[&str]) -> Result<(), Error> {
        if self.by_opcode.contains_key(&opcode) || self.bulk_by_opcode.contains_key(&opcode) {
            return Err(Error::DuplicateOpcode(opcode));
        }

        if self.by_identifier.contains_key(identifier)
            || self.bulk_by_identifier.contains_key(identifier)
        {
            return Err(Error::DuplicateIdentifier(identifier.to_owned()));
        }

        if bulk_keys.contains(&identifier) {
            self.bulk_by_opcode.insert(opcode, identifier.to_owned());
            self.bulk_by_identifier.insert(identifier.to_owned(), opcode);
        } else {
            self.by_opcode.insert(opcode, identifier.to_owned());
            self.by_identifier.insert(identifier.to_owned(), opcode);
        }

        Ok(())
    }

    /// Resolves an ordinary identifier opcode.
    pub fn identifier(&self, opcode: Opcode) -> Option<&str> {
        self.by_opcode.get(&opcode).map(String::as_str)
    }

    /// Reverse lookup over both the ordinary and the bulk set.
    pub fn opcode(&self, identifier: &str) -> Option<Opcode> {
        self.by_identifier
            .get(identifier)
            .or_else(|| self.bulk_by_identifier.get(identifier))
            .copied()
    }

    /// Resolves an opcode in the bulk set, if it is one.
    pub fn bulk_key(&self, opcode: Opcode) -> Option<&str> {
        self.bulk_by_opcode.get(&opcode).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_opcode.len() + self.bulk_by_opcode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

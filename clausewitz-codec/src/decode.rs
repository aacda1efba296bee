//! Sequential decoder for one token-prefixed byte stream.
//!
//! The decoder walks 16-bit opcodes, interprets typed payloads and
//! reconstructs the nested object graph on a stack of open nodes. Bulk keys
//! (`countries`, `provinces`) met at root depth hand the remainder of the
//! stream to a [`BulkDelegate`], which decodes the body out-of-band and
//! reports how many bytes it consumed.

use std::collections::HashMap;

use encoding_rs::WINDOWS_1252;
use tracing::debug;

use crate::cursor::{Cursor, ShortRead};
use crate::date;
use crate::filter::KeyFilter;
use crate::tokens::{self, classify, Opcode, TokenClass, TokenTable};
use crate::tree::{NodeBuilder, Value};

/// Header of the `meta` stream.
pub const MAGIC: &[u8] = b"EU4bin";

pub type BulkError = Box<dyn std::error::Error + Send + Sync>;

/// Out-of-band decoder for the body of a bulk key.
///
/// `rest` is the stream remainder immediately past the key's `={`. The
/// implementation returns the merged child entries and the number of bytes
/// it consumed, which must leave the body's closing `}` in place so the
/// sequential decoder can resume on it.
pub trait BulkDelegate {
    fn decode_bulk(
        &self,
        key: &str,
        rest: &[u8],
    ) -> Result<(Vec<(String, Value)>, usize), BulkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Short(#[from] ShortRead),
    #[error("stream does not start with the EU4bin magic (found 0x{0})")]
    BadMagic(String),
    #[error("assignment with no pending key at offset {0}")]
    StrayAssign(usize),
    #[error("unmatched close at offset {0}")]
    StrayClose(usize),
    #[error("container value used as an assignment key at offset {0}")]
    ContainerKey(usize),
    #[error("bulk key {0:?} is not followed by '={{'")]
    BulkHeader(String),
    #[error("bulk decoding of {key:?} failed: {source}")]
    Bulk { key: String, source: BulkError },
}

pub struct Decoder<'a> {
    cursor: Cursor<'a>,
    table: &'a TokenTable,
    filter: Option<&'a KeyFilter>,
    delegate: Option<&'a dyn BulkDelegate>,
    stack: Vec<NodeBuilder>,
    unknown: HashMap<Opcode, String>,
    last_was_identifier: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8], table: &'a TokenTable) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            table,
            filter: None,
            delegate: None,
            stack: vec![NodeBuilder::new()],
            unknown: HashMap::new(),
            last_was_identifier: false,
        }
    }

    /// Activates whitelist-based key dropping.
    pub fn with_filter(mut self, filter: &'a KeyFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Installs the out-of-band decoder for bulk keys.
    pub fn with_delegate(mut self, delegate: &'a dyn BulkDelegate) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Consumes and verifies the 6-byte `EU4bin` header.
    pub fn check_magic(&mut self) -> Result<(), Error> {
        let bytes = self.cursor.take(MAGIC.len())?;
        if bytes != MAGIC {
            return Err(Error::BadMagic(hex::encode(bytes)));
        }
        Ok(())
    }

    /// Decodes tokens until the end of the buffer. A clean end between
    /// tokens is success; running out of bytes inside a payload is not.
    pub fn run(&mut self) -> Result<(), Error> {
        while !self.cursor.at_end() {
            let opcode = self.cursor.read_u16()?;
            self.step(opcode)?;
        }
        Ok(())
    }

    /// Finalizes the tree. Nodes left open by a clean EOF are closed onto
    /// their parents first; the root is closed last.
    pub fn finish(mut self) -> Value {
        while self.stack.len() > 1 {
            if let (Some(child), Some(parent)) = (self.stack.pop(), self.stack.last_mut()) {
                Self::attach(parent, child);
            }
        }

        match self.stack.pop() {
            Some(root) => root.finalize(),
            None => Value::Array(Vec::new()),
        }
    }

    fn step(&mut self, opcode: Opcode) -> Result<(), Error> {
        match classify(opcode) {
            TokenClass::Int => {
                let raw = self.cursor.read_i32()?;
                self.push(Value::Int(raw.into()));
            }
            TokenClass::Float => {
                let raw = self.cursor.read_i32()?;
                self.push(Value::Float(f64::from(raw) / 1000.0));
            }
            TokenClass::Float5 => {
                let raw = self.cursor.read_i64()?;
                self.push(Value::Float(raw as f64 / 32768.0));
            }
            TokenClass::Bool => {
                let raw = self.cursor.read_u8()?;
                self.push(Value::Bool(raw != 0));
            }
            TokenClass::String => {
                let text = self.read_string()?;
                self.push(Value::String(text));
            }
            TokenClass::Date => {
                let raw = self.cursor.read_i32()?;
                let value = match date::decode(raw) {
                    Some(text) => Value::String(text),
                    None => Value::Int(raw.into()),
                };
                self.push(value);
            }
            TokenClass::Equals => self.assign()?,
            TokenClass::Open => self.stack.push(NodeBuilder::new()),
            TokenClass::Close => self.close()?,
            TokenClass::Identifier => return self.identifier(opcode),
        }

        self.last_was_identifier = false;
        Ok(())
    }

    fn read_string(&mut self) -> Result<String, Error> {
        let length = self.cursor.read_u16()?;
        let bytes = self.cursor.take(usize::from(length))?;
        let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
        Ok(text.into_owned())
    }

    fn identifier(&mut self, opcode: Opcode) -> Result<(), Error> {
        let table = self.table;

        if let Some(key) = table.bulk_key(opcode) {
            // a bulk key at root depth switches to shard decoding; anywhere
            // else it is an ordinary key
            if self.stack.len() == 1 {
                if let Some(delegate) = self.delegate {
                    self.bulk(key.to_owned(), delegate)?;
                    self.last_was_identifier = false;
                    return Ok(());
                }
            }

            self.push(Value::String(key.to_owned()));
            self.last_was_identifier = true;
            return Ok(());
        }

        let name = match table.identifier(opcode) {
            Some(name) => name.to_owned(),
            None => self.unknown(opcode),
        };
        self.push(Value::String(name));
        self.last_was_identifier = true;
        Ok(())
    }

    fn unknown(&mut self, opcode: Opcode) -> String {
        if let Some(name) = self.unknown.get(&opcode) {
            return name.clone();
        }

        let name = format!("unknown_key_{opcode:#x}");
        debug!(opcode, name = %name, "unmapped identifier opcode");
        self.unknown.insert(opcode, name.clone());
        name
    }

    fn assign(&mut self) -> Result<(), Error> {
        let offset = self.cursor.position();

        // the value about to become a key sits on top of the open node; it
        // is only droppable when it came from the identifier table
        let dropping = match (self.filter, self.last_was_identifier) {
            (Some(filter), true) => match self.current().last() {
                Some(Value::String(key)) => !filter.retains(key),
                _ => false,
            },
            _ => false,
        };

        let depth = self.stack.len();
        let rhs = self.cursor.read_u16()?;
        self.step(rhs)?;

        if self.stack.len() > depth {
            // the value is an object still being filled; the key moves onto
            // the child and is committed in the parent when the child closes
            let parent = depth - 1;
            let key = match self.stack[parent].pop_entry() {
                Some((_, value)) => value.to_key().ok_or(Error::ContainerKey(offset))?,
                None => return Err(Error::StrayAssign(offset)),
            };

            let top = self.stack.len() - 1;
            self.stack[top].set_name(key);
            if dropping {
                self.stack[top].mark_dropped();
            }
        } else {
            self.fold(dropping, offset)?;
        }

        self.last_was_identifier = false;
        Ok(())
    }

    fn fold(&mut self, dropping: bool, offset: usize) -> Result<(), Error> {
        let node = self.current_mut();

        let value = match node.pop_entry() {
            Some((_, value)) => value,
            None => return Err(Error::StrayAssign(offset)),
        };
        let key = match node.pop_entry() {
            Some((_, key)) => key.to_key().ok_or(Error::ContainerKey(offset))?,
            None => return Err(Error::StrayAssign(offset)),
        };

        if dropping {
            debug!(key = %key, "dropped filtered assignment");
            return Ok(());
        }

        let node = self.current_mut();
        node.append_named(key, value);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if self.stack.len() < 2 {
            // a close at root depth terminates the stream
            if self.cursor.at_end() {
                return Ok(());
            }
            return Err(Error::StrayClose(self.cursor.position().saturating_sub(2)));
        }

        if let (Some(child), Some(parent)) = (self.stack.pop(), self.stack.last_mut()) {
            Self::attach(parent, child);
        }
        Ok(())
    }

    fn attach(parent: &mut NodeBuilder, child: NodeBuilder) {
        let name = child.name().map(str::to_owned);

        if child.is_dropped() {
            debug!(key = name.as_deref().unwrap_or(""), "dropped filtered object");
            return;
        }

        let value = child.finalize();
        match name {
            Some(name) => parent.append_named(name, value),
            None => parent.append(value),
        }
    }

    fn bulk(&mut self, key: String, delegate: &dyn BulkDelegate) -> Result<(), Error> {
        let eq = self.cursor.read_u16()?;
        let open = self.cursor.read_u16()?;
        if eq != tokens::EQUALS || open != tokens::OPEN {
            return Err(Error::BulkHeader(key));
        }

        let rest = self.cursor.remaining();
        debug!(key = %key, bytes = rest.len(), "delegating bulk body");

        let (entries, consumed) = delegate
            .decode_bulk(&key, rest)
            .map_err(|source| Error::Bulk {
                key: key.clone(),
                source,
            })?;

        let mut child = NodeBuilder::named(key);
        for (name, value) in entries {
            child.append_named(name, value);
        }
        self.stack.push(child);

        // resume on the body's closing brace
        self.cursor.skip(consumed)?;
        Ok(())
    }

    fn push(&mut self, value: Value) {
        self.current_mut().append(value);
    }

    fn current(&self) -> &NodeBuilder {
        self.stack.last().expect("at least the root node is open")
    }

    fn current_mut(&mut self) -> &mut NodeBuilder {
        self.stack
            .last_mut()
            .expect("at least the root node is open")
    }
}

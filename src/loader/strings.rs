//! Plain-text dump of the game's string blocks.
//!
//! ```text
//! @block 0007
//! first string of block 7
//! a line\nbreak and a \\ backslash
//! @block 0e01
//! ...
//! ```
//!
//! Block numbers are hex. Every line after a header is one string; empty
//! lines are empty strings.

use crate::loader::load_error::LoadError;
use std::collections::BTreeMap;
use std::path::Path;

const BLOCK_HEADER: &str = "@block ";

/// Block holding the names of conversation partners.
pub const NAME_BLOCK: u16 = 0x0007;
/// The partner name of slot N is entry N + 16 of [`NAME_BLOCK`].
pub const NAME_OFFSET: u16 = 16;
/// First conversation string block; slot N uses block `0x0e00 + N`.
pub const CONV_BLOCK_BASE: u16 = 0x0e00;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTable {
    blocks: BTreeMap<u16, Vec<String>>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, LoadError> {
        let mut table = Self::new();
        let mut current: Option<u16> = None;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            if let Some(id) = line.strip_prefix(BLOCK_HEADER) {
                let id = u16::from_str_radix(id.trim(), 16).map_err(|_| LoadError::BadStringDump {
                    line: line_no,
                    message: format!("bad block number '{}'", id.trim()),
                })?;
                table.blocks.entry(id).or_default();
                current = Some(id);
                continue;
            }

            match current {
                Some(id) => {
                    let text = unescape(line).map_err(|message| LoadError::BadStringDump {
                        line: line_no,
                        message,
                    })?;
                    table.blocks.entry(id).or_default().push(text);
                }
                None if line.trim().is_empty() => {}
                None => {
                    return Err(LoadError::BadStringDump {
                        line: line_no,
                        message: "text before the first block header".to_string(),
                    });
                }
            }
        }

        Ok(table)
    }

    /// Dump in the format [`StringTable::parse`] reads.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (id, strings) in &self.blocks {
            out.push_str(&format!("{}{:04x}\n", BLOCK_HEADER, id));
            for s in strings {
                out.push_str(&escape(s));
                out.push('\n');
            }
        }
        out
    }

    pub fn block(&self, id: u16) -> Option<&[String]> {
        self.blocks.get(&id).map(Vec::as_slice)
    }

    pub fn set_block(&mut self, id: u16, strings: Vec<String>) {
        self.blocks.insert(id, strings);
    }

    pub fn get(&self, block: u16, index: u16) -> Option<&str> {
        self.block(block)?.get(index as usize).map(String::as_str)
    }

    /// Name of the partner in conversation `slot`.
    pub fn conversation_name(&self, slot: u16) -> Option<&str> {
        self.get(NAME_BLOCK, slot.checked_add(NAME_OFFSET)?)
    }
}

fn unescape(line: &str) -> Result<String, String> {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => return Err(format!("unknown escape '\\{}'", other)),
            None => return Err("line ends in a lone backslash".to_string()),
        }
    }
    Ok(out)
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n")
}

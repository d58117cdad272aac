use crate::decompiler::DecompileError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("conversation {slot} out of range, archive holds {entries}")]
    SlotOutOfRange { slot: u16, entries: u16 },

    #[error("conversation slot {0} is empty")]
    EmptySlot(u16),

    #[error("bad conversation header {found:#010x} at offset {offset:#x}")]
    BadMagic { found: u32, offset: usize },

    #[error("unknown import type {0:#06x}")]
    UnknownImportType(u16),

    #[error("unknown return type {0:#06x}")]
    UnknownReturnType(u16),

    #[error("unexpected end of data at offset {0:#x}")]
    Truncated(usize),

    #[error("string dump line {line}: {message}")]
    BadStringDump { line: usize, message: String },

    #[error("bad conversation bundle: {0}")]
    Bundle(#[from] postcard::Error),

    #[error("malformed code segment: {0}")]
    Code(#[from] DecompileError),
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoadError::Io {
            path: path.into(),
            source,
        }
    }
}

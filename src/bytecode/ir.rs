use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value type of an imported symbol or a decompiled variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    Unknown,
    Void,
    Int,
    String,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Unknown => "unknown",
            DataType::Void => "void",
            DataType::Int => "int",
            DataType::String => "string",
        }
    }
}

/// An imported function or global variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedItem {
    pub name: String,
    pub data_type: DataType,
}

impl ImportedItem {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// One loaded conversation: code segment, symbols and strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvImage {
    pub slot: u16,
    /// String block holding this conversation's text.
    pub string_block: u16,
    /// Number of stack words reserved for globals.
    pub globals_reserved: u16,
    pub code: Vec<u16>,
    /// Imported functions, keyed by CALLI id.
    pub imported_funcs: BTreeMap<u16, ImportedItem>,
    /// Imported globals, keyed by stack slot.
    pub imported_globals: BTreeMap<u16, ImportedItem>,
    pub strings: Vec<String>,
}

impl ConvImage {
    pub fn new(code: Vec<u16>) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }

    /// Name of a memory slot: the imported global's name or `global_N`.
    pub fn global_name(&self, slot: u16) -> String {
        match self.imported_globals.get(&slot) {
            Some(item) => item.name.clone(),
            None => format!("global_{}", slot),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

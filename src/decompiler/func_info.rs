use crate::bytecode::DataType;
use crate::decompiler::graph::ItemId;
use std::collections::BTreeSet;

/// Local array discovered from `local_N[M]` accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayInfo {
    pub local_start: u16,
    /// Highest offset seen; offsets are 1-based.
    pub size: u16,
}

/// What the decompiler knows about one function.
#[derive(Debug, Clone)]
pub struct FuncInfo {
    pub name: String,
    pub start: u16,
    pub end: u16,
    pub start_item: ItemId,
    pub end_item: ItemId,
    pub return_type: DataType,
    pub param_types: Vec<DataType>,
    pub locals_types: Vec<DataType>,
    pub arrays: Vec<ArrayInfo>,
    pub callers: BTreeSet<String>,
}

impl FuncInfo {
    pub fn new(name: String, start: u16, start_item: ItemId, locals: u16) -> Self {
        Self {
            name,
            start,
            end: start,
            start_item,
            end_item: start_item,
            return_type: DataType::Void,
            param_types: Vec::new(),
            locals_types: vec![DataType::Unknown; locals as usize],
            arrays: Vec::new(),
            callers: BTreeSet::new(),
        }
    }

    pub fn add_array_access(&mut self, local_start: u16, offset: u16) {
        match self.arrays.iter_mut().find(|a| a.local_start == local_start) {
            Some(array) => array.size = array.size.max(offset),
            None => self.arrays.push(ArrayInfo {
                local_start,
                size: offset,
            }),
        }
    }

    pub fn set_local_type(&mut self, index: u16, data_type: DataType) {
        let index = index as usize;
        if index >= self.locals_types.len() {
            self.locals_types.resize(index + 1, DataType::Unknown);
        }
        self.locals_types[index] = data_type;
    }

    /// Record that parameter `number` (1-based) is used.
    pub fn note_param(&mut self, number: u16) {
        let count = number as usize;
        if count > self.param_types.len() {
            self.param_types.resize(count, DataType::Int);
        }
    }

    pub fn is_unused_stub(&self) -> bool {
        self.name.starts_with("unused_")
    }
}

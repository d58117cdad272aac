use crate::loader::load_error::LoadError;
use crate::loader::reader::Reader;
use std::path::Path;
use tracing::debug;

/// Private globals of every conversation, indexed by slot.
///
/// `babglobs.dat` only records each slot's size; `bglobals.dat` (a saved
/// game) carries the values as well.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvGlobals {
    slots: Vec<Vec<u16>>,
}

impl ConvGlobals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `babglobs.dat` (`initial`) or `bglobals.dat`.
    pub fn load(path: impl AsRef<Path>, initial: bool) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| LoadError::io(path, e))?;
        Self::from_bytes(&data, initial)
    }

    pub fn from_bytes(data: &[u8], initial: bool) -> Result<Self, LoadError> {
        let mut globals = Self::new();
        let mut r = Reader::new(data);

        while !r.is_at_end() {
            let slot = r.u16()?;
            let size = r.u16()? as usize;
            let values = if initial { vec![0; size] } else { r.words(size)? };
            globals.set(slot, values);
        }

        debug!(slots = globals.slots.len(), initial, "loaded conversation globals");
        Ok(globals)
    }

    /// Serialize in `bglobals.dat` form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (slot, values) in self.slots.iter().enumerate() {
            if values.is_empty() {
                continue;
            }
            out.extend((slot as u16).to_le_bytes());
            out.extend((values.len() as u16).to_le_bytes());
            for value in values {
                out.extend(value.to_le_bytes());
            }
        }
        out
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_bytes()).map_err(|e| LoadError::io(path, e))
    }

    pub fn get(&self, slot: u16) -> &[u16] {
        self.slots.get(slot as usize).map_or(&[], Vec::as_slice)
    }

    pub fn get_mut(&mut self, slot: u16) -> &mut Vec<u16> {
        let index = slot as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, Vec::new());
        }
        &mut self.slots[index]
    }

    pub fn set(&mut self, slot: u16, values: Vec<u16>) {
        *self.get_mut(slot) = values;
    }
}

//! `cnv.ark`: the archive holding every conversation's code segment and
//! imported symbol table.

use crate::bytecode::{ConvImage, DataType, ImportedItem};
use crate::loader::load_error::LoadError;
use crate::loader::reader::Reader;
use std::path::Path;
use tracing::{debug, warn};

pub const HEADER_MAGIC: u32 = 0x0828;

const IMPORT_FUNCTION: u16 = 0x0111;
const IMPORT_GLOBAL: u16 = 0x010f;

const RETURN_VOID: u16 = 0x0000;
const RETURN_INT: u16 = 0x0129;
const RETURN_STRING: u16 = 0x012b;

const MAX_NAME_LEN: usize = 255;

/// Broken words in the shipped archive: (slot, position, replacement).
const CODE_FIXES: [(u16, usize, u16); 3] = [
    // wrong opcode; PUSHI was meant
    (6, 0x076e, 0x0016),
    // call to 0xffff; point it at a plausible function instead
    (15, 0x0584, 0x0666),
    // random(2) feeding a three-way switch
    (23, 0x04fd, 3),
];

#[derive(Debug, Clone)]
pub struct ConvArchive {
    data: Vec<u8>,
    entries: u16,
}

impl ConvArchive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| LoadError::io(path, e))?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, LoadError> {
        let entries = Reader::new(&data).u16()?;
        Ok(Self { data, entries })
    }

    /// Number of slots, empty ones included.
    pub fn len(&self) -> u16 {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// File offset of a slot's header; 0 means the slot is empty.
    pub fn offset(&self, slot: u16) -> Result<u32, LoadError> {
        if slot >= self.entries {
            return Err(LoadError::SlotOutOfRange {
                slot,
                entries: self.entries,
            });
        }
        Reader::at(&self.data, slot as usize * 4 + 2)?.u32()
    }

    /// Slots that hold a conversation.
    pub fn slots(&self) -> Vec<u16> {
        (0..self.entries)
            .filter(|slot| matches!(self.offset(*slot), Ok(offset) if offset != 0))
            .collect()
    }

    /// Load a slot's code and imports. The string table is left empty.
    pub fn load(&self, slot: u16) -> Result<ConvImage, LoadError> {
        let offset = self.offset(slot)?;
        if offset == 0 {
            return Err(LoadError::EmptySlot(slot));
        }

        let mut r = Reader::at(&self.data, offset as usize)?;
        let magic = r.u32()?;
        if magic != HEADER_MAGIC {
            return Err(LoadError::BadMagic {
                found: magic,
                offset: offset as usize,
            });
        }

        let code_size = r.u16()?;
        let (unk1, unk2) = (r.u16()?, r.u16()?);
        if unk1 != 0 || unk2 != 0 {
            warn!(slot, unk1, unk2, "unexpected header words");
        }

        let mut image = ConvImage::new(Vec::new());
        image.slot = slot;
        image.string_block = r.u16()?;
        image.globals_reserved = r.u16()?;

        read_imports(&mut r, &mut image)?;
        image.code = r.words(code_size as usize)?;
        apply_code_fixes(slot, &mut image.code);

        debug!(
            slot,
            code = image.code.len(),
            funcs = image.imported_funcs.len(),
            globals = image.imported_globals.len(),
            "loaded conversation code"
        );
        Ok(image)
    }
}

fn read_imports(r: &mut Reader<'_>, image: &mut ConvImage) -> Result<(), LoadError> {
    let count = r.u16()?;
    for _ in 0..count {
        let name_len = r.u16()? as usize;
        let name_bytes = r.bytes(name_len)?;
        let name = String::from_utf8_lossy(&name_bytes[..name_len.min(MAX_NAME_LEN)]).into_owned();

        let id = r.u16()?;
        let unknown = r.u16()?;
        if unknown != 1 {
            warn!(import = %name, unknown, "unexpected import word");
        }
        let import_type = r.u16()?;
        let data_type = match r.u16()? {
            RETURN_VOID => DataType::Void,
            RETURN_INT => DataType::Int,
            RETURN_STRING => DataType::String,
            other => return Err(LoadError::UnknownReturnType(other)),
        };

        let item = ImportedItem::new(name, data_type);
        match import_type {
            IMPORT_FUNCTION => image.imported_funcs.insert(id, item),
            IMPORT_GLOBAL => image.imported_globals.insert(id, item),
            other => return Err(LoadError::UnknownImportType(other)),
        };
    }
    Ok(())
}

fn apply_code_fixes(slot: u16, code: &mut [u16]) {
    for (fix_slot, pos, word) in CODE_FIXES {
        if fix_slot != slot {
            continue;
        }
        match code.get_mut(pos) {
            Some(old) => {
                debug!(slot, pos, old = *old, new = word, "patching code word");
                *old = word;
            }
            None => warn!(slot, pos, "code fix position past end of code"),
        }
    }
}

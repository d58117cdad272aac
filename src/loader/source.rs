use crate::bytecode::ConvImage;
use crate::decompiler::ConvSource;
use crate::loader::ark::ConvArchive;
use crate::loader::load_error::LoadError;
use crate::loader::strings::{CONV_BLOCK_BASE, StringTable};
use std::path::Path;
use tracing::warn;

/// Conversations straight from the game files.
#[derive(Debug, Clone)]
pub struct GameData {
    archive: ConvArchive,
    strings: StringTable,
}

impl GameData {
    pub fn new(archive: ConvArchive, strings: StringTable) -> Self {
        Self { archive, strings }
    }

    /// Open `cnv.ark` and, if given, a string dump.
    pub fn open(ark: impl AsRef<Path>, strings: Option<&Path>) -> Result<Self, LoadError> {
        let archive = ConvArchive::open(ark)?;
        let strings = match strings {
            Some(path) => StringTable::load(path)?,
            None => StringTable::new(),
        };
        Ok(Self::new(archive, strings))
    }

    pub fn archive(&self) -> &ConvArchive {
        &self.archive
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }
}

impl ConvSource for GameData {
    fn load_conversation(&self, slot: u16) -> Result<ConvImage, LoadError> {
        let mut image = self.archive.load(slot)?;

        // the header names the block; fall back to the usual numbering
        let block = self
            .strings
            .block(image.string_block)
            .or_else(|| self.strings.block(CONV_BLOCK_BASE.wrapping_add(slot)));
        match block {
            Some(strings) => image.strings = strings.to_vec(),
            None => warn!(slot, block = image.string_block, "no strings for conversation"),
        }
        Ok(image)
    }

    fn conversation_name(&self, slot: u16) -> Option<String> {
        self.strings.conversation_name(slot).map(str::to_string)
    }
}

/// A single conversation saved with [`save_bundle`].
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    image: ConvImage,
}

impl Bundle {
    pub fn new(image: ConvImage) -> Self {
        Self { image }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| LoadError::io(path, e))?;
        Ok(Self::new(ConvImage::from_bytes(&bytes)?))
    }

    pub fn image(&self) -> &ConvImage {
        &self.image
    }

    pub fn into_image(self) -> ConvImage {
        self.image
    }
}

impl ConvSource for Bundle {
    fn load_conversation(&self, slot: u16) -> Result<ConvImage, LoadError> {
        if slot != self.image.slot {
            return Err(LoadError::SlotOutOfRange { slot, entries: 1 });
        }
        Ok(self.image.clone())
    }
}

pub fn save_bundle(image: &ConvImage, path: impl AsRef<Path>) -> Result<(), LoadError> {
    let path = path.as_ref();
    let bytes = image.to_bytes()?;
    std::fs::write(path, bytes).map_err(|e| LoadError::io(path, e))
}

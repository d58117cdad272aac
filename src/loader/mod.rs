//! Game file formats: the conversation archive, conversation globals,
//! string dumps and conversation bundles.

pub mod ark;
pub mod globals;
pub mod load_error;
mod reader;
pub mod source;
pub mod strings;

pub use ark::ConvArchive;
pub use globals::ConvGlobals;
pub use load_error::LoadError;
pub use source::{Bundle, GameData, save_bundle};
pub use strings::StringTable;

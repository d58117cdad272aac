//! Ultima Underworld conversation code: loader, interpreter and decompiler.

pub mod bytecode;
pub mod decompiler;
pub mod loader;
pub mod runtime;

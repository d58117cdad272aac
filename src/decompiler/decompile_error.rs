use thiserror::Error;

/// An assumption of the decompiler that did not hold.
///
/// Raised while analyzing one function; that function is then emitted as
/// raw disassembly and decompilation carries on with the rest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecompileError {
    #[error("instruction at {pos:#06x} is missing its operand")]
    TruncatedOperand { pos: u16 },

    #[error("operator {mnemonic} at {pos:#06x} needs {needed} expressions, found {found}")]
    MissingExpressions {
        mnemonic: &'static str,
        pos: u16,
        needed: usize,
        found: usize,
    },

    #[error("call at {pos:#06x} targets unknown function {name}")]
    UnknownFunction { name: String, pos: u16 },

    #[error("imported call at {pos:#06x} has no argument count")]
    MissingArgumentCount { pos: u16 },

    #[error("{mnemonic} at {pos:#06x} cannot be turned into an expression")]
    UnexpectedOperator { mnemonic: &'static str, pos: u16 },
}

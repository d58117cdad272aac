use thiserror::Error;

/// Bad access to the execution stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StackFault {
    #[error("stack overflow (capacity {capacity})")]
    Overflow { capacity: usize },

    #[error("stack underflow")]
    Underflow,

    #[error("stack access at {pos:#06x} out of range (capacity {capacity})")]
    OutOfRange { pos: u16, capacity: usize },

    #[error("invalid stack pointer {value:#06x} (capacity {capacity})")]
    InvalidPointer { value: u16, capacity: usize },
}

/// Reason an interpreter run was stopped.
///
/// Faults end the run; `step()` reports them only through the finished state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmFault {
    #[error("unknown opcode {opcode:#06x} at {ip:#06x}")]
    UnknownOpcode { opcode: u16, ip: u16 },

    #[error("opcode {mnemonic} at {ip:#06x} is not supported")]
    UnsupportedOpcode { mnemonic: &'static str, ip: u16 },

    #[error("division by zero at {ip:#06x}")]
    DivisionByZero { ip: u16 },

    #[error("unresolved imported function {id:#06x} at {ip:#06x}")]
    UnresolvedImport { id: u16, ip: u16 },

    #[error("instruction pointer {ip:#06x} is outside the code segment")]
    CodeOutOfRange { ip: u16 },

    #[error("{fault} at {ip:#06x}")]
    Stack { fault: StackFault, ip: u16 },

    #[error("step limit of {0} exceeded")]
    StepLimit(usize),

    #[error("interpreter was not initialized")]
    NotInitialized,
}

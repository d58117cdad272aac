pub mod callback;
pub mod intrinsics;
pub mod placeholder;
pub mod runtime_error;
pub mod stack;
pub mod vm;

pub use callback::CodeCallback;
pub use intrinsics::Intrinsics;
pub use runtime_error::{StackFault, VmFault};
pub use stack::ConvStack;
pub use vm::{CodeVm, VmConfig, VmState};

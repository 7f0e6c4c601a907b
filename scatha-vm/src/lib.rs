//! The Scatha virtual machine: a single-threaded, register-windowed bytecode
//! interpreter with virtual memory, a builtin function table and a foreign
//! function interface.

#![warn(missing_debug_implementations)]

mod builtin;
mod error;
mod execution;
mod ffi;
mod memory;
mod vm;

pub use builtin::BuiltinFunction;
pub use scatha_asm::Builtin;
pub use error::{FfiError, MemoryAccessKind, VmError, VmResult};
pub use ffi::ForeignFunction;
pub use memory::VirtualMemory;
pub use vm::{
    CompareFlags, ExecutionFrame, VirtualMachine, VmStats,
    CALL_METADATA_SIZE, DEFAULT_REGISTER_COUNT, DEFAULT_STACK_SIZE,
    MAX_CALLFRAME_REGISTER_COUNT,
};

pub use scatha_asm::VirtualPointer;

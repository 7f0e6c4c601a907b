//! Runtime error taxonomy of the virtual machine.
//!
//! Runtime failures are exceptional: they abort the current `execute` call
//! with a typed error value and unwind the frame stack. There is no recovery.

use scatha_asm::{ProgramError, VirtualPointer};
use thiserror::Error;

/// Classification of an invalid memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessKind {
    MisalignedLoad,
    MisalignedStore,
    OutOfRange,
    UseAfterFree,
}

/// Any error the interpreter can raise during execution or program loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),
    #[error("{kind:?} accessing {size} bytes at {ptr:?}")]
    MemoryAccess {
        kind: MemoryAccessKind,
        ptr: VirtualPointer,
        size: usize,
    },
    #[error("stack allocation of {0} bytes is not 8-aligned")]
    InvalidStackAllocation(u64),
    #[error("trap")]
    Trap,
    #[error("invalid builtin index {0}")]
    InvalidBuiltinIndex(u16),
    #[error("arithmetic error")]
    Arithmetic,
    #[error("foreign function error: {0}")]
    Ffi(#[from] FfiError),
    #[error("malformed program: {0}")]
    Program(#[from] ProgramError),
    #[error("no program loaded")]
    NoProgram,
}

/// Load-time failures of the foreign function interface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FfiError {
    #[error("library {0:?} not found")]
    LibraryNotFound(String),
    #[error("symbol {0:?} missing")]
    MissingSymbol(String),
    #[error("foreign function index {0} is not loaded")]
    NotLoaded(usize),
    #[error("program requires foreign functions but the `ffi` feature is disabled")]
    Unsupported,
}

pub type VmResult<T> = Result<T, VmError>;

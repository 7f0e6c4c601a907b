//! Atomic types of the Scatha VM: the opcode table, the assembly element
//! stream, the two-pass assembler and the binary program layout.

#![warn(missing_debug_implementations)]

mod assembler;
mod builtin;
mod disasm;
mod element;
mod map;
mod opcode;
mod program;
mod vptr;

pub use assembler::{assemble, AssemblerError};
pub use builtin::Builtin;
pub use disasm::{disassemble, Disassembled, DisassemblyError};
pub use element::{
    ArithmeticOperation, AssemblyStream, Callee, CompareOperation, Conversion,
    DataBlock, Element, ExtFunctionKind, Instruction, Label, LabelId,
    MemoryAddress, MoveDest, RegisterIndex, ScalarType,
    UnaryArithmeticOperation, Value, ValueOperand, Width, NO_DYNAMIC_OFFSET,
};
pub use map::{
    map_arithmetic, map_call, map_call_ext, map_cmove, map_compare,
    map_conversion, map_jump, map_move, map_set, map_test,
    map_unary_arithmetic, MoveMapResult,
};
pub use opcode::{code_size, Opcode};
pub use program::{
    FfiFuncDecl, FfiLibDecl, FfiType, Program, ProgramError, ProgramView,
    HEADER_SIZE, MAGIC, VERSION,
};
pub use vptr::{VirtualPointer, STATIC_DATA_SLOT};

//! Value location discipline.
//!
//! Every lowered expression yields a [`Val`]: the SSA value either *is* the
//! value (`Register`) or is a pointer to storage holding it (`Memory`).
//! Dynamic arrays are fat: the data pointer travels as the value and the
//! element count rides along in [`Val::array_size`].

use scatha_ir::{TypeId, Value};

/// Where a lowered value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loc {
    Register,
    Memory,
}

/// A lowered expression value.
#[derive(Debug, Clone, Copy)]
pub struct Val {
    pub v: Value,
    /// Type of the denoted value (not of the pointer when in memory).
    pub ir_ty: TypeId,
    pub loc: Loc,
    /// Element count of array-typed values.
    pub array_size: Option<Value>,
}

impl Val {
    pub fn register(v: Value, ir_ty: TypeId) -> Self {
        Self { v, ir_ty, loc: Loc::Register, array_size: None }
    }

    pub fn memory(address: Value, ir_ty: TypeId) -> Self {
        Self { v: address, ir_ty, loc: Loc::Memory, array_size: None }
    }

    pub fn with_size(mut self, size: Value) -> Self {
        self.array_size = Some(size);
        self
    }
}

/// Parameter passing location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamCc {
    /// Scalar in one register.
    Register,
    /// Caller-owned storage, passed as a pointer.
    Memory,
    /// Dynamic array: data pointer plus element count, two slots.
    ArrayFat,
}

/// Return value location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetCc {
    Register,
    /// Returned through a hidden leading pointer argument.
    Memory,
    Void,
}

/// Where every parameter and the return value of a function live.
#[derive(Debug, Clone)]
pub struct PassingConvention {
    pub params: Vec<ParamCc>,
    pub ret: RetCc,
}

impl PassingConvention {
    /// Number of leading hidden arguments.
    pub fn hidden_args(&self) -> usize {
        usize::from(self.ret == RetCc::Memory)
    }

    /// Index of the first IR parameter belonging to source parameter
    /// `index`.
    pub fn ir_param_index(&self, index: usize) -> usize {
        self.hidden_args()
            + self.params[..index]
                .iter()
                .map(|cc| match cc {
                    ParamCc::ArrayFat => 2,
                    _ => 1,
                })
                .sum::<usize>()
    }
}

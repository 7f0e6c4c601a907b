//! Values and instructions.
//!
//! Instructions live in per-function arenas and reference their operands
//! through the small copyable [`Value`] enum. Every instruction records the
//! instructions using it; the mutator API on
//! [`Function`](crate::Function) keeps both sides in sync.

use crate::types::TypeId;

/// Handle to an instruction within its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub(crate) u32);

/// Handle to a basic block within its function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

/// Index of a function within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncRef(pub u32);

/// Index of a constant data block within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstDataRef(pub u32);

/// Index of a global variable within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalRef(pub u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An SSA value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    /// Result of an instruction.
    Inst(InstId),
    /// Function parameter by index.
    Param(u32),
    IntConst { value: u64, ty: TypeId },
    FloatConst { bits: u64, ty: TypeId },
    Undef(TypeId),
    /// Address of a function, e.g. as a call target.
    Function(FuncRef),
    /// A VM builtin as a call target, by table index.
    Builtin(u16),
    /// A foreign function as a call target, by module declaration index.
    ForeignFunction(u32),
    /// Address of module constant data.
    ConstData(ConstDataRef),
    /// Address of a global variable.
    Global(GlobalRef),
}

impl Value {
    pub fn int(value: i64, ty: TypeId) -> Self {
        Value::IntConst { value: value as u64, ty }
    }

    pub fn as_inst(self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_constant(self) -> bool {
        matches!(
            self,
            Value::IntConst { .. }
                | Value::FloatConst { .. }
                | Value::Undef(_)
                | Value::ConstData(_)
                | Value::Function(_)
                | Value::Builtin(_)
                | Value::ForeignFunction(_)
        )
    }
}

/// Integer arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    LShL,
    LShR,
    AShL,
    AShR,
    And,
    Or,
    XOr,
}

impl ArithmeticOp {
    pub fn is_float(self) -> bool {
        matches!(
            self,
            ArithmeticOp::FAdd
                | ArithmeticOp::FSub
                | ArithmeticOp::FMul
                | ArithmeticOp::FDiv
        )
    }

    /// `true` if `a op b == b op a`.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            ArithmeticOp::Add
                | ArithmeticOp::Mul
                | ArithmeticOp::FAdd
                | ArithmeticOp::FMul
                | ArithmeticOp::And
                | ArithmeticOp::Or
                | ArithmeticOp::XOr
        )
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "add",
            ArithmeticOp::Sub => "sub",
            ArithmeticOp::Mul => "mul",
            ArithmeticOp::SDiv => "sdiv",
            ArithmeticOp::UDiv => "udiv",
            ArithmeticOp::SRem => "srem",
            ArithmeticOp::URem => "urem",
            ArithmeticOp::FAdd => "fadd",
            ArithmeticOp::FSub => "fsub",
            ArithmeticOp::FMul => "fmul",
            ArithmeticOp::FDiv => "fdiv",
            ArithmeticOp::LShL => "lshl",
            ArithmeticOp::LShR => "lshr",
            ArithmeticOp::AShL => "ashl",
            ArithmeticOp::AShR => "ashr",
            ArithmeticOp::And => "and",
            ArithmeticOp::Or => "or",
            ArithmeticOp::XOr => "xor",
        }
    }
}

/// Unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Twos-complement negation.
    Neg,
    /// Bitwise complement.
    BitNot,
    /// Boolean negation.
    LogNot,
}

impl UnaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::BitNot => "bnt",
            UnaryOp::LogNot => "lnt",
        }
    }
}

/// Interpretation of compare operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareMode {
    Signed,
    Unsigned,
    Float,
}

/// Relation tested by a compare instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl CompareOp {
    pub fn inverse(self) -> Self {
        match self {
            CompareOp::Equal => CompareOp::NotEqual,
            CompareOp::NotEqual => CompareOp::Equal,
            CompareOp::Less => CompareOp::GreaterEq,
            CompareOp::LessEq => CompareOp::Greater,
            CompareOp::Greater => CompareOp::LessEq,
            CompareOp::GreaterEq => CompareOp::Less,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            CompareOp::Equal => "eq",
            CompareOp::NotEqual => "neq",
            CompareOp::Less => "ls",
            CompareOp::LessEq => "leq",
            CompareOp::Greater => "grt",
            CompareOp::GreaterEq => "geq",
        }
    }
}

/// Value conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionOp {
    Zext,
    Sext,
    Trunc,
    Fext,
    Ftrunc,
    StoF,
    UtoF,
    FtoS,
    FtoU,
    Bitcast,
}

impl ConversionOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            ConversionOp::Zext => "zext",
            ConversionOp::Sext => "sext",
            ConversionOp::Trunc => "trunc",
            ConversionOp::Fext => "fext",
            ConversionOp::Ftrunc => "ftrunc",
            ConversionOp::StoF => "stof",
            ConversionOp::UtoF => "utof",
            ConversionOp::FtoS => "ftos",
            ConversionOp::FtoU => "ftou",
            ConversionOp::Bitcast => "bitcast",
        }
    }
}

/// Instruction payload. Operand lists live next to the payload in
/// [`Inst`]; the comments note the expected operand layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstKind {
    /// Stack allocation of `allocated_ty`. No operands.
    Alloca { allocated_ty: TypeId },
    /// `[address]`.
    Load,
    /// `[address, value]`.
    Store,
    /// `[lhs, rhs]`.
    Arithmetic(ArithmeticOp),
    /// `[operand]`.
    UnaryArithmetic(UnaryOp),
    /// `[lhs, rhs]`.
    Compare { mode: CompareMode, op: CompareOp },
    /// `[operand]`.
    Conversion(ConversionOp),
    /// `[base, array_index]`; member indices resolve struct fields after the
    /// dynamic index step.
    GetElementPtr { elem_ty: TypeId, member_indices: Vec<usize> },
    /// `[aggregate]`.
    ExtractValue { indices: Vec<usize> },
    /// `[aggregate, value]`.
    InsertValue { indices: Vec<usize> },
    /// `[cond, then_value, else_value]`.
    Select,
    /// `[callee, args...]`.
    Call,
    /// Operands parallel to `preds`.
    Phi { preds: Vec<BlockId> },
    /// Terminator. No operands.
    Goto { target: BlockId },
    /// Terminator. `[cond]`.
    Branch { then_target: BlockId, else_target: BlockId },
    /// Terminator. `[value]`, empty for void returns.
    Return,
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Goto { .. } | InstKind::Branch { .. } | InstKind::Return
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// Successor blocks of a terminator, in branch order.
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            InstKind::Goto { target } => vec![*target],
            InstKind::Branch { then_target, else_target } => {
                vec![*then_target, *else_target]
            }
            _ => Vec::new(),
        }
    }

    /// `true` for instructions with observable side effects which dead code
    /// elimination must keep.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            InstKind::Store
                | InstKind::Call
                | InstKind::Goto { .. }
                | InstKind::Branch { .. }
                | InstKind::Return
        )
    }
}

/// One instruction: payload, operands, result type, users.
#[derive(Debug, Clone)]
pub struct Inst {
    pub kind: InstKind,
    pub operands: Vec<Value>,
    pub ty: TypeId,
    pub name: String,
    pub(crate) block: Option<BlockId>,
    pub(crate) users: Vec<InstId>,
}

impl Inst {
    /// Block currently containing the instruction.
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Instructions that use this instruction's value. A user with multiple
    /// uses appears once per use.
    pub fn users(&self) -> &[InstId] {
        &self.users
    }
}

//! Mapping from symbolic element operands to concrete opcodes.
//!
//! Each function picks the opcode for one instruction family from the
//! combination of operation, destination kind, source kind and operand width.
//! `None` means the element stream asked for an encoding the instruction set
//! does not have.

use crate::element::{
    ArithmeticOperation, Callee, CompareOperation, Conversion, ExtFunctionKind,
    MoveDest, ScalarType, UnaryArithmeticOperation, Value, ValueOperand, Width,
};
use crate::opcode::Opcode;

/// Opcode plus the width of the actual memory/immediate access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveMapResult {
    pub opcode: Opcode,
    pub access_width: Width,
}

pub fn map_move(
    dest: MoveDest,
    src: ValueOperand,
    width: Width,
) -> Option<MoveMapResult> {
    match (dest, src) {
        (MoveDest::Register(_), ValueOperand::Register(_)) => {
            Some(MoveMapResult { opcode: Opcode::Mov64RR, access_width: Width::W64 })
        }
        (MoveDest::Register(_), ValueOperand::Constant(_)) => {
            Some(MoveMapResult { opcode: Opcode::Mov64RV, access_width: Width::W64 })
        }
        (MoveDest::Register(_), ValueOperand::Memory(_)) => {
            let opcode = match width {
                Width::W8 => Opcode::Mov8RM,
                Width::W16 => Opcode::Mov16RM,
                Width::W32 => Opcode::Mov32RM,
                Width::W64 => Opcode::Mov64RM,
            };
            Some(MoveMapResult { opcode, access_width: width })
        }
        (MoveDest::Memory(_), ValueOperand::Register(_)) => {
            let opcode = match width {
                Width::W8 => Opcode::Mov8MR,
                Width::W16 => Opcode::Mov16MR,
                Width::W32 => Opcode::Mov32MR,
                Width::W64 => Opcode::Mov64MR,
            };
            Some(MoveMapResult { opcode, access_width: width })
        }
        (MoveDest::Memory(_), _) => None,
    }
}

pub fn map_cmove(
    cond: CompareOperation,
    src: ValueOperand,
    width: Width,
) -> Option<MoveMapResult> {
    use CompareOperation::*;
    use Opcode::*;
    match src {
        ValueOperand::Register(_) => {
            let opcode = match cond {
                Eq => CMovE64RR,
                NotEq => CMovNE64RR,
                Less => CMovL64RR,
                LessEq => CMovLE64RR,
                Greater => CMovG64RR,
                GreaterEq => CMovGE64RR,
            };
            Some(MoveMapResult { opcode, access_width: Width::W64 })
        }
        ValueOperand::Constant(_) => {
            let opcode = match cond {
                Eq => CMovE64RV,
                NotEq => CMovNE64RV,
                Less => CMovL64RV,
                LessEq => CMovLE64RV,
                Greater => CMovG64RV,
                GreaterEq => CMovGE64RV,
            };
            Some(MoveMapResult { opcode, access_width: Width::W64 })
        }
        ValueOperand::Memory(_) => {
            let opcode = match (cond, width) {
                (Eq, Width::W8) => CMovE8RM,
                (Eq, Width::W16) => CMovE16RM,
                (Eq, Width::W32) => CMovE32RM,
                (Eq, Width::W64) => CMovE64RM,
                (NotEq, Width::W8) => CMovNE8RM,
                (NotEq, Width::W16) => CMovNE16RM,
                (NotEq, Width::W32) => CMovNE32RM,
                (NotEq, Width::W64) => CMovNE64RM,
                (Less, Width::W8) => CMovL8RM,
                (Less, Width::W16) => CMovL16RM,
                (Less, Width::W32) => CMovL32RM,
                (Less, Width::W64) => CMovL64RM,
                (LessEq, Width::W8) => CMovLE8RM,
                (LessEq, Width::W16) => CMovLE16RM,
                (LessEq, Width::W32) => CMovLE32RM,
                (LessEq, Width::W64) => CMovLE64RM,
                (Greater, Width::W8) => CMovG8RM,
                (Greater, Width::W16) => CMovG16RM,
                (Greater, Width::W32) => CMovG32RM,
                (Greater, Width::W64) => CMovG64RM,
                (GreaterEq, Width::W8) => CMovGE8RM,
                (GreaterEq, Width::W16) => CMovGE16RM,
                (GreaterEq, Width::W32) => CMovGE32RM,
                (GreaterEq, Width::W64) => CMovGE64RM,
            };
            Some(MoveMapResult { opcode, access_width: width })
        }
    }
}

pub fn map_jump(cond: Option<CompareOperation>) -> Opcode {
    match cond {
        None => Opcode::Jmp,
        Some(CompareOperation::Eq) => Opcode::JE,
        Some(CompareOperation::NotEq) => Opcode::JNE,
        Some(CompareOperation::Less) => Opcode::JL,
        Some(CompareOperation::LessEq) => Opcode::JLE,
        Some(CompareOperation::Greater) => Opcode::JG,
        Some(CompareOperation::GreaterEq) => Opcode::JGE,
    }
}

pub fn map_call(callee: Callee) -> Opcode {
    match callee {
        Callee::Label(_) => Opcode::Call,
        Callee::Register(_) => Opcode::ICallR,
        Callee::Memory(_) => Opcode::ICallM,
    }
}

pub fn map_call_ext(kind: ExtFunctionKind) -> Opcode {
    match kind {
        ExtFunctionKind::Builtin => Opcode::CBltn,
        ExtFunctionKind::Foreign => Opcode::CFng,
    }
}

pub fn map_compare(
    ty: ScalarType,
    rhs: ValueOperand,
    width: Width,
) -> Option<Opcode> {
    use Opcode::*;
    match rhs {
        ValueOperand::Register(_) => match (ty, width) {
            (ScalarType::Signed, Width::W8) => Some(SCmp8RR),
            (ScalarType::Signed, Width::W16) => Some(SCmp16RR),
            (ScalarType::Signed, Width::W32) => Some(SCmp32RR),
            (ScalarType::Signed, Width::W64) => Some(SCmp64RR),
            (ScalarType::Unsigned, Width::W8) => Some(UCmp8RR),
            (ScalarType::Unsigned, Width::W16) => Some(UCmp16RR),
            (ScalarType::Unsigned, Width::W32) => Some(UCmp32RR),
            (ScalarType::Unsigned, Width::W64) => Some(UCmp64RR),
            (ScalarType::Float, Width::W32) => Some(FCmp32RR),
            (ScalarType::Float, Width::W64) => Some(FCmp64RR),
            (ScalarType::Float, _) => None,
        },
        ValueOperand::Constant(_) => match (ty, width) {
            (ScalarType::Signed, Width::W8) => Some(SCmp8RV),
            (ScalarType::Signed, Width::W16) => Some(SCmp16RV),
            (ScalarType::Signed, Width::W32) => Some(SCmp32RV),
            (ScalarType::Signed, Width::W64) => Some(SCmp64RV),
            (ScalarType::Unsigned, Width::W8) => Some(UCmp8RV),
            (ScalarType::Unsigned, Width::W16) => Some(UCmp16RV),
            (ScalarType::Unsigned, Width::W32) => Some(UCmp32RV),
            (ScalarType::Unsigned, Width::W64) => Some(UCmp64RV),
            (ScalarType::Float, Width::W32) => Some(FCmp32RV),
            (ScalarType::Float, Width::W64) => Some(FCmp64RV),
            (ScalarType::Float, _) => None,
        },
        ValueOperand::Memory(_) => None,
    }
}

pub fn map_test(ty: ScalarType, width: Width) -> Option<Opcode> {
    use Opcode::*;
    match (ty, width) {
        (ScalarType::Signed, Width::W8) => Some(STest8),
        (ScalarType::Signed, Width::W16) => Some(STest16),
        (ScalarType::Signed, Width::W32) => Some(STest32),
        (ScalarType::Signed, Width::W64) => Some(STest64),
        (ScalarType::Unsigned, Width::W8) => Some(UTest8),
        (ScalarType::Unsigned, Width::W16) => Some(UTest16),
        (ScalarType::Unsigned, Width::W32) => Some(UTest32),
        (ScalarType::Unsigned, Width::W64) => Some(UTest64),
        (ScalarType::Float, _) => None,
    }
}

pub fn map_set(operation: CompareOperation) -> Opcode {
    match operation {
        CompareOperation::Eq => Opcode::SetE,
        CompareOperation::NotEq => Opcode::SetNE,
        CompareOperation::Less => Opcode::SetL,
        CompareOperation::LessEq => Opcode::SetLE,
        CompareOperation::Greater => Opcode::SetG,
        CompareOperation::GreaterEq => Opcode::SetGE,
    }
}

pub fn map_unary_arithmetic(
    op: UnaryArithmeticOperation,
    width: Width,
) -> Option<Opcode> {
    match op {
        UnaryArithmeticOperation::LogicalNot => {
            (width == Width::W64).then_some(Opcode::LNt)
        }
        UnaryArithmeticOperation::BitwiseNot => {
            (width == Width::W64).then_some(Opcode::BNt)
        }
        UnaryArithmeticOperation::Negate => Some(match width {
            Width::W8 => Opcode::Neg8,
            Width::W16 => Opcode::Neg16,
            Width::W32 => Opcode::Neg32,
            Width::W64 => Opcode::Neg64,
        }),
    }
}

/// Operand mode of the source in a three-mode arithmetic family.
enum Mode {
    RR,
    RV,
    RM,
}

fn mode_of(src: &ValueOperand, op: ArithmeticOperation) -> Option<Mode> {
    match src {
        ValueOperand::Register(_) => Some(Mode::RR),
        ValueOperand::Memory(_) => Some(Mode::RM),
        ValueOperand::Constant(value) => {
            // Shift immediates must be 8 bit, everything else full width.
            match (op.is_shift(), value) {
                (true, Value::V8(_)) => Some(Mode::RV),
                (true, _) => None,
                (false, _) => Some(Mode::RV),
            }
        }
    }
}

pub fn map_arithmetic(
    op: ArithmeticOperation,
    width: Width,
    src: &ValueOperand,
) -> Option<Opcode> {
    use ArithmeticOperation::*;
    use Opcode::*;
    let mode = mode_of(src, op)?;
    let opcode = match (op, width, mode) {
        (Add, Width::W64, Mode::RR) => Add64RR,
        (Add, Width::W64, Mode::RV) => Add64RV,
        (Add, Width::W64, Mode::RM) => Add64RM,
        (Sub, Width::W64, Mode::RR) => Sub64RR,
        (Sub, Width::W64, Mode::RV) => Sub64RV,
        (Sub, Width::W64, Mode::RM) => Sub64RM,
        (Mul, Width::W64, Mode::RR) => Mul64RR,
        (Mul, Width::W64, Mode::RV) => Mul64RV,
        (Mul, Width::W64, Mode::RM) => Mul64RM,
        (UDiv, Width::W64, Mode::RR) => UDiv64RR,
        (UDiv, Width::W64, Mode::RV) => UDiv64RV,
        (UDiv, Width::W64, Mode::RM) => UDiv64RM,
        (SDiv, Width::W64, Mode::RR) => SDiv64RR,
        (SDiv, Width::W64, Mode::RV) => SDiv64RV,
        (SDiv, Width::W64, Mode::RM) => SDiv64RM,
        (URem, Width::W64, Mode::RR) => URem64RR,
        (URem, Width::W64, Mode::RV) => URem64RV,
        (URem, Width::W64, Mode::RM) => URem64RM,
        (SRem, Width::W64, Mode::RR) => SRem64RR,
        (SRem, Width::W64, Mode::RV) => SRem64RV,
        (SRem, Width::W64, Mode::RM) => SRem64RM,

        (Add, Width::W32, Mode::RR) => Add32RR,
        (Add, Width::W32, Mode::RV) => Add32RV,
        (Add, Width::W32, Mode::RM) => Add32RM,
        (Sub, Width::W32, Mode::RR) => Sub32RR,
        (Sub, Width::W32, Mode::RV) => Sub32RV,
        (Sub, Width::W32, Mode::RM) => Sub32RM,
        (Mul, Width::W32, Mode::RR) => Mul32RR,
        (Mul, Width::W32, Mode::RV) => Mul32RV,
        (Mul, Width::W32, Mode::RM) => Mul32RM,
        (UDiv, Width::W32, Mode::RR) => UDiv32RR,
        (UDiv, Width::W32, Mode::RV) => UDiv32RV,
        (UDiv, Width::W32, Mode::RM) => UDiv32RM,
        (SDiv, Width::W32, Mode::RR) => SDiv32RR,
        (SDiv, Width::W32, Mode::RV) => SDiv32RV,
        (SDiv, Width::W32, Mode::RM) => SDiv32RM,
        (URem, Width::W32, Mode::RR) => URem32RR,
        (URem, Width::W32, Mode::RV) => URem32RV,
        (URem, Width::W32, Mode::RM) => URem32RM,
        (SRem, Width::W32, Mode::RR) => SRem32RR,
        (SRem, Width::W32, Mode::RV) => SRem32RV,
        (SRem, Width::W32, Mode::RM) => SRem32RM,

        (FAdd, Width::W64, Mode::RR) => FAdd64RR,
        (FAdd, Width::W64, Mode::RV) => FAdd64RV,
        (FAdd, Width::W64, Mode::RM) => FAdd64RM,
        (FSub, Width::W64, Mode::RR) => FSub64RR,
        (FSub, Width::W64, Mode::RV) => FSub64RV,
        (FSub, Width::W64, Mode::RM) => FSub64RM,
        (FMul, Width::W64, Mode::RR) => FMul64RR,
        (FMul, Width::W64, Mode::RV) => FMul64RV,
        (FMul, Width::W64, Mode::RM) => FMul64RM,
        (FDiv, Width::W64, Mode::RR) => FDiv64RR,
        (FDiv, Width::W64, Mode::RV) => FDiv64RV,
        (FDiv, Width::W64, Mode::RM) => FDiv64RM,
        (FAdd, Width::W32, Mode::RR) => FAdd32RR,
        (FAdd, Width::W32, Mode::RV) => FAdd32RV,
        (FAdd, Width::W32, Mode::RM) => FAdd32RM,
        (FSub, Width::W32, Mode::RR) => FSub32RR,
        (FSub, Width::W32, Mode::RV) => FSub32RV,
        (FSub, Width::W32, Mode::RM) => FSub32RM,
        (FMul, Width::W32, Mode::RR) => FMul32RR,
        (FMul, Width::W32, Mode::RV) => FMul32RV,
        (FMul, Width::W32, Mode::RM) => FMul32RM,
        (FDiv, Width::W32, Mode::RR) => FDiv32RR,
        (FDiv, Width::W32, Mode::RV) => FDiv32RV,
        (FDiv, Width::W32, Mode::RM) => FDiv32RM,

        (LShL, Width::W64, Mode::RR) => LSL64RR,
        (LShL, Width::W64, Mode::RV) => LSL64RV,
        (LShL, Width::W64, Mode::RM) => LSL64RM,
        (LShR, Width::W64, Mode::RR) => LSR64RR,
        (LShR, Width::W64, Mode::RV) => LSR64RV,
        (LShR, Width::W64, Mode::RM) => LSR64RM,
        (LShL, Width::W32, Mode::RR) => LSL32RR,
        (LShL, Width::W32, Mode::RV) => LSL32RV,
        (LShL, Width::W32, Mode::RM) => LSL32RM,
        (LShR, Width::W32, Mode::RR) => LSR32RR,
        (LShR, Width::W32, Mode::RV) => LSR32RV,
        (LShR, Width::W32, Mode::RM) => LSR32RM,
        (AShL, Width::W64, Mode::RR) => ASL64RR,
        (AShL, Width::W64, Mode::RV) => ASL64RV,
        (AShL, Width::W64, Mode::RM) => ASL64RM,
        (AShR, Width::W64, Mode::RR) => ASR64RR,
        (AShR, Width::W64, Mode::RV) => ASR64RV,
        (AShR, Width::W64, Mode::RM) => ASR64RM,
        (AShL, Width::W32, Mode::RR) => ASL32RR,
        (AShL, Width::W32, Mode::RV) => ASL32RV,
        (AShL, Width::W32, Mode::RM) => ASL32RM,
        (AShR, Width::W32, Mode::RR) => ASR32RR,
        (AShR, Width::W32, Mode::RV) => ASR32RV,
        (AShR, Width::W32, Mode::RM) => ASR32RM,

        (And, Width::W64, Mode::RR) => And64RR,
        (And, Width::W64, Mode::RV) => And64RV,
        (And, Width::W64, Mode::RM) => And64RM,
        (Or, Width::W64, Mode::RR) => Or64RR,
        (Or, Width::W64, Mode::RV) => Or64RV,
        (Or, Width::W64, Mode::RM) => Or64RM,
        (XOr, Width::W64, Mode::RR) => XOr64RR,
        (XOr, Width::W64, Mode::RV) => XOr64RV,
        (XOr, Width::W64, Mode::RM) => XOr64RM,
        (And, Width::W32, Mode::RR) => And32RR,
        (And, Width::W32, Mode::RV) => And32RV,
        (And, Width::W32, Mode::RM) => And32RM,
        (Or, Width::W32, Mode::RR) => Or32RR,
        (Or, Width::W32, Mode::RV) => Or32RV,
        (Or, Width::W32, Mode::RM) => Or32RM,
        (XOr, Width::W32, Mode::RR) => XOr32RR,
        (XOr, Width::W32, Mode::RV) => XOr32RV,
        (XOr, Width::W32, Mode::RM) => XOr32RM,

        // Only 32 and 64 bit arithmetic exists.
        (_, Width::W8 | Width::W16, _) => return None,
    };
    Some(opcode)
}

pub fn map_conversion(conv: Conversion) -> Option<Opcode> {
    use Opcode::*;
    match conv {
        Conversion::Sext1 => Some(Sext1),
        Conversion::Sext8 => Some(Sext8),
        Conversion::Sext16 => Some(Sext16),
        Conversion::Sext32 => Some(Sext32),
        Conversion::FExt => Some(FExt),
        Conversion::FTrunc => Some(FTrunc),
        Conversion::SignedToFloat { from, to: Width::W32 } => Some(match from {
            Width::W8 => S8ToF32,
            Width::W16 => S16ToF32,
            Width::W32 => S32ToF32,
            Width::W64 => S64ToF32,
        }),
        Conversion::SignedToFloat { from, to: Width::W64 } => Some(match from {
            Width::W8 => S8ToF64,
            Width::W16 => S16ToF64,
            Width::W32 => S32ToF64,
            Width::W64 => S64ToF64,
        }),
        Conversion::UnsignedToFloat { from, to: Width::W32 } => Some(match from {
            Width::W8 => U8ToF32,
            Width::W16 => U16ToF32,
            Width::W32 => U32ToF32,
            Width::W64 => U64ToF32,
        }),
        Conversion::UnsignedToFloat { from, to: Width::W64 } => Some(match from {
            Width::W8 => U8ToF64,
            Width::W16 => U16ToF64,
            Width::W32 => U32ToF64,
            Width::W64 => U64ToF64,
        }),
        Conversion::FloatToSigned { from: Width::W32, to } => Some(match to {
            Width::W8 => F32ToS8,
            Width::W16 => F32ToS16,
            Width::W32 => F32ToS32,
            Width::W64 => F32ToS64,
        }),
        Conversion::FloatToSigned { from: Width::W64, to } => Some(match to {
            Width::W8 => F64ToS8,
            Width::W16 => F64ToS16,
            Width::W32 => F64ToS32,
            Width::W64 => F64ToS64,
        }),
        Conversion::FloatToUnsigned { from: Width::W32, to } => Some(match to {
            Width::W8 => F32ToU8,
            Width::W16 => F32ToU16,
            Width::W32 => F32ToU32,
            Width::W64 => F32ToU64,
        }),
        Conversion::FloatToUnsigned { from: Width::W64, to } => Some(match to {
            Width::W8 => F64ToU8,
            Width::W16 => F64ToU16,
            Width::W32 => F64ToU32,
            Width::W64 => F64ToU64,
        }),
        Conversion::SignedToFloat { .. }
        | Conversion::UnsignedToFloat { .. }
        | Conversion::FloatToSigned { .. }
        | Conversion::FloatToUnsigned { .. } => None,
    }
}

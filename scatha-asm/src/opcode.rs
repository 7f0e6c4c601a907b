//! Opcode table of the Scatha virtual machine.
//!
//! Every opcode is a single byte; its operands follow in a fixed layout. The
//! enum is contiguous starting at zero so the interpreter can dispatch on the
//! raw byte and [`code_size`] can be computed statically.
//!
//! ## Operand encodings
//!
//! | Operand          | Bytes |
//! |------------------|-------|
//! | Register index   | 1     |
//! | Memory address   | 4     |
//! | Immediate        | 1/2/4/8, little endian |
//! | Jump offset      | 4, signed, relative to the byte after the opcode |
//! | Call destination | 4, absolute offset into the text section |
//!
//! A memory address is the tuple `{ baseReg, offsetCountReg, offsetMultiplier,
//! innerOffset }`; an `offsetCountReg` of `0xFF` means the dynamic component
//! is absent.

use strum::{EnumCount, EnumIter, FromRepr, IntoStaticStr};

/// Instruction opcodes of the virtual machine.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumCount,
    EnumIter,
    FromRepr,
    IntoStaticStr,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Opcode {
    /// Push a new register window and jump to the 32 bit text offset.
    ///
    /// | Syntax   | `call dest32, regOffset8` |
    /// | Encoding | `0x.. dddd r`             |
    ///
    /// Stores the stack pointer, the register offset and the return address
    /// into the three registers below the new window.
    Call = 0,
    /// Indirect call through a register holding a text offset.
    ICallR,
    /// Indirect call through a memory address holding a text offset.
    ICallM,
    /// Pop the current register window and return to the stored address.
    /// Terminates execution when executed in the root frame.
    Ret,
    /// Invoke a foreign (host) function: `cfng regOffset8, index16`.
    CFng,
    /// Invoke a builtin function: `cbltn regOffset8, index16`.
    CBltn,
    /// Halt execution.
    Terminate,

    // ## Moves
    Mov64RR,
    Mov64RV,
    Mov8MR,
    Mov16MR,
    Mov32MR,
    Mov64MR,
    Mov8RM,
    Mov16RM,
    Mov32RM,
    Mov64RM,

    // ## Conditional moves
    CMovE64RR,
    CMovE64RV,
    CMovE8RM,
    CMovE16RM,
    CMovE32RM,
    CMovE64RM,
    CMovNE64RR,
    CMovNE64RV,
    CMovNE8RM,
    CMovNE16RM,
    CMovNE32RM,
    CMovNE64RM,
    CMovL64RR,
    CMovL64RV,
    CMovL8RM,
    CMovL16RM,
    CMovL32RM,
    CMovL64RM,
    CMovLE64RR,
    CMovLE64RV,
    CMovLE8RM,
    CMovLE16RM,
    CMovLE32RM,
    CMovLE64RM,
    CMovG64RR,
    CMovG64RV,
    CMovG8RM,
    CMovG16RM,
    CMovG32RM,
    CMovG64RM,
    CMovGE64RR,
    CMovGE64RV,
    CMovGE8RM,
    CMovGE16RM,
    CMovGE32RM,
    CMovGE64RM,

    /// Align the stack pointer to 8, store it into the destination register
    /// and advance it by the 16 bit immediate: `lincsp dest8, size16`.
    ///
    /// The immediate must itself be a multiple of 8.
    LIncSP,

    /// Compute a memory address into a register: `lea dest8, memAddr`.
    Lea,

    // ## Jumps. The 4 byte operand is a signed offset relative to the byte
    // after the opcode.
    Jmp,
    JE,
    JNE,
    JL,
    JLE,
    JG,
    JGE,

    // ## Comparisons. Set the compare flags from two operands.
    UCmp8RR,
    UCmp16RR,
    UCmp32RR,
    UCmp64RR,
    SCmp8RR,
    SCmp16RR,
    SCmp32RR,
    SCmp64RR,
    UCmp8RV,
    UCmp16RV,
    UCmp32RV,
    UCmp64RV,
    SCmp8RV,
    SCmp16RV,
    SCmp32RV,
    SCmp64RV,
    FCmp32RR,
    FCmp64RR,
    FCmp32RV,
    FCmp64RV,

    // ## Tests. Set the compare flags from a single register operand.
    STest8,
    STest16,
    STest32,
    STest64,
    UTest8,
    UTest16,
    UTest32,
    UTest64,

    // ## Materialize compare flags as 0/1 into a register.
    SetE,
    SetNE,
    SetL,
    SetLE,
    SetG,
    SetGE,

    // ## Unary operations, in place on one register.
    /// Logical not: `r = r == 0`.
    LNt,
    /// Bitwise not.
    BNt,
    Neg8,
    Neg16,
    Neg32,
    Neg64,

    // ## 64 bit integral arithmetic
    Add64RR,
    Add64RV,
    Add64RM,
    Sub64RR,
    Sub64RV,
    Sub64RM,
    Mul64RR,
    Mul64RV,
    Mul64RM,
    UDiv64RR,
    UDiv64RV,
    UDiv64RM,
    SDiv64RR,
    SDiv64RV,
    SDiv64RM,
    URem64RR,
    URem64RV,
    URem64RM,
    SRem64RR,
    SRem64RV,
    SRem64RM,

    // ## 32 bit integral arithmetic
    Add32RR,
    Add32RV,
    Add32RM,
    Sub32RR,
    Sub32RV,
    Sub32RM,
    Mul32RR,
    Mul32RV,
    Mul32RM,
    UDiv32RR,
    UDiv32RV,
    UDiv32RM,
    SDiv32RR,
    SDiv32RV,
    SDiv32RM,
    URem32RR,
    URem32RV,
    URem32RM,
    SRem32RR,
    SRem32RV,
    SRem32RM,

    // ## Floating point arithmetic
    FAdd64RR,
    FAdd64RV,
    FAdd64RM,
    FSub64RR,
    FSub64RV,
    FSub64RM,
    FMul64RR,
    FMul64RV,
    FMul64RM,
    FDiv64RR,
    FDiv64RV,
    FDiv64RM,
    FAdd32RR,
    FAdd32RV,
    FAdd32RM,
    FSub32RR,
    FSub32RV,
    FSub32RM,
    FMul32RR,
    FMul32RV,
    FMul32RM,
    FDiv32RR,
    FDiv32RV,
    FDiv32RM,

    // ## Shifts. The RV forms take an 8 bit immediate shift amount.
    LSL64RR,
    LSL64RV,
    LSL64RM,
    LSR64RR,
    LSR64RV,
    LSR64RM,
    LSL32RR,
    LSL32RV,
    LSL32RM,
    LSR32RR,
    LSR32RV,
    LSR32RM,
    ASL64RR,
    ASL64RV,
    ASL64RM,
    ASR64RR,
    ASR64RV,
    ASR64RM,
    ASL32RR,
    ASL32RV,
    ASL32RM,
    ASR32RR,
    ASR32RV,
    ASR32RM,

    // ## Bitwise operations
    And64RR,
    And64RV,
    And64RM,
    Or64RR,
    Or64RV,
    Or64RM,
    XOr64RR,
    XOr64RV,
    XOr64RM,
    And32RR,
    And32RV,
    And32RM,
    Or32RR,
    Or32RV,
    Or32RM,
    XOr32RR,
    XOr32RV,
    XOr32RM,

    // ## Conversions, in place on one register.
    /// Sign extend the lowest bit to 64 bit.
    Sext1,
    Sext8,
    Sext16,
    Sext32,
    /// Extend `f32` to `f64`.
    FExt,
    /// Truncate `f64` to `f32`.
    FTrunc,

    S8ToF32,
    S16ToF32,
    S32ToF32,
    S64ToF32,
    U8ToF32,
    U16ToF32,
    U32ToF32,
    U64ToF32,
    S8ToF64,
    S16ToF64,
    S32ToF64,
    S64ToF64,
    U8ToF64,
    U16ToF64,
    U32ToF64,
    U64ToF64,

    F32ToS8,
    F32ToS16,
    F32ToS32,
    F32ToS64,
    F32ToU8,
    F32ToU16,
    F32ToU32,
    F32ToU64,
    F64ToS8,
    F64ToS16,
    F64ToS32,
    F64ToS64,
    F64ToU8,
    F64ToU16,
    F64ToU32,
    F64ToU64,
}

impl Opcode {
    /// Decode an opcode from its raw byte representation.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::from_repr(byte)
    }

    /// Lowercase mnemonic of the opcode.
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// `true` for `call`, `icallr`, `icallm`, `ret` and `terminate`, which
    /// set the instruction pointer themselves.
    pub const fn is_control_transfer(self) -> bool {
        matches!(
            self,
            Opcode::Call
                | Opcode::ICallR
                | Opcode::ICallM
                | Opcode::Ret
                | Opcode::Terminate
        )
    }

    /// `true` for the conditional and unconditional jump opcodes.
    pub const fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::JE
                | Opcode::JNE
                | Opcode::JL
                | Opcode::JLE
                | Opcode::JG
                | Opcode::JGE
        )
    }
}

/// Total encoded size of an instruction in bytes, including the opcode byte.
pub const fn code_size(opcode: Opcode) -> usize {
    use Opcode::*;
    1 + match opcode {
        Call => 5,
        ICallR => 2,
        ICallM => 5,
        Ret | Terminate => 0,
        CFng | CBltn => 3,

        Mov64RR => 2,
        Mov64RV => 9,
        Mov8MR | Mov16MR | Mov32MR | Mov64MR => 5,
        Mov8RM | Mov16RM | Mov32RM | Mov64RM => 5,

        CMovE64RR | CMovNE64RR | CMovL64RR | CMovLE64RR | CMovG64RR
        | CMovGE64RR => 2,
        CMovE64RV | CMovNE64RV | CMovL64RV | CMovLE64RV | CMovG64RV
        | CMovGE64RV => 9,
        CMovE8RM | CMovE16RM | CMovE32RM | CMovE64RM | CMovNE8RM
        | CMovNE16RM | CMovNE32RM | CMovNE64RM | CMovL8RM | CMovL16RM
        | CMovL32RM | CMovL64RM | CMovLE8RM | CMovLE16RM | CMovLE32RM
        | CMovLE64RM | CMovG8RM | CMovG16RM | CMovG32RM | CMovG64RM
        | CMovGE8RM | CMovGE16RM | CMovGE32RM | CMovGE64RM => 5,

        LIncSP => 3,
        Lea => 5,

        Jmp | JE | JNE | JL | JLE | JG | JGE => 4,

        UCmp8RR | UCmp16RR | UCmp32RR | UCmp64RR | SCmp8RR | SCmp16RR
        | SCmp32RR | SCmp64RR | FCmp32RR | FCmp64RR => 2,
        UCmp8RV | SCmp8RV => 2,
        UCmp16RV | SCmp16RV => 3,
        UCmp32RV | SCmp32RV | FCmp32RV => 5,
        UCmp64RV | SCmp64RV | FCmp64RV => 9,

        STest8 | STest16 | STest32 | STest64 | UTest8 | UTest16 | UTest32
        | UTest64 => 1,

        SetE | SetNE | SetL | SetLE | SetG | SetGE => 1,

        LNt | BNt | Neg8 | Neg16 | Neg32 | Neg64 => 1,

        Add64RR | Sub64RR | Mul64RR | UDiv64RR | SDiv64RR | URem64RR
        | SRem64RR | Add32RR | Sub32RR | Mul32RR | UDiv32RR | SDiv32RR
        | URem32RR | SRem32RR | FAdd64RR | FSub64RR | FMul64RR | FDiv64RR
        | FAdd32RR | FSub32RR | FMul32RR | FDiv32RR | And64RR | Or64RR
        | XOr64RR | And32RR | Or32RR | XOr32RR | LSL64RR | LSR64RR
        | ASL64RR | ASR64RR | LSL32RR | LSR32RR | ASL32RR | ASR32RR => 2,

        Add64RV | Sub64RV | Mul64RV | UDiv64RV | SDiv64RV | URem64RV
        | SRem64RV | FAdd64RV | FSub64RV | FMul64RV | FDiv64RV | And64RV
        | Or64RV | XOr64RV => 9,
        Add32RV | Sub32RV | Mul32RV | UDiv32RV | SDiv32RV | URem32RV
        | SRem32RV | FAdd32RV | FSub32RV | FMul32RV | FDiv32RV | And32RV
        | Or32RV | XOr32RV => 5,
        // Shift immediates are 8 bit regardless of operand width.
        LSL64RV | LSR64RV | ASL64RV | ASR64RV | LSL32RV | LSR32RV
        | ASL32RV | ASR32RV => 2,

        Add64RM | Sub64RM | Mul64RM | UDiv64RM | SDiv64RM | URem64RM
        | SRem64RM | Add32RM | Sub32RM | Mul32RM | UDiv32RM | SDiv32RM
        | URem32RM | SRem32RM | FAdd64RM | FSub64RM | FMul64RM | FDiv64RM
        | FAdd32RM | FSub32RM | FMul32RM | FDiv32RM | And64RM | Or64RM
        | XOr64RM | And32RM | Or32RM | XOr32RM | LSL64RM | LSR64RM
        | ASL64RM | ASR64RM | LSL32RM | LSR32RM | ASL32RM | ASR32RM => 5,

        Sext1 | Sext8 | Sext16 | Sext32 | FExt | FTrunc => 1,

        S8ToF32 | S16ToF32 | S32ToF32 | S64ToF32 | U8ToF32 | U16ToF32
        | U32ToF32 | U64ToF32 | S8ToF64 | S16ToF64 | S32ToF64 | S64ToF64
        | U8ToF64 | U16ToF64 | U32ToF64 | U64ToF64 | F32ToS8 | F32ToS16
        | F32ToS32 | F32ToS64 | F32ToU8 | F32ToU16 | F32ToU32 | F32ToU64
        | F64ToS8 | F64ToS16 | F64ToS32 | F64ToS64 | F64ToU8 | F64ToU16
        | F64ToU32 | F64ToU64 => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::{EnumCount as _, IntoEnumIterator};

    #[test]
    fn opcodes_are_contiguous() {
        for (index, opcode) in Opcode::iter().enumerate() {
            assert_eq!(opcode as usize, index);
            assert_eq!(Opcode::from_byte(opcode as u8), Some(opcode));
        }
    }

    #[test]
    fn opcode_count_fits_a_byte() {
        assert!(Opcode::COUNT <= 256);
        assert_eq!(Opcode::from_byte(Opcode::COUNT as u8), None);
    }

    #[test]
    fn code_sizes_are_sane() {
        for opcode in Opcode::iter() {
            let size = code_size(opcode);
            assert!(size >= 1 && size <= 10, "{opcode:?} has size {size}");
        }
        assert_eq!(code_size(Opcode::Ret), 1);
        assert_eq!(code_size(Opcode::Call), 6);
        assert_eq!(code_size(Opcode::Mov64RV), 10);
        assert_eq!(code_size(Opcode::Jmp), 5);
        assert_eq!(code_size(Opcode::LSL64RV), 3);
    }

    #[test]
    fn mnemonics_are_lowercase() {
        assert_eq!(Opcode::Mov64RR.mnemonic(), "mov64rr");
        assert_eq!(Opcode::ICallR.mnemonic(), "icallr");
        assert_eq!(Opcode::S8ToF32.mnemonic(), "s8tof32");
    }
}

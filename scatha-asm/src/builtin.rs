//! Builtin function indices.
//!
//! Builtins are host functions compiled into the VM, invoked through the
//! `cbltn` instruction by table index. The enum order is the binary
//! interface and must never change between releases; the VM builds its
//! dispatch table in this order.

use strum::{EnumCount, EnumIter, IntoStaticStr};

/// Indices into the VM builtin function table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumCount,
    EnumIter,
    IntoStaticStr,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[strum(serialize_all = "snake_case")]
#[repr(u16)]
pub enum Builtin {
    AbsF64 = 0,
    ExpF64,
    Exp2F64,
    Exp10F64,
    LogF64,
    Log2F64,
    Log10F64,
    PowF64,
    SqrtF64,
    CbrtF64,
    HypotF64,
    SinF64,
    CosF64,
    TanF64,
    AsinF64,
    AcosF64,
    AtanF64,
    FractF64,
    FloorF64,
    CeilF64,

    AbsF32,
    ExpF32,
    Exp2F32,
    Exp10F32,
    LogF32,
    Log2F32,
    Log10F32,
    PowF32,
    SqrtF32,
    CbrtF32,
    HypotF32,
    SinF32,
    CosF32,
    TanF32,
    AsinF32,
    AcosF32,
    AtanF32,
    FractF32,
    FloorF32,
    CeilF32,

    Memcpy,
    Memmove,
    Memset,
    Alloc,
    Dealloc,

    Putchar,
    Puti64,
    Putf64,
    Putstr,
    Putln,
    Putptr,
    Readline,

    Strtos64,
    Strtof64,

    FstringWritestr,
    FstringWrites64,
    FstringWritef64,
    FstringTrim,

    Trap,
    RandI64,
}

impl Builtin {
    /// Index into the builtin table.
    pub const fn index(self) -> u16 {
        self as u16
    }

    /// Linker-visible name, `__builtin_` followed by the enum name.
    pub fn symbol_name(self) -> String {
        let name: &'static str = self.into();
        format!("__builtin_{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn indices_are_contiguous() {
        for (index, builtin) in Builtin::iter().enumerate() {
            assert_eq!(builtin.index() as usize, index);
        }
    }

    #[test]
    fn symbol_names() {
        assert_eq!(Builtin::AbsF64.symbol_name(), "__builtin_abs_f64");
        assert_eq!(
            Builtin::FstringWritestr.symbol_name(),
            "__builtin_fstring_writestr"
        );
        assert_eq!(Builtin::RandI64.symbol_name(), "__builtin_rand_i64");
    }
}

//! The builtin function table.
//!
//! Builtins are host functions compiled into the VM, reachable through the
//! `cbltn` instruction. The table is fixed and indexed by [`Builtin`]; the
//! enum order is the binary interface and must never change between releases.
//!
//! Argument protocol: arguments are laid out in consecutive registers
//! starting at the register the `cbltn` offset selects; return values are
//! written back to the same registers.

use std::io::{BufRead as _, Write as _};

use rand::RngCore;
use scatha_asm::{Builtin, VirtualPointer};
use strum::EnumCount;

use crate::error::{VmError, VmResult};
use crate::vm::VirtualMachine;

/// One entry of the builtin table.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub func: fn(&mut VirtualMachine, usize) -> VmResult<()>,
}

fn reg(vm: &VirtualMachine, base: usize, index: usize) -> u64 {
    vm.registers[base + index]
}

fn set_reg(vm: &mut VirtualMachine, base: usize, index: usize, value: u64) {
    vm.registers[base + index] = value;
}

fn reg_f64(vm: &VirtualMachine, base: usize, index: usize) -> f64 {
    f64::from_bits(reg(vm, base, index))
}

fn reg_f32(vm: &VirtualMachine, base: usize, index: usize) -> f32 {
    f32::from_bits(reg(vm, base, index) as u32)
}

fn reg_ptr(vm: &VirtualMachine, base: usize, index: usize) -> VirtualPointer {
    VirtualPointer::from_bits(reg(vm, base, index))
}

macro_rules! math_f64 {
    (|$a:ident| $body:expr) => {
        |vm, base| {
            let $a = reg_f64(vm, base, 0);
            set_reg(vm, base, 0, f64::to_bits($body));
            Ok(())
        }
    };
    (|$a:ident, $b:ident| $body:expr) => {
        |vm, base| {
            let $a = reg_f64(vm, base, 0);
            let $b = reg_f64(vm, base, 1);
            set_reg(vm, base, 0, f64::to_bits($body));
            Ok(())
        }
    };
}

macro_rules! math_f32 {
    (|$a:ident| $body:expr) => {
        |vm, base| {
            let $a = reg_f32(vm, base, 0);
            set_reg(vm, base, 0, f32::to_bits($body) as u64);
            Ok(())
        }
    };
    (|$a:ident, $b:ident| $body:expr) => {
        |vm, base| {
            let $a = reg_f32(vm, base, 0);
            let $b = reg_f32(vm, base, 1);
            set_reg(vm, base, 0, f32::to_bits($body) as u64);
            Ok(())
        }
    };
}

/// Build the builtin table in [`Builtin`] order.
pub fn make_builtin_table() -> Vec<BuiltinFunction> {
    use strum::IntoEnumIterator;
    let entries: &[(Builtin, fn(&mut VirtualMachine, usize) -> VmResult<()>)] = &[
        (Builtin::AbsF64, math_f64!(|a| a.abs())),
        (Builtin::ExpF64, math_f64!(|a| a.exp())),
        (Builtin::Exp2F64, math_f64!(|a| a.exp2())),
        (Builtin::Exp10F64, math_f64!(|a| 10f64.powf(a))),
        (Builtin::LogF64, math_f64!(|a| a.ln())),
        (Builtin::Log2F64, math_f64!(|a| a.log2())),
        (Builtin::Log10F64, math_f64!(|a| a.log10())),
        (Builtin::PowF64, math_f64!(|a, b| a.powf(b))),
        (Builtin::SqrtF64, math_f64!(|a| a.sqrt())),
        (Builtin::CbrtF64, math_f64!(|a| a.cbrt())),
        (Builtin::HypotF64, math_f64!(|a, b| a.hypot(b))),
        (Builtin::SinF64, math_f64!(|a| a.sin())),
        (Builtin::CosF64, math_f64!(|a| a.cos())),
        (Builtin::TanF64, math_f64!(|a| a.tan())),
        (Builtin::AsinF64, math_f64!(|a| a.asin())),
        (Builtin::AcosF64, math_f64!(|a| a.acos())),
        (Builtin::AtanF64, math_f64!(|a| a.atan())),
        (Builtin::FractF64, math_f64!(|a| a.fract().abs())),
        (Builtin::FloorF64, math_f64!(|a| a.floor())),
        (Builtin::CeilF64, math_f64!(|a| a.ceil())),

        (Builtin::AbsF32, math_f32!(|a| a.abs())),
        (Builtin::ExpF32, math_f32!(|a| a.exp())),
        (Builtin::Exp2F32, math_f32!(|a| a.exp2())),
        (Builtin::Exp10F32, math_f32!(|a| 10f32.powf(a))),
        (Builtin::LogF32, math_f32!(|a| a.ln())),
        (Builtin::Log2F32, math_f32!(|a| a.log2())),
        (Builtin::Log10F32, math_f32!(|a| a.log10())),
        (Builtin::PowF32, math_f32!(|a, b| a.powf(b))),
        (Builtin::SqrtF32, math_f32!(|a| a.sqrt())),
        (Builtin::CbrtF32, math_f32!(|a| a.cbrt())),
        (Builtin::HypotF32, math_f32!(|a, b| a.hypot(b))),
        (Builtin::SinF32, math_f32!(|a| a.sin())),
        (Builtin::CosF32, math_f32!(|a| a.cos())),
        (Builtin::TanF32, math_f32!(|a| a.tan())),
        (Builtin::AsinF32, math_f32!(|a| a.asin())),
        (Builtin::AcosF32, math_f32!(|a| a.acos())),
        (Builtin::AtanF32, math_f32!(|a| a.atan())),
        (Builtin::FractF32, math_f32!(|a| a.fract().abs())),
        (Builtin::FloorF32, math_f32!(|a| a.floor())),
        (Builtin::CeilF32, math_f32!(|a| a.ceil())),

        (Builtin::Memcpy, builtin_memcpy),
        (Builtin::Memmove, builtin_memmove),
        (Builtin::Memset, builtin_memset),
        (Builtin::Alloc, builtin_alloc),
        (Builtin::Dealloc, builtin_dealloc),

        (Builtin::Putchar, builtin_putchar),
        (Builtin::Puti64, builtin_puti64),
        (Builtin::Putf64, builtin_putf64),
        (Builtin::Putstr, builtin_putstr),
        (Builtin::Putln, builtin_putln),
        (Builtin::Putptr, builtin_putptr),
        (Builtin::Readline, builtin_readline),

        (Builtin::Strtos64, builtin_strtos64),
        (Builtin::Strtof64, builtin_strtof64),

        (Builtin::FstringWritestr, builtin_fstring_writestr),
        (Builtin::FstringWrites64, builtin_fstring_writes64),
        (Builtin::FstringWritef64, builtin_fstring_writef64),
        (Builtin::FstringTrim, builtin_fstring_trim),

        (Builtin::Trap, |_, _| Err(VmError::Trap)),
        (Builtin::RandI64, builtin_rand_i64),
    ];
    debug_assert_eq!(entries.len(), Builtin::COUNT);
    let mut table = Vec::with_capacity(Builtin::COUNT);
    for (builtin, entry) in Builtin::iter().zip(entries) {
        debug_assert_eq!(builtin, entry.0, "builtin table out of order");
        table.push(BuiltinFunction { name: entry.0.into(), func: entry.1 });
    }
    table
}

fn builtin_memcpy(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let dest = reg_ptr(vm, base, 0);
    let size = reg(vm, base, 1) as usize;
    let source = reg_ptr(vm, base, 2);
    let bytes = vm.memory.dereference(source, size)?.to_vec();
    vm.memory.write(dest, &bytes)
}

fn builtin_memmove(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    // Slots never alias, so a copy through a scratch buffer is always a
    // correct move.
    builtin_memcpy(vm, base)
}

fn builtin_memset(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let dest = reg_ptr(vm, base, 0);
    let size = reg(vm, base, 1) as usize;
    let value = reg(vm, base, 2) as u8;
    vm.memory.dereference_mut(dest, size)?.fill(value);
    Ok(())
}

fn builtin_alloc(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let size = reg(vm, base, 0);
    let align = reg(vm, base, 1);
    let addr = vm.memory.allocate(size, align);
    set_reg(vm, base, 0, addr.to_bits());
    set_reg(vm, base, 1, size);
    Ok(())
}

fn builtin_dealloc(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let addr = reg_ptr(vm, base, 0);
    let size = reg(vm, base, 1);
    let align = reg(vm, base, 2);
    vm.memory.deallocate(addr, size, align)
}

fn builtin_putchar(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let value = reg(vm, base, 0) as u8;
    let _ = vm.stdout.write_all(&[value]);
    Ok(())
}

fn builtin_puti64(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let value = reg(vm, base, 0) as i64;
    let _ = write!(vm.stdout, "{value}");
    Ok(())
}

fn builtin_putf64(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let value = reg_f64(vm, base, 0);
    let _ = write!(vm.stdout, "{value}");
    Ok(())
}

fn builtin_putstr(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let data = reg_ptr(vm, base, 0);
    let size = reg(vm, base, 1) as usize;
    let bytes = vm.memory.dereference(data, size)?.to_vec();
    let _ = vm.stdout.write_all(&bytes);
    Ok(())
}

fn builtin_putln(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    builtin_putstr(vm, base)?;
    let _ = vm.stdout.write_all(b"\n");
    Ok(())
}

fn builtin_putptr(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let value = reg(vm, base, 0);
    let _ = write!(vm.stdout, "{value:#x}");
    Ok(())
}

fn builtin_readline(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let mut line = String::new();
    let _ = vm.stdin.read_line(&mut line);
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    let buffer = vm.memory.allocate(line.len() as u64, 8);
    vm.memory.write(buffer, line.as_bytes())?;
    set_reg(vm, base, 0, buffer.to_bits());
    set_reg(vm, base, 1, line.len() as u64);
    Ok(())
}

fn builtin_strtos64(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let dest = reg_ptr(vm, base, 0);
    let data = reg_ptr(vm, base, 1);
    let size = reg(vm, base, 2) as usize;
    let radix = reg(vm, base, 3) as u32;
    let bytes = vm.memory.dereference(data, size)?;
    let parsed = std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| i64::from_str_radix(text.trim(), radix.clamp(2, 36)).ok());
    match parsed {
        Some(value) => {
            vm.memory.write(dest, &value.to_le_bytes())?;
            set_reg(vm, base, 0, 1);
        }
        None => set_reg(vm, base, 0, 0),
    }
    Ok(())
}

fn builtin_strtof64(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let dest = reg_ptr(vm, base, 0);
    let data = reg_ptr(vm, base, 1);
    let size = reg(vm, base, 2) as usize;
    let bytes = vm.memory.dereference(data, size)?;
    let parsed = std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.trim().parse::<f64>().ok());
    match parsed {
        Some(value) => {
            vm.memory.write(dest, &value.to_le_bytes())?;
            set_reg(vm, base, 0, 1);
        }
        None => set_reg(vm, base, 0, 0),
    }
    Ok(())
}

/// Formatted-string write protocol: registers hold `buffer, size, offsetPtr`
/// followed by the argument. Returns the (possibly reallocated) buffer and
/// size in the first two registers.
fn fstring_write(
    vm: &mut VirtualMachine,
    base: usize,
    arg: &[u8],
) -> VmResult<()> {
    let mut buffer = reg_ptr(vm, base, 0);
    let mut size = reg(vm, base, 1);
    let offset_ptr = reg_ptr(vm, base, 2);
    let offset =
        u64::from_le_bytes(vm.memory.read::<8>(offset_ptr)?);
    if offset + arg.len() as u64 > size {
        let new_size = (size * 2).max(offset + arg.len() as u64);
        let new_buffer = vm.memory.allocate(new_size, 1);
        let prefix = vm.memory.dereference(buffer, offset as usize)?.to_vec();
        vm.memory.write(new_buffer, &prefix)?;
        buffer = new_buffer;
        size = new_size;
    }
    vm.memory.write(buffer.wrapping_offset(offset as i64), arg)?;
    let new_offset = offset + arg.len() as u64;
    vm.memory.write(offset_ptr, &new_offset.to_le_bytes())?;
    set_reg(vm, base, 0, buffer.to_bits());
    set_reg(vm, base, 1, size);
    Ok(())
}

fn builtin_fstring_writestr(
    vm: &mut VirtualMachine,
    base: usize,
) -> VmResult<()> {
    let arg_data = reg_ptr(vm, base, 3);
    let arg_size = reg(vm, base, 4) as usize;
    let arg = vm.memory.dereference(arg_data, arg_size)?.to_vec();
    fstring_write(vm, base, &arg)
}

fn builtin_fstring_writes64(
    vm: &mut VirtualMachine,
    base: usize,
) -> VmResult<()> {
    let arg = reg(vm, base, 3) as i64;
    fstring_write(vm, base, arg.to_string().as_bytes())
}

fn builtin_fstring_writef64(
    vm: &mut VirtualMachine,
    base: usize,
) -> VmResult<()> {
    let arg = reg_f64(vm, base, 3);
    fstring_write(vm, base, arg.to_string().as_bytes())
}

fn builtin_fstring_trim(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let buffer = reg_ptr(vm, base, 0);
    let size = reg(vm, base, 1);
    let offset = reg(vm, base, 2);
    if size < offset {
        return Err(VmError::Arithmetic);
    }
    if size > offset {
        let trimmed = vm.memory.allocate(offset, 1);
        let prefix = vm.memory.dereference(buffer, offset as usize)?.to_vec();
        vm.memory.write(trimmed, &prefix)?;
        set_reg(vm, base, 0, trimmed.to_bits());
    }
    set_reg(vm, base, 1, offset);
    Ok(())
}

fn builtin_rand_i64(vm: &mut VirtualMachine, base: usize) -> VmResult<()> {
    let value = vm.rng.next_u64();
    set_reg(vm, base, 0, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn table_is_complete_and_ordered() {
        let table = make_builtin_table();
        assert_eq!(table.len(), Builtin::COUNT);
        for (builtin, entry) in Builtin::iter().zip(&table) {
            let name: &'static str = builtin.into();
            assert_eq!(entry.name, name);
        }
    }

}

//! Register assignment.
//!
//! The register window model makes allocation simple: every SSA register
//! receives its own physical index, parameters first. Windows hold 2^16
//! cells, but the instruction encoding addresses registers with one byte,
//! so functions needing more than the encodable range are rejected.

use crate::mir::{MirFunction, MirInst, Operand, PhysReg, Reg};
use crate::LowerError;

/// Registers reserved above the frame for call metadata and staging.
const ENCODABLE_REGS: u32 = 240;

pub(crate) fn assign_registers(
    function: &mut MirFunction,
) -> Result<(), LowerError> {
    if function.ssa_regs > ENCODABLE_REGS {
        return Err(LowerError::RegisterOverflow {
            function: function.name.clone(),
            registers: function.ssa_regs,
        });
    }
    function.phys_regs = function.ssa_regs as u16;
    for block in &mut function.blocks {
        for inst in &mut block.insts {
            for_each_reg(inst, &mut |reg| {
                if let Reg::Ssa(ssa) = reg {
                    *reg = Reg::Phys(PhysReg(ssa.0 as u16));
                }
            });
        }
    }
    Ok(())
}

fn for_each_operand(
    inst: &mut MirInst,
    f: &mut impl FnMut(&mut Operand),
) {
    match inst {
        MirInst::Mov { dest, src, .. }
        | MirInst::CMov { dest, src, .. }
        | MirInst::Arith { dest, src, .. } => {
            f(dest);
            f(src);
        }
        MirInst::Lea { dest, .. }
        | MirInst::LIncSp { dest, .. }
        | MirInst::Set { dest, .. } => f(dest),
        MirInst::Compare { lhs, rhs, .. } => {
            f(lhs);
            f(rhs);
        }
        MirInst::Test { operand, .. }
        | MirInst::Unary { operand, .. }
        | MirInst::Convert { operand, .. } => f(operand),
        MirInst::Call { args, dest, .. }
        | MirInst::CallExt { args, dest, .. } => {
            for arg in args {
                f(arg);
            }
            if let Some(dest) = dest {
                f(dest);
            }
        }
        MirInst::Return { value } => {
            if let Some(value) = value {
                f(value);
            }
        }
        MirInst::Jump { .. } | MirInst::Terminate => {}
    }
}

fn for_each_reg(inst: &mut MirInst, f: &mut impl FnMut(&mut Reg)) {
    for_each_operand(inst, &mut |operand| match operand {
        Operand::Reg(reg) => f(reg),
        Operand::Mem(addr) => {
            f(&mut addr.base);
            if let Some(index) = &mut addr.index {
                f(index);
            }
        }
        _ => {}
    });
    // Address operands outside the generic operand walk.
    match inst {
        MirInst::Lea { addr, .. } => {
            f(&mut addr.base);
            if let Some(index) = &mut addr.index {
                f(index);
            }
        }
        MirInst::Call { callee: crate::mir::MirCallee::Register(reg), .. } => {
            f(reg)
        }
        _ => {}
    }
}

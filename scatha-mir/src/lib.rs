//! Machine IR, instruction selection and assembly emission.
//!
//! The lowering pipeline runs per function: build a selection DAG per
//! basic block, schedule it in reverse topological order, select MIR
//! instructions over SSA registers, destroy phis into predecessor copies,
//! assign physical registers and finally emit the assembly element stream
//! through the opcode map tables.

#![warn(missing_debug_implementations)]

mod asmgen;
mod dag;
mod isel;
mod mir;
mod regalloc;

use thiserror::Error;

pub use mir::{
    MirAddr, MirBlock, MirBlockId, MirCallee, MirFunction, MirInst,
    MirModule, Operand, PhysReg, Reg, SsaReg,
};

use scatha_asm::AssemblyStream;
use scatha_ir::{Context, Module};

/// Failures of the MIR lowering pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LowerError {
    #[error(
        "function {function} needs {registers} registers, more than the \
         encoding supports"
    )]
    RegisterOverflow { function: String, registers: u32 },
}

/// Lower an IR module to MIR.
pub fn lower_to_mir(
    ctx: &Context,
    module: &Module,
) -> Result<MirModule, LowerError> {
    let mut mir = MirModule::default();
    for func in module.function_refs() {
        let function = module.function(func);
        let mut lowered = isel::FnSelector::run(ctx, module, function)?;
        regalloc::assign_registers(&mut lowered)?;
        tracing::debug!(
            function = %lowered.name,
            registers = lowered.phys_regs,
            "selected"
        );
        mir.functions.push(lowered);
    }
    Ok(mir)
}

/// Lower an IR module all the way to an assembly stream.
pub fn lower_module(
    ctx: &Context,
    module: &Module,
) -> Result<AssemblyStream, LowerError> {
    let mir = lower_to_mir(ctx, module)?;
    asmgen::emit_module(ctx, module, &mir)
}

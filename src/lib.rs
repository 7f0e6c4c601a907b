//! Scatha compiler middle/back end and bytecode runtime.
//!
//! The crate ties the layers together: semantic analysis decorates the
//! tree, the IR generator lowers it to SSA, the optimizer runs the chosen
//! pipeline, instruction selection produces the assembly element stream and
//! the assembler emits the final program image for the [`scatha_vm`]
//! interpreter.

#![warn(missing_debug_implementations)]

use thiserror::Error;

pub use scatha_asm as asm;
pub use scatha_ast as ast;
pub use scatha_ir as ir;
pub use scatha_irgen as irgen;
pub use scatha_mir as mir;
pub use scatha_opt as opt;
pub use scatha_sema as sema;
pub use scatha_vm as vm;

use scatha_ast::{Ast, NodeId};
use scatha_sema::{Issue, IssueHandler, SymbolTable};

/// How hard the optimizer works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    /// Straight lowering, no passes.
    None,
    /// The canonical pipeline.
    #[default]
    Default,
    /// The full pipeline including loop transformations.
    Full,
}

/// A fully compiled program.
#[derive(Debug)]
pub struct CompiledProgram {
    /// The serialized program image, ready for
    /// [`scatha_vm::VirtualMachine::load_binary`].
    pub bytes: Vec<u8>,
    /// Warnings produced during analysis.
    pub issues: Vec<Issue>,
}

/// Compilation failures.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("semantic analysis reported {} issue(s)", .0.len())]
    Semantic(Vec<Issue>),
    #[error(transparent)]
    Lower(#[from] scatha_mir::LowerError),
    #[error(transparent)]
    Assemble(#[from] scatha_asm::AssemblerError),
}

/// Compile a translation unit down to a program image.
pub fn compile(
    ast: &mut Ast,
    root: NodeId,
    level: OptLevel,
) -> Result<CompiledProgram, CompileError> {
    let mut sym = SymbolTable::new();
    let mut issues = IssueHandler::new();
    let analysis = scatha_sema::analyze(ast, root, &mut sym, &mut issues);
    if issues.has_errors() {
        return Err(CompileError::Semantic(issues.issues().to_vec()));
    }
    let mut ctx = scatha_ir::Context::new();
    let mut module =
        scatha_irgen::generate(ast, root, &sym, &analysis, &mut ctx);
    match level {
        OptLevel::None => {}
        OptLevel::Default => {
            scatha_opt::optimize(&mut ctx, &mut module);
        }
        OptLevel::Full => {
            scatha_opt::optimize_full(&mut ctx, &mut module);
        }
    }
    debug_assert!(scatha_ir::verify_module(&module).is_ok());
    let stream = scatha_mir::lower_module(&ctx, &module)?;
    let program = scatha_asm::assemble(&stream)?;
    tracing::debug!(
        text_bytes = program.text_size,
        binary_bytes = program.binary.len(),
        "compiled"
    );
    Ok(CompiledProgram {
        bytes: program.to_bytes(),
        issues: issues.issues().to_vec(),
    })
}

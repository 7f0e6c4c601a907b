//! Typed SSA intermediate representation of the Scatha compiler: value
//! graph with intrusive use lists, control flow graph mutators, dominance
//! and loop analyses and the SCC call graph.

#![warn(missing_debug_implementations)]

mod builder;
mod callgraph;
mod clone;
mod context;
mod dominance;
mod function;
mod loops;
mod module;
mod printer;
mod types;
mod value;
mod verify;

pub use builder::Builder;
pub use callgraph::{Modification, RecomputeResult, SccCallGraph, SccId};
pub use clone::{clone_region, copy_body_for_inline, CloneMap};
pub use context::Context;
pub use dominance::DomInfo;
pub use function::{BlockData, Function, Parameter};
pub use loops::{Loop, LoopId, LoopNestingForest};
pub use module::{ConstantData, ForeignFunctionDecl, Global, Module};
pub use printer::{print_function, print_module, print_type};
pub use types::{Layout, TypeData, TypeId};
pub use value::{
    ArithmeticOp, BlockId, CompareMode, CompareOp, ConstDataRef,
    ConversionOp, FuncRef, GlobalRef, Inst, InstId, InstKind, UnaryOp, Value,
};
pub use verify::{verify_function, verify_module, VerifyError};

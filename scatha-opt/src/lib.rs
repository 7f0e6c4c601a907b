//! Optimization passes over the Scatha IR and the registry that drivers use
//! to compose them by name.

#![warn(missing_debug_implementations)]

mod constfold;
mod dce;
mod gvn;
mod inline_callsite;
mod inliner;
mod looprotate;
mod loopunroll;
mod mem2reg;
mod registry;
mod simplifycfg;

pub use constfold::constfold;
pub use dce::dce;
pub use gvn::gvn;
pub use inline_callsite::inline_callsite;
pub use inliner::inline;
pub use looprotate::looprotate;
pub use loopunroll::loopunroll;
pub use mem2reg::mem2reg;
pub use registry::{
    Flag, FunctionPassFn, ModulePassFn, Pass, PassArgs, PassCategory,
    PassKind, PassRegistry, UnknownPass,
};
pub use simplifycfg::simplifycfg;

use scatha_ir::{Context, Module};

/// Register every built-in pass.
pub fn register_builtin_passes(registry: &mut PassRegistry) {
    use PassCategory::*;
    let passes = [
        Pass {
            name: "simplifycfg",
            category: Canonicalization,
            flags: vec![],
            kind: PassKind::Function(simplifycfg),
        },
        Pass {
            name: "mem2reg",
            category: Canonicalization,
            flags: vec![],
            kind: PassKind::Function(mem2reg),
        },
        Pass {
            name: "looprotate",
            category: Canonicalization,
            flags: vec![],
            kind: PassKind::Function(looprotate),
        },
        Pass {
            name: "constfold",
            category: Simplification,
            flags: vec![],
            kind: PassKind::Function(constfold),
        },
        Pass {
            name: "dce",
            category: Simplification,
            flags: vec![],
            kind: PassKind::Function(dce),
        },
        Pass {
            name: "gvn",
            category: Simplification,
            flags: vec![],
            kind: PassKind::Function(gvn),
        },
        Pass {
            name: "inline",
            category: Simplification,
            flags: vec![],
            kind: PassKind::Module(inline),
        },
        Pass {
            name: "loopunroll",
            category: Experimental,
            flags: vec![],
            kind: PassKind::Function(loopunroll),
        },
    ];
    for pass in passes {
        registry.register(pass);
    }
}

/// The default optimization pipeline.
pub const DEFAULT_PIPELINE: &str =
    "simplifycfg, mem2reg, constfold, simplifycfg, dce, gvn, dce, inline, \
     simplifycfg, constfold, dce";

/// The full pipeline including the loop passes.
pub const FULL_PIPELINE: &str =
    "simplifycfg, mem2reg, constfold, simplifycfg, dce, gvn, dce, inline, \
     looprotate, simplifycfg, loopunroll, simplifycfg, constfold, dce, gvn, \
     dce";

/// Run the default pipeline over a module.
pub fn optimize(ctx: &mut Context, module: &mut Module) -> bool {
    let registry = PassRegistry::with_builtin_passes();
    registry
        .run_pipeline(DEFAULT_PIPELINE, ctx, module)
        .expect("builtin pipeline names only builtin passes")
}

/// Run the full pipeline, loop transformations included.
pub fn optimize_full(ctx: &mut Context, module: &mut Module) -> bool {
    let registry = PassRegistry::with_builtin_passes();
    registry
        .run_pipeline(FULL_PIPELINE, ctx, module)
        .expect("builtin pipeline names only builtin passes")
}

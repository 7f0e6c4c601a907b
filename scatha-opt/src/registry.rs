//! The pass registry.
//!
//! Passes register under a unique name with a category, a set of boolean
//! flag arguments with defaults, and either a module- or a function-level
//! entry point. Drivers look passes up by name and compose pipelines. The
//! registry is built explicitly at startup; during compilation it is
//! read-only.

use std::collections::HashMap;

use scatha_ir::{Context, Function, Module};

/// Pass categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassCategory {
    Canonicalization,
    Simplification,
    Experimental,
}

/// A declared boolean pass argument with its default.
#[derive(Debug, Clone)]
pub struct Flag {
    pub name: &'static str,
    pub default: bool,
}

/// Arguments passed to a pass invocation.
#[derive(Debug, Clone, Default)]
pub struct PassArgs {
    values: HashMap<String, bool>,
}

impl PassArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: bool) {
        self.values.insert(name.to_owned(), value);
    }

    /// Value of a flag, falling back to its declared default.
    pub fn get(&self, flags: &[Flag], name: &str) -> bool {
        if let Some(value) = self.values.get(name) {
            return *value;
        }
        flags
            .iter()
            .find(|flag| flag.name == name)
            .map(|flag| flag.default)
            .unwrap_or(false)
    }
}

pub type ModulePassFn =
    fn(&mut Context, &mut Module, &PassArgs) -> bool;
pub type FunctionPassFn =
    fn(&mut Context, &mut Function, &PassArgs) -> bool;

/// Entry point of a registered pass.
#[derive(Debug, Clone, Copy)]
pub enum PassKind {
    Module(ModulePassFn),
    Function(FunctionPassFn),
}

/// One registered pass.
#[derive(Debug, Clone)]
pub struct Pass {
    pub name: &'static str,
    pub category: PassCategory,
    pub flags: Vec<Flag>,
    pub kind: PassKind,
}

impl Pass {
    /// Run the pass over a whole module. Function passes are lifted over
    /// every function. Returns `true` if any IR was modified.
    pub fn run(
        &self,
        ctx: &mut Context,
        module: &mut Module,
        args: &PassArgs,
    ) -> bool {
        let modified = match self.kind {
            PassKind::Module(f) => f(ctx, module, args),
            PassKind::Function(f) => {
                let mut modified = false;
                for func in module.function_refs().collect::<Vec<_>>() {
                    modified |= f(ctx, module.function_mut(func), args);
                }
                modified
            }
        };
        tracing::debug!(pass = self.name, modified, "pass executed");
        modified
    }
}

/// Name-keyed pass registry.
#[derive(Debug, Default)]
pub struct PassRegistry {
    passes: HashMap<&'static str, Pass>,
}

impl PassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in pass registered.
    pub fn with_builtin_passes() -> Self {
        let mut registry = Self::new();
        crate::register_builtin_passes(&mut registry);
        registry
    }

    pub fn register(&mut self, pass: Pass) {
        let previous = self.passes.insert(pass.name, pass);
        debug_assert!(previous.is_none(), "pass registered twice");
    }

    pub fn get(&self, name: &str) -> Option<&Pass> {
        self.passes.get(name)
    }

    pub fn passes(&self) -> impl Iterator<Item = &Pass> {
        self.passes.values()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.passes.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run a comma/space separated pipeline of pass names.
    pub fn run_pipeline(
        &self,
        pipeline: &str,
        ctx: &mut Context,
        module: &mut Module,
    ) -> Result<bool, UnknownPass> {
        let mut modified = false;
        for name in pipeline
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|name| !name.is_empty())
        {
            let pass = self
                .get(name)
                .ok_or_else(|| UnknownPass(name.to_owned()))?;
            modified |= pass.run(ctx, module, &PassArgs::new());
        }
        Ok(modified)
    }
}

/// A pipeline named a pass that is not registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPass(pub String);

impl std::fmt::Display for UnknownPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown pass {:?}", self.0)
    }
}

impl std::error::Error for UnknownPass {}

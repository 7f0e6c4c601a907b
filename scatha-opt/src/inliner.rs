//! The inliner.
//!
//! Walks the SCC quotient of the call graph in reverse topological order
//! (sinks first). Every component is locally optimized before its callers
//! are considered; call sites are inlined bottom-up. Removing a call edge
//! can split a component, in which case both new components are re-enqueued
//! and the walk restarts from them.

use std::collections::{HashMap, HashSet};

use scatha_ir::{
    FuncRef, InstId, InstKind, Modification, Module, RecomputeResult,
    SccCallGraph, SccId, Value,
};

use crate::inline_callsite::inline_callsite;
use crate::registry::PassArgs;

/// Hard bound on revisits of one function after SCC splits.
const MAX_VISITS: i32 = 4;

pub fn inline(
    ctx: &mut scatha_ir::Context,
    module: &mut Module,
    _args: &PassArgs,
) -> bool {
    Inliner {
        ctx,
        call_graph: SccCallGraph::compute(module),
        worklist: HashSet::new(),
        analyzed: HashSet::new(),
        visit_count: HashMap::new(),
        self_recursive: HashSet::new(),
        incorporated: HashMap::new(),
    }
    .run(module)
}

struct Inliner<'c> {
    ctx: &'c mut scatha_ir::Context,
    call_graph: SccCallGraph,
    worklist: HashSet<SccId>,
    analyzed: HashSet<SccId>,
    visit_count: HashMap<FuncRef, i32>,
    self_recursive: HashSet<FuncRef>,
    incorporated: HashMap<FuncRef, HashSet<FuncRef>>,
}

impl Inliner<'_> {
    fn run(mut self, module: &mut Module) -> bool {
        let mut modified = false;
        self.worklist = self.call_graph.sinks().into_iter().collect();
        while let Some(&scc) = self
            .worklist
            .iter()
            .find(|scc| self.all_successors_analyzed(**scc))
        {
            match self.visit_scc(module, scc) {
                Some(changed) => {
                    modified |= changed;
                    self.worklist.remove(&scc);
                    self.analyzed.insert(scc);
                    for pred in self.call_graph.scc_predecessors(scc) {
                        self.worklist.insert(pred);
                    }
                }
                // Structural change; the worklist already holds the pieces.
                None => modified = true,
            }
        }
        modified
    }

    fn all_successors_analyzed(&self, scc: SccId) -> bool {
        self.call_graph
            .scc_successors(scc)
            .iter()
            .all(|succ| self.analyzed.contains(succ))
    }

    /// Returns `None` if the component was split and must be revisited.
    fn visit_scc(&mut self, module: &mut Module, scc: SccId) -> Option<bool> {
        let mut modified = false;
        let functions: Vec<FuncRef> =
            self.call_graph.functions_of(scc).to_vec();
        // Canonicalize and locally optimize every member first.
        for func in &functions {
            modified |= self.optimize(module, *func);
            if self.call_graph.recompute_callees(module, *func)
                == RecomputeResult::NewCallees
            {
                // Newly discovered callees reshape the graph; revisit.
                self.worklist.insert(self.call_graph.scc_of(*func));
                return None;
            }
        }
        for func in &functions {
            match self.visit_function(module, scc, *func) {
                Some(changed) => modified |= changed,
                None => return None,
            }
        }
        for func in &functions {
            self.analyze_self_recursion(module, *func);
        }
        Some(modified)
    }

    fn visit_function(
        &mut self,
        module: &mut Module,
        scc: SccId,
        func: FuncRef,
    ) -> Option<bool> {
        let visits = {
            let count = self.visit_count.entry(func).or_insert(0);
            *count += 1;
            *count - 1
        };
        if visits >= MAX_VISITS {
            return Some(false);
        }
        let mut modified = false;
        let mut inlined: Vec<FuncRef> = Vec::new();
        for callee in self.call_graph.callees(func) {
            // Only callees in already analyzed components are candidates.
            if self.call_graph.scc_of(callee) == scc {
                continue;
            }
            for site in self.call_graph.call_sites_of(func, callee).to_vec() {
                if !self.should_inline(module, func, site, visits) {
                    continue;
                }
                if !inline_callsite(module, func, site) {
                    continue;
                }
                inlined.push(callee);
                modified = true;
                match self.call_graph.remove_call(func, callee, site) {
                    Modification::SplitScc(new) => {
                        // Both pieces land on the worklist; no inlining
                        // opportunity is lost by leaving now.
                        self.worklist.extend(new);
                        self.incorporated
                            .entry(func)
                            .or_default()
                            .extend(inlined);
                        return None;
                    }
                    _ => {}
                }
            }
        }
        self.incorporated.entry(func).or_default().extend(inlined);
        if modified {
            // Optimize again to catch opportunities emerged from inlining.
            self.optimize(module, func);
            if self.call_graph.recompute_callees(module, func)
                == RecomputeResult::NewCallees
            {
                self.worklist.insert(self.call_graph.scc_of(func));
                return None;
            }
        }
        Some(modified)
    }

    fn should_inline(
        &self,
        module: &Module,
        caller: FuncRef,
        site: InstId,
        visits: i32,
    ) -> bool {
        let caller_fn = module.function(caller);
        let callee = match caller_fn.inst(site).operands.first() {
            Some(Value::Function(callee)) => *callee,
            _ => return false,
        };
        // Direct recursion and self recursive callees are never inlined.
        if caller == callee || self.self_recursive.contains(&callee) {
            return false;
        }
        // On a revisit, a callee inlined before is only inlined again if it
        // is a leaf.
        if visits > 0
            && self
                .incorporated
                .get(&caller)
                .is_some_and(|set| set.contains(&callee))
            && !self.call_graph.is_leaf(callee)
        {
            return false;
        }
        let callee_size = module.function(callee).num_insts();
        if callee_size < 40 {
            return true;
        }
        // Constant arguments open up more optimization opportunities, so
        // inline more aggressively.
        let has_constant_arg = caller_fn.inst(site).operands[1..]
            .iter()
            .any(|operand| operand.is_constant());
        if has_constant_arg && callee_size < 21 {
            return true;
        }
        // Always inline the only user of a function.
        let users: usize = self
            .call_graph
            .callers(callee)
            .iter()
            .map(|caller| {
                self.call_graph.call_sites_of(*caller, callee).len()
            })
            .sum();
        users <= 1
    }

    fn analyze_self_recursion(&mut self, module: &Module, func: FuncRef) {
        let function = module.function(func);
        let recursive = function.inst_ids().any(|inst| {
            matches!(function.inst(inst).kind, InstKind::Call)
                && function.inst(inst).operands.first()
                    == Some(&Value::Function(func))
        });
        if recursive {
            self.self_recursive.insert(func);
        }
    }

    /// The local canonicalization bundle run before and after inlining.
    fn optimize(&mut self, module: &mut Module, func: FuncRef) -> bool {
        let args = PassArgs::new();
        let function = module.function_mut(func);
        let mut modified = false;
        modified |= crate::simplifycfg::simplifycfg(self.ctx, function, &args);
        modified |= crate::mem2reg::mem2reg(self.ctx, function, &args);
        modified |= crate::constfold::constfold(self.ctx, function, &args);
        modified |= crate::simplifycfg::simplifycfg(self.ctx, function, &args);
        modified |= crate::dce::dce(self.ctx, function, &args);
        modified
    }
}

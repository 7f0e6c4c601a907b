//! Per-block selection DAG.
//!
//! One node per IR instruction of the block. Data dependency edges connect
//! operands defined in the same block, memory ordering edges serialize
//! loads, stores and calls, and terminators are chained behind every
//! side-effecting node so the reverse topological traversal yields a valid
//! schedule.

use std::collections::{HashMap, HashSet};

use scatha_ir::{BlockId, Function, InstId, InstKind, Value};

/// Dependency graph of one basic block.
#[derive(Debug)]
pub struct SelectionDag {
    nodes: Vec<InstId>,
    /// `deps[n]` must be scheduled before `n`.
    deps: HashMap<InstId, Vec<InstId>>,
}

fn reads_memory(kind: &InstKind) -> bool {
    matches!(kind, InstKind::Load | InstKind::Call)
}

fn writes_memory(kind: &InstKind) -> bool {
    matches!(kind, InstKind::Store | InstKind::Call)
}

impl SelectionDag {
    pub fn build(function: &Function, block: BlockId) -> Self {
        let nodes: Vec<InstId> = function.block_insts(block).to_vec();
        let in_block: HashSet<InstId> = nodes.iter().copied().collect();
        let mut deps: HashMap<InstId, Vec<InstId>> = HashMap::new();
        let mut last_write: Option<InstId> = None;
        let mut reads_since_write: Vec<InstId> = Vec::new();
        let mut side_effects: Vec<InstId> = Vec::new();
        for inst in &nodes {
            let entry = deps.entry(*inst).or_default();
            // Data edges on operands defined in this block. Phi operands
            // are read at the incoming edge, not here, so phis have no
            // dependencies and stay at the block head.
            if !function.inst(*inst).kind.is_phi() {
                for operand in &function.inst(*inst).operands {
                    if let Value::Inst(def) = operand {
                        if in_block.contains(def) {
                            entry.push(*def);
                        }
                    }
                }
            }
            let kind = &function.inst(*inst).kind;
            // Memory ordering: writes serialize behind earlier accesses,
            // reads behind the last write.
            if writes_memory(kind) {
                if let Some(write) = last_write {
                    entry.push(write);
                }
                entry.extend(reads_since_write.drain(..));
                last_write = Some(*inst);
            } else if reads_memory(kind) {
                if let Some(write) = last_write {
                    entry.push(write);
                }
                reads_since_write.push(*inst);
            }
            // The terminator chains behind every side effect.
            if kind.is_terminator() {
                entry.extend(side_effects.iter().copied());
            }
            if kind.has_side_effects() {
                side_effects.push(*inst);
            }
        }
        for entry in deps.values_mut() {
            entry.sort();
            entry.dedup();
        }
        Self { nodes, deps }
    }

    /// Emission order: reverse topological traversal starting from the
    /// roots (the terminator last), producing a valid schedule that keeps
    /// phis first.
    pub fn schedule(&self) -> Vec<InstId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited: HashSet<InstId> = HashSet::new();
        // Visiting the nodes in layout order and walking dependencies
        // depth-first yields each node after its dependencies.
        for node in &self.nodes {
            self.visit(*node, &mut visited, &mut order);
        }
        order
    }

    fn visit(
        &self,
        node: InstId,
        visited: &mut HashSet<InstId>,
        order: &mut Vec<InstId>,
    ) {
        if !visited.insert(node) {
            return;
        }
        if let Some(deps) = self.deps.get(&node) {
            for dep in deps {
                self.visit(*dep, visited, order);
            }
        }
        order.push(node);
    }
}

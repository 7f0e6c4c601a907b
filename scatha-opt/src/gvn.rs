//! Global value numbering.
//!
//! Works in ranks over the dominator tree. Critical edges are split first;
//! inserted blocks that stay empty are removed again at the end. Two
//! computations are equal when node kind, payload (opcode, member indices)
//! and operand identity all match. The pass performs dominance-based
//! redundancy elimination and hoists computations that every successor of a
//! block performs into the block itself.

use std::collections::HashMap;

use scatha_ir::{
    BlockId, Context, Function, InstId, InstKind, Value,
};

use crate::registry::PassArgs;

/// Structural key of a pure computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Computation {
    kind: InstKind,
    operands: Vec<Value>,
}

fn computation_of(function: &Function, inst: InstId) -> Option<Computation> {
    let data = function.inst(inst);
    let pure = matches!(
        data.kind,
        InstKind::Arithmetic(_)
            | InstKind::UnaryArithmetic(_)
            | InstKind::Compare { .. }
            | InstKind::Conversion(_)
            | InstKind::GetElementPtr { .. }
            | InstKind::ExtractValue { .. }
            | InstKind::InsertValue { .. }
            | InstKind::Select
    );
    pure.then(|| Computation {
        kind: data.kind.clone(),
        operands: data.operands.clone(),
    })
}

/// Rank of an instruction: phis take the maximum operand rank, everything
/// else adds one. Non-instruction values rank zero.
fn compute_ranks(function: &Function) -> HashMap<InstId, usize> {
    let mut ranks: HashMap<InstId, usize> = HashMap::new();
    // Ranks grow along the instruction order, so one forward sweep plus a
    // few fixups for phi back edges suffices.
    for _ in 0..2 {
        for inst in function.inst_ids().collect::<Vec<_>>() {
            let data = function.inst(inst);
            let operand_rank = data
                .operands
                .iter()
                .filter_map(|operand| match operand {
                    Value::Inst(id) => Some(ranks.get(id).copied().unwrap_or(0)),
                    _ => Some(0),
                })
                .max()
                .unwrap_or(0);
            let rank = if data.kind.is_phi() {
                operand_rank
            } else {
                operand_rank + 1
            };
            ranks.insert(inst, rank);
        }
    }
    ranks
}

pub fn gvn(
    _ctx: &mut Context,
    function: &mut Function,
    _args: &PassArgs,
) -> bool {
    let mut modified = false;
    let inserted = split_critical_edges(function);
    modified |= !inserted.is_empty();
    modified |= eliminate_dominated_redundancies(function);
    modified |= hoist_common_successors(function);
    // Inserted split blocks into which nothing was moved are removed again.
    for block in inserted {
        if function.block_insts(block).len() == 1 {
            let preds = function.preds(block).to_vec();
            if preds.len() != 1 {
                continue;
            }
            let succs = function.successors(block);
            if succs.len() != 1 {
                continue;
            }
            if function
                .successors(preds[0])
                .iter()
                .filter(|s| **s == succs[0])
                .count()
                > 0
            {
                continue;
            }
            let phi_values: Vec<(InstId, Option<Value>)> = function
                .phis(succs[0])
                .into_iter()
                .map(|phi| (phi, function.phi_value_for(phi, block)))
                .collect();
            function.replace_successor(preds[0], block, succs[0]);
            for (phi, value) in phi_values {
                if let Some(value) = value {
                    function.add_phi_arg(phi, preds[0], value);
                }
                function.remove_phi_arg_for(phi, block);
            }
            function.erase_block(block);
        }
    }
    modified
}

/// An edge is critical if its source has several successors and its target
/// several predecessors.
fn split_critical_edges(function: &mut Function) -> Vec<BlockId> {
    let mut inserted = Vec::new();
    for block in function.block_ids().collect::<Vec<_>>() {
        let succs = function.successors(block);
        if succs.len() < 2 {
            continue;
        }
        for succ in succs {
            if function.preds(succ).len() >= 2 {
                inserted.push(function.split_edge(block, succ, "gvn.split"));
            }
        }
    }
    inserted
}

/// Walk the dominator tree with a scoped table of available computations;
/// a computation equal to one made in a dominating block is replaced.
fn eliminate_dominated_redundancies(function: &mut Function) -> bool {
    let dom = function.dominance();
    let mut modified = false;
    let mut available: HashMap<Computation, InstId> = HashMap::new();
    // Preorder guarantees dominators are visited before dominated blocks;
    // the table keeps only entries from dominators of the current block.
    for block in dom.dom_tree_preorder() {
        available.retain(|_, inst| {
            let home = function.inst(*inst).block().expect("attached");
            dom.dominates(home, block)
        });
        for inst in function.block_insts(block).to_vec() {
            let Some(computation) = computation_of(function, inst) else {
                continue;
            };
            match available.get(&computation) {
                Some(existing) => {
                    function.replace_all_uses(inst, Value::Inst(*existing));
                    function.erase_inst(inst);
                    modified = true;
                }
                None => {
                    available.insert(computation, inst);
                }
            }
        }
    }
    modified
}

/// Computations performed by every successor of a block, whose operands are
/// available in the block, move up into it. Ranks order the work so that a
/// moved computation can enable moving its users in a later round.
fn hoist_common_successors(function: &mut Function) -> bool {
    let mut modified = false;
    loop {
        let ranks = compute_ranks(function);
        let mut hoisted = false;
        for block in function.block_ids().collect::<Vec<_>>() {
            let succs = function.successors(block);
            if succs.len() < 2 {
                continue;
            }
            // Only forward edges: a successor that dominates the block (a
            // loop header) must keep its computations.
            let dom = function.dominance();
            if succs.iter().any(|succ| {
                dom.dominates(*succ, block) || function.preds(*succ).len() > 1
            }) {
                continue;
            }
            let mut table: HashMap<Computation, Vec<InstId>> = HashMap::new();
            for succ in &succs {
                for inst in function.block_insts(*succ).to_vec() {
                    let Some(computation) = computation_of(function, inst)
                    else {
                        continue;
                    };
                    // Operands must not be defined in the successor itself.
                    let movable = function.inst(inst).operands.iter().all(
                        |operand| match operand {
                            Value::Inst(def) => {
                                function.inst(*def).block() != Some(*succ)
                            }
                            _ => true,
                        },
                    );
                    if movable {
                        table.entry(computation).or_default().push(inst);
                    }
                }
            }
            let mut candidates: Vec<(Computation, Vec<InstId>)> = table
                .into_iter()
                .filter(|(_, insts)| {
                    // One instance in every successor.
                    let mut blocks: Vec<BlockId> = insts
                        .iter()
                        .map(|i| function.inst(*i).block().unwrap())
                        .collect();
                    blocks.sort();
                    blocks.dedup();
                    blocks.len() == succs.len()
                })
                .collect();
            candidates.sort_by_key(|(_, insts)| {
                insts.iter().map(|i| ranks.get(i).copied().unwrap_or(0)).min()
            });
            for (computation, insts) in candidates {
                let ty = function.inst(insts[0]).ty;
                let name = function.inst(insts[0]).name.clone();
                let moved = function.new_inst(
                    computation.kind.clone(),
                    ty,
                    computation.operands.clone(),
                    &name,
                );
                let term = function.terminator(block).expect("terminator");
                function.insert_before(term, moved);
                for inst in insts {
                    function.replace_all_uses(inst, Value::Inst(moved));
                    function.erase_inst(inst);
                }
                hoisted = true;
            }
        }
        modified |= hoisted;
        if !hoisted {
            break;
        }
    }
    modified
}

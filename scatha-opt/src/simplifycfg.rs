//! Control flow graph simplification.
//!
//! Folds constant branches, erases unreachable blocks, eliminates trivial
//! phis, merges straight-line block pairs and threads empty forwarding
//! blocks. Runs to a fixpoint.

use std::collections::HashSet;

use scatha_ir::{
    BlockId, Context, Function, InstKind, TypeId, Value,
};

use crate::registry::PassArgs;

pub fn simplifycfg(
    _ctx: &mut Context,
    function: &mut Function,
    _args: &PassArgs,
) -> bool {
    let mut modified = false;
    loop {
        let mut changed = false;
        changed |= fold_constant_branches(function);
        changed |= erase_unreachable_blocks(function);
        changed |= simplify_phis(function);
        changed |= merge_linear_blocks(function);
        changed |= thread_empty_blocks(function);
        modified |= changed;
        if !changed {
            break;
        }
    }
    modified
}

/// `branch const, a, b` becomes `goto a|b`; `branch c, a, a` becomes
/// `goto a`.
fn fold_constant_branches(function: &mut Function) -> bool {
    let mut changed = false;
    for block in function.block_ids().collect::<Vec<_>>() {
        let Some(term) = function.terminator(block) else { continue };
        let InstKind::Branch { then_target, else_target } =
            function.inst(term).kind
        else {
            continue;
        };
        let target = match function.inst(term).operands[0] {
            Value::IntConst { value, .. } => {
                Some(if value != 0 { then_target } else { else_target })
            }
            _ => (then_target == else_target).then_some(then_target),
        };
        let Some(target) = target else { continue };
        function.erase_inst(term);
        let goto = function.new_inst(
            InstKind::Goto { target },
            TypeId::VOID,
            Vec::new(),
            "",
        );
        function.append_inst(block, goto);
        changed = true;
    }
    changed
}

fn erase_unreachable_blocks(function: &mut Function) -> bool {
    let mut reachable: HashSet<BlockId> = HashSet::new();
    let mut stack = vec![function.entry()];
    while let Some(block) = stack.pop() {
        if reachable.insert(block) {
            stack.extend(function.successors(block));
        }
    }
    let dead: Vec<BlockId> = function
        .block_ids()
        .filter(|block| !reachable.contains(block))
        .collect();
    // Erasing in two phases: drop uses of dead values everywhere first.
    for block in &dead {
        for inst in function.block_insts(*block).to_vec() {
            function.replace_all_uses(inst, Value::Undef(function.inst(inst).ty));
        }
    }
    for block in &dead {
        function.erase_block(*block);
    }
    !dead.is_empty()
}

/// Drop phi arguments of single-entry phis and fold phis whose arguments
/// all agree.
fn simplify_phis(function: &mut Function) -> bool {
    let mut changed = false;
    for block in function.block_ids().collect::<Vec<_>>() {
        for phi in function.phis(block) {
            let args = function.phi_args(phi);
            let non_self: Vec<Value> = args
                .iter()
                .map(|(_, value)| *value)
                .filter(|value| *value != Value::Inst(phi))
                .collect();
            let Some(first) = non_self.first().copied() else { continue };
            if non_self.iter().all(|value| *value == first) {
                function.replace_all_uses(phi, first);
                function.erase_inst(phi);
                changed = true;
            }
        }
    }
    changed
}

/// Merge `a -> b` when `a` has the single successor `b` and `b` has the
/// single predecessor `a`.
fn merge_linear_blocks(function: &mut Function) -> bool {
    let mut changed = false;
    'outer: loop {
        for a in function.block_ids().collect::<Vec<_>>() {
            let succs = function.successors(a);
            if succs.len() != 1 {
                continue;
            }
            let b = succs[0];
            if b == a || function.preds(b) != [a] || b == function.entry() {
                continue;
            }
            // Phis in `b` have a single incoming value; fold them first.
            for phi in function.phis(b) {
                let value = function
                    .phi_value_for(phi, a)
                    .unwrap_or(Value::Undef(function.inst(phi).ty));
                function.replace_all_uses(phi, value);
                function.erase_inst(phi);
            }
            let term = function.terminator(a).expect("terminator");
            function.erase_inst(term);
            for inst in function.block_insts(b).to_vec() {
                function.transfer_inst(inst, a);
            }
            function.erase_block(b);
            changed = true;
            continue 'outer;
        }
        break;
    }
    changed
}

/// Forward blocks containing only a goto: predecessors jump straight to the
/// target.
fn thread_empty_blocks(function: &mut Function) -> bool {
    let mut changed = false;
    for block in function.block_ids().collect::<Vec<_>>() {
        if block == function.entry() {
            continue;
        }
        let insts = function.block_insts(block);
        if insts.len() != 1 {
            continue;
        }
        let InstKind::Goto { target } = function.inst(insts[0]).kind else {
            continue;
        };
        if target == block {
            continue;
        }
        // Skip when a predecessor already branches to the target: phi
        // arguments could conflict.
        let preds = function.preds(block).to_vec();
        if preds
            .iter()
            .any(|pred| function.successors(*pred).contains(&target))
        {
            continue;
        }
        if preds.is_empty() {
            continue;
        }
        // Values the threaded phis feed through this block.
        let phi_values: Vec<(scatha_ir::InstId, Option<Value>)> = function
            .phis(target)
            .into_iter()
            .map(|phi| (phi, function.phi_value_for(phi, block)))
            .collect();
        for pred in preds {
            function.replace_successor(pred, block, target);
            for (phi, value) in &phi_values {
                if let Some(value) = value {
                    function.add_phi_arg(*phi, pred, *value);
                }
            }
        }
        for (phi, _) in &phi_values {
            function.remove_phi_arg_for(*phi, block);
        }
        changed = true;
    }
    changed
}

//! Loop rotation.
//!
//! Rewrites a while-style loop (test in the header) into a guarded do-while
//! form: the header is cloned into a footer that takes over the back edges,
//! and the original header remains as a one-shot guard. Values computed in
//! the header are piped through phis in the loop entry and in the skip
//! block so every outside use observes the correct copy.

use std::collections::HashMap;

use scatha_ir::{
    clone_region, BlockId, Context, Function, InstId, InstKind, Value,
};

use crate::registry::PassArgs;

pub fn looprotate(
    _ctx: &mut Context,
    function: &mut Function,
    _args: &PassArgs,
) -> bool {
    let mut modified = false;
    loop {
        let header = find_rotatable_header(function);
        let Some(header) = header else { break };
        rotate(function, header);
        modified = true;
    }
    modified
}

/// A header qualifies while the loop is in while-form: the header has
/// exactly one in-loop and one out-of-loop successor, and the latches do
/// not already bypass it.
fn find_rotatable_header(function: &mut Function) -> Option<BlockId> {
    let forest = function.loop_forest();
    for id in forest.bfs_order() {
        let lp = forest.get(id);
        if !lp.is_proper_loop() {
            continue;
        }
        let succs = function.successors(lp.header);
        if succs.len() != 2 {
            continue;
        }
        let inside = succs.iter().filter(|s| lp.contains(**s)).count();
        if inside != 1 {
            continue;
        }
        // A single-block loop is already in do-while form.
        if succs.contains(&lp.header) {
            continue;
        }
        // Already rotated loops exit from a latch, not from the header.
        if lp.exiting_blocks == [lp.header] {
            return Some(lp.header);
        }
    }
    None
}

fn rotate(function: &mut Function, header: BlockId) {
    let forest = function.loop_forest();
    let loop_id = forest.loop_with_header(header).expect("vanished loop");
    let lp = forest.get(loop_id).clone();
    drop(forest);
    let succs = function.successors(header);
    let entry = *succs.iter().find(|s| lp.contains(**s)).expect("loop entry");
    let exit = *succs.iter().find(|s| !lp.contains(**s)).expect("loop exit");

    // Preprocessing: one non-loop predecessor for the header, a dedicated
    // entry block and an exit block owned by this loop alone.
    let preheader = match lp.entering_blocks.as_slice() {
        [single] => *single,
        _ => join_predecessors(
            function,
            header,
            &lp.entering_blocks,
            "preheader",
        ),
    };
    let entry = if function.preds(entry).len() > 1 {
        function.split_edge(header, entry, "loop.entry")
    } else {
        entry
    };
    let exit = function.split_edge(header, exit, "loop.skip");

    // Pipe every header instruction through single-argument phis in the
    // entry and in the skip block, and retarget dominated uses.
    let dom = function.dominance();
    let header_insts: Vec<InstId> = function
        .block_insts(header)
        .iter()
        .copied()
        .filter(|inst| !function.inst(*inst).kind.is_terminator())
        .collect();
    let mut entry_phis: HashMap<InstId, InstId> = HashMap::new();
    let mut exit_phis: HashMap<InstId, InstId> = HashMap::new();
    for &inst in &header_insts {
        let ty = function.inst(inst).ty;
        let base = function.inst(inst).name.clone();
        for (target, map) in
            [(entry, &mut entry_phis), (exit, &mut exit_phis)]
        {
            let phi = function.new_inst(
                InstKind::Phi { preds: vec![header] },
                ty,
                vec![Value::Inst(inst)],
                &format!("{base}.phi"),
            );
            function.insert_inst(target, 0, phi);
            map.insert(inst, phi);
        }
        // Replace uses dominated by the entry or the skip block. Phi
        // operands count as uses at the incoming edge, so they follow the
        // incoming block, not the phi's own block.
        for user in function.inst(inst).users().to_vec() {
            let Some(user_block) = function.inst(user).block() else {
                continue;
            };
            if user == entry_phis[&inst] || user == exit_phis[&inst] {
                continue;
            }
            if function.inst(user).kind.is_phi() {
                for (index, (pred, value)) in
                    function.phi_args(user).into_iter().enumerate()
                {
                    if value != Value::Inst(inst) {
                        continue;
                    }
                    let replacement = if dom.dominates(entry, pred) {
                        entry_phis[&inst]
                    } else if dom.dominates(exit, pred) {
                        exit_phis[&inst]
                    } else {
                        continue;
                    };
                    function.set_operand(user, index, Value::Inst(replacement));
                }
                continue;
            }
            let replacement = if dom.dominates(entry, user_block) {
                entry_phis[&inst]
            } else if dom.dominates(exit, user_block) {
                exit_phis[&inst]
            } else {
                continue;
            };
            for index in 0..function.inst(user).operands.len() {
                if function.inst(user).operands[index] == Value::Inst(inst) {
                    function.set_operand(user, index, Value::Inst(replacement));
                }
            }
        }
    }

    // Clone the header as the footer; it inherits the branch to the entry
    // and the skip block.
    let map = clone_region(function, &[header], ".footer");
    let footer = map.block(header);
    // The footer feeds second arguments into the piping phis.
    for (&inst, &phi) in entry_phis.iter().chain(exit_phis.iter()) {
        function.add_phi_arg(phi, footer, Value::Inst(map.inst(inst)));
    }
    // Back edges now enter the footer instead of the guard.
    for latch in &lp.latches {
        function.replace_successor(*latch, header, footer);
    }
    // The footer's phi copies lose their preheader argument (the footer is
    // only reached from the latches) and self-referential arguments fall
    // back to the entry copy.
    for &inst in &header_insts {
        let clone = map.inst(inst);
        if !function.inst(clone).kind.is_phi() {
            continue;
        }
        function.remove_phi_arg_for(clone, preheader);
        for (pred, value) in function.phi_args(clone) {
            if value == Value::Inst(clone) {
                let index = function
                    .phi_args(clone)
                    .iter()
                    .position(|(p, _)| *p == pred)
                    .unwrap();
                let entry_value = Value::Inst(entry_phis[&inst]);
                function.set_operand(clone, index, entry_value);
            }
        }
    }
    // Guard phis collapse to their single remaining argument.
    for &inst in &header_insts {
        if !function.inst(inst).kind.is_phi() {
            continue;
        }
        let args = function.phi_args(inst);
        if args.len() == 1 {
            let value = args[0].1;
            function.replace_all_uses(inst, value);
            function.erase_inst(inst);
            // The piping phis referenced the guard phi; their first
            // argument now carries the incoming value directly.
        }
    }
    // Piping phis that ended up unused disappear again.
    for phi in entry_phis.values().chain(exit_phis.values()) {
        if function.inst(*phi).block().is_some()
            && function.inst(*phi).users().is_empty()
        {
            function.erase_inst(*phi);
        }
    }
    function.invalidate_cfg();
}

/// Insert a block joining `preds` in front of `block`, merging their phi
/// arguments.
fn join_predecessors(
    function: &mut Function,
    block: BlockId,
    preds: &[BlockId],
    name: &str,
) -> BlockId {
    let join = function.add_block(name);
    for phi in function.phis(block) {
        let ty = function.inst(phi).ty;
        let base = function.inst(phi).name.clone();
        let args: Vec<(BlockId, Value)> = preds
            .iter()
            .filter_map(|pred| {
                function.phi_value_for(phi, *pred).map(|v| (*pred, v))
            })
            .collect();
        let (phi_preds, operands): (Vec<_>, Vec<_>) =
            args.into_iter().unzip();
        let joined = function.new_inst(
            InstKind::Phi { preds: phi_preds },
            ty,
            operands,
            &format!("{base}.join"),
        );
        function.insert_inst(join, 0, joined);
        for pred in preds {
            function.remove_phi_arg_for(phi, *pred);
        }
        function.add_phi_arg(phi, join, Value::Inst(joined));
    }
    for pred in preds {
        function.replace_successor(*pred, block, join);
    }
    let goto = function.new_inst(
        InstKind::Goto { target: block },
        scatha_ir::TypeId::VOID,
        Vec::new(),
        "",
    );
    function.append_inst(join, goto);
    join
}

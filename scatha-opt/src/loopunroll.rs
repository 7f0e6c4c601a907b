//! Full loop unrolling.
//!
//! Loops with a constant-evaluable induction sequence are peeled into one
//! clone per iteration. The induction variable must be a header phi of the
//! shape `phi(start, iv op stride)` with constant start and stride; the
//! exit test compares the variable (or its step) against a constant. The
//! formal evaluation caps at 32 iterations; loops that run longer are left
//! unchanged.

use scatha_ir::{
    clone_region, ArithmeticOp, BlockId, CompareMode, CompareOp, Context,
    Function, InstId, InstKind, TypeData, TypeId, Value,
};

use crate::registry::PassArgs;

/// Trip count bound of the formal evaluation.
const MAX_TRIP_COUNT: usize = 32;

pub fn loopunroll(
    ctx: &mut Context,
    function: &mut Function,
    _args: &PassArgs,
) -> bool {
    let mut modified = false;
    // Reverse BFS over the forest: innermost loops first.
    loop {
        let candidate = {
            let forest = function.loop_forest();
            let mut order = forest.bfs_order();
            order.reverse();
            order
                .into_iter()
                .map(|id| forest.get(id).clone())
                .find(|lp| gather(ctx, function, lp).is_some())
        };
        let Some(lp) = candidate else { break };
        let unrollable = gather(ctx, function, &lp).expect("gathered twice");
        unroll(function, &lp, &unrollable);
        modified = true;
    }
    modified
}

#[derive(Debug, Clone)]
struct Unrollable {
    /// The induction phi in the header.
    iv: InstId,
    /// The single exiting block (header or latch).
    exiting: BlockId,
    /// In-loop successor of the exiting branch.
    continue_target: BlockId,
    /// The single exit block.
    exit: BlockId,
    /// Constant induction values, one per executed iteration.
    values: Vec<u64>,
    /// Induction value observed by code after the loop.
    post_value: u64,
}

struct IvShape {
    start: u64,
    stride: u64,
    op: ArithmeticOp,
    step: InstId,
    bits: u32,
}

fn gather(
    ctx: &Context,
    function: &Function,
    lp: &scatha_ir::Loop,
) -> Option<Unrollable> {
    // One exiting block, one exit block, one latch.
    let [exiting] = lp.exiting_blocks.as_slice() else { return None };
    let [exit] = lp.exit_blocks.as_slice() else { return None };
    let [latch] = lp.latches.as_slice() else { return None };
    if *exiting != lp.header && exiting != latch {
        return None;
    }
    // The only header phi is the induction variable.
    let phis = function.phis(lp.header);
    let [iv] = phis.as_slice() else { return None };
    if !lp.induction_variables.contains(iv) {
        return None;
    }
    let shape = iv_shape(ctx, function, lp, *iv, *latch)?;
    // The exit test compares the variable or its step against a constant.
    let term = function.terminator(*exiting)?;
    let InstKind::Branch { then_target, else_target } =
        function.inst(term).kind
    else {
        return None;
    };
    let cond = function.inst(term).operands[0].as_inst()?;
    let InstKind::Compare { mode, op } = function.inst(cond).kind else {
        return None;
    };
    if mode == CompareMode::Float {
        return None;
    }
    let (tested, end, flipped) = match function.inst(cond).operands[..] {
        [Value::Inst(tested), Value::IntConst { value, .. }] => {
            (tested, value, false)
        }
        [Value::IntConst { value, .. }, Value::Inst(tested)] => {
            (tested, value, true)
        }
        _ => return None,
    };
    // The tested value is the induction variable before or after the step.
    let tested_is_step = if tested == *iv {
        false
    } else if tested == shape.step {
        true
    } else {
        return None;
    };
    let continue_target = if lp.contains(then_target) {
        then_target
    } else {
        else_target
    };
    let continue_on_true = lp.contains(then_target);
    // Formally evaluate the induction sequence.
    let mut values = Vec::new();
    let mut current = shape.start;
    loop {
        let tested_value = if tested_is_step {
            step_value(&shape, current)
        } else {
            current
        };
        let continues = evaluate_compare(
            mode,
            op,
            tested_value,
            end,
            flipped,
            shape.bits,
        ) == continue_on_true;
        // A header test runs before the body, a latch test after it.
        if *exiting == lp.header {
            if !continues {
                break;
            }
            values.push(current);
        } else {
            values.push(current);
            if !continues {
                break;
            }
        }
        if values.len() > MAX_TRIP_COUNT {
            return None;
        }
        current = step_value(&shape, current);
    }
    Some(Unrollable {
        iv: *iv,
        exiting: *exiting,
        continue_target,
        exit: *exit,
        values,
        post_value: current,
    })
}

fn iv_shape(
    ctx: &Context,
    function: &Function,
    lp: &scatha_ir::Loop,
    iv: InstId,
    latch: BlockId,
) -> Option<IvShape> {
    let TypeData::Int { bits } = ctx.type_data(function.inst(iv).ty) else {
        return None;
    };
    let mut start = None;
    let mut step = None;
    for (pred, value) in function.phi_args(iv) {
        if lp.contains(pred) {
            if pred != latch {
                return None;
            }
            step = value.as_inst();
        } else {
            match value {
                Value::IntConst { value, .. } => start = Some(value),
                _ => return None,
            }
        }
    }
    let (start, step) = (start?, step?);
    let InstKind::Arithmetic(op) = function.inst(step).kind else {
        return None;
    };
    if !matches!(
        op,
        ArithmeticOp::Add | ArithmeticOp::Sub | ArithmeticOp::Mul
    ) {
        return None;
    }
    let stride = match function.inst(step).operands[..] {
        [Value::Inst(phi), Value::IntConst { value, .. }] if phi == iv => {
            value
        }
        [Value::IntConst { value, .. }, Value::Inst(phi)]
            if phi == iv && op != ArithmeticOp::Sub =>
        {
            value
        }
        _ => return None,
    };
    Some(IvShape { start, stride, op, step, bits: *bits })
}

fn step_value(shape: &IvShape, current: u64) -> u64 {
    let raw = match shape.op {
        ArithmeticOp::Add => current.wrapping_add(shape.stride),
        ArithmeticOp::Sub => current.wrapping_sub(shape.stride),
        ArithmeticOp::Mul => current.wrapping_mul(shape.stride),
        _ => unreachable!(),
    };
    truncate(raw, shape.bits)
}

fn truncate(value: u64, bits: u32) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

fn to_signed(value: u64, bits: u32) -> i64 {
    if bits >= 64 {
        value as i64
    } else {
        let shift = 64 - bits;
        ((value << shift) as i64) >> shift
    }
}

fn evaluate_compare(
    mode: CompareMode,
    op: CompareOp,
    lhs: u64,
    rhs: u64,
    flipped: bool,
    bits: u32,
) -> bool {
    let (lhs, rhs) = if flipped { (rhs, lhs) } else { (lhs, rhs) };
    let ordering = match mode {
        CompareMode::Signed => {
            to_signed(lhs, bits).cmp(&to_signed(rhs, bits))
        }
        _ => truncate(lhs, bits).cmp(&truncate(rhs, bits)),
    };
    match op {
        CompareOp::Equal => ordering.is_eq(),
        CompareOp::NotEqual => !ordering.is_eq(),
        CompareOp::Less => ordering.is_lt(),
        CompareOp::LessEq => ordering.is_le(),
        CompareOp::Greater => ordering.is_gt(),
        CompareOp::GreaterEq => ordering.is_ge(),
    }
}

fn unroll(function: &mut Function, lp: &scatha_ir::Loop, info: &Unrollable) {
    let iv_ty = function.inst(info.iv).ty;
    let trips = info.values.len();
    // Values flowing out of the loop through exit phis, per original
    // exiting block instruction.
    let exit_phi_args: Vec<(InstId, Option<Value>)> = function
        .phis(info.exit)
        .into_iter()
        .map(|phi| (phi, function.phi_value_for(phi, info.exiting)))
        .collect();
    // Clone the loop once per executed iteration.
    let mut clones = Vec::with_capacity(trips);
    for index in 0..trips {
        let map =
            clone_region(function, &lp.inner_blocks, &format!(".it{index}"));
        clones.push(map);
    }
    // Substitute the constant induction value in every clone and fold the
    // cloned exit test into a straight goto.
    for (index, map) in clones.iter().enumerate() {
        let iv_clone = map.inst(info.iv);
        let value = Value::IntConst { value: info.values[index], ty: iv_ty };
        function.replace_all_uses(iv_clone, value);
        function.erase_inst(iv_clone);
        let exiting_clone = map.block(info.exiting);
        let term = function.terminator(exiting_clone).expect("terminator");
        // The last latch-exit clone leaves the loop; every other clone
        // continues into its body.
        let target = if info.exiting != lp.header && index + 1 == trips {
            info.exit
        } else {
            map.block(info.continue_target)
        };
        function.erase_inst(term);
        let goto = function.new_inst(
            InstKind::Goto { target },
            TypeId::VOID,
            Vec::new(),
            "",
        );
        function.append_inst(exiting_clone, goto);
    }
    // Chain the clones: each latch jumps to the next clone's header; the
    // final back edge leaves through the exit.
    for (index, map) in clones.iter().enumerate() {
        for latch in &lp.latches {
            let latch_clone = map.block(*latch);
            let header_clone = map.block(lp.header);
            let next = if index + 1 < trips {
                clones[index + 1].block(lp.header)
            } else if info.exiting == lp.header {
                info.exit
            } else {
                // The latch itself was the exit and already jumps there.
                continue;
            };
            function.replace_successor(latch_clone, header_clone, next);
        }
    }
    // Entering edges bypass the original header.
    let first_target = if trips == 0 {
        info.exit
    } else {
        clones[0].block(lp.header)
    };
    for entering in &lp.entering_blocks {
        function.replace_successor(*entering, lp.header, first_target);
    }
    // Exit phis: the exit is now reached from the last clone (through its
    // latch) or, for a zero-trip loop, straight from the entering blocks.
    for (phi, value) in &exit_phi_args {
        if function.inst(*phi).block().is_none() {
            continue;
        }
        if trips > 0 {
            let last = &clones[trips - 1];
            let from = last.block(lp.latches[0]);
            if let Some(value) = value {
                // The cloned induction phi was already folded away.
                let mapped = if *value == Value::Inst(info.iv) {
                    Value::IntConst { value: info.values[trips - 1], ty: iv_ty }
                } else {
                    last.value(*value)
                };
                function.add_phi_arg(*phi, from, mapped);
            }
        } else {
            for entering in &lp.entering_blocks {
                let arg = match value {
                    Some(value) if !defined_in_loop(function, lp, *value) => {
                        *value
                    }
                    _ => Value::Undef(function.inst(*phi).ty),
                };
                function.add_phi_arg(*phi, *entering, arg);
            }
        }
        function.remove_phi_arg_for(*phi, info.exiting);
    }
    // Outside users of the induction variable observe its terminal value.
    function.replace_all_uses(
        info.iv,
        Value::IntConst { value: info.post_value, ty: iv_ty },
    );
    // Erase the original loop; stray outside uses of loop-local values
    // degrade to undef.
    for block in &lp.inner_blocks {
        for inst in function.block_insts(*block).to_vec() {
            let ty = function.inst(inst).ty;
            function.replace_all_uses(inst, Value::Undef(ty));
        }
    }
    for block in &lp.inner_blocks {
        function.erase_block(*block);
    }
    function.invalidate_cfg();
}

fn defined_in_loop(
    function: &Function,
    lp: &scatha_ir::Loop,
    value: Value,
) -> bool {
    match value {
        Value::Inst(id) => function
            .inst(id)
            .block()
            .is_some_and(|block| lp.contains(block)),
        _ => false,
    }
}

//! Mechanical inlining of a single call site.

use scatha_ir::{
    copy_body_for_inline, FuncRef, InstId, InstKind, Module, TypeId, Value,
};

/// Inline the direct call `site` in `caller`. The callee body is cloned
/// into the caller, the call block is split, returns become gotos to the
/// landing block and the call's value is replaced by the returned value (a
/// phi when several returns reach the landing block).
pub fn inline_callsite(
    module: &mut Module,
    caller: FuncRef,
    site: InstId,
) -> bool {
    let callee = {
        let function = module.function(caller);
        match function.inst(site).operands.first() {
            Some(Value::Function(callee)) => *callee,
            _ => return false,
        }
    };
    if callee == caller {
        return false;
    }
    let (caller_fn, callee_fn) = module.function_pair_mut(caller, callee);
    let args: Vec<Value> = caller_fn.inst(site).operands[1..].to_vec();
    let block = caller_fn.inst(site).block().expect("detached call");
    let position = caller_fn
        .block_insts(block)
        .iter()
        .position(|i| *i == site)
        .expect("inconsistent block");
    // Split off the continuation; the call stays at the end of `block`.
    let landing = caller_fn.split_block(block, position + 1, "inline.landing");
    let (map, returns) =
        copy_body_for_inline(caller_fn, callee_fn, &args, ".in");
    let callee_entry = map.block(callee_fn.entry());
    // Enter the cloned body instead of calling.
    let goto = caller_fn.new_inst(
        InstKind::Goto { target: callee_entry },
        TypeId::VOID,
        Vec::new(),
        "",
    );
    caller_fn.append_inst(block, goto);
    // Rewire the cloned returns to the landing block.
    let mut incoming: Vec<(scatha_ir::BlockId, Option<Value>)> = Vec::new();
    for ret in returns {
        let ret_block = caller_fn.inst(ret).block().expect("detached return");
        let value = caller_fn.inst(ret).operands.first().copied();
        caller_fn.erase_inst(ret);
        let goto = caller_fn.new_inst(
            InstKind::Goto { target: landing },
            TypeId::VOID,
            Vec::new(),
            "",
        );
        caller_fn.append_inst(ret_block, goto);
        incoming.push((ret_block, value));
    }
    // Substitute the call result.
    let result = match incoming.len() {
        0 => None,
        1 => incoming[0].1,
        _ if incoming.iter().all(|(_, v)| v.is_none()) => None,
        _ => {
            let ty = caller_fn.inst(site).ty;
            let name = format!("{}.ret", caller_fn.inst(site).name.clone());
            let (preds, operands): (Vec<_>, Vec<_>) = incoming
                .iter()
                .map(|(block, value)| {
                    (*block, value.unwrap_or(Value::Undef(ty)))
                })
                .unzip();
            let phi = caller_fn.new_inst(
                InstKind::Phi { preds },
                ty,
                operands,
                &name,
            );
            caller_fn.insert_inst(landing, 0, phi);
            Some(Value::Inst(phi))
        }
    };
    if let Some(result) = result {
        caller_fn.replace_all_uses(site, result);
    } else {
        let ty = caller_fn.inst(site).ty;
        caller_fn.replace_all_uses(site, Value::Undef(ty));
    }
    caller_fn.erase_inst(site);
    // Static allocas of the inlined body move to the caller's entry.
    let entry = caller_fn.entry();
    for inst in map.insts.values().copied().collect::<Vec<_>>() {
        if matches!(caller_fn.inst(inst).kind, InstKind::Alloca { .. })
            && caller_fn.inst(inst).block() != Some(entry)
        {
            caller_fn.transfer_inst_to_front(inst, entry);
        }
    }
    caller_fn.invalidate_cfg();
    true
}

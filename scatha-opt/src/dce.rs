//! Dead code elimination.
//!
//! Erases side-effect free instructions without users, iterating until no
//! more die. Loads are pure in this IR, so unused loads die too.

use scatha_ir::{Context, Function};

use crate::registry::PassArgs;

pub fn dce(
    _ctx: &mut Context,
    function: &mut Function,
    _args: &PassArgs,
) -> bool {
    let mut modified = false;
    loop {
        let mut erased_any = false;
        let mut order = function.inst_ids().collect::<Vec<_>>();
        order.reverse();
        for inst in order {
            let data = function.inst(inst);
            if data.kind.has_side_effects() || data.kind.is_terminator() {
                continue;
            }
            if data.users().is_empty() {
                function.erase_inst(inst);
                erased_any = true;
            }
        }
        modified |= erased_any;
        if !erased_any {
            break;
        }
    }
    modified
}

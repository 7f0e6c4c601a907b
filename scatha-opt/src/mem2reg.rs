//! Promotion of allocas to SSA registers.
//!
//! An alloca qualifies when its only users are loads and stores of the full
//! slot (the address never escapes). Every load is replaced by the reaching
//! stored value: a backward scan within the block, then a recursive walk
//! over the predecessors that inserts phis at join points. Cycles are broken
//! by planting the phi before descending, so every block is visited at most
//! twice per alloca.

use std::collections::HashMap;

use scatha_ir::{
    BlockId, Context, Function, InstId, InstKind, TypeId, Value,
};

use crate::registry::PassArgs;

pub fn mem2reg(
    _ctx: &mut Context,
    function: &mut Function,
    _args: &PassArgs,
) -> bool {
    let mut modified = false;
    for alloca in collect_promotable(function) {
        promote(function, alloca);
        modified = true;
    }
    modified
}

fn collect_promotable(function: &Function) -> Vec<InstId> {
    let mut promotable = Vec::new();
    for inst in function.inst_ids() {
        let data = function.inst(inst);
        let InstKind::Alloca { .. } = data.kind else { continue };
        let address = Value::Inst(inst);
        let only_memory_users = data.users().iter().all(|user| {
            let user = function.inst(*user);
            match user.kind {
                InstKind::Load => true,
                // The alloca must be the address, not the stored value.
                InstKind::Store => user.operands[0] == address
                    && user.operands[1] != address,
                _ => false,
            }
        });
        if only_memory_users {
            promotable.push(inst);
        }
    }
    promotable
}

struct Promotion<'f> {
    function: &'f mut Function,
    alloca: InstId,
    value_ty: TypeId,
    /// Value leaving each block, memoized; phis are planted optimistically
    /// to cut cycles.
    end_values: HashMap<BlockId, Value>,
    entry_values: HashMap<BlockId, Value>,
    inserted_phis: Vec<InstId>,
}

fn promote(function: &mut Function, alloca: InstId) {
    let value_ty = load_type(function, alloca);
    let mut ctx = Promotion {
        function,
        alloca,
        value_ty,
        end_values: HashMap::new(),
        entry_values: HashMap::new(),
        inserted_phis: Vec::new(),
    };
    // Replace loads in program order so later loads see earlier
    // replacements through the stores.
    let loads: Vec<InstId> = ctx
        .function
        .inst_ids()
        .filter(|id| {
            let data = ctx.function.inst(*id);
            matches!(data.kind, InstKind::Load)
                && data.operands[0] == Value::Inst(alloca)
        })
        .collect();
    for load in loads {
        let block = ctx.function.inst(load).block().expect("detached load");
        let position = ctx
            .function
            .block_insts(block)
            .iter()
            .position(|i| *i == load)
            .expect("inconsistent block");
        let value = ctx.reaching_value(block, position);
        ctx.function.replace_all_uses(load, value);
        ctx.function.erase_inst(load);
    }
    // Remove the stores and the alloca itself.
    let stores: Vec<InstId> = ctx.function.inst(alloca).users().to_vec();
    for store in stores {
        ctx.function.erase_inst(store);
    }
    ctx.function.erase_inst(alloca);
    // Inserted phis that turned out trivial collapse to their unique value.
    ctx.cleanup_trivial_phis();
}

fn load_type(function: &Function, alloca: InstId) -> TypeId {
    match function.inst(alloca).kind {
        InstKind::Alloca { allocated_ty } => allocated_ty,
        _ => unreachable!("not an alloca"),
    }
}

impl Promotion<'_> {
    /// Value of the slot just before `position` in `block`.
    fn reaching_value(&mut self, block: BlockId, position: usize) -> Value {
        if let Some(value) = self.local_store_before(block, position) {
            return value;
        }
        self.value_at_entry(block)
    }

    fn local_store_before(
        &self,
        block: BlockId,
        position: usize,
    ) -> Option<Value> {
        let insts = self.function.block_insts(block);
        for inst in insts[..position].iter().rev() {
            let data = self.function.inst(*inst);
            if matches!(data.kind, InstKind::Store)
                && data.operands[0] == Value::Inst(self.alloca)
            {
                return Some(data.operands[1]);
            }
        }
        None
    }

    fn value_at_end(&mut self, block: BlockId) -> Value {
        if let Some(value) = self.end_values.get(&block) {
            return *value;
        }
        let len = self.function.block_insts(block).len();
        if let Some(value) = self.local_store_before(block, len) {
            self.end_values.insert(block, value);
            return value;
        }
        let value = self.value_at_entry(block);
        self.end_values.insert(block, value);
        value
    }

    fn value_at_entry(&mut self, block: BlockId) -> Value {
        if let Some(value) = self.entry_values.get(&block) {
            return *value;
        }
        let preds = self.function.preds(block).to_vec();
        match preds.len() {
            0 => {
                let value = Value::Undef(self.value_ty);
                self.entry_values.insert(block, value);
                value
            }
            1 => {
                let value = self.value_at_end(preds[0]);
                self.entry_values.insert(block, value);
                value
            }
            _ => {
                // Plant the phi before walking the predecessors so cyclic
                // walks terminate.
                let phi = self.function.new_inst(
                    InstKind::Phi { preds: Vec::new() },
                    self.value_ty,
                    Vec::new(),
                    "promoted",
                );
                self.function.insert_inst(block, 0, phi);
                self.entry_values.insert(block, Value::Inst(phi));
                self.inserted_phis.push(phi);
                for pred in preds {
                    let value = self.value_at_end(pred);
                    self.function.add_phi_arg(phi, pred, value);
                }
                Value::Inst(phi)
            }
        }
    }

    fn cleanup_trivial_phis(&mut self) {
        loop {
            let mut changed = false;
            for phi in self.inserted_phis.clone() {
                if self.function.inst(phi).block().is_none() {
                    continue;
                }
                let args = self.function.phi_args(phi);
                let non_self: Vec<Value> = args
                    .iter()
                    .map(|(_, v)| *v)
                    .filter(|v| *v != Value::Inst(phi))
                    .collect();
                let Some(first) = non_self.first().copied() else { continue };
                if non_self.iter().all(|v| *v == first) {
                    self.function.replace_all_uses(phi, first);
                    self.function.erase_inst(phi);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }
}

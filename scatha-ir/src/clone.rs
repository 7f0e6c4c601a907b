//! Region and body cloning with value remapping.
//!
//! Used by the inliner (copy a callee body into the caller), loop rotation
//! (clone the header) and loop unrolling (clone the body per iteration).

use std::collections::HashMap;

use crate::function::Function;
use crate::value::{BlockId, Inst, InstId, InstKind, Value};

/// Mapping from original to cloned handles.
#[derive(Debug, Clone, Default)]
pub struct CloneMap {
    pub blocks: HashMap<BlockId, BlockId>,
    pub insts: HashMap<InstId, InstId>,
}

impl CloneMap {
    pub fn block(&self, id: BlockId) -> BlockId {
        self.blocks.get(&id).copied().unwrap_or(id)
    }

    pub fn inst(&self, id: InstId) -> InstId {
        self.insts.get(&id).copied().unwrap_or(id)
    }

    pub fn value(&self, value: Value) -> Value {
        match value {
            Value::Inst(id) => Value::Inst(self.inst(id)),
            other => other,
        }
    }
}

/// Clone `blocks` of `function` in place, appending the clones to the block
/// layout. Internal references (operands, phi incoming blocks, branch
/// targets) are remapped into the clone; references entering the region from
/// outside keep pointing at the originals.
///
/// Predecessor lists of the cloned blocks and of the clone's targets are
/// kept consistent; phi arguments flowing into blocks outside the region
/// are the caller's responsibility.
pub fn clone_region(
    function: &mut Function,
    blocks: &[BlockId],
    suffix: &str,
) -> CloneMap {
    let mut map = CloneMap::default();
    for block in blocks {
        let name = format!("{}{}", function.block_name(*block), suffix);
        let clone = function.add_block(&name);
        map.blocks.insert(*block, clone);
    }
    // First pass: clone instructions with raw payloads.
    for block in blocks {
        let clone_block = map.blocks[block];
        for inst in function.block_insts(*block).to_vec() {
            let data = function.inst(inst);
            let raw = Inst {
                kind: data.kind.clone(),
                operands: data.operands.clone(),
                ty: data.ty,
                name: String::new(),
                block: None,
                users: Vec::new(),
            };
            let base_name = data.name.clone();
            let name = function.uniquify(&format!("{base_name}{suffix}"));
            let id = crate::value::InstId(function.insts.len() as u32);
            function.insts.push(Inst { name, ..raw });
            function.insts[id.index()].block = Some(clone_block);
            function.blocks[clone_block.index()].insts.push(id);
            map.insts.insert(inst, id);
        }
    }
    // Second pass: remap operands and block references, register uses and
    // predecessor edges.
    for clone in map.insts.values().copied().collect::<Vec<_>>() {
        let operands: Vec<Value> = function.insts[clone.index()]
            .operands
            .iter()
            .map(|operand| map.value(*operand))
            .collect();
        for operand in &operands {
            if let Value::Inst(def) = operand {
                function.insts[def.index()].users.push(clone);
            }
        }
        function.insts[clone.index()].operands = operands;
        let block = function.insts[clone.index()].block.unwrap();
        let mut new_targets = Vec::new();
        match &mut function.insts[clone.index()].kind {
            InstKind::Phi { preds } => {
                for pred in preds.iter_mut() {
                    *pred = map.blocks.get(pred).copied().unwrap_or(*pred);
                }
            }
            InstKind::Goto { target } => {
                *target = map.blocks.get(target).copied().unwrap_or(*target);
                new_targets.push(*target);
            }
            InstKind::Branch { then_target, else_target } => {
                *then_target =
                    map.blocks.get(then_target).copied().unwrap_or(*then_target);
                *else_target =
                    map.blocks.get(else_target).copied().unwrap_or(*else_target);
                new_targets.push(*then_target);
                new_targets.push(*else_target);
            }
            _ => {}
        }
        for target in new_targets {
            let preds = &mut function.blocks[target.index()].preds;
            if !preds.contains(&block) {
                preds.push(block);
            }
        }
    }
    function.invalidate_cfg();
    map
}

/// Copy the body of `src` into `dst`, substituting `args` for the
/// parameters. Returns the clone map and the cloned `Return` instructions.
/// The caller rewires the returns (the inliner replaces them with gotos to
/// its landing block).
pub fn copy_body_for_inline(
    dst: &mut Function,
    src: &Function,
    args: &[Value],
    suffix: &str,
) -> (CloneMap, Vec<InstId>) {
    let mut map = CloneMap::default();
    let src_blocks: Vec<BlockId> = src.block_ids().collect();
    for block in &src_blocks {
        let name = format!("{}{}", src.block_name(*block), suffix);
        let clone = dst.add_block(&name);
        map.blocks.insert(*block, clone);
    }
    // First pass: create the clones with remapped control flow but without
    // operands, so forward references (phis) resolve in the second pass.
    let mut returns = Vec::new();
    for block in &src_blocks {
        let clone_block = map.blocks[block];
        for inst in src.block_insts(*block) {
            let data = src.inst(*inst);
            let mut kind = data.kind.clone();
            match &mut kind {
                InstKind::Phi { preds } => {
                    for pred in preds.iter_mut() {
                        *pred = map.blocks[pred];
                    }
                }
                InstKind::Goto { target } => *target = map.blocks[target],
                InstKind::Branch { then_target, else_target } => {
                    *then_target = map.blocks[then_target];
                    *else_target = map.blocks[else_target];
                }
                _ => {}
            }
            let is_return = matches!(kind, InstKind::Return);
            let targets = kind.targets();
            let name = format!("{}{}", data.name, suffix);
            let id = dst.new_inst(kind, data.ty, Vec::new(), &name);
            dst.insts[id.index()].block = Some(clone_block);
            dst.blocks[clone_block.index()].insts.push(id);
            for target in targets {
                let preds = &mut dst.blocks[target.index()].preds;
                if !preds.contains(&clone_block) {
                    preds.push(clone_block);
                }
            }
            map.insts.insert(*inst, id);
            if is_return {
                returns.push(id);
            }
        }
    }
    // Second pass: fill in operands through the now-complete map.
    for block in &src_blocks {
        for inst in src.block_insts(*block) {
            let clone = map.insts[inst];
            let operands: Vec<Value> = src
                .inst(*inst)
                .operands
                .iter()
                .map(|operand| match operand {
                    Value::Param(index) => args[*index as usize],
                    other => map.value(*other),
                })
                .collect();
            for operand in &operands {
                if let Value::Inst(def) = operand {
                    dst.insts[def.index()].users.push(clone);
                }
            }
            dst.insts[clone.index()].operands = operands;
        }
    }
    dst.invalidate_cfg();
    (map, returns)
}

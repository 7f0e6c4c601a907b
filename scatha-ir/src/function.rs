//! Functions, basic blocks and the mutator API.
//!
//! A function owns two arenas: one for basic blocks and one for
//! instructions. Handles stay valid for the lifetime of the function;
//! erasing detaches from the layout without reusing indices. All operand
//! updates go through the mutators here, which keep use lists, predecessor
//! lists and phi arguments consistent.

use std::collections::HashMap;
use std::rc::Rc;

use crate::dominance::DomInfo;
use crate::loops::LoopNestingForest;
use crate::types::TypeId;
use crate::value::{BlockId, Inst, InstId, InstKind, Value};

/// A function parameter.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub ty: TypeId,
    pub name: String,
}

/// One basic block: ordered instructions and the derived predecessor list.
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub name: String,
    pub(crate) insts: Vec<InstId>,
    pub(crate) preds: Vec<BlockId>,
    pub(crate) alive: bool,
}

/// A function in SSA form.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Parameter>,
    pub return_ty: TypeId,
    pub(crate) insts: Vec<Inst>,
    pub(crate) blocks: Vec<BlockData>,
    pub(crate) block_order: Vec<BlockId>,
    name_counters: HashMap<String, u32>,
    dom_cache: Option<Rc<DomInfo>>,
    lnf_cache: Option<Rc<LoopNestingForest>>,
}

impl Function {
    pub fn new(
        name: impl Into<String>,
        params: Vec<Parameter>,
        return_ty: TypeId,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            return_ty,
            insts: Vec::new(),
            blocks: Vec::new(),
            block_order: Vec::new(),
            name_counters: HashMap::new(),
            dom_cache: None,
            lnf_cache: None,
        }
    }

    /// Produce a function-unique SSA name from a base string.
    pub fn uniquify(&mut self, base: &str) -> String {
        let counter = self.name_counters.entry(base.to_owned()).or_insert(0);
        let name = if *counter == 0 {
            base.to_owned()
        } else {
            format!("{base}.{counter}")
        };
        *counter += 1;
        name
    }

    // # Blocks

    pub fn add_block(&mut self, name: &str) -> BlockId {
        let name = self.uniquify(name);
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            name,
            insts: Vec::new(),
            preds: Vec::new(),
            alive: true,
        });
        self.block_order.push(id);
        self.invalidate_cfg();
        id
    }

    /// First block of the layout.
    pub fn entry(&self) -> BlockId {
        self.block_order[0]
    }

    /// Blocks in layout order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.block_order.iter().copied()
    }

    pub fn num_blocks(&self) -> usize {
        self.block_order.len()
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.index()]
    }

    pub fn block_name(&self, id: BlockId) -> &str {
        &self.blocks[id.index()].name
    }

    pub fn block_insts(&self, id: BlockId) -> &[InstId] {
        &self.blocks[id.index()].insts
    }

    pub fn preds(&self, id: BlockId) -> &[BlockId] {
        &self.blocks[id.index()].preds
    }

    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.terminator(id)
            .map(|term| self.insts[term.index()].kind.targets())
            .unwrap_or_default()
    }

    pub fn terminator(&self, id: BlockId) -> Option<InstId> {
        let last = *self.blocks[id.index()].insts.last()?;
        self.insts[last.index()].kind.is_terminator().then_some(last)
    }

    /// Phi instructions at the head of `block`.
    pub fn phis(&self, block: BlockId) -> Vec<InstId> {
        self.block_insts(block)
            .iter()
            .copied()
            .take_while(|id| self.inst(*id).kind.is_phi())
            .collect()
    }

    /// Move `block` to the end of the layout order.
    pub fn move_block_to_end(&mut self, block: BlockId) {
        self.block_order.retain(|id| *id != block);
        self.block_order.push(block);
    }

    /// Place `block` directly after `after` in the layout order.
    pub fn move_block_after(&mut self, block: BlockId, after: BlockId) {
        self.block_order.retain(|id| *id != block);
        let pos = self
            .block_order
            .iter()
            .position(|id| *id == after)
            .expect("unknown block");
        self.block_order.insert(pos + 1, block);
    }

    /// Detach an unreachable block and erase all of its instructions.
    pub fn erase_block(&mut self, block: BlockId) {
        let insts = std::mem::take(&mut self.blocks[block.index()].insts);
        for id in insts.iter().rev() {
            self.unregister_operands(*id);
            self.insts[id.index()].block = None;
            self.insts[id.index()].users.clear();
        }
        for id in insts {
            if let Some(term_targets) =
                (self.insts[id.index()].kind.is_terminator())
                    .then(|| self.insts[id.index()].kind.targets())
            {
                for target in term_targets {
                    self.remove_pred(target, block);
                }
            }
        }
        self.blocks[block.index()].alive = false;
        self.blocks[block.index()].preds.clear();
        self.block_order.retain(|id| *id != block);
        self.invalidate_cfg();
    }

    // # Instructions

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub fn inst_ids(&self) -> impl Iterator<Item = InstId> + '_ {
        self.block_order
            .iter()
            .flat_map(|block| self.blocks[block.index()].insts.iter().copied())
    }

    /// Number of instructions in the function body.
    pub fn num_insts(&self) -> usize {
        self.block_order
            .iter()
            .map(|block| self.blocks[block.index()].insts.len())
            .sum()
    }

    /// Create a detached instruction, registering its operand uses.
    pub fn new_inst(
        &mut self,
        kind: InstKind,
        ty: TypeId,
        operands: Vec<Value>,
        name: &str,
    ) -> InstId {
        let name = self.uniquify(name);
        let id = InstId(self.insts.len() as u32);
        for operand in &operands {
            if let Value::Inst(def) = operand {
                self.insts[def.index()].users.push(id);
            }
        }
        self.insts.push(Inst {
            kind,
            operands,
            ty,
            name,
            block: None,
            users: Vec::new(),
        });
        id
    }

    /// Append an instruction to a block. Appending a terminator registers
    /// the block as a predecessor of its targets.
    pub fn append_inst(&mut self, block: BlockId, id: InstId) {
        debug_assert!(self.insts[id.index()].block.is_none());
        self.insts[id.index()].block = Some(block);
        self.blocks[block.index()].insts.push(id);
        if self.insts[id.index()].kind.is_terminator() {
            for target in self.insts[id.index()].kind.targets() {
                self.add_pred(target, block);
            }
            self.invalidate_cfg();
        }
    }

    /// Insert an instruction at `index` within a block's layout.
    pub fn insert_inst(&mut self, block: BlockId, index: usize, id: InstId) {
        debug_assert!(self.insts[id.index()].block.is_none());
        self.insts[id.index()].block = Some(block);
        self.blocks[block.index()].insts.insert(index, id);
    }

    /// Insert an instruction directly before another one.
    pub fn insert_before(&mut self, before: InstId, id: InstId) {
        let block = self.insts[before.index()].block.expect("detached");
        let index = self.blocks[block.index()]
            .insts
            .iter()
            .position(|i| *i == before)
            .expect("inconsistent block list");
        self.insert_inst(block, index, id);
    }

    /// Insert after the phi region of a block.
    pub fn insert_after_phis(&mut self, block: BlockId, id: InstId) {
        let index = self.blocks[block.index()]
            .insts
            .iter()
            .take_while(|i| self.insts[i.index()].kind.is_phi())
            .count();
        self.insert_inst(block, index, id);
    }

    /// Detach an instruction from its block and release its operand uses.
    /// Remaining users must have been rewired by the caller.
    pub fn erase_inst(&mut self, id: InstId) {
        let targets = self.insts[id.index()]
            .kind
            .is_terminator()
            .then(|| self.insts[id.index()].kind.targets());
        self.unregister_operands(id);
        if let Some(block) = self.insts[id.index()].block.take() {
            self.blocks[block.index()].insts.retain(|i| *i != id);
            if let Some(targets) = targets {
                for target in targets {
                    self.remove_pred(target, block);
                }
                self.invalidate_cfg();
            }
        }
    }

    fn unregister_operands(&mut self, id: InstId) {
        let operands = std::mem::take(&mut self.insts[id.index()].operands);
        for operand in &operands {
            if let Value::Inst(def) = operand {
                remove_one(&mut self.insts[def.index()].users, id);
            }
        }
    }

    /// Replace operand `index` of `inst`, updating use lists.
    pub fn set_operand(&mut self, inst: InstId, index: usize, value: Value) {
        let old = self.insts[inst.index()].operands[index];
        if old == value {
            return;
        }
        if let Value::Inst(def) = old {
            remove_one(&mut self.insts[def.index()].users, inst);
        }
        if let Value::Inst(def) = value {
            self.insts[def.index()].users.push(inst);
        }
        self.insts[inst.index()].operands[index] = value;
    }

    /// Replace every use of `old`'s result with `new`.
    pub fn replace_all_uses(&mut self, old: InstId, new: Value) {
        let users = std::mem::take(&mut self.insts[old.index()].users);
        for user in users {
            for index in 0..self.insts[user.index()].operands.len() {
                if self.insts[user.index()].operands[index] == Value::Inst(old)
                {
                    self.insts[user.index()].operands[index] = new;
                    if let Value::Inst(def) = new {
                        self.insts[def.index()].users.push(user);
                    }
                }
            }
        }
    }

    /// Replace every operand equal to `old` anywhere in the body. Slower
    /// than [`Self::replace_all_uses`]; needed for non-instruction values.
    pub fn replace_value(&mut self, old: Value, new: Value) {
        if let Value::Inst(id) = old {
            self.replace_all_uses(id, new);
            return;
        }
        for block in self.block_order.clone() {
            for inst in self.blocks[block.index()].insts.clone() {
                for index in 0..self.insts[inst.index()].operands.len() {
                    if self.insts[inst.index()].operands[index] == old {
                        self.set_operand(inst, index, new);
                    }
                }
            }
        }
    }

    // # CFG edges

    fn add_pred(&mut self, block: BlockId, pred: BlockId) {
        let preds = &mut self.blocks[block.index()].preds;
        if !preds.contains(&pred) {
            preds.push(pred);
        }
    }

    fn remove_pred(&mut self, block: BlockId, pred: BlockId) {
        // Keep the predecessor while another edge from `pred` remains
        // (a conditional branch with both targets equal).
        let remaining = self
            .terminator_targets_of(pred)
            .iter()
            .filter(|t| **t == block)
            .count();
        if remaining > 0 {
            return;
        }
        remove_one(&mut self.blocks[block.index()].preds, pred);
        for phi in self.phis(block) {
            self.remove_phi_arg_for(phi, pred);
        }
    }

    fn terminator_targets_of(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|t| self.insts[t.index()].kind.targets())
            .unwrap_or_default()
    }

    /// Rewrite every `from` target of `block`'s terminator to `to`. Fixes
    /// predecessor lists and drops `block`'s phi arguments in `from`; the
    /// caller adds arguments to phis in `to`.
    pub fn replace_successor(
        &mut self,
        block: BlockId,
        from: BlockId,
        to: BlockId,
    ) {
        let Some(term) = self.terminator(block) else { return };
        match &mut self.insts[term.index()].kind {
            InstKind::Goto { target } => {
                if *target == from {
                    *target = to;
                }
            }
            InstKind::Branch { then_target, else_target } => {
                if *then_target == from {
                    *then_target = to;
                }
                if *else_target == from {
                    *else_target = to;
                }
            }
            _ => return,
        }
        remove_one(&mut self.blocks[from.index()].preds, block);
        for phi in self.phis(from) {
            self.remove_phi_arg_for(phi, block);
        }
        self.add_pred(to, block);
        self.invalidate_cfg();
    }

    /// Split the edge `pred -> succ` with a fresh block containing a single
    /// goto. Phi arguments in `succ` are rewritten to come from the new
    /// block.
    pub fn split_edge(
        &mut self,
        pred: BlockId,
        succ: BlockId,
        name: &str,
    ) -> BlockId {
        let new_block = self.add_block(name);
        let Some(term) = self.terminator(pred) else {
            unreachable!("edge without terminator")
        };
        match &mut self.insts[term.index()].kind {
            InstKind::Goto { target } => {
                debug_assert_eq!(*target, succ);
                *target = new_block;
            }
            InstKind::Branch { then_target, else_target } => {
                if *then_target == succ {
                    *then_target = new_block;
                }
                if *else_target == succ {
                    *else_target = new_block;
                }
            }
            _ => unreachable!("edge without terminator"),
        }
        self.add_pred(new_block, pred);
        // Rewire succ's predecessor entry and phi incoming blocks.
        let preds = &mut self.blocks[succ.index()].preds;
        if let Some(entry) = preds.iter_mut().find(|p| **p == pred) {
            *entry = new_block;
        }
        for phi in self.phis(succ) {
            if let InstKind::Phi { preds } = &mut self.insts[phi.index()].kind
            {
                for p in preds.iter_mut().filter(|p| **p == pred) {
                    *p = new_block;
                }
            }
        }
        let goto = self.new_inst(
            InstKind::Goto { target: succ },
            TypeId::VOID,
            Vec::new(),
            "",
        );
        self.append_inst(new_block, goto);
        self.invalidate_cfg();
        new_block
    }

    /// Move an instruction to the end of another block. Moving a terminator
    /// re-points its targets' predecessor entries and phi incoming blocks.
    pub fn transfer_inst(&mut self, id: InstId, to: BlockId) {
        let from = self.insts[id.index()].block.take().expect("detached");
        self.blocks[from.index()].insts.retain(|i| *i != id);
        self.insts[id.index()].block = Some(to);
        self.blocks[to.index()].insts.push(id);
        if self.insts[id.index()].kind.is_terminator() {
            for succ in self.insts[id.index()].kind.targets() {
                for pred in &mut self.blocks[succ.index()].preds {
                    if *pred == from {
                        *pred = to;
                    }
                }
                for phi in self.phis(succ) {
                    self.set_phi_incoming_block(phi, from, to);
                }
            }
            self.invalidate_cfg();
        }
    }

    /// Move a non-terminator instruction to the front of another block,
    /// e.g. hoisting an alloca into the entry block.
    pub fn transfer_inst_to_front(&mut self, id: InstId, to: BlockId) {
        debug_assert!(!self.insts[id.index()].kind.is_terminator());
        let from = self.insts[id.index()].block.take().expect("detached");
        self.blocks[from.index()].insts.retain(|i| *i != id);
        self.insts[id.index()].block = Some(to);
        self.blocks[to.index()].insts.insert(0, id);
    }

    /// Move the instructions from `index` onward into a fresh block, which
    /// takes over the terminator and its outgoing edges. The original block
    /// is left without a terminator.
    pub fn split_block(
        &mut self,
        block: BlockId,
        index: usize,
        name: &str,
    ) -> BlockId {
        let new_block = self.add_block(name);
        let moved: Vec<InstId> =
            self.blocks[block.index()].insts.drain(index..).collect();
        for inst in &moved {
            self.insts[inst.index()].block = Some(new_block);
        }
        self.blocks[new_block.index()].insts = moved;
        // The terminator moved; its targets now have `new_block` as the
        // predecessor.
        for succ in self.successors(new_block) {
            for pred in &mut self.blocks[succ.index()].preds {
                if *pred == block {
                    *pred = new_block;
                }
            }
            for phi in self.phis(succ) {
                self.set_phi_incoming_block(phi, block, new_block);
            }
        }
        self.invalidate_cfg();
        new_block
    }

    // # Phis

    /// Incoming `(pred, value)` pairs of a phi.
    pub fn phi_args(&self, phi: InstId) -> Vec<(BlockId, Value)> {
        let inst = &self.insts[phi.index()];
        match &inst.kind {
            InstKind::Phi { preds } => {
                preds.iter().copied().zip(inst.operands.iter().copied()).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn phi_value_for(&self, phi: InstId, pred: BlockId) -> Option<Value> {
        self.phi_args(phi)
            .into_iter()
            .find(|(p, _)| *p == pred)
            .map(|(_, v)| v)
    }

    pub fn add_phi_arg(&mut self, phi: InstId, pred: BlockId, value: Value) {
        if let Value::Inst(def) = value {
            self.insts[def.index()].users.push(phi);
        }
        let inst = &mut self.insts[phi.index()];
        inst.operands.push(value);
        match &mut inst.kind {
            InstKind::Phi { preds } => preds.push(pred),
            _ => unreachable!("not a phi"),
        }
    }

    pub fn remove_phi_arg_for(&mut self, phi: InstId, pred: BlockId) {
        let index = {
            let inst = &self.insts[phi.index()];
            match &inst.kind {
                InstKind::Phi { preds } => {
                    preds.iter().position(|p| *p == pred)
                }
                _ => None,
            }
        };
        let Some(index) = index else { return };
        let value = self.insts[phi.index()].operands.remove(index);
        if let Value::Inst(def) = value {
            remove_one(&mut self.insts[def.index()].users, phi);
        }
        match &mut self.insts[phi.index()].kind {
            InstKind::Phi { preds } => {
                preds.remove(index);
            }
            _ => {}
        }
    }

    pub fn set_phi_incoming_block(
        &mut self,
        phi: InstId,
        from: BlockId,
        to: BlockId,
    ) {
        if let InstKind::Phi { preds } = &mut self.insts[phi.index()].kind {
            for pred in preds.iter_mut().filter(|p| **p == from) {
                *pred = to;
            }
        }
    }

    // # Analysis caches

    /// Drop derived CFG information. Called by every structural mutator.
    pub fn invalidate_cfg(&mut self) {
        self.dom_cache = None;
        self.lnf_cache = None;
    }

    /// Dominator tree, dominance frontier and related queries, computed on
    /// demand and cached until the CFG changes.
    pub fn dominance(&mut self) -> Rc<DomInfo> {
        if let Some(cached) = &self.dom_cache {
            return Rc::clone(cached);
        }
        let info = Rc::new(DomInfo::compute(self));
        self.dom_cache = Some(Rc::clone(&info));
        info
    }

    /// Loop nesting forest, computed on demand and cached until the CFG
    /// changes.
    pub fn loop_forest(&mut self) -> Rc<LoopNestingForest> {
        if let Some(cached) = &self.lnf_cache {
            return Rc::clone(cached);
        }
        let dom = self.dominance();
        let forest = Rc::new(LoopNestingForest::compute(self, &dom));
        self.lnf_cache = Some(Rc::clone(&forest));
        forest
    }
}

fn remove_one<T: PartialEq>(vec: &mut Vec<T>, item: T) {
    if let Some(index) = vec.iter().position(|x| *x == item) {
        vec.remove(index);
    }
}

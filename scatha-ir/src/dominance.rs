//! Dominator tree and dominance frontier, Cooper-Harvey-Kennedy style.

use std::collections::HashMap;

use crate::function::Function;
use crate::value::BlockId;

/// Dominance information for one function. Derived data; recomputed after
/// any structural CFG change.
#[derive(Debug, Clone)]
pub struct DomInfo {
    /// Reachable blocks in reverse postorder; the entry comes first.
    rpo: Vec<BlockId>,
    /// Immediate dominator of every reachable block; the entry maps to
    /// itself.
    idom: HashMap<BlockId, BlockId>,
    children: HashMap<BlockId, Vec<BlockId>>,
    frontier: HashMap<BlockId, Vec<BlockId>>,
}

impl DomInfo {
    pub fn compute(function: &Function) -> Self {
        let rpo = reverse_postorder(function);
        let position: HashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let entry = function.entry();
        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(entry, entry);
        let mut changed = true;
        while changed {
            changed = false;
            for block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for pred in function.preds(*block) {
                    if !idom.contains_key(pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => *pred,
                        Some(current) => {
                            intersect(&idom, &position, *pred, current)
                        }
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(block) != Some(&new_idom) {
                        idom.insert(*block, new_idom);
                        changed = true;
                    }
                }
            }
        }
        let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for (block, dom) in &idom {
            if block != dom {
                children.entry(*dom).or_default().push(*block);
            }
        }
        for list in children.values_mut() {
            list.sort();
        }
        let mut frontier: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for block in &rpo {
            let preds = function.preds(*block);
            if preds.len() < 2 {
                continue;
            }
            let Some(target_idom) = idom.get(block).copied() else { continue };
            for pred in preds {
                if !idom.contains_key(pred) {
                    continue;
                }
                let mut runner = *pred;
                while runner != target_idom {
                    let entry = frontier.entry(runner).or_default();
                    if !entry.contains(block) {
                        entry.push(*block);
                    }
                    let next = idom[&runner];
                    if next == runner {
                        break;
                    }
                    runner = next;
                }
            }
        }
        tracing::trace!(blocks = rpo.len(), "dominance computed");
        Self { rpo, idom, children, frontier }
    }

    /// Reachable blocks in reverse postorder.
    pub fn reverse_postorder(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Reachable blocks in postorder.
    pub fn postorder(&self) -> Vec<BlockId> {
        self.rpo.iter().rev().copied().collect()
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.idom.contains_key(&block)
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        let dom = *self.idom.get(&block)?;
        (dom != block).then_some(dom)
    }

    /// Children of `block` in the dominator tree.
    pub fn dom_children(&self, block: BlockId) -> &[BlockId] {
        self.children.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `true` if every path from the entry to `b` passes through `a`.
    /// Every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.idom.contains_key(&b) {
            return false;
        }
        let mut runner = b;
        loop {
            if runner == a {
                return true;
            }
            let next = self.idom[&runner];
            if next == runner {
                return false;
            }
            runner = next;
        }
    }

    /// The set of blocks dominating `block`, from the block itself up to the
    /// entry.
    pub fn dominator_set(&self, block: BlockId) -> Vec<BlockId> {
        let mut set = Vec::new();
        if !self.idom.contains_key(&block) {
            return set;
        }
        let mut runner = block;
        loop {
            set.push(runner);
            let next = self.idom[&runner];
            if next == runner {
                return set;
            }
            runner = next;
        }
    }

    /// Dominance frontier of `block`.
    pub fn frontier(&self, block: BlockId) -> &[BlockId] {
        self.frontier.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Dominator-tree preorder starting at the entry.
    pub fn dom_tree_preorder(&self) -> Vec<BlockId> {
        let Some(entry) = self.rpo.first() else { return Vec::new() };
        let mut order = Vec::with_capacity(self.rpo.len());
        let mut stack = vec![*entry];
        while let Some(block) = stack.pop() {
            order.push(block);
            for child in self.dom_children(block).iter().rev() {
                stack.push(*child);
            }
        }
        order
    }
}

fn reverse_postorder(function: &Function) -> Vec<BlockId> {
    let mut marked: std::collections::HashSet<BlockId> =
        std::collections::HashSet::new();
    let mut postorder = Vec::new();
    // Iterative DFS with an explicit phase marker.
    let mut stack = vec![(function.entry(), false)];
    while let Some((block, expanded)) = stack.pop() {
        if expanded {
            postorder.push(block);
            continue;
        }
        if !marked.insert(block) {
            continue;
        }
        stack.push((block, true));
        for succ in function.successors(block).into_iter().rev() {
            if !marked.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }
    postorder.reverse();
    postorder
}

fn intersect(
    idom: &HashMap<BlockId, BlockId>,
    position: &HashMap<BlockId, usize>,
    a: BlockId,
    b: BlockId,
) -> BlockId {
    let mut a = a;
    let mut b = b;
    while a != b {
        while position[&a] > position[&b] {
            a = idom[&a];
        }
        while position[&b] > position[&a] {
            b = idom[&b];
        }
    }
    a
}

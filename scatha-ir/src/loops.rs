//! Loop nesting forest.
//!
//! Nodes correspond to loop header blocks. For every loop the forest caches
//! the member blocks, the latch/entering/exiting/exit block sets and the
//! induction variable candidates found by def-use walking the header phis.

use std::collections::{HashMap, HashSet};

use crate::dominance::DomInfo;
use crate::function::Function;
use crate::value::{ArithmeticOp, BlockId, InstId, InstKind, Value};

/// Handle to a loop in the forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub(crate) u32);

/// One natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    pub parent: Option<LoopId>,
    pub children: Vec<LoopId>,
    /// Member blocks including the header.
    pub inner_blocks: Vec<BlockId>,
    /// In-loop predecessors of the header.
    pub latches: Vec<BlockId>,
    /// Out-of-loop predecessors of the header.
    pub entering_blocks: Vec<BlockId>,
    /// Member blocks with a successor outside the loop.
    pub exiting_blocks: Vec<BlockId>,
    /// Non-member blocks with a predecessor inside the loop.
    pub exit_blocks: Vec<BlockId>,
    /// Header phis of the shape `phi(init, iv op stride)`.
    pub induction_variables: Vec<InstId>,
}

impl Loop {
    /// A node is a proper loop iff it has a back edge into its header.
    pub fn is_proper_loop(&self) -> bool {
        !self.latches.is_empty()
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.inner_blocks.contains(&block)
    }
}

/// Forest of natural loops of one function.
#[derive(Debug, Clone, Default)]
pub struct LoopNestingForest {
    loops: Vec<Loop>,
    roots: Vec<LoopId>,
    /// Innermost loop of each member block.
    block_map: HashMap<BlockId, LoopId>,
}

impl LoopNestingForest {
    pub fn compute(function: &Function, dom: &DomInfo) -> Self {
        // Group back edges by header.
        let mut latches_by_header: HashMap<BlockId, Vec<BlockId>> =
            HashMap::new();
        for block in dom.reverse_postorder() {
            for succ in function.successors(*block) {
                if dom.dominates(succ, *block) {
                    latches_by_header.entry(succ).or_default().push(*block);
                }
            }
        }
        let mut loops = Vec::new();
        let mut headers: Vec<_> = latches_by_header.keys().copied().collect();
        headers.sort();
        for header in headers {
            let latches = latches_by_header[&header].clone();
            let inner_blocks = natural_loop(function, header, &latches);
            let member: HashSet<BlockId> = inner_blocks.iter().copied().collect();
            let entering_blocks = function
                .preds(header)
                .iter()
                .copied()
                .filter(|pred| !member.contains(pred))
                .collect();
            let mut exiting_blocks = Vec::new();
            let mut exit_blocks = Vec::new();
            for block in &inner_blocks {
                for succ in function.successors(*block) {
                    if !member.contains(&succ) {
                        if !exiting_blocks.contains(block) {
                            exiting_blocks.push(*block);
                        }
                        if !exit_blocks.contains(&succ) {
                            exit_blocks.push(succ);
                        }
                    }
                }
            }
            let induction_variables =
                find_induction_variables(function, header, &member);
            loops.push(Loop {
                header,
                parent: None,
                children: Vec::new(),
                inner_blocks,
                latches,
                entering_blocks,
                exiting_blocks,
                exit_blocks,
                induction_variables,
            });
        }
        // Nest loops: the parent is the smallest strictly containing loop.
        let mut order: Vec<usize> = (0..loops.len()).collect();
        order.sort_by_key(|i| loops[*i].inner_blocks.len());
        for (pos, &i) in order.iter().enumerate() {
            for &candidate in &order[pos + 1..] {
                if loops[candidate].inner_blocks.contains(&loops[i].header) {
                    loops[i].parent = Some(LoopId(candidate as u32));
                    break;
                }
            }
        }
        for index in 0..loops.len() {
            if let Some(parent) = loops[index].parent {
                let id = LoopId(index as u32);
                loops[parent.0 as usize].children.push(id);
            }
        }
        let roots = (0..loops.len() as u32)
            .map(LoopId)
            .filter(|id| loops[id.0 as usize].parent.is_none())
            .collect();
        // Innermost loop per block: smaller loops win.
        let mut block_map = HashMap::new();
        for &i in order.iter().rev() {
            for block in &loops[i].inner_blocks {
                block_map.insert(*block, LoopId(i as u32));
            }
        }
        Self { loops, roots, block_map }
    }

    pub fn loop_ids(&self) -> impl Iterator<Item = LoopId> {
        (0..self.loops.len() as u32).map(LoopId)
    }

    pub fn get(&self, id: LoopId) -> &Loop {
        &self.loops[id.0 as usize]
    }

    pub fn roots(&self) -> &[LoopId] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Innermost loop containing `block`.
    pub fn loop_of(&self, block: BlockId) -> Option<LoopId> {
        self.block_map.get(&block).copied()
    }

    /// Loop headed by `header`, if any.
    pub fn loop_with_header(&self, header: BlockId) -> Option<LoopId> {
        self.loop_ids().find(|id| self.get(*id).header == header)
    }

    /// Forest in breadth-first order over the nesting, outermost loops
    /// first.
    pub fn bfs_order(&self) -> Vec<LoopId> {
        let mut order = Vec::with_capacity(self.loops.len());
        let mut queue: std::collections::VecDeque<LoopId> =
            self.roots.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.get(id).children.iter().copied());
        }
        order
    }
}

/// Backward walk from the latches, stopping at the header.
fn natural_loop(
    function: &Function,
    header: BlockId,
    latches: &[BlockId],
) -> Vec<BlockId> {
    let mut member: HashSet<BlockId> = HashSet::new();
    member.insert(header);
    let mut stack: Vec<BlockId> = latches.to_vec();
    while let Some(block) = stack.pop() {
        if member.insert(block) {
            stack.extend(function.preds(block).iter().copied());
        }
    }
    let mut blocks = vec![header];
    blocks.extend(member.into_iter().filter(|b| *b != header));
    blocks.sort();
    blocks
}

/// A header phi is an induction variable candidate if its in-loop operand is
/// an add/sub/mul whose operand chain leads back to the phi.
fn find_induction_variables(
    function: &Function,
    header: BlockId,
    member: &HashSet<BlockId>,
) -> Vec<InstId> {
    let mut candidates = Vec::new();
    for phi in function.phis(header) {
        for (pred, value) in function.phi_args(phi) {
            if !member.contains(&pred) {
                continue;
            }
            let Some(def) = value.as_inst() else { continue };
            let InstKind::Arithmetic(op) = function.inst(def).kind else {
                continue;
            };
            let closes_cycle = matches!(
                op,
                ArithmeticOp::Add | ArithmeticOp::Sub | ArithmeticOp::Mul
            ) && function
                .inst(def)
                .operands
                .iter()
                .any(|operand| *operand == Value::Inst(phi));
            if closes_cycle {
                candidates.push(phi);
                break;
            }
        }
    }
    candidates
}

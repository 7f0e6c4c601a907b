//! Call graph with strongly connected component quotient.
//!
//! Nodes are functions; edges carry the concrete call sites. Components are
//! computed with Tarjan's algorithm. The inliner mutates the graph through
//! [`SccCallGraph::remove_call`] and [`SccCallGraph::recompute_callees`] and
//! reacts to component splits.

use std::collections::{HashMap, HashSet};

use crate::module::Module;
use crate::value::{FuncRef, InstId, InstKind, Value};

/// Handle to a strongly connected component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SccId(pub(crate) u32);

/// Result of removing a call edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Other call sites between the two functions remain.
    Unchanged,
    /// The last call site of the edge was removed.
    CallEdgeRemoved,
    /// Removing the edge split the component into the returned new
    /// components.
    SplitScc(Vec<SccId>),
}

/// Result of rescanning a function for call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecomputeResult {
    Unchanged,
    /// New callees appeared; the affected components were merged or the
    /// graph changed shape.
    NewCallees,
}

#[derive(Debug, Clone, Default)]
struct Node {
    callees: HashMap<FuncRef, Vec<InstId>>,
    callers: HashSet<FuncRef>,
}

/// The quotient call graph.
#[derive(Debug, Default)]
pub struct SccCallGraph {
    nodes: HashMap<FuncRef, Node>,
    sccs: Vec<Vec<FuncRef>>,
    scc_of: HashMap<FuncRef, SccId>,
    /// Retired component ids after splits.
    dead_sccs: HashSet<SccId>,
}

impl SccCallGraph {
    /// Build the graph for a whole module.
    pub fn compute(module: &Module) -> Self {
        let mut graph = Self::default();
        for func in module.function_refs() {
            graph.nodes.entry(func).or_default();
            for (callee, site) in call_sites(module, func) {
                graph.nodes.entry(func).or_default().callees
                    .entry(callee)
                    .or_default()
                    .push(site);
                graph.nodes.entry(callee).or_default().callers.insert(func);
            }
        }
        graph.recompute_sccs();
        graph
    }

    fn recompute_sccs(&mut self) {
        self.sccs.clear();
        self.scc_of.clear();
        self.dead_sccs.clear();
        let mut tarjan = Tarjan {
            graph: &self.nodes,
            index: 0,
            indices: HashMap::new(),
            lowlink: HashMap::new(),
            on_stack: HashSet::new(),
            stack: Vec::new(),
            sccs: Vec::new(),
        };
        let mut roots: Vec<FuncRef> = self.nodes.keys().copied().collect();
        roots.sort();
        for func in roots {
            if !tarjan.indices.contains_key(&func) {
                tarjan.strongconnect(func);
            }
        }
        self.sccs = tarjan.sccs;
        for (index, scc) in self.sccs.iter().enumerate() {
            for func in scc {
                self.scc_of.insert(*func, SccId(index as u32));
            }
        }
    }

    pub fn scc_ids(&self) -> impl Iterator<Item = SccId> + '_ {
        (0..self.sccs.len() as u32)
            .map(SccId)
            .filter(|id| !self.dead_sccs.contains(id))
    }

    pub fn functions_of(&self, scc: SccId) -> &[FuncRef] {
        &self.sccs[scc.0 as usize]
    }

    pub fn scc_of(&self, func: FuncRef) -> SccId {
        self.scc_of[&func]
    }

    pub fn callees(&self, func: FuncRef) -> Vec<FuncRef> {
        let mut callees: Vec<FuncRef> =
            self.nodes[&func].callees.keys().copied().collect();
        callees.sort();
        callees
    }

    pub fn callers(&self, func: FuncRef) -> Vec<FuncRef> {
        let mut callers: Vec<FuncRef> =
            self.nodes[&func].callers.iter().copied().collect();
        callers.sort();
        callers
    }

    pub fn call_sites_of(&self, caller: FuncRef, callee: FuncRef) -> &[InstId] {
        self.nodes[&caller]
            .callees
            .get(&callee)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// A function is a leaf if it calls no one (itself excluded).
    pub fn is_leaf(&self, func: FuncRef) -> bool {
        self.nodes[&func].callees.keys().all(|callee| *callee == func)
    }

    /// Components whose members call into `scc`, excluding `scc` itself.
    pub fn scc_predecessors(&self, scc: SccId) -> Vec<SccId> {
        let mut preds = HashSet::new();
        for func in self.functions_of(scc) {
            for caller in &self.nodes[func].callers {
                let caller_scc = self.scc_of[caller];
                if caller_scc != scc {
                    preds.insert(caller_scc);
                }
            }
        }
        let mut preds: Vec<SccId> = preds.into_iter().collect();
        preds.sort();
        preds
    }

    /// Components whose members are called from `scc`, excluding `scc`.
    pub fn scc_successors(&self, scc: SccId) -> Vec<SccId> {
        let mut succs = HashSet::new();
        for func in self.functions_of(scc) {
            for callee in self.nodes[func].callees.keys() {
                let callee_scc = self.scc_of[callee];
                if callee_scc != scc {
                    succs.insert(callee_scc);
                }
            }
        }
        let mut succs: Vec<SccId> = succs.into_iter().collect();
        succs.sort();
        succs
    }

    /// Sinks of the quotient graph: components without successors.
    pub fn sinks(&self) -> Vec<SccId> {
        self.scc_ids()
            .filter(|scc| self.scc_successors(*scc).is_empty())
            .collect()
    }

    /// Remove one call site. If it was the last site of the edge, the edge
    /// disappears; removing an intra-component edge may split the component.
    pub fn remove_call(
        &mut self,
        caller: FuncRef,
        callee: FuncRef,
        site: InstId,
    ) -> Modification {
        let sites = self
            .nodes
            .get_mut(&caller)
            .and_then(|n| n.callees.get_mut(&callee));
        let Some(sites) = sites else { return Modification::Unchanged };
        sites.retain(|s| *s != site);
        if !sites.is_empty() {
            return Modification::Unchanged;
        }
        self.nodes.get_mut(&caller).unwrap().callees.remove(&callee);
        self.nodes.get_mut(&callee).unwrap().callers.remove(&caller);
        let scc = self.scc_of[&caller];
        if scc != self.scc_of[&callee] {
            return Modification::CallEdgeRemoved;
        }
        // The edge was inside a component; check whether it still holds
        // together.
        let members: Vec<FuncRef> = self.functions_of(scc).to_vec();
        let new_components = tarjan_subgraph(&self.nodes, &members);
        if new_components.len() <= 1 {
            return Modification::CallEdgeRemoved;
        }
        self.dead_sccs.insert(scc);
        let mut new_ids = Vec::new();
        for component in new_components {
            let id = SccId(self.sccs.len() as u32);
            for func in &component {
                self.scc_of.insert(*func, id);
            }
            self.sccs.push(component);
            new_ids.push(id);
        }
        Modification::SplitScc(new_ids)
    }

    /// Rescan `func` for call sites after local optimization and record any
    /// newly discovered callees.
    pub fn recompute_callees(
        &mut self,
        module: &Module,
        func: FuncRef,
    ) -> RecomputeResult {
        let fresh: HashMap<FuncRef, Vec<InstId>> = {
            let mut map: HashMap<FuncRef, Vec<InstId>> = HashMap::new();
            for (callee, site) in call_sites(module, func) {
                map.entry(callee).or_default().push(site);
            }
            map
        };
        let old = std::mem::take(&mut self.nodes.get_mut(&func).unwrap().callees);
        let new_callees: Vec<FuncRef> = fresh
            .keys()
            .filter(|callee| !old.contains_key(callee))
            .copied()
            .collect();
        self.nodes.get_mut(&func).unwrap().callees = fresh.clone();
        for callee in fresh.keys() {
            self.nodes.entry(*callee).or_default().callers.insert(func);
        }
        for callee in old.keys() {
            if !fresh.contains_key(callee) {
                self.nodes.get_mut(callee).unwrap().callers.remove(&func);
            }
        }
        if new_callees.is_empty() {
            RecomputeResult::Unchanged
        } else {
            // New edges can merge components; recompute the quotient.
            self.recompute_sccs();
            RecomputeResult::NewCallees
        }
    }
}

/// Direct call sites `(callee, call instruction)` of one function.
fn call_sites(
    module: &Module,
    func: FuncRef,
) -> Vec<(FuncRef, InstId)> {
    let function = module.function(func);
    let mut sites = Vec::new();
    for inst in function.inst_ids() {
        if !matches!(function.inst(inst).kind, InstKind::Call) {
            continue;
        }
        if let Some(Value::Function(callee)) =
            function.inst(inst).operands.first()
        {
            sites.push((*callee, inst));
        }
    }
    sites
}

struct Tarjan<'a> {
    graph: &'a HashMap<FuncRef, Node>,
    index: u32,
    indices: HashMap<FuncRef, u32>,
    lowlink: HashMap<FuncRef, u32>,
    on_stack: HashSet<FuncRef>,
    stack: Vec<FuncRef>,
    sccs: Vec<Vec<FuncRef>>,
}

impl Tarjan<'_> {
    fn strongconnect(&mut self, v: FuncRef) {
        self.indices.insert(v, self.index);
        self.lowlink.insert(v, self.index);
        self.index += 1;
        self.stack.push(v);
        self.on_stack.insert(v);
        let mut callees: Vec<FuncRef> =
            self.graph[&v].callees.keys().copied().collect();
        callees.sort();
        for w in callees {
            if !self.indices.contains_key(&w) {
                self.strongconnect(w);
                let low = self.lowlink[&v].min(self.lowlink[&w]);
                self.lowlink.insert(v, low);
            } else if self.on_stack.contains(&w) {
                let low = self.lowlink[&v].min(self.indices[&w]);
                self.lowlink.insert(v, low);
            }
        }
        if self.lowlink[&v] == self.indices[&v] {
            let mut component = Vec::new();
            loop {
                let w = self.stack.pop().unwrap();
                self.on_stack.remove(&w);
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort();
            self.sccs.push(component);
        }
    }
}

/// Tarjan restricted to `members`, used to re-split a single component.
fn tarjan_subgraph(
    nodes: &HashMap<FuncRef, Node>,
    members: &[FuncRef],
) -> Vec<Vec<FuncRef>> {
    let member_set: HashSet<FuncRef> = members.iter().copied().collect();
    let restricted: HashMap<FuncRef, Node> = members
        .iter()
        .map(|func| {
            let node = &nodes[func];
            let callees = node
                .callees
                .iter()
                .filter(|(callee, _)| member_set.contains(callee))
                .map(|(callee, sites)| (*callee, sites.clone()))
                .collect();
            (*func, Node { callees, callers: HashSet::new() })
        })
        .collect();
    let mut tarjan = Tarjan {
        graph: &restricted,
        index: 0,
        indices: HashMap::new(),
        lowlink: HashMap::new(),
        on_stack: HashSet::new(),
        stack: Vec::new(),
        sccs: Vec::new(),
    };
    let mut roots = members.to_vec();
    roots.sort();
    for func in roots {
        if !tarjan.indices.contains_key(&func) {
            tarjan.strongconnect(func);
        }
    }
    tarjan.sccs
}

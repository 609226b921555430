//! The module's internal call graph, used only to compute each function's
//! caller count (spec §4.D). Built fresh per analysis pass — there is no
//! incremental update, since the criticality analyzer reruns at the start
//! of every cycle anyway.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use obfx_ir::{Callee, InstKind, Module};

/// A directed graph of direct-call edges between functions defined in one
/// module.
pub struct CallGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl CallGraph {
    /// Builds the call graph for `module`: one node per function (defined
    /// or declared), one edge per direct call site.
    #[must_use]
    pub fn build(module: &Module) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for name in module.functions.keys() {
            let idx = graph.add_node(name.clone());
            index.insert(name.clone(), idx);
        }
        for func in module.defined_functions() {
            let caller_idx = index[&func.name];
            for (block_id, i) in func.all_instructions() {
                let inst = &func.blocks[&block_id].instructions[i];
                if let InstKind::Call { callee: Callee::Direct(name), .. } = &inst.kind {
                    if let Some(&callee_idx) = index.get(name) {
                        graph.add_edge(caller_idx, callee_idx, ());
                    }
                }
            }
        }
        Self { graph, index }
    }

    /// Number of distinct functions with at least one direct call to
    /// `name`. Multiple call sites within the same caller count once.
    #[must_use]
    pub fn caller_count(&self, name: &str) -> u32 {
        let Some(&idx) = self.index.get(name) else { return 0 };
        self.graph.neighbors_directed(idx, Direction::Incoming).collect::<HashSet<_>>().len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::{Function, Linkage, Type};

    #[test]
    fn counts_distinct_callers_not_call_sites() {
        let mut module = Module::new("m", "x86_64-unknown-linux-gnu", "e-m:e-p270:32:32");
        let mut callee = Function::new("helper", vec![], Type::Void, Linkage::Internal);
        let entry = callee.entry;
        let ret = obfx_ir::FunctionBuilder::new(&mut callee).ret(None);
        obfx_ir::append(&mut callee, entry, ret);
        module.functions.insert(callee.name.clone(), callee);

        let mut caller = Function::new("main", vec![], Type::Void, Linkage::External);
        let entry = caller.entry;
        for _ in 0..3 {
            let (_, call) =
                obfx_ir::FunctionBuilder::new(&mut caller).call(Callee::Direct("helper".to_string()), vec![], Type::Void);
            obfx_ir::append(&mut caller, entry, call);
        }
        let ret = obfx_ir::FunctionBuilder::new(&mut caller).ret(None);
        obfx_ir::append(&mut caller, entry, ret);
        module.functions.insert(caller.name.clone(), caller);

        let graph = CallGraph::build(&module);
        assert_eq!(graph.caller_count("helper"), 1);
        assert_eq!(graph.caller_count("main"), 0);
        assert_eq!(graph.caller_count("missing"), 0);
    }
}

//! The criticality analyzer (spec §4.D): scores each function's complexity
//! and sensitivity, counts its callers, and classifies it into one of four
//! levels the configuration resolver uses to drive auto-select.

#![forbid(unsafe_code)]

pub mod callgraph;
pub mod sensitivity;

use obfx_ir::{Function, Module};

use callgraph::CallGraph;

/// How aggressively a function should be obfuscated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CriticalityLevel {
    /// Small, widely-called utility — cheapest techniques only.
    Minimal,
    /// Neither flagged as sensitive nor small — the default.
    Standard,
    /// Sensitive-looking or structurally complex.
    Important,
    /// Contains a program entry point, or scores very high on sensitivity.
    Critical,
}

/// Name spellings treated as a program entry point regardless of case.
const ENTRY_POINT_SYNONYMS: &[&str] = &["main", "wmain", "_start", "entrypoint", "entry_point", "dllmain"];

/// Per-function output of the criticality analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionAnalysis {
    /// Name of the analyzed function.
    pub name: String,
    /// Classification derived from the fields below.
    pub level: CriticalityLevel,
    /// Cyclomatic complexity: CFG edges − nodes + 2, clamped to at least 1.
    pub complexity: u32,
    /// Weighted name/API sensitivity score.
    pub sensitivity: u32,
    /// Number of distinct functions in the module that call this one
    /// directly.
    pub caller_count: u32,
}

/// Analyzes every defined function in `module`. Recomputed at the start of
/// each cycle by the pipeline driver — nothing here is cached across
/// calls, since the module changes shape between cycles.
#[must_use]
pub fn analyze_module(module: &Module) -> Vec<FunctionAnalysis> {
    let graph = CallGraph::build(module);
    module.defined_functions().map(|f| analyze_function(f, &graph)).collect()
}

/// Analyzes a single function, given a call graph already built over its
/// module.
#[must_use]
pub fn analyze_function(func: &Function, graph: &CallGraph) -> FunctionAnalysis {
    let complexity = cyclomatic_complexity(func);
    let sensitivity = sensitivity::score(func);
    let caller_count = graph.caller_count(&func.name);
    let level = classify(&func.name, sensitivity, complexity, caller_count);
    FunctionAnalysis { name: func.name.clone(), level, complexity, sensitivity, caller_count }
}

/// `edges - nodes + 2`, clamped to at least 1 (a single-block function with
/// no branches still counts as complexity 1).
#[must_use]
pub fn cyclomatic_complexity(func: &Function) -> u32 {
    let nodes = func.blocks.len() as i64;
    let edges: i64 = func.blocks.values().map(|b| b.successors().len() as i64).sum();
    (edges - nodes + 2).max(1) as u32
}

fn classify(name: &str, sensitivity: u32, complexity: u32, caller_count: u32) -> CriticalityLevel {
    let lower = name.to_ascii_lowercase();
    if sensitivity >= 20 || ENTRY_POINT_SYNONYMS.contains(&lower.as_str()) {
        return CriticalityLevel::Critical;
    }
    if sensitivity >= 10 || complexity >= 15 {
        return CriticalityLevel::Important;
    }
    if complexity <= 3 && caller_count >= 3 {
        return CriticalityLevel::Minimal;
    }
    CriticalityLevel::Standard
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::{Callee, Function, Linkage, Type};

    #[test]
    fn main_is_always_critical() {
        let f = Function::new("main", vec![], Type::I32, Linkage::External);
        let graph = CallGraph::build(&Module::new("m", "x", "e"));
        let a = analyze_function(&f, &graph);
        assert_eq!(a.level, CriticalityLevel::Critical);
    }

    #[test]
    fn high_sensitivity_name_is_critical() {
        let f = Function::new("verify_license_key", vec![], Type::I32, Linkage::Internal);
        let graph = CallGraph::build(&Module::new("m", "x", "e"));
        let a = analyze_function(&f, &graph);
        assert_eq!(a.sensitivity, 22);
        assert_eq!(a.level, CriticalityLevel::Critical);
    }

    #[test]
    fn small_widely_called_helper_is_minimal() {
        let mut module = Module::new("m", "x86_64-unknown-linux-gnu", "e");
        let mut helper = Function::new("add_one", vec![], Type::I32, Linkage::Internal);
        let entry = helper.entry;
        let ret = obfx_ir::FunctionBuilder::new(&mut helper).ret(Some(obfx_ir::Operand::const_i64(1)));
        obfx_ir::append(&mut helper, entry, ret);
        module.functions.insert(helper.name.clone(), helper);

        for i in 0..3 {
            let mut caller = Function::new(format!("caller_{i}"), vec![], Type::Void, Linkage::Internal);
            let entry = caller.entry;
            let (_, call) = obfx_ir::FunctionBuilder::new(&mut caller).call(
                Callee::Direct("add_one".to_string()),
                vec![],
                Type::I32,
            );
            obfx_ir::append(&mut caller, entry, call);
            let ret = obfx_ir::FunctionBuilder::new(&mut caller).ret(None);
            obfx_ir::append(&mut caller, entry, ret);
            module.functions.insert(caller.name.clone(), caller);
        }

        let analyses = analyze_module(&module);
        let helper_analysis = analyses.iter().find(|a| a.name == "add_one").unwrap();
        assert_eq!(helper_analysis.caller_count, 3);
        assert_eq!(helper_analysis.level, CriticalityLevel::Minimal);
    }

    #[test]
    fn complexity_is_clamped_to_one() {
        let f = Function::new("leaf", vec![], Type::Void, Linkage::Internal);
        assert_eq!(cyclomatic_complexity(&f), 1);
    }
}

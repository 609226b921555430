//! Anti-analysis probe (spec §4.G): structurally identical to anti-debug,
//! but the synthesized check looks for known analysis-tool process/module
//! names instead of a debugger, and a detected hit returns `-2`.

use obfx_core::{Metric, Rng};
use obfx_ir::{
    append, create_global_variable, BinOp, Callee, Constant, Function, FunctionBuilder, ICmpPred, Linkage, Module,
    Operand, Type,
};
use obfx_pass::{ModulePass, PassOutcome};

use super::guard::{is_entry_point, sentinel_for, split_entry_for_check};

const CHECK_FN: &str = "__obfx_anti_analysis_check";
const WIN32_GET_MODULE_HANDLE: &str = "GetModuleHandleA";
const KNOWN_ANALYSIS_TOOLS: &[&str] = &["ida64.exe\0", "x64dbg.exe\0", "ollydbg.exe\0", "wireshark.exe\0"];

/// Injects a known-analysis-tool presence check into every entry-point-shaped
/// function.
#[derive(Debug, Default, Clone, Copy)]
pub struct AntiAnalysis;

fn build_check_function(module: &mut Module) -> Function {
    let mut check = Function::new(CHECK_FN, vec![], Type::I32, Linkage::Internal);
    check.generated = true;
    let entry = check.entry;

    if module.is_windows_shaped() {
        let name_globals: Vec<String> = KNOWN_ANALYSIS_TOOLS
            .iter()
            .map(|tool| {
                create_global_variable(
                    module,
                    "__obfx_tool_name",
                    Type::Array(Box::new(Type::I8), tool.len()),
                    Some(Constant::Bytes(tool.as_bytes().to_vec())),
                    Linkage::Private,
                    false,
                )
            })
            .collect();

        let insts = {
            let mut b = FunctionBuilder::new(&mut check);
            let mut insts = Vec::new();
            let mut accumulated: Option<obfx_ir::ValueId> = None;
            for name_global in &name_globals {
                let (ptr, gep) =
                    b.gep(Operand::Global(name_global.clone()), vec![Operand::Const(Constant::i32(0))], Type::I8.ptr());
                insts.push(gep);
                let (handle, call_inst) =
                    b.call(Callee::Direct(WIN32_GET_MODULE_HANDLE.to_string()), vec![Operand::Value(ptr)], Type::I32);
                insts.push(call_inst);
                let handle = handle.expect("non-void call");
                accumulated = Some(match accumulated {
                    None => handle,
                    Some(acc) => {
                        let (combined, or_inst) = b.binary(BinOp::Or, Operand::Value(acc), Operand::Value(handle), Type::I32);
                        insts.push(or_inst);
                        combined
                    }
                });
            }
            (insts, accumulated.expect("at least one known tool name"))
        };
        let (insts, accumulated) = insts;
        for inst in insts {
            append(&mut check, entry, inst);
        }
        let ret = FunctionBuilder::new(&mut check).ret(Some(Operand::Value(accumulated)));
        append(&mut check, entry, ret);
    } else {
        let ret = FunctionBuilder::new(&mut check).ret(Some(Operand::const_i64(0)));
        append(&mut check, entry, ret);
    }
    check
}

impl ModulePass for AntiAnalysis {
    fn name(&self) -> &'static str {
        "anti-analysis-probe"
    }

    fn metric(&self) -> Metric {
        Metric::AntiAnalysis
    }

    fn run(&self, module: &mut Module, _rng: &mut Rng) -> PassOutcome {
        let targets: Vec<String> =
            module.defined_functions().filter(|f| is_entry_point(&f.name) && !f.generated).map(|f| f.name.clone()).collect();
        if targets.is_empty() {
            return PassOutcome::unchanged();
        }

        if module.is_windows_shaped() && !module.functions.contains_key(WIN32_GET_MODULE_HANDLE) {
            module.functions.insert(
                WIN32_GET_MODULE_HANDLE.to_string(),
                Function::declaration(WIN32_GET_MODULE_HANDLE, vec![("name".to_string(), Type::I8.ptr())], Type::I32),
            );
        }
        if !module.functions.contains_key(CHECK_FN) {
            let check = build_check_function(module);
            module.functions.insert(CHECK_FN.to_string(), check);
        }

        let mut events = 0u64;
        for name in targets {
            let ret_ty = module.functions[&name].ret_ty.clone();
            let Some(func) = module.functions.get_mut(&name) else { continue };
            let (after_prologue, detected) = split_entry_for_check(func);

            let entry_insts = {
                let mut b = FunctionBuilder::new(func);
                let mut insts = Vec::new();
                let (flag, call_inst) = b.call(Callee::Direct(CHECK_FN.to_string()), vec![], Type::I32);
                insts.push(call_inst);
                let (cond, icmp) =
                    b.icmp(ICmpPred::Ne, Operand::Value(flag.expect("non-void call")), Operand::Const(Constant::i32(0)));
                insts.push(icmp);
                insts.push(b.cond_br(Operand::Value(cond), detected, after_prologue));
                insts
            };
            let entry = func.entry;
            for inst in entry_insts {
                append(func, entry, inst);
            }

            let sentinel = sentinel_for(&ret_ty, -2);
            let ret = FunctionBuilder::new(func).ret(sentinel);
            append(func, detected, ret);
            events += 1;
        }

        PassOutcome::changed(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::verify_module;

    fn module_with_main(triple: &str) -> Module {
        let mut m = Module::new("m", triple, "e-m:e-i64:64");
        let mut f = Function::new("main", vec![], Type::I32, Linkage::External);
        let entry = f.entry;
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::const_i64(0)));
        append(&mut f, entry, ret);
        m.functions.insert("main".to_string(), f);
        m
    }

    #[test]
    fn stubs_to_zero_on_non_windows_targets() {
        let mut m = module_with_main("x86_64-unknown-linux-gnu");
        let outcome = AntiAnalysis.run(&mut m, &mut Rng::from_seed(1));
        assert_eq!(outcome.events, 1);
        assert!(!m.functions.contains_key(WIN32_GET_MODULE_HANDLE));
        verify_module(&m).expect("injected probe must verify clean");
    }

    #[test]
    fn builds_a_module_presence_scan_on_windows_shaped_modules() {
        let mut m = module_with_main("x86_64-pc-windows-msvc");
        AntiAnalysis.run(&mut m, &mut Rng::from_seed(1));
        assert!(m.functions.contains_key(WIN32_GET_MODULE_HANDLE));
        assert!(m.globals.len() >= KNOWN_ANALYSIS_TOOLS.len());
        verify_module(&m).expect("injected probe must verify clean");
    }
}

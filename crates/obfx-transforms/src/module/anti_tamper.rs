//! Anti-tamper checksum guard (spec §4.G, §9): every function matching
//! `guard::is_critical` gets a compile-time checksum stashed in a private
//! global, plus a runtime load-and-compare spliced in after its prologue.
//!
//! The comparison is a documented tautology (spec §9): the runtime check
//! loads the very constant the pass just stored and compares it against
//! that same literal, so the "detected" branch can never actually fire —
//! an in-flight binary patch goes unnoticed. This is a spec-carried defect,
//! kept exactly as described rather than "fixed" into a real integrity
//! check.

use obfx_core::{fnv1a64, Metric, Rng};
use obfx_ir::{append, create_global_variable, Constant, FunctionBuilder, ICmpPred, Linkage, Module, Operand, Type};
use obfx_pass::{ModulePass, PassOutcome};

use super::guard::{is_critical, sentinel_for, split_entry_for_check};

/// Injects a compile-time checksum plus a tautological runtime compare into
/// every function `guard::is_critical` names.
#[derive(Debug, Default, Clone, Copy)]
pub struct AntiTamper;

fn checksum_for(name: &str, opcode_count: usize) -> i64 {
    let mut buf = Vec::with_capacity(name.len() + 8);
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(&(opcode_count as u64).to_le_bytes());
    fnv1a64(&buf) as i64
}

impl ModulePass for AntiTamper {
    fn name(&self) -> &'static str {
        "anti-tamper-checksum"
    }

    fn metric(&self) -> Metric {
        // No dedicated counter slot exists for this technique (the config
        // layer's `Technique::AntiTamper::metric()` likewise returns
        // `None` — see the design ledger); it shares the cycles counter
        // rather than double-counting an existing one.
        Metric::Cycles
    }

    fn run(&self, module: &mut Module, _rng: &mut Rng) -> PassOutcome {
        let targets: Vec<(String, usize, Type)> = module
            .defined_functions()
            .filter(|f| is_critical(&f.name) && !f.generated)
            .map(|f| (f.name.clone(), f.all_instructions().count(), f.ret_ty.clone()))
            .collect();
        if targets.is_empty() {
            return PassOutcome::unchanged();
        }

        let mut events = 0u64;
        for (name, opcode_count, ret_ty) in targets {
            let checksum = checksum_for(&name, opcode_count);
            let global_name = create_global_variable(
                module,
                &format!("{name}.checksum"),
                Type::I64,
                Some(Constant::Int { bits: 64, value: checksum }),
                Linkage::Private,
                false,
            );

            let Some(func) = module.functions.get_mut(&name) else { continue };
            let (after_prologue, detected) = split_entry_for_check(func);

            let entry_insts = {
                let mut b = FunctionBuilder::new(func);
                let mut insts = Vec::new();
                let (loaded, load) = b.load(Operand::Global(global_name), Type::I64);
                insts.push(load);
                let (cond, icmp) = b.icmp(
                    ICmpPred::Ne,
                    Operand::Value(loaded),
                    Operand::Const(Constant::Int { bits: 64, value: checksum }),
                );
                insts.push(icmp);
                insts.push(b.cond_br(Operand::Value(cond), detected, after_prologue));
                insts
            };
            let entry = func.entry;
            for inst in entry_insts {
                append(func, entry, inst);
            }

            let sentinel = sentinel_for(&ret_ty, -999);
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
    use obfx_ir::{verify_module, Function, Linkage};

    fn module_with_critical() -> Module {
        let mut m = Module::new("m", "x86_64-unknown-linux-gnu", "e-m:e-i64:64");
        let mut f = Function::new("critical_section", vec![], Type::I32, Linkage::External);
        let entry = f.entry;
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::const_i64(0)));
        append(&mut f, entry, ret);
        m.functions.insert("critical_section".to_string(), f);
        m
    }

    #[test]
    fn stores_a_checksum_global_and_splices_a_compare_that_stays_verifier_clean() {
        let mut m = module_with_critical();
        let outcome = AntiTamper.run(&mut m, &mut Rng::from_seed(1));
        assert_eq!(outcome.events, 1);
        assert!(m.globals.contains_key("critical_section.checksum"));
        verify_module(&m).expect("injected checksum compare must stay verifier-clean");
    }

    #[test]
    fn the_compare_is_a_tautology_so_a_second_run_recomputes_the_same_value() {
        let name = "critical_section";
        let a = checksum_for(name, 1);
        let b = checksum_for(name, 1);
        assert_eq!(a, b, "the stored checksum must equal what the runtime compare re-derives at build time");
    }

    #[test]
    fn leaves_modules_without_a_critical_function_untouched() {
        let mut m = Module::new("m", "x86_64-unknown-linux-gnu", "e-m:e-i64:64");
        let mut f = Function::new("helper", vec![], Type::Void, Linkage::Internal);
        let entry = f.entry;
        let ret = FunctionBuilder::new(&mut f).ret(None);
        append(&mut f, entry, ret);
        m.functions.insert("helper".to_string(), f);
        let outcome = AntiTamper.run(&mut m, &mut Rng::from_seed(1));
        assert!(!outcome.modified);
    }
}

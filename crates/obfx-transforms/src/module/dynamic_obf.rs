//! Dynamic obfuscation nuisance (spec §4.G, §9): emits one internal
//! function that mutates a small local buffer with XOR and registers it as
//! a low-priority module constructor. It has no behavioral effect on the
//! rest of the program — it exists purely to give a static analyzer one
//! more function to puzzle over. That is the point, not a bug; keep it a
//! no-op rather than giving it anything to actually affect.

use obfx_core::{Metric, Rng};
use obfx_ir::{
    append, append_global_constructor, BinOp, CastOp, Function, FunctionBuilder, Linkage, Module, Operand, Type,
};
use obfx_pass::{ModulePass, PassOutcome};

const CTOR_NAME: &str = "__obfx_dynamic_obf";
/// Runs after every other registered constructor (spec §4.H: final cycle
/// only, lowest priority so string-decryption and other startup work that
/// real code depends on has already run).
const CTOR_PRIORITY: u32 = u32::MAX;

/// Registers the dynamic-obfuscation nuisance constructor. Idempotent: a
/// second run sees the constructor already present and leaves it alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicObf;

fn build_ctor() -> Function {
    let mut f = Function::new(CTOR_NAME, vec![], Type::Void, Linkage::Internal);
    f.generated = true;
    let entry = f.entry;

    let insts = {
        let mut b = FunctionBuilder::new(&mut f);
        let mut insts = Vec::new();
        let (buf, alloca) = b.alloca(Type::Array(Box::new(Type::I8), 8));
        insts.push(alloca);
        let (buf_ptr, cast) = b.cast(CastOp::BitCast, Operand::Value(buf), Type::I8.ptr());
        insts.push(cast);
        let (loaded, load) = b.load(Operand::Value(buf_ptr), Type::I8);
        insts.push(load);
        let (mutated, xor) = b.binary(BinOp::Xor, Operand::Value(loaded), Operand::const_i64(0x5a), Type::I8);
        insts.push(xor);
        insts.push(b.store(Operand::Value(buf_ptr), Operand::Value(mutated)));
        insts.push(b.ret(None));
        insts
    };
    for inst in insts {
        append(&mut f, entry, inst);
    }
    f
}

impl ModulePass for DynamicObf {
    fn name(&self) -> &'static str {
        "dynamic-obfuscation"
    }

    fn metric(&self) -> Metric {
        Metric::DynamicObfs
    }

    fn run(&self, module: &mut Module, _rng: &mut Rng) -> PassOutcome {
        if module.functions.contains_key(CTOR_NAME) {
            return PassOutcome::unchanged();
        }
        let ctor = build_ctor();
        module.functions.insert(CTOR_NAME.to_string(), ctor);
        append_global_constructor(module, CTOR_PRIORITY, CTOR_NAME);
        PassOutcome::changed(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::verify_module;

    #[test]
    fn registers_a_single_nuisance_constructor() {
        let mut m = Module::new("m", "x86_64-unknown-linux-gnu", "e-m:e-i64:64");
        let outcome = DynamicObf.run(&mut m, &mut Rng::from_seed(1));
        assert_eq!(outcome.events, 1);
        assert!(m.functions.contains_key(CTOR_NAME));
        assert_eq!(m.ctors.iter().filter(|c| c.function == CTOR_NAME).count(), 1);
        verify_module(&m).expect("nuisance constructor must stay verifier-clean");
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut m = Module::new("m", "x86_64-unknown-linux-gnu", "e-m:e-i64:64");
        DynamicObf.run(&mut m, &mut Rng::from_seed(1));
        let outcome = DynamicObf.run(&mut m, &mut Rng::from_seed(1));
        assert!(!outcome.modified);
        assert_eq!(m.ctors.iter().filter(|c| c.function == CTOR_NAME).count(), 1);
    }
}

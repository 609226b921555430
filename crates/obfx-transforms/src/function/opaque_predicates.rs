//! Control-flow opaque predicates (spec §4.F): every conditional branch's
//! condition is AND-ed with an always-true predicate computed from
//! reloaded local storage, so a later dead-code pass cannot fold it away.

use obfx_core::{Metric, Rng};
use obfx_ir::{BinOp, FunctionBuilder, ICmpPred, InstKind, Operand, Type};
use obfx_pass::{FunctionPass, PassOutcome};

/// Inserts `((n*(n+1)) mod 2) == 0`, always true, ANDed into every
/// conditional branch's condition.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaquePredicates;

impl FunctionPass for OpaquePredicates {
    fn name(&self) -> &'static str {
        "control-flow-opaque-predicates"
    }

    fn metric(&self) -> Metric {
        Metric::ControlFlowObfs
    }

    fn run(&self, func: &mut obfx_ir::Function, rng: &mut Rng) -> PassOutcome {
        let mut events = 0u64;
        for block_id in func.block_order() {
            let original_cond = match &func.blocks[&block_id].terminator().kind {
                InstKind::CondBr { cond, .. } => cond.clone(),
                _ => continue,
            };

            let n = (rng.next_u64() & 0x7FFF) as i64;
            let (insts, combined) = {
                let mut b = FunctionBuilder::new(func);
                let mut insts = Vec::with_capacity(8);
                let (ptr, alloca) = b.alloca(Type::I64);
                insts.push(alloca);
                insts.push(b.store(Operand::Value(ptr), Operand::const_i64(n)));
                let (loaded, load) = b.load(Operand::Value(ptr), Type::I64);
                insts.push(load);
                let (plus1, add) = b.binary(BinOp::Add, Operand::Value(loaded), Operand::const_i64(1), Type::I64);
                insts.push(add);
                let (prod, mul) =
                    b.binary(BinOp::Mul, Operand::Value(loaded), Operand::Value(plus1), Type::I64);
                insts.push(mul);
                let (rem, and_op) = b.binary(BinOp::And, Operand::Value(prod), Operand::const_i64(1), Type::I64);
                insts.push(and_op);
                let (pred, icmp) = b.icmp(ICmpPred::Eq, Operand::Value(rem), Operand::const_i64(0));
                insts.push(icmp);
                let (combined, and_cond) = b.binary(BinOp::And, original_cond.clone(), Operand::Value(pred), Type::I1);
                insts.push(and_cond);
                (insts, combined)
            };

            let term_idx = func.blocks[&block_id].instructions.len() - 1;
            obfx_ir::insert_many_at(func, block_id, term_idx, insts);
            if let InstKind::CondBr { cond, .. } = &mut func.blocks.get_mut(&block_id).expect("just visited").terminator_mut().kind
            {
                *cond = Operand::Value(combined);
            }
            events += 1;
        }
        PassOutcome::changed(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::{verify_function, Callee, Function, Linkage};

    fn branchy_function() -> Function {
        let mut f = Function::new("f", vec![("x".to_string(), Type::I32)], Type::I32, Linkage::External);
        let entry = f.entry;
        let then_bb = obfx_ir::create_block(&mut f);
        let else_bb = obfx_ir::create_block(&mut f);

        let (cond, icmp) = FunctionBuilder::new(&mut f).icmp(
            ICmpPred::Sgt,
            Operand::Value(obfx_ir::ValueId(0)),
            Operand::const_i64(0),
        );
        obfx_ir::append(&mut f, entry, icmp);
        let br = FunctionBuilder::new(&mut f).cond_br(Operand::Value(cond), then_bb, else_bb);
        obfx_ir::append(&mut f, entry, br);

        let ret1 = FunctionBuilder::new(&mut f).ret(Some(Operand::const_i64(1)));
        obfx_ir::append(&mut f, then_bb, ret1);
        let ret0 = FunctionBuilder::new(&mut f).ret(Some(Operand::const_i64(0)));
        obfx_ir::append(&mut f, else_bb, ret0);
        let _ = Callee::Direct("unused".to_string());
        f
    }

    #[test]
    fn rewrites_every_conditional_branch_and_stays_verifier_clean() {
        let mut f = branchy_function();
        let mut rng = Rng::from_seed(7);
        let outcome = OpaquePredicates.run(&mut f, &mut rng);
        assert!(outcome.modified);
        assert_eq!(outcome.events, 1);
        verify_function(&f).expect("opaque predicates must stay verifier-clean");
    }

    #[test]
    fn leaves_branch_free_functions_unmodified() {
        let mut f = Function::new("leaf", vec![], Type::Void, Linkage::Internal);
        let entry = f.entry;
        let ret = FunctionBuilder::new(&mut f).ret(None);
        obfx_ir::append(&mut f, entry, ret);
        let outcome = OpaquePredicates.run(&mut f, &mut Rng::from_seed(1));
        assert!(!outcome.modified);
    }
}

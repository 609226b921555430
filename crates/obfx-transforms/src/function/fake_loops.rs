//! Fake loop insertion (spec §4.F): detours a successor edge through a
//! dead self-loop that always exits in zero iterations.

use obfx_core::{Metric, Rng};
use obfx_ir::{BinOp, Function, FunctionBuilder, ICmpPred, Operand, Type};
use obfx_pass::{FunctionPass, PassOutcome};

/// Inserts up to `count` fake loops, each detouring one successor edge of
/// a block chosen from the function's pre-transform block set.
#[derive(Debug, Clone, Copy)]
pub struct FakeLoops {
    /// Number of fake loops to attempt to insert.
    pub count: u32,
}

impl FunctionPass for FakeLoops {
    fn name(&self) -> &'static str {
        "fake-loop-insertion"
    }

    fn metric(&self) -> Metric {
        Metric::FakeLoops
    }

    fn run(&self, func: &mut Function, rng: &mut Rng) -> PassOutcome {
        // Fixed snapshot: inserted fake-loop/fake-exit blocks are not
        // themselves hosts for further fake loops in this call.
        let eligible: Vec<_> = func.block_order().into_iter().filter(|&b| !func.succs(b).is_empty()).collect();
        if eligible.is_empty() {
            return PassOutcome::unchanged();
        }

        let mut events = 0u64;
        for _ in 0..self.count {
            let Some(idx) = rng.pick_index(eligible.len()) else { break };
            let from = eligible[idx];
            let succs = func.succs(from);
            let target_idx = rng.pick_index(succs.len()).unwrap_or(0);
            let orig_target = succs[target_idx];

            let fake_loop_id = obfx_ir::create_block(func);
            let fake_exit_id = obfx_ir::create_block(func);

            let n = (rng.next_u64() & 0x7FFF) as i64;
            let (pre_insts, false_pred) = {
                let mut b = FunctionBuilder::new(func);
                let mut insts = Vec::with_capacity(7);
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
                // `rem` is always 0 (n*(n+1) is always even), so `rem != 0`
                // is always false.
                let (pred, icmp) = b.icmp(ICmpPred::Ne, Operand::Value(rem), Operand::const_i64(0));
                insts.push(icmp);
                (insts, pred)
            };
            obfx_ir::insert_many_at(func, fake_loop_id, 0, pre_insts);
            let condbr = FunctionBuilder::new(func).cond_br(Operand::Value(false_pred), fake_loop_id, fake_exit_id);
            obfx_ir::append(func, fake_loop_id, condbr);

            let br_exit = FunctionBuilder::new(func).br(orig_target);
            obfx_ir::append(func, fake_exit_id, br_exit);

            obfx_ir::retarget_successor(func, from, orig_target, fake_loop_id);
            events += 1;
        }
        PassOutcome::changed(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::{verify_function, Linkage};

    fn two_block_function() -> Function {
        let mut f = Function::new("f", vec![], Type::Void, Linkage::Internal);
        let entry = f.entry;
        let exit_bb = obfx_ir::create_block(&mut f);
        let br = FunctionBuilder::new(&mut f).br(exit_bb);
        obfx_ir::append(&mut f, entry, br);
        let ret = FunctionBuilder::new(&mut f).ret(None);
        obfx_ir::append(&mut f, exit_bb, ret);
        f
    }

    #[test]
    fn detours_through_a_zero_iteration_dead_loop() {
        let mut f = two_block_function();
        let entry = f.entry;
        let mut rng = Rng::from_seed(11);
        let outcome = (FakeLoops { count: 1 }).run(&mut f, &mut rng);
        assert_eq!(outcome.events, 1);
        assert_eq!(f.blocks.len(), 4); // entry, exit, fake-loop, fake-exit
        assert_ne!(f.succs(entry), vec![]);
        verify_function(&f).unwrap();
    }

    #[test]
    fn return_only_function_gets_no_fake_loops() {
        let mut f = Function::new("leaf", vec![], Type::Void, Linkage::Internal);
        let entry = f.entry;
        let ret = FunctionBuilder::new(&mut f).ret(None);
        obfx_ir::append(&mut f, entry, ret);
        let outcome = (FakeLoops { count: 5 }).run(&mut f, &mut Rng::from_seed(1));
        assert!(!outcome.modified);
    }
}

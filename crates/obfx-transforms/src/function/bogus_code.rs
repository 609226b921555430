//! Bogus code insertion (spec §4.F, §8 property 8): dead
//! alloca/store/arithmetic tuples prepended to blocks large enough to
//! absorb them, sized from the configured percentage.

use obfx_core::{Metric, Rng};
use obfx_ir::{BinOp, Constant, Function, FunctionBuilder, Operand, Type};
use obfx_pass::{FunctionPass, PassOutcome};

/// Inserts dummy alloca/store/arithmetic tuples at the start of every
/// block with at least two instructions.
#[derive(Debug, Clone, Copy)]
pub struct BogusCode {
    /// Percentage of a block's instruction count to insert as dummy
    /// tuples (default 30).
    pub percent: u32,
}

impl FunctionPass for BogusCode {
    fn name(&self) -> &'static str {
        "bogus-code-generation"
    }

    fn metric(&self) -> Metric {
        Metric::BogusInstrs
    }

    fn run(&self, func: &mut Function, rng: &mut Rng) -> PassOutcome {
        let mut events = 0u64;
        for block_id in func.block_order() {
            let block_size = func.blocks[&block_id].instructions.len() as u64;
            if block_size < 2 {
                continue;
            }
            // spec §8 property 8: max(1, floor(N*P/100)).
            let count = ((block_size * u64::from(self.percent)) / 100).max(1);

            let mut insts = Vec::with_capacity(count as usize * 3);
            {
                let mut b = FunctionBuilder::new(func);
                for _ in 0..count {
                    let v = (rng.next_u32() & 0xFFFF) as i32;
                    let (ptr, alloca) = b.alloca(Type::I32);
                    insts.push(alloca);
                    insts.push(b.store(Operand::Value(ptr), Operand::Const(Constant::i32(v))));
                    let (_, dead_arith) = b.binary(
                        BinOp::Add,
                        Operand::Const(Constant::i32(v)),
                        Operand::Const(Constant::i32(1)),
                        Type::I32,
                    );
                    insts.push(dead_arith);
                }
            }
            obfx_ir::insert_many_at(func, block_id, 0, insts);
            events += count;
        }
        PassOutcome::changed(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::{verify_function, Linkage};

    fn two_instruction_function() -> Function {
        let mut f = Function::new("f", vec![], Type::I32, Linkage::Internal);
        let entry = f.entry;
        let (v, add) =
            FunctionBuilder::new(&mut f).binary(BinOp::Add, Operand::const_i64(1), Operand::const_i64(2), Type::I64);
        obfx_ir::append(&mut f, entry, add);
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::Value(v)));
        obfx_ir::append(&mut f, entry, ret);
        f
    }

    #[test]
    fn inserts_floor_percent_with_minimum_one() {
        let mut f = two_instruction_function();
        let mut rng = Rng::from_seed(3);
        let before = f.instruction_count();
        let outcome = (BogusCode { percent: 30 }).run(&mut f, &mut rng);
        // block size 2, 30% -> floor(0.6) = 0, clamped to 1 tuple of 3 insts.
        assert_eq!(outcome.events, 1);
        assert_eq!(f.instruction_count(), before + 3);
        verify_function(&f).unwrap();
    }

    #[test]
    fn single_instruction_block_is_untouched() {
        let mut f = Function::new("leaf", vec![], Type::Void, Linkage::Internal);
        let entry = f.entry;
        let ret = FunctionBuilder::new(&mut f).ret(None);
        obfx_ir::append(&mut f, entry, ret);
        let outcome = (BogusCode { percent: 30 }).run(&mut f, &mut Rng::from_seed(1));
        assert!(!outcome.modified);
    }
}

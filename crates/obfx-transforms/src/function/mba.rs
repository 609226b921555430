//! Mixed boolean arithmetic (spec §4.F): `add`/`sub` are rewritten into
//! bitwise-and-arithmetic identities that fold back to the same value but
//! no longer pattern-match a plain adder in a decompiler.

use obfx_core::{Metric, Rng};
use obfx_ir::{append, insert_many_at, BinOp, Function, FunctionBuilder, InstKind, Operand, Type};
use obfx_pass::{FunctionPass, PassOutcome};

/// Rewrites `add a, b` to `(a ^ b) + 2*(a & b)` and `sub a, b` to
/// `(a ^ b) - 2*(~a & b)`, repeated `level` times per matched instruction to
/// control how deeply the identity nests.
#[derive(Debug, Clone, Copy)]
pub struct Mba {
    /// Nesting depth (spec `mba_level`, default 3).
    pub level: u32,
}

impl FunctionPass for Mba {
    fn name(&self) -> &'static str {
        "mixed-boolean-arithmetic"
    }

    fn metric(&self) -> Metric {
        Metric::MbaTransforms
    }

    fn run(&self, func: &mut Function, _rng: &mut Rng) -> PassOutcome {
        let mut events = 0u64;
        for block_id in func.block_order() {
            let len = func.blocks[&block_id].instructions.len();
            let mut idx = 0;
            while idx < len.min(func.blocks[&block_id].instructions.len()) {
                let matched = match &func.blocks[&block_id].instructions[idx].kind {
                    InstKind::Binary { op: BinOp::Add, lhs, rhs } => Some((true, lhs.clone(), rhs.clone())),
                    InstKind::Binary { op: BinOp::Sub, lhs, rhs } => Some((false, lhs.clone(), rhs.clone())),
                    _ => None,
                };
                let Some((is_add, lhs, rhs)) = matched else {
                    idx += 1;
                    continue;
                };
                let ty = func.blocks[&block_id].instructions[idx].ty.clone();
                let result = func.blocks[&block_id].instructions[idx].result;

                let mut last = (lhs, rhs);
                let mut insts = Vec::new();
                for _ in 0..self.level.max(1) {
                    let (a, b) = last.clone();
                    let mut b_ = FunctionBuilder::new(func);
                    let (xor_v, xor_i) = b_.binary(BinOp::Xor, a.clone(), b.clone(), ty.clone());
                    insts.push(xor_i);
                    if is_add {
                        let (and_v, and_i) = b_.binary(BinOp::And, a, b, ty.clone());
                        insts.push(and_i);
                        let (two_and, mul_i) = b_.binary(BinOp::Mul, Operand::Value(and_v), Operand::const_i64(2), ty.clone());
                        insts.push(mul_i);
                        let (sum, add_i) = b_.binary(BinOp::Add, Operand::Value(xor_v), Operand::Value(two_and), ty.clone());
                        insts.push(add_i);
                        last = (Operand::Value(sum), Operand::const_i64(0));
                    } else {
                        let (not_a, xor_not) = b_.binary(BinOp::Xor, a, Operand::const_i64(-1), ty.clone());
                        insts.push(xor_not);
                        let (not_a_and_b, and_i) = b_.binary(BinOp::And, Operand::Value(not_a), b, ty.clone());
                        insts.push(and_i);
                        let (twice, mul_i) =
                            b_.binary(BinOp::Mul, Operand::Value(not_a_and_b), Operand::const_i64(2), ty.clone());
                        insts.push(mul_i);
                        let (diff, sub_i) = b_.binary(BinOp::Sub, Operand::Value(xor_v), Operand::Value(twice), ty.clone());
                        insts.push(sub_i);
                        last = (Operand::Value(diff), Operand::const_i64(0));
                    }
                }

                // Drop the placeholder original instruction and splice the
                // expanded chain in its place, retargeting its result id to
                // the chain's final value via a trivial `add x, 0`.
                let final_operand = last.0;
                let (_, identity) = FunctionBuilder::new(func).binary(BinOp::Add, final_operand, Operand::const_i64(0), ty.clone());
                let mut identity = identity;
                identity.result = result;
                insts.push(identity);

                func.blocks.get_mut(&block_id).expect("in scope").instructions.remove(idx);
                insert_many_at(func, block_id, idx, insts);
                events += 1;
                idx += 1;
            }
        }
        if events == 0 {
            PassOutcome::unchanged()
        } else {
            PassOutcome::changed(events)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::{verify_function, Linkage};

    #[test]
    fn rewrites_add_into_xor_and_and_identity() {
        let mut f = Function::new("f", vec![("a".to_string(), Type::I32), ("b".to_string(), Type::I32)], Type::I32, Linkage::External);
        let entry = f.entry;
        let (sum, add) = FunctionBuilder::new(&mut f).binary(
            BinOp::Add,
            Operand::Value(obfx_ir::ValueId(0)),
            Operand::Value(obfx_ir::ValueId(1)),
            Type::I32,
        );
        append(&mut f, entry, add);
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::Value(sum)));
        append(&mut f, entry, ret);

        let outcome = (Mba { level: 2 }).run(&mut f, &mut Rng::from_seed(1));
        assert_eq!(outcome.events, 1);
        assert!(f.blocks[&entry].instructions.len() > 2);
        verify_function(&f).unwrap();
    }

    #[test]
    fn leaves_functions_without_add_or_sub_untouched() {
        let mut f = Function::new("f", vec![("a".to_string(), Type::I32)], Type::I32, Linkage::External);
        let entry = f.entry;
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::Value(obfx_ir::ValueId(0))));
        append(&mut f, entry, ret);
        let outcome = (Mba { level: 3 }).run(&mut f, &mut Rng::from_seed(1));
        assert!(!outcome.modified);
    }
}

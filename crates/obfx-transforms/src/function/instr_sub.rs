//! Instruction substitution (spec §4.F): power-of-two multiplies and
//! divides are rewritten to equivalent shifts in place.

use obfx_core::{Metric, Rng};
use obfx_ir::{BinOp, Constant, Function, InstKind, Operand};
use obfx_pass::{FunctionPass, PassOutcome};

/// Rewrites `mul x, C` to `shl x, log2(C)` and `{u,s}div x, C` to the
/// matching right shift, for any power-of-two constant `C`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstrSub;

fn power_of_two_shift(c: &Constant) -> Option<Constant> {
    let v = c.as_int()?;
    if v > 0 && (v & (v - 1)) == 0 {
        let bits = match c {
            Constant::Int { bits, .. } => *bits,
            _ => return None,
        };
        Some(Constant::Int { bits, value: i64::from(v.trailing_zeros()) })
    } else {
        None
    }
}

impl FunctionPass for InstrSub {
    fn name(&self) -> &'static str {
        "instruction-substitution"
    }

    fn metric(&self) -> Metric {
        Metric::InstrSubs
    }

    fn run(&self, func: &mut Function, _rng: &mut Rng) -> PassOutcome {
        let mut events = 0u64;
        let sites: Vec<_> = func.all_instructions().collect();
        for (block_id, idx) in sites {
            let block = func.blocks.get_mut(&block_id).expect("block from block_order");
            let Some(inst) = block.instructions.get_mut(idx) else { continue };
            let InstKind::Binary { op, lhs, rhs } = &mut inst.kind else { continue };
            match op {
                BinOp::Mul => {
                    if let Operand::Const(c) = rhs.clone() {
                        if let Some(shift) = power_of_two_shift(&c) {
                            *op = BinOp::Shl;
                            *rhs = Operand::Const(shift);
                            events += 1;
                            continue;
                        }
                    }
                    if let Operand::Const(c) = lhs.clone() {
                        if let Some(shift) = power_of_two_shift(&c) {
                            *op = BinOp::Shl;
                            *lhs = rhs.clone();
                            *rhs = Operand::Const(shift);
                            events += 1;
                        }
                    }
                }
                BinOp::UDiv => {
                    if let Operand::Const(c) = rhs.clone() {
                        if let Some(shift) = power_of_two_shift(&c) {
                            *op = BinOp::LShr;
                            *rhs = Operand::Const(shift);
                            events += 1;
                        }
                    }
                }
                BinOp::SDiv => {
                    if let Operand::Const(c) = rhs.clone() {
                        if let Some(shift) = power_of_two_shift(&c) {
                            *op = BinOp::AShr;
                            *rhs = Operand::Const(shift);
                            events += 1;
                        }
                    }
                }
                _ => {}
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
    use obfx_ir::{append, verify_function, FunctionBuilder, Linkage, Operand, Type};

    #[test]
    fn rewrites_power_of_two_mul_and_div() {
        let mut f = Function::new("f", vec![("x".to_string(), Type::I32)], Type::I32, Linkage::External);
        let entry = f.entry;
        let (m, mul) =
            FunctionBuilder::new(&mut f).binary(BinOp::Mul, Operand::Value(obfx_ir::ValueId(0)), Operand::const_i64(8), Type::I32);
        append(&mut f, entry, mul);
        let (d, div) = FunctionBuilder::new(&mut f).binary(BinOp::UDiv, Operand::Value(m), Operand::const_i64(4), Type::I32);
        append(&mut f, entry, div);
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::Value(d)));
        append(&mut f, entry, ret);

        let outcome = InstrSub.run(&mut f, &mut Rng::from_seed(1));
        assert_eq!(outcome.events, 2);
        let block = &f.blocks[&entry];
        assert!(matches!(block.instructions[0].kind, InstKind::Binary { op: BinOp::Shl, .. }));
        assert!(matches!(block.instructions[1].kind, InstKind::Binary { op: BinOp::LShr, .. }));
        verify_function(&f).unwrap();
    }

    #[test]
    fn leaves_non_power_of_two_constants_alone() {
        let mut f = Function::new("f", vec![("x".to_string(), Type::I32)], Type::I32, Linkage::External);
        let entry = f.entry;
        let (m, mul) =
            FunctionBuilder::new(&mut f).binary(BinOp::Mul, Operand::Value(obfx_ir::ValueId(0)), Operand::const_i64(6), Type::I32);
        append(&mut f, entry, mul);
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::Value(m)));
        append(&mut f, entry, ret);

        let outcome = InstrSub.run(&mut f, &mut Rng::from_seed(1));
        assert!(!outcome.modified);
    }
}

//! Constant obfuscation (spec §4.F): every interesting integer constant
//! (excluding -1, 0, 1) is replaced by a reload of a scaled-then-divided
//! copy of itself, so the literal value never appears directly in an
//! instruction operand.

use obfx_core::{Metric, Rng};
use obfx_ir::{insert_many_at, BinOp, Constant, Function, FunctionBuilder, Operand, Type};
use obfx_pass::{FunctionPass, PassOutcome};

/// Replaces literal integer operands with `((k*7) stored, reloaded) / 7`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstObf;

fn bits_to_type(bits: u32) -> Type {
    match bits {
        1 => Type::I1,
        8 => Type::I8,
        16 => Type::I16,
        32 => Type::I32,
        _ => Type::I64,
    }
}

fn is_interesting(value: i64) -> bool {
    !matches!(value, -1 | 0 | 1)
}

impl FunctionPass for ConstObf {
    fn name(&self) -> &'static str {
        "constant-obfuscation"
    }

    fn metric(&self) -> Metric {
        Metric::ConstObfs
    }

    fn run(&self, func: &mut Function, _rng: &mut Rng) -> PassOutcome {
        let mut events = 0u64;
        for block_id in func.block_order() {
            let mut idx = 0;
            loop {
                let len_now = func.blocks[&block_id].instructions.len();
                if idx >= len_now {
                    break;
                }
                let consts: Vec<(i64, u32)> = {
                    let inst = &func.blocks[&block_id].instructions[idx];
                    inst.operands()
                        .into_iter()
                        .filter_map(|op| match op {
                            Operand::Const(Constant::Int { bits, value }) if is_interesting(*value) => {
                                Some((*value, *bits))
                            }
                            _ => None,
                        })
                        .collect()
                };
                if consts.is_empty() {
                    idx += 1;
                    continue;
                }

                let mut pre_insts = Vec::new();
                let mut replacements: Vec<(i64, Operand)> = Vec::new();
                for (value, bits) in &consts {
                    let ty = bits_to_type(*bits);
                    let scaled = value.wrapping_mul(7);
                    let mut b = FunctionBuilder::new(func);
                    let (ptr, alloca) = b.alloca(ty.clone());
                    pre_insts.push(alloca);
                    let store = b.store(Operand::Value(ptr), Operand::Const(Constant::Int { bits: *bits, value: scaled }));
                    pre_insts.push(store);
                    let (loaded, load) = b.load(Operand::Value(ptr), ty.clone());
                    pre_insts.push(load);
                    let (divided, div) = b.binary(
                        BinOp::SDiv,
                        Operand::Value(loaded),
                        Operand::Const(Constant::Int { bits: *bits, value: 7 }),
                        ty,
                    );
                    pre_insts.push(div);
                    replacements.push((*value, Operand::Value(divided)));
                }

                let inserted = pre_insts.len();
                insert_many_at(func, block_id, idx, pre_insts);
                let target_idx = idx + inserted;

                if let Some(inst) = func.blocks.get_mut(&block_id).and_then(|b| b.instructions.get_mut(target_idx)) {
                    for slot in inst.operands_mut() {
                        if let Operand::Const(Constant::Int { value, .. }) = slot {
                            if is_interesting(*value) {
                                if let Some(pos) = replacements.iter().position(|(v, _)| v == value) {
                                    let (_, replacement) = replacements.remove(pos);
                                    *slot = replacement;
                                }
                            }
                        }
                    }
                }

                events += 1;
                idx = target_idx + 1;
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
    use obfx_ir::{append, verify_function, Linkage, ValueId};

    #[test]
    fn replaces_interesting_constants_with_a_reload_chain() {
        let mut f = Function::new("f", vec![("x".to_string(), Type::I32)], Type::I32, Linkage::External);
        let entry = f.entry;
        let (sum, add) =
            FunctionBuilder::new(&mut f).binary(BinOp::Add, Operand::Value(ValueId(0)), Operand::const_i64(42), Type::I32);
        append(&mut f, entry, add);
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::Value(sum)));
        append(&mut f, entry, ret);

        let before = f.instruction_count();
        let outcome = ConstObf.run(&mut f, &mut Rng::from_seed(1));
        assert_eq!(outcome.events, 1);
        assert_eq!(f.instruction_count(), before + 4);
        verify_function(&f).unwrap();
    }

    #[test]
    fn leaves_trivial_constants_alone() {
        let mut f = Function::new("f", vec![("x".to_string(), Type::I32)], Type::I32, Linkage::External);
        let entry = f.entry;
        let (sum, add) =
            FunctionBuilder::new(&mut f).binary(BinOp::Add, Operand::Value(ValueId(0)), Operand::const_i64(1), Type::I32);
        append(&mut f, entry, add);
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::Value(sum)));
        append(&mut f, entry, ret);
        let outcome = ConstObf.run(&mut f, &mut Rng::from_seed(1));
        assert!(!outcome.modified);
    }
}

//! Control-flow flattening (spec §4.F, §9): every original block is
//! rewired to store its successor's state code and branch back to a
//! single dispatcher, which switches on the state to reach the next
//! block. The dispatcher is wired all the way through on every original
//! block — there is no skeleton left unconnected.

use std::collections::HashMap;

use obfx_core::{Metric, Rng};
use obfx_ir::{append, create_block, retarget_successor, BlockId, Constant, Function, FunctionBuilder, Operand, Type};
use obfx_pass::{FunctionPass, PassOutcome};

/// Flattens a function's control flow into a single dispatcher switch.
#[derive(Debug, Default, Clone, Copy)]
pub struct Flatten;

impl FunctionPass for Flatten {
    fn name(&self) -> &'static str {
        "control-flow-flattening"
    }

    fn metric(&self) -> Metric {
        Metric::FlattenedFunctions
    }

    fn run(&self, func: &mut Function, _rng: &mut Rng) -> PassOutcome {
        let orig_blocks = func.block_order();
        if orig_blocks.len() < 2 {
            return PassOutcome::unchanged();
        }

        let state_of: HashMap<BlockId, i64> =
            orig_blocks.iter().enumerate().map(|(i, &b)| (b, i as i64)).collect();

        let new_entry = create_block(func);
        let dispatcher = create_block(func);
        let trap = create_block(func);

        let original_entry = func.entry;
        let init_state = state_of[&original_entry];
        let (state_ptr, alloca, store_init) = {
            let mut b = FunctionBuilder::new(func);
            let (ptr, alloca) = b.alloca(Type::I32);
            let store = b.store(Operand::Value(ptr), Operand::Const(Constant::i32(init_state as i32)));
            (ptr, alloca, store)
        };
        append(func, new_entry, alloca);
        append(func, new_entry, store_init);
        let enter_dispatch = FunctionBuilder::new(func).br(dispatcher);
        append(func, new_entry, enter_dispatch);

        let (loaded, load_inst) = FunctionBuilder::new(func).load(Operand::Value(state_ptr), Type::I32);
        append(func, dispatcher, load_inst);
        let cases: Vec<(i64, BlockId)> = orig_blocks.iter().map(|&b| (state_of[&b], b)).collect();
        let switch_inst = FunctionBuilder::new(func).switch(Operand::Value(loaded), trap, cases);
        append(func, dispatcher, switch_inst);

        let unreachable_inst = FunctionBuilder::new(func).unreachable();
        append(func, trap, unreachable_inst);

        let mut events = 0u64;
        for &block_id in &orig_blocks {
            let targets = func.succs(block_id);
            if targets.is_empty() {
                // `ret`/`unreachable` — nothing to redirect through the
                // dispatcher.
                continue;
            }
            let mut distinct: Vec<BlockId> = Vec::new();
            for &t in &targets {
                if !distinct.contains(&t) {
                    distinct.push(t);
                }
            }

            let mut stub_of: HashMap<BlockId, BlockId> = HashMap::new();
            for &t in &distinct {
                let stub = create_block(func);
                let code = state_of[&t];
                let store_next = FunctionBuilder::new(func).store(Operand::Value(state_ptr), Operand::Const(Constant::i32(code as i32)));
                append(func, stub, store_next);
                let br_back = FunctionBuilder::new(func).br(dispatcher);
                append(func, stub, br_back);
                stub_of.insert(t, stub);
            }

            for (&t, &stub) in &stub_of {
                retarget_successor(func, block_id, t, stub);
            }
            events += 1;
        }

        func.entry = new_entry;
        PassOutcome::changed(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::{verify_function, ICmpPred, Linkage, ValueId};

    #[test]
    fn rewires_every_original_block_through_the_dispatcher() {
        let mut f = Function::new("f", vec![("x".to_string(), Type::I32)], Type::I32, Linkage::External);
        let entry = f.entry;
        let then_bb = create_block(&mut f);
        let else_bb = create_block(&mut f);

        let (cond, icmp) = FunctionBuilder::new(&mut f).icmp(ICmpPred::Sgt, Operand::Value(ValueId(0)), Operand::const_i64(0));
        append(&mut f, entry, icmp);
        let br = FunctionBuilder::new(&mut f).cond_br(Operand::Value(cond), then_bb, else_bb);
        append(&mut f, entry, br);

        let ret1 = FunctionBuilder::new(&mut f).ret(Some(Operand::const_i64(1)));
        append(&mut f, then_bb, ret1);
        let ret0 = FunctionBuilder::new(&mut f).ret(Some(Operand::const_i64(0)));
        append(&mut f, else_bb, ret0);

        let before_entry = f.entry;
        let outcome = Flatten.run(&mut f, &mut Rng::from_seed(5));
        assert!(outcome.modified);
        assert_eq!(outcome.events, 1); // one block (entry) had successors to redirect
        assert_ne!(f.entry, before_entry);
        verify_function(&f).expect("flattened function must stay verifier-clean");
    }

    #[test]
    fn single_block_function_is_left_alone() {
        let mut f = Function::new("leaf", vec![], Type::Void, Linkage::Internal);
        let entry = f.entry;
        let ret = FunctionBuilder::new(&mut f).ret(None);
        append(&mut f, entry, ret);
        let outcome = Flatten.run(&mut f, &mut Rng::from_seed(1));
        assert!(!outcome.modified);
    }
}

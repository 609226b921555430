//! Metamorphic shuffle (spec §4.F): blocks are reordered in storage (this
//! IR has no implicit fallthrough — every block ends in an explicit
//! terminator naming its successors by id — so a pure storage permutation
//! never changes what the function computes) and dead alloca/store pairs
//! are threaded in after every third instruction of a block.

use indexmap::IndexMap;

use obfx_core::{Metric, Rng};
use obfx_ir::{insert_many_at, BasicBlock, BlockId, Function, FunctionBuilder, Operand, Type};
use obfx_pass::{FunctionPass, PassOutcome};

/// Shuffles block storage order and interleaves dead instruction pairs.
#[derive(Debug, Default, Clone, Copy)]
pub struct Metamorphic;

/// Threads a dead `alloca`/`store` pair after every instruction at an
/// index divisible by 3 (shared with [`crate::module::polymorphic`]'s
/// per-variant shuffle pass).
pub(crate) fn thread_dead_pairs(func: &mut Function, rng: &mut Rng) -> u64 {
    let mut events = 0u64;
    for block_id in func.block_order() {
        let body_len = func.blocks[&block_id].body_len();
        let mut insertions = Vec::new();
        for idx in 0..body_len {
            if idx % 3 == 0 {
                let v = (rng.next_u32() & 0xFF) as i32;
                let mut b = FunctionBuilder::new(func);
                let (ptr, alloca) = b.alloca(Type::I32);
                let store = b.store(Operand::Value(ptr), Operand::Const(obfx_ir::Constant::i32(v)));
                insertions.push((idx + 1, vec![alloca, store]));
            }
        }
        for (at, insts) in insertions.into_iter().rev() {
            insert_many_at(func, block_id, at, insts);
            events += 1;
        }
    }
    events
}

/// Rebuilds `func.blocks` in the order given by `order`, a permutation of
/// its current keys.
pub(crate) fn reorder_blocks(func: &mut Function, order: Vec<BlockId>) {
    let mut reordered: IndexMap<BlockId, BasicBlock> = IndexMap::with_capacity(order.len());
    for id in order {
        if let Some(bb) = func.blocks.shift_remove(&id) {
            reordered.insert(id, bb);
        }
    }
    for (id, bb) in func.blocks.drain(..) {
        reordered.insert(id, bb);
    }
    func.blocks = reordered;
}

impl FunctionPass for Metamorphic {
    fn name(&self) -> &'static str {
        "metamorphic-shuffle"
    }

    fn metric(&self) -> Metric {
        Metric::Metamorphic
    }

    fn run(&self, func: &mut Function, rng: &mut Rng) -> PassOutcome {
        if func.blocks.len() < 2 {
            return PassOutcome::unchanged();
        }
        let mut order = func.block_order();
        rng.shuffle(&mut order);
        reorder_blocks(func, order);
        let events = thread_dead_pairs(func, rng) + 1;
        PassOutcome::changed(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::{append, create_block, verify_function, Linkage};

    #[test]
    fn shuffles_and_verifies_clean() {
        let mut f = Function::new("f", vec![], Type::I32, Linkage::Internal);
        let entry = f.entry;
        let a = create_block(&mut f);
        let b = create_block(&mut f);
        let br0 = FunctionBuilder::new(&mut f).br(a);
        append(&mut f, entry, br0);
        let br1 = FunctionBuilder::new(&mut f).br(b);
        append(&mut f, a, br1);
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::const_i64(0)));
        append(&mut f, b, ret);

        let outcome = Metamorphic.run(&mut f, &mut Rng::from_seed(2));
        assert!(outcome.modified);
        verify_function(&f).expect("shuffled function must stay verifier-clean");
    }

    #[test]
    fn single_block_function_is_left_alone() {
        let mut f = Function::new("leaf", vec![], Type::Void, Linkage::Internal);
        let entry = f.entry;
        let ret = FunctionBuilder::new(&mut f).ret(None);
        append(&mut f, entry, ret);
        let outcome = Metamorphic.run(&mut f, &mut Rng::from_seed(1));
        assert!(!outcome.modified);
    }
}

//! The IR utility layer (spec §4.A): every direct mutation of a
//! [`Function`] or [`Module`] funnels through here. Nothing outside this
//! module pushes an [`Instruction`] onto a block, mints a [`BlockId`], or
//! writes to [`Module::ctors`] — that discipline is what keeps the
//! "append-global-constructor never clobbers, always merges" contract
//! (spec §9) from being violated by some other part of the pass reaching
//! in directly.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::function::Function;
use crate::inst::{BasicBlock, InstKind, Instruction};
use crate::module::{Ctor, Global, Module};
use crate::types::{BinOp, BlockId, CastOp, Callee, Constant, ICmpPred, Linkage, Operand, Type, ValueId};

/// Builds instructions against one function, allocating fresh value ids and
/// recording their types as it goes. A builder never appends anything by
/// itself — callers place the returned [`Instruction`] with
/// [`append`]/[`insert_at`], which keeps instruction *construction*
/// (needs a result id) separate from instruction *placement* (needs a
/// block and an index), since several transforms build instructions before
/// they've decided exactly where they'll land (bogus code, fake loops).
pub struct FunctionBuilder<'f> {
    func: &'f mut Function,
}

impl<'f> FunctionBuilder<'f> {
    /// Binds a builder to `func`.
    pub fn new(func: &'f mut Function) -> Self {
        Self { func }
    }

    fn alloc(&mut self, ty: Type) -> ValueId {
        let id = self.func.fresh_value_id();
        self.func.value_types.insert(id, ty);
        id
    }

    /// `alloca ty` — allocates stack storage, result is `ty*`.
    pub fn alloca(&mut self, ty: Type) -> (ValueId, Instruction) {
        let ptr_ty = ty.clone().ptr();
        let result = self.alloc(ptr_ty.clone());
        (result, Instruction::with_result(result, ptr_ty, InstKind::Alloca { ty }))
    }

    /// `load ty, ptr`.
    pub fn load(&mut self, ptr: Operand, ty: Type) -> (ValueId, Instruction) {
        let result = self.alloc(ty.clone());
        (result, Instruction::with_result(result, ty, InstKind::Load { ptr }))
    }

    /// `store value, ptr` — no result.
    #[must_use]
    pub fn store(&self, ptr: Operand, value: Operand) -> Instruction {
        Instruction::void(InstKind::Store { ptr, value })
    }

    /// A binary arithmetic/bitwise instruction of result type `ty`.
    pub fn binary(&mut self, op: BinOp, lhs: Operand, rhs: Operand, ty: Type) -> (ValueId, Instruction) {
        let result = self.alloc(ty.clone());
        (result, Instruction::with_result(result, ty, InstKind::Binary { op, lhs, rhs }))
    }

    /// An integer comparison; result is always `i1`.
    pub fn icmp(&mut self, pred: ICmpPred, lhs: Operand, rhs: Operand) -> (ValueId, Instruction) {
        let result = self.alloc(Type::I1);
        (result, Instruction::with_result(result, Type::I1, InstKind::Icmp { pred, lhs, rhs }))
    }

    /// A value conversion to `to`.
    pub fn cast(&mut self, op: CastOp, value: Operand, to: Type) -> (ValueId, Instruction) {
        let result = self.alloc(to.clone());
        (result, Instruction::with_result(result, to.clone(), InstKind::Cast { op, value, to }))
    }

    /// `getelementptr base, indices`, with an explicit result type (this IR
    /// has no struct layout to infer it from).
    pub fn gep(&mut self, base: Operand, indices: Vec<Operand>, result_ty: Type) -> (ValueId, Instruction) {
        let result = self.alloc(result_ty.clone());
        (result, Instruction::with_result(result, result_ty, InstKind::GetElementPtr { base, indices }))
    }

    /// A call; `ret_ty == Type::Void` produces a result-less instruction.
    pub fn call(&mut self, callee: Callee, args: Vec<Operand>, ret_ty: Type) -> (Option<ValueId>, Instruction) {
        if matches!(ret_ty, Type::Void) {
            (None, Instruction::void(InstKind::Call { callee, args }))
        } else {
            let result = self.alloc(ret_ty.clone());
            (Some(result), Instruction::with_result(result, ret_ty, InstKind::Call { callee, args }))
        }
    }

    /// Unconditional branch terminator.
    #[must_use]
    pub fn br(&self, target: BlockId) -> Instruction {
        Instruction::void(InstKind::Br { target })
    }

    /// Conditional branch terminator.
    #[must_use]
    pub fn cond_br(&self, cond: Operand, then_bb: BlockId, else_bb: BlockId) -> Instruction {
        Instruction::void(InstKind::CondBr { cond, then_bb, else_bb })
    }

    /// Switch terminator.
    #[must_use]
    pub fn switch(&self, value: Operand, default: BlockId, cases: Vec<(i64, BlockId)>) -> Instruction {
        Instruction::void(InstKind::Switch { value, default, cases })
    }

    /// Return terminator.
    #[must_use]
    pub fn ret(&self, value: Option<Operand>) -> Instruction {
        Instruction::void(InstKind::Ret { value })
    }

    /// `unreachable` terminator.
    #[must_use]
    pub fn unreachable(&self) -> Instruction {
        Instruction::void(InstKind::Unreachable)
    }
}

/// Appends `inst` to the end of `block`.
///
/// # Panics
/// Panics if `block` does not belong to `func` — every caller in this
/// workspace holds a `BlockId` it just obtained from `func` itself.
pub fn append(func: &mut Function, block: BlockId, inst: Instruction) {
    func.blocks.get_mut(&block).expect("block belongs to function").instructions.push(inst);
}

/// Inserts `inst` at position `index` within `block`, shifting later
/// instructions down. Used to place bogus code or an anti-debug check
/// ahead of a block's existing instructions without disturbing its
/// terminator.
///
/// # Panics
/// Panics if `block` does not belong to `func`, or `index > block.len()`.
pub fn insert_at(func: &mut Function, block: BlockId, index: usize, inst: Instruction) {
    func.blocks.get_mut(&block).expect("block belongs to function").instructions.insert(index, inst);
}

/// Inserts several instructions starting at `index`, preserving their
/// relative order.
pub fn insert_many_at(func: &mut Function, block: BlockId, index: usize, insts: Vec<Instruction>) {
    for (offset, inst) in insts.into_iter().enumerate() {
        insert_at(func, block, index + offset, inst);
    }
}

/// Creates a new, empty block and returns its id. The block holds no
/// terminator yet — callers must append one before the next verifier
/// boundary.
pub fn create_block(func: &mut Function) -> BlockId {
    let id = func.fresh_block_id();
    func.blocks.insert(id, BasicBlock::new(id));
    id
}

/// Splits `block` so that everything from instruction `at` onward (its
/// terminator included) moves into a freshly created successor block; the
/// original block keeps instructions `[0, at)` and gets a new `br` to the
/// new block appended as its terminator. Returns the new block's id.
///
/// This is the one operation in the utility layer that can turn a
/// verifier-clean function into a temporarily non-terminated one if `at`
/// is past the instruction list's end — callers must ensure
/// `at <= block.instructions.len()`.
///
/// # Panics
/// Panics if `block` does not belong to `func`, or `at` is out of range.
pub fn split_block_at(func: &mut Function, block: BlockId, at: usize) -> BlockId {
    let new_id = create_block(func);
    let tail = {
        let bb = func.blocks.get_mut(&block).expect("block belongs to function");
        assert!(at <= bb.instructions.len(), "split index out of range");
        let tail = bb.instructions.split_off(at);
        bb.instructions.push(Instruction::void(InstKind::Br { target: new_id }));
        tail
    };
    func.blocks.get_mut(&new_id).expect("just created").instructions = tail;
    new_id
}

/// Rewrites every edge out of `from_block` that targets `old_target` so it
/// targets `new_target` instead. Used by fake-loop insertion and
/// flattening to redirect control flow without rebuilding a terminator
/// from scratch.
pub fn retarget_successor(func: &mut Function, from_block: BlockId, old_target: BlockId, new_target: BlockId) {
    if let Some(bb) = func.blocks.get_mut(&from_block) {
        bb.terminator_mut().retarget(old_target, new_target);
    }
}

/// Replaces every use of `from` in `func` with `to`. Returns the number of
/// operand slots rewritten.
pub fn replace_all_uses_of(func: &mut Function, from: ValueId, to: &Operand) -> usize {
    let mut n = 0;
    for bb in func.blocks.values_mut() {
        for inst in &mut bb.instructions {
            n += inst.replace_uses(from, to);
        }
    }
    n
}

/// Deep-clones `source`'s body into a fresh [`Function`] named `new_name`,
/// remapping every block id and value id so the clone shares none of the
/// original's identifiers. The clone is marked [`Function::generated`] and
/// given [`Linkage::Internal`] — it is reachable (so it survives dead-code
/// elimination downstream) but not part of the exported-symbol set (spec
/// §3 invariant 4).
#[must_use]
pub fn clone_function(source: &Function, new_name: impl Into<String>) -> Function {
    let new_name = new_name.into();
    let mut dst = Function {
        name: new_name,
        params: source.params.clone(),
        ret_ty: source.ret_ty.clone(),
        linkage: Linkage::Internal,
        generated: true,
        blocks: IndexMap::new(),
        entry: BlockId(0),
        next_value: source.params.len() as u32,
        next_block: 0,
        value_types: HashMap::new(),
    };

    let mut value_map: HashMap<ValueId, ValueId> = HashMap::new();
    for i in 0..source.params.len() {
        let id = ValueId(i as u32);
        value_map.insert(id, id);
    }

    let mut block_map: HashMap<BlockId, BlockId> = HashMap::new();
    for old_id in source.block_order() {
        let new_id = dst.fresh_block_id();
        block_map.insert(old_id, new_id);
        dst.blocks.insert(new_id, BasicBlock::new(new_id));
    }
    dst.entry = block_map[&source.entry];

    for old_id in source.block_order() {
        let new_id = block_map[&old_id];
        let old_bb = &source.blocks[&old_id];
        for inst in &old_bb.instructions {
            let mut new_inst = inst.clone();
            if let Some(old_result) = inst.result {
                let new_result = dst.fresh_value_id();
                value_map.insert(old_result, new_result);
                new_inst.result = Some(new_result);
                dst.value_types.insert(new_result, inst.ty.clone());
            }
            for slot in new_inst.operands_mut() {
                if let Operand::Value(v) = slot {
                    if let Some(&mapped) = value_map.get(v) {
                        *v = mapped;
                    }
                }
            }
            new_inst.remap_successors(&block_map);
            dst.blocks.get_mut(&new_id).expect("just created").instructions.push(new_inst);
        }
    }

    dst
}

/// Merges `(priority, function)` into the module's canonical constructor
/// array, ordered by ascending priority. Never replaces an existing
/// constructor — this is the only function in the whole workspace allowed
/// to write [`Module::ctors`] (spec §9).
pub fn append_global_constructor(module: &mut Module, priority: u32, function: impl Into<String>) {
    module.ctors.push(Ctor { priority, function: function.into() });
    module.ctors.sort_by_key(|c| c.priority);
}

/// Creates a new global variable named uniquely from `base_name`
/// (colliding names get a numeric suffix — spec §3 invariant 3: no new name
/// collisions) and returns the name actually used.
pub fn create_global_variable(
    module: &mut Module,
    base_name: &str,
    ty: Type,
    initializer: Option<Constant>,
    linkage: Linkage,
    mutable: bool,
) -> String {
    let name = module.unique_name(base_name);
    module.globals.insert(name.clone(), Global { name: name.clone(), ty, initializer, linkage, mutable });
    name
}

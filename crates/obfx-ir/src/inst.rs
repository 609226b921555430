//! Instructions and the basic blocks that hold them.

use crate::types::{BinOp, BlockId, CastOp, Callee, Constant, ICmpPred, Operand, Type, ValueId};

/// The operation an [`Instruction`] performs.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// Stack allocation of one value of type `ty`; the instruction's result
    /// is a pointer to it.
    Alloca {
        /// Allocated type.
        ty: Type,
    },
    /// Loads the value pointed to by `ptr`.
    Load {
        /// Address to read.
        ptr: Operand,
    },
    /// Stores `value` through `ptr`. Never has a result.
    Store {
        /// Address to write.
        ptr: Operand,
        /// Value to write.
        value: Operand,
    },
    /// A binary arithmetic/bitwise operation.
    Binary {
        /// Opcode.
        op: BinOp,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// An integer comparison, producing an `i1`.
    Icmp {
        /// Predicate.
        pred: ICmpPred,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// A value conversion.
    Cast {
        /// Conversion kind.
        op: CastOp,
        /// Source value.
        value: Operand,
        /// Target type (also the instruction's result type).
        to: Type,
    },
    /// `getelementptr`-style address computation.
    GetElementPtr {
        /// Base pointer.
        base: Operand,
        /// Index chain.
        indices: Vec<Operand>,
    },
    /// A function call. `result` on the owning [`Instruction`] is `None`
    /// when the callee returns `void`.
    Call {
        /// Call target.
        callee: Callee,
        /// Argument list.
        args: Vec<Operand>,
    },
    /// Unconditional branch.
    Br {
        /// Destination block.
        target: BlockId,
    },
    /// Conditional branch.
    CondBr {
        /// Branch condition (`i1`).
        cond: Operand,
        /// Destination when `cond` is true.
        then_bb: BlockId,
        /// Destination when `cond` is false.
        else_bb: BlockId,
    },
    /// Multi-way branch on an integer value.
    Switch {
        /// Discriminant.
        value: Operand,
        /// Fallback destination.
        default: BlockId,
        /// `(case value, destination)` pairs.
        cases: Vec<(i64, BlockId)>,
    },
    /// Function return.
    Ret {
        /// Returned value, or `None` for a `void` function.
        value: Option<Operand>,
    },
    /// Marks a program point as unreachable.
    Unreachable,
}

/// One IR instruction: an optional SSA result plus its operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The value this instruction defines, or `None` for void-typed
    /// instructions (`store`, `br`, `ret`, a `void`-returning `call`, ...).
    pub result: Option<ValueId>,
    /// The result's type (`Type::Void` when `result` is `None`).
    pub ty: Type,
    /// The operation.
    pub kind: InstKind,
}

impl Instruction {
    /// Builds a void instruction (no result).
    #[must_use]
    pub fn void(kind: InstKind) -> Self {
        Self { result: None, ty: Type::Void, kind }
    }

    /// Builds an instruction with a result value.
    #[must_use]
    pub fn with_result(result: ValueId, ty: Type, kind: InstKind) -> Self {
        Self { result: Some(result), ty, kind }
    }

    /// True for the five terminator kinds (spec glossary: "the single last
    /// instruction of a block").
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Switch { .. }
                | InstKind::Ret { .. }
                | InstKind::Unreachable
        )
    }

    /// Block successors named by this instruction, if it is a terminator.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match &self.kind {
            InstKind::Br { target } => vec![*target],
            InstKind::CondBr { then_bb, else_bb, .. } => vec![*then_bb, *else_bb],
            InstKind::Switch { default, cases, .. } => {
                let mut out = vec![*default];
                out.extend(cases.iter().map(|(_, bb)| *bb));
                out
            }
            _ => Vec::new(),
        }
    }

    /// Rewrites every successor block id equal to `from` to `to`. Used by
    /// fake-loop insertion and flattening to redirect an edge without
    /// rebuilding the instruction from scratch.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        match &mut self.kind {
            InstKind::Br { target } => {
                if *target == from {
                    *target = to;
                }
            }
            InstKind::CondBr { then_bb, else_bb, .. } => {
                if *then_bb == from {
                    *then_bb = to;
                }
                if *else_bb == from {
                    *else_bb = to;
                }
            }
            InstKind::Switch { default, cases, .. } => {
                if *default == from {
                    *default = to;
                }
                for (_, bb) in cases.iter_mut() {
                    if *bb == from {
                        *bb = to;
                    }
                }
            }
            _ => {}
        }
    }

    /// Every operand this instruction reads, in evaluation order.
    #[must_use]
    pub fn operands(&self) -> Vec<&Operand> {
        match &self.kind {
            InstKind::Alloca { .. } | InstKind::Br { .. } | InstKind::Unreachable => Vec::new(),
            InstKind::Load { ptr } => vec![ptr],
            InstKind::Store { ptr, value } => vec![ptr, value],
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::GetElementPtr { base, indices } => {
                let mut out = vec![base];
                out.extend(indices.iter());
                out
            }
            InstKind::Call { callee, args } => {
                let mut out: Vec<&Operand> = Vec::new();
                if let Callee::Indirect(op) = callee {
                    out.push(op);
                }
                out.extend(args.iter());
                out
            }
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Switch { value, .. } => vec![value],
            InstKind::Ret { value } => value.iter().collect(),
        }
    }

    /// Mutable access to every operand, for in-place value substitution.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match &mut self.kind {
            InstKind::Alloca { .. } | InstKind::Br { .. } | InstKind::Unreachable => Vec::new(),
            InstKind::Load { ptr } => vec![ptr],
            InstKind::Store { ptr, value } => vec![ptr, value],
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::GetElementPtr { base, indices } => {
                let mut out = vec![base];
                out.extend(indices.iter_mut());
                out
            }
            InstKind::Call { callee, args } => {
                let mut out: Vec<&mut Operand> = Vec::new();
                if let Callee::Indirect(op) = callee {
                    out.push(op);
                }
                out.extend(args.iter_mut());
                out
            }
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Switch { value, .. } => vec![value],
            InstKind::Ret { value } => value.iter_mut().collect(),
        }
    }

    /// `ValueId`s this instruction reads.
    #[must_use]
    pub fn uses(&self) -> Vec<ValueId> {
        self.operands().into_iter().filter_map(Operand::value_id).collect()
    }

    /// True if executing this instruction can be observed from outside the
    /// function (a store, a call, any terminator). Dead-instruction-shaped
    /// transforms (bogus code, constant obfuscation) must never introduce
    /// one of these as "dead" filler.
    #[must_use]
    pub const fn has_side_effects(&self) -> bool {
        matches!(
            self.kind,
            InstKind::Store { .. }
                | InstKind::Call { .. }
                | InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Switch { .. }
                | InstKind::Ret { .. }
                | InstKind::Unreachable
        )
    }

    /// Replaces every operand use of `from` with `to`, returning the number
    /// of operands rewritten.
    pub fn replace_uses(&mut self, from: ValueId, to: &Operand) -> usize {
        let mut n = 0;
        for slot in self.operands_mut() {
            if slot.value_id() == Some(from) {
                *slot = to.clone();
                n += 1;
            }
        }
        n
    }

    /// Rewrites every successor block id according to `map`, leaving
    /// unmapped ids untouched. Used when splicing a cloned function's
    /// blocks into fresh ids.
    pub fn remap_successors(&mut self, map: &std::collections::HashMap<BlockId, BlockId>) {
        match &mut self.kind {
            InstKind::Br { target } => {
                if let Some(&n) = map.get(target) {
                    *target = n;
                }
            }
            InstKind::CondBr { then_bb, else_bb, .. } => {
                if let Some(&n) = map.get(then_bb) {
                    *then_bb = n;
                }
                if let Some(&n) = map.get(else_bb) {
                    *else_bb = n;
                }
            }
            InstKind::Switch { default, cases, .. } => {
                if let Some(&n) = map.get(default) {
                    *default = n;
                }
                for (_, bb) in cases.iter_mut() {
                    if let Some(&n) = map.get(bb) {
                        *bb = n;
                    }
                }
            }
            _ => {}
        }
    }

    /// Replaces a plain constant use with another constant (used by
    /// constant-folding-style passes). Returns the number of operands
    /// rewritten.
    pub fn replace_const_uses(&mut self, from: &Constant, to: &Constant) -> usize {
        let mut n = 0;
        for slot in self.operands_mut() {
            if let Operand::Const(c) = slot {
                if c == from {
                    *slot = Operand::Const(to.clone());
                    n += 1;
                }
            }
        }
        n
    }
}

/// A straight-line sequence of instructions ending in exactly one
/// terminator.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// This block's id, unique within its function.
    pub id: BlockId,
    /// Instructions, in execution order. `instructions.last()` must be a
    /// terminator at every verifier boundary.
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// Builds an empty block (not yet verifier-clean until a terminator is
    /// appended).
    #[must_use]
    pub fn new(id: BlockId) -> Self {
        Self { id, instructions: Vec::new() }
    }

    /// The block's terminator.
    ///
    /// # Panics
    /// Panics if the block has no instructions — only possible between IR
    /// utility layer calls, never at a documented verifier boundary.
    #[must_use]
    pub fn terminator(&self) -> &Instruction {
        self.instructions.last().expect("basic block has no terminator")
    }

    /// Mutable access to the terminator.
    ///
    /// # Panics
    /// Panics if the block has no instructions.
    pub fn terminator_mut(&mut self) -> &mut Instruction {
        self.instructions.last_mut().expect("basic block has no terminator")
    }

    /// Block successors, read off the terminator.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        self.terminator().successors()
    }

    /// Non-terminator instruction count.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.instructions.len().saturating_sub(1)
    }
}

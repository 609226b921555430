//! Functions: a signature plus an ordered set of basic blocks.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::inst::BasicBlock;
use crate::types::{BlockId, Linkage, Type, ValueId};

/// A function definition (or, when [`Function::is_declaration`] is true, a
/// bare external signature with no body).
#[derive(Debug, Clone)]
pub struct Function {
    /// Symbol name. Stable across the whole pass — the pass never renames
    /// an original function (spec §3 invariant 4).
    pub name: String,
    /// Parameter `(name, type)` pairs. Parameter `i` is addressed as
    /// `ValueId(i as u32)`.
    pub params: Vec<(String, Type)>,
    /// Return type.
    pub ret_ty: Type,
    /// Linkage.
    pub linkage: Linkage,
    /// True for anything the pass itself created: a polymorphic variant, a
    /// VM interpreter, a decrypt helper, an anti-debug check. Generated
    /// functions are a convenience marker; the authoritative source of
    /// truth for "was this here before the pass ran" is the pipeline's
    /// original-function set (spec §3, §9).
    pub generated: bool,
    /// Basic blocks, in module order. Empty for a declaration.
    pub blocks: IndexMap<BlockId, BasicBlock>,
    /// Entry block id. Meaningless on a declaration.
    pub entry: BlockId,
    next_value: u32,
    next_block: u32,
    /// Type of every value this function defines (by result id). Parameters
    /// are looked up from `params` instead.
    pub value_types: HashMap<ValueId, Type>,
}

impl Function {
    /// Builds a bare declaration (no blocks) — used for external helpers
    /// the generated code calls (e.g. a debugger-presence probe).
    #[must_use]
    pub fn declaration(name: impl Into<String>, params: Vec<(String, Type)>, ret_ty: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret_ty,
            linkage: Linkage::External,
            generated: false,
            blocks: IndexMap::new(),
            entry: BlockId(0),
            next_value: 0,
            next_block: 0,
            value_types: HashMap::new(),
        }
    }

    /// Builds a definition with a single empty entry block, ready for the
    /// builder to populate.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<(String, Type)>, ret_ty: Type, linkage: Linkage) -> Self {
        let mut f = Self {
            name: name.into(),
            params: params.clone(),
            ret_ty,
            linkage,
            generated: false,
            blocks: IndexMap::new(),
            entry: BlockId(0),
            next_value: params.len() as u32,
            next_block: 0,
            value_types: HashMap::new(),
        };
        let entry = f.fresh_block_id();
        f.blocks.insert(entry, BasicBlock::new(entry));
        f.entry = entry;
        f
    }

    /// True if this function has no body (an external declaration).
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Allocates a fresh value id without recording a type for it (callers
    /// that immediately build an instruction should prefer
    /// [`crate::builder::FunctionBuilder`], which records the type too).
    pub fn fresh_value_id(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    /// Allocates a fresh block id (the block itself is not inserted).
    pub fn fresh_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    /// Blocks in module order.
    #[must_use]
    pub fn block_order(&self) -> Vec<BlockId> {
        self.blocks.keys().copied().collect()
    }

    /// Predecessors of `target`, computed by scanning every block's
    /// terminator (there is no cached predecessor list to go stale).
    #[must_use]
    pub fn preds(&self, target: BlockId) -> Vec<BlockId> {
        self.blocks
            .values()
            .filter(|b| b.successors().contains(&target))
            .map(|b| b.id)
            .collect()
    }

    /// Successors of `block`.
    #[must_use]
    pub fn succs(&self, block: BlockId) -> Vec<BlockId> {
        self.blocks.get(&block).map(BasicBlock::successors).unwrap_or_default()
    }

    /// Total instruction count across every block (terminators included) —
    /// the denominator the criticality analyzer and size-growth estimator
    /// use.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.values().map(|b| b.instructions.len()).sum()
    }

    /// The type of a value: a parameter type, or a previously recorded
    /// instruction result type.
    #[must_use]
    pub fn type_of(&self, v: ValueId) -> Type {
        if let Some((_, ty)) = self.params.get(v.0 as usize) {
            return ty.clone();
        }
        self.value_types.get(&v).cloned().unwrap_or(Type::Void)
    }

    /// Every value this function defines (parameters plus instruction
    /// results), used by passes that need "all user-visible values", e.g.
    /// indirect-call table construction touches none of these directly but
    /// cloning does.
    #[must_use]
    pub fn all_instructions(&self) -> impl Iterator<Item = (BlockId, usize)> + '_ {
        self.blocks.iter().flat_map(|(&bid, b)| (0..b.instructions.len()).map(move |i| (bid, i)))
    }
}

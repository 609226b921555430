//! A deliberately shallow structural verifier: it checks that the shapes
//! the rest of this crate relies on actually hold (one terminator per
//! block, branch targets exist, direct calls resolve), not full SSA
//! dominance. The pipeline runs it before the first transform cycle and
//! after the last one (spec §4.A); that is enough to catch a pass that
//! left a block headless or branched to a block it never created.

use std::collections::HashSet;

use thiserror::Error;

use crate::function::Function;
use crate::inst::InstKind;
use crate::module::Module;
use crate::types::BlockId;

/// A structural defect found by [`verify_module`] or [`verify_function`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// A block's instruction list was empty.
    #[error("function `{function}` block {block:?} has no instructions")]
    EmptyBlock {
        /// Owning function.
        function: String,
        /// Offending block.
        block: BlockId,
    },
    /// A non-final instruction in a block was itself a terminator, or the
    /// final instruction was not one.
    #[error("function `{function}` block {block:?} does not end in exactly one terminator")]
    BadTerminatorPlacement {
        /// Owning function.
        function: String,
        /// Offending block.
        block: BlockId,
    },
    /// A branch named a block id absent from the owning function.
    #[error("function `{function}` branches to undefined block {target:?}")]
    UndefinedBranchTarget {
        /// Owning function.
        function: String,
        /// The missing block.
        target: BlockId,
    },
    /// A direct call named a symbol absent from the module.
    #[error("function `{function}` calls undefined symbol `{callee}`")]
    UndefinedCallee {
        /// Calling function.
        function: String,
        /// Missing symbol.
        callee: String,
    },
    /// An operand referenced a global absent from the module.
    #[error("function `{function}` references undefined global `{global}`")]
    UndefinedGlobal {
        /// Owning function.
        function: String,
        /// Missing global.
        global: String,
    },
    /// A function-pointer table entry named a function absent from the
    /// module.
    #[error("global `{global}` function-pointer table references undefined function `{callee}`")]
    UndefinedTableEntry {
        /// Owning global.
        global: String,
        /// Missing function.
        callee: String,
    },
    /// A function's `entry` id did not name a block actually in `blocks`.
    #[error("function `{function}` entry block {entry:?} is not one of its own blocks")]
    DanglingEntry {
        /// Owning function.
        function: String,
        /// The invalid entry id.
        entry: BlockId,
    },
}

/// Verifies every defined function in `module`, including that direct
/// calls resolve to a symbol declared or defined somewhere in the module.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for global in module.globals.values() {
        if let Some(crate::types::Constant::FunctionPtrTable(names)) = &global.initializer {
            for name in names {
                if !module.functions.contains_key(name) {
                    return Err(VerifyError::UndefinedTableEntry { global: global.name.clone(), callee: name.clone() });
                }
            }
        }
    }
    for func in module.defined_functions() {
        verify_function(func)?;
        for (block_id, idx) in func.all_instructions() {
            let inst = &func.blocks[&block_id].instructions[idx];
            if let InstKind::Call { callee: crate::types::Callee::Direct(name), .. } = &inst.kind {
                if !module.functions.contains_key(name) {
                    return Err(VerifyError::UndefinedCallee { function: func.name.clone(), callee: name.clone() });
                }
            }
            for operand in inst.operands() {
                if let crate::types::Operand::Global(name) = operand {
                    if !module.globals.contains_key(name) {
                        return Err(VerifyError::UndefinedGlobal { function: func.name.clone(), global: name.clone() });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Verifies one function in isolation: every block is non-empty and ends
/// in exactly one terminator, every branch target exists, and the entry
/// block is one of the function's own blocks.
pub fn verify_function(func: &Function) -> Result<(), VerifyError> {
    if func.is_declaration() {
        return Ok(());
    }
    if !func.blocks.contains_key(&func.entry) {
        return Err(VerifyError::DanglingEntry { function: func.name.clone(), entry: func.entry });
    }

    let known: HashSet<BlockId> = func.blocks.keys().copied().collect();

    for (&id, block) in &func.blocks {
        if block.instructions.is_empty() {
            return Err(VerifyError::EmptyBlock { function: func.name.clone(), block: id });
        }
        let last = block.instructions.len() - 1;
        for (i, inst) in block.instructions.iter().enumerate() {
            let is_last = i == last;
            if inst.is_terminator() != is_last {
                return Err(VerifyError::BadTerminatorPlacement { function: func.name.clone(), block: id });
            }
        }
        for target in block.successors() {
            if !known.contains(&target) {
                return Err(VerifyError::UndefinedBranchTarget { function: func.name.clone(), target });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{append, create_block, FunctionBuilder};
    use crate::function::Function;
    use crate::types::{Linkage, Operand, Type};

    #[test]
    fn accepts_a_clean_function() {
        let mut f = Function::new("f", vec![], Type::I32, Linkage::External);
        let entry = f.entry;
        let ret = {
            let mut b = FunctionBuilder::new(&mut f);
            b.ret(Some(Operand::const_i64(0)))
        };
        append(&mut f, entry, ret);
        assert!(verify_function(&f).is_ok());
    }

    #[test]
    fn rejects_empty_block() {
        let mut f = Function::new("f", vec![], Type::Void, Linkage::External);
        let _ = create_block(&mut f);
        let entry = f.entry;
        let ret = FunctionBuilder::new(&mut f).ret(None);
        append(&mut f, entry, ret);
        let err = verify_function(&f).unwrap_err();
        assert!(matches!(err, VerifyError::EmptyBlock { .. }));
    }

    #[test]
    fn rejects_branch_to_unknown_block() {
        let mut f = Function::new("f", vec![], Type::Void, Linkage::External);
        let entry = f.entry;
        let br = FunctionBuilder::new(&mut f).br(BlockId(999));
        append(&mut f, entry, br);
        let err = verify_function(&f).unwrap_err();
        assert!(matches!(err, VerifyError::UndefinedBranchTarget { .. }));
    }

    #[test]
    fn rejects_missing_callee() {
        let mut module = Module::new("m", "x86_64-unknown-linux-gnu", "e-m:e-p270:32:32");
        let mut f = Function::new("f", vec![], Type::Void, Linkage::External);
        let entry = f.entry;
        let (_, call) = FunctionBuilder::new(&mut f).call(
            crate::types::Callee::Direct("missing".to_string()),
            vec![],
            Type::Void,
        );
        append(&mut f, entry, call);
        let ret = FunctionBuilder::new(&mut f).ret(None);
        append(&mut f, entry, ret);
        module.functions.insert(f.name.clone(), f);
        let err = verify_module(&module).unwrap_err();
        assert!(matches!(err, VerifyError::UndefinedCallee { .. }));
    }

    #[test]
    fn rejects_reference_to_missing_global() {
        let mut module = Module::new("m", "x86_64-unknown-linux-gnu", "e-m:e-p270:32:32");
        let mut f = Function::new("f", vec![], Type::I32, Linkage::External);
        let entry = f.entry;
        let (loaded, load) =
            FunctionBuilder::new(&mut f).load(Operand::Global("missing.str".to_string()), Type::I32);
        append(&mut f, entry, load);
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::Value(loaded)));
        append(&mut f, entry, ret);
        module.functions.insert(f.name.clone(), f);
        let err = verify_module(&module).unwrap_err();
        assert!(matches!(err, VerifyError::UndefinedGlobal { .. }));
    }

    #[test]
    fn rejects_table_entry_naming_missing_function() {
        use crate::builder::create_global_variable;
        use crate::types::Constant;

        let mut module = Module::new("m", "x86_64-unknown-linux-gnu", "e-m:e-p270:32:32");
        create_global_variable(
            &mut module,
            "table",
            Type::Array(Box::new(Type::I8.ptr()), 1),
            Some(Constant::FunctionPtrTable(vec!["missing".to_string()])),
            Linkage::Private,
            false,
        );
        let err = verify_module(&module).unwrap_err();
        assert!(matches!(err, VerifyError::UndefinedTableEntry { .. }));
    }
}

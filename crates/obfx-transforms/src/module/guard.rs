//! Shared plumbing for the three "inject a runtime check at function entry"
//! module transforms (anti-debug, anti-analysis, anti-tamper): split the
//! entry block after its prologue, leave the original entry open for the
//! caller's own check instructions plus a conditional branch, and give it a
//! freshly created "detected" block to branch to.

use obfx_ir::{create_block, split_block_at, BlockId, Constant, Function, InstKind, Operand, Type};

/// `name == "main"` or `name` contains `entry` — the anti-debug/anti-analysis
/// eligible-function predicate.
pub(crate) fn is_entry_point(name: &str) -> bool {
    name == "main" || name.contains("entry")
}

/// `name == "main"` or `name` contains `critical` — the anti-tamper
/// eligible-function predicate.
pub(crate) fn is_critical(name: &str) -> bool {
    name == "main" || name.contains("critical")
}

/// Splits `func`'s entry block right after its leading run of `alloca`
/// instructions (the closest this IR comes to "prologue"), pops the `br`
/// `split_block_at` appended, and creates an empty "detected" block.
/// Returns `(after_prologue, detected)`; the caller still owes the entry
/// block its check instructions and a terminator.
pub(crate) fn split_entry_for_check(func: &mut Function) -> (BlockId, BlockId) {
    let entry = func.entry;
    let prologue_len =
        func.blocks[&entry].instructions.iter().take_while(|i| matches!(i.kind, InstKind::Alloca { .. })).count();
    let after_prologue = split_block_at(func, entry, prologue_len);
    let detected = create_block(func);
    func.blocks.get_mut(&entry).expect("just split").instructions.pop();
    (after_prologue, detected)
}

/// The sentinel value a "detected" block returns: `None` for a `void`
/// function (the probe still runs, it just can't signal through the return
/// value), the given integer for any integer return type, or a
/// zero-initializer for anything else.
pub(crate) fn sentinel_for(ty: &Type, value: i64) -> Option<Operand> {
    match ty {
        Type::Void => None,
        t if t.is_integer() => Some(Operand::Const(Constant::Int { bits: t.int_bits().expect("is_integer"), value })),
        other => Some(Operand::Const(Constant::Null(other.clone()))),
    }
}

//! The sixteen obfuscation transforms, split into function-level passes
//! (rewrite one function) and module-level passes (rewrite whole-module
//! structure). [`obfx_pipeline`] is the only caller that should need to
//! name individual passes — everything else goes through its driver.

#![forbid(unsafe_code)]

mod function;
mod module;

pub use function::{
    BogusCode, ConstObf, FakeLoops, Flatten, InstrSub, Mba, Metamorphic, OpaquePredicates, Polymorphic, Virtualize,
};
pub use module::{emit_decrypt_constructor, AntiAnalysis, AntiDebug, AntiTamper, DynamicObf, IndirectCalls, StringEncrypt};

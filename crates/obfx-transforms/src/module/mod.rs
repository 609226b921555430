//! Module-level transforms: each rewrites whole-module structure — globals,
//! the constructor list, or cross-function call sites.

mod anti_analysis;
mod anti_debug;
mod anti_tamper;
mod dynamic_obf;
mod guard;
mod indirect_calls;
mod string_encrypt;

pub use anti_analysis::AntiAnalysis;
pub use anti_debug::AntiDebug;
pub use anti_tamper::AntiTamper;
pub use dynamic_obf::DynamicObf;
pub use indirect_calls::IndirectCalls;
pub use string_encrypt::{emit_decrypt_constructor, StringEncrypt};

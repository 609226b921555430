//! A small, self-contained intermediate representation modeled on LLVM IR:
//! modules, functions, basic blocks, instructions, and the mutation
//! utilities every transform builds on (component A). Everything downstream
//! — analysis, configuration, passes, transforms, the pipeline — operates
//! on the types defined here and nowhere else.

#![forbid(unsafe_code)]

pub mod builder;
pub mod function;
pub mod inst;
pub mod module;
pub mod types;
pub mod verify;

pub use builder::{
    append, append_global_constructor, clone_function, create_block, create_global_variable, insert_at,
    insert_many_at, replace_all_uses_of, retarget_successor, split_block_at, FunctionBuilder,
};
pub use function::Function;
pub use inst::{BasicBlock, InstKind, Instruction};
pub use module::{Ctor, Global, Module, DEFAULT_CTOR_PRIORITY};
pub use types::{BinOp, BlockId, CastOp, Callee, Constant, ICmpPred, Linkage, Operand, Type, ValueId};
pub use verify::{verify_function, verify_module, VerifyError};

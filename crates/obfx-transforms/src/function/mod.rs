//! Function-level transforms: each rewrites one function in place.

mod bogus_code;
mod const_obf;
mod fake_loops;
mod flatten;
mod instr_sub;
mod mba;
mod metamorphic;
mod opaque_predicates;
mod polymorphic;
mod virtualize;

pub use bogus_code::BogusCode;
pub use const_obf::ConstObf;
pub use fake_loops::FakeLoops;
pub use flatten::Flatten;
pub use instr_sub::InstrSub;
pub use mba::Mba;
pub use metamorphic::Metamorphic;
pub use opaque_predicates::OpaquePredicates;
pub use polymorphic::Polymorphic;
pub use virtualize::Virtualize;

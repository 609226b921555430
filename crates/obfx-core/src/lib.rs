//! obfx-core — primitives shared by every other crate in the obfuscation engine.
//!
//! Provides:
//! - [`rng::Rng`]: a deterministic, seedable RNG. One instance is owned per
//!   pass run, seeded from a hash of the module name, so that
//!   `(module name, configuration)` uniquely determines the obfuscated output.
//! - [`hash::fnv1a64`] / [`hash::derive_key`]: a 64-bit FNV-1a hash (used for
//!   the module code digest) and a PBKDF2-style iterated hash-chain KDF.
//!   Neither is cryptographically hardened — see the crate-level docs on
//!   [`hash`] for why that's acceptable here.
//! - [`rc4`]: a minimal RC4 stream cipher, used by the `rc4-simple` and
//!   `rc4-derived` string-encryption schemes.
//! - [`metrics`]: the fixed set of per-technique counters accumulated across
//!   a pass run.

#![forbid(unsafe_code)]

pub mod hash;
pub mod metrics;
pub mod rc4;
pub mod rng;

pub use hash::{derive_key, fnv1a64};
pub use metrics::{Metric, Metrics};
pub use rc4::Rc4;
pub use rng::Rng;

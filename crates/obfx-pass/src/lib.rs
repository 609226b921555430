//! The two traits every transform in `obfx-transforms` implements, and the
//! outcome type that feeds the metrics recorder. Unlike a generic pass
//! manager over an abstract `Program` trait, these operate directly on
//! concrete [`obfx_ir`] types — this engine has exactly one IR, so there is
//! nothing to adapt.

#![forbid(unsafe_code)]

use obfx_core::{Metric, Rng};
use obfx_ir::{Function, Module};

/// What a single pass invocation did, reported back to the pipeline driver
/// so it can add to [`obfx_core::Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Whether the function or module was mutated.
    pub modified: bool,
    /// Number of times to bump this pass's metric (e.g. one bogus-code pass
    /// invocation can insert several dummy-instruction tuples; each counts).
    pub events: u64,
}

impl PassOutcome {
    /// The pass made no change.
    #[must_use]
    pub const fn unchanged() -> Self {
        Self { modified: false, events: 0 }
    }

    /// The pass changed something and recorded `events` metric hits.
    #[must_use]
    pub const fn changed(events: u64) -> Self {
        Self { modified: events > 0, events }
    }
}

/// A transform that rewrites one function in place.
///
/// Implementations must leave the function verifier-clean (spec: every
/// transform leaves the function verifier-clean) and must never transform
/// a function twice within the same call — the pipeline driver is
/// responsible for calling each pass at most once per function per cycle.
pub trait FunctionPass {
    /// Name used in diagnostics and the report's per-technique narrative.
    fn name(&self) -> &'static str;

    /// The metric this pass increments on each applied event.
    fn metric(&self) -> Metric;

    /// Applies the transform to `func`, drawing randomness from `rng`.
    fn run(&self, func: &mut Function, rng: &mut Rng) -> PassOutcome;
}

/// A transform that rewrites the whole module (globals, the constructor
/// list, or cross-function structure like the indirect-call table).
pub trait ModulePass {
    /// Name used in diagnostics and the report's per-technique narrative.
    fn name(&self) -> &'static str;

    /// The metric this pass increments on each applied event.
    fn metric(&self) -> Metric;

    /// Applies the transform to `module`, drawing randomness from `rng`.
    fn run(&self, module: &mut Module, rng: &mut Rng) -> PassOutcome;
}

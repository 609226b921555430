//! The pipeline's error type (spec §7): malformed input that fails
//! verification before any transform runs is the only fatal case —
//! everything else (a skipped technique, a reached hard cap) is folded
//! silently into the pipeline's own bookkeeping rather than surfaced here.

use obfx_ir::VerifyError;
use thiserror::Error;

/// What can stop [`crate::obfuscate`] from completing.
#[derive(Debug, Error)]
pub enum ObfuscationError {
    /// The module failed verification before any transform was applied.
    #[error("input module failed verification: {0}")]
    InvalidInput(VerifyError),

    /// The module failed verification after the final cycle — a defect in
    /// a transform, since every pass is required to leave its target
    /// verifier-clean.
    #[error("pipeline produced a module that fails verification: {0}")]
    OutputVerification(VerifyError),
}

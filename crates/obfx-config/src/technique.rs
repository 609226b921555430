//! The sixteen named techniques, their canonical report strings, their
//! report-effectiveness weights, and the bitset used internally by the
//! resolver to track a function's currently-enabled set cheaply.

use obfx_core::Metric;

bitflags::bitflags! {
    /// A compact enabled/disabled set over the sixteen techniques, used by
    /// [`crate::resolve_effective`] while it greedily drops techniques to
    /// fit a size cap.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TechniqueSet: u16 {
        const CONTROL_FLOW   = 1 << 0;
        const BOGUS_CODE     = 1 << 1;
        const FAKE_LOOPS     = 1 << 2;
        const INSTR_SUB      = 1 << 3;
        const FLATTEN        = 1 << 4;
        const MBA            = 1 << 5;
        const CONST_OBF      = 1 << 6;
        const VIRTUALIZE     = 1 << 7;
        const POLYMORPHIC    = 1 << 8;
        const METAMORPHIC    = 1 << 9;
        const STRING_ENCRYPT = 1 << 10;
        const INDIRECT_CALLS = 1 << 11;
        const ANTI_DEBUG     = 1 << 12;
        const ANTI_ANALYSIS  = 1 << 13;
        const ANTI_TAMPER    = 1 << 14;
        const DYNAMIC_OBF    = 1 << 15;
    }
}

/// One of the sixteen obfuscation techniques.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Technique {
    /// Control-flow opaque predicates.
    ControlFlow,
    /// Dead dummy-instruction insertion.
    BogusCode,
    /// Dead self-looping detour blocks.
    FakeLoops,
    /// Power-of-two mul/div rewritten as shifts.
    InstrSub,
    /// Switch-dispatch control-flow flattening.
    Flatten,
    /// Mixed boolean arithmetic identities.
    Mba,
    /// Store-reload constant hiding.
    ConstObf,
    /// Bytecode interpreter virtualization.
    Virtualize,
    /// Deep-cloned, structurally randomized function variants.
    Polymorphic,
    /// Block-reorder + no-op insertion.
    Metamorphic,
    /// Constant string encryption.
    StringEncrypt,
    /// Function-pointer indirect-call table.
    IndirectCalls,
    /// Debugger-presence probe on entry points.
    AntiDebug,
    /// Analysis-tool-presence probe on entry points.
    AntiAnalysis,
    /// Compile-time checksum + runtime compare.
    AntiTamper,
    /// No-op module-constructor nuisance.
    DynamicObf,
}

/// Every technique, in the order the pipeline applies function-level
/// transforms followed by module-level transforms (spec §4.H step 2-3).
pub const ALL_TECHNIQUES: [Technique; 16] = [
    Technique::ControlFlow,
    Technique::BogusCode,
    Technique::FakeLoops,
    Technique::InstrSub,
    Technique::Flatten,
    Technique::Mba,
    Technique::ConstObf,
    Technique::Virtualize,
    Technique::Polymorphic,
    Technique::Metamorphic,
    Technique::StringEncrypt,
    Technique::IndirectCalls,
    Technique::AntiDebug,
    Technique::AntiAnalysis,
    Technique::AntiTamper,
    Technique::DynamicObf,
];

impl Technique {
    /// The exact string the report's enabled-techniques list must use
    /// (spec §6).
    #[must_use]
    pub const fn canonical_name(self) -> &'static str {
        match self {
            Technique::ControlFlow => "Control Flow Obfuscation",
            Technique::StringEncrypt => "String Encryption",
            Technique::BogusCode => "Bogus Code Generation",
            Technique::FakeLoops => "Fake Loop Insertion",
            Technique::InstrSub => "Instruction Substitution",
            Technique::Flatten => "Control Flow Flattening",
            Technique::Mba => "Mixed Boolean Arithmetic (MBA)",
            Technique::AntiDebug => "Anti-Debug Protection",
            Technique::IndirectCalls => "Indirect Function Calls",
            Technique::ConstObf => "Constant Obfuscation",
            Technique::AntiTamper => "Anti-Tamper Protection",
            Technique::Virtualize => "Code Virtualization",
            Technique::Polymorphic => "Polymorphic Code Generation",
            Technique::AntiAnalysis => "Anti-Analysis Detection",
            Technique::Metamorphic => "Metamorphic Transformations",
            Technique::DynamicObf => "Dynamic Obfuscation",
        }
    }

    /// This bit in a [`TechniqueSet`].
    #[must_use]
    pub const fn flag(self) -> TechniqueSet {
        match self {
            Technique::ControlFlow => TechniqueSet::CONTROL_FLOW,
            Technique::BogusCode => TechniqueSet::BOGUS_CODE,
            Technique::FakeLoops => TechniqueSet::FAKE_LOOPS,
            Technique::InstrSub => TechniqueSet::INSTR_SUB,
            Technique::Flatten => TechniqueSet::FLATTEN,
            Technique::Mba => TechniqueSet::MBA,
            Technique::ConstObf => TechniqueSet::CONST_OBF,
            Technique::Virtualize => TechniqueSet::VIRTUALIZE,
            Technique::Polymorphic => TechniqueSet::POLYMORPHIC,
            Technique::Metamorphic => TechniqueSet::METAMORPHIC,
            Technique::StringEncrypt => TechniqueSet::STRING_ENCRYPT,
            Technique::IndirectCalls => TechniqueSet::INDIRECT_CALLS,
            Technique::AntiDebug => TechniqueSet::ANTI_DEBUG,
            Technique::AntiAnalysis => TechniqueSet::ANTI_ANALYSIS,
            Technique::AntiTamper => TechniqueSet::ANTI_TAMPER,
            Technique::DynamicObf => TechniqueSet::DYNAMIC_OBF,
        }
    }

    /// The [`Metric`] this technique's events are counted under, or `None`
    /// for anti-tamper — the spec's fixed metric enumeration has a slot
    /// for `cycles` where a sixteenth per-technique counter would
    /// otherwise go, leaving anti-tamper with no dedicated counter (see
    /// the design ledger for this decision).
    #[must_use]
    pub const fn metric(self) -> Option<Metric> {
        match self {
            Technique::ControlFlow => Some(Metric::ControlFlowObfs),
            Technique::BogusCode => Some(Metric::BogusInstrs),
            Technique::FakeLoops => Some(Metric::FakeLoops),
            Technique::StringEncrypt => Some(Metric::StringEncrypts),
            Technique::InstrSub => Some(Metric::InstrSubs),
            Technique::Flatten => Some(Metric::FlattenedFunctions),
            Technique::Mba => Some(Metric::MbaTransforms),
            Technique::AntiDebug => Some(Metric::AntiDebug),
            Technique::IndirectCalls => Some(Metric::IndirectCalls),
            Technique::ConstObf => Some(Metric::ConstObfs),
            Technique::Virtualize => Some(Metric::VirtualizedFunctions),
            Technique::Polymorphic => Some(Metric::PolymorphicVariants),
            Technique::AntiAnalysis => Some(Metric::AntiAnalysis),
            Technique::Metamorphic => Some(Metric::Metamorphic),
            Technique::DynamicObf => Some(Metric::DynamicObfs),
            Technique::AntiTamper => None,
        }
    }

    /// Fixed report effectiveness weight (spec §6 gives 13 of these
    /// verbatim; `IndirectCalls`, `ConstObf` and `AntiTamper` are not
    /// listed there and are assigned here — see the design ledger).
    #[must_use]
    pub const fn weight(self) -> u32 {
        match self {
            Technique::ControlFlow => 15,
            Technique::StringEncrypt => 10,
            Technique::BogusCode => 12,
            Technique::FakeLoops => 8,
            Technique::InstrSub => 7,
            Technique::Flatten => 18,
            Technique::Mba => 14,
            Technique::AntiDebug => 10,
            Technique::Virtualize => 20,
            Technique::Polymorphic => 16,
            Technique::Metamorphic => 13,
            Technique::DynamicObf => 12,
            Technique::AntiAnalysis => 11,
            Technique::IndirectCalls => 9,
            Technique::ConstObf => 6,
            Technique::AntiTamper => 9,
        }
    }
}

/// Total of every technique's weight — the effectiveness score's
/// denominator.
#[must_use]
pub fn total_weight() -> u32 {
    ALL_TECHNIQUES.iter().map(|&t| t.weight()).sum()
}

//! The fixed set of per-technique counters accumulated across a pass run
//! (spec §3 "Metrics", §4.C). Every counter is additive; a snapshot is
//! taken once, when the report is emitted.

/// One of the sixteen fixed metric keys. Order matches the declaration
/// order in spec §3 and is preserved by [`Metrics::iter`], so the report
/// emitter's "per-technique metrics" section lists them in a stable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Metric {
    /// `control-flow-obfs`
    ControlFlowObfs = 0,
    /// `bogus-instrs`
    BogusInstrs = 1,
    /// `fake-loops`
    FakeLoops = 2,
    /// `string-encrypts`
    StringEncrypts = 3,
    /// `cycles`
    Cycles = 4,
    /// `instr-subs`
    InstrSubs = 5,
    /// `flattened-functions`
    FlattenedFunctions = 6,
    /// `mba-transforms`
    MbaTransforms = 7,
    /// `anti-debug`
    AntiDebug = 8,
    /// `indirect-calls`
    IndirectCalls = 9,
    /// `const-obfs`
    ConstObfs = 10,
    /// `virtualized-functions`
    VirtualizedFunctions = 11,
    /// `polymorphic-variants`
    PolymorphicVariants = 12,
    /// `anti-analysis`
    AntiAnalysis = 13,
    /// `metamorphic`
    Metamorphic = 14,
    /// `dynamic-obfs`
    DynamicObfs = 15,
}

/// Total number of distinct metric keys.
pub const METRIC_COUNT: usize = 16;

/// All metric keys, in declaration order.
pub const ALL_METRICS: [Metric; METRIC_COUNT] = [
    Metric::ControlFlowObfs,
    Metric::BogusInstrs,
    Metric::FakeLoops,
    Metric::StringEncrypts,
    Metric::Cycles,
    Metric::InstrSubs,
    Metric::FlattenedFunctions,
    Metric::MbaTransforms,
    Metric::AntiDebug,
    Metric::IndirectCalls,
    Metric::ConstObfs,
    Metric::VirtualizedFunctions,
    Metric::PolymorphicVariants,
    Metric::AntiAnalysis,
    Metric::Metamorphic,
    Metric::DynamicObfs,
];

impl Metric {
    /// The key's canonical, dashed, lowercase spelling (spec §3).
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Metric::ControlFlowObfs => "control-flow-obfs",
            Metric::BogusInstrs => "bogus-instrs",
            Metric::FakeLoops => "fake-loops",
            Metric::StringEncrypts => "string-encrypts",
            Metric::Cycles => "cycles",
            Metric::InstrSubs => "instr-subs",
            Metric::FlattenedFunctions => "flattened-functions",
            Metric::MbaTransforms => "mba-transforms",
            Metric::AntiDebug => "anti-debug",
            Metric::IndirectCalls => "indirect-calls",
            Metric::ConstObfs => "const-obfs",
            Metric::VirtualizedFunctions => "virtualized-functions",
            Metric::PolymorphicVariants => "polymorphic-variants",
            Metric::AntiAnalysis => "anti-analysis",
            Metric::Metamorphic => "metamorphic",
            Metric::DynamicObfs => "dynamic-obfs",
        }
    }
}

/// Additive integer counters keyed by [`Metric`].
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    counts: [u64; METRIC_COUNT],
}

impl Metrics {
    /// An all-zero counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` to the counter for `metric`.
    pub fn add(&mut self, metric: Metric, n: u64) {
        self.counts[metric as usize] += n;
    }

    /// Adds one to the counter for `metric`. The common case.
    pub fn bump(&mut self, metric: Metric) {
        self.add(metric, 1);
    }

    /// Current value of `metric`'s counter.
    #[must_use]
    pub fn get(&self, metric: Metric) -> u64 {
        self.counts[metric as usize]
    }

    /// Sum of every counter — used for the report's "total transformations" footer.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Iterates `(metric, count)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, u64)> + '_ {
        ALL_METRICS.iter().map(|&m| (m, self.get(m)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_and_get() {
        let mut m = Metrics::new();
        m.bump(Metric::BogusInstrs);
        m.bump(Metric::BogusInstrs);
        m.add(Metric::Cycles, 3);
        assert_eq!(m.get(Metric::BogusInstrs), 2);
        assert_eq!(m.get(Metric::Cycles), 3);
        assert_eq!(m.get(Metric::AntiDebug), 0);
    }

    #[test]
    fn total_sums_everything() {
        let mut m = Metrics::new();
        m.add(Metric::ControlFlowObfs, 5);
        m.add(Metric::FlattenedFunctions, 2);
        assert_eq!(m.total(), 7);
    }

    #[test]
    fn iter_order_matches_declaration() {
        let m = Metrics::new();
        let keys: Vec<_> = m.iter().map(|(metric, _)| metric.key()).collect();
        assert_eq!(keys.first(), Some(&"control-flow-obfs"));
        assert_eq!(keys.last(), Some(&"dynamic-obfs"));
        assert_eq!(keys.len(), METRIC_COUNT);
    }

    #[test]
    fn keys_are_unique() {
        let mut keys: Vec<_> = ALL_METRICS.iter().map(|m| m.key()).collect();
        let len_before = keys.len();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), len_before);
    }
}

//! The auto-select-by-criticality resolver (spec §4.E): derives a
//! per-function effective configuration from the base configuration and
//! that function's [`FunctionAnalysis`], then enforces the size cap by
//! dropping techniques greedily.

use obfx_analysis::{CriticalityLevel, FunctionAnalysis};

use crate::config::{Config, SizeMode};
use crate::technique::{Technique, ALL_TECHNIQUES};

/// Techniques disabled outright on minimal/standard functions before the
/// size cap is even considered — the ones with the largest fixed
/// instruction-count impact.
const HEAVY_TECHNIQUES: [Technique; 4] =
    [Technique::Flatten, Technique::Virtualize, Technique::Polymorphic, Technique::Metamorphic];

/// Estimated per-function instruction-count growth percent contributed by
/// enabling `technique` under `config`'s numeric parameters (spec §4.D:
/// "a static multiplier table applied to the function's current
/// instruction count"). Polymorphic cloning and string encryption touch
/// globals or add sibling functions rather than growing the function
/// itself, so they contribute zero here even though they still cost
/// report-effectiveness weight.
#[must_use]
pub fn estimate_growth_pct(config: &Config, technique: Technique) -> u32 {
    match technique {
        Technique::ControlFlow => 5,
        Technique::BogusCode => config.bogus_percent,
        Technique::FakeLoops => config.fake_loop_count.saturating_mul(8),
        Technique::InstrSub => 2,
        Technique::Flatten => 80,
        Technique::Mba => config.mba_level.saturating_mul(5),
        Technique::ConstObf => 15,
        Technique::Virtualize => 300,
        Technique::Polymorphic | Technique::StringEncrypt | Technique::DynamicObf => 0,
        Technique::Metamorphic => 10,
        Technique::IndirectCalls => 5,
        Technique::AntiDebug | Technique::AntiAnalysis => 15,
        Technique::AntiTamper => 10,
    }
}

/// Derives the effective configuration for one function.
///
/// When `config.auto_select` is false the base configuration is returned
/// unchanged for every function — no per-function customization and no
/// size cap, matching the literal reading of spec §4.E ("if auto-select
/// is enabled, ... derives an effective per-function configuration").
#[must_use]
pub fn resolve_effective(config: &Config, analysis: &FunctionAnalysis) -> Config {
    if !config.auto_select {
        return config.clone();
    }

    let mut effective = config.clone();
    match analysis.level {
        CriticalityLevel::Critical => {
            for &t in &ALL_TECHNIQUES {
                effective.set_enabled(t, true);
            }
        }
        CriticalityLevel::Important => {}
        CriticalityLevel::Standard | CriticalityLevel::Minimal => {
            for &t in &HEAVY_TECHNIQUES {
                effective.set_enabled(t, false);
            }
        }
    }

    if effective.size_mode != SizeMode::None {
        enforce_size_cap(&mut effective);
    }

    effective
}

/// Drops enabled techniques, cheapest estimated growth first, until the
/// sum of remaining enabled techniques' estimated growth fits
/// `max_growth_pct`. This is the literal spec behavior (§4.E: "dropped
/// greedily, cheapest first") even though it leaves the heaviest growth
/// contributors disabled last.
fn enforce_size_cap(config: &mut Config) {
    loop {
        let mut enabled: Vec<Technique> =
            ALL_TECHNIQUES.iter().copied().filter(|&t| config.is_enabled(t)).collect();
        if enabled.is_empty() {
            return;
        }
        let total: u32 = enabled.iter().map(|&t| estimate_growth_pct(config, t)).sum();
        if total <= config.max_growth_pct {
            return;
        }
        enabled.sort_by_key(|&t| estimate_growth_pct(config, t));
        config.set_enabled(enabled[0], false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StringScheme;
    use obfx_analysis::CriticalityLevel;

    fn analysis(level: CriticalityLevel) -> FunctionAnalysis {
        FunctionAnalysis { name: "f".to_string(), level, complexity: 1, sensitivity: 0, caller_count: 0 }
    }

    #[test]
    fn auto_select_off_returns_base_unchanged() {
        let mut base = Config::default();
        base.auto_select = false;
        base.virtualize = true;
        base.size_mode = crate::config::SizeMode::Aggressive;
        base.max_growth_pct = 1;
        let effective = resolve_effective(&base, &analysis(CriticalityLevel::Minimal));
        assert_eq!(effective, base);
    }

    #[test]
    fn critical_enables_everything() {
        let base = Config::default();
        let effective = resolve_effective(&base, &analysis(CriticalityLevel::Critical));
        for &t in &ALL_TECHNIQUES {
            assert!(effective.is_enabled(t));
        }
    }

    #[test]
    fn minimal_disables_heavy_techniques() {
        let mut base = Config::default();
        for &t in &ALL_TECHNIQUES {
            base.set_enabled(t, true);
        }
        let effective = resolve_effective(&base, &analysis(CriticalityLevel::Minimal));
        for &t in &HEAVY_TECHNIQUES {
            assert!(!effective.is_enabled(t));
        }
        assert!(effective.is_enabled(Technique::ControlFlow));
    }

    #[test]
    fn size_cap_drops_cheapest_first_until_it_fits() {
        let mut base = Config::default();
        base.string_scheme = StringScheme::WeakXor;
        base.set_enabled(Technique::ControlFlow, true); // growth 5
        base.set_enabled(Technique::InstrSub, true); // growth 2
        base.set_enabled(Technique::ConstObf, true); // growth 15
        base.size_mode = crate::config::SizeMode::Balanced;
        base.max_growth_pct = 10;

        let effective = resolve_effective(&base, &analysis(CriticalityLevel::Important));
        // total would be 22; cheapest (InstrSub=2) drops first, then
        // ControlFlow=5, leaving ConstObf=15 which alone still exceeds 10,
        // so every technique ends up disabled.
        assert!(!effective.is_enabled(Technique::InstrSub));
        assert!(!effective.is_enabled(Technique::ControlFlow));
        assert!(!effective.is_enabled(Technique::ConstObf));
    }
}

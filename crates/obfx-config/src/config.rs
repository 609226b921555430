//! The immutable per-run configuration record (spec §3, §6) and the three
//! built-in presets.

use serde::{Deserialize, Serialize};

use crate::technique::{Technique, TechniqueSet};

/// String-encryption scheme selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StringScheme {
    /// Single-byte XOR with a static key — obfuscation-grade only.
    WeakXor,
    /// RC4 under a random 16-byte key.
    Rc4Simple,
    /// RC4 under a 32-byte key derived from the module code hash.
    Rc4Derived,
}

/// Size-budget enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeMode {
    /// No size cap is enforced; auto-select still runs if enabled but
    /// never drops a technique for growth reasons.
    None,
    /// Conservative: prefer disabling heavy techniques.
    Minimal,
    /// The default trade-off.
    Balanced,
    /// Accept large size growth for maximum effect.
    Aggressive,
}

/// An immutable per-run configuration: which of the 16 techniques are
/// enabled, their numeric parameters, and the size-budget / auto-select
/// policy applied on top (spec §3 "Configuration").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Control-flow opaque predicates.
    pub control_flow: bool,
    /// Bogus dead-code insertion.
    pub bogus_code: bool,
    /// Fake self-looping detour blocks.
    pub fake_loops: bool,
    /// Power-of-two mul/div → shift rewriting.
    pub instr_sub: bool,
    /// Switch-dispatch control-flow flattening.
    pub flatten: bool,
    /// Mixed boolean arithmetic identities.
    pub mba: bool,
    /// Store-reload constant hiding.
    pub const_obf: bool,
    /// Bytecode-interpreter virtualization.
    pub virtualize: bool,
    /// Deep-cloned structurally-randomized function variants.
    pub polymorphic: bool,
    /// Block-reorder + no-op insertion.
    pub metamorphic: bool,
    /// Constant string encryption.
    pub string_encrypt: bool,
    /// Function-pointer indirect-call table.
    pub indirect_calls: bool,
    /// Debugger-presence probe on entry points.
    pub anti_debug: bool,
    /// Analysis-tool-presence probe on entry points.
    pub anti_analysis: bool,
    /// Compile-time checksum + runtime compare.
    pub anti_tamper: bool,
    /// No-op module-constructor nuisance.
    pub dynamic_obf: bool,

    /// Number of obfuscation cycles to run (default 3).
    pub cycles: u32,
    /// Bogus-code percentage per eligible block (default 30).
    pub bogus_percent: u32,
    /// Fake loops to insert per function, per cycle (default 5).
    pub fake_loop_count: u32,
    /// Mixed boolean arithmetic complexity level (default 3).
    pub mba_level: u32,
    /// Flattening application probability, percent (default 80).
    pub flatten_prob: u32,
    /// Virtualization aggressiveness level (default 2).
    pub vm_level: u32,
    /// Polymorphic variants created per original function (default 5).
    pub poly_variants: u32,
    /// String-encryption scheme.
    pub string_scheme: StringScheme,
    /// PBKDF2-style derivation iteration count (default 1000).
    pub pbkdf2_iters: u32,
    /// Whether to emit a decrypt-at-startup module constructor.
    pub decrypt_at_startup: bool,
    /// Size-budget enforcement mode.
    pub size_mode: SizeMode,
    /// Maximum acceptable per-function instruction-count growth, percent
    /// (default 200).
    pub max_growth_pct: u32,
    /// Whether the configuration resolver derives a per-function effective
    /// configuration from criticality analysis (default true).
    pub auto_select: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_flow: false,
            bogus_code: false,
            fake_loops: false,
            instr_sub: false,
            flatten: false,
            mba: false,
            const_obf: false,
            virtualize: false,
            polymorphic: false,
            metamorphic: false,
            string_encrypt: false,
            indirect_calls: false,
            anti_debug: false,
            anti_analysis: false,
            anti_tamper: false,
            dynamic_obf: false,

            cycles: 3,
            bogus_percent: 30,
            fake_loop_count: 5,
            mba_level: 3,
            flatten_prob: 80,
            vm_level: 2,
            poly_variants: 5,
            string_scheme: StringScheme::WeakXor,
            pbkdf2_iters: 1000,
            decrypt_at_startup: true,
            size_mode: SizeMode::None,
            max_growth_pct: 200,
            auto_select: true,
        }
    }
}

impl Config {
    /// Whether `technique` is currently toggled on.
    #[must_use]
    pub const fn is_enabled(&self, technique: Technique) -> bool {
        match technique {
            Technique::ControlFlow => self.control_flow,
            Technique::BogusCode => self.bogus_code,
            Technique::FakeLoops => self.fake_loops,
            Technique::InstrSub => self.instr_sub,
            Technique::Flatten => self.flatten,
            Technique::Mba => self.mba,
            Technique::ConstObf => self.const_obf,
            Technique::Virtualize => self.virtualize,
            Technique::Polymorphic => self.polymorphic,
            Technique::Metamorphic => self.metamorphic,
            Technique::StringEncrypt => self.string_encrypt,
            Technique::IndirectCalls => self.indirect_calls,
            Technique::AntiDebug => self.anti_debug,
            Technique::AntiAnalysis => self.anti_analysis,
            Technique::AntiTamper => self.anti_tamper,
            Technique::DynamicObf => self.dynamic_obf,
        }
    }

    /// Flips `technique`'s toggle.
    pub fn set_enabled(&mut self, technique: Technique, enabled: bool) {
        let field = match technique {
            Technique::ControlFlow => &mut self.control_flow,
            Technique::BogusCode => &mut self.bogus_code,
            Technique::FakeLoops => &mut self.fake_loops,
            Technique::InstrSub => &mut self.instr_sub,
            Technique::Flatten => &mut self.flatten,
            Technique::Mba => &mut self.mba,
            Technique::ConstObf => &mut self.const_obf,
            Technique::Virtualize => &mut self.virtualize,
            Technique::Polymorphic => &mut self.polymorphic,
            Technique::Metamorphic => &mut self.metamorphic,
            Technique::StringEncrypt => &mut self.string_encrypt,
            Technique::IndirectCalls => &mut self.indirect_calls,
            Technique::AntiDebug => &mut self.anti_debug,
            Technique::AntiAnalysis => &mut self.anti_analysis,
            Technique::AntiTamper => &mut self.anti_tamper,
            Technique::DynamicObf => &mut self.dynamic_obf,
        };
        *field = enabled;
    }

    /// The currently-enabled set, as a [`TechniqueSet`] bitset.
    #[must_use]
    pub fn enabled_set(&self) -> TechniqueSet {
        crate::technique::ALL_TECHNIQUES
            .iter()
            .filter(|&&t| self.is_enabled(t))
            .fold(TechniqueSet::empty(), |acc, &t| acc | t.flag())
    }
}

/// Built-in presets — pure functions from preset name to configuration
/// (spec §6).
pub mod presets {
    use super::{Config, StringScheme};
    use crate::technique::Technique;

    /// `control-flow + string-encryption`, one cycle.
    #[must_use]
    pub fn minimal() -> Config {
        let mut cfg = Config { cycles: 1, ..Config::default() };
        cfg.set_enabled(Technique::ControlFlow, true);
        cfg.set_enabled(Technique::StringEncrypt, true);
        cfg
    }

    /// `minimal` plus bogus code, fake loops, anti-debug and indirect
    /// calls, three cycles.
    #[must_use]
    pub fn balanced() -> Config {
        let mut cfg = minimal();
        cfg.cycles = 3;
        cfg.bogus_percent = 30;
        cfg.set_enabled(Technique::BogusCode, true);
        cfg.set_enabled(Technique::FakeLoops, true);
        cfg.set_enabled(Technique::AntiDebug, true);
        cfg.set_enabled(Technique::IndirectCalls, true);
        cfg
    }

    /// Every technique except virtualization, five cycles, heavier
    /// parameters, RC4-derived string encryption.
    #[must_use]
    pub fn aggressive() -> Config {
        let mut cfg = balanced();
        cfg.cycles = 5;
        cfg.bogus_percent = 50;
        cfg.string_scheme = StringScheme::Rc4Derived;
        cfg.pbkdf2_iters = 2000;
        for &t in &crate::technique::ALL_TECHNIQUES {
            if t != Technique::Virtualize {
                cfg.set_enabled(t, true);
            }
        }
        cfg.set_enabled(Technique::Virtualize, false);
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.cycles, 3);
        assert_eq!(cfg.bogus_percent, 30);
        assert_eq!(cfg.max_growth_pct, 200);
        assert!(cfg.auto_select);
        assert!(cfg.decrypt_at_startup);
    }

    #[test]
    fn minimal_preset_enables_exactly_two() {
        let cfg = presets::minimal();
        assert_eq!(cfg.cycles, 1);
        assert!(cfg.control_flow);
        assert!(cfg.string_encrypt);
        assert!(!cfg.bogus_code);
        assert!(!cfg.virtualize);
    }

    #[test]
    fn aggressive_preset_disables_only_virtualize() {
        let cfg = presets::aggressive();
        assert!(!cfg.virtualize);
        for &t in &crate::technique::ALL_TECHNIQUES {
            if t != Technique::Virtualize {
                assert!(cfg.is_enabled(t), "{t:?} should be enabled by aggressive");
            }
        }
        assert_eq!(cfg.cycles, 5);
        assert_eq!(cfg.bogus_percent, 50);
        assert_eq!(cfg.string_scheme, StringScheme::Rc4Derived);
        assert_eq!(cfg.pbkdf2_iters, 2000);
    }

    #[test]
    fn set_enabled_round_trips_through_is_enabled() {
        let mut cfg = Config::default();
        for &t in &crate::technique::ALL_TECHNIQUES {
            assert!(!cfg.is_enabled(t));
            cfg.set_enabled(t, true);
            assert!(cfg.is_enabled(t));
        }
    }
}

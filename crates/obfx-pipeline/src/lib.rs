//! The pipeline driver (spec §4.H): the only public entry point into the
//! obfuscation engine. Builds every pass once, runs the configured number
//! of cycles over a module, and renders the plain-text report.
//!
//! # Pass ordering
//!
//! Each cycle re-runs [`obfx_analysis::analyze_module`] (the module's
//! shape changes between cycles, so nothing from the previous cycle's
//! analysis is reused) and then, for every function present when the
//! pipeline started:
//!
//! 1. the eight per-function transforms, in the spec's fixed order:
//!    control-flow, bogus-code, fake-loops, instr-sub, flatten, mba,
//!    const-obf, virtualize — gated per function by
//!    [`obfx_config::resolve_effective`];
//! 2. polymorphic cloning, once, in cycle 1 only — running it every cycle
//!    would reclone every already-cloned variant's original and multiply
//!    the variant count past the configured one (see `DESIGN.md`);
//! 3. metamorphic transformation, per original function;
//! 4. the module-level transforms, in the spec's bullet order:
//!    string-encryption and indirect-calls every cycle, anti-debug and
//!    anti-analysis in cycle 1 only, dynamic-obfuscation and anti-tamper
//!    in the final cycle only.
//!
//! Every stateful pass instance (most notably [`Virtualize`], whose
//! per-module virtualization budget is tracked in the instance itself) is
//! constructed exactly once, before the cycle loop, and reused across every
//! cycle.

#![forbid(unsafe_code)]

mod error;
mod report;

use std::collections::HashMap;

use obfx_analysis::analyze_module;
use obfx_config::{resolve_effective, Config, Technique};
use obfx_core::{Metrics, Rng};
use obfx_ir::{verify_module, Module};
use obfx_pass::{FunctionPass, ModulePass, PassOutcome};
use obfx_transforms::{
    emit_decrypt_constructor, AntiAnalysis, AntiDebug, AntiTamper, BogusCode, ConstObf, DynamicObf, FakeLoops,
    Flatten, IndirectCalls, InstrSub, Mba, Metamorphic, OpaquePredicates, Polymorphic, StringEncrypt, Virtualize,
};

pub use error::ObfuscationError;

/// Adds `outcome`'s events to `metrics` (when `technique` has a dedicated
/// [`obfx_core::Metric`] slot) and to `technique_events` (always — this is
/// the only place anti-tamper's event count is recorded, since it has no
/// metric slot of its own).
fn record(
    metrics: &mut Metrics,
    technique_events: &mut HashMap<Technique, u64>,
    technique: Technique,
    outcome: PassOutcome,
) {
    if let Some(metric) = technique.metric() {
        metrics.add(metric, outcome.events);
    }
    *technique_events.entry(technique).or_insert(0) += outcome.events;
}

/// Runs the configured obfuscation pipeline over `module` in place and
/// returns the rendered plain-text report.
///
/// The only public entry point into the engine. Writing the report to disk
/// (or anywhere else) is the caller's responsibility — this function never
/// touches the filesystem.
///
/// # Errors
///
/// Returns [`ObfuscationError::InvalidInput`] if `module` fails
/// verification before any transform runs, or
/// [`ObfuscationError::OutputVerification`] if the module fails
/// verification after the final cycle (a defect in a transform, since every
/// pass is required to leave its target verifier-clean).
pub fn obfuscate(module: &mut Module, config: &Config) -> Result<String, ObfuscationError> {
    verify_module(module).map_err(ObfuscationError::InvalidInput)?;

    let original_functions: Vec<String> = module.defined_functions().map(|f| f.name.clone()).collect();

    let mut rng = Rng::from_name(&module.name);
    let mut metrics = Metrics::new();
    let mut technique_events: HashMap<Technique, u64> = HashMap::new();

    let opaque_predicates = OpaquePredicates;
    let bogus_code = BogusCode { percent: config.bogus_percent };
    let fake_loops = FakeLoops { count: config.fake_loop_count };
    let instr_sub = InstrSub;
    let flatten = Flatten;
    let mba = Mba { level: config.mba_level };
    let const_obf = ConstObf;
    let virtualize = Virtualize::new(config.vm_level);
    let metamorphic = Metamorphic;
    let polymorphic = Polymorphic { variants: config.poly_variants };
    let string_encrypt = StringEncrypt { scheme: config.string_scheme, pbkdf2_iters: config.pbkdf2_iters };
    let indirect_calls = IndirectCalls;
    let anti_debug = AntiDebug;
    let anti_analysis = AntiAnalysis;
    let anti_tamper = AntiTamper;
    let dynamic_obf = DynamicObf;

    let mut strings_encrypted = false;
    let mut cycles_run = 0u32;

    for cycle in 1..=config.cycles {
        tracing::debug!(module = %module.name, cycle, "starting obfuscation cycle");
        let analyses = analyze_module(module);
        let analysis_by_name: HashMap<&str, _> = analyses.iter().map(|a| (a.name.as_str(), a)).collect();

        for fname in &original_functions {
            let Some(&analysis) = analysis_by_name.get(fname.as_str()) else { continue };
            let effective = resolve_effective(config, analysis);
            let Some(func) = module.functions.get_mut(fname) else { continue };
            if func.is_declaration() {
                continue;
            }

            if effective.is_enabled(Technique::ControlFlow) {
                let outcome = opaque_predicates.run(func, &mut rng);
                record(&mut metrics, &mut technique_events, Technique::ControlFlow, outcome);
            }
            if effective.is_enabled(Technique::BogusCode) {
                let outcome = bogus_code.run(func, &mut rng);
                record(&mut metrics, &mut technique_events, Technique::BogusCode, outcome);
            }
            if effective.is_enabled(Technique::FakeLoops) {
                let outcome = fake_loops.run(func, &mut rng);
                record(&mut metrics, &mut technique_events, Technique::FakeLoops, outcome);
            }
            if effective.is_enabled(Technique::InstrSub) {
                let outcome = instr_sub.run(func, &mut rng);
                record(&mut metrics, &mut technique_events, Technique::InstrSub, outcome);
            }
            // flatten_prob gates whether flatten runs at all for this
            // function; Flatten itself has no probability field and
            // always applies when called (see DESIGN.md).
            if effective.is_enabled(Technique::Flatten) && rng.gen_bool_pct(effective.flatten_prob) {
                let outcome = flatten.run(func, &mut rng);
                record(&mut metrics, &mut technique_events, Technique::Flatten, outcome);
            }
            if effective.is_enabled(Technique::Mba) {
                let outcome = mba.run(func, &mut rng);
                record(&mut metrics, &mut technique_events, Technique::Mba, outcome);
            }
            if effective.is_enabled(Technique::ConstObf) {
                let outcome = const_obf.run(func, &mut rng);
                record(&mut metrics, &mut technique_events, Technique::ConstObf, outcome);
            }
            if effective.is_enabled(Technique::Virtualize) {
                let outcome = virtualize.run(func, &mut rng);
                record(&mut metrics, &mut technique_events, Technique::Virtualize, outcome);
            }
        }

        // Polymorphic cloning runs once, in cycle 1 only: it reclones
        // every original (non-generated) function on each call, so a
        // once-per-cycle invocation would multiply the variant count by
        // the cycle count instead of producing exactly
        // `original_count * poly_variants` variants.
        if cycle == 1 && config.polymorphic {
            let outcome = polymorphic.run(module, &mut rng);
            record(&mut metrics, &mut technique_events, Technique::Polymorphic, outcome);
        }

        for fname in &original_functions {
            let Some(&analysis) = analysis_by_name.get(fname.as_str()) else { continue };
            let effective = resolve_effective(config, analysis);
            if !effective.is_enabled(Technique::Metamorphic) {
                continue;
            }
            let Some(func) = module.functions.get_mut(fname) else { continue };
            if func.is_declaration() {
                continue;
            }
            let outcome = metamorphic.run(func, &mut rng);
            record(&mut metrics, &mut technique_events, Technique::Metamorphic, outcome);
        }

        if config.string_encrypt {
            let outcome = string_encrypt.run(module, &mut rng);
            if outcome.modified {
                strings_encrypted = true;
            }
            record(&mut metrics, &mut technique_events, Technique::StringEncrypt, outcome);
        }
        if config.indirect_calls {
            let outcome = indirect_calls.run(module, &mut rng);
            record(&mut metrics, &mut technique_events, Technique::IndirectCalls, outcome);
        }
        if cycle == 1 && config.anti_debug {
            let outcome = anti_debug.run(module, &mut rng);
            record(&mut metrics, &mut technique_events, Technique::AntiDebug, outcome);
        }
        if cycle == 1 && config.anti_analysis {
            let outcome = anti_analysis.run(module, &mut rng);
            record(&mut metrics, &mut technique_events, Technique::AntiAnalysis, outcome);
        }
        if cycle == config.cycles && config.dynamic_obf {
            let outcome = dynamic_obf.run(module, &mut rng);
            record(&mut metrics, &mut technique_events, Technique::DynamicObf, outcome);
        }
        if cycle == config.cycles && config.anti_tamper {
            let outcome = anti_tamper.run(module, &mut rng);
            record(&mut metrics, &mut technique_events, Technique::AntiTamper, outcome);
        }

        metrics.add(obfx_core::Metric::Cycles, 1);
        cycles_run += 1;
    }

    if strings_encrypted && config.decrypt_at_startup {
        emit_decrypt_constructor(module);
    }

    verify_module(module).map_err(ObfuscationError::OutputVerification)?;

    tracing::info!(module = %module.name, cycles_run, total = metrics.total(), "obfuscation pipeline complete");

    Ok(report::render(module, config, &metrics, &technique_events, cycles_run))
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_config::presets;
    use obfx_ir::{append, Callee, FunctionBuilder, Linkage, Operand, Type};

    fn sample_module() -> Module {
        let mut m = Module::new("sample.ll", "x86_64-unknown-linux-gnu", "e-m:e-i64:64-f80:128-n8:16:32:64-S128");

        let mut helper = obfx_ir::Function::new("compute", vec![], Type::I32, Linkage::Internal);
        let entry = helper.entry;
        let (sum, add) = {
            let mut b = FunctionBuilder::new(&mut helper);
            b.binary(obfx_ir::BinOp::Add, Operand::const_i64(2), Operand::const_i64(3), Type::I32)
        };
        append(&mut helper, entry, add);
        let ret = FunctionBuilder::new(&mut helper).ret(Some(Operand::Value(sum)));
        append(&mut helper, entry, ret);
        m.functions.insert(helper.name.clone(), helper);

        let mut main = obfx_ir::Function::new("main", vec![], Type::I32, Linkage::External);
        let entry = main.entry;
        let (_, call) =
            FunctionBuilder::new(&mut main).call(Callee::Direct("compute".to_string()), vec![], Type::I32);
        append(&mut main, entry, call);
        let ret = FunctionBuilder::new(&mut main).ret(Some(Operand::const_i64(0)));
        append(&mut main, entry, ret);
        m.functions.insert(main.name.clone(), main);

        m
    }

    #[test]
    fn minimal_preset_runs_and_produces_a_verifier_clean_module() {
        let mut module = sample_module();
        let config = presets::minimal();
        let report = obfuscate(&mut module, &config).expect("minimal preset must succeed");
        assert!(report.contains("OBFX OBFUSCATION REPORT"));
        assert!(report.contains("Control Flow Obfuscation"));
        verify_module(&module).expect("pipeline output must verify");
    }

    #[test]
    fn balanced_preset_runs_three_cycles_and_records_cycle_metric() {
        let mut module = sample_module();
        let config = presets::balanced();
        let report = obfuscate(&mut module, &config).expect("balanced preset must succeed");
        assert!(report.contains("cycles completed:        3"));
        verify_module(&module).expect("pipeline output must verify");
    }

    #[test]
    fn aggressive_preset_runs_and_stays_verifier_clean() {
        let mut module = sample_module();
        let config = presets::aggressive();
        let report = obfuscate(&mut module, &config).expect("aggressive preset must succeed");
        assert!(report.contains("EFFECTIVENESS SCORE"));
        verify_module(&module).expect("pipeline output must verify");
    }

    #[test]
    fn disabled_config_runs_cycles_with_no_transformations() {
        let mut module = sample_module();
        let config = Config { cycles: 2, ..Config::default() };
        let report = obfuscate(&mut module, &config).expect("all-disabled config must still succeed");
        assert!(report.contains("cycles completed:        2"));
        assert!(report.contains("total transformations:   0"));
    }

    #[test]
    fn invalid_input_module_is_rejected_before_any_transform_runs() {
        let mut module = Module::new("broken", "x86_64-unknown-linux-gnu", "e");
        let f = obfx_ir::Function::new("f", vec![], Type::Void, Linkage::Internal);
        // An entry block with no terminator fails verification immediately.
        module.functions.insert(f.name.clone(), f);
        let config = Config::default();
        let err = obfuscate(&mut module, &config).expect_err("empty entry block must fail verification");
        assert!(matches!(err, ObfuscationError::InvalidInput(_)));
    }

    #[test]
    fn polymorphic_variant_count_matches_original_count_times_configured_variants() {
        let mut module = sample_module();
        let original_count = module.defined_functions().count() as u64;
        let mut config = Config { cycles: 3, ..Config::default() };
        config.set_enabled(Technique::Polymorphic, true);
        config.auto_select = false;
        config.poly_variants = 2;

        obfuscate(&mut module, &config).expect("polymorphic run must succeed");

        let variant_count = module.defined_functions().filter(|f| f.generated).count() as u64;
        assert_eq!(
            variant_count,
            original_count * 2,
            "running polymorphic across multiple cycles must not multiply the variant count"
        );
    }
}

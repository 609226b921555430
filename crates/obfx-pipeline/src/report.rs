//! Plain-text report renderer (spec §4.I, §6): one reproducible document
//! describing what a pipeline run did to a module — the only output the
//! driver hands back to its caller, who decides whether and where to write
//! it to disk.

use std::collections::HashMap;
use std::fmt::Write as _;

use obfx_config::{Config, Technique, ALL_TECHNIQUES};
use obfx_core::Metrics;
use obfx_ir::Module;
use time::OffsetDateTime;

const WIDTH: usize = 78;

fn rule(out: &mut String) {
    let _ = writeln!(out, "{}", "=".repeat(WIDTH));
}

fn section(out: &mut String, title: &str) {
    rule(out);
    let _ = writeln!(out, "{title}");
    rule(out);
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
    )
}

/// Renders the full report for one completed pipeline run.
///
/// `technique_events` carries every technique's per-run event count,
/// including anti-tamper's — which has no [`obfx_core::Metric`] slot of its
/// own and so would otherwise be invisible in the per-technique metrics
/// section.
#[must_use]
pub fn render(
    module: &Module,
    config: &Config,
    metrics: &Metrics,
    technique_events: &HashMap<Technique, u64>,
    cycles_run: u32,
) -> String {
    let mut out = String::new();

    section(&mut out, "OBFX OBFUSCATION REPORT");
    let _ = writeln!(out, "module:    {}", module.name);
    let _ = writeln!(out, "generated: {}", timestamp());
    let _ = writeln!(out);

    section(&mut out, "INPUT PARAMETERS");
    let _ = writeln!(out, "cycles:             {}", config.cycles);
    let _ = writeln!(out, "bogus-percent:      {}", config.bogus_percent);
    let _ = writeln!(out, "fake-loop-count:    {}", config.fake_loop_count);
    let _ = writeln!(out, "mba-level:          {}", config.mba_level);
    let _ = writeln!(out, "flatten-prob:       {}", config.flatten_prob);
    let _ = writeln!(out, "vm-level:           {}", config.vm_level);
    let _ = writeln!(out, "poly-variants:      {}", config.poly_variants);
    let _ = writeln!(out, "string-scheme:      {:?}", config.string_scheme);
    let _ = writeln!(out, "pbkdf2-iters:       {}", config.pbkdf2_iters);
    let _ = writeln!(out, "decrypt-at-startup: {}", config.decrypt_at_startup);
    let _ = writeln!(out, "size-mode:          {:?}", config.size_mode);
    let _ = writeln!(out, "max-growth-pct:     {}", config.max_growth_pct);
    let _ = writeln!(out, "auto-select:        {}", config.auto_select);
    let _ = writeln!(out);

    section(&mut out, "ENABLED TECHNIQUES");
    for &technique in &ALL_TECHNIQUES {
        let state = if config.is_enabled(technique) { "ENABLED" } else { "DISABLED" };
        let _ = writeln!(out, "{:<34} {state}", technique.canonical_name());
    }
    let _ = writeln!(out);

    section(&mut out, "OUTPUT MODULE STATISTICS");
    let _ = writeln!(out, "target triple:        {}", module.target_triple);
    let _ = writeln!(out, "data layout:          {}", module.data_layout);
    let _ = writeln!(out, "defined functions:    {}", module.defined_functions().count());
    let _ = writeln!(out, "basic blocks:         {}", module.total_block_count());
    let _ = writeln!(out, "instructions:         {}", module.total_instruction_count());
    let _ = writeln!(out);

    section(&mut out, "PER-TECHNIQUE METRICS");
    for (metric, count) in metrics.iter() {
        let _ = writeln!(out, "{:<24} {count}", metric.key());
    }
    let _ = writeln!(out);

    section(&mut out, "DETAILED NARRATIVE");
    for &technique in &ALL_TECHNIQUES {
        let events = technique_events.get(&technique).copied().unwrap_or(0);
        let enabled = config.is_enabled(technique);
        let verb = if !enabled {
            "skipped (disabled)".to_string()
        } else if events == 0 {
            "applied to no eligible site".to_string()
        } else {
            format!("applied {events} time(s)")
        };
        let _ = writeln!(out, "{:<34} {verb}", technique.canonical_name());
    }
    let _ = writeln!(out);

    section(&mut out, "EFFECTIVENESS SCORE");
    let enabled_weight: u32 = ALL_TECHNIQUES.iter().filter(|&&t| config.is_enabled(t)).map(|&t| t.weight()).sum();
    let total = obfx_config::technique::total_weight();
    let score = f64::from(enabled_weight) / f64::from(total) * 100.0;
    let _ = writeln!(out, "{enabled_weight} / {total} ({score:.1}%)");
    let _ = writeln!(out);

    section(&mut out, "SUMMARY");
    let _ = writeln!(out, "cycles completed:        {cycles_run}");
    let _ = writeln!(out, "total transformations:   {}", metrics.total());
    rule(&mut out);

    out
}

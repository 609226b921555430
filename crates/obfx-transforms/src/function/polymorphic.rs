//! Polymorphic cloning (spec §4.F): each original function gets a
//! configured number of metamorphically-shuffled clones. Cloning grows the
//! module's function set, which this IR only exposes through
//! [`obfx_ir::Module`] — so, despite being one of the function-level
//! techniques in the catalogue, this runs as a [`ModulePass`].

use obfx_core::{Metric, Rng};
use obfx_ir::{clone_function, Module};
use obfx_pass::{ModulePass, PassOutcome};

use super::metamorphic::{reorder_blocks, thread_dead_pairs};

const MAX_VARIANTS_PER_FUNCTION: u32 = 10;

/// Clones every original, non-generated function `variants` times (capped
/// at 10 per function). [`obfx_ir::Function::generated`] is what keeps a
/// variant from ever being cloned again itself.
#[derive(Debug, Clone, Copy)]
pub struct Polymorphic {
    /// Configured variant count per original function (spec `poly_variants`).
    pub variants: u32,
}

impl ModulePass for Polymorphic {
    fn name(&self) -> &'static str {
        "polymorphic-cloning"
    }

    fn metric(&self) -> Metric {
        Metric::PolymorphicVariants
    }

    fn run(&self, module: &mut Module, rng: &mut Rng) -> PassOutcome {
        let variant_count = self.variants.min(MAX_VARIANTS_PER_FUNCTION);
        if variant_count == 0 {
            return PassOutcome::unchanged();
        }
        let originals: Vec<String> = module
            .functions
            .iter()
            .filter(|(_, f)| !f.is_declaration() && !f.generated)
            .map(|(name, _)| name.clone())
            .collect();

        let mut events = 0u64;
        for name in originals {
            let source = module.functions[&name].clone();
            for i in 0..variant_count {
                let candidate_name = module.unique_name(&format!("{name}_variant_{i}"));
                let mut clone = clone_function(&source, candidate_name.clone());
                let mut order = clone.block_order();
                rng.shuffle(&mut order);
                reorder_blocks(&mut clone, order);
                thread_dead_pairs(&mut clone, rng);
                module.functions.insert(candidate_name, clone);
                events += 1;
            }
        }
        if events == 0 {
            PassOutcome::unchanged()
        } else {
            PassOutcome::changed(events)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::{append, Function, FunctionBuilder, Linkage, Operand, Type};

    fn module_with_one_function() -> Module {
        let mut m = Module::new("m", "x86_64-unknown-linux-gnu", "e-m:e-i64:64");
        let mut f = Function::new("compute", vec![], Type::I64, Linkage::External);
        let entry = f.entry;
        let ret = FunctionBuilder::new(&mut f).ret(Some(Operand::const_i64(7)));
        append(&mut f, entry, ret);
        m.functions.insert("compute".to_string(), f);
        m
    }

    #[test]
    fn clones_exactly_original_count_times_configured_variants() {
        let mut m = module_with_one_function();
        let outcome = (Polymorphic { variants: 3 }).run(&mut m, &mut Rng::from_seed(4));
        assert_eq!(outcome.events, 3);
        assert_eq!(m.functions.len(), 4); // original + 3 variants
        assert!(m.functions.values().filter(|f| f.generated).count() == 3);
    }

    #[test]
    fn never_clones_a_variant_of_a_variant() {
        let mut m = module_with_one_function();
        (Polymorphic { variants: 2 }).run(&mut m, &mut Rng::from_seed(1));
        let outcome = (Polymorphic { variants: 2 }).run(&mut m, &mut Rng::from_seed(1));
        // Second pass over the now-variant-containing module still only
        // clones the one non-generated original.
        assert_eq!(outcome.events, 2);
    }

    #[test]
    fn caps_at_ten_variants_per_function() {
        let mut m = module_with_one_function();
        let outcome = (Polymorphic { variants: 50 }).run(&mut m, &mut Rng::from_seed(1));
        assert_eq!(outcome.events, 10);
    }
}

//! Indirect-call table (spec §4.G): every direct call to a function defined
//! or declared in this module is rewritten to load the target's address out
//! of a shared jump table and call through the loaded pointer instead.
//!
//! The table lives as one global, `Constant::FunctionPtrTable`, appended to
//! (never rebuilt) across cycles, so a later cycle's newly-generated call
//! sites (a polymorphic variant calling the function its source called)
//! share the same table as the first cycle's.

use std::collections::HashMap;

use obfx_core::{Metric, Rng};
use obfx_ir::{insert_many_at, CastOp, Callee, Constant, InstKind, Linkage, Module, Operand, Type};
use obfx_pass::{ModulePass, PassOutcome};

const TABLE_BASE_NAME: &str = "__obfx_call_table";

/// Rewrites direct calls into loads through a shared function-pointer table.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndirectCalls;

fn existing_table(module: &Module) -> Option<(String, Vec<String>)> {
    module.globals.iter().find_map(|(name, g)| match &g.initializer {
        Some(Constant::FunctionPtrTable(names)) => Some((name.clone(), names.clone())),
        _ => None,
    })
}

/// Finds the module's call table (creating it if absent) and returns its
/// name plus an up-to-date `callee -> index` map covering every name in
/// `callees`, appending any not already present.
fn resolve_table(module: &mut Module, callees: &[String]) -> (String, HashMap<String, usize>) {
    let (table_name, mut names) = match existing_table(module) {
        Some(found) => found,
        None => (module.unique_name(TABLE_BASE_NAME), Vec::new()),
    };

    let mut grew = false;
    for callee in callees {
        if !names.contains(callee) {
            names.push(callee.clone());
            grew = true;
        }
    }

    let index: HashMap<String, usize> = names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();

    if grew || !module.globals.contains_key(&table_name) {
        let ty = Type::Array(Box::new(Type::I8.ptr()), names.len());
        let initializer = Some(Constant::FunctionPtrTable(names));
        match module.globals.get_mut(&table_name) {
            Some(g) => {
                g.ty = ty;
                g.initializer = initializer;
            }
            None => {
                module.globals.insert(
                    table_name.clone(),
                    obfx_ir::Global { name: table_name.clone(), ty, initializer, linkage: Linkage::Private, mutable: false },
                );
            }
        }
    }

    (table_name, index)
}

impl ModulePass for IndirectCalls {
    fn name(&self) -> &'static str {
        "indirect-call-table"
    }

    fn metric(&self) -> Metric {
        Metric::IndirectCalls
    }

    fn run(&self, module: &mut Module, _rng: &mut Rng) -> PassOutcome {
        let sigs: HashMap<String, (Vec<Type>, Type)> = module
            .functions
            .iter()
            .map(|(name, f)| (name.clone(), (f.params.iter().map(|(_, t)| t.clone()).collect(), f.ret_ty.clone())))
            .collect();

        let mut callees: Vec<String> = Vec::new();
        for f in module.defined_functions() {
            for (block_id, idx) in f.all_instructions() {
                if let InstKind::Call { callee: Callee::Direct(name), .. } = &f.blocks[&block_id].instructions[idx].kind
                {
                    if sigs.contains_key(name) && !callees.contains(name) {
                        callees.push(name.clone());
                    }
                }
            }
        }
        if callees.is_empty() {
            return PassOutcome::unchanged();
        }

        let (table_name, index) = resolve_table(module, &callees);

        let mut events = 0u64;
        let func_names: Vec<String> = module.functions.keys().cloned().collect();
        for fname in func_names {
            events += rewrite_function(module, &fname, &table_name, &index, &sigs);
        }

        if events == 0 {
            PassOutcome::unchanged()
        } else {
            PassOutcome::changed(events)
        }
    }
}

fn rewrite_function(
    module: &mut Module,
    fname: &str,
    table_name: &str,
    index: &HashMap<String, usize>,
    sigs: &HashMap<String, (Vec<Type>, Type)>,
) -> u64 {
    let mut events = 0u64;
    let Some(func) = module.functions.get_mut(fname) else { return 0 };
    if func.is_declaration() {
        return 0;
    }

    for block_id in func.block_order() {
        let mut idx = 0;
        loop {
            let len_now = func.blocks[&block_id].instructions.len();
            if idx >= len_now {
                break;
            }
            let target = match &func.blocks[&block_id].instructions[idx].kind {
                InstKind::Call { callee: Callee::Direct(name), .. } if index.contains_key(name) => Some(name.clone()),
                _ => None,
            };
            let Some(target) = target else {
                idx += 1;
                continue;
            };

            let (params_ty, ret_ty) = sigs[&target].clone();
            let table_idx = index[&target];
            let fn_ptr_ty = Type::Func { params: params_ty, ret: Box::new(ret_ty), var_args: false }.ptr();

            let inserted = {
                let mut b = obfx_ir::FunctionBuilder::new(func);
                let mut insts = Vec::new();
                let (slot_ptr, gep) = b.gep(
                    Operand::Global(table_name.to_string()),
                    vec![Operand::Const(Constant::i32(table_idx as i32))],
                    Type::I8.ptr().ptr(),
                );
                insts.push(gep);
                let (raw_ptr, load) = b.load(Operand::Value(slot_ptr), Type::I8.ptr());
                insts.push(load);
                let (casted, cast_inst) = b.cast(CastOp::BitCast, Operand::Value(raw_ptr), fn_ptr_ty);
                insts.push(cast_inst);
                (insts, casted)
            };
            let (pre_insts, casted) = inserted;
            let count = pre_insts.len();
            insert_many_at(func, block_id, idx, pre_insts);

            let call_idx = idx + count;
            if let InstKind::Call { callee, .. } =
                &mut func.blocks.get_mut(&block_id).expect("just inserted").instructions[call_idx].kind
            {
                *callee = Callee::Indirect(Operand::Value(casted));
            }
            events += 1;
            idx = call_idx + 1;
        }
    }
    events
}

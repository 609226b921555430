//! Constant string encryption (spec §4.G): every string-literal global is
//! encrypted in place under the configured scheme, with the key stashed in
//! a sibling `<name>.key` global. The key's byte length alone signals which
//! scheme produced it (1 byte = weak-xor, 16 = rc4-simple, 32 =
//! rc4-derived), so [`emit_decrypt_constructor`] never needs a separate
//! scheme marker — it rediscovers the encrypted set, and each one's scheme,
//! straight from the module's globals.

use obfx_config::StringScheme;
use obfx_core::hash::{derive_key, fnv1a64};
use obfx_core::rc4::rc4_apply;
use obfx_core::{Metric, Rng};
use obfx_ir::{
    append, append_global_constructor, create_block, create_global_variable, BinOp, BlockId, Callee, Constant,
    Function, FunctionBuilder, ICmpPred, Linkage, Module, Operand, Type,
};
use obfx_pass::{ModulePass, PassOutcome};

/// Encrypts every eligible string-literal global under `scheme`.
#[derive(Debug, Clone, Copy)]
pub struct StringEncrypt {
    /// Configured cipher (spec `string_scheme`).
    pub scheme: StringScheme,
    /// PBKDF2-style iteration count, used only by `rc4-derived` (spec
    /// `pbkdf2_iters`).
    pub pbkdf2_iters: u32,
}

impl ModulePass for StringEncrypt {
    fn name(&self) -> &'static str {
        "string-encryption"
    }

    fn metric(&self) -> Metric {
        Metric::StringEncrypts
    }

    fn run(&self, module: &mut Module, rng: &mut Rng) -> PassOutcome {
        let candidates: Vec<String> =
            module.globals.iter().filter(|(_, g)| g.is_string_literal()).map(|(name, _)| name.clone()).collect();
        if candidates.is_empty() {
            return PassOutcome::unchanged();
        }

        let module_name_hash = fnv1a64(module.name.as_bytes()).to_le_bytes();
        let mut events = 0u64;
        for name in candidates {
            let plain = module.globals[&name]
                .as_bytes()
                .expect("is_string_literal guarantees a Bytes initializer")
                .to_vec();

            let key: Vec<u8> = match self.scheme {
                StringScheme::WeakXor => vec![0x42],
                StringScheme::Rc4Simple => {
                    let mut k = vec![0u8; 16];
                    rng.fill_bytes(&mut k);
                    k
                }
                StringScheme::Rc4Derived => {
                    let mut salt = vec![0u8; 16];
                    rng.fill_bytes(&mut salt);
                    derive_key(&module_name_hash, &salt, self.pbkdf2_iters).to_vec()
                }
            };
            let cipher = match self.scheme {
                StringScheme::WeakXor => plain.iter().map(|b| b ^ key[0]).collect(),
                StringScheme::Rc4Simple | StringScheme::Rc4Derived => rc4_apply(&key, &plain),
            };

            if let Some(g) = module.globals.get_mut(&name) {
                g.initializer = Some(Constant::Bytes(cipher));
                g.linkage = Linkage::Private;
                g.mutable = true;
            }
            let key_len = key.len();
            create_global_variable(
                module,
                &format!("{name}.key"),
                Type::Array(Box::new(Type::I8), key_len),
                Some(Constant::Bytes(key)),
                Linkage::Private,
                false,
            );
            events += 1;
        }
        PassOutcome::changed(events)
    }
}

fn emit_weak_xor_loop(func: &mut Function, current: BlockId, data_name: &str, key_name: &str, len: usize) -> BlockId {
    let head = create_block(func);
    let body = create_block(func);
    let exit = create_block(func);

    let idx_ptr = {
        let mut b = FunctionBuilder::new(func);
        let mut insts = Vec::new();
        let (ptr, alloca) = b.alloca(Type::I32);
        insts.push(alloca);
        insts.push(b.store(Operand::Value(ptr), Operand::Const(Constant::i32(0))));
        insts.push(b.br(head));
        for inst in insts {
            append(func, current, inst);
        }
        ptr
    };

    {
        let mut insts = Vec::new();
        let mut b = FunctionBuilder::new(func);
        let (idx_val, load_idx) = b.load(Operand::Value(idx_ptr), Type::I32);
        insts.push(load_idx);
        let (cond, icmp) = b.icmp(ICmpPred::Slt, Operand::Value(idx_val), Operand::Const(Constant::i32(len as i32)));
        insts.push(icmp);
        insts.push(b.cond_br(Operand::Value(cond), body, exit));
        for inst in insts {
            append(func, head, inst);
        }
    }

    {
        let insts = {
            let mut b = FunctionBuilder::new(func);
            let mut insts = Vec::new();
            let (idx_val, load_idx) = b.load(Operand::Value(idx_ptr), Type::I32);
            insts.push(load_idx);
            let (data_ptr, gep_data) =
                b.gep(Operand::Global(data_name.to_string()), vec![Operand::Value(idx_val)], Type::I8.ptr());
            insts.push(gep_data);
            let (byte_val, load_byte) = b.load(Operand::Value(data_ptr), Type::I8);
            insts.push(load_byte);
            let (key_ptr, gep_key) =
                b.gep(Operand::Global(key_name.to_string()), vec![Operand::Const(Constant::i32(0))], Type::I8.ptr());
            insts.push(gep_key);
            let (key_val, load_key) = b.load(Operand::Value(key_ptr), Type::I8);
            insts.push(load_key);
            let (xored, xor_inst) = b.binary(BinOp::Xor, Operand::Value(byte_val), Operand::Value(key_val), Type::I8);
            insts.push(xor_inst);
            insts.push(b.store(Operand::Value(data_ptr), Operand::Value(xored)));
            let (next_idx, add_inst) =
                b.binary(BinOp::Add, Operand::Value(idx_val), Operand::Const(Constant::i32(1)), Type::I32);
            insts.push(add_inst);
            insts.push(b.store(Operand::Value(idx_ptr), Operand::Value(next_idx)));
            insts.push(b.br(head));
            insts
        };
        for inst in insts {
            append(func, body, inst);
        }
    }

    exit
}

fn emit_rc4_call(func: &mut Function, current: BlockId, data_name: &str, key_name: &str, data_len: usize, key_len: usize) {
    let insts = {
        let mut b = FunctionBuilder::new(func);
        let mut insts = Vec::new();
        let (data_ptr, gep_data) =
            b.gep(Operand::Global(data_name.to_string()), vec![Operand::Const(Constant::i32(0))], Type::I8.ptr());
        insts.push(gep_data);
        let (key_ptr, gep_key) =
            b.gep(Operand::Global(key_name.to_string()), vec![Operand::Const(Constant::i32(0))], Type::I8.ptr());
        insts.push(gep_key);
        let (_, call_inst) = b.call(
            Callee::Direct("obfx_rc4_decrypt_inplace".to_string()),
            vec![
                Operand::Value(data_ptr),
                Operand::const_i64(data_len as i64),
                Operand::Value(key_ptr),
                Operand::const_i64(key_len as i64),
            ],
            Type::Void,
        );
        insts.push(call_inst);
        insts
    };
    for inst in insts {
        append(func, current, inst);
    }
}

/// Builds a generated `__obfx_decrypt_strings` module constructor that
/// restores every string [`StringEncrypt`] encrypted, at load time (spec
/// §4.G `decrypt_at_startup`). Rediscovers the `<name>`/`<name>.key` pairs
/// from `module.globals` directly, so the pipeline driver can call this
/// once after the last cycle with no bookkeeping of its own.
pub fn emit_decrypt_constructor(module: &mut Module) {
    let candidates: Vec<(String, String, usize, usize)> = module
        .globals
        .iter()
        .filter(|(name, g)| {
            !name.ends_with(".key") && g.mutable && matches!(&g.ty, Type::Array(elem, _) if matches!(**elem, Type::I8))
        })
        .filter_map(|(name, g)| {
            let key_name = format!("{name}.key");
            let key_global = module.globals.get(&key_name)?;
            Some((name.clone(), key_name, g.as_bytes()?.len(), key_global.as_bytes()?.len()))
        })
        .collect();
    if candidates.is_empty() {
        return;
    }

    let needs_rc4 = candidates.iter().any(|(_, _, _, key_len)| *key_len != 1);
    if needs_rc4 && !module.functions.contains_key("obfx_rc4_decrypt_inplace") {
        module.functions.insert(
            "obfx_rc4_decrypt_inplace".to_string(),
            Function::declaration(
                "obfx_rc4_decrypt_inplace",
                vec![
                    ("data".to_string(), Type::I8.ptr()),
                    ("len".to_string(), Type::I64),
                    ("key".to_string(), Type::I8.ptr()),
                    ("key_len".to_string(), Type::I64),
                ],
                Type::Void,
            ),
        );
    }

    let name = module.unique_name("__obfx_decrypt_strings");
    let mut func = Function::new(name.clone(), vec![], Type::Void, Linkage::Internal);
    func.generated = true;
    let mut current = func.entry;

    for (data_name, key_name, data_len, key_len) in &candidates {
        if *key_len == 1 {
            current = emit_weak_xor_loop(&mut func, current, data_name, key_name, *data_len);
        } else {
            emit_rc4_call(&mut func, current, data_name, key_name, *data_len, *key_len);
        }
    }

    let ret = FunctionBuilder::new(&mut func).ret(None);
    append(&mut func, current, ret);

    module.functions.insert(name.clone(), func);
    append_global_constructor(module, 0, name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::verify_module;

    fn module_with_string(text: &[u8]) -> Module {
        let mut m = Module::new("m", "x86_64-unknown-linux-gnu", "e-m:e-i64:64");
        create_global_variable(
            &mut m,
            "greeting",
            Type::Array(Box::new(Type::I8), text.len()),
            Some(Constant::Bytes(text.to_vec())),
            Linkage::Private,
            false,
        );
        m
    }

    #[test]
    fn weak_xor_encrypts_and_stashes_a_one_byte_key() {
        let mut m = module_with_string(b"hi\0");
        let outcome = (StringEncrypt { scheme: StringScheme::WeakXor, pbkdf2_iters: 1000 }).run(&mut m, &mut Rng::from_seed(1));
        assert_eq!(outcome.events, 1);
        let g = &m.globals["greeting"];
        assert!(g.mutable);
        assert_eq!(g.linkage, Linkage::Private);
        assert_ne!(g.as_bytes().unwrap(), b"hi\0");
        assert_eq!(m.globals["greeting.key"].as_bytes().unwrap().len(), 1);
    }

    #[test]
    fn rc4_simple_uses_a_sixteen_byte_key() {
        let mut m = module_with_string(b"secret\0");
        (StringEncrypt { scheme: StringScheme::Rc4Simple, pbkdf2_iters: 1000 }).run(&mut m, &mut Rng::from_seed(9));
        assert_eq!(m.globals["greeting.key"].as_bytes().unwrap().len(), 16);
    }

    #[test]
    fn second_run_leaves_already_encrypted_strings_alone() {
        let mut m = module_with_string(b"hi\0");
        let mut rng = Rng::from_seed(1);
        (StringEncrypt { scheme: StringScheme::WeakXor, pbkdf2_iters: 1000 }).run(&mut m, &mut rng);
        let outcome = (StringEncrypt { scheme: StringScheme::WeakXor, pbkdf2_iters: 1000 }).run(&mut m, &mut rng);
        assert!(!outcome.modified);
    }

    #[test]
    fn decrypt_constructor_is_verifier_clean_for_weak_xor() {
        let mut m = module_with_string(b"hello\0");
        (StringEncrypt { scheme: StringScheme::WeakXor, pbkdf2_iters: 1000 }).run(&mut m, &mut Rng::from_seed(1));
        emit_decrypt_constructor(&mut m);
        assert!(m.functions.contains_key("__obfx_decrypt_strings"));
        assert_eq!(m.ctors.len(), 1);
        assert_eq!(m.ctors[0].function, "__obfx_decrypt_strings");
        verify_module(&m).expect("generated decrypt constructor must verify clean");
    }

    #[test]
    fn decrypt_constructor_declares_the_rc4_helper_when_needed() {
        let mut m = module_with_string(b"hello\0");
        (StringEncrypt { scheme: StringScheme::Rc4Derived, pbkdf2_iters: 10 }).run(&mut m, &mut Rng::from_seed(2));
        emit_decrypt_constructor(&mut m);
        assert!(m.functions.contains_key("obfx_rc4_decrypt_inplace"));
        verify_module(&m).expect("generated decrypt constructor must verify clean");
    }

    #[test]
    fn no_encrypted_strings_means_no_constructor() {
        let mut m = Module::new("m", "x86_64-unknown-linux-gnu", "e-m:e-i64:64");
        emit_decrypt_constructor(&mut m);
        assert!(m.ctors.is_empty());
    }
}

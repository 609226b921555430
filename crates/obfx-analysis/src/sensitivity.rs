//! Name-keyword and sensitive-API scoring (spec §4.D).

use obfx_ir::{Callee, Function, InstKind};

/// Case-insensitive substring weight table applied against a function's
/// name. Weights are additive: a name matching more than one keyword sums
/// them (e.g. `verify_license_key` hits all three of `license`, `key`,
/// `verify`).
const NAME_KEYWORDS: &[(&str, u32)] = &[
    ("license", 10),
    ("auth", 8),
    ("crypto", 8),
    ("decrypt", 8),
    ("key", 6),
    ("verify", 6),
];

/// Case-insensitive substring weight table applied against direct-call
/// callee names, grouped by the three API categories the spec names:
/// string, network, and file operations.
const API_KEYWORDS: &[(&str, u32)] = &[
    // network
    ("socket", 5),
    ("connect", 5),
    ("send", 4),
    ("recv", 4),
    ("http", 5),
    // file
    ("fopen", 3),
    ("fread", 3),
    ("fwrite", 3),
    ("CreateFile", 3),
    // string
    ("strcpy", 3),
    ("strcat", 3),
    ("sprintf", 3),
    ("memcpy", 2),
];

/// Sum of every name-keyword hit plus every sensitive-API call hit in
/// `func`'s body.
#[must_use]
pub fn score(func: &Function) -> u32 {
    name_score(&func.name) + api_score(func)
}

fn name_score(name: &str) -> u32 {
    let lower = name.to_ascii_lowercase();
    NAME_KEYWORDS.iter().filter(|(kw, _)| lower.contains(kw)).map(|(_, w)| w).sum()
}

fn api_score(func: &Function) -> u32 {
    let mut total = 0;
    for (block_id, idx) in func.all_instructions() {
        let inst = &func.blocks[&block_id].instructions[idx];
        if let InstKind::Call { callee: Callee::Direct(callee), .. } = &inst.kind {
            total += API_KEYWORDS.iter().filter(|(kw, _)| callee.contains(kw)).map(|(_, w)| w).sum::<u32>();
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use obfx_ir::{Function, Linkage, Type};

    #[test]
    fn name_keywords_sum() {
        assert_eq!(name_score("verify_license_key"), 10 + 6 + 6);
        assert_eq!(name_score("add_numbers"), 0);
    }

    #[test]
    fn api_calls_contribute() {
        let mut f = Function::new("helper", vec![], Type::Void, Linkage::Internal);
        let entry = f.entry;
        let (_, call) = obfx_ir::FunctionBuilder::new(&mut f).call(
            Callee::Direct("socket".to_string()),
            vec![],
            Type::Void,
        );
        obfx_ir::append(&mut f, entry, call);
        let ret = obfx_ir::FunctionBuilder::new(&mut f).ret(None);
        obfx_ir::append(&mut f, entry, ret);
        assert_eq!(score(&f), 5);
    }
}

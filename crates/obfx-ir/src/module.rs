//! The module: the top-level unit the whole pass mutates in place.

use indexmap::IndexMap;

use crate::types::{Constant, Linkage, Type};

/// A global variable.
#[derive(Debug, Clone)]
pub struct Global {
    /// Symbol name.
    pub name: String,
    /// Declared type.
    pub ty: Type,
    /// Initializer, if any.
    pub initializer: Option<Constant>,
    /// Linkage.
    pub linkage: Linkage,
    /// Whether the global may be written at runtime. String encryption
    /// flips this to `true` when it rewrites a constant string global
    /// (spec §4.G).
    pub mutable: bool,
}

impl Global {
    /// True if this global looks like a C-string literal: a constant
    /// (`mutable == false`), byte-initialized `[N x i8]`. Candidates for
    /// string encryption are exactly the globals for which this is true.
    #[must_use]
    pub fn is_string_literal(&self) -> bool {
        !self.mutable
            && matches!(&self.ty, Type::Array(elem, _) if matches!(**elem, Type::I8))
            && matches!(&self.initializer, Some(Constant::Bytes(_)))
    }

    /// The backing bytes, if this is (or was) a byte-initialized global.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.initializer {
            Some(Constant::Bytes(b)) => Some(b),
            _ => None,
        }
    }
}

/// An entry in the canonical global-constructor list: a function that runs
/// before any user entry point, ordered by ascending `priority` (lower runs
/// first; LLVM's own convention reserves `65535` as "no particular
/// priority", which this module uses as the default for constructors that
/// don't care about ordering relative to each other).
#[derive(Debug, Clone)]
pub struct Ctor {
    /// Scheduling priority; lower values run earlier.
    pub priority: u32,
    /// Name of the constructor function.
    pub function: String,
}

/// Default constructor priority ("no particular priority").
pub const DEFAULT_CTOR_PRIORITY: u32 = 65535;

/// An in-memory IR module: globals, functions, and the constructor list.
#[derive(Debug, Clone)]
pub struct Module {
    /// Module name (also the seed for the pass's RNG).
    pub name: String,
    /// Target triple, e.g. `x86_64-pc-windows-msvc`. Anti-debug/anti-analysis
    /// use this to decide whether the module is "Windows-shaped" (spec
    /// §4.G).
    pub target_triple: String,
    /// Target data layout string, carried through unexamined — it is part
    /// of the output module statistics the report emits (spec §6).
    pub data_layout: String,
    /// Global variables, in module order.
    pub globals: IndexMap<String, Global>,
    /// Functions (definitions and declarations), in module order.
    pub functions: IndexMap<String, crate::function::Function>,
    /// The canonical constructor array. [`crate::builder::append_global_constructor`]
    /// is the only writer (spec §9: "the A-layer's append-global-constructor
    /// helper must be the single writer").
    pub ctors: Vec<Ctor>,
}

impl Module {
    /// Builds an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>, target_triple: impl Into<String>, data_layout: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_triple: target_triple.into(),
            data_layout: data_layout.into(),
            globals: IndexMap::new(),
            functions: IndexMap::new(),
            ctors: Vec::new(),
        }
    }

    /// True if the target triple names a Windows target — used by the
    /// anti-debug/anti-analysis probes to decide which platform API to
    /// emit a call to.
    #[must_use]
    pub fn is_windows_shaped(&self) -> bool {
        self.target_triple.to_ascii_lowercase().contains("windows")
    }

    /// Every defined (non-declaration) function, in module order.
    pub fn defined_functions(&self) -> impl Iterator<Item = &crate::function::Function> {
        self.functions.values().filter(|f| !f.is_declaration())
    }

    /// Total instruction count across every defined function — used for
    /// the report's output module statistics.
    #[must_use]
    pub fn total_instruction_count(&self) -> usize {
        self.defined_functions().map(crate::function::Function::instruction_count).sum()
    }

    /// Total basic-block count across every defined function.
    #[must_use]
    pub fn total_block_count(&self) -> usize {
        self.defined_functions().map(|f| f.blocks.len()).sum()
    }

    /// Picks a fresh, collision-free name derived from `base` by appending
    /// a numeric suffix. Used anywhere the pass introduces a new symbol
    /// (global or function) so that spec §3 invariant 4 (exported-symbol
    /// set unchanged) and invariant 3 (no new name collisions) both hold.
    #[must_use]
    pub fn unique_name(&self, base: &str) -> String {
        if !self.globals.contains_key(base) && !self.functions.contains_key(base) {
            return base.to_string();
        }
        let mut n = 0u32;
        loop {
            let candidate = format!("{base}.{n}");
            if !self.globals.contains_key(&candidate) && !self.functions.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

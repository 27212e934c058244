//! Register allocation state for one CFG
//!
//! A `VarMap` hands out fresh target registers, memoizes the register
//! chosen for each source temporary, and resolves references to top-level
//! globals. Globals with a statically known value cost nothing; the rest
//! follow one of two policies. Function bodies defer: the first reference
//! to a global allocates a register and records a load to be placed at
//! function entry. Initialization code registers globals as their
//! initializers complete, in program order, and a reference to a global
//! whose initializer has not yet run is an internal-consistency failure.

use fxhash::FxHashMap;

use crate::internal_error;
use crate::mil::{MilType, Program, StaticValue, TempId, TopId};
use crate::target;

/// A deferred load of a global, to be placed at function entry.
#[derive(Debug, Clone)]
pub struct GlobalLoad {
    pub top: TopId,
    pub dest: target::Reg,
}

/// How references to non-static globals are materialized.
#[derive(Debug)]
enum GlobalPolicy {
    /// Function bodies: collect deferred entry loads
    Defn { loads: Vec<GlobalLoad> },

    /// Initialization sequence: globals become available as they are
    /// computed
    Init { inits: Vec<(TopId, target::Value)> },
}

/// Per-CFG mapping from source temporaries and globals to target values.
#[derive(Debug)]
pub struct VarMap {
    next_reg: u32,
    temp_map: FxHashMap<TempId, target::Reg>,
    policy: GlobalPolicy,
}

/// The target type of a non-unit MIL type.
pub(crate) fn target_ty(ty: MilType) -> target::Type {
    match ty {
        MilType::Word => target::Type::Word,
        MilType::Flag => target::Type::Flag,
        MilType::Unit => internal_error!("unit-typed value reached register allocation"),
    }
}

impl VarMap {
    /// A VarMap for an ordinary function or closure body.
    pub fn for_defn() -> Self {
        VarMap {
            next_reg: 0,
            temp_map: FxHashMap::default(),
            policy: GlobalPolicy::Defn { loads: Vec::new() },
        }
    }

    /// A VarMap for the program-initialization function.
    pub fn for_init() -> Self {
        VarMap {
            next_reg: 0,
            temp_map: FxHashMap::default(),
            policy: GlobalPolicy::Init { inits: Vec::new() },
        }
    }

    /// Allocate a fresh register of the given type.
    pub fn reg(&mut self, ty: target::Type) -> target::Reg {
        let reg = target::Reg {
            num: self.next_reg,
            ty,
        };
        self.next_reg += 1;
        reg
    }

    /// Number of registers allocated so far.
    pub fn register_count(&self) -> u32 {
        self.next_reg
    }

    /// The register holding a temporary, allocated on first use and
    /// memoized thereafter.
    pub fn lookup(&mut self, program: &Program, temp: TempId) -> target::Reg {
        if let Some(&reg) = self.temp_map.get(&temp) {
            return reg;
        }
        let reg = self.reg(target_ty(program.temp(temp).ty));
        self.temp_map.insert(temp, reg);
        reg
    }

    /// The target value of a global: its static value if one is known,
    /// otherwise per the active policy.
    pub fn lookup_global(&mut self, program: &Program, top: TopId) -> target::Value {
        let info = program.top(top);
        if let Some(sv) = info.static_value {
            return match sv {
                StaticValue::Word(w) => target::Value::Word(w),
                StaticValue::Flag(b) => target::Value::Flag(b),
            };
        }
        match &mut self.policy {
            GlobalPolicy::Defn { loads } => {
                if let Some(load) = loads.iter().find(|l| l.top == top) {
                    return target::Value::Reg(load.dest);
                }
                let dest = target::Reg {
                    num: self.next_reg,
                    ty: target_ty(info.ty),
                };
                self.next_reg += 1;
                loads.push(GlobalLoad { top, dest });
                target::Value::Reg(dest)
            }
            GlobalPolicy::Init { inits } => match inits.iter().find(|(t, _)| *t == top) {
                Some((_, v)) => *v,
                None => internal_error!(
                    "global \"{}\" referenced before its initializer ran",
                    info.name
                ),
            },
        }
    }

    /// Record that a global has been initialized to the given value.
    /// Only meaningful under the initialization policy.
    pub fn map_global(&mut self, top: TopId, value: target::Value) {
        match &mut self.policy {
            GlobalPolicy::Init { inits } => inits.push((top, value)),
            GlobalPolicy::Defn { .. } => {
                internal_error!("map_global called on a function-body VarMap")
            }
        }
    }

    /// The load instructions to place at function entry, one per distinct
    /// global referenced, in first-reference order.
    pub fn global_loads(&self, program: &Program) -> Vec<target::Insn> {
        match &self.policy {
            GlobalPolicy::Defn { loads } => loads
                .iter()
                .map(|l| target::Insn::LoadGlobal {
                    dest: l.dest,
                    name: program.top(l.top).name.clone(),
                })
                .collect(),
            GlobalPolicy::Init { .. } => Vec::new(),
        }
    }
}

//! Atoms: the argument-position values of MIL
//!
//! An atom is either a temporary, a constant, or a reference to a top-level
//! global. Blocks pass control with tuples of atoms; the representation
//! transformation stage has already reduced every value to word or flag
//! width by the time this backend runs, so the type universe here is small.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Program, TempId, TopId};

/// The value types that survive representation transformation.
///
/// `Unit` values are zero-width: they carry no information, occupy no
/// register, and are elided from parameter and argument tuples throughout
/// CFG construction and lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MilType {
    Unit,
    Word,
    Flag,
}

impl MilType {
    pub fn is_unit(self) -> bool {
        self == MilType::Unit
    }
}

/// A temporary: a named, typed single-assignment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Temp {
    /// Name hint for diagnostics
    pub name: String,

    /// Value type
    pub ty: MilType,
}

impl Temp {
    /// Filter a parameter list down to its non-unit members.
    pub fn non_units(program: &Program, temps: &[TempId]) -> Vec<TempId> {
        temps
            .iter()
            .copied()
            .filter(|&t| !program.temp(t).ty.is_unit())
            .collect()
    }
}

/// A statically known global value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StaticValue {
    Word(i64),
    Flag(bool),
}

/// A top-level global value.
///
/// Globals with a statically known value never need a register or a load;
/// the rest are materialized according to the owning CFG's `VarMap` policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Top {
    /// Symbol name
    pub name: String,

    /// Value type
    pub ty: MilType,

    /// Compile-time value, if the front end resolved one
    pub static_value: Option<StaticValue>,
}

impl Top {
    pub fn new(name: impl Into<String>, ty: MilType) -> Self {
        Top {
            name: name.into(),
            ty,
            static_value: None,
        }
    }

    pub fn with_static(name: impl Into<String>, ty: MilType, value: StaticValue) -> Self {
        Top {
            name: name.into(),
            ty,
            static_value: Some(value),
        }
    }
}

/// An argument-position value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Atom {
    /// A temporary
    Temp(TempId),

    /// A word constant
    Word(i64),

    /// A flag constant
    Flag(bool),

    /// A top-level global
    Top(TopId),
}

impl Atom {
    /// The type of this atom under the given program.
    pub fn ty(self, program: &Program) -> MilType {
        match self {
            Atom::Temp(t) => program.temp(t).ty,
            Atom::Word(_) => MilType::Word,
            Atom::Flag(_) => MilType::Flag,
            Atom::Top(t) => program.top(t).ty,
        }
    }

    /// Filter an argument tuple down to its non-unit members.
    pub fn non_units(program: &Program, atoms: &[Atom]) -> Vec<Atom> {
        atoms
            .iter()
            .copied()
            .filter(|a| !a.ty(program).is_unit())
            .collect()
    }

    /// Render an argument tuple for diagnostics.
    pub fn tuple_to_string(atoms: &[Atom]) -> String {
        let parts: Vec<String> = atoms.iter().map(|a| a.to_string()).collect();
        format!("({})", parts.join(", "))
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Temp(t) => write!(f, "{}", t),
            Atom::Word(w) => write!(f, "{}", w),
            Atom::Flag(b) => write!(f, "{}", b),
            Atom::Top(t) => write!(f, "{}", t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_units_filters_unit_atoms() {
        let mut program = Program::new();
        let u = program.add_temp("u", MilType::Unit);
        let x = program.add_temp("x", MilType::Word);
        let atoms = vec![Atom::Temp(u), Atom::Temp(x), Atom::Word(3)];
        let filtered = Atom::non_units(&program, &atoms);
        assert_eq!(filtered, vec![Atom::Temp(x), Atom::Word(3)]);
    }

    #[test]
    fn test_non_units_filters_unit_params() {
        let mut program = Program::new();
        let u = program.add_temp("u", MilType::Unit);
        let x = program.add_temp("x", MilType::Flag);
        assert_eq!(Temp::non_units(&program, &[u, x]), vec![x]);
    }
}

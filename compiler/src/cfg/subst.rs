//! Parameter-elimination substitutions
//!
//! A `TempSubst` maps eliminated block parameters to the atoms that flow
//! into them from their unique call site. It is a persistent, immutable
//! cons list: extension returns a new head and never mutates a shared
//! tail, so the traversal can thread one substitution through the whole
//! graph while branches that extend a common prefix stay isolated. Lookup
//! walks front to back, so the most recently added binding for a
//! temporary wins.

use std::fmt;
use std::rc::Rc;

use crate::internal_error;
use crate::mil::{Atom, TempId};

struct Binding {
    temp: TempId,
    atom: Atom,
    rest: Option<Rc<Binding>>,
}

/// An immutable substitution from temporaries to atoms.
#[derive(Clone, Default)]
pub struct TempSubst {
    head: Option<Rc<Binding>>,
}

impl TempSubst {
    /// The identity substitution.
    pub fn empty() -> Self {
        TempSubst { head: None }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Extend with a single binding, returning a new substitution.
    pub fn bind(&self, temp: TempId, atom: Atom) -> TempSubst {
        TempSubst {
            head: Some(Rc::new(Binding {
                temp,
                atom,
                rest: self.head.clone(),
            })),
        }
    }

    /// Extend with bindings given by parallel parameter/argument slices.
    ///
    /// The slices must agree in length; a mismatch can only come from a
    /// defect in edge construction and is an internal-consistency failure.
    pub fn extend(&self, temps: &[TempId], atoms: &[Atom]) -> TempSubst {
        if temps.len() != atoms.len() {
            internal_error!(
                "substitution arity mismatch: {} parameters vs {} arguments",
                temps.len(),
                atoms.len()
            );
        }
        let mut s = self.clone();
        for (&temp, &atom) in temps.iter().zip(atoms.iter()) {
            s = s.bind(temp, atom);
        }
        s
    }

    /// Apply to a temporary. Unbound temporaries map to themselves.
    ///
    /// Application is a single step, not a fixpoint: bindings are created
    /// with already-substituted atoms, so chains never need chasing.
    pub fn apply_temp(&self, temp: TempId) -> Atom {
        let mut cursor = self.head.as_deref();
        while let Some(binding) = cursor {
            if binding.temp == temp {
                return binding.atom;
            }
            cursor = binding.rest.as_deref();
        }
        Atom::Temp(temp)
    }

    /// Apply to an atom; only temporaries are affected.
    pub fn apply(&self, atom: Atom) -> Atom {
        match atom {
            Atom::Temp(t) => self.apply_temp(t),
            other => other,
        }
    }

    /// Apply to a whole argument tuple.
    pub fn apply_all(&self, atoms: &[Atom]) -> Vec<Atom> {
        atoms.iter().map(|&a| self.apply(a)).collect()
    }
}

impl fmt::Display for TempSubst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let mut cursor = self.head.as_deref();
        let mut first = true;
        while let Some(binding) = cursor {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{} --> {}", binding.temp, binding.atom)?;
            first = false;
            cursor = binding.rest.as_deref();
        }
        write!(f, "]")
    }
}

impl fmt::Debug for TempSubst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TempSubst{}", self)
    }
}

//! Target representation for emitted functions
//!
//! A minimal register-oriented SSA form that the CFG lowering pass emits
//! into: functions made of named basic blocks, each holding a list of phi
//! operations, a list of straight-line instructions, and one terminator.
//! Backends (or the bytecode builder) consume this form directly; nothing
//! in this module performs register allocation beyond the numbering handed
//! out by the per-CFG `VarMap`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value types the target distinguishes. Unit-typed MIL values never reach
/// this level; they are elided during lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// A machine word
    Word,
    /// A single-bit truth value
    Flag,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Word => write!(f, "word"),
            Type::Flag => write!(f, "flag"),
        }
    }
}

/// A virtual register, numbered per function by the owning `VarMap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reg {
    /// Register number, unique within one function
    pub num: u32,
    /// Value type held by the register
    pub ty: Type,
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%r{}", self.num)
    }
}

/// An operand: either a register or an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Reg(Reg),
    Word(i64),
    Flag(bool),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Reg(r) => write!(f, "{}", r),
            Value::Word(w) => write!(f, "{}", w),
            Value::Flag(b) => write!(f, "{}", b),
        }
    }
}

/// Binary operators supported by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Eq,
    Lt,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Eq => "eq",
            BinOp::Lt => "lt",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators supported by the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Neg => write!(f, "neg"),
            UnOp::Not => write!(f, "not"),
        }
    }
}

/// A straight-line instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Insn {
    /// Copy a value into a register
    Copy { dest: Reg, src: Value },

    /// Unary operation
    UnOp { dest: Reg, op: UnOp, src: Value },

    /// Binary operation
    BinOp {
        dest: Reg,
        op: BinOp,
        lhs: Value,
        rhs: Value,
    },

    /// Call a function by symbol name; `dest` is absent for void results
    Call {
        dest: Option<Reg>,
        func: String,
        args: Vec<Value>,
    },

    /// Load the current value of a mutable global into a register
    LoadGlobal { dest: Reg, name: String },
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Copy { dest, src } => write!(f, "{} = {}", dest, src),
            Insn::UnOp { dest, op, src } => write!(f, "{} = {} {}", dest, op, src),
            Insn::BinOp { dest, op, lhs, rhs } => {
                write!(f, "{} = {} {}, {}", dest, op, lhs, rhs)
            }
            Insn::Call { dest, func, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                match dest {
                    Some(d) => write!(f, "{} = call @{}({})", d, func, args.join(", ")),
                    None => write!(f, "call @{}({})", func, args.join(", ")),
                }
            }
            Insn::LoadGlobal { dest, name } => write!(f, "{} = load_global @{}", dest, name),
        }
    }
}

/// A block terminator. Every emitted block ends in exactly one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    /// Unconditional jump to a labeled block
    Jump { target: String },

    /// Two-way branch on a flag value
    Branch {
        cond: Value,
        on_true: String,
        on_false: String,
    },

    /// Multi-way dispatch on a constructor tag
    Switch {
        value: Value,
        cases: Vec<(u32, String)>,
        default: String,
    },

    /// Return from the function
    Ret { value: Option<Value> },
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump { target } => write!(f, "jump {}", target),
            Terminator::Branch {
                cond,
                on_true,
                on_false,
            } => write!(f, "branch {}, {}, {}", cond, on_true, on_false),
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                let cases: Vec<String> =
                    cases.iter().map(|(t, l)| format!("{} -> {}", t, l)).collect();
                write!(f, "switch {} [{}] else {}", value, cases.join(", "), default)
            }
            Terminator::Ret { value: Some(v) } => write!(f, "ret {}", v),
            Terminator::Ret { value: None } => write!(f, "ret"),
        }
    }
}

/// A merge operation at the head of a multi-predecessor block: selects the
/// incoming value according to the predecessor control arrived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phi {
    /// Destination register for the selected value
    pub dest: Reg,

    /// Incoming values, one per predecessor, keyed by the predecessor's
    /// emitted block label, in recorded predecessor order
    pub incoming: Vec<(String, Value)>,
}

impl fmt::Display for Phi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let incoming: Vec<String> = self
            .incoming
            .iter()
            .map(|(l, v)| format!("[{}: {}]", l, v))
            .collect();
        write!(f, "{} = phi {}", self.dest, incoming.join(" "))
    }
}

/// One emitted basic block: phis first, then instructions, then the
/// terminator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub phis: Vec<Phi>,
    pub insns: Vec<Insn>,
    pub term: Option<Terminator>,
}

/// A finished function definition, entry block first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDefn {
    /// Symbol name
    pub name: String,

    /// Formal parameter registers
    pub formals: Vec<Reg>,

    /// Return type, absent for void functions
    pub ret: Option<Type>,

    /// Labeled blocks in emission order; the first is the function entry
    pub blocks: Vec<(String, Block)>,
}

impl fmt::Display for FuncDefn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formals: Vec<String> = self
            .formals
            .iter()
            .map(|r| format!("{}: {}", r, r.ty))
            .collect();
        let ret = match self.ret {
            Some(ty) => ty.to_string(),
            None => "void".to_string(),
        };
        writeln!(f, "fn @{}({}) -> {} {{", self.name, formals.join(", "), ret)?;
        for (label, block) in &self.blocks {
            writeln!(f, "  {}:", label)?;
            for phi in &block.phis {
                writeln!(f, "    {}", phi)?;
            }
            for insn in &block.insns {
                writeln!(f, "    {}", insn)?;
            }
            match &block.term {
                Some(term) => writeln!(f, "    {}", term)?,
                None => writeln!(f, "    <unterminated>")?,
            }
        }
        write!(f, "}}")
    }
}

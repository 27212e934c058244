//! Blocks, code trees, and the other top-level MIL definitions
//!
//! A block is a basic block with named formal parameters, reached only via
//! explicit calls that supply matching actual arguments. Its body is a code
//! tree ending in a plain return, a call to another block, or a multi-way
//! dispatch. Closure definitions and initialization statements reuse the
//! same tail forms.

use serde::{Deserialize, Serialize};

use super::{Atom, BlockId, MilType, TempId, TopId};

/// A basic block with explicit formal parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Block name, unique within a program; doubles as the emitted basic
    /// block label
    pub name: String,

    /// Entry points are exported under their own name and always receive a
    /// function definition
    pub is_entrypoint: bool,

    /// Formal parameters (unit-typed formals allowed; they are elided
    /// during lowering)
    pub params: Vec<TempId>,

    /// Result type; `None` for blocks that return nothing
    pub result: Option<MilType>,

    /// Body code tree
    pub code: Code,

    /// Number of regular (non-tail) calls to this block anywhere in the
    /// program; filled in by `Program::count_calls`
    pub num_calls: u32,
}

impl Block {
    pub fn new(
        name: impl Into<String>,
        params: Vec<TempId>,
        result: Option<MilType>,
        code: Code,
    ) -> Self {
        Block {
            name: name.into(),
            is_entrypoint: false,
            params,
            result,
            code,
            num_calls: 0,
        }
    }

    pub fn entrypoint(
        name: impl Into<String>,
        params: Vec<TempId>,
        result: Option<MilType>,
        code: Code,
    ) -> Self {
        let mut block = Block::new(name, params, result, code);
        block.is_entrypoint = true;
        block
    }

    /// The function symbol generated for this block. Entry points keep
    /// their exported name; internal blocks get a `func_` prefix so block
    /// labels and function symbols never collide.
    pub fn func_name(&self) -> String {
        if self.is_entrypoint {
            self.name.clone()
        } else {
            format!("func_{}", self.name)
        }
    }
}

/// A call to a block with actual arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockCall {
    pub block: BlockId,
    pub args: Vec<Atom>,
}

impl BlockCall {
    pub fn new(block: BlockId, args: Vec<Atom>) -> Self {
        BlockCall { block, args }
    }
}

/// One alternative of a `Case` dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alt {
    /// Constructor tag selecting this alternative
    pub tag: u32,

    /// Dispatch target
    pub call: BlockCall,
}

/// The pure primitives of the word/flag universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimOp {
    Add,
    Sub,
    Mul,
    Eq,
    Lt,
    Neg,
    Not,
}

impl PrimOp {
    /// Number of operands the primitive consumes.
    pub fn arity(self) -> usize {
        match self {
            PrimOp::Neg | PrimOp::Not => 1,
            _ => 2,
        }
    }

    /// Type of the value the primitive produces.
    pub fn result_ty(self) -> MilType {
        match self {
            PrimOp::Add | PrimOp::Sub | PrimOp::Mul | PrimOp::Neg => MilType::Word,
            PrimOp::Eq | PrimOp::Lt | PrimOp::Not => MilType::Flag,
        }
    }
}

/// A tail: the final step of a code sequence, or the right-hand side of a
/// `Bind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Tail {
    /// Return a tuple of atoms
    Return(Vec<Atom>),

    /// Transfer control (or, in `Bind` position, make a regular call) to
    /// another block
    Call(BlockCall),

    /// Apply a pure primitive
    Prim { op: PrimOp, args: Vec<Atom> },
}

/// A code tree. Straight-line `Bind` steps end in a `Done`, an `If`, or a
/// `Case`; the latter two dispatch to other blocks by explicit block call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Code {
    /// `lhs <- tail; rest`
    Bind {
        lhs: Vec<TempId>,
        tail: Tail,
        rest: Box<Code>,
    },

    /// Execute the tail and pass on its result
    Done(Tail),

    /// Two-way dispatch on a flag atom; both targets are block calls
    If {
        cond: Atom,
        on_true: BlockCall,
        on_false: BlockCall,
    },

    /// Multi-way dispatch on a constructor tag, one alternative per tag
    /// plus an optional default
    Case {
        scrut: Atom,
        alts: Vec<Alt>,
        default: Option<BlockCall>,
    },
}

impl Code {
    /// `Done(Return(()))`: return with no values.
    pub fn ret_nothing() -> Code {
        Code::Done(Tail::Return(Vec::new()))
    }
}

/// A closure definition: stored (captured) variables, argument variables,
/// and a tail to execute when the closure is entered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosureDefn {
    /// Symbol name of the generated entry function
    pub name: String,

    /// Captured variables, unpacked from the closure record on entry
    pub stored: Vec<TempId>,

    /// Argument variables supplied at the call site
    pub args: Vec<TempId>,

    /// Result type; `None` for closures that return nothing
    pub result: Option<MilType>,

    /// Body tail
    pub tail: Tail,
}

/// One statement of the program-initialization sequence: compute `tail`
/// and store the result as the initial value of global `lhs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopLevel {
    pub lhs: TopId,
    pub tail: Tail,
}

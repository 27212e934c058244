//! MIL: the monadic intermediate language consumed by this backend
//!
//! The front end (parsing, scope analysis, type inference, representation
//! transformation) produces a `Program`: arenas of temporaries, globals,
//! blocks, closure definitions, and initialization statements, all
//! cross-referenced by typed integer ids. Programs are immutable once
//! handed to CFG construction, with two exceptions owned by this backend:
//! the per-block regular-call counters filled in by [`Program::count_calls`]
//! and the fresh temporaries allocated for CFG entry parameters.

pub mod atom;
pub mod blocks;

pub use atom::*;
pub use blocks::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::internal_error;

/// Identifies a temporary in a `Program`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TempId(pub u32);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Identifies a block in a `Program`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Identifies a closure definition in a `Program`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosureId(pub u32);

impl fmt::Display for ClosureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

/// Identifies a top-level global value in a `Program`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopId(pub u32);

impl fmt::Display for TopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A complete MIL program, as delivered by the front end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    /// Temporaries, indexed by `TempId`
    pub temps: Vec<Temp>,

    /// Blocks, indexed by `BlockId`
    pub blocks: Vec<Block>,

    /// Closure definitions, indexed by `ClosureId`
    pub closures: Vec<ClosureDefn>,

    /// Top-level global values, indexed by `TopId`
    pub tops: Vec<Top>,

    /// Initialization statements, in program order
    pub top_levels: Vec<TopLevel>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn temp(&self, id: TempId) -> &Temp {
        &self.temps[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn closure(&self, id: ClosureId) -> &ClosureDefn {
        &self.closures[id.0 as usize]
    }

    pub fn top(&self, id: TopId) -> &Top {
        &self.tops[id.0 as usize]
    }

    /// Add a named temporary of the given type.
    pub fn add_temp(&mut self, name: impl Into<String>, ty: MilType) -> TempId {
        let id = TempId(self.temps.len() as u32);
        self.temps.push(Temp {
            name: name.into(),
            ty,
        });
        id
    }

    /// Allocate a fresh temporary with the same type as an existing one.
    ///
    /// Used when a CFG entry point needs formal parameters distinct from
    /// the names used by the first block's own label.
    pub fn fresh_temp(&mut self, like: TempId) -> TempId {
        let ty = self.temp(like).ty;
        let id = TempId(self.temps.len() as u32);
        self.temps.push(Temp {
            name: format!("p{}", id.0),
            ty,
        });
        id
    }

    pub fn add_block(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    pub fn add_closure(&mut self, closure: ClosureDefn) -> ClosureId {
        let id = ClosureId(self.closures.len() as u32);
        self.closures.push(closure);
        id
    }

    pub fn add_top(&mut self, top: Top) -> TopId {
        let id = TopId(self.tops.len() as u32);
        self.tops.push(top);
        id
    }

    pub fn add_top_level(&mut self, top_level: TopLevel) {
        self.top_levels.push(top_level);
    }

    /// Count the regular (non-tail) block calls in the whole program.
    ///
    /// Tail calls transfer control without returning and are not counted:
    /// a `Done(Call ...)` at the end of a code sequence, the dispatch
    /// targets of `If` and `Case`, and the body tail of a closure
    /// definition. A block call bound by `Bind` is a regular call, as is
    /// the defining tail of a `TopLevel` statement (it is invoked from
    /// initialization code). The resulting counts drive the inclusion
    /// analysis: a block that is regular-called somewhere gets its own
    /// function definition, so other CFGs reach it by call rather than by
    /// inlining its code.
    pub fn count_calls(&mut self) {
        let mut counts = vec![0u32; self.blocks.len()];
        for block in &self.blocks {
            count_code_calls(&block.code, &mut counts);
        }
        for top_level in &self.top_levels {
            if let Tail::Call(bc) = &top_level.tail {
                counts[bc.block.0 as usize] += 1;
            }
        }
        for (block, count) in self.blocks.iter_mut().zip(counts) {
            block.num_calls = count;
        }
    }

    /// Fail unless the id is in range; returns it for chaining.
    pub fn check_block(&self, id: BlockId) -> BlockId {
        if id.0 as usize >= self.blocks.len() {
            internal_error!("block {} is not part of this program", id);
        }
        id
    }
}

fn count_code_calls(code: &Code, counts: &mut [u32]) {
    match code {
        Code::Bind { tail, rest, .. } => {
            if let Tail::Call(bc) = tail {
                counts[bc.block.0 as usize] += 1;
            }
            count_code_calls(rest, counts);
        }
        // Done, If, and Case all transfer control by tail call
        Code::Done(_) | Code::If { .. } | Code::Case { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_temp_copies_type() {
        let mut program = Program::new();
        let x = program.add_temp("x", MilType::Flag);
        let p = program.fresh_temp(x);
        assert_ne!(x, p);
        assert_eq!(program.temp(p).ty, MilType::Flag);
    }

    #[test]
    fn test_count_calls_skips_tail_calls() {
        let mut program = Program::new();
        let callee = program.add_block(Block::new("callee", Vec::new(), None, Code::ret_nothing()));
        let t = program.add_temp("t", MilType::Word);
        // regular call: t <- callee(); return t
        let caller_a = Block::new(
            "caller_a",
            Vec::new(),
            Some(MilType::Word),
            Code::Bind {
                lhs: vec![t],
                tail: Tail::Call(BlockCall::new(callee, Vec::new())),
                rest: Box::new(Code::Done(Tail::Return(vec![Atom::Temp(t)]))),
            },
        );
        // tail call: callee()
        let caller_b = Block::new(
            "caller_b",
            Vec::new(),
            None,
            Code::Done(Tail::Call(BlockCall::new(callee, Vec::new()))),
        );
        program.add_block(caller_a);
        program.add_block(caller_b);

        program.count_calls();
        assert_eq!(program.block(callee).num_calls, 1);
    }
}

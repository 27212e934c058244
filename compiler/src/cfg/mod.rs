//! Control-flow-graph construction and SSA lowering
//!
//! This module builds one CFG per compilation entry point (a block, a
//! closure definition, or the program-initialization sequence), discovers
//! the set of blocks reachable through tail calls, wires predecessor and
//! successor edges, and then decides per formal parameter whether the
//! parameter can be eliminated by direct substitution (one call site) or
//! must survive as a register merged by a phi operation (several call
//! sites). The finished graph is handed to [`emit`] to produce target
//! function definitions.
//!
//! Graph shape: each `Cfg` owns an arena of labels addressed by `NodeId`
//! (see [`label`]); all node numbering and register numbering is state of
//! the individual `Cfg`/`VarMap`, so independent compilations never
//! interfere.

pub mod dot;
pub mod emit;
pub mod label;
pub mod subst;
pub mod var_map;

pub use emit::{lower_cfg, lower_init, lower_program};
pub use label::{Label, LabelKind, NodeId, NodeRef, PredEdge};
pub use subst::TempSubst;
pub use var_map::{GlobalLoad, VarMap};

use fxhash::FxHashSet;
use indexmap::IndexMap;
use log::{debug, info, trace};
use smallvec::{smallvec, SmallVec};

use crate::mil::{Atom, BlockCall, BlockId, ClosureId, Code, Program, Tail, Temp, TempId};
use crate::target;

/// The three kinds of compilation entry point.
#[derive(Debug, Clone)]
pub enum CfgKind {
    /// A block that is exported or regular-called and therefore gets its
    /// own function definition. `entry_params` are fresh temporaries
    /// standing in for the block's (non-unit) formals, so the entry node
    /// and the block's own label use distinct names.
    Block {
        block: BlockId,
        entry_params: Vec<TempId>,
    },

    /// A closure definition's entry function
    Closure { closure: ClosureId },

    /// The program-initialization function: an already-lowered prefix
    /// computing the top-level globals, then a call into the final block
    Init {
        block: BlockId,
        prefix: Vec<target::Insn>,
    },
}

/// A control-flow graph for one entry point.
///
/// Labels are never shared across CFGs, even when two CFGs reach the same
/// underlying block: parameter-elimination results are CFG-local.
#[derive(Debug)]
pub struct Cfg {
    pub kind: CfgKind,

    /// Successors of the entry node (one for block and init CFGs, at most
    /// one for closure CFGs)
    entry_succs: SmallVec<[NodeId; 2]>,

    /// Label arena; order is discovery order
    labels: Vec<Label>,

    /// Blocks whose code is emitted inline in this CFG; calls to any other
    /// block become tail-only labels
    included: FxHashSet<BlockId>,

    /// Memo from included block to its unique block-body label
    block_labels: IndexMap<BlockId, NodeId>,
}

impl Cfg {
    /// Build the CFG for a block entry point, or `None` if the block needs
    /// no function definition (not exported, never regular-called).
    pub fn for_block(program: &mut Program, block: BlockId) -> Option<Cfg> {
        {
            let b = program.block(program.check_block(block));
            if !b.is_entrypoint && b.num_calls == 0 {
                return None;
            }
        }
        // The entry node and the block's own label must use different
        // parameter names, so the entry calls with fresh temporaries.
        let params = program.block(block).params.clone();
        let entry_params: Vec<TempId> = Temp::non_units(program, &params)
            .into_iter()
            .map(|p| program.fresh_temp(p))
            .collect();
        let args: Vec<Atom> = entry_params.iter().map(|&t| Atom::Temp(t)).collect();

        let mut cfg = Cfg::empty(
            CfgKind::Block {
                block,
                entry_params,
            },
            identify_blocks(program, block),
        );
        let entry = cfg.edge(program, NodeRef::Entry, block, args);
        cfg.entry_succs = smallvec![entry];
        cfg.find_succs(program);
        info!("built CFG {}", cfg.display_summary(program));
        Some(cfg)
    }

    /// Build the CFG for a closure definition.
    pub fn for_closure(program: &Program, closure: ClosureId) -> Cfg {
        let tail = &program.closure(closure).tail;
        // Unlike a block CFG, the closure's tail target is not forced in:
        // if it is a regular call target elsewhere it keeps its own
        // definition and the edge below becomes a tail-only call label.
        let included = match tail {
            Tail::Call(bc) if program.block(bc.block).num_calls == 0 => {
                identify_blocks(program, bc.block)
            }
            _ => FxHashSet::default(),
        };
        let mut cfg = Cfg::empty(CfgKind::Closure { closure }, included);
        if let Tail::Call(bc) = tail {
            let args = Atom::non_units(program, &bc.args);
            let entry = cfg.edge(program, NodeRef::Entry, bc.block, args);
            cfg.entry_succs = smallvec![entry];
        }
        cfg.find_succs(program);
        info!("built CFG {}", cfg.display_summary(program));
        cfg
    }

    /// Build the CFG for the program-initialization function: the lowered
    /// initializer prefix runs first, then control enters `block` (which
    /// takes no arguments).
    pub fn for_init(program: &Program, block: BlockId, prefix: Vec<target::Insn>) -> Cfg {
        program.check_block(block);
        // The entry seed includes the final block even when it is also a
        // regular call target elsewhere.
        let included = identify_blocks(program, block);
        let mut cfg = Cfg::empty(CfgKind::Init { block, prefix }, included);
        let entry = cfg.edge(program, NodeRef::Entry, block, Vec::new());
        cfg.entry_succs = smallvec![entry];
        cfg.find_succs(program);
        info!("built CFG {}", cfg.display_summary(program));
        cfg
    }

    fn empty(kind: CfgKind, included: FxHashSet<BlockId>) -> Cfg {
        Cfg {
            kind,
            entry_succs: SmallVec::new(),
            labels: Vec::new(),
            included,
            block_labels: IndexMap::new(),
        }
    }

    /// Number of labels in the arena.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn label(&self, id: NodeId) -> &Label {
        &self.labels[id.index()]
    }

    pub fn labels(&self) -> impl Iterator<Item = (NodeId, &Label)> + '_ {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, l)| (NodeId(i as u32), l))
    }

    pub fn entry_succs(&self) -> &[NodeId] {
        &self.entry_succs
    }

    fn push_label(&mut self, kind: LabelKind) -> NodeId {
        let id = NodeId(self.labels.len() as u32);
        self.labels.push(Label::new(kind));
        id
    }

    /// Register a control-flow edge from `src` to block `dst` with the
    /// given (non-unit) actual arguments, creating the destination label
    /// if this is the first edge to reach it.
    fn edge(&mut self, program: &Program, src: NodeRef, dst: BlockId, args: Vec<Atom>) -> NodeId {
        // A block whose code is not included in this CFG is reached by a
        // genuine call; each call site gets its own tail-only label.
        if !self.included.contains(&dst) {
            let id = self.push_label(LabelKind::TailOnly { block: dst });
            debug!(
                "edge to non-included {} {} becomes call label {}",
                dst,
                Atom::tuple_to_string(&args),
                id
            );
            self.labels[id.index()].called_from(id, src, args);
            return id;
        }

        // Already have a label for this block in this CFG?
        if let Some(&lab) = self.block_labels.get(&dst) {
            if self.needs_goto(lab, src) {
                // `src` is already a predecessor of `lab`; insert an
                // intermediate jump so merge entries stay one-per-source.
                let jump = self.push_label(LabelKind::PureJump { target: lab });
                self.labels[lab.index()].called_from(lab, NodeRef::Node(jump), args.clone());
                self.labels[jump.index()].called_from(jump, src, args);
                debug!("edge to {} via inserted jump {}", lab, jump);
                return jump;
            }
            self.labels[lab.index()].called_from(lab, src, args);
            return lab;
        }

        // First request for this block: build its block-body label.
        let id = self.push_label(LabelKind::BlockBody { block: dst });
        self.block_labels.insert(dst, id);
        debug!(
            "block {} becomes label {}, first called with {}",
            dst,
            id,
            Atom::tuple_to_string(&args)
        );
        self.labels[id.index()].called_from(id, src, args);
        id
    }

    /// Is `src` already recorded as a predecessor of `lab`?
    fn needs_goto(&self, lab: NodeId, src: NodeRef) -> bool {
        self.labels[lab.index()].preds.iter().any(|p| p.src == src)
    }

    /// Compute the successor list of every label, treating the arena as a
    /// queue: labels discovered while walking one body are appended and
    /// processed in turn, exactly once each. Re-entering an
    /// already-discovered label only appends a predecessor edge; its body
    /// is never re-walked, so self-loops and longer call cycles terminate.
    fn find_succs(&mut self, program: &Program) {
        let mut i = 0;
        while i < self.labels.len() {
            let id = NodeId(i as u32);
            let kind = self.labels[i].kind;
            let succs = match kind {
                LabelKind::BlockBody { block } => {
                    let code = &program.block(block).code;
                    self.code_succs(program, id, code)
                }
                LabelKind::TailOnly { .. } => SmallVec::new(),
                LabelKind::PureJump { target } => smallvec![target],
            };
            self.labels[i].succs = Some(succs);
            i += 1;
        }
    }

    /// Successors of one code tree: one edge per distinct syntactic jump.
    fn code_succs(
        &mut self,
        program: &Program,
        src: NodeId,
        code: &Code,
    ) -> SmallVec<[NodeId; 4]> {
        match code {
            Code::Bind { rest, .. } => self.code_succs(program, src, rest),
            Code::Done(Tail::Call(bc)) => smallvec![self.call_edge(program, src, bc)],
            Code::Done(_) => SmallVec::new(),
            Code::If {
                on_true, on_false, ..
            } => {
                smallvec![
                    self.call_edge(program, src, on_true),
                    self.call_edge(program, src, on_false),
                ]
            }
            Code::Case { alts, default, .. } => {
                let mut succs = SmallVec::new();
                for alt in alts {
                    succs.push(self.call_edge(program, src, &alt.call));
                }
                if let Some(bc) = default {
                    succs.push(self.call_edge(program, src, bc));
                }
                succs
            }
        }
    }

    fn call_edge(&mut self, program: &Program, src: NodeId, bc: &BlockCall) -> NodeId {
        let args = Atom::non_units(program, &bc.args);
        self.edge(program, NodeRef::Node(src), bc.block, args)
    }

    /// Calculate the parameter-elimination substitution for this CFG.
    ///
    /// Depth-first from the entry successors, handling each label exactly
    /// once (the `visited` guard breaks call cycles): a block-body label
    /// with exactly one predecessor binds each non-unit formal to the
    /// (already-substituted) argument supplied at that single call site;
    /// labels with two or more predecessors bind nothing, leaving their
    /// live formals to be merged by phi operations at emission. The
    /// returned substitution contains every rename discovered anywhere in
    /// the CFG and must be applied uniformly during emission.
    ///
    /// Visited flags are reset on entry, so re-running the pass yields the
    /// same substitution.
    pub fn param_elim(&mut self, program: &Program) -> TempSubst {
        for label in &mut self.labels {
            label.visited = false;
        }
        let mut s = TempSubst::empty();
        for id in self.entry_succs.clone() {
            s = self.param_elim_node(program, id, s);
        }
        trace!("parameter elimination: {}", s);
        s
    }

    fn param_elim_node(&mut self, program: &Program, id: NodeId, mut s: TempSubst) -> TempSubst {
        if self.labels[id.index()].visited {
            return s;
        }
        self.labels[id.index()].visited = true;

        let kind = self.labels[id.index()].kind;
        if let LabelKind::BlockBody { block } = kind {
            let label = &self.labels[id.index()];
            if label.preds.len() == 1 {
                // Single predecessor: a direct rename, never a merge.
                let params = Temp::non_units(program, &program.block(block).params);
                let args = s.apply_all(&label.preds[0].args);
                s = s.extend(&params, &args);
            }
        }

        let succs = self.labels[id.index()].succs(id).clone();
        for succ in succs {
            s = self.param_elim_node(program, succ, s);
        }
        s
    }

    /// Check the structural invariants of a finished CFG. Never required
    /// for correct input; useful as a debugging aid after construction.
    pub fn verify(&self, program: &Program) -> Result<(), String> {
        for (id, label) in self.labels() {
            let succs = label
                .succs
                .as_ref()
                .ok_or_else(|| format!("{} has no successor list", id))?;
            for succ in succs {
                if succ.index() >= self.labels.len() {
                    return Err(format!("{} references non-existent successor {}", id, succ));
                }
            }
            match label.kind {
                LabelKind::TailOnly { .. } => {
                    if label.preds.len() != 1 {
                        return Err(format!(
                            "tail-only label {} has {} predecessors",
                            id,
                            label.preds.len()
                        ));
                    }
                    if !succs.is_empty() {
                        return Err(format!("tail-only label {} has successors", id));
                    }
                }
                LabelKind::PureJump { .. } => {
                    if succs.len() != 1 {
                        return Err(format!("pure-jump label {} has {} successors", id, succs.len()));
                    }
                    if label.preds.len() != 1 {
                        return Err(format!(
                            "pure-jump label {} has {} predecessors",
                            id,
                            label.preds.len()
                        ));
                    }
                }
                LabelKind::BlockBody { block } => {
                    let arity = Temp::non_units(program, &program.block(block).params).len();
                    for pred in &label.preds {
                        if pred.args.len() != arity {
                            return Err(format!(
                                "{} expects {} arguments but a predecessor supplies {}",
                                id,
                                arity,
                                pred.args.len()
                            ));
                        }
                    }
                }
            }
        }
        for succ in &self.entry_succs {
            if succ.index() >= self.labels.len() {
                return Err(format!("entry references non-existent successor {}", succ));
            }
        }
        Ok(())
    }

    /// The symbol name of the function this CFG will become.
    pub fn func_name(&self, program: &Program) -> String {
        match &self.kind {
            CfgKind::Block { block, .. } => program.block(*block).func_name(),
            CfgKind::Closure { closure } => program.closure(*closure).name.clone(),
            CfgKind::Init { .. } => "main".to_string(),
        }
    }

    /// The emitted basic-block label of a node.
    pub fn node_name(&self, program: &Program, node: NodeRef) -> String {
        match node {
            NodeRef::Entry => "entry".to_string(),
            NodeRef::Node(id) => match self.labels[id.index()].kind {
                LabelKind::BlockBody { block } => program.block(block).name.clone(),
                // Inserted nodes are named from their per-CFG number;
                // the entry node is 0, so labels start at 1.
                LabelKind::TailOnly { .. } => format!("c{}", id.0 + 1),
                LabelKind::PureJump { .. } => format!("g{}", id.0 + 1),
            },
        }
    }

    /// One-line summary of this CFG's node set, for debug output.
    pub fn display_summary(&self, program: &Program) -> String {
        let mut buf = self.func_name(program);
        buf.push_str(": {");
        for (id, _) in self.labels() {
            buf.push(' ');
            buf.push_str(&self.node_name(program, NodeRef::Node(id)));
        }
        buf.push_str(" }");
        buf
    }
}

/// Identify the blocks whose code is emitted inline in the CFG rooted at
/// `entry`: the entry itself, plus every block reachable from it through
/// tail calls that is not the target of a regular call elsewhere (those
/// keep their own function definitions and are reached by call instead).
fn identify_blocks(program: &Program, entry: BlockId) -> FxHashSet<BlockId> {
    let mut included = FxHashSet::default();
    included.insert(entry);
    let mut work = vec![entry];
    while let Some(block) = work.pop() {
        collect_tail_targets(program, &program.block(block).code, &mut included, &mut work);
    }
    included
}

fn collect_tail_targets(
    program: &Program,
    code: &Code,
    included: &mut FxHashSet<BlockId>,
    work: &mut Vec<BlockId>,
) {
    let mut consider = |bc: &BlockCall, work: &mut Vec<BlockId>| {
        if included.contains(&bc.block) {
            return;
        }
        // Regular call targets elsewhere keep their own definitions.
        if program.block(bc.block).num_calls > 0 {
            return;
        }
        included.insert(bc.block);
        work.push(bc.block);
    };
    match code {
        Code::Bind { rest, .. } => collect_tail_targets(program, rest, included, work),
        Code::Done(Tail::Call(bc)) => consider(bc, work),
        Code::Done(_) => {}
        Code::If {
            on_true, on_false, ..
        } => {
            consider(on_true, work);
            consider(on_false, work);
        }
        Code::Case { alts, default, .. } => {
            for alt in alts {
                consider(&alt.call, work);
            }
            if let Some(bc) = default {
                consider(bc, work);
            }
        }
    }
}

/// Build every CFG of a program: one per exported or regular-called block
/// and one per closure definition. (The initialization CFG is built
/// separately by [`emit::lower_init`], which must lower the top-level
/// statements first.)
pub fn build_cfgs(program: &mut Program) -> Vec<Cfg> {
    program.count_calls();
    let mut cfgs = Vec::new();
    for i in 0..program.blocks.len() {
        if let Some(cfg) = Cfg::for_block(program, BlockId(i as u32)) {
            cfgs.push(cfg);
        }
    }
    for i in 0..program.closures.len() {
        cfgs.push(Cfg::for_closure(program, ClosureId(i as u32)));
    }
    cfgs
}

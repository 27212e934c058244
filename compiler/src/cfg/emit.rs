//! Emission: from a finished CFG to a target function definition
//!
//! Runs after parameter elimination. The substitution computed there is
//! applied uniformly at every atom reference; formals of multi-predecessor
//! blocks become phi operations whose entries follow recorded predecessor
//! order; tail-only labels become genuine calls; pure-jump labels become
//! bare jumps. Deferred global loads (or the lowered initializer prefix)
//! land in the synthesized `entry` block ahead of the first transfer.

use log::trace;

use super::var_map::target_ty;
use super::{Cfg, CfgKind, Label, LabelKind, NodeId, NodeRef, TempSubst, VarMap};
use crate::internal_error;
use crate::mil::{Atom, BlockId, Code, PrimOp, Program, Tail, Temp, TempId};
use crate::target;

impl Cfg {
    /// Emit this CFG as a target function definition.
    ///
    /// `s` must be the substitution returned by [`Cfg::param_elim`] for
    /// this same CFG; `vm` must match the CFG's kind (function-body policy
    /// for block and closure CFGs, initialization policy for init CFGs).
    pub fn to_func_defn(
        &self,
        program: &Program,
        vm: &mut VarMap,
        s: &TempSubst,
    ) -> target::FuncDefn {
        let name = self.func_name(program);
        // Formals claim the first register numbers.
        let formals = self.formals(program, vm);
        let ret = self.ret_ty(program);

        let mut body_blocks = Vec::new();
        for (id, label) in self.labels() {
            let block_name = self.node_name(program, NodeRef::Node(id));
            body_blocks.push((block_name, self.emit_label(program, vm, s, id, label)));
        }

        // A closure whose body tail never enters a label lowers directly
        // into the entry block.
        let mut entry_insns = Vec::new();
        let entry_term = match self.entry_succs().first() {
            Some(&succ) => target::Terminator::Jump {
                target: self.node_name(program, NodeRef::Node(succ)),
            },
            None => match &self.kind {
                CfgKind::Closure { closure } => {
                    let tail = &program.closure(*closure).tail;
                    self.lower_done(program, vm, s, tail, &[], &mut entry_insns)
                }
                _ => internal_error!("CFG for \"{}\" has no entry successor", name),
            },
        };

        // Entry prefix: the initializer sequence for init CFGs, deferred
        // global loads (now all discovered) for everything else.
        let mut entry = target::Block::default();
        match &self.kind {
            CfgKind::Init { prefix, .. } => entry.insns.extend(prefix.iter().cloned()),
            _ => entry.insns.extend(vm.global_loads(program)),
        }
        entry.insns.append(&mut entry_insns);
        entry.term = Some(entry_term);

        let mut blocks = vec![("entry".to_string(), entry)];
        blocks.extend(body_blocks);
        trace!("emitted function \"{}\" with {} blocks", name, blocks.len());
        target::FuncDefn {
            name,
            formals,
            ret,
            blocks,
        }
    }

    fn formals(&self, program: &Program, vm: &mut VarMap) -> Vec<target::Reg> {
        match &self.kind {
            CfgKind::Block { entry_params, .. } => entry_params
                .iter()
                .map(|&t| vm.lookup(program, t))
                .collect(),
            CfgKind::Closure { closure } => {
                let k = program.closure(*closure);
                let mut all = k.stored.clone();
                all.extend_from_slice(&k.args);
                Temp::non_units(program, &all)
                    .iter()
                    .map(|&t| vm.lookup(program, t))
                    .collect()
            }
            CfgKind::Init { .. } => Vec::new(),
        }
    }

    fn ret_ty(&self, program: &Program) -> Option<target::Type> {
        let result = match &self.kind {
            CfgKind::Block { block, .. } => program.block(*block).result,
            CfgKind::Closure { closure } => program.closure(*closure).result,
            CfgKind::Init { block, .. } => program.block(*block).result,
        };
        result.filter(|t| !t.is_unit()).map(target_ty)
    }

    fn emit_label(
        &self,
        program: &Program,
        vm: &mut VarMap,
        s: &TempSubst,
        id: NodeId,
        label: &Label,
    ) -> target::Block {
        let mut tb = target::Block::default();
        match label.kind {
            LabelKind::BlockBody { block } => {
                let b = program.block(block);
                if label.preds.len() >= 2 {
                    // Live formals are merged; each entry pairs the
                    // predecessor's emitted label with its argument after
                    // the final substitution.
                    let params = Temp::non_units(program, &b.params);
                    for (i, &param) in params.iter().enumerate() {
                        let dest = vm.lookup(program, param);
                        let incoming = label
                            .preds
                            .iter()
                            .map(|pred| {
                                (
                                    self.node_name(program, pred.src),
                                    atom_value(program, vm, s, pred.args[i]),
                                )
                            })
                            .collect();
                        tb.phis.push(target::Phi { dest, incoming });
                    }
                }
                let term = self.lower_code(program, vm, s, &b.code, label.succs(id), &mut tb.insns);
                tb.term = Some(term);
            }
            LabelKind::TailOnly { block } => {
                // One predecessor by construction; the call's arguments
                // are that predecessor's, substituted.
                let b = program.block(block);
                let args = label.preds[0]
                    .args
                    .iter()
                    .map(|&a| atom_value(program, vm, s, a))
                    .collect();
                let dest = b
                    .result
                    .filter(|t| !t.is_unit())
                    .map(|t| vm.reg(target_ty(t)));
                tb.insns.push(target::Insn::Call {
                    dest,
                    func: b.func_name(),
                    args,
                });
                tb.term = Some(target::Terminator::Ret {
                    value: dest.map(target::Value::Reg),
                });
            }
            LabelKind::PureJump { target } => {
                tb.term = Some(target::Terminator::Jump {
                    target: self.node_name(program, NodeRef::Node(target)),
                });
            }
        }
        tb
    }

    fn lower_code(
        &self,
        program: &Program,
        vm: &mut VarMap,
        s: &TempSubst,
        code: &Code,
        succs: &[NodeId],
        insns: &mut Vec<target::Insn>,
    ) -> target::Terminator {
        match code {
            Code::Bind { lhs, tail, rest } => {
                lower_bind(program, vm, s, lhs, tail, insns);
                self.lower_code(program, vm, s, rest, succs, insns)
            }
            Code::Done(tail) => self.lower_done(program, vm, s, tail, succs, insns),
            Code::If { cond, .. } => target::Terminator::Branch {
                cond: atom_value(program, vm, s, *cond),
                on_true: self.succ_name(program, succs, 0),
                on_false: self.succ_name(program, succs, 1),
            },
            Code::Case {
                scrut,
                alts,
                default,
            } => {
                let value = atom_value(program, vm, s, *scrut);
                let mut cases: Vec<(u32, String)> = alts
                    .iter()
                    .enumerate()
                    .map(|(i, alt)| (alt.tag, self.succ_name(program, succs, i)))
                    .collect();
                let default = if default.is_some() {
                    self.succ_name(program, succs, alts.len())
                } else {
                    // no explicit default: the final alternative serves
                    match cases.pop() {
                        Some((_, label)) => label,
                        None => internal_error!("case dispatch with no alternatives"),
                    }
                };
                target::Terminator::Switch {
                    value,
                    cases,
                    default,
                }
            }
        }
    }

    fn lower_done(
        &self,
        program: &Program,
        vm: &mut VarMap,
        s: &TempSubst,
        tail: &Tail,
        succs: &[NodeId],
        insns: &mut Vec<target::Insn>,
    ) -> target::Terminator {
        match tail {
            Tail::Return(atoms) => {
                let vs = Atom::non_units(program, atoms);
                match vs.len() {
                    0 => target::Terminator::Ret { value: None },
                    1 => target::Terminator::Ret {
                        value: Some(atom_value(program, vm, s, vs[0])),
                    },
                    n => internal_error!("target cannot return {} values", n),
                }
            }
            Tail::Call(bc) => {
                if succs.is_empty() {
                    // No label carries this transfer (a closure body's own
                    // tail): make the call here and return its result.
                    let b = program.block(bc.block);
                    let args = Atom::non_units(program, &bc.args)
                        .iter()
                        .map(|&a| atom_value(program, vm, s, a))
                        .collect();
                    let dest = b
                        .result
                        .filter(|t| !t.is_unit())
                        .map(|t| vm.reg(target_ty(t)));
                    insns.push(target::Insn::Call {
                        dest,
                        func: b.func_name(),
                        args,
                    });
                    target::Terminator::Ret {
                        value: dest.map(target::Value::Reg),
                    }
                } else {
                    target::Terminator::Jump {
                        target: self.succ_name(program, succs, 0),
                    }
                }
            }
            Tail::Prim { op, args } => {
                let dest = vm.reg(target_ty(op.result_ty()));
                let vals = prim_operands(program, vm, s, *op, args);
                push_prim(dest, *op, &vals, insns);
                target::Terminator::Ret {
                    value: Some(target::Value::Reg(dest)),
                }
            }
        }
    }

    fn succ_name(&self, program: &Program, succs: &[NodeId], i: usize) -> String {
        match succs.get(i) {
            Some(&id) => self.node_name(program, NodeRef::Node(id)),
            None => internal_error!("missing successor {} during emission", i),
        }
    }
}

/// The target value of an atom, after the final substitution.
pub(crate) fn atom_value(
    program: &Program,
    vm: &mut VarMap,
    s: &TempSubst,
    atom: Atom,
) -> target::Value {
    match s.apply(atom) {
        Atom::Temp(t) => target::Value::Reg(vm.lookup(program, t)),
        Atom::Word(w) => target::Value::Word(w),
        Atom::Flag(b) => target::Value::Flag(b),
        Atom::Top(top) => vm.lookup_global(program, top),
    }
}

fn prim_operands(
    program: &Program,
    vm: &mut VarMap,
    s: &TempSubst,
    op: PrimOp,
    args: &[Atom],
) -> Vec<target::Value> {
    if args.len() != op.arity() {
        internal_error!(
            "primitive expects {} operands, got {}",
            op.arity(),
            args.len()
        );
    }
    args.iter().map(|&a| atom_value(program, vm, s, a)).collect()
}

fn push_prim(dest: target::Reg, op: PrimOp, vals: &[target::Value], insns: &mut Vec<target::Insn>) {
    match op {
        PrimOp::Add | PrimOp::Sub | PrimOp::Mul | PrimOp::Eq | PrimOp::Lt => {
            insns.push(target::Insn::BinOp {
                dest,
                op: bin_op(op),
                lhs: vals[0],
                rhs: vals[1],
            });
        }
        PrimOp::Neg | PrimOp::Not => {
            insns.push(target::Insn::UnOp {
                dest,
                op: un_op(op),
                src: vals[0],
            });
        }
    }
}

fn bin_op(op: PrimOp) -> target::BinOp {
    match op {
        PrimOp::Add => target::BinOp::Add,
        PrimOp::Sub => target::BinOp::Sub,
        PrimOp::Mul => target::BinOp::Mul,
        PrimOp::Eq => target::BinOp::Eq,
        PrimOp::Lt => target::BinOp::Lt,
        PrimOp::Neg | PrimOp::Not => internal_error!("unary primitive in binary position"),
    }
}

fn un_op(op: PrimOp) -> target::UnOp {
    match op {
        PrimOp::Neg => target::UnOp::Neg,
        PrimOp::Not => target::UnOp::Not,
        _ => internal_error!("binary primitive in unary position"),
    }
}

fn lower_bind(
    program: &Program,
    vm: &mut VarMap,
    s: &TempSubst,
    lhs: &[TempId],
    tail: &Tail,
    insns: &mut Vec<target::Insn>,
) {
    let lhs = Temp::non_units(program, lhs);
    match tail {
        Tail::Prim { op, args } => {
            if lhs.len() > 1 {
                internal_error!("primitive produces one result, {} bound", lhs.len());
            }
            let vals = prim_operands(program, vm, s, *op, args);
            // A primitive whose result is discarded (all-unit lhs) is
            // pure and need not be materialized.
            if let Some(&t) = lhs.first() {
                let dest = vm.lookup(program, t);
                push_prim(dest, *op, &vals, insns);
            }
        }
        Tail::Call(bc) => {
            if lhs.len() > 1 {
                internal_error!("call binds one result, {} bound", lhs.len());
            }
            let b = program.block(bc.block);
            let args = Atom::non_units(program, &bc.args)
                .iter()
                .map(|&a| atom_value(program, vm, s, a))
                .collect();
            let dest = lhs.first().map(|&t| vm.lookup(program, t));
            insns.push(target::Insn::Call {
                dest,
                func: b.func_name(),
                args,
            });
        }
        Tail::Return(atoms) => {
            // vs <- return as: plain copies
            let srcs = Atom::non_units(program, atoms);
            if lhs.len() != srcs.len() {
                internal_error!(
                    "bound return arity mismatch: {} vs {}",
                    lhs.len(),
                    srcs.len()
                );
            }
            for (&t, &a) in lhs.iter().zip(srcs.iter()) {
                let dest = vm.lookup(program, t);
                insns.push(target::Insn::Copy {
                    dest,
                    src: atom_value(program, vm, s, a),
                });
            }
        }
    }
}

/// Lower the program-initialization sequence: every `TopLevel` statement
/// in program order (registering each global as it is computed), then the
/// CFG that transfers into `main`.
///
/// Returns the init CFG together with its initialization-policy `VarMap`;
/// run [`Cfg::param_elim`] and [`Cfg::to_func_defn`] on the pair to finish.
pub fn lower_init(program: &Program, main: BlockId) -> (Cfg, VarMap) {
    let mut ivm = VarMap::for_init();
    let mut prefix = Vec::new();
    let s = TempSubst::empty();
    for top_level in &program.top_levels {
        let value = match &top_level.tail {
            Tail::Return(atoms) => {
                let vs = Atom::non_units(program, atoms);
                match vs.len() {
                    1 => atom_value(program, &mut ivm, &s, vs[0]),
                    n => internal_error!(
                        "initializer for \"{}\" must produce one value, got {}",
                        program.top(top_level.lhs).name,
                        n
                    ),
                }
            }
            Tail::Prim { op, args } => {
                let dest = ivm.reg(target_ty(op.result_ty()));
                let vals = prim_operands(program, &mut ivm, &s, *op, args);
                push_prim(dest, *op, &vals, &mut prefix);
                target::Value::Reg(dest)
            }
            Tail::Call(bc) => {
                let b = program.block(bc.block);
                let args = Atom::non_units(program, &bc.args)
                    .iter()
                    .map(|&a| atom_value(program, &mut ivm, &s, a))
                    .collect();
                let ty = match b.result.filter(|t| !t.is_unit()) {
                    Some(t) => t,
                    None => internal_error!(
                        "initializer for \"{}\" calls a block with no result",
                        program.top(top_level.lhs).name
                    ),
                };
                let dest = ivm.reg(target_ty(ty));
                prefix.push(target::Insn::Call {
                    dest: Some(dest),
                    func: b.func_name(),
                    args,
                });
                target::Value::Reg(dest)
            }
        };
        ivm.map_global(top_level.lhs, value);
    }
    let cfg = Cfg::for_init(program, main, prefix);
    (cfg, ivm)
}

/// Run parameter elimination and emit one block or closure CFG.
pub fn lower_cfg(program: &Program, cfg: &mut Cfg) -> target::FuncDefn {
    if matches!(cfg.kind, CfgKind::Init { .. }) {
        internal_error!("init CFGs are emitted through lower_init's VarMap");
    }
    let mut vm = VarMap::for_defn();
    let s = cfg.param_elim(program);
    cfg.to_func_defn(program, &mut vm, &s)
}

/// Lower a whole program: every block and closure CFG, plus the
/// initialization function when `main` is given.
pub fn lower_program(program: &mut Program, main: Option<BlockId>) -> Vec<target::FuncDefn> {
    let mut cfgs = super::build_cfgs(program);
    let mut defns = Vec::new();
    for cfg in &mut cfgs {
        defns.push(lower_cfg(program, cfg));
    }
    if let Some(main) = main {
        let (mut cfg, mut ivm) = lower_init(program, main);
        let s = cfg.param_elim(program);
        defns.push(cfg.to_func_defn(program, &mut ivm, &s));
    }
    defns
}

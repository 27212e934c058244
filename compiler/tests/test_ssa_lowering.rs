//! End-to-end tests for SSA lowering: parameter elimination, phi
//! placement, unit elision, both global-value policies, and emission.

use milc::cfg::{self, Cfg, TempSubst, VarMap};
use milc::mil::{
    Atom, Block, BlockCall, BlockId, ClosureDefn, Code, MilType, PrimOp, Program, StaticValue,
    Tail, Top, TopLevel,
};
use milc::target;

fn find_block<'a>(defn: &'a target::FuncDefn, name: &str) -> &'a target::Block {
    defn.blocks
        .iter()
        .find(|(label, _)| label == name)
        .map(|(_, block)| block)
        .unwrap_or_else(|| panic!("no emitted block named {} in {}", name, defn))
}

#[test]
fn test_single_predecessor_parameter_is_eliminated() {
    milc::logging::init_test();
    let mut program = Program::new();
    let x = program.add_temp("x", MilType::Word);
    let id_block = program.add_block(Block::new(
        "id",
        vec![x],
        Some(MilType::Word),
        Code::Done(Tail::Return(vec![Atom::Temp(x)])),
    ));
    let start = program.add_block(Block::entrypoint(
        "start",
        Vec::new(),
        Some(MilType::Word),
        Code::Done(Tail::Call(BlockCall::new(id_block, vec![Atom::Word(5)]))),
    ));
    program.count_calls();

    let mut built = Cfg::for_block(&mut program, start).expect("CFG");
    let mut vm = VarMap::for_defn();
    let s = built.param_elim(&program);
    let defn = built.to_func_defn(&program, &mut vm, &s);

    // the constant flows through; no register was ever allocated for x
    let id_code = find_block(&defn, "id");
    assert!(id_code.phis.is_empty());
    assert_eq!(
        id_code.term,
        Some(target::Terminator::Ret {
            value: Some(target::Value::Word(5))
        })
    );
    assert_eq!(vm.register_count(), 0);
}

#[test]
fn test_multi_predecessor_parameter_gets_phi_in_discovery_order() {
    milc::logging::init_test();
    let mut program = Program::new();
    let c = program.add_temp("c", MilType::Flag);
    let p = program.add_temp("p", MilType::Word);
    let join = program.add_block(Block::new(
        "join",
        vec![p],
        Some(MilType::Word),
        Code::Done(Tail::Return(vec![Atom::Temp(p)])),
    ));
    let left = program.add_block(Block::new(
        "left",
        Vec::new(),
        Some(MilType::Word),
        Code::Done(Tail::Call(BlockCall::new(join, vec![Atom::Word(1)]))),
    ));
    let right = program.add_block(Block::new(
        "right",
        Vec::new(),
        Some(MilType::Word),
        Code::Done(Tail::Call(BlockCall::new(join, vec![Atom::Word(2)]))),
    ));
    let start = program.add_block(Block::entrypoint(
        "start",
        vec![c],
        Some(MilType::Word),
        Code::If {
            cond: Atom::Temp(c),
            on_true: BlockCall::new(left, Vec::new()),
            on_false: BlockCall::new(right, Vec::new()),
        },
    ));
    program.count_calls();

    let mut built = Cfg::for_block(&mut program, start).expect("CFG");
    let mut vm = VarMap::for_defn();
    let s = built.param_elim(&program);
    let defn = built.to_func_defn(&program, &mut vm, &s);

    let join_code = find_block(&defn, "join");
    assert_eq!(join_code.phis.len(), 1, "one merge for the one live formal");
    let phi = &join_code.phis[0];
    assert_eq!(
        phi.incoming,
        vec![
            ("left".to_string(), target::Value::Word(1)),
            ("right".to_string(), target::Value::Word(2)),
        ]
    );
    // the merged formal holds a real register, and the body returns it
    assert_eq!(
        join_code.term,
        Some(target::Terminator::Ret {
            value: Some(target::Value::Reg(phi.dest))
        })
    );
}

#[test]
fn test_unit_parameters_never_merge_or_occupy_registers() {
    milc::logging::init_test();
    let mut program = Program::new();
    let c = program.add_temp("c", MilType::Flag);
    let u = program.add_temp("u", MilType::Unit);
    let uj = program.add_temp("uj", MilType::Unit);
    let p = program.add_temp("p", MilType::Word);
    let join = program.add_block(Block::new(
        "join",
        vec![uj, p],
        Some(MilType::Word),
        Code::Done(Tail::Return(vec![Atom::Temp(p)])),
    ));
    // both arms target join from the same source, passing the unit temp
    let start = program.add_block(Block::entrypoint(
        "start",
        vec![c, u],
        Some(MilType::Word),
        Code::If {
            cond: Atom::Temp(c),
            on_true: BlockCall::new(join, vec![Atom::Temp(u), Atom::Word(1)]),
            on_false: BlockCall::new(join, vec![Atom::Temp(u), Atom::Word(2)]),
        },
    ));
    program.count_calls();

    let mut built = Cfg::for_block(&mut program, start).expect("CFG");
    let mut vm = VarMap::for_defn();
    let s = built.param_elim(&program);
    let defn = built.to_func_defn(&program, &mut vm, &s);

    // only the flag formal survives into the signature
    assert_eq!(defn.formals.len(), 1);
    assert_eq!(defn.formals[0].ty, target::Type::Flag);

    let join_code = find_block(&defn, "join");
    assert_eq!(join_code.phis.len(), 1, "no merge for the unit formal");
    // formal c + merged p: the unit temps never reached the allocator
    assert_eq!(vm.register_count(), 2);
}

#[test]
fn test_cycle_phi_feeds_itself_and_pass_is_idempotent() {
    milc::logging::init_test();
    let mut program = Program::new();
    let n = program.add_temp("n", MilType::Word);
    let m = program.add_temp("m", MilType::Word);
    let loop_id = BlockId(0);
    program.add_block(Block::entrypoint(
        "loop",
        vec![n],
        None,
        Code::Bind {
            lhs: vec![m],
            tail: Tail::Prim {
                op: PrimOp::Sub,
                args: vec![Atom::Temp(n), Atom::Word(1)],
            },
            rest: Box::new(Code::Done(Tail::Call(BlockCall::new(
                loop_id,
                vec![Atom::Temp(m)],
            )))),
        },
    ));
    program.count_calls();

    let mut built = Cfg::for_block(&mut program, loop_id).expect("CFG");
    let first = built.param_elim(&program).to_string();
    let second = built.param_elim(&program).to_string();
    assert_eq!(first, second, "re-running the pass is idempotent");

    let mut vm = VarMap::for_defn();
    let s = built.param_elim(&program);
    let defn = built.to_func_defn(&program, &mut vm, &s);

    let loop_code = find_block(&defn, "loop");
    assert_eq!(loop_code.phis.len(), 1);
    let phi = &loop_code.phis[0];
    assert_eq!(phi.incoming.len(), 2);
    assert_eq!(phi.incoming[0].0, "entry");
    assert_eq!(phi.incoming[1].0, "loop", "back edge merges from the block itself");
}

#[test]
fn test_regular_called_block_lowers_to_call_and_return() {
    milc::logging::init_test();
    let mut program = Program::new();
    let t = program.add_temp("t", MilType::Word);
    let shared = program.add_block(Block::new(
        "shared",
        Vec::new(),
        Some(MilType::Word),
        Code::Done(Tail::Return(vec![Atom::Word(7)])),
    ));
    program.add_block(Block::entrypoint(
        "user",
        Vec::new(),
        Some(MilType::Word),
        Code::Bind {
            lhs: vec![t],
            tail: Tail::Call(BlockCall::new(shared, Vec::new())),
            rest: Box::new(Code::Done(Tail::Return(vec![Atom::Temp(t)]))),
        },
    ));
    let start = program.add_block(Block::entrypoint(
        "start",
        Vec::new(),
        Some(MilType::Word),
        Code::Done(Tail::Call(BlockCall::new(shared, Vec::new()))),
    ));
    program.count_calls();

    let mut built = Cfg::for_block(&mut program, start).expect("CFG");
    let mut vm = VarMap::for_defn();
    let s = built.param_elim(&program);
    let defn = built.to_func_defn(&program, &mut vm, &s);

    // start's tail call left the CFG: a call label invokes func_shared
    let call_block = defn
        .blocks
        .iter()
        .find(|(label, _)| label.starts_with('c'))
        .map(|(_, block)| block)
        .expect("call label emitted");
    match &call_block.insns[0] {
        target::Insn::Call { func, .. } => assert_eq!(func, "func_shared"),
        other => panic!("expected a call, got {}", other),
    }
    assert!(matches!(
        call_block.term,
        Some(target::Terminator::Ret { value: Some(_) })
    ));
}

#[test]
fn test_function_body_globals_load_once_at_entry() {
    milc::logging::init_test();
    let mut program = Program::new();
    let g = program.add_top(Top::new("counter", MilType::Word));
    let stat = program.add_top(Top::with_static(
        "width",
        MilType::Word,
        StaticValue::Word(64),
    ));
    let t = program.add_temp("t", MilType::Word);
    let t2 = program.add_temp("t2", MilType::Word);
    let start = program.add_block(Block::entrypoint(
        "start",
        Vec::new(),
        Some(MilType::Word),
        Code::Bind {
            lhs: vec![t],
            // the same global twice, plus a statically known one
            tail: Tail::Prim {
                op: PrimOp::Add,
                args: vec![Atom::Top(g), Atom::Top(g)],
            },
            rest: Box::new(Code::Bind {
                lhs: vec![t2],
                tail: Tail::Prim {
                    op: PrimOp::Add,
                    args: vec![Atom::Temp(t), Atom::Top(stat)],
                },
                rest: Box::new(Code::Done(Tail::Return(vec![Atom::Temp(t2)]))),
            }),
        },
    ));
    program.count_calls();

    let mut built = Cfg::for_block(&mut program, start).expect("CFG");
    let mut vm = VarMap::for_defn();
    let s = built.param_elim(&program);
    let defn = built.to_func_defn(&program, &mut vm, &s);

    let entry = find_block(&defn, "entry");
    let loads: Vec<_> = entry
        .insns
        .iter()
        .filter(|i| matches!(i, target::Insn::LoadGlobal { .. }))
        .collect();
    assert_eq!(loads.len(), 1, "one load per distinct non-static global");
    match loads[0] {
        target::Insn::LoadGlobal { name, .. } => assert_eq!(name, "counter"),
        _ => unreachable!(),
    }
    // the static global appears as an immediate
    let body = find_block(&defn, "start");
    assert!(body
        .insns
        .iter()
        .any(|i| matches!(i, target::Insn::BinOp { rhs: target::Value::Word(64), .. })));
}

#[test]
fn test_init_sequence_registers_globals_in_program_order() {
    milc::logging::init_test();
    let mut program = Program::new();
    let zero = program.add_top(Top::with_static("zero", MilType::Word, StaticValue::Word(0)));
    let g1 = program.add_top(Top::new("g1", MilType::Word));
    let g2 = program.add_top(Top::new("g2", MilType::Word));
    let helper = program.add_block(Block::new(
        "helper",
        Vec::new(),
        Some(MilType::Word),
        Code::Done(Tail::Return(vec![Atom::Word(3)])),
    ));
    program.add_top_level(TopLevel {
        lhs: g1,
        tail: Tail::Prim {
            op: PrimOp::Add,
            args: vec![Atom::Top(zero), Atom::Word(7)],
        },
    });
    program.add_top_level(TopLevel {
        lhs: g2,
        tail: Tail::Call(BlockCall::new(helper, Vec::new())),
    });
    let main = program.add_block(Block::new(
        "run",
        Vec::new(),
        Some(MilType::Word),
        Code::Done(Tail::Return(vec![Atom::Top(g2)])),
    ));
    program.count_calls();

    let (mut built, mut ivm) = cfg::lower_init(&program, main);
    let s = built.param_elim(&program);
    let defn = built.to_func_defn(&program, &mut ivm, &s);

    assert_eq!(defn.name, "main");
    let entry = find_block(&defn, "entry");
    // g1's add comes before g2's helper call
    assert!(matches!(entry.insns[0], target::Insn::BinOp { .. }));
    match &entry.insns[1] {
        target::Insn::Call { func, .. } => assert_eq!(func, "func_helper"),
        other => panic!("expected helper call, got {}", other),
    }
    // the body reads g2 straight out of the register the call filled
    let body = find_block(&defn, "run");
    assert!(matches!(
        body.term,
        Some(target::Terminator::Ret {
            value: Some(target::Value::Reg(_))
        })
    ));
}

#[test]
#[should_panic(expected = "referenced before its initializer")]
fn test_init_sequence_rejects_forward_references() {
    milc::logging::init_test();
    let mut program = Program::new();
    let g1 = program.add_top(Top::new("g1", MilType::Word));
    let g2 = program.add_top(Top::new("g2", MilType::Word));
    // g1's initializer reads g2, which is only computed afterwards
    program.add_top_level(TopLevel {
        lhs: g1,
        tail: Tail::Return(vec![Atom::Top(g2)]),
    });
    program.add_top_level(TopLevel {
        lhs: g2,
        tail: Tail::Return(vec![Atom::Word(1)]),
    });
    let main = program.add_block(Block::new("run", Vec::new(), None, Code::ret_nothing()));
    program.count_calls();
    cfg::lower_init(&program, main);
}

#[test]
fn test_closure_entry_unpacks_stored_and_argument_temps() {
    milc::logging::init_test();
    let mut program = Program::new();
    let v = program.add_temp("v", MilType::Word);
    let x = program.add_temp("x", MilType::Word);
    let a = program.add_temp("a", MilType::Word);
    let b = program.add_temp("b", MilType::Word);
    let m = program.add_temp("m", MilType::Word);
    let body = program.add_block(Block::new(
        "body",
        vec![a, b],
        Some(MilType::Word),
        Code::Bind {
            lhs: vec![m],
            tail: Tail::Prim {
                op: PrimOp::Add,
                args: vec![Atom::Temp(a), Atom::Temp(b)],
            },
            rest: Box::new(Code::Done(Tail::Return(vec![Atom::Temp(m)]))),
        },
    ));
    let k = program.add_closure(ClosureDefn {
        name: "clos_add".to_string(),
        stored: vec![v],
        args: vec![x],
        result: Some(MilType::Word),
        tail: Tail::Call(BlockCall::new(body, vec![Atom::Temp(v), Atom::Temp(x)])),
    });
    program.count_calls();

    let mut built = Cfg::for_closure(&program, k);
    built.verify(&program).expect("CFG verifies");
    let mut vm = VarMap::for_defn();
    let s = built.param_elim(&program);
    let defn = built.to_func_defn(&program, &mut vm, &s);

    assert_eq!(defn.name, "clos_add");
    assert_eq!(defn.formals.len(), 2, "stored temp then argument temp");
    // body's formals were eliminated onto the closure's own temps
    let body_code = find_block(&defn, "body");
    assert!(body_code.phis.is_empty());
    match &body_code.insns[0] {
        target::Insn::BinOp { lhs, rhs, .. } => {
            assert_eq!(*lhs, target::Value::Reg(defn.formals[0]));
            assert_eq!(*rhs, target::Value::Reg(defn.formals[1]));
        }
        other => panic!("expected the add, got {}", other),
    }
}

#[test]
fn test_closure_with_plain_tail_lowers_in_entry_block() {
    milc::logging::init_test();
    let mut program = Program::new();
    let v = program.add_temp("v", MilType::Word);
    let k = program.add_closure(ClosureDefn {
        name: "clos_const".to_string(),
        stored: vec![v],
        args: Vec::new(),
        result: Some(MilType::Word),
        tail: Tail::Return(vec![Atom::Temp(v)]),
    });
    program.count_calls();

    let mut built = Cfg::for_closure(&program, k);
    assert_eq!(built.label_count(), 0);
    let mut vm = VarMap::for_defn();
    let s = built.param_elim(&program);
    assert!(s.is_empty());
    let defn = built.to_func_defn(&program, &mut vm, &s);

    assert_eq!(defn.blocks.len(), 1);
    let entry = find_block(&defn, "entry");
    assert_eq!(
        entry.term,
        Some(target::Terminator::Ret {
            value: Some(target::Value::Reg(defn.formals[0]))
        })
    );
}

#[test]
fn test_lower_program_emits_every_definition() {
    milc::logging::init_test();
    let mut program = Program::new();
    let x = program.add_temp("x", MilType::Word);
    let id_block = program.add_block(Block::new(
        "id",
        vec![x],
        Some(MilType::Word),
        Code::Done(Tail::Return(vec![Atom::Temp(x)])),
    ));
    program.add_block(Block::entrypoint(
        "start",
        Vec::new(),
        Some(MilType::Word),
        Code::Done(Tail::Call(BlockCall::new(id_block, vec![Atom::Word(5)]))),
    ));
    let main = program.add_block(Block::new(
        "run",
        Vec::new(),
        None,
        Code::ret_nothing(),
    ));

    let defns = cfg::lower_program(&mut program, Some(main));
    let names: Vec<&str> = defns.iter().map(|d| d.name.as_str()).collect();
    assert!(names.contains(&"start"));
    assert!(names.contains(&"main"));

    // the substitution threaded the constant all the way through
    let start_defn = defns.iter().find(|d| d.name == "start").unwrap();
    let text = start_defn.to_string();
    assert!(text.contains("ret 5"), "emitted text was:\n{}", text);
}

#[test]
fn test_substitution_applies_uniformly_during_emission() {
    milc::logging::init_test();
    // start -> a(10) -> b(a's x) -> return: the rename chains through two
    // single-predecessor hops
    let mut program = Program::new();
    let xa = program.add_temp("xa", MilType::Word);
    let xb = program.add_temp("xb", MilType::Word);
    let b_id = BlockId(0);
    program.add_block(Block::new(
        "bee",
        vec![xb],
        Some(MilType::Word),
        Code::Done(Tail::Return(vec![Atom::Temp(xb)])),
    ));
    let a_id = program.add_block(Block::new(
        "aye",
        vec![xa],
        Some(MilType::Word),
        Code::Done(Tail::Call(BlockCall::new(b_id, vec![Atom::Temp(xa)]))),
    ));
    let start = program.add_block(Block::entrypoint(
        "start",
        Vec::new(),
        Some(MilType::Word),
        Code::Done(Tail::Call(BlockCall::new(a_id, vec![Atom::Word(10)]))),
    ));
    program.count_calls();

    let mut built = Cfg::for_block(&mut program, start).expect("CFG");
    let mut vm = VarMap::for_defn();
    let s: TempSubst = built.param_elim(&program);
    assert_eq!(s.apply(Atom::Temp(xa)), Atom::Word(10));
    assert_eq!(s.apply(Atom::Temp(xb)), Atom::Word(10), "renames chain");

    let defn = built.to_func_defn(&program, &mut vm, &s);
    let bee = find_block(&defn, "bee");
    assert_eq!(
        bee.term,
        Some(target::Terminator::Ret {
            value: Some(target::Value::Word(10))
        })
    );
    assert_eq!(vm.register_count(), 0);
}

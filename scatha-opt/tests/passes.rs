//! Pass behavior over hand-built IR.

use scatha_ir::{
    print_function, verify_function, ArithmeticOp, Builder, CompareMode,
    CompareOp, Context, Function, InstKind, Module, Parameter, Value,
};
use scatha_opt::{
    constfold, dce, gvn, inline, looprotate, loopunroll, mem2reg,
    simplifycfg, PassArgs, PassRegistry,
};

fn i64_param(ctx: &mut Context, name: &str) -> Parameter {
    Parameter { ty: ctx.int_type(64), name: name.into() }
}

/// var x; if (c) { x = a } else { x = b }; return x
fn build_diamond_store(ctx: &mut Context) -> Function {
    let i64t = ctx.int_type(64);
    let params =
        vec![i64_param(ctx, "a"), i64_param(ctx, "b"), Parameter {
            ty: ctx.bool_type(),
            name: "c".into(),
        }];
    let mut function = Function::new("f", params, i64t);
    let mut b = Builder::new(ctx, &mut function);
    let entry = b.add_block("entry");
    let then_block = b.add_block("then");
    let else_block = b.add_block("else");
    let join = b.add_block("join");
    b.set_insert_point(entry);
    let slot = b.alloca(i64t, "x.addr");
    b.branch(Value::Param(2), then_block, else_block);
    b.set_insert_point(then_block);
    b.store(slot, Value::Param(0));
    b.goto(join);
    b.set_insert_point(else_block);
    b.store(slot, Value::Param(1));
    b.goto(join);
    b.set_insert_point(join);
    let loaded = b.load(i64t, slot, "x");
    b.ret(Some(loaded));
    function
}

#[test]
fn mem2reg_promotes_diamond_to_phi() {
    let mut ctx = Context::new();
    let mut function = build_diamond_store(&mut ctx);
    assert!(mem2reg(&mut ctx, &mut function, &PassArgs::new()));
    verify_function(&function).unwrap();
    let text = print_function(&ctx, &function);
    assert!(!text.contains("load"), "loads must be gone:\n{text}");
    assert!(!text.contains("alloca"), "alloca must be gone:\n{text}");
    assert!(text.contains("phi"), "a phi joins the two stores:\n{text}");
}

#[test]
fn mem2reg_is_idempotent() {
    let mut ctx = Context::new();
    let mut function = build_diamond_store(&mut ctx);
    mem2reg(&mut ctx, &mut function, &PassArgs::new());
    let first = print_function(&ctx, &function);
    assert!(!mem2reg(&mut ctx, &mut function, &PassArgs::new()));
    assert_eq!(first, print_function(&ctx, &function));
}

#[test]
fn constfold_evaluates_arithmetic() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let mut function = Function::new("main", vec![], i64t);
    let mut b = Builder::new(&mut ctx, &mut function);
    let entry = b.add_block("entry");
    b.set_insert_point(entry);
    let mul = b.arithmetic(
        ArithmeticOp::Mul,
        i64t,
        Value::int(3, i64t),
        Value::int(4, i64t),
        "t0",
    );
    let sum = b.arithmetic(
        ArithmeticOp::Add,
        i64t,
        Value::int(2, i64t),
        mul,
        "t1",
    );
    b.ret(Some(sum));
    assert!(constfold(&mut ctx, &mut function, &PassArgs::new()));
    verify_function(&function).unwrap();
    let text = print_function(&ctx, &function);
    assert!(text.contains("return i64 14"), "{text}");
}

#[test]
fn constfold_signed_division_semantics() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let mut function = Function::new("main", vec![], i64t);
    let mut b = Builder::new(&mut ctx, &mut function);
    let entry = b.add_block("entry");
    b.set_insert_point(entry);
    let div = b.arithmetic(
        ArithmeticOp::SDiv,
        i64t,
        Value::int(-7, i64t),
        Value::int(2, i64t),
        "q",
    );
    b.ret(Some(div));
    constfold(&mut ctx, &mut function, &PassArgs::new());
    let text = print_function(&ctx, &function);
    assert!(text.contains("return i64 -3"), "{text}");
}

#[test]
fn dce_erases_unused_pure_instructions() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let mut function =
        Function::new("f", vec![i64_param(&mut ctx, "a")], i64t);
    let mut b = Builder::new(&mut ctx, &mut function);
    let entry = b.add_block("entry");
    b.set_insert_point(entry);
    let dead = b.arithmetic(
        ArithmeticOp::Add,
        i64t,
        Value::Param(0),
        Value::int(1, i64t),
        "dead",
    );
    b.arithmetic(ArithmeticOp::Mul, i64t, dead, dead, "dead2");
    b.ret(Some(Value::Param(0)));
    assert!(dce(&mut ctx, &mut function, &PassArgs::new()));
    assert_eq!(function.num_insts(), 1);
    verify_function(&function).unwrap();
}

#[test]
fn simplifycfg_folds_constant_branches() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let b1 = ctx.bool_type();
    let mut function = Function::new("f", vec![], i64t);
    let mut b = Builder::new(&mut ctx, &mut function);
    let entry = b.add_block("entry");
    let taken = b.add_block("taken");
    let dead = b.add_block("dead");
    b.set_insert_point(entry);
    b.branch(Value::IntConst { value: 1, ty: b1 }, taken, dead);
    b.set_insert_point(taken);
    b.ret(Some(Value::int(1, i64t)));
    b.set_insert_point(dead);
    b.ret(Some(Value::int(2, i64t)));
    assert!(simplifycfg(&mut ctx, &mut function, &PassArgs::new()));
    verify_function(&function).unwrap();
    // Everything folds into a single returning block.
    assert_eq!(function.num_blocks(), 1);
    let text = print_function(&ctx, &function);
    assert!(text.contains("return i64 1"), "{text}");
}

#[test]
fn gvn_hoists_computation_common_to_both_successors() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let params = vec![
        i64_param(&mut ctx, "a"),
        i64_param(&mut ctx, "b"),
        Parameter { ty: ctx.bool_type(), name: "c".into() },
    ];
    let mut function = Function::new("f", params, i64t);
    let mut b = Builder::new(&mut ctx, &mut function);
    let entry = b.add_block("entry");
    let left = b.add_block("left");
    let right = b.add_block("right");
    b.set_insert_point(entry);
    b.branch(Value::Param(2), left, right);
    b.set_insert_point(left);
    let t1 = b.arithmetic(
        ArithmeticOp::Add,
        i64t,
        Value::Param(0),
        Value::Param(1),
        "t",
    );
    b.ret(Some(t1));
    b.set_insert_point(right);
    let t2 = b.arithmetic(
        ArithmeticOp::Add,
        i64t,
        Value::Param(0),
        Value::Param(1),
        "t",
    );
    let double = b.arithmetic(ArithmeticOp::Mul, i64t, t2, Value::int(2, i64t), "d");
    b.ret(Some(double));
    assert!(gvn(&mut ctx, &mut function, &PassArgs::new()));
    verify_function(&function).unwrap();
    // The add appears exactly once, in the entry block.
    let adds: Vec<_> = function
        .inst_ids()
        .filter(|id| {
            matches!(
                function.inst(*id).kind,
                InstKind::Arithmetic(ArithmeticOp::Add)
            )
        })
        .collect();
    assert_eq!(adds.len(), 1);
    assert_eq!(function.inst(adds[0]).block(), Some(entry));
}

#[test]
fn gvn_is_idempotent_on_the_printout() {
    let mut ctx = Context::new();
    let mut function = build_diamond_store(&mut ctx);
    mem2reg(&mut ctx, &mut function, &PassArgs::new());
    gvn(&mut ctx, &mut function, &PassArgs::new());
    let first = print_function(&ctx, &function);
    gvn(&mut ctx, &mut function, &PassArgs::new());
    assert_eq!(first, print_function(&ctx, &function));
}

fn build_while_sum(ctx: &mut Context) -> Function {
    // s = 0; i = 0; while (i < n) { s += i; i += 1 } return s
    let i64t = ctx.int_type(64);
    let mut function = Function::new("sum", vec![i64_param(ctx, "n")], i64t);
    let mut b = Builder::new(ctx, &mut function);
    let entry = b.add_block("entry");
    let header = b.add_block("header");
    let body = b.add_block("body");
    let exit = b.add_block("exit");
    b.set_insert_point(entry);
    b.goto(header);
    b.set_insert_point(header);
    let i = b.phi(i64t, vec![(entry, Value::int(0, i64t))], "i");
    let s = b.phi(i64t, vec![(entry, Value::int(0, i64t))], "s");
    let cond = b.compare(
        CompareMode::Signed,
        CompareOp::Less,
        i,
        Value::Param(0),
        "cond",
    );
    b.branch(cond, body, exit);
    b.set_insert_point(body);
    let s_next = b.arithmetic(ArithmeticOp::Add, i64t, s, i, "s.next");
    let i_next =
        b.arithmetic(ArithmeticOp::Add, i64t, i, Value::int(1, i64t), "i.next");
    b.goto(header);
    b.function.add_phi_arg(i.as_inst().unwrap(), body, i_next);
    b.function.add_phi_arg(s.as_inst().unwrap(), body, s_next);
    b.set_insert_point(exit);
    b.ret(Some(s));
    function
}

#[test]
fn looprotate_moves_the_exit_test_to_the_latch() {
    let mut ctx = Context::new();
    let mut function = build_while_sum(&mut ctx);
    assert!(looprotate(&mut ctx, &mut function, &PassArgs::new()));
    verify_function(&function).unwrap();
    let forest = function.loop_forest();
    let id = forest.loop_ids().next().expect("loop survives rotation");
    let lp = forest.get(id);
    assert!(lp.is_proper_loop());
    // After rotation the loop exits from its latch, not its header.
    assert_ne!(lp.exiting_blocks, vec![lp.header]);
    drop(forest);
    // Rotation reached a fixpoint.
    assert!(!looprotate(&mut ctx, &mut function, &PassArgs::new()));
}

fn build_const_loop(ctx: &mut Context, bound: i64) -> Function {
    let i64t = ctx.int_type(64);
    let mut function = Function::new("sum", vec![], i64t);
    let mut b = Builder::new(ctx, &mut function);
    let entry = b.add_block("entry");
    let header = b.add_block("header");
    let body = b.add_block("body");
    let exit = b.add_block("exit");
    b.set_insert_point(entry);
    b.goto(header);
    b.set_insert_point(header);
    let i = b.phi(i64t, vec![(entry, Value::int(0, i64t))], "i");
    let cond = b.compare(
        CompareMode::Signed,
        CompareOp::Less,
        i,
        Value::int(bound, i64t),
        "cond",
    );
    b.branch(cond, body, exit);
    b.set_insert_point(body);
    let i_next =
        b.arithmetic(ArithmeticOp::Add, i64t, i, Value::int(1, i64t), "i.next");
    b.goto(header);
    b.function.add_phi_arg(i.as_inst().unwrap(), body, i_next);
    b.set_insert_point(exit);
    b.ret(Some(i));
    function
}

#[test]
fn loopunroll_peels_a_constant_loop() {
    let mut ctx = Context::new();
    let mut function = build_const_loop(&mut ctx, 5);
    assert!(loopunroll(&mut ctx, &mut function, &PassArgs::new()));
    verify_function(&function).unwrap();
    assert!(function.loop_forest().is_empty(), "no loop remains");
    // The returned value folded to the terminal induction value.
    let text = print_function(&ctx, &function);
    assert!(text.contains("return i64 5"), "{text}");
}

#[test]
fn loopunroll_refuses_long_trip_counts() {
    let mut ctx = Context::new();
    let mut function = build_const_loop(&mut ctx, 100);
    let before = print_function(&ctx, &function);
    assert!(!loopunroll(&mut ctx, &mut function, &PassArgs::new()));
    assert_eq!(before, print_function(&ctx, &function));
}

#[test]
fn inliner_absorbs_small_callees() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let mut module = Module::new();
    let mut callee =
        Function::new("addone", vec![i64_param(&mut ctx, "x")], i64t);
    {
        let mut b = Builder::new(&mut ctx, &mut callee);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let sum = b.arithmetic(
            ArithmeticOp::Add,
            i64t,
            Value::Param(0),
            Value::int(1, i64t),
            "sum",
        );
        b.ret(Some(sum));
    }
    let callee = module.add_function(callee);
    let mut main = Function::new("main", vec![], i64t);
    {
        let mut b = Builder::new(&mut ctx, &mut main);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let result = b.call(
            i64t,
            Value::Function(callee),
            vec![Value::int(41, i64t)],
            "r",
        );
        b.ret(Some(result));
    }
    let main = module.add_function(main);
    assert!(inline(&mut ctx, &mut module, &PassArgs::new()));
    let main_fn = module.function(main);
    verify_function(main_fn).unwrap();
    let has_call = main_fn
        .inst_ids()
        .any(|id| matches!(main_fn.inst(id).kind, InstKind::Call));
    assert!(!has_call, "the call must be gone");
    let text = print_function(&ctx, main_fn);
    assert!(text.contains("return i64 42"), "{text}");
}

#[test]
fn registry_resolves_passes_by_name() {
    let registry = PassRegistry::with_builtin_passes();
    for name in
        ["simplifycfg", "mem2reg", "constfold", "dce", "gvn", "inline",
         "looprotate", "loopunroll"]
    {
        assert!(registry.get(name).is_some(), "missing pass {name}");
    }
    assert!(registry.get("doesnotexist").is_none());
    let mut ctx = Context::new();
    let mut module = Module::new();
    assert!(registry
        .run_pipeline("bogus", &mut ctx, &mut module)
        .is_err());
}

#[test]
fn pipeline_composes_to_a_constant() {
    let mut ctx = Context::new();
    let mut module = Module::new();
    let function = build_const_loop(&mut ctx, 5);
    module.add_function(function);
    scatha_opt::optimize_full(&mut ctx, &mut module);
    for function in module.functions() {
        verify_function(function).unwrap();
    }
}

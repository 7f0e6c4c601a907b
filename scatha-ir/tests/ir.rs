//! Structural tests over the IR: use lists, CFG edges, dominance, loops and
//! the call graph.

use scatha_ir::{
    print_function, verify_function, ArithmeticOp, Builder, CompareMode,
    CompareOp, Context, Function, InstKind, Modification, Module, Parameter,
    SccCallGraph, TypeId, Value,
};

fn param(ctx: &mut Context, name: &str) -> Parameter {
    Parameter { ty: ctx.int_type(64), name: name.into() }
}

/// entry -> header -> (body -> header | exit)
fn build_count_loop(ctx: &mut Context) -> Function {
    let i64t = ctx.int_type(64);
    let params = vec![param(ctx, "n")];
    let mut function = Function::new("count", params, i64t);
    let mut b = Builder::new(ctx, &mut function);
    let entry = b.add_block("entry");
    let header = b.add_block("header");
    let body = b.add_block("body");
    let exit = b.add_block("exit");
    b.set_insert_point(entry);
    b.goto(header);
    b.set_insert_point(header);
    let phi = b.phi(i64t, vec![(entry, Value::int(0, i64t))], "i");
    let cond = b.compare(
        CompareMode::Signed,
        CompareOp::Less,
        phi,
        Value::Param(0),
        "cond",
    );
    b.branch(cond, body, exit);
    b.set_insert_point(body);
    let next = b.arithmetic(
        ArithmeticOp::Add,
        i64t,
        phi,
        Value::int(1, i64t),
        "i.next",
    );
    b.goto(header);
    let phi_id = phi.as_inst().unwrap();
    b.function.add_phi_arg(phi_id, body, next);
    b.set_insert_point(exit);
    b.ret(Some(phi));
    function
}

#[test]
fn builder_output_verifies() {
    let mut ctx = Context::new();
    let function = build_count_loop(&mut ctx);
    verify_function(&function).unwrap();
}

#[test]
fn use_lists_track_operands() {
    let mut ctx = Context::new();
    let function = build_count_loop(&mut ctx);
    // The phi is used by the compare, the add and the return.
    let phi = function
        .inst_ids()
        .find(|id| function.inst(*id).kind.is_phi())
        .unwrap();
    assert_eq!(function.inst(phi).users().len(), 3);
}

#[test]
fn replace_all_uses_rewires_users() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let mut function = Function::new("f", vec![param(&mut ctx, "a")], i64t);
    let mut b = Builder::new(&mut ctx, &mut function);
    let entry = b.add_block("entry");
    b.set_insert_point(entry);
    let x = b.arithmetic(
        ArithmeticOp::Add,
        i64t,
        Value::Param(0),
        Value::int(1, i64t),
        "x",
    );
    let y = b.arithmetic(ArithmeticOp::Mul, i64t, x, x, "y");
    b.ret(Some(y));
    let x_id = x.as_inst().unwrap();
    function.replace_all_uses(x_id, Value::int(5, i64t));
    assert!(function.inst(x_id).users().is_empty());
    let y_id = y.as_inst().unwrap();
    assert_eq!(
        function.inst(y_id).operands,
        vec![Value::int(5, i64t), Value::int(5, i64t)]
    );
    function.erase_inst(x_id);
    verify_function(&function).unwrap();
}

#[test]
fn dominance_of_a_diamond() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let b1 = ctx.bool_type();
    let mut function = Function::new("f", vec![], i64t);
    let mut b = Builder::new(&mut ctx, &mut function);
    let entry = b.add_block("entry");
    let then_block = b.add_block("then");
    let else_block = b.add_block("else");
    let join = b.add_block("join");
    b.set_insert_point(entry);
    b.branch(Value::IntConst { value: 1, ty: b1 }, then_block, else_block);
    b.set_insert_point(then_block);
    b.goto(join);
    b.set_insert_point(else_block);
    b.goto(join);
    b.set_insert_point(join);
    b.ret(Some(Value::int(0, i64t)));
    let dom = function.dominance();
    assert!(dom.dominates(entry, join));
    assert!(!dom.dominates(then_block, join));
    assert_eq!(dom.idom(join), Some(entry));
    assert_eq!(dom.frontier(then_block), &[join]);
    assert_eq!(dom.frontier(else_block), &[join]);
}

#[test]
fn loop_forest_finds_the_loop() {
    let mut ctx = Context::new();
    let mut function = build_count_loop(&mut ctx);
    let header = function
        .block_ids()
        .find(|b| function.block_name(*b) == "header")
        .unwrap();
    let body = function
        .block_ids()
        .find(|b| function.block_name(*b) == "body")
        .unwrap();
    let exit = function
        .block_ids()
        .find(|b| function.block_name(*b) == "exit")
        .unwrap();
    let forest = function.loop_forest();
    let id = forest.loop_with_header(header).unwrap();
    let lp = forest.get(id);
    assert!(lp.is_proper_loop());
    assert!(lp.contains(body));
    assert_eq!(lp.latches, vec![body]);
    assert_eq!(lp.exit_blocks, vec![exit]);
    assert_eq!(lp.induction_variables.len(), 1);
}

#[test]
fn split_edge_preserves_integrity() {
    let mut ctx = Context::new();
    let mut function = build_count_loop(&mut ctx);
    let header = function
        .block_ids()
        .find(|b| function.block_name(*b) == "header")
        .unwrap();
    let body = function
        .block_ids()
        .find(|b| function.block_name(*b) == "body")
        .unwrap();
    function.split_edge(body, header, "latch.split");
    verify_function(&function).unwrap();
}

#[test]
fn printer_is_deterministic() {
    let mut ctx = Context::new();
    let f1 = build_count_loop(&mut ctx);
    let text1 = print_function(&ctx, &f1);
    let text2 = print_function(&ctx, &f1);
    assert_eq!(text1, text2);
    assert!(text1.contains("func i64 @count"));
    assert!(text1.contains("phi"));
}

fn add_function_with_calls(
    ctx: &mut Context,
    module: &mut Module,
    name: &str,
    callees: &[scatha_ir::FuncRef],
) -> scatha_ir::FuncRef {
    let i64t = ctx.int_type(64);
    let mut function = Function::new(name, vec![], i64t);
    let mut b = Builder::new(ctx, &mut function);
    let entry = b.add_block("entry");
    b.set_insert_point(entry);
    let mut result = Value::int(0, i64t);
    for callee in callees {
        result = b.call(i64t, Value::Function(*callee), vec![], "r");
    }
    b.ret(Some(result));
    module.add_function(function)
}

/// Rewrite `f`'s body to a single call of `callee`.
fn wire_call(
    ctx: &mut Context,
    module: &mut Module,
    f: scatha_ir::FuncRef,
    callee: scatha_ir::FuncRef,
) {
    let i64t = ctx.int_type(64);
    let function = module.function_mut(f);
    let entry = function.entry();
    let ret = function.terminator(entry).unwrap();
    function.erase_inst(ret);
    let call =
        function.new_inst(InstKind::Call, i64t, vec![Value::Function(callee)], "r");
    function.append_inst(entry, call);
    let ret = function.new_inst(
        InstKind::Return,
        TypeId::VOID,
        vec![Value::Inst(call)],
        "",
    );
    function.append_inst(entry, ret);
}

#[test]
fn call_graph_groups_recursive_functions() {
    let mut ctx = Context::new();
    let mut module = Module::new();
    // i is a small leaf; f -> g -> h -> f form a cycle; g also calls i.
    let i = add_function_with_calls(&mut ctx, &mut module, "i", &[]);
    let f = add_function_with_calls(&mut ctx, &mut module, "f", &[]);
    let h = add_function_with_calls(&mut ctx, &mut module, "h", &[f]);
    let g = add_function_with_calls(&mut ctx, &mut module, "g", &[i, h]);
    wire_call(&mut ctx, &mut module, f, g);
    let graph = SccCallGraph::compute(&module);
    let scc_f = graph.scc_of(f);
    assert_eq!(scc_f, graph.scc_of(g));
    assert_eq!(scc_f, graph.scc_of(h));
    assert_ne!(scc_f, graph.scc_of(i));
    assert!(graph.is_leaf(i));
    assert_eq!(graph.functions_of(scc_f).len(), 3);
}

#[test]
fn removing_an_out_edge_does_not_split_the_scc() {
    let mut ctx = Context::new();
    let mut module = Module::new();
    let i = add_function_with_calls(&mut ctx, &mut module, "i", &[]);
    let f = add_function_with_calls(&mut ctx, &mut module, "f", &[]);
    let g = add_function_with_calls(&mut ctx, &mut module, "g", &[i, f]);
    let h = add_function_with_calls(&mut ctx, &mut module, "h", &[g]);
    // Close the cycle f -> h.
    wire_call(&mut ctx, &mut module, f, h);
    let mut graph = SccCallGraph::compute(&module);
    let scc = graph.scc_of(f);
    assert_eq!(graph.functions_of(scc).len(), 3);
    // Inlining i into g removes g -> i; the cycle {f, g, h} must survive.
    let site = graph.call_sites_of(g, i)[0];
    let result = graph.remove_call(g, i, site);
    assert_eq!(result, Modification::CallEdgeRemoved);
    assert_eq!(graph.scc_of(f), graph.scc_of(g));
    assert_eq!(graph.scc_of(g), graph.scc_of(h));
    // Removing g -> f breaks the cycle and splits the component.
    let site = graph.call_sites_of(g, f)[0];
    match graph.remove_call(g, f, site) {
        Modification::SplitScc(new) => assert!(new.len() >= 2),
        other => panic!("expected split, got {other:?}"),
    }
}

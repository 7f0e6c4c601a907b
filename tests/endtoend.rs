//! End-to-end scenarios: build a decorated tree, compile through every
//! layer and execute the image on the VM.

use scatha::{compile, CompiledProgram, OptLevel};
use scatha_ast::{
    Ast, BinaryOp, LoopKind, NodeId, NodeKind, Refness, SourceRange,
};
use scatha_vm::VirtualMachine;

fn sr() -> SourceRange {
    SourceRange::default()
}

#[derive(Default)]
struct TreeBuilder {
    ast: Ast,
}

impl TreeBuilder {
    fn int(&mut self, value: u64) -> NodeId {
        self.ast.add(NodeKind::IntLiteral { value }, sr())
    }

    fn ident(&mut self, name: &str) -> NodeId {
        self.ast.add(NodeKind::Identifier { name: name.into() }, sr())
    }

    fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.ast
            .add_with_children(NodeKind::BinaryExpr { op }, sr(), vec![lhs, rhs])
    }

    fn call(&mut self, callee: &str, args: Vec<NodeId>) -> NodeId {
        let callee = self.ident(callee);
        let mut children = vec![callee];
        children.extend(args);
        self.ast.add_with_children(NodeKind::CallExpr, sr(), children)
    }

    fn conditional(
        &mut self,
        cond: NodeId,
        then: NodeId,
        otherwise: NodeId,
    ) -> NodeId {
        self.ast.add_with_children(
            NodeKind::Conditional,
            sr(),
            vec![cond, then, otherwise],
        )
    }

    fn expr_stmt(&mut self, expr: NodeId) -> NodeId {
        self.ast
            .add_with_children(NodeKind::ExpressionStatement, sr(), vec![expr])
    }

    fn ret(&mut self, value: Option<NodeId>) -> NodeId {
        self.ast.add_with_children(
            NodeKind::ReturnStatement,
            sr(),
            value.into_iter().collect(),
        )
    }

    fn block(&mut self, stmts: Vec<NodeId>) -> NodeId {
        self.ast
            .add_with_children(NodeKind::CompoundStatement, sr(), stmts)
    }

    fn param(&mut self, name: &str, type_name: &str) -> NodeId {
        let ty = self.ident(type_name);
        self.ast.add_with_children(
            NodeKind::ParameterDeclaration {
                name: name.into(),
                this_ref: None,
            },
            sr(),
            vec![ty],
        )
    }

    fn ref_param(&mut self, name: &str, type_name: &str) -> NodeId {
        let base = self.ident(type_name);
        let ty = self.ast.add_with_children(
            NodeKind::UnaryExpr { op: scatha_ast::UnaryOp::AddressOf },
            sr(),
            vec![base],
        );
        self.ast.add_with_children(
            NodeKind::ParameterDeclaration {
                name: name.into(),
                this_ref: None,
            },
            sr(),
            vec![ty],
        )
    }

    fn this_param(&mut self) -> NodeId {
        self.ast.add(
            NodeKind::ParameterDeclaration {
                name: "this".into(),
                this_ref: Some(Refness::MutReference),
            },
            sr(),
        )
    }

    fn var_decl(
        &mut self,
        name: &str,
        type_name: Option<&str>,
        init: Option<NodeId>,
    ) -> NodeId {
        let mut children = Vec::new();
        let has_type_expr = type_name.is_some();
        if let Some(type_name) = type_name {
            let ty = self.ident(type_name);
            children.push(ty);
        }
        let has_initializer = init.is_some();
        children.extend(init);
        self.ast.add_with_children(
            NodeKind::VariableDeclaration {
                name: name.into(),
                mutable: true,
                has_type_expr,
                has_initializer,
            },
            sr(),
            children,
        )
    }

    fn function(
        &mut self,
        name: &str,
        params: Vec<NodeId>,
        return_type: Option<&str>,
        body: NodeId,
    ) -> NodeId {
        let mut children = params;
        let has_return_type = return_type.is_some();
        if let Some(ty) = return_type {
            let ty = self.ident(ty);
            children.push(ty);
        }
        children.push(body);
        self.ast.add_with_children(
            NodeKind::FunctionDefinition {
                name: name.into(),
                has_return_type,
                extern_library: None,
            },
            sr(),
            children,
        )
    }

    fn strukt(&mut self, name: &str, members: Vec<NodeId>) -> NodeId {
        self.ast.add_with_children(
            NodeKind::StructDefinition { name: name.into() },
            sr(),
            members,
        )
    }

    fn tu(&mut self, decls: Vec<NodeId>) -> NodeId {
        self.ast
            .add_with_children(NodeKind::TranslationUnit, sr(), decls)
    }
}

fn run_at(mut builder: TreeBuilder, root: NodeId, level: OptLevel) -> i64 {
    let CompiledProgram { bytes, issues } =
        compile(&mut builder.ast, root, level).expect("compiles");
    assert!(issues.is_empty(), "{issues:?}");
    let mut vm = VirtualMachine::new();
    vm.load_binary(&bytes).unwrap();
    vm.execute(&[]).unwrap()[0] as i64
}

/// Run a scenario at every optimization level and demand agreement.
fn run_all_levels(build: impl Fn() -> (TreeBuilder, NodeId)) -> i64 {
    let (builder, root) = build();
    let unopt = run_at(builder, root, OptLevel::None);
    let (builder, root) = build();
    let opt = run_at(builder, root, OptLevel::Default);
    assert_eq!(unopt, opt, "default pipeline changed the result");
    let (builder, root) = build();
    let full = run_at(builder, root, OptLevel::Full);
    assert_eq!(unopt, full, "loop pipeline changed the result");
    unopt
}

#[test]
fn hello_arithmetic() {
    // fn main() -> s64 { return 2 + 3 * 4; }
    let result = run_all_levels(|| {
        let mut b = TreeBuilder::default();
        let two = b.int(2);
        let three = b.int(3);
        let four = b.int(4);
        let mul = b.binary(BinaryOp::Mul, three, four);
        let sum = b.binary(BinaryOp::Add, two, mul);
        let ret = b.ret(Some(sum));
        let body = b.block(vec![ret]);
        let main = b.function("main", vec![], Some("s64"), body);
        let root = b.tu(vec![main]);
        (b, root)
    });
    assert_eq!(result, 14);
}

#[test]
fn short_circuit_avoids_the_division() {
    // fn f(x: s64) -> bool { return x != 0 && 10 / x > 1; }
    // fn main() -> s64 { return f(0) ? 1 : 0; }
    let result = run_all_levels(|| {
        let mut b = TreeBuilder::default();
        let x_param = b.param("x", "s64");
        let x1 = b.ident("x");
        let zero = b.int(0);
        let nonzero = b.binary(BinaryOp::NotEqual, x1, zero);
        let ten = b.int(10);
        let x2 = b.ident("x");
        let quotient = b.binary(BinaryOp::Div, ten, x2);
        let one = b.int(1);
        let greater = b.binary(BinaryOp::Greater, quotient, one);
        let and = b.binary(BinaryOp::LogicalAnd, nonzero, greater);
        let ret = b.ret(Some(and));
        let f_body = b.block(vec![ret]);
        let f = b.function("f", vec![x_param], Some("bool"), f_body);

        let zero_arg = b.int(0);
        let call = b.call("f", vec![zero_arg]);
        let one = b.int(1);
        let zero = b.int(0);
        let cond = b.conditional(call, one, zero);
        let ret = b.ret(Some(cond));
        let main_body = b.block(vec![ret]);
        let main = b.function("main", vec![], Some("s64"), main_body);
        let root = b.tu(vec![f, main]);
        (b, root)
    });
    // No division trap fires; the result is just 0.
    assert_eq!(result, 0);
}

#[test]
fn loop_sum() {
    // fn main() -> s64 { var s = 0; for i = 0; i < 5; i += 1 { s += i; }
    // return s; }
    let result = run_all_levels(|| {
        let mut b = TreeBuilder::default();
        let zero = b.int(0);
        let s_decl = b.var_decl("s", None, Some(zero));
        let i_init = b.int(0);
        let i_decl = b.var_decl("i", None, Some(i_init));
        let i1 = b.ident("i");
        let five = b.int(5);
        let cond = b.binary(BinaryOp::Less, i1, five);
        let i2 = b.ident("i");
        let one = b.int(1);
        let inc = b.binary(BinaryOp::AddAssign, i2, one);
        let s1 = b.ident("s");
        let i3 = b.ident("i");
        let acc = b.binary(BinaryOp::AddAssign, s1, i3);
        let acc_stmt = b.expr_stmt(acc);
        let loop_body = b.block(vec![acc_stmt]);
        let for_loop = b.ast.add_with_children(
            NodeKind::LoopStatement { kind: LoopKind::For },
            sr(),
            vec![i_decl, cond, inc, loop_body],
        );
        let s2 = b.ident("s");
        let ret = b.ret(Some(s2));
        let body = b.block(vec![s_decl, for_loop, ret]);
        let main = b.function("main", vec![], Some("s64"), body);
        let root = b.tu(vec![main]);
        (b, root)
    });
    assert_eq!(result, 10);
}

#[test]
fn struct_lifetime_counts_copies() {
    // var counter: s64 = 0;
    // struct S { var v: s64; fn new(&mut this, rhs: &S) { counter += 1; } }
    // fn g(x: S) {}
    // fn main() -> s64 { var s: S; g(s); g(s); return counter; }
    let result = run_all_levels(|| {
        let mut b = TreeBuilder::default();
        let zero = b.int(0);
        let counter = b.var_decl("counter", Some("s64"), Some(zero));

        let member = b.var_decl("v", Some("s64"), None);
        let this = b.this_param();
        let rhs = b.ref_param("rhs", "S");
        let c1 = b.ident("counter");
        let one = b.int(1);
        let bump = b.binary(BinaryOp::AddAssign, c1, one);
        let bump_stmt = b.expr_stmt(bump);
        let ctor_body = b.block(vec![bump_stmt]);
        let ctor = b.function("new", vec![this, rhs], None, ctor_body);
        let s_struct = b.strukt("S", vec![member, ctor]);

        let x_param = b.param("x", "S");
        let g_body = b.block(vec![]);
        let g = b.function("g", vec![x_param], None, g_body);

        let s_decl = b.var_decl("s", Some("S"), None);
        let s1 = b.ident("s");
        let call1 = b.call("g", vec![s1]);
        let call1 = b.expr_stmt(call1);
        let s2 = b.ident("s");
        let call2 = b.call("g", vec![s2]);
        let call2 = b.expr_stmt(call2);
        let c2 = b.ident("counter");
        let ret = b.ret(Some(c2));
        let main_body = b.block(vec![s_decl, call1, call2, ret]);
        let main = b.function("main", vec![], Some("s64"), main_body);
        let root = b.tu(vec![counter, s_struct, g, main]);
        (b, root)
    });
    // Exactly two copies are observed.
    assert_eq!(result, 2);
}

#[test]
fn nested_calls_and_conditionals() {
    // fn max(a: s64, b: s64) -> s64 { return a > b ? a : b; }
    // fn main() -> s64 { return max(max(3, 9), 5); }
    let result = run_all_levels(|| {
        let mut b = TreeBuilder::default();
        let a_param = b.param("a", "s64");
        let b_param = b.param("b", "s64");
        let a1 = b.ident("a");
        let b1 = b.ident("b");
        let gt = b.binary(BinaryOp::Greater, a1, b1);
        let a2 = b.ident("a");
        let b2 = b.ident("b");
        let pick = b.conditional(gt, a2, b2);
        let ret = b.ret(Some(pick));
        let max_body = b.block(vec![ret]);
        let max =
            b.function("max", vec![a_param, b_param], Some("s64"), max_body);

        let three = b.int(3);
        let nine = b.int(9);
        let inner = b.call("max", vec![three, nine]);
        let five = b.int(5);
        let outer = b.call("max", vec![inner, five]);
        let ret = b.ret(Some(outer));
        let main_body = b.block(vec![ret]);
        let main = b.function("main", vec![], Some("s64"), main_body);
        let root = b.tu(vec![max, main]);
        (b, root)
    });
    assert_eq!(result, 9);
}

#[test]
fn while_loop_with_break_and_continue() {
    // var i = 0; var s = 0;
    // while (true) { i += 1; if (i > 10) { break; }
    //                if (i % 2 == 1) { continue; } s += i; }
    // return s;  // 2 + 4 + 6 + 8 + 10 = 30
    let result = run_all_levels(|| {
        let mut b = TreeBuilder::default();
        let zero = b.int(0);
        let i_decl = b.var_decl("i", None, Some(zero));
        let zero = b.int(0);
        let s_decl = b.var_decl("s", None, Some(zero));
        let cond = b.ast.add(NodeKind::BoolLiteral { value: true }, sr());
        let i1 = b.ident("i");
        let one = b.int(1);
        let inc = b.binary(BinaryOp::AddAssign, i1, one);
        let inc = b.expr_stmt(inc);
        let i2 = b.ident("i");
        let ten = b.int(10);
        let past_end = b.binary(BinaryOp::Greater, i2, ten);
        let brk = b.ast.add(NodeKind::BreakStatement, sr());
        let brk_block = b.block(vec![brk]);
        let break_if = b.ast.add_with_children(
            NodeKind::IfStatement,
            sr(),
            vec![past_end, brk_block],
        );
        let i3 = b.ident("i");
        let two = b.int(2);
        let rem = b.binary(BinaryOp::Rem, i3, two);
        let one = b.int(1);
        let odd = b.binary(BinaryOp::Equal, rem, one);
        let cont = b.ast.add(NodeKind::ContinueStatement, sr());
        let cont_block = b.block(vec![cont]);
        let skip_if = b.ast.add_with_children(
            NodeKind::IfStatement,
            sr(),
            vec![odd, cont_block],
        );
        let s1 = b.ident("s");
        let i4 = b.ident("i");
        let acc = b.binary(BinaryOp::AddAssign, s1, i4);
        let acc = b.expr_stmt(acc);
        let loop_body = b.block(vec![inc, break_if, skip_if, acc]);
        let while_loop = b.ast.add_with_children(
            NodeKind::LoopStatement { kind: LoopKind::While },
            sr(),
            vec![cond, loop_body],
        );
        let s2 = b.ident("s");
        let ret = b.ret(Some(s2));
        let body = b.block(vec![i_decl, s_decl, while_loop, ret]);
        let main = b.function("main", vec![], Some("s64"), body);
        let root = b.tu(vec![main]);
        (b, root)
    });
    assert_eq!(result, 30);
}

#[test]
fn fixed_arrays_subscript_and_count() {
    // fn main() -> s64 { var a = [10, 20, 30]; return a[1] + a.count; }
    let result = run_all_levels(|| {
        let mut b = TreeBuilder::default();
        let e1 = b.int(10);
        let e2 = b.int(20);
        let e3 = b.int(30);
        let list = b.ast.add_with_children(
            NodeKind::ListExpr,
            sr(),
            vec![e1, e2, e3],
        );
        let a_decl = b.var_decl("a", None, Some(list));
        let a1 = b.ident("a");
        let one = b.int(1);
        let elem = b.ast.add_with_children(
            NodeKind::Subscript,
            sr(),
            vec![a1, one],
        );
        let a2 = b.ident("a");
        let count = b.ast.add_with_children(
            NodeKind::MemberAccess { member: "count".into() },
            sr(),
            vec![a2],
        );
        let sum = b.binary(BinaryOp::Add, elem, count);
        let ret = b.ret(Some(sum));
        let body = b.block(vec![a_decl, ret]);
        let main = b.function("main", vec![], Some("s64"), body);
        let root = b.tu(vec![main]);
        (b, root)
    });
    assert_eq!(result, 23);
}

#[test]
fn recursion_survives_the_inliner() {
    // fn fib(n: s64) -> s64 { return n < 2 ? n : fib(n-1) + fib(n-2); }
    let result = run_all_levels(|| {
        let mut b = TreeBuilder::default();
        let n_param = b.param("n", "s64");
        let n1 = b.ident("n");
        let two = b.int(2);
        let small = b.binary(BinaryOp::Less, n1, two);
        let n2 = b.ident("n");
        let n3 = b.ident("n");
        let one = b.int(1);
        let nm1 = b.binary(BinaryOp::Sub, n3, one);
        let f1 = b.call("fib", vec![nm1]);
        let n4 = b.ident("n");
        let two = b.int(2);
        let nm2 = b.binary(BinaryOp::Sub, n4, two);
        let f2 = b.call("fib", vec![nm2]);
        let sum = b.binary(BinaryOp::Add, f1, f2);
        let pick = b.conditional(small, n2, sum);
        let ret = b.ret(Some(pick));
        let fib_body = b.block(vec![ret]);
        let fib = b.function("fib", vec![n_param], Some("s64"), fib_body);

        let ten = b.int(10);
        let call = b.call("fib", vec![ten]);
        let ret = b.ret(Some(call));
        let main_body = b.block(vec![ret]);
        let main = b.function("main", vec![], Some("s64"), main_body);
        let root = b.tu(vec![fib, main]);
        (b, root)
    });
    assert_eq!(result, 55);
}

//! Lowering of analyzed trees into verified IR.

use scatha_ast::{
    Ast, BinaryOp, LoopKind, NodeId, NodeKind, SourceRange,
};
use scatha_ir::{verify_module, Context, InstKind, Value};
use scatha_sema::{analyze, IssueHandler, SymbolTable};

fn sr() -> SourceRange {
    SourceRange::default()
}

struct TreeBuilder {
    ast: Ast,
}

impl TreeBuilder {
    fn new() -> Self {
        Self { ast: Ast::new() }
    }

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

    fn tu(&mut self, decls: Vec<NodeId>) -> NodeId {
        self.ast
            .add_with_children(NodeKind::TranslationUnit, sr(), decls)
    }
}

fn lower(builder: TreeBuilder, root: NodeId) -> (Context, scatha_ir::Module) {
    let mut ast = builder.ast;
    let mut sym = SymbolTable::new();
    let mut issues = IssueHandler::new();
    let analysis = analyze(&mut ast, root, &mut sym, &mut issues);
    assert!(issues.is_empty(), "{:?}", issues.issues());
    let mut ctx = Context::new();
    let module = scatha_irgen::generate(&ast, root, &sym, &analysis, &mut ctx);
    verify_module(&module).unwrap();
    (ctx, module)
}

#[test]
fn lowers_arithmetic_main() {
    let mut b = TreeBuilder::new();
    let two = b.int(2);
    let three = b.int(3);
    let four = b.int(4);
    let mul = b.binary(BinaryOp::Mul, three, four);
    let sum = b.binary(BinaryOp::Add, two, mul);
    let ret = b.ret(Some(sum));
    let body = b.block(vec![ret]);
    let main = b.function("main", vec![], Some("s64"), body);
    let root = b.tu(vec![main]);
    let (ctx, module) = lower(b, root);
    let main = module.function_by_name("main").expect("main lowered");
    let text = scatha_ir::print_function(&ctx, module.function(main));
    assert!(text.contains("mul"), "{text}");
    assert!(text.contains("add"), "{text}");
    assert!(text.contains("return"), "{text}");
}

#[test]
fn lowers_for_loop_with_allocas_then_promotes() {
    // var s = 0; for i = 0; i < 5; i += 1 { s += i; } return s;
    let mut b = TreeBuilder::new();
    let zero = b.int(0);
    let s_decl = b.var_decl("s", None, Some(zero));
    let i_init = b.int(0);
    let i_decl = b.var_decl("i", None, Some(i_init));
    let i_ref = b.ident("i");
    let five = b.int(5);
    let cond = b.binary(BinaryOp::Less, i_ref, five);
    let i_ref2 = b.ident("i");
    let one = b.int(1);
    let inc = b.binary(BinaryOp::AddAssign, i_ref2, one);
    let s_ref = b.ident("s");
    let i_ref3 = b.ident("i");
    let acc = b.binary(BinaryOp::AddAssign, s_ref, i_ref3);
    let acc_stmt = b.expr_stmt(acc);
    let loop_body = b.block(vec![acc_stmt]);
    let for_loop = b.ast.add_with_children(
        NodeKind::LoopStatement { kind: LoopKind::For },
        sr(),
        vec![i_decl, cond, inc, loop_body],
    );
    let s_ret = b.ident("s");
    let ret = b.ret(Some(s_ret));
    let body = b.block(vec![s_decl, for_loop, ret]);
    let main = b.function("main", vec![], Some("s64"), body);
    let root = b.tu(vec![main]);
    let (mut ctx, mut module) = lower(b, root);
    let main = module.function_by_name("main").unwrap();
    // Locals lower as entry-block allocas.
    let function = module.function(main);
    let entry = function.entry();
    let allocas = function
        .block_insts(entry)
        .iter()
        .filter(|id| {
            matches!(function.inst(**id).kind, InstKind::Alloca { .. })
        })
        .count();
    assert_eq!(allocas, 2);
    assert!(function.num_blocks() >= 4, "header/body/inc/end blocks");
    // The canonical pipeline promotes them away.
    scatha_opt::optimize(&mut ctx, &mut module);
    verify_module(&module).unwrap();
    let function = module.function(main);
    let any_alloca = function.inst_ids().any(|id| {
        matches!(function.inst(id).kind, InstKind::Alloca { .. })
    });
    assert!(!any_alloca);
}

#[test]
fn nontrivial_locals_get_exactly_one_destructor_call() {
    // struct R { fn delete(&mut this) {} }
    // fn f() { var r: R; }
    let mut b = TreeBuilder::new();
    let this_param = b.ast.add(
        NodeKind::ParameterDeclaration {
            name: "this".into(),
            this_ref: Some(scatha_ast::Refness::MutReference),
        },
        sr(),
    );
    let dtor_body = b.block(vec![]);
    let dtor = b.function("delete", vec![this_param], None, dtor_body);
    let r_struct = b.ast.add_with_children(
        NodeKind::StructDefinition { name: "R".into() },
        sr(),
        vec![dtor],
    );
    let r_decl = b.var_decl("r", Some("R"), None);
    let f_body = b.block(vec![r_decl]);
    let f = b.function("f", vec![], None, f_body);
    let root = b.tu(vec![r_struct, f]);
    let (_ctx, module) = lower(b, root);
    let f = module.function_by_name("f").expect("f lowered");
    let function = module.function(f);
    let dtor_ref = module.function_by_name("R.delete").expect("dtor");
    let dtor_calls = function
        .inst_ids()
        .filter(|id| {
            matches!(function.inst(*id).kind, InstKind::Call)
                && function.inst(*id).operands.first()
                    == Some(&Value::Function(dtor_ref))
        })
        .count();
    assert_eq!(dtor_calls, 1, "lifetime balance");
}

#[test]
fn short_circuit_lowers_to_branches_and_phi() {
    // fn f(x: s64) -> bool { return x != 0 && 10 / x > 1; }
    let mut b = TreeBuilder::new();
    let x_ty = b.ident("s64");
    let x_param = b.ast.add_with_children(
        NodeKind::ParameterDeclaration { name: "x".into(), this_ref: None },
        sr(),
        vec![x_ty],
    );
    let x1 = b.ident("x");
    let zero = b.int(0);
    let lhs = b.binary(BinaryOp::NotEqual, x1, zero);
    let ten = b.int(10);
    let x2 = b.ident("x");
    let div = b.binary(BinaryOp::Div, ten, x2);
    let one = b.int(1);
    let rhs = b.binary(BinaryOp::Greater, div, one);
    let and = b.binary(BinaryOp::LogicalAnd, lhs, rhs);
    let ret = b.ret(Some(and));
    let body = b.block(vec![ret]);
    let f = b.function("f", vec![x_param], Some("bool"), body);
    let root = b.tu(vec![f]);
    let (ctx, module) = lower(b, root);
    let f = module.function_by_name("f").unwrap();
    let text = scatha_ir::print_function(&ctx, module.function(f));
    assert!(text.contains("branch"), "{text}");
    assert!(text.contains("phi"), "{text}");
    assert!(text.contains("sdiv"), "{text}");
}

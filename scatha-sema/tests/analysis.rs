//! End-to-end semantic analysis over hand-built trees.

use scatha_ast::{
    Ast, BinaryOp, ConstValue, NodeId, NodeKind, SourceRange,
};
use scatha_sema::{
    analyze, BadFuncDefKind, BadStmtKind, BadVarDeclKind, EntityKind,
    IssueHandler, IssueKind, SymbolTable,
};

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

    fn function(
        &mut self,
        name: &str,
        params: Vec<NodeId>,
        return_type: Option<NodeId>,
        body: NodeId,
    ) -> NodeId {
        let mut children = params;
        let has_return_type = return_type.is_some();
        children.extend(return_type);
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

    fn tu(&mut self, decls: Vec<NodeId>) -> NodeId {
        self.ast
            .add_with_children(NodeKind::TranslationUnit, sr(), decls)
    }
}

fn run(
    builder: TreeBuilder,
    root: NodeId,
) -> (Ast, SymbolTable, IssueHandler, scatha_sema::AnalysisResult) {
    let mut ast = builder.ast;
    let mut sym = SymbolTable::new();
    let mut issues = IssueHandler::new();
    let result = analyze(&mut ast, root, &mut sym, &mut issues);
    (ast, sym, issues, result)
}

#[test]
fn analyzes_constant_arithmetic_main() {
    let mut b = TreeBuilder::new();
    let two = b.int(2);
    let three = b.int(3);
    let four = b.int(4);
    let mul = b.binary(BinaryOp::Mul, three, four);
    let sum = b.binary(BinaryOp::Add, two, mul);
    let ret = b.ret(Some(sum));
    let body = b.block(vec![ret]);
    let ret_ty = b.ident("s64");
    let main = b.function("main", vec![], Some(ret_ty), body);
    let root = b.tu(vec![main]);
    let (ast, sym, issues, _) = run(b, root);
    assert!(issues.is_empty(), "{:?}", issues.issues());
    assert_eq!(ast.const_value(sum), Some(ConstValue::Int(14)));
    let main_entity = ast.declared_entity(main).unwrap();
    let entity = sym.entity(scatha_sema::EntityId(main_entity.0));
    assert_eq!(entity.name, "main");
    match &entity.kind {
        EntityKind::Function { signature, .. } => {
            assert_eq!(
                signature.return_type.map(|t| t.base),
                Some(sym.builtins().s64)
            );
        }
        other => panic!("expected a function, got {other:?}"),
    }
}

#[test]
fn deduces_return_type_from_first_return() {
    let mut b = TreeBuilder::new();
    let value = b.int(1);
    let ret = b.ret(Some(value));
    let body = b.block(vec![ret]);
    let f = b.function("f", vec![], None, body);
    let root = b.tu(vec![f]);
    let (ast, sym, issues, _) = run(b, root);
    assert!(issues.is_empty(), "{:?}", issues.issues());
    let entity = ast.declared_entity(f).unwrap();
    match &sym.entity(scatha_sema::EntityId(entity.0)).kind {
        EntityKind::Function { signature, .. } => {
            assert_eq!(
                signature.return_type.map(|t| t.base),
                Some(sym.builtins().s64)
            );
        }
        _ => unreachable!(),
    }
}

#[test]
fn conflicting_deduced_returns_are_reported() {
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let ret1 = b.ret(Some(one));
    let fval = b.ast.add(NodeKind::FloatLiteral { value: 1.5 }, sr());
    let ret2 = b.ret(Some(fval));
    let body = b.block(vec![ret1, ret2]);
    let f = b.function("f", vec![], None, body);
    let root = b.tu(vec![f]);
    let (_, _, issues, _) = run(b, root);
    assert!(issues
        .issues()
        .iter()
        .any(|i| matches!(i.kind, IssueKind::BadReturnTypeDeduction)));
}

#[test]
fn break_outside_loop_is_an_error() {
    let mut b = TreeBuilder::new();
    let brk = b.ast.add(NodeKind::BreakStatement, sr());
    let body = b.block(vec![brk]);
    let f = b.function("f", vec![], None, body);
    let root = b.tu(vec![f]);
    let (_, _, issues, _) = run(b, root);
    assert!(issues.issues().iter().any(|i| matches!(
        i.kind,
        IssueKind::BadStmt(BadStmtKind::InvalidScope)
    )));
}

#[test]
fn main_with_arguments_is_rejected() {
    let mut b = TreeBuilder::new();
    let param = b.param("x", "s64");
    let ret = b.ret(None);
    let body = b.block(vec![ret]);
    let main = b.function("main", vec![param], None, body);
    let root = b.tu(vec![main]);
    let (_, _, issues, _) = run(b, root);
    assert!(issues.issues().iter().any(|i| matches!(
        i.kind,
        IssueKind::BadFuncDef(BadFuncDefKind::MainInvalidArguments)
    )));
}

#[test]
fn var_decl_without_type_or_initializer_fails() {
    let mut b = TreeBuilder::new();
    let decl = b.var_decl("x", None, None);
    let body = b.block(vec![decl]);
    let f = b.function("f", vec![], None, body);
    let root = b.tu(vec![f]);
    let (_, _, issues, _) = run(b, root);
    assert!(issues.issues().iter().any(|i| matches!(
        i.kind,
        IssueKind::BadVarDecl(BadVarDeclKind::CantInferType)
    )));
}

#[test]
fn var_decl_deduces_type_from_initializer() {
    let mut b = TreeBuilder::new();
    let init = b.int(7);
    let decl = b.var_decl("x", None, Some(init));
    let use_x = b.ident("x");
    let ret = b.ret(Some(use_x));
    let body = b.block(vec![decl, ret]);
    let f = b.function("f", vec![], None, body);
    let root = b.tu(vec![f]);
    let (ast, sym, issues, _) = run(b, root);
    assert!(issues.is_empty(), "{:?}", issues.issues());
    let ty = ast.qual_type(use_x);
    assert_eq!(scatha_sema::EntityId(ty.base.0), sym.builtins().s64);
}

#[test]
fn calls_resolve_through_overload_sets() {
    let mut b = TreeBuilder::new();
    // fn g(x: s64) -> s64 { return x; }
    let param = b.param("x", "s64");
    let use_x = b.ident("x");
    let ret = b.ret(Some(use_x));
    let g_body = b.block(vec![ret]);
    let g = b.function("g", vec![param], None, g_body);
    // fn f() -> s64 { return g(41); }
    let callee = b.ident("g");
    let arg = b.int(41);
    let call = b
        .ast
        .add_with_children(NodeKind::CallExpr, sr(), vec![callee, arg]);
    let ret = b.ret(Some(call));
    let f_body = b.block(vec![ret]);
    let f = b.function("f", vec![], None, f_body);
    let root = b.tu(vec![g, f]);
    let (ast, sym, issues, _) = run(b, root);
    assert!(issues.is_empty(), "{:?}", issues.issues());
    let resolved = ast.entity(call).expect("call resolves to a function");
    let g_entity = ast.declared_entity(g).unwrap();
    assert_eq!(resolved.0, g_entity.0);
    assert!(sym.entity(scatha_sema::EntityId(resolved.0)).is_scope());
}

#[test]
fn struct_cycles_are_reported_in_order() {
    let mut b = TreeBuilder::new();
    // struct A { var b: B; } struct B { var a: A; }
    let a_member = b.var_decl("b", Some("B"), None);
    let a = b.ast.add_with_children(
        NodeKind::StructDefinition { name: "A".into() },
        sr(),
        vec![a_member],
    );
    let b_member = b.var_decl("a", Some("A"), None);
    let b_def = b.ast.add_with_children(
        NodeKind::StructDefinition { name: "B".into() },
        sr(),
        vec![b_member],
    );
    let root = b.tu(vec![a, b_def]);
    let (_, _, issues, _) = run(b, root);
    let cycle = issues.issues().iter().find_map(|i| match &i.kind {
        IssueKind::StructDefCycle(entities) => Some(entities.clone()),
        _ => None,
    });
    let cycle = cycle.expect("cycle reported");
    assert_eq!(cycle.len(), 2);
}

#[test]
fn struct_members_resolve_in_dependency_order() {
    let mut b = TreeBuilder::new();
    // struct Inner { var x: s64; } struct Outer { var inner: Inner; }
    let x = b.var_decl("x", Some("s64"), None);
    let inner = b.ast.add_with_children(
        NodeKind::StructDefinition { name: "Inner".into() },
        sr(),
        vec![x],
    );
    let member = b.var_decl("inner", Some("Inner"), None);
    let outer = b.ast.add_with_children(
        NodeKind::StructDefinition { name: "Outer".into() },
        sr(),
        vec![member],
    );
    // Declared outer first: ordering must still resolve Inner first.
    let root = b.tu(vec![outer, inner]);
    let (ast, sym, issues, result) = run(b, root);
    assert!(issues.is_empty(), "{:?}", issues.issues());
    let inner_entity =
        scatha_sema::EntityId(ast.declared_entity(inner).unwrap().0);
    let outer_entity =
        scatha_sema::EntityId(ast.declared_entity(outer).unwrap().0);
    let inner_pos = result
        .ordered_structs
        .iter()
        .position(|e| *e == inner_entity)
        .unwrap();
    let outer_pos = result
        .ordered_structs
        .iter()
        .position(|e| *e == outer_entity)
        .unwrap();
    assert!(inner_pos < outer_pos);
    assert_eq!(sym.size_of(outer_entity), Some(8));
    assert!(sym.has_trivial_lifetime(outer_entity));
}

//! Semantic analysis.
//!
//! Three phases run in order: `gather_names` declares every file-scope type
//! and function, `instantiate_entities` resolves struct bodies (respecting
//! member dependencies) and function signatures, and
//! `analyze_function_bodies` types and decorates every statement. Any phase
//! may poison an entity; later phases silently skip poisoned entities to
//! suppress cascading errors.

use std::collections::HashMap;

use scatha_ast::{
    Ast, AstQualType, BinaryOp, ConstValue, EntityCategory, EntityRef,
    ExprDecoration, LoopKind, NodeId, NodeKind, ObjectRef, UnaryOp,
    ValueCategory,
};

use crate::conversion::{
    compute_conversion, implicit_conversion, Conversion,
};
use crate::entity::{
    EntityId, EntityKind, FunctionAttributes, FunctionKind,
    FunctionSignature, LifetimeMetadata, QualType, Refness,
    SpecialLifetimeFunction, SpecialMemberFunction,
};
use crate::issue::{
    BadExprKind, BadFuncDefKind, BadReturnKind, BadSmfKind, BadStmtKind,
    BadVarDeclKind, Issue, IssueHandler, IssueKind, OrErrorKind,
};
use crate::lifetime::{synthesize_lifetime, UserLifetimeFunctions};
use crate::overload::{perform_overload_resolution, Argument, OrResult};
use crate::symbol_table::SymbolTable;

/// Output of the analysis consumed by the IR generator.
#[derive(Debug, Default)]
pub struct AnalysisResult {
    /// Struct types in dependency order.
    pub ordered_structs: Vec<EntityId>,
    /// Implicit conversions applied to expression nodes.
    pub conversions: HashMap<NodeId, AppliedConversion>,
    /// Constructor calls attached to variable declarations.
    pub var_constructors: HashMap<NodeId, EntityId>,
    /// Global variables in declaration order.
    pub globals: Vec<EntityId>,
}

/// A conversion applied on top of an expression node.
#[derive(Debug, Clone, Copy)]
pub struct AppliedConversion {
    pub conversion: Conversion,
    pub from: QualType,
    pub to: QualType,
}

/// Analyzed view of an expression.
#[derive(Debug, Clone, Copy)]
struct ExprInfo {
    ty: QualType,
    cat: ValueCategory,
    entity: Option<EntityId>,
    constv: Option<ConstValue>,
}

/// Run all three phases over a decorated tree.
pub fn analyze(
    ast: &mut Ast,
    root: NodeId,
    sym: &mut SymbolTable,
    issues: &mut IssueHandler,
) -> AnalysisResult {
    let mut analyzer = Analyzer {
        ast,
        sym,
        issues,
        result: AnalysisResult::default(),
        current_function: None,
        deduced_return: None,
        loop_depth: 0,
        foreign_count: 0,
    };
    analyzer.gather_names(root);
    analyzer.instantiate_entities(root);
    analyzer.analyze_function_bodies(root);
    tracing::debug!(
        structs = analyzer.result.ordered_structs.len(),
        issues = analyzer.issues.issues().len(),
        "analysis finished"
    );
    analyzer.result
}

struct Analyzer<'a> {
    ast: &'a mut Ast,
    sym: &'a mut SymbolTable,
    issues: &'a mut IssueHandler,
    result: AnalysisResult,
    current_function: Option<EntityId>,
    deduced_return: Option<QualType>,
    loop_depth: u32,
    foreign_count: u32,
}

impl Analyzer<'_> {
    fn error(&mut self, kind: IssueKind, node: NodeId, message: &str) {
        self.issues.push(Issue::error(
            kind,
            self.ast.source_range(node),
            message,
        ));
    }

    // # Phase 1: gather names

    fn gather_names(&mut self, root: NodeId) {
        for decl in self.ast.children(root).to_vec() {
            match self.ast.kind(decl).clone() {
                NodeKind::StructDefinition { name } => {
                    let declared = self.sym.declare(
                        &name,
                        EntityKind::StructType {
                            members: Vec::new(),
                            lifetime: LifetimeMetadata::default(),
                            complete: false,
                        },
                        Some(decl),
                    );
                    match declared {
                        Some(entity) => self
                            .ast
                            .set_declared_entity(decl, EntityRef(entity.0)),
                        None => {
                            self.error(
                                IssueKind::BadStmt(
                                    BadStmtKind::ReservedIdentifier,
                                ),
                                decl,
                                &format!("redefinition of {name}"),
                            );
                            self.sym.poison_name(&name);
                        }
                    }
                }
                NodeKind::FunctionDefinition { name, extern_library, .. } => {
                    self.declare_function_entity(
                        decl,
                        &name,
                        extern_library.as_deref(),
                    );
                }
                NodeKind::VariableDeclaration { .. } => {
                    // Globals are declared in phase 2 once types resolve.
                }
                _ => {}
            }
        }
    }

    fn declare_function_entity(
        &mut self,
        node: NodeId,
        name: &str,
        extern_library: Option<&str>,
    ) -> EntityId {
        let kind = match extern_library {
            Some(_) => FunctionKind::Foreign,
            None => FunctionKind::Native,
        };
        let foreign_index = extern_library.map(|_| {
            let index = self.foreign_count;
            self.foreign_count += 1;
            // Foreign functions live in their own table slot.
            (2, index)
        });
        let function = self.sym.declare_function(
            name,
            EntityKind::Function {
                signature: FunctionSignature {
                    argument_types: Vec::new(),
                    return_type: None,
                },
                kind,
                attributes: FunctionAttributes::empty(),
                smf: None,
                slf: None,
                foreign_index,
                binary_address: None,
                params: Vec::new(),
            },
            Some(node),
        );
        self.ast.set_declared_entity(node, EntityRef(function.0));
        function
    }

    // # Phase 2: instantiate entities

    fn instantiate_entities(&mut self, root: NodeId) {
        let struct_nodes: Vec<NodeId> = self
            .ast
            .children(root)
            .iter()
            .copied()
            .filter(|n| {
                matches!(self.ast.kind(*n), NodeKind::StructDefinition { .. })
            })
            .collect();
        let ordered = self.order_structs(&struct_nodes);
        for node in &ordered {
            self.instantiate_struct(*node);
        }
        // Function signatures, top level and members.
        for decl in self.ast.children(root).to_vec() {
            match self.ast.kind(decl) {
                NodeKind::FunctionDefinition { .. } => {
                    self.instantiate_function(decl, None);
                }
                NodeKind::VariableDeclaration { .. } => {
                    self.instantiate_global(decl);
                }
                _ => {}
            }
        }
        for node in &struct_nodes {
            let Some(entity) = self.declared(*node) else { continue };
            for member in self.ast.children(*node).to_vec() {
                if let NodeKind::FunctionDefinition { name, .. } =
                    self.ast.kind(member).clone()
                {
                    self.sym.push_scope(entity);
                    let function =
                        self.declare_function_entity(member, &name, None);
                    self.instantiate_function(member, Some(entity));
                    self.check_smf(member, function, entity);
                    self.sym.pop_scope();
                }
            }
            self.attach_lifetime(*node, entity);
        }
    }

    fn declared(&self, node: NodeId) -> Option<EntityId> {
        self.ast.declared_entity(node).map(|e| EntityId(e.0))
    }

    /// Topologically order struct definitions by member dependency; a cycle
    /// reports `StructDefCycle` listing every entity on it, in order.
    fn order_structs(&mut self, nodes: &[NodeId]) -> Vec<NodeId> {
        let mut deps: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let by_entity: HashMap<EntityId, NodeId> = nodes
            .iter()
            .filter_map(|n| self.declared(*n).map(|e| (e, *n)))
            .collect();
        for node in nodes {
            let mut node_deps = Vec::new();
            for member in self.ast.children(*node).to_vec() {
                let NodeKind::VariableDeclaration {
                    has_type_expr: true, ..
                } = self.ast.kind(member)
                else {
                    continue;
                };
                let type_expr = self.ast.child(member, 0);
                if let NodeKind::Identifier { name } =
                    self.ast.kind(type_expr)
                {
                    if let Some(dep) = self
                        .sym
                        .lookup(name)
                        .and_then(|e| by_entity.get(&e).copied())
                    {
                        node_deps.push(dep);
                    }
                }
            }
            deps.insert(*node, node_deps);
        }
        // Depth-first postorder; grey nodes on the stack form cycles.
        let mut ordered = Vec::new();
        let mut state: HashMap<NodeId, u8> = HashMap::new();
        let mut path: Vec<NodeId> = Vec::new();
        for node in nodes {
            self.visit_struct(*node, &deps, &mut state, &mut path, &mut ordered);
        }
        ordered
    }

    fn visit_struct(
        &mut self,
        node: NodeId,
        deps: &HashMap<NodeId, Vec<NodeId>>,
        state: &mut HashMap<NodeId, u8>,
        path: &mut Vec<NodeId>,
        ordered: &mut Vec<NodeId>,
    ) {
        match state.get(&node) {
            Some(2) => return,
            Some(1) => {
                // Cycle: everything from the first occurrence on the path.
                let start =
                    path.iter().position(|n| *n == node).unwrap_or(0);
                let cycle: Vec<EntityId> = path[start..]
                    .iter()
                    .filter_map(|n| self.declared(*n))
                    .collect();
                self.error(
                    IssueKind::StructDefCycle(cycle),
                    node,
                    "cyclic struct member dependency",
                );
                for n in &path[start..] {
                    if let Some(entity) = self.declared(*n) {
                        let name = self.sym.entity(entity).name.clone();
                        self.sym.poison_name(&name);
                    }
                }
                return;
            }
            _ => {}
        }
        state.insert(node, 1);
        path.push(node);
        for dep in deps.get(&node).cloned().unwrap_or_default() {
            self.visit_struct(dep, deps, state, path, ordered);
        }
        path.pop();
        state.insert(node, 2);
        ordered.push(node);
    }

    fn instantiate_struct(&mut self, node: NodeId) {
        let Some(entity) = self.declared(node) else { return };
        if self.sym.entity(entity).is_poison() {
            return;
        }
        let mut members = Vec::new();
        self.sym.push_scope(entity);
        for (index, member) in
            self.ast.children(node).to_vec().into_iter().enumerate()
        {
            let NodeKind::VariableDeclaration {
                name,
                mutable,
                has_type_expr,
                ..
            } = self.ast.kind(member).clone()
            else {
                continue;
            };
            if !has_type_expr {
                self.error(
                    IssueKind::BadVarDecl(BadVarDeclKind::CantInferType),
                    member,
                    "struct members need explicit types",
                );
                continue;
            }
            let type_expr = self.ast.child(member, 0);
            let Some(ty) = self.resolve_type_expr(type_expr) else {
                continue;
            };
            if ty.is_reference() {
                self.error(
                    IssueKind::BadVarDecl(BadVarDeclKind::RefInStruct),
                    member,
                    "references cannot be struct members",
                );
                continue;
            }
            if !self.sym.is_complete(ty.base) {
                self.error(
                    IssueKind::BadVarDecl(BadVarDeclKind::IncompleteType),
                    member,
                    "member type is incomplete",
                );
                continue;
            }
            let var = self.sym.declare(
                &name,
                EntityKind::Variable {
                    ty,
                    mutable,
                    index: index as u32,
                    is_parameter: false,
                },
                Some(member),
            );
            if let Some(var) = var {
                self.ast.set_declared_entity(member, EntityRef(var.0));
                members.push(var);
            }
        }
        self.sym.pop_scope();
        if let EntityKind::StructType { members: slot, complete, .. } =
            &mut self.sym.entity_mut(entity).kind
        {
            *slot = members;
            *complete = true;
        }
        self.result.ordered_structs.push(entity);
    }

    fn attach_lifetime(&mut self, node: NodeId, entity: EntityId) {
        if self.sym.entity(entity).is_poison() {
            return;
        }
        let mut user = UserLifetimeFunctions::default();
        for member in self.ast.children(node).to_vec() {
            let Some(function) = self.declared(member) else { continue };
            let EntityKind::Function { smf: Some(smf), .. } =
                self.sym.entity(function).kind
            else {
                continue;
            };
            match smf {
                SpecialMemberFunction::New => user.new.push(function),
                SpecialMemberFunction::Delete => {
                    user.delete = Some(function)
                }
                SpecialMemberFunction::Move => user.move_ = Some(function),
            }
        }
        synthesize_lifetime(self.sym, entity, &user);
        // Mark user lifetime functions with their shape.
        let lifetime = self.sym.struct_lifetime(entity).cloned();
        if let Some(lifetime) = lifetime {
            for (function, slf) in [
                (
                    lifetime.default_constructor,
                    SpecialLifetimeFunction::DefaultConstructor,
                ),
                (
                    lifetime.copy_constructor,
                    SpecialLifetimeFunction::CopyConstructor,
                ),
                (
                    lifetime.move_constructor,
                    SpecialLifetimeFunction::MoveConstructor,
                ),
                (lifetime.destructor, SpecialLifetimeFunction::Destructor),
            ] {
                let Some(function) = function else { continue };
                if let EntityKind::Function { slf: slot, .. } =
                    &mut self.sym.entity_mut(function).kind
                {
                    *slot = Some(slf);
                }
            }
        }
    }

    fn instantiate_function(
        &mut self,
        node: NodeId,
        parent_struct: Option<EntityId>,
    ) {
        let Some(function) = self.declared(node) else { return };
        let NodeKind::FunctionDefinition {
            name,
            has_return_type,
            extern_library,
        } = self.ast.kind(node).clone()
        else {
            return;
        };
        let children = self.ast.children(node).to_vec();
        let mut argument_types = Vec::new();
        let mut param_nodes = Vec::new();
        let mut cursor = 0;
        while cursor < children.len() {
            let NodeKind::ParameterDeclaration { this_ref, .. } =
                self.ast.kind(children[cursor]).clone()
            else {
                break;
            };
            let param = children[cursor];
            cursor += 1;
            let ty = match this_ref {
                Some(refness) => match parent_struct {
                    Some(struct_ty) => {
                        if cursor != 1 {
                            self.error(
                                IssueKind::BadVarDecl(
                                    BadVarDeclKind::ThisPosition,
                                ),
                                param,
                                "`this` must be the first parameter",
                            );
                        }
                        match refness {
                            scatha_ast::Refness::None => {
                                QualType::new(struct_ty)
                            }
                            scatha_ast::Refness::Reference => {
                                QualType::reference(struct_ty, false)
                            }
                            scatha_ast::Refness::MutReference => {
                                QualType::reference(struct_ty, true)
                            }
                        }
                    }
                    None => {
                        self.error(
                            IssueKind::BadVarDecl(
                                BadVarDeclKind::ThisInFreeFunction,
                            ),
                            param,
                            "`this` outside of a struct",
                        );
                        QualType::new(self.sym.poison())
                    }
                },
                None => {
                    let type_expr = self.ast.child(param, 0);
                    self.resolve_type_expr(type_expr)
                        .unwrap_or(QualType::new(self.sym.poison()))
                }
            };
            argument_types.push(ty);
            param_nodes.push(param);
        }
        let return_type = if has_return_type {
            let type_expr = children[cursor];
            cursor += 1;
            self.resolve_type_expr(type_expr)
        } else if extern_library.is_some() {
            Some(QualType::new(self.sym.builtins().void))
        } else {
            // Deduced from the first return statement.
            None
        };
        if extern_library.is_none() && cursor >= children.len() {
            self.error(
                IssueKind::BadFuncDef(BadFuncDefKind::FunctionMustHaveBody),
                node,
                "function must have a body",
            );
        }
        if name == "main" {
            if !argument_types.is_empty() {
                self.error(
                    IssueKind::BadFuncDef(
                        BadFuncDefKind::MainInvalidArguments,
                    ),
                    node,
                    "main takes no arguments",
                );
            }
            if let Some(ret) = return_type {
                if !self.sym.has_trivial_lifetime(ret.base) {
                    self.error(
                        IssueKind::BadFuncDef(
                            BadFuncDefKind::MainMustReturnTrivial,
                        ),
                        node,
                        "main must return a trivial type",
                    );
                }
            }
        }
        if let EntityKind::Function { signature, .. } =
            &mut self.sym.entity_mut(function).kind
        {
            signature.argument_types = argument_types;
            signature.return_type = return_type;
        }
    }

    fn check_smf(
        &mut self,
        node: NodeId,
        function: EntityId,
        struct_ty: EntityId,
    ) {
        let name = self.sym.entity(function).name.clone();
        let smf = match name.as_str() {
            "new" => SpecialMemberFunction::New,
            "delete" => SpecialMemberFunction::Delete,
            "move" => SpecialMemberFunction::Move,
            _ => return,
        };
        let EntityKind::Function { signature, .. } =
            &self.sym.entity(function).kind
        else {
            return;
        };
        let signature = signature.clone();
        if let NodeKind::FunctionDefinition { has_return_type: true, .. } =
            self.ast.kind(node)
        {
            self.error(
                IssueKind::BadSmf(BadSmfKind::HasReturnType),
                node,
                "lifetime functions have no return type",
            );
        }
        if signature.argument_types.is_empty() {
            self.error(
                IssueKind::BadSmf(BadSmfKind::NoParams),
                node,
                "lifetime functions take `this` first",
            );
        } else {
            let first = signature.argument_types[0];
            if first.base != struct_ty
                || first.refness != Refness::MutReference
            {
                self.error(
                    IssueKind::BadSmf(BadSmfKind::BadFirstParam),
                    node,
                    "the first parameter must be `&mut this`",
                );
            }
        }
        match smf {
            SpecialMemberFunction::Delete => {
                if signature.argument_types.len() != 1 {
                    self.error(
                        IssueKind::BadSmf(BadSmfKind::DeleteSignature),
                        node,
                        "destructors take only `this`",
                    );
                }
            }
            SpecialMemberFunction::Move => {
                if signature.argument_types.len() != 2 {
                    self.error(
                        IssueKind::BadSmf(BadSmfKind::MoveSignature),
                        node,
                        "move constructors take `this` and the source",
                    );
                }
            }
            SpecialMemberFunction::New => {}
        }
        if let EntityKind::Function { smf: slot, .. } =
            &mut self.sym.entity_mut(function).kind
        {
            *slot = Some(smf);
        }
    }

    fn instantiate_global(&mut self, node: NodeId) {
        let NodeKind::VariableDeclaration {
            name,
            mutable,
            has_type_expr,
            has_initializer,
        } = self.ast.kind(node).clone()
        else {
            return;
        };
        let ty = if has_type_expr {
            let type_expr = self.ast.child(node, 0);
            self.resolve_type_expr(type_expr)
        } else if has_initializer {
            let init = self.ast.child(node, 0);
            self.analyze_expr(init).map(|info| info.ty.stripped())
        } else {
            self.error(
                IssueKind::BadVarDecl(BadVarDeclKind::CantInferType),
                node,
                "global needs a type or an initializer",
            );
            None
        };
        let Some(mut ty) = ty else { return };
        ty.mutable = mutable;
        let index = self.result.globals.len() as u32;
        let var = self.sym.declare(
            &name,
            EntityKind::Variable {
                ty,
                mutable,
                index,
                is_parameter: false,
            },
            Some(node),
        );
        match var {
            Some(var) => {
                self.ast.set_declared_entity(node, EntityRef(var.0));
                self.result.globals.push(var);
                // Typed initializers of globals are converted like locals.
                if has_type_expr && has_initializer {
                    let init = self.ast.child(node, 1);
                    if let Some(info) = self.analyze_expr(init) {
                        self.convert_implicitly(init, info, ty.stripped());
                    }
                }
            }
            None => self.sym.poison_name(&name),
        }
    }

    /// Resolve a type expression to a qualified type.
    fn resolve_type_expr(&mut self, node: NodeId) -> Option<QualType> {
        match self.ast.kind(node).clone() {
            NodeKind::Identifier { name } => {
                let entity = self.sym.lookup(&name);
                match entity {
                    Some(entity)
                        if self.sym.entity(entity).is_type() =>
                    {
                        self.decorate_type_expr(node, entity);
                        Some(QualType::new(entity))
                    }
                    Some(entity)
                        if self.sym.entity(entity).is_poison() =>
                    {
                        None
                    }
                    _ => {
                        self.error(
                            IssueKind::BadExpr(BadExprKind::UndeclaredId),
                            node,
                            &format!("unknown type {name}"),
                        );
                        None
                    }
                }
            }
            // `[T]` is a dynamic array, `[T, n]` a fixed one.
            NodeKind::ListExpr => {
                let children = self.ast.children(node).to_vec();
                let elem = self.resolve_type_expr(*children.first()?)?;
                let count = match children.get(1) {
                    Some(count_expr) => {
                        match self.ast.kind(*count_expr) {
                            NodeKind::IntLiteral { value } => Some(*value),
                            _ => {
                                self.error(
                                    IssueKind::BadTypeDeduction,
                                    *count_expr,
                                    "array bounds must be literals",
                                );
                                return None;
                            }
                        }
                    }
                    None => None,
                };
                let array = self.sym.array_type(elem.base, count);
                self.decorate_type_expr(node, array);
                Some(QualType::new(array))
            }
            // `*T` spells a raw pointer, `&T` a reference.
            NodeKind::UnaryExpr { op: UnaryOp::Deref } => {
                let pointee = self.resolve_type_expr(self.ast.child(node, 0))?;
                let ptr = self.sym.ptr_type(pointee, false);
                self.decorate_type_expr(node, ptr);
                Some(QualType::new(ptr))
            }
            NodeKind::UnaryExpr { op: UnaryOp::AddressOf } => {
                let referent =
                    self.resolve_type_expr(self.ast.child(node, 0))?;
                Some(QualType::reference(referent.base, referent.mutable))
            }
            _ => {
                self.error(
                    IssueKind::BadTypeDeduction,
                    node,
                    "expected a type expression",
                );
                None
            }
        }
    }

    fn decorate_type_expr(&mut self, node: NodeId, entity: EntityId) {
        if self.ast.is_decorated(node) {
            return;
        }
        self.ast.decorate(node, ExprDecoration {
            entity: Some(EntityRef(entity.0)),
            ty: None,
            value_category: None,
            entity_category: Some(EntityCategory::Type),
            const_value: None,
        });
    }

    // # Phase 3: function bodies

    fn analyze_function_bodies(&mut self, root: NodeId) {
        for decl in self.ast.children(root).to_vec() {
            match self.ast.kind(decl).clone() {
                NodeKind::FunctionDefinition { .. } => {
                    self.analyze_function_body(decl, None);
                }
                NodeKind::StructDefinition { .. } => {
                    let Some(struct_ty) = self.declared(decl) else {
                        continue;
                    };
                    for member in self.ast.children(decl).to_vec() {
                        if matches!(
                            self.ast.kind(member),
                            NodeKind::FunctionDefinition { .. }
                        ) {
                            self.analyze_function_body(
                                member,
                                Some(struct_ty),
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn analyze_function_body(
        &mut self,
        node: NodeId,
        parent_struct: Option<EntityId>,
    ) {
        let Some(function) = self.declared(node) else { return };
        if self.sym.entity(function).is_poison() {
            return;
        }
        let children = self.ast.children(node).to_vec();
        let Some(body) = children.last().copied() else { return };
        if !matches!(self.ast.kind(body), NodeKind::CompoundStatement) {
            return;
        }
        let EntityKind::Function { signature, .. } =
            &self.sym.entity(function).kind
        else {
            return;
        };
        let signature = signature.clone();
        if let Some(struct_ty) = parent_struct {
            self.sym.push_scope(struct_ty);
        }
        self.sym.push_scope(function);
        // Declare parameters.
        let mut param_entities = Vec::new();
        for (index, ty) in signature.argument_types.iter().enumerate() {
            let param_node = children[index];
            let name = match self.ast.kind(param_node) {
                NodeKind::ParameterDeclaration {
                    this_ref: Some(_), ..
                } => "this".to_owned(),
                NodeKind::ParameterDeclaration { name, .. } => name.clone(),
                _ => continue,
            };
            let mutable =
                ty.refness == Refness::MutReference;
            if let Some(param) = self.sym.declare(
                &name,
                EntityKind::Variable {
                    ty: *ty,
                    mutable,
                    index: index as u32,
                    is_parameter: true,
                },
                Some(param_node),
            ) {
                self.ast
                    .set_declared_entity(param_node, EntityRef(param.0));
                param_entities.push(param);
            }
        }
        if let EntityKind::Function { params, .. } =
            &mut self.sym.entity_mut(function).kind
        {
            *params = param_entities;
        }
        self.current_function = Some(function);
        self.deduced_return = None;
        self.analyze_stmt(body);
        // Deduce the return type if no annotation fixed it.
        let deduced = self
            .deduced_return
            .unwrap_or(QualType::new(self.sym.builtins().void));
        if let EntityKind::Function { signature, .. } =
            &mut self.sym.entity_mut(function).kind
        {
            if signature.return_type.is_none() {
                signature.return_type = Some(deduced);
            }
        }
        self.current_function = None;
        self.sym.pop_scope();
        if parent_struct.is_some() {
            self.sym.pop_scope();
        }
    }

    fn analyze_stmt(&mut self, node: NodeId) {
        match self.ast.kind(node).clone() {
            NodeKind::CompoundStatement => {
                self.sym.push_anonymous_scope();
                for child in self.ast.children(node).to_vec() {
                    self.analyze_stmt(child);
                }
                self.sym.pop_scope();
            }
            NodeKind::VariableDeclaration { .. } => {
                self.analyze_var_decl(node);
            }
            NodeKind::ExpressionStatement => {
                let expr = self.ast.child(node, 0);
                if let Some(info) = self.analyze_expr(expr) {
                    // A non-trivial temporary dies with this statement.
                    if info.cat == ValueCategory::RValue
                        && !self.sym.has_trivial_lifetime(info.ty.base)
                    {
                        if let Some(entity) = info.entity {
                            self.ast.push_dtor(node, ObjectRef(entity.0));
                        }
                    }
                }
            }
            NodeKind::ReturnStatement => self.analyze_return(node),
            NodeKind::IfStatement => {
                let children = self.ast.children(node).to_vec();
                self.expect_bool(children[0]);
                self.analyze_stmt(children[1]);
                if let Some(else_stmt) = children.get(2) {
                    self.analyze_stmt(*else_stmt);
                }
            }
            NodeKind::LoopStatement { kind } => {
                let children = self.ast.children(node).to_vec();
                self.loop_depth += 1;
                match kind {
                    LoopKind::While | LoopKind::DoWhile => {
                        self.expect_bool(children[0]);
                        self.analyze_stmt(children[1]);
                    }
                    LoopKind::For => {
                        self.sym.push_anonymous_scope();
                        self.analyze_stmt(children[0]);
                        self.expect_bool(children[1]);
                        if let Some(info) = self.analyze_expr(children[2]) {
                            let _ = info;
                        }
                        self.analyze_stmt(children[3]);
                        self.sym.pop_scope();
                    }
                }
                self.loop_depth -= 1;
            }
            NodeKind::BreakStatement | NodeKind::ContinueStatement => {
                if self.loop_depth == 0 {
                    self.error(
                        IssueKind::BadStmt(BadStmtKind::InvalidScope),
                        node,
                        "not inside a loop",
                    );
                }
            }
            NodeKind::EmptyStatement => {}
            _ => {
                // Expressions in statement position.
                self.analyze_expr(node);
            }
        }
    }

    fn analyze_var_decl(&mut self, node: NodeId) {
        let NodeKind::VariableDeclaration {
            name,
            mutable,
            has_type_expr,
            has_initializer,
        } = self.ast.kind(node).clone()
        else {
            return;
        };
        let children = self.ast.children(node).to_vec();
        let annotated = if has_type_expr {
            self.resolve_type_expr(children[0])
        } else {
            None
        };
        let init = has_initializer
            .then(|| children[if has_type_expr { 1 } else { 0 }]);
        let init_info = init.and_then(|init| self.analyze_expr(init));
        let ty = match (annotated, init_info) {
            (Some(ty), _) => ty,
            (None, Some(info)) => info.ty.stripped(),
            (None, None) => {
                self.error(
                    IssueKind::BadVarDecl(BadVarDeclKind::CantInferType),
                    node,
                    "cannot infer the type without an initializer",
                );
                return;
            }
        };
        if ty.is_reference() && init.is_none() {
            self.error(
                IssueKind::BadVarDecl(BadVarDeclKind::ExpectedRefInit),
                node,
                "references must be initialized",
            );
            return;
        }
        if !ty.is_reference() && !self.sym.is_complete(ty.base) {
            self.error(
                IssueKind::BadVarDecl(BadVarDeclKind::IncompleteType),
                node,
                "variable of incomplete type",
            );
            return;
        }
        if let (Some(init), Some(info)) = (init, init_info) {
            let target = if ty.is_reference() { ty } else { ty.stripped() };
            self.convert_implicitly(init, info, target);
        }
        let mut var_ty = ty;
        var_ty.mutable = mutable || ty.is_reference() && ty.mutable;
        let var = self.sym.declare(
            &name,
            EntityKind::Variable {
                ty: var_ty,
                mutable,
                index: 0,
                is_parameter: false,
            },
            Some(node),
        );
        let Some(var) = var else {
            self.sym.poison_name(&name);
            return;
        };
        self.ast.set_declared_entity(node, EntityRef(var.0));
        // Lifetime bookkeeping: without an initializer a default
        // constructor call is attached; either way a non-trivial local is
        // pushed onto the enclosing scope's destructor stack.
        if !ty.is_reference() && !self.sym.has_trivial_lifetime(ty.base) {
            if init.is_none() {
                match self
                    .sym
                    .struct_lifetime(ty.base)
                    .and_then(|l| l.default_constructor)
                {
                    Some(ctor) => {
                        self.result.var_constructors.insert(node, ctor);
                    }
                    None => self.error(
                        IssueKind::BadVarDecl(
                            BadVarDeclKind::IncompleteType,
                        ),
                        node,
                        "type is not default constructible",
                    ),
                }
            }
            let scope_stmt = self
                .ast
                .find_ancestor(node, |kind| {
                    matches!(kind, NodeKind::CompoundStatement)
                })
                .unwrap_or(node);
            self.ast.push_dtor(scope_stmt, ObjectRef(var.0));
        }
    }

    fn analyze_return(&mut self, node: NodeId) {
        let children = self.ast.children(node).to_vec();
        let function = self.current_function.expect("return outside function");
        let return_type = match &self.sym.entity(function).kind {
            EntityKind::Function { signature, .. } => signature.return_type,
            _ => None,
        };
        let void = self.sym.builtins().void;
        match (children.first().copied(), return_type) {
            (Some(expr), Some(expected)) => {
                if expected.base == void {
                    self.error(
                        IssueKind::BadReturn(
                            BadReturnKind::VoidMustNotReturnValue,
                        ),
                        node,
                        "void function returns a value",
                    );
                    return;
                }
                if let Some(info) = self.analyze_expr(expr) {
                    self.convert_implicitly(expr, info, expected);
                }
            }
            (Some(expr), None) => {
                // Return type deduction: the first return fixes the type.
                let Some(info) = self.analyze_expr(expr) else { return };
                let ty = info.ty.stripped();
                match self.deduced_return {
                    None => self.deduced_return = Some(ty),
                    Some(previous) if previous == ty => {}
                    Some(_) => self.error(
                        IssueKind::BadReturnTypeDeduction,
                        node,
                        "conflicting deduced return types",
                    ),
                }
            }
            (None, Some(expected)) => {
                if expected.base != void {
                    self.error(
                        IssueKind::BadReturn(
                            BadReturnKind::NonVoidMustReturnValue,
                        ),
                        node,
                        "non-void function must return a value",
                    );
                }
            }
            (None, None) => {
                let void_ty = QualType::new(void);
                match self.deduced_return {
                    None => self.deduced_return = Some(void_ty),
                    Some(previous) if previous == void_ty => {}
                    Some(_) => self.error(
                        IssueKind::BadReturnTypeDeduction,
                        node,
                        "conflicting deduced return types",
                    ),
                }
            }
        }
    }

    // # Expressions

    fn expect_bool(&mut self, node: NodeId) {
        let bool_ty = QualType::new(self.sym.builtins().bool_);
        if let Some(info) = self.analyze_expr(node) {
            self.convert_implicitly(node, info, bool_ty);
        }
    }

    /// Record the conversion from `info` to `target`, reporting an error if
    /// none is implicit.
    fn convert_implicitly(
        &mut self,
        node: NodeId,
        info: ExprInfo,
        target: QualType,
    ) -> bool {
        if info.ty == target {
            return true;
        }
        match implicit_conversion(self.sym, info.ty, target) {
            Some(conversion) => {
                if !conversion.is_identity() {
                    self.result.conversions.insert(node, AppliedConversion {
                        conversion,
                        from: info.ty,
                        to: target,
                    });
                }
                true
            }
            None => {
                self.error(
                    IssueKind::BadExpr(BadExprKind::NoConversion),
                    node,
                    "no implicit conversion",
                );
                false
            }
        }
    }

    fn decorate_value(
        &mut self,
        node: NodeId,
        info: ExprInfo,
    ) -> Option<ExprInfo> {
        self.ast.decorate(node, ExprDecoration {
            entity: info.entity.map(|e| EntityRef(e.0)),
            ty: Some(AstQualType {
                base: EntityRef(info.ty.base.0),
                mutable: info.ty.mutable,
                refness: match info.ty.refness {
                    Refness::None => scatha_ast::Refness::None,
                    Refness::Reference => scatha_ast::Refness::Reference,
                    Refness::MutReference => {
                        scatha_ast::Refness::MutReference
                    }
                },
            }),
            value_category: Some(info.cat),
            entity_category: Some(EntityCategory::Value),
            const_value: info.constv,
        });
        Some(info)
    }

    fn analyze_expr(&mut self, node: NodeId) -> Option<ExprInfo> {
        let info = self.analyze_expr_impl(node)?;
        self.decorate_value(node, info)
    }

    fn analyze_expr_impl(&mut self, node: NodeId) -> Option<ExprInfo> {
        let b = *self.sym.builtins();
        match self.ast.kind(node).clone() {
            NodeKind::IntLiteral { value } => Some(ExprInfo {
                ty: QualType::new(b.s64),
                cat: ValueCategory::RValue,
                entity: None,
                constv: Some(ConstValue::Int(value as i64)),
            }),
            NodeKind::BoolLiteral { value } => Some(ExprInfo {
                ty: QualType::new(b.bool_),
                cat: ValueCategory::RValue,
                entity: None,
                constv: Some(ConstValue::Bool(value)),
            }),
            NodeKind::FloatLiteral { value } => Some(ExprInfo {
                ty: QualType::new(b.f64),
                cat: ValueCategory::RValue,
                entity: None,
                constv: Some(ConstValue::Float(value)),
            }),
            NodeKind::StringLiteral { value } => {
                let byte_array =
                    self.sym.array_type(b.byte, Some(value.len() as u64));
                Some(ExprInfo {
                    ty: QualType::new(byte_array),
                    cat: ValueCategory::LValue,
                    entity: None,
                    constv: None,
                })
            }
            NodeKind::Identifier { name } => self.analyze_identifier(node, &name),
            NodeKind::BinaryExpr { op } => self.analyze_binary(node, op),
            NodeKind::UnaryExpr { op } => self.analyze_unary(node, op),
            NodeKind::CallExpr => self.analyze_call(node),
            NodeKind::MemberAccess { member } => {
                self.analyze_member_access(node, &member)
            }
            NodeKind::Subscript => self.analyze_subscript(node),
            NodeKind::Conditional => self.analyze_conditional(node),
            NodeKind::ListExpr => self.analyze_list(node),
            _ => None,
        }
    }

    fn analyze_identifier(
        &mut self,
        node: NodeId,
        name: &str,
    ) -> Option<ExprInfo> {
        let Some(entity) = self.sym.lookup(name) else {
            self.error(
                IssueKind::BadExpr(BadExprKind::UndeclaredId),
                node,
                &format!("use of undeclared identifier {name}"),
            );
            return None;
        };
        if self.sym.entity(entity).is_poison() {
            // Suppress cascading errors against poisoned names.
            return None;
        }
        match &self.sym.entity(entity).kind {
            EntityKind::Variable { ty, mutable, .. } => Some(ExprInfo {
                ty: QualType {
                    base: ty.base,
                    mutable: *mutable || ty.mutable,
                    refness: ty.refness,
                },
                cat: ValueCategory::LValue,
                entity: Some(entity),
                constv: None,
            }),
            EntityKind::OverloadSet { .. } | EntityKind::Function { .. } => {
                // Typed only at the call site.
                Some(ExprInfo {
                    ty: QualType::new(self.sym.builtins().void),
                    cat: ValueCategory::RValue,
                    entity: Some(entity),
                    constv: None,
                })
            }
            _ if self.sym.entity(entity).is_type() => {
                self.decorate_type_expr(node, entity);
                // Flagged as a type; callers handle construction.
                None
            }
            _ => {
                self.error(
                    IssueKind::BadExpr(BadExprKind::NotAValue),
                    node,
                    &format!("{name} is not a value"),
                );
                None
            }
        }
    }

    fn analyze_binary(
        &mut self,
        node: NodeId,
        op: BinaryOp,
    ) -> Option<ExprInfo> {
        let b = *self.sym.builtins();
        let lhs = self.ast.child(node, 0);
        let rhs = self.ast.child(node, 1);
        if op.is_assignment() {
            let lhs_info = self.analyze_expr(lhs)?;
            let rhs_info = self.analyze_expr(rhs)?;
            if lhs_info.cat != ValueCategory::LValue {
                self.error(
                    IssueKind::BadExpr(BadExprKind::AssignToRValue),
                    node,
                    "cannot assign to a temporary",
                );
                return None;
            }
            if !lhs_info.ty.mutable {
                self.error(
                    IssueKind::BadExpr(BadExprKind::AssignToConst),
                    node,
                    "cannot assign to an immutable value",
                );
                return None;
            }
            self.convert_implicitly(rhs, rhs_info, lhs_info.ty.stripped());
            return Some(ExprInfo {
                ty: QualType::new(b.void),
                cat: ValueCategory::RValue,
                entity: None,
                constv: None,
            });
        }
        if op.is_logical() {
            self.expect_bool(lhs);
            self.expect_bool(rhs);
            let lv = self.ast.const_value(lhs);
            let rv = self.ast.const_value(rhs);
            let constv = match (op, lv, rv) {
                (
                    BinaryOp::LogicalAnd,
                    Some(ConstValue::Bool(a)),
                    Some(ConstValue::Bool(bb)),
                ) => Some(ConstValue::Bool(a && bb)),
                (
                    BinaryOp::LogicalOr,
                    Some(ConstValue::Bool(a)),
                    Some(ConstValue::Bool(bb)),
                ) => Some(ConstValue::Bool(a || bb)),
                _ => None,
            };
            return Some(ExprInfo {
                ty: QualType::new(b.bool_),
                cat: ValueCategory::RValue,
                entity: None,
                constv,
            });
        }
        let lhs_info = self.analyze_expr(lhs)?;
        let rhs_info = self.analyze_expr(rhs)?;
        if op == BinaryOp::Comma {
            return Some(rhs_info);
        }
        let common = self.common_type(lhs_info.ty, rhs_info.ty);
        let Some(common) = common else {
            self.error(
                IssueKind::BadExpr(BadExprKind::BinaryExprNoCommonType),
                node,
                "operands have no common type",
            );
            return None;
        };
        self.convert_implicitly(lhs, lhs_info, common);
        self.convert_implicitly(rhs, rhs_info, common);
        let constv =
            fold_binary(op, lhs_info.constv, rhs_info.constv);
        if op.is_comparison() {
            return Some(ExprInfo {
                ty: QualType::new(b.bool_),
                cat: ValueCategory::RValue,
                entity: None,
                constv,
            });
        }
        Some(ExprInfo {
            ty: common,
            cat: ValueCategory::RValue,
            entity: None,
            constv,
        })
    }

    fn analyze_unary(
        &mut self,
        node: NodeId,
        op: UnaryOp,
    ) -> Option<ExprInfo> {
        let b = *self.sym.builtins();
        let operand = self.ast.child(node, 0);
        let info = self.analyze_expr(operand)?;
        match op {
            UnaryOp::Promote | UnaryOp::Negate => {
                if !self.sym.is_integral(info.ty.base)
                    && !self.sym.is_float(info.ty.base)
                {
                    self.error(
                        IssueKind::BadExpr(BadExprKind::UnaryExprBadType),
                        node,
                        "operand is not arithmetic",
                    );
                    return None;
                }
                let constv = match (op, info.constv) {
                    (UnaryOp::Negate, Some(ConstValue::Int(v))) => {
                        Some(ConstValue::Int(v.wrapping_neg()))
                    }
                    (UnaryOp::Negate, Some(ConstValue::Float(v))) => {
                        Some(ConstValue::Float(-v))
                    }
                    (UnaryOp::Promote, c) => c,
                    _ => None,
                };
                Some(ExprInfo {
                    ty: info.ty.stripped(),
                    cat: ValueCategory::RValue,
                    entity: None,
                    constv,
                })
            }
            UnaryOp::BitNot => {
                if !self.sym.is_integral(info.ty.base) {
                    self.error(
                        IssueKind::BadExpr(BadExprKind::UnaryExprBadType),
                        node,
                        "operand is not integral",
                    );
                    return None;
                }
                let constv = match info.constv {
                    Some(ConstValue::Int(v)) => Some(ConstValue::Int(!v)),
                    _ => None,
                };
                Some(ExprInfo {
                    ty: info.ty.stripped(),
                    cat: ValueCategory::RValue,
                    entity: None,
                    constv,
                })
            }
            UnaryOp::LogicalNot => {
                if info.ty.base != b.bool_ {
                    self.error(
                        IssueKind::BadExpr(BadExprKind::UnaryExprBadType),
                        node,
                        "operand is not boolean",
                    );
                    return None;
                }
                let constv = match info.constv {
                    Some(ConstValue::Bool(v)) => Some(ConstValue::Bool(!v)),
                    _ => None,
                };
                Some(ExprInfo {
                    ty: QualType::new(b.bool_),
                    cat: ValueCategory::RValue,
                    entity: None,
                    constv,
                })
            }
            UnaryOp::AddressOf => {
                if info.cat != ValueCategory::LValue {
                    self.error(
                        IssueKind::BadExpr(BadExprKind::UnaryExprBadType),
                        node,
                        "cannot take the address of a temporary",
                    );
                    return None;
                }
                let ptr =
                    self.sym.ptr_type(info.ty.stripped(), false);
                Some(ExprInfo {
                    ty: QualType::new(ptr),
                    cat: ValueCategory::RValue,
                    entity: None,
                    constv: None,
                })
            }
            UnaryOp::Deref => match self.sym.entity(info.ty.base).kind {
                EntityKind::RawPtrType { pointee }
                | EntityKind::UniquePtrType { pointee } => Some(ExprInfo {
                    ty: pointee,
                    cat: ValueCategory::LValue,
                    entity: None,
                    constv: None,
                }),
                _ => {
                    self.error(
                        IssueKind::BadExpr(BadExprKind::DerefNoPtr),
                        node,
                        "dereference of a non-pointer",
                    );
                    None
                }
            },
        }
    }

    fn analyze_call(&mut self, node: NodeId) -> Option<ExprInfo> {
        let children = self.ast.children(node).to_vec();
        let callee = children[0];
        let args = &children[1..];
        let mut arg_infos = Vec::new();
        for arg in args {
            arg_infos.push(self.analyze_expr(*arg)?);
        }
        // Calling a type name constructs a value of that type.
        if let NodeKind::Identifier { name } = self.ast.kind(callee).clone() {
            if let Some(entity) = self.sym.lookup(&name) {
                if self.sym.entity(entity).is_type() {
                    return self.analyze_construction(
                        node, callee, entity, args, &arg_infos,
                    );
                }
            }
        }
        let callee_info = self.analyze_expr(callee)?;
        let Some(target) = callee_info.entity else {
            self.error(
                IssueKind::BadExpr(BadExprKind::ObjectNotCallable),
                node,
                "expression is not callable",
            );
            return None;
        };
        if !matches!(
            self.sym.entity(target).kind,
            EntityKind::OverloadSet { .. } | EntityKind::Function { .. }
        ) {
            self.error(
                IssueKind::BadExpr(BadExprKind::ObjectNotCallable),
                node,
                "expression is not callable",
            );
            return None;
        }
        // Method calls pass the object as a leading `this` argument.
        let this_arg = match self.ast.kind(callee) {
            NodeKind::MemberAccess { .. } => {
                let object = self.ast.child(callee, 0);
                let object_ty = self.ast.qual_type(object);
                Some(Argument {
                    ty: QualType::reference(
                        EntityId(object_ty.base.0),
                        object_ty.mutable,
                    ),
                })
            }
            _ => None,
        };
        let implicit_args = this_arg.iter().count();
        let arguments: Vec<Argument> = this_arg
            .into_iter()
            .chain(arg_infos.iter().map(|info| Argument { ty: info.ty }))
            .collect();
        let function = match perform_overload_resolution(
            self.sym, target, &arguments,
        ) {
            OrResult::Success { function, conversions } => {
                let explicit = conversions.into_iter().skip(implicit_args);
                for (index, ((arg, info), conversion)) in
                    args.iter().zip(&arg_infos).zip(explicit).enumerate()
                {
                    if conversion.is_identity() {
                        continue;
                    }
                    let EntityKind::Function { signature, .. } =
                        &self.sym.entity(function).kind
                    else {
                        continue;
                    };
                    let to =
                        signature.argument_types[index + implicit_args];
                    self.result.conversions.insert(*arg, AppliedConversion {
                        conversion,
                        from: info.ty,
                        to,
                    });
                }
                function
            }
            OrResult::NoMatch { reasons } => {
                self.error(
                    IssueKind::OrError(OrErrorKind::NoMatch { reasons }),
                    node,
                    "no matching function for call",
                );
                return None;
            }
            OrResult::Ambiguous { finalists } => {
                self.error(
                    IssueKind::OrError(OrErrorKind::Ambiguous { finalists }),
                    node,
                    "ambiguous call",
                );
                return None;
            }
        };
        let EntityKind::Function { signature, .. } =
            &self.sym.entity(function).kind
        else {
            return None;
        };
        let return_type = match signature.return_type {
            Some(ty) => ty,
            None => {
                self.error(
                    IssueKind::BadExpr(BadExprKind::CantDeduceReturnType),
                    node,
                    "return type is not deduced yet",
                );
                return None;
            }
        };
        Some(ExprInfo {
            ty: return_type,
            cat: if return_type.is_reference() {
                ValueCategory::LValue
            } else {
                ValueCategory::RValue
            },
            entity: Some(function),
            constv: None,
        })
    }

    fn analyze_construction(
        &mut self,
        node: NodeId,
        callee: NodeId,
        ty: EntityId,
        args: &[NodeId],
        arg_infos: &[ExprInfo],
    ) -> Option<ExprInfo> {
        self.decorate_type_expr(callee, ty);
        // Trivial construction: single-argument conversion or zero value.
        if self.sym.has_trivial_lifetime(ty) {
            if let (Some(arg), Some(info)) =
                (args.first(), arg_infos.first())
            {
                let target = QualType::new(ty);
                let conversion =
                    compute_conversion(self.sym, info.ty, target);
                match conversion {
                    Some(conversion) if !conversion.is_identity() => {
                        self.result.conversions.insert(
                            *arg,
                            AppliedConversion {
                                conversion,
                                from: info.ty,
                                to: target,
                            },
                        );
                    }
                    None => {
                        self.error(
                            IssueKind::BadExpr(BadExprKind::NoConversion),
                            node,
                            "no conversion to the constructed type",
                        );
                        return None;
                    }
                    _ => {}
                }
            }
            return Some(ExprInfo {
                ty: QualType::new(ty),
                cat: ValueCategory::RValue,
                entity: None,
                constv: arg_infos.first().and_then(|info| info.constv),
            });
        }
        // Non-trivial types construct through their `new` overload set.
        let ctor_set = self.sym.lookup_in(ty, "new");
        let Some(ctor_set) = ctor_set else {
            self.error(
                IssueKind::BadExpr(BadExprKind::ObjectNotCallable),
                node,
                "type has no constructor",
            );
            return None;
        };
        let mut arguments = vec![Argument {
            ty: QualType::reference(ty, true),
        }];
        arguments
            .extend(arg_infos.iter().map(|info| Argument { ty: info.ty }));
        match perform_overload_resolution(self.sym, ctor_set, &arguments) {
            OrResult::Success { function, .. } => Some(ExprInfo {
                ty: QualType::new(ty),
                cat: ValueCategory::RValue,
                entity: Some(function),
                constv: None,
            }),
            OrResult::NoMatch { reasons } => {
                self.error(
                    IssueKind::OrError(OrErrorKind::NoMatch { reasons }),
                    node,
                    "no matching constructor",
                );
                None
            }
            OrResult::Ambiguous { finalists } => {
                self.error(
                    IssueKind::OrError(OrErrorKind::Ambiguous { finalists }),
                    node,
                    "ambiguous constructor call",
                );
                None
            }
        }
    }

    fn analyze_member_access(
        &mut self,
        node: NodeId,
        member: &str,
    ) -> Option<ExprInfo> {
        let object = self.ast.child(node, 0);
        let info = self.analyze_expr(object);
        let Some(info) = info else {
            // Accessing members through a type name is static access, which
            // data members do not support.
            if self.ast.is_decorated(object)
                && self.ast.entity_category(object) == EntityCategory::Type
            {
                self.error(
                    IssueKind::BadExpr(
                        BadExprKind::MemAccNonStaticThroughType,
                    ),
                    node,
                    "cannot access a member through a type",
                );
            }
            return None;
        };
        // Array properties.
        if let EntityKind::ArrayType { count, .. } =
            self.sym.entity(info.ty.base).kind
        {
            return match member {
                "count" => Some(ExprInfo {
                    ty: QualType::new(self.sym.builtins().s64),
                    cat: ValueCategory::RValue,
                    entity: None,
                    constv: count.map(|c| ConstValue::Int(c as i64)),
                }),
                "empty" => Some(ExprInfo {
                    ty: QualType::new(self.sym.builtins().bool_),
                    cat: ValueCategory::RValue,
                    entity: None,
                    constv: count.map(|c| ConstValue::Bool(c == 0)),
                }),
                _ => {
                    self.error(
                        IssueKind::BadExpr(BadExprKind::MemberNotFound),
                        node,
                        &format!("arrays have no member {member}"),
                    );
                    None
                }
            };
        }
        let Some(entity) = self.sym.lookup_in(info.ty.base, member) else {
            self.error(
                IssueKind::BadExpr(BadExprKind::MemberNotFound),
                node,
                &format!("no member {member}"),
            );
            return None;
        };
        match &self.sym.entity(entity).kind {
            EntityKind::Variable { ty, mutable, .. } => Some(ExprInfo {
                ty: QualType {
                    base: ty.base,
                    mutable: info.ty.mutable && *mutable,
                    refness: Refness::None,
                },
                cat: info.cat,
                entity: Some(entity),
                constv: None,
            }),
            EntityKind::OverloadSet { .. } => Some(ExprInfo {
                ty: QualType::new(self.sym.builtins().void),
                cat: ValueCategory::RValue,
                entity: Some(entity),
                constv: None,
            }),
            _ => {
                self.error(
                    IssueKind::BadExpr(BadExprKind::MemberNotFound),
                    node,
                    &format!("no member {member}"),
                );
                None
            }
        }
    }

    fn analyze_subscript(&mut self, node: NodeId) -> Option<ExprInfo> {
        let object = self.ast.child(node, 0);
        let index = self.ast.child(node, 1);
        let info = self.analyze_expr(object)?;
        let index_info = self.analyze_expr(index)?;
        self.convert_implicitly(
            index,
            index_info,
            QualType::new(self.sym.builtins().s64),
        );
        match self.sym.entity(info.ty.base).kind {
            EntityKind::ArrayType { elem, .. } => Some(ExprInfo {
                ty: QualType {
                    base: elem,
                    mutable: info.ty.mutable,
                    refness: Refness::None,
                },
                cat: ValueCategory::LValue,
                entity: None,
                constv: None,
            }),
            _ => {
                self.error(
                    IssueKind::BadExpr(BadExprKind::SubscriptNoArray),
                    node,
                    "subscript of a non-array",
                );
                None
            }
        }
    }

    fn analyze_conditional(&mut self, node: NodeId) -> Option<ExprInfo> {
        let children = self.ast.children(node).to_vec();
        self.expect_bool(children[0]);
        let then_info = self.analyze_expr(children[1])?;
        let else_info = self.analyze_expr(children[2])?;
        let Some(common) = self.common_type(then_info.ty, else_info.ty)
        else {
            self.error(
                IssueKind::BadExpr(BadExprKind::ConditionalNoCommonType),
                node,
                "branches have no common type",
            );
            return None;
        };
        self.convert_implicitly(children[1], then_info, common);
        self.convert_implicitly(children[2], else_info, common);
        let constv = match self.ast.const_value(children[0]) {
            Some(ConstValue::Bool(true)) => then_info.constv,
            Some(ConstValue::Bool(false)) => else_info.constv,
            _ => None,
        };
        Some(ExprInfo {
            ty: common,
            cat: ValueCategory::RValue,
            entity: None,
            constv,
        })
    }

    fn analyze_list(&mut self, node: NodeId) -> Option<ExprInfo> {
        let children = self.ast.children(node).to_vec();
        let mut infos = Vec::new();
        for child in &children {
            infos.push(self.analyze_expr(*child)?);
        }
        let Some(first) = infos.first() else {
            self.error(
                IssueKind::BadExpr(BadExprKind::ListExprNoCommonType),
                node,
                "empty list expressions have no type",
            );
            return None;
        };
        let mut common = first.ty.stripped();
        for info in &infos[1..] {
            match self.common_type(common, info.ty) {
                Some(ty) => common = ty,
                None => {
                    self.error(
                        IssueKind::BadExpr(
                            BadExprKind::ListExprNoCommonType,
                        ),
                        node,
                        "list elements have no common type",
                    );
                    return None;
                }
            }
        }
        for (child, info) in children.iter().zip(&infos) {
            self.convert_implicitly(*child, *info, common);
        }
        let array =
            self.sym.array_type(common.base, Some(children.len() as u64));
        Some(ExprInfo {
            ty: QualType::new(array),
            cat: ValueCategory::RValue,
            entity: None,
            constv: None,
        })
    }

    /// Common type of two operands: the one the other converts to
    /// implicitly.
    fn common_type(&self, a: QualType, b: QualType) -> Option<QualType> {
        let a = a.stripped();
        let b = b.stripped();
        let a = QualType::new(a.base);
        let b = QualType::new(b.base);
        if a == b {
            return Some(a);
        }
        if implicit_conversion(self.sym, a, b).is_some() {
            return Some(b);
        }
        if implicit_conversion(self.sym, b, a).is_some() {
            return Some(a);
        }
        None
    }
}

fn fold_binary(
    op: BinaryOp,
    lhs: Option<ConstValue>,
    rhs: Option<ConstValue>,
) -> Option<ConstValue> {
    let (lhs, rhs) = (lhs?, rhs?);
    match (lhs, rhs) {
        (ConstValue::Int(a), ConstValue::Int(b)) => match op {
            BinaryOp::Add => Some(ConstValue::Int(a.wrapping_add(b))),
            BinaryOp::Sub => Some(ConstValue::Int(a.wrapping_sub(b))),
            BinaryOp::Mul => Some(ConstValue::Int(a.wrapping_mul(b))),
            BinaryOp::Div => a.checked_div(b).map(ConstValue::Int),
            BinaryOp::Rem => a.checked_rem(b).map(ConstValue::Int),
            BinaryOp::BitAnd => Some(ConstValue::Int(a & b)),
            BinaryOp::BitOr => Some(ConstValue::Int(a | b)),
            BinaryOp::BitXor => Some(ConstValue::Int(a ^ b)),
            BinaryOp::Less => Some(ConstValue::Bool(a < b)),
            BinaryOp::LessEq => Some(ConstValue::Bool(a <= b)),
            BinaryOp::Greater => Some(ConstValue::Bool(a > b)),
            BinaryOp::GreaterEq => Some(ConstValue::Bool(a >= b)),
            BinaryOp::Equal => Some(ConstValue::Bool(a == b)),
            BinaryOp::NotEqual => Some(ConstValue::Bool(a != b)),
            _ => None,
        },
        (ConstValue::Float(a), ConstValue::Float(b)) => match op {
            BinaryOp::Add => Some(ConstValue::Float(a + b)),
            BinaryOp::Sub => Some(ConstValue::Float(a - b)),
            BinaryOp::Mul => Some(ConstValue::Float(a * b)),
            BinaryOp::Div => Some(ConstValue::Float(a / b)),
            BinaryOp::Equal => Some(ConstValue::Bool(a == b)),
            BinaryOp::NotEqual => Some(ConstValue::Bool(a != b)),
            BinaryOp::Less => Some(ConstValue::Bool(a < b)),
            BinaryOp::LessEq => Some(ConstValue::Bool(a <= b)),
            BinaryOp::Greater => Some(ConstValue::Bool(a > b)),
            BinaryOp::GreaterEq => Some(ConstValue::Bool(a >= b)),
            _ => None,
        },
        (ConstValue::Bool(a), ConstValue::Bool(b)) => match op {
            BinaryOp::Equal => Some(ConstValue::Bool(a == b)),
            BinaryOp::NotEqual => Some(ConstValue::Bool(a != b)),
            _ => None,
        },
        _ => None,
    }
}

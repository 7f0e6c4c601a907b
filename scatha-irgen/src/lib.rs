//! Lowering from the decorated AST to SSA IR.
//!
//! The generator maintains the value location discipline of
//! [`value::Val`], a per-function map from semantic objects to runtime
//! values, destructor stacks mirrored from the tree, and per-function
//! passing conventions with memory-returned values as hidden leading
//! pointer arguments.

#![warn(missing_debug_implementations)]

mod expr;
mod stmt;
mod value;

use std::collections::HashMap;

use scatha_asm::Builtin;
use scatha_ast::{Ast, NodeId, NodeKind};
use scatha_ir::{
    BlockId, Context, ForeignFunctionDecl, FuncRef as IrFuncRef, Function,
    Global, InstKind, Module, Parameter, TypeData, TypeId, Value,
};
use scatha_sema::{
    AnalysisResult, BuiltinTypeKind, EntityId, EntityKind, FunctionKind,
    FunctionSignature, QualType, SpecialLifetimeFunction, SymbolTable,
};

pub use value::{Loc, ParamCc, PassingConvention, RetCc, Val};

/// Per-function lowering info shared across call sites.
#[derive(Debug, Clone)]
pub struct FuncInfo {
    pub func: IrFuncRef,
    pub cc: PassingConvention,
    pub signature: FunctionSignature,
}

/// Lower a fully analyzed translation unit to an IR module.
pub fn generate(
    ast: &Ast,
    root: NodeId,
    sym: &SymbolTable,
    analysis: &AnalysisResult,
    ctx: &mut Context,
) -> Module {
    let mut generator = ModuleGen {
        ast,
        sym,
        analysis,
        ctx,
        module: Module::new(),
        functions: HashMap::new(),
        globals: HashMap::new(),
        foreign: HashMap::new(),
        used_names: HashMap::new(),
        cur: None,
    };
    generator.declare_globals();
    generator.declare_functions();
    generator.lower_bodies(root);
    generator.synthesize_lifetime_bodies();
    tracing::debug!(
        functions = generator.module.num_functions(),
        "lowered translation unit"
    );
    generator.module
}

pub(crate) struct ModuleGen<'a> {
    pub(crate) ast: &'a Ast,
    pub(crate) sym: &'a SymbolTable,
    pub(crate) analysis: &'a AnalysisResult,
    pub(crate) ctx: &'a mut Context,
    pub(crate) module: Module,
    pub(crate) functions: HashMap<EntityId, FuncInfo>,
    pub(crate) globals: HashMap<EntityId, scatha_ir::GlobalRef>,
    pub(crate) foreign: HashMap<EntityId, u32>,
    used_names: HashMap<String, u32>,
    pub(crate) cur: Option<FnState>,
}

impl std::fmt::Debug for ModuleGen<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleGen").finish_non_exhaustive()
    }
}

/// Loop targets for break and continue.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopTargets {
    pub(crate) break_to: BlockId,
    pub(crate) continue_to: BlockId,
    pub(crate) stmt: NodeId,
}

/// Memory slot of a local object.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Slot {
    pub(crate) address: Value,
    pub(crate) ir_ty: TypeId,
    pub(crate) sema_ty: QualType,
    /// Element count for dynamic array locals.
    pub(crate) array_size: Option<Value>,
}

/// State of the function currently being lowered.
#[derive(Debug)]
pub(crate) struct FnState {
    pub(crate) func: IrFuncRef,
    pub(crate) sema_fn: EntityId,
    pub(crate) cc: PassingConvention,
    pub(crate) signature: FunctionSignature,
    pub(crate) block: BlockId,
    pub(crate) locals: HashMap<EntityId, Slot>,
    pub(crate) loop_stack: Vec<LoopTargets>,
    /// Allocas are placed at the head of the entry block in creation order.
    pub(crate) alloca_count: usize,
    /// Non-trivial by-value parameters the function destroys on return.
    pub(crate) param_dtors: Vec<(Value, EntityId)>,
    pub(crate) sret: Option<Value>,
    pub(crate) terminated: bool,
}

impl<'a> ModuleGen<'a> {
    // # Type mapping

    pub(crate) fn map_base_type(&mut self, base: EntityId) -> TypeId {
        match &self.sym.entity(base).kind {
            EntityKind::BuiltinType(kind) => match kind {
                BuiltinTypeKind::Void => self.ctx.void_type(),
                BuiltinTypeKind::Bool => self.ctx.bool_type(),
                BuiltinTypeKind::Byte => self.ctx.int_type(8),
                BuiltinTypeKind::Int { width, .. } => {
                    self.ctx.int_type(*width)
                }
                BuiltinTypeKind::Float { width } => {
                    self.ctx.float_type(*width)
                }
                BuiltinTypeKind::NullPtr => self.ctx.ptr_type(),
            },
            EntityKind::RawPtrType { .. }
            | EntityKind::UniquePtrType { .. } => self.ctx.ptr_type(),
            EntityKind::ArrayType { elem, count } => {
                let elem_ty = self.map_base_type(*elem);
                match count {
                    Some(count) => self.ctx.array_type(elem_ty, *count),
                    // Dynamic arrays travel as a data pointer with the
                    // count in the side channel.
                    None => self.ctx.ptr_type(),
                }
            }
            EntityKind::StructType { members, .. } => {
                let members = members.clone();
                let fields: Vec<TypeId> = members
                    .iter()
                    .filter_map(|member| {
                        match &self.sym.entity(*member).kind {
                            EntityKind::Variable { ty, .. } => {
                                Some(self.map_base_type(ty.base))
                            }
                            _ => None,
                        }
                    })
                    .collect();
                self.ctx.struct_type(fields)
            }
            _ => self.ctx.void_type(),
        }
    }

    /// References lower to pointers; everything else to the base type.
    pub(crate) fn map_qual_type(&mut self, ty: QualType) -> TypeId {
        if ty.is_reference() {
            self.ctx.ptr_type()
        } else {
            self.map_base_type(ty.base)
        }
    }

    pub(crate) fn is_dynamic_array(&self, base: EntityId) -> bool {
        matches!(
            self.sym.entity(base).kind,
            EntityKind::ArrayType { count: None, .. }
        )
    }

    pub(crate) fn scalar_register_type(&self, base: EntityId) -> bool {
        self.sym.has_trivial_lifetime(base)
            && self.sym.size_of(base).is_some_and(|size| size <= 8)
            && !matches!(
                self.sym.entity(base).kind,
                EntityKind::ArrayType { .. }
            )
    }

    pub(crate) fn compute_cc(
        &self,
        signature: &FunctionSignature,
    ) -> PassingConvention {
        let params = signature
            .argument_types
            .iter()
            .map(|ty| {
                if ty.is_reference() {
                    ParamCc::Register
                } else if self.is_dynamic_array(ty.base) {
                    ParamCc::ArrayFat
                } else if self.scalar_register_type(ty.base) {
                    ParamCc::Register
                } else {
                    ParamCc::Memory
                }
            })
            .collect();
        let ret = match signature.return_type {
            None => RetCc::Void,
            Some(ty) if ty.base == self.sym.builtins().void => RetCc::Void,
            Some(ty) if ty.is_reference() => RetCc::Register,
            Some(ty) if self.scalar_register_type(ty.base) => RetCc::Register,
            Some(_) => RetCc::Memory,
        };
        PassingConvention { params, ret }
    }

    // # Declarations

    fn declare_globals(&mut self) {
        for entity in &self.analysis.globals {
            let EntityKind::Variable { ty, .. } = self.sym.entity(*entity).kind
            else {
                continue;
            };
            let ir_ty = self.map_base_type(ty.base);
            let size = self.sym.size_of(ty.base).unwrap_or(8) as usize;
            // Constant initializers are baked into the image.
            let initializer = self
                .sym
                .entity(*entity)
                .ast_node
                .and_then(|node| self.global_initializer(node, size));
            let global = self.module.add_global(Global {
                name: self.sym.entity(*entity).name.clone(),
                ty: ir_ty,
                initializer: initializer.unwrap_or_else(|| vec![0; size]),
            });
            self.globals.insert(*entity, global);
        }
    }

    fn global_initializer(
        &self,
        node: NodeId,
        size: usize,
    ) -> Option<Vec<u8>> {
        let NodeKind::VariableDeclaration {
            has_type_expr,
            has_initializer: true,
            ..
        } = self.ast.kind(node)
        else {
            return None;
        };
        let init =
            self.ast.child(node, usize::from(*has_type_expr));
        let value = self.ast.const_value(init)?;
        let bits = match value {
            scatha_ast::ConstValue::Int(v) => v as u64,
            scatha_ast::ConstValue::Bool(v) => v as u64,
            scatha_ast::ConstValue::Float(v) => v.to_bits(),
        };
        Some(bits.to_le_bytes()[..size.min(8)].to_vec())
    }

    fn declare_functions(&mut self) {
        for entity in self.sym.entity_ids().collect::<Vec<_>>() {
            let EntityKind::Function {
                signature,
                kind,
                foreign_index,
                ..
            } = &self.sym.entity(entity).kind
            else {
                continue;
            };
            let signature = signature.clone();
            match kind {
                FunctionKind::Foreign => {
                    let index = self.module.foreign_functions.len() as u32;
                    let param_types = signature
                        .argument_types
                        .iter()
                        .map(|ty| self.map_qual_type(*ty))
                        .collect();
                    let return_ty = signature
                        .return_type
                        .map(|ty| self.map_qual_type(ty))
                        .unwrap_or(TypeId::VOID);
                    let decl_index =
                        foreign_index.map(|(_, i)| i).unwrap_or(index);
                    let library = self
                        .sym
                        .entity(entity)
                        .ast_node
                        .and_then(|node| match self.ast.kind(node) {
                            NodeKind::FunctionDefinition {
                                extern_library: Some(library),
                                ..
                            } => Some(library.clone()),
                            _ => None,
                        })
                        .unwrap_or_default();
                    self.module.foreign_functions.push(ForeignFunctionDecl {
                        name: self.sym.entity(entity).name.clone(),
                        library,
                        index: decl_index,
                        param_types,
                        return_ty,
                    });
                    self.foreign.insert(entity, index);
                }
                FunctionKind::Native | FunctionKind::Generated => {
                    // Signatures may be unresolved for poisoned functions.
                    if signature.return_type.is_none()
                        && self.sym.entity(entity).ast_node.is_none()
                    {
                        continue;
                    }
                    let info = self.declare_ir_function(entity, &signature);
                    self.functions.insert(entity, info);
                }
            }
        }
    }

    fn unique_name(&mut self, base: &str) -> String {
        let counter = self.used_names.entry(base.to_owned()).or_insert(0);
        let name = if *counter == 0 {
            base.to_owned()
        } else {
            format!("{base}.{counter}")
        };
        *counter += 1;
        name
    }

    fn declare_ir_function(
        &mut self,
        entity: EntityId,
        signature: &FunctionSignature,
    ) -> FuncInfo {
        let cc = self.compute_cc(signature);
        let mut params = Vec::new();
        if cc.ret == RetCc::Memory {
            let ptr = self.ctx.ptr_type();
            params.push(Parameter { ty: ptr, name: "ret.addr".to_owned() });
        }
        for (index, (ty, param_cc)) in signature
            .argument_types
            .iter()
            .zip(&cc.params)
            .enumerate()
        {
            let name = self
                .param_name(entity, index)
                .unwrap_or_else(|| format!("a{index}"));
            match param_cc {
                ParamCc::Register => {
                    let ir_ty = self.map_qual_type(*ty);
                    params.push(Parameter { ty: ir_ty, name });
                }
                ParamCc::Memory => {
                    let ptr = self.ctx.ptr_type();
                    params.push(Parameter { ty: ptr, name });
                }
                ParamCc::ArrayFat => {
                    let ptr = self.ctx.ptr_type();
                    let i64t = self.ctx.int_type(64);
                    params.push(Parameter {
                        ty: ptr,
                        name: name.clone(),
                    });
                    params.push(Parameter {
                        ty: i64t,
                        name: format!("{name}.count"),
                    });
                }
            }
        }
        let return_ty = match cc.ret {
            RetCc::Void | RetCc::Memory => TypeId::VOID,
            RetCc::Register => {
                let ty = signature.return_type.expect("resolved signature");
                self.map_qual_type(ty)
            }
        };
        let base_name = self.sym.entity(entity).mangled_name.clone();
        let name = self.unique_name(&base_name);
        let func =
            self.module.add_function(Function::new(name, params, return_ty));
        FuncInfo { func, cc, signature: signature.clone() }
    }

    fn param_name(&self, entity: EntityId, index: usize) -> Option<String> {
        let EntityKind::Function { params, .. } = &self.sym.entity(entity).kind
        else {
            return None;
        };
        params
            .get(index)
            .map(|param| self.sym.entity(*param).name.clone())
    }

    // # Bodies

    fn lower_bodies(&mut self, root: NodeId) {
        for decl in self.ast.children(root) {
            match self.ast.kind(*decl) {
                NodeKind::FunctionDefinition { .. } => {
                    self.lower_function(*decl);
                }
                NodeKind::StructDefinition { .. } => {
                    for member in self.ast.children(*decl) {
                        if matches!(
                            self.ast.kind(*member),
                            NodeKind::FunctionDefinition { .. }
                        ) {
                            self.lower_function(*member);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    pub(crate) fn func_entity(&self, node: NodeId) -> Option<EntityId> {
        self.ast.declared_entity(node).map(|e| EntityId(e.0))
    }

    fn lower_function(&mut self, node: NodeId) {
        let Some(entity) = self.func_entity(node) else { return };
        let Some(info) = self.functions.get(&entity).cloned() else {
            return;
        };
        let children = self.ast.children(node).to_vec();
        let Some(body) = children.last().copied() else { return };
        if !matches!(self.ast.kind(body), NodeKind::CompoundStatement) {
            return;
        }
        let entry = self.module.function_mut(info.func).add_block("entry");
        let sret = (info.cc.ret == RetCc::Memory).then(|| Value::Param(0));
        self.cur = Some(FnState {
            func: info.func,
            sema_fn: entity,
            cc: info.cc.clone(),
            signature: info.signature.clone(),
            block: entry,
            locals: HashMap::new(),
            loop_stack: Vec::new(),
            alloca_count: 0,
            param_dtors: Vec::new(),
            sret,
            terminated: false,
        });
        self.bind_parameters(entity, &info);
        self.lower_stmt(body);
        self.finish_function();
        self.cur = None;
    }

    fn bind_parameters(&mut self, entity: EntityId, info: &FuncInfo) {
        let EntityKind::Function { params, .. } =
            &self.sym.entity(entity).kind
        else {
            return;
        };
        let params = params.clone();
        for (index, param_entity) in params.iter().enumerate() {
            let EntityKind::Variable { ty, .. } =
                self.sym.entity(*param_entity).kind
            else {
                continue;
            };
            let ir_index = info.cc.ir_param_index(index) as u32;
            match info.cc.params[index] {
                ParamCc::Register if ty.is_reference() => {
                    // A reference parameter is the address of its referent.
                    let ir_ty = self.map_base_type(ty.base);
                    self.bind_local(*param_entity, Slot {
                        address: Value::Param(ir_index),
                        ir_ty,
                        sema_ty: ty,
                        array_size: None,
                    });
                }
                ParamCc::Register => {
                    // Spill to a slot so the parameter is addressable;
                    // mem2reg lifts it back.
                    let ir_ty = self.map_qual_type(ty);
                    let slot = self.new_alloca(ir_ty, "param");
                    self.emit_store(slot, Value::Param(ir_index));
                    self.bind_local(*param_entity, Slot {
                        address: slot,
                        ir_ty,
                        sema_ty: ty,
                        array_size: None,
                    });
                }
                ParamCc::Memory => {
                    let ir_ty = self.map_base_type(ty.base);
                    self.bind_local(*param_entity, Slot {
                        address: Value::Param(ir_index),
                        ir_ty,
                        sema_ty: ty,
                        array_size: None,
                    });
                    if !self.sym.has_trivial_lifetime(ty.base) {
                        let state = self.cur.as_mut().expect("in function");
                        state
                            .param_dtors
                            .push((Value::Param(ir_index), ty.base));
                    }
                }
                ParamCc::ArrayFat => {
                    let elem_ptr = self.ctx.ptr_type();
                    let data_slot = self.new_alloca(elem_ptr, "arr.data");
                    self.emit_store(data_slot, Value::Param(ir_index));
                    self.bind_local(*param_entity, Slot {
                        address: data_slot,
                        ir_ty: elem_ptr,
                        sema_ty: ty,
                        array_size: Some(Value::Param(ir_index + 1)),
                    });
                }
            }
        }
    }

    pub(crate) fn bind_local(&mut self, entity: EntityId, slot: Slot) {
        self.cur
            .as_mut()
            .expect("in function")
            .locals
            .insert(entity, slot);
    }

    fn finish_function(&mut self) {
        let state = self.cur.as_ref().expect("in function");
        if state.terminated {
            return;
        }
        // Fall off the end: the body already flushed its destructor stack,
        // only by-value parameters remain before the implicit return.
        self.emit_param_dtors();
        let state = self.cur.as_ref().expect("in function");
        let func = state.func;
        let ret_cc = state.cc.ret;
        let block = state.block;
        let function = self.module.function_mut(func);
        let operands = match ret_cc {
            RetCc::Register => {
                let ty = function.return_ty;
                vec![Value::Undef(ty)]
            }
            _ => Vec::new(),
        };
        let ret =
            function.new_inst(InstKind::Return, TypeId::VOID, operands, "");
        function.append_inst(block, ret);
    }

    // # Lifetime function bodies

    /// Generated lifetime functions get memberwise bodies: default
    /// construction zero-initializes and calls member default constructors,
    /// copy/move construct memberwise, destruction runs member destructors
    /// in reverse.
    fn synthesize_lifetime_bodies(&mut self) {
        for entity in self.sym.entity_ids().collect::<Vec<_>>() {
            let EntityKind::Function {
                kind: FunctionKind::Generated,
                slf: Some(slf),
                ..
            } = self.sym.entity(entity).kind
            else {
                continue;
            };
            let Some(info) = self.functions.get(&entity).cloned() else {
                continue;
            };
            if self.module.function(info.func).num_blocks() > 0 {
                continue;
            }
            self.emit_lifetime_body(entity, &info, slf);
        }
    }

    fn emit_lifetime_body(
        &mut self,
        entity: EntityId,
        info: &FuncInfo,
        slf: SpecialLifetimeFunction,
    ) {
        let struct_ty = info.signature.argument_types[0].base;
        let members: Vec<(usize, QualType)> =
            match &self.sym.entity(struct_ty).kind {
                EntityKind::StructType { members, .. } => members
                    .iter()
                    .enumerate()
                    .filter_map(|(index, member)| {
                        match self.sym.entity(*member).kind {
                            EntityKind::Variable { ty, .. } => {
                                Some((index, ty))
                            }
                            _ => None,
                        }
                    })
                    .collect(),
                _ => Vec::new(),
            };
        let entry = self.module.function_mut(info.func).add_block("entry");
        self.cur = Some(FnState {
            func: info.func,
            sema_fn: entity,
            cc: info.cc.clone(),
            signature: info.signature.clone(),
            block: entry,
            locals: HashMap::new(),
            loop_stack: Vec::new(),
            alloca_count: 0,
            param_dtors: Vec::new(),
            sret: None,
            terminated: false,
        });
        let struct_ir = self.map_base_type(struct_ty);
        let this = Value::Param(0);
        match slf {
            SpecialLifetimeFunction::DefaultConstructor => {
                for (index, member_ty) in &members {
                    let addr =
                        self.member_address(struct_ir, this, *index);
                    self.default_init_object(addr, *member_ty);
                }
            }
            SpecialLifetimeFunction::CopyConstructor
            | SpecialLifetimeFunction::MoveConstructor => {
                let source = Value::Param(1);
                for (index, member_ty) in &members {
                    let dst = self.member_address(struct_ir, this, *index);
                    let src =
                        self.member_address(struct_ir, source, *index);
                    self.copy_object(dst, src, *member_ty);
                }
            }
            SpecialLifetimeFunction::Destructor => {
                for (index, member_ty) in members.iter().rev() {
                    let addr =
                        self.member_address(struct_ir, this, *index);
                    self.destroy_object(addr, member_ty.base);
                }
            }
        }
        let state = self.cur.as_ref().expect("in function");
        let (func, block) = (state.func, state.block);
        let function = self.module.function_mut(func);
        let ret =
            function.new_inst(InstKind::Return, TypeId::VOID, vec![], "");
        function.append_inst(block, ret);
        self.cur = None;
    }

    // # Shared emission helpers

    pub(crate) fn emit(
        &mut self,
        kind: InstKind,
        ty: TypeId,
        operands: Vec<Value>,
        name: &str,
    ) -> Value {
        let state = self.cur.as_ref().expect("in function");
        let (func, block) = (state.func, state.block);
        let function = self.module.function_mut(func);
        let inst = function.new_inst(kind, ty, operands, name);
        function.append_inst(block, inst);
        Value::Inst(inst)
    }

    /// Allocas collect at the head of the entry block.
    pub(crate) fn new_alloca(&mut self, ty: TypeId, name: &str) -> Value {
        let state = self.cur.as_mut().expect("in function");
        let (func, position) = (state.func, state.alloca_count);
        state.alloca_count += 1;
        let ptr = self.ctx.ptr_type();
        let function = self.module.function_mut(func);
        let inst = function.new_inst(
            InstKind::Alloca { allocated_ty: ty },
            ptr,
            Vec::new(),
            &format!("{name}.addr"),
        );
        let entry = function.entry();
        function.insert_inst(entry, position, inst);
        Value::Inst(inst)
    }

    pub(crate) fn emit_store(&mut self, address: Value, value: Value) {
        self.emit(InstKind::Store, TypeId::VOID, vec![address, value], "");
    }

    pub(crate) fn emit_load(
        &mut self,
        ty: TypeId,
        address: Value,
        name: &str,
    ) -> Value {
        self.emit(InstKind::Load, ty, vec![address], name)
    }

    pub(crate) fn member_address(
        &mut self,
        struct_ir: TypeId,
        base: Value,
        index: usize,
    ) -> Value {
        let ptr = self.ctx.ptr_type();
        let i64t = self.ctx.int_type(64);
        self.emit(
            InstKind::GetElementPtr {
                elem_ty: struct_ir,
                member_indices: vec![index],
            },
            ptr,
            vec![base, Value::IntConst { value: 0, ty: i64t }],
            "member",
        )
    }

    /// Default-initialize the object at `address`.
    pub(crate) fn default_init_object(
        &mut self,
        address: Value,
        ty: QualType,
    ) {
        if self.sym.has_trivial_lifetime(ty.base) {
            let size = self.sym.size_of(ty.base).unwrap_or(8);
            if matches!(size, 1 | 2 | 4 | 8) {
                let ir_ty = self.map_base_type(ty.base);
                let zero = self.zero_value(ir_ty);
                self.emit_store(address, zero);
            } else {
                let i64t = self.ctx.int_type(64);
                self.emit(
                    InstKind::Call,
                    TypeId::VOID,
                    vec![
                        Value::Builtin(Builtin::Memset.index()),
                        address,
                        Value::IntConst { value: size, ty: i64t },
                        Value::IntConst { value: 0, ty: i64t },
                    ],
                    "",
                );
            }
            return;
        }
        let ctor = self
            .sym
            .struct_lifetime(ty.base)
            .and_then(|l| l.default_constructor);
        if let Some(ctor) = ctor {
            self.emit_lifetime_call(ctor, vec![address]);
        }
    }

    /// Copy the object at `src` into `dst`, through the copy constructor
    /// for class types. Trivial objects wider than a register copy through
    /// the `memcpy` builtin.
    pub(crate) fn copy_object(
        &mut self,
        dst: Value,
        src: Value,
        ty: QualType,
    ) {
        if self.sym.has_trivial_lifetime(ty.base) {
            let size = self.sym.size_of(ty.base).unwrap_or(8);
            if matches!(size, 1 | 2 | 4 | 8) {
                let ir_ty = self.map_base_type(ty.base);
                let value = self.emit_load(ir_ty, src, "copy");
                self.emit_store(dst, value);
            } else {
                let i64t = self.ctx.int_type(64);
                self.emit(
                    InstKind::Call,
                    TypeId::VOID,
                    vec![
                        Value::Builtin(Builtin::Memcpy.index()),
                        dst,
                        Value::IntConst { value: size, ty: i64t },
                        src,
                    ],
                    "",
                );
            }
            return;
        }
        let ctor = self
            .sym
            .struct_lifetime(ty.base)
            .and_then(|l| l.copy_constructor);
        if let Some(ctor) = ctor {
            self.emit_lifetime_call(ctor, vec![dst, src]);
        }
    }

    /// Run the destructor of the object at `address`, if it has one.
    pub(crate) fn destroy_object(&mut self, address: Value, ty: EntityId) {
        if self.sym.has_trivial_lifetime(ty) {
            return;
        }
        let dtor =
            self.sym.struct_lifetime(ty).and_then(|l| l.destructor);
        if let Some(dtor) = dtor {
            self.emit_lifetime_call(dtor, vec![address]);
        }
    }

    pub(crate) fn emit_lifetime_call(
        &mut self,
        function: EntityId,
        args: Vec<Value>,
    ) {
        let Some(info) = self.functions.get(&function).cloned() else {
            return;
        };
        let mut operands = vec![Value::Function(info.func)];
        operands.extend(args);
        self.emit(InstKind::Call, TypeId::VOID, operands, "");
    }

    pub(crate) fn zero_value(&mut self, ty: TypeId) -> Value {
        match self.ctx.type_data(ty).clone() {
            TypeData::Float { .. } => Value::FloatConst { bits: 0, ty },
            TypeData::Int { .. } => Value::IntConst { value: 0, ty },
            _ => Value::Undef(ty),
        }
    }

    /// Emit destructor calls for one statement's stack, innermost first.
    pub(crate) fn emit_dtor_stack(&mut self, stmt: NodeId) {
        for object in self.ast.dtor_stack(stmt).to_vec().into_iter().rev() {
            let entity = EntityId(object.0);
            let Some(slot) = self
                .cur
                .as_ref()
                .expect("in function")
                .locals
                .get(&entity)
                .copied()
            else {
                continue;
            };
            self.destroy_object(slot.address, slot.sema_ty.base);
        }
    }

    pub(crate) fn emit_param_dtors(&mut self) {
        let dtors =
            self.cur.as_ref().expect("in function").param_dtors.clone();
        for (address, ty) in dtors.into_iter().rev() {
            self.destroy_object(address, ty);
        }
    }
}

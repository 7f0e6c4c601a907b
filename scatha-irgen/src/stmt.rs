//! Statement lowering.
//!
//! Every statement emits its destructor stack (in reverse order) on normal
//! completion. `return`, `break` and `continue` additionally walk the
//! enclosing statements up to the relevant boundary and flush their pending
//! destructors before transferring control.

use scatha_ast::{LoopKind, NodeId, NodeKind};
use scatha_ir::{BlockId, InstKind, TypeId, Value};
use scatha_sema::{EntityId, EntityKind};

use crate::value::{Loc, RetCc, Val};
use crate::{LoopTargets, ModuleGen, Slot};

impl ModuleGen<'_> {
    pub(crate) fn state(&self) -> &crate::FnState {
        self.cur.as_ref().expect("in function")
    }

    pub(crate) fn state_mut(&mut self) -> &mut crate::FnState {
        self.cur.as_mut().expect("in function")
    }

    pub(crate) fn add_block(&mut self, name: &str) -> BlockId {
        let func = self.state().func;
        self.module.function_mut(func).add_block(name)
    }

    pub(crate) fn switch_to(&mut self, block: BlockId) {
        let state = self.state_mut();
        state.block = block;
        state.terminated = false;
    }

    pub(crate) fn emit_goto(&mut self, target: BlockId) {
        if self.state().terminated {
            return;
        }
        self.emit(InstKind::Goto { target }, TypeId::VOID, vec![], "");
        self.state_mut().terminated = true;
    }

    pub(crate) fn emit_branch(
        &mut self,
        cond: Value,
        then_target: BlockId,
        else_target: BlockId,
    ) {
        if self.state().terminated {
            return;
        }
        self.emit(
            InstKind::Branch { then_target, else_target },
            TypeId::VOID,
            vec![cond],
            "",
        );
        self.state_mut().terminated = true;
    }

    pub(crate) fn lower_stmt(&mut self, node: NodeId) {
        if self.state().terminated {
            // Unreachable code after a jump is dropped.
            return;
        }
        match self.ast.kind(node).clone() {
            NodeKind::CompoundStatement => {
                for child in self.ast.children(node).to_vec() {
                    self.lower_stmt(child);
                    if self.state().terminated {
                        return;
                    }
                }
                self.emit_dtor_stack(node);
            }
            NodeKind::VariableDeclaration { .. } => self.lower_var_decl(node),
            NodeKind::ExpressionStatement => {
                let expr = self.ast.child(node, 0);
                self.lower_expr(expr);
                self.emit_dtor_stack(node);
            }
            NodeKind::ReturnStatement => self.lower_return(node),
            NodeKind::IfStatement => self.lower_if(node),
            NodeKind::LoopStatement { kind } => self.lower_loop(node, kind),
            NodeKind::BreakStatement => self.lower_break(node),
            NodeKind::ContinueStatement => self.lower_continue(node),
            NodeKind::EmptyStatement => {}
            _ => {
                self.lower_expr(node);
            }
        }
    }

    fn lower_var_decl(&mut self, node: NodeId) {
        let Some(entity) =
            self.ast.declared_entity(node).map(|e| EntityId(e.0))
        else {
            return;
        };
        let EntityKind::Variable { ty, .. } = self.sym.entity(entity).kind
        else {
            return;
        };
        let NodeKind::VariableDeclaration {
            name,
            has_type_expr,
            has_initializer,
            ..
        } = self.ast.kind(node).clone()
        else {
            return;
        };
        let init = has_initializer
            .then(|| self.ast.child(node, usize::from(has_type_expr)));
        if ty.is_reference() {
            // References bind to the initializer's address.
            let init = init.expect("checked by sema");
            let val = self.lower_expr(init);
            let address = self.address_of(val);
            let ir_ty = self.map_base_type(ty.base);
            self.bind_local(entity, Slot {
                address,
                ir_ty,
                sema_ty: ty,
                array_size: val.array_size,
            });
            return;
        }
        if self.is_dynamic_array(ty.base) {
            let init = init.expect("dynamic arrays are initialized");
            let val = self.lower_expr(init);
            let ptr = self.ctx.ptr_type();
            let slot = self.new_alloca(ptr, &name);
            let data = self.to_register(val);
            self.emit_store(slot, data);
            self.bind_local(entity, Slot {
                address: slot,
                ir_ty: ptr,
                sema_ty: ty,
                array_size: val.array_size,
            });
            return;
        }
        let ir_ty = self.map_base_type(ty.base);
        let trivial = self.sym.has_trivial_lifetime(ty.base);
        match init {
            Some(init) => {
                let val = self.lower_expr(init);
                if trivial {
                    let slot = self.new_alloca(ir_ty, &name);
                    self.store_val(slot, val, ty.base);
                    self.bind_local(entity, Slot {
                        address: slot,
                        ir_ty,
                        sema_ty: ty,
                        array_size: None,
                    });
                } else if val.loc == Loc::Memory
                    && self.is_reusable_rvalue(init)
                {
                    // An rvalue initializer is consumed: its storage
                    // becomes the variable.
                    self.bind_local(entity, Slot {
                        address: val.v,
                        ir_ty,
                        sema_ty: ty,
                        array_size: None,
                    });
                } else {
                    // An lvalue initializer invokes the copy constructor.
                    let slot = self.new_alloca(ir_ty, &name);
                    let src = self.address_of(val);
                    self.copy_object(slot, src, ty);
                    self.bind_local(entity, Slot {
                        address: slot,
                        ir_ty,
                        sema_ty: ty,
                        array_size: None,
                    });
                }
            }
            None => {
                let slot = self.new_alloca(ir_ty, &name);
                match self.analysis.var_constructors.get(&node) {
                    Some(ctor) => {
                        self.emit_lifetime_call(*ctor, vec![slot]);
                    }
                    None => self.default_init_object(
                        slot,
                        scatha_sema::QualType::new(ty.base),
                    ),
                }
                self.bind_local(entity, Slot {
                    address: slot,
                    ir_ty,
                    sema_ty: ty,
                    array_size: None,
                });
            }
        }
    }

    /// An initializer whose storage can be adopted: a fresh temporary in
    /// memory, not a named value.
    fn is_reusable_rvalue(&self, init: NodeId) -> bool {
        use scatha_ast::ValueCategory;
        self.ast.is_decorated(init)
            && self.ast.value_category(init) == ValueCategory::RValue
    }

    fn lower_return(&mut self, node: NodeId) {
        let value_node = self.ast.children(node).first().copied();
        let ret_cc = self.state().cc.ret;
        let result = value_node.map(|expr| self.lower_expr(expr));
        // Flush destructor stacks of every statement up to the function
        // body before leaving.
        self.emit_enclosing_dtors(node, None);
        self.emit_param_dtors();
        if self.state().terminated {
            return;
        }
        match (ret_cc, result) {
            (RetCc::Register, Some(val)) => {
                let value = self.to_register(val);
                self.emit(InstKind::Return, TypeId::VOID, vec![value], "");
            }
            (RetCc::Memory, Some(val)) => {
                let sret = self.state().sret.expect("memory return");
                let ret_ty = self
                    .state()
                    .signature
                    .return_type
                    .expect("resolved signature");
                let src = self.address_of(val);
                self.copy_object(sret, src, ret_ty);
                self.emit(InstKind::Return, TypeId::VOID, vec![], "");
            }
            _ => {
                self.emit(InstKind::Return, TypeId::VOID, vec![], "");
            }
        }
        self.state_mut().terminated = true;
    }

    /// Emit destructor stacks of the statements enclosing `from`, up to and
    /// including `boundary` (the function body when `None`).
    fn emit_enclosing_dtors(
        &mut self,
        from: NodeId,
        boundary: Option<NodeId>,
    ) {
        let mut current = Some(from);
        while let Some(node) = current {
            if self.ast.kind(node).is_statement() {
                self.emit_dtor_stack(node);
            }
            if boundary == Some(node) {
                break;
            }
            if matches!(
                self.ast.kind(node),
                NodeKind::FunctionDefinition { .. }
            ) {
                break;
            }
            current = self.ast.parent(node);
        }
    }

    fn lower_if(&mut self, node: NodeId) {
        let children = self.ast.children(node).to_vec();
        let cond = self.lower_expr(children[0]);
        let cond = self.to_register(cond);
        let then_block = self.add_block("if.then");
        let end_block = self.add_block("if.end");
        let else_block = if children.len() > 2 {
            self.add_block("if.else")
        } else {
            end_block
        };
        self.emit_branch(cond, then_block, else_block);
        self.switch_to(then_block);
        self.lower_stmt(children[1]);
        self.emit_goto(end_block);
        if let Some(else_stmt) = children.get(2) {
            self.switch_to(else_block);
            self.lower_stmt(*else_stmt);
            self.emit_goto(end_block);
        }
        self.switch_to(end_block);
        self.emit_dtor_stack(node);
    }

    fn lower_loop(&mut self, node: NodeId, kind: LoopKind) {
        let children = self.ast.children(node).to_vec();
        match kind {
            LoopKind::While => {
                let header = self.add_block("loop.header");
                let body = self.add_block("loop.body");
                let end = self.add_block("loop.end");
                self.emit_goto(header);
                self.switch_to(header);
                let cond = self.lower_expr(children[0]);
                let cond = self.to_register(cond);
                self.emit_branch(cond, body, end);
                self.switch_to(body);
                self.push_loop(LoopTargets {
                    break_to: end,
                    continue_to: header,
                    stmt: node,
                });
                self.lower_stmt(children[1]);
                self.pop_loop();
                self.emit_goto(header);
                self.switch_to(end);
            }
            LoopKind::DoWhile => {
                let body = self.add_block("loop.body");
                let footer = self.add_block("loop.footer");
                let end = self.add_block("loop.end");
                self.emit_goto(body);
                self.switch_to(body);
                self.push_loop(LoopTargets {
                    break_to: end,
                    continue_to: footer,
                    stmt: node,
                });
                self.lower_stmt(children[1]);
                self.pop_loop();
                self.emit_goto(footer);
                self.switch_to(footer);
                let cond = self.lower_expr(children[0]);
                let cond = self.to_register(cond);
                self.emit_branch(cond, body, end);
                self.switch_to(end);
            }
            LoopKind::For => {
                // [init, cond, inc, body]; continue targets the increment.
                self.lower_stmt(children[0]);
                let header = self.add_block("loop.header");
                let body = self.add_block("loop.body");
                let inc = self.add_block("loop.inc");
                let end = self.add_block("loop.end");
                self.emit_goto(header);
                self.switch_to(header);
                let cond = self.lower_expr(children[1]);
                let cond = self.to_register(cond);
                self.emit_branch(cond, body, end);
                self.switch_to(body);
                self.push_loop(LoopTargets {
                    break_to: end,
                    continue_to: inc,
                    stmt: node,
                });
                self.lower_stmt(children[3]);
                self.pop_loop();
                self.emit_goto(inc);
                self.switch_to(inc);
                self.lower_expr(children[2]);
                self.emit_goto(header);
                self.switch_to(end);
            }
        }
        self.emit_dtor_stack(node);
    }

    fn push_loop(&mut self, targets: LoopTargets) {
        self.state_mut().loop_stack.push(targets);
    }

    fn pop_loop(&mut self) {
        self.state_mut().loop_stack.pop();
    }

    fn lower_break(&mut self, node: NodeId) {
        let Some(targets) = self.state().loop_stack.last().copied() else {
            return;
        };
        self.emit_enclosing_dtors(node, Some(targets.stmt));
        self.emit_goto(targets.break_to);
    }

    fn lower_continue(&mut self, node: NodeId) {
        let Some(targets) = self.state().loop_stack.last().copied() else {
            return;
        };
        self.emit_enclosing_dtors(node, Some(targets.stmt));
        self.emit_goto(targets.continue_to);
    }

    // # Value movement

    /// Load a value out of memory if needed.
    pub(crate) fn to_register(&mut self, val: Val) -> Value {
        match val.loc {
            Loc::Register => val.v,
            Loc::Memory => self.emit_load(val.ir_ty, val.v, "load"),
        }
    }

    /// Spill a register value into a fresh stack slot if needed; returns
    /// the address.
    pub(crate) fn address_of(&mut self, val: Val) -> Value {
        match val.loc {
            Loc::Memory => val.v,
            Loc::Register => {
                let slot = self.new_alloca(val.ir_ty, "tmp");
                self.emit_store(slot, val.v);
                slot
            }
        }
    }

    /// Store a lowered value into `address`. Register-sized values store
    /// directly; everything else copies object-wise.
    pub(crate) fn store_val(
        &mut self,
        address: Value,
        val: Val,
        sema_base: EntityId,
    ) {
        let size = self.sym.size_of(sema_base).unwrap_or(8);
        let register_sized = matches!(size, 1 | 2 | 4 | 8);
        if register_sized
            && (self.sym.has_trivial_lifetime(sema_base)
                || val.loc == Loc::Register)
        {
            let value = self.to_register(val);
            self.emit_store(address, value);
        } else {
            let src = self.address_of(val);
            self.copy_object(
                address,
                src,
                scatha_sema::QualType::new(sema_base),
            );
        }
    }
}

//! Convenience builder over the function mutator API.
//!
//! Tracks a current insertion block and offers one method per instruction
//! kind. Used by the IR generator and by tests that construct IR by hand.

use crate::context::Context;
use crate::function::Function;
use crate::types::TypeId;
use crate::value::{
    ArithmeticOp, BlockId, CompareMode, CompareOp, ConversionOp, InstId,
    InstKind, UnaryOp, Value,
};

/// Builder appending instructions to a function.
#[derive(Debug)]
pub struct Builder<'f, 'ctx> {
    pub function: &'f mut Function,
    pub ctx: &'ctx mut Context,
    current: Option<BlockId>,
}

impl<'f, 'ctx> Builder<'f, 'ctx> {
    pub fn new(ctx: &'ctx mut Context, function: &'f mut Function) -> Self {
        Self { function, ctx, current: None }
    }

    pub fn add_block(&mut self, name: &str) -> BlockId {
        self.function.add_block(name)
    }

    pub fn set_insert_point(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> BlockId {
        self.current.expect("no insertion block")
    }

    /// `true` once the current block has a terminator.
    pub fn is_terminated(&self) -> bool {
        self.current
            .and_then(|block| self.function.terminator(block))
            .is_some()
    }

    pub fn add(
        &mut self,
        kind: InstKind,
        ty: TypeId,
        operands: Vec<Value>,
        name: &str,
    ) -> Value {
        let id = self.add_inst(kind, ty, operands, name);
        Value::Inst(id)
    }

    pub fn add_inst(
        &mut self,
        kind: InstKind,
        ty: TypeId,
        operands: Vec<Value>,
        name: &str,
    ) -> InstId {
        let block = self.current_block();
        let id = self.function.new_inst(kind, ty, operands, name);
        self.function.append_inst(block, id);
        id
    }

    pub fn alloca(&mut self, allocated_ty: TypeId, name: &str) -> Value {
        let ptr = self.ctx.ptr_type();
        self.add(InstKind::Alloca { allocated_ty }, ptr, Vec::new(), name)
    }

    pub fn load(&mut self, ty: TypeId, address: Value, name: &str) -> Value {
        self.add(InstKind::Load, ty, vec![address], name)
    }

    pub fn store(&mut self, address: Value, value: Value) {
        self.add(InstKind::Store, TypeId::VOID, vec![address, value], "");
    }

    pub fn arithmetic(
        &mut self,
        op: ArithmeticOp,
        ty: TypeId,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Value {
        self.add(InstKind::Arithmetic(op), ty, vec![lhs, rhs], name)
    }

    pub fn unary(
        &mut self,
        op: UnaryOp,
        ty: TypeId,
        operand: Value,
        name: &str,
    ) -> Value {
        self.add(InstKind::UnaryArithmetic(op), ty, vec![operand], name)
    }

    pub fn compare(
        &mut self,
        mode: CompareMode,
        op: CompareOp,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Value {
        let bool_ty = self.ctx.bool_type();
        self.add(InstKind::Compare { mode, op }, bool_ty, vec![lhs, rhs], name)
    }

    pub fn convert(
        &mut self,
        op: ConversionOp,
        to: TypeId,
        operand: Value,
        name: &str,
    ) -> Value {
        self.add(InstKind::Conversion(op), to, vec![operand], name)
    }

    pub fn gep(
        &mut self,
        elem_ty: TypeId,
        base: Value,
        array_index: Value,
        member_indices: Vec<usize>,
        name: &str,
    ) -> Value {
        let ptr = self.ctx.ptr_type();
        self.add(
            InstKind::GetElementPtr { elem_ty, member_indices },
            ptr,
            vec![base, array_index],
            name,
        )
    }

    pub fn extract_value(
        &mut self,
        ty: TypeId,
        aggregate: Value,
        indices: Vec<usize>,
        name: &str,
    ) -> Value {
        self.add(InstKind::ExtractValue { indices }, ty, vec![aggregate], name)
    }

    pub fn insert_value(
        &mut self,
        ty: TypeId,
        aggregate: Value,
        value: Value,
        indices: Vec<usize>,
        name: &str,
    ) -> Value {
        self.add(
            InstKind::InsertValue { indices },
            ty,
            vec![aggregate, value],
            name,
        )
    }

    pub fn select(
        &mut self,
        ty: TypeId,
        cond: Value,
        then_value: Value,
        else_value: Value,
        name: &str,
    ) -> Value {
        self.add(InstKind::Select, ty, vec![cond, then_value, else_value], name)
    }

    pub fn call(
        &mut self,
        return_ty: TypeId,
        callee: Value,
        args: Vec<Value>,
        name: &str,
    ) -> Value {
        let mut operands = vec![callee];
        operands.extend(args);
        self.add(InstKind::Call, return_ty, operands, name)
    }

    pub fn phi(
        &mut self,
        ty: TypeId,
        args: Vec<(BlockId, Value)>,
        name: &str,
    ) -> Value {
        let (preds, operands) = args.into_iter().unzip();
        let block = self.current_block();
        let id =
            self.function.new_inst(InstKind::Phi { preds }, ty, operands, name);
        self.function.insert_after_phis(block, id);
        Value::Inst(id)
    }

    pub fn goto(&mut self, target: BlockId) {
        self.add(InstKind::Goto { target }, TypeId::VOID, Vec::new(), "");
    }

    pub fn branch(
        &mut self,
        cond: Value,
        then_target: BlockId,
        else_target: BlockId,
    ) {
        self.add(
            InstKind::Branch { then_target, else_target },
            TypeId::VOID,
            vec![cond],
            "",
        );
    }

    pub fn ret(&mut self, value: Option<Value>) {
        self.add(
            InstKind::Return,
            TypeId::VOID,
            value.into_iter().collect(),
            "",
        );
    }
}

//! Expression lowering.

use scatha_ast::{BinaryOp, ConstValue, NodeId, NodeKind, UnaryOp};
use scatha_ir::{
    ArithmeticOp, CompareMode, CompareOp, ConstantData, ConversionOp,
    InstKind, TypeId, UnaryOp as IrUnaryOp, Value,
};
use scatha_sema::{
    EntityId, EntityKind, FunctionKind, ObjectConversion, QualType,
    RefConversion,
};

use crate::value::{Loc, ParamCc, RetCc, Val};
use crate::ModuleGen;

impl ModuleGen<'_> {
    fn unit_val(&mut self) -> Val {
        let void = self.ctx.void_type();
        Val::register(Value::Undef(void), void)
    }

    fn sema_type(&self, node: NodeId) -> QualType {
        let ty = self.ast.qual_type(node);
        QualType {
            base: EntityId(ty.base.0),
            mutable: ty.mutable,
            refness: match ty.refness {
                scatha_ast::Refness::None => scatha_sema::Refness::None,
                scatha_ast::Refness::Reference => {
                    scatha_sema::Refness::Reference
                }
                scatha_ast::Refness::MutReference => {
                    scatha_sema::Refness::MutReference
                }
            },
        }
    }

    pub(crate) fn lower_expr(&mut self, node: NodeId) -> Val {
        let val = self.lower_expr_impl(node);
        self.apply_conversion(node, val)
    }

    fn lower_expr_impl(&mut self, node: NodeId) -> Val {
        match self.ast.kind(node).clone() {
            NodeKind::IntLiteral { value } => {
                let i64t = self.ctx.int_type(64);
                Val::register(
                    Value::IntConst { value, ty: i64t },
                    i64t,
                )
            }
            NodeKind::BoolLiteral { value } => {
                let b1 = self.ctx.bool_type();
                Val::register(
                    Value::IntConst { value: value as u64, ty: b1 },
                    b1,
                )
            }
            NodeKind::FloatLiteral { value } => {
                let f64t = self.ctx.float_type(64);
                Val::register(
                    Value::FloatConst { bits: value.to_bits(), ty: f64t },
                    f64t,
                )
            }
            NodeKind::StringLiteral { value } => {
                let i8t = self.ctx.int_type(8);
                let ty = self.ctx.array_type(i8t, value.len() as u64);
                let name = format!("str.{}", self.module.constant_data.len());
                let data = self.module.add_constant_data(ConstantData {
                    name,
                    ty,
                    bytes: value.into_bytes(),
                });
                let ptr = self.ctx.ptr_type();
                let i64t = self.ctx.int_type(64);
                let size = match self.ctx.type_data(ty) {
                    scatha_ir::TypeData::Array { count, .. } => *count,
                    _ => 0,
                };
                Val::register(Value::ConstData(data), ptr).with_size(
                    Value::IntConst { value: size, ty: i64t },
                )
            }
            NodeKind::Identifier { .. } => self.lower_identifier(node),
            NodeKind::BinaryExpr { op } => self.lower_binary(node, op),
            NodeKind::UnaryExpr { op } => self.lower_unary(node, op),
            NodeKind::CallExpr => self.lower_call(node),
            NodeKind::MemberAccess { member } => {
                self.lower_member_access(node, &member)
            }
            NodeKind::Subscript => self.lower_subscript(node),
            NodeKind::Conditional => self.lower_conditional(node),
            NodeKind::ListExpr => self.lower_list(node),
            _ => self.unit_val(),
        }
    }

    fn lower_identifier(&mut self, node: NodeId) -> Val {
        let Some(entity) = self.ast.entity(node).map(|e| EntityId(e.0))
        else {
            return self.unit_val();
        };
        // Locals and parameters.
        if let Some(slot) = self.state().locals.get(&entity).copied() {
            let mut val = Val::memory(slot.address, slot.ir_ty);
            val.array_size = slot.array_size;
            return val;
        }
        // Globals.
        if let Some(global) = self.globals.get(&entity).copied() {
            let EntityKind::Variable { ty, .. } = self.sym.entity(entity).kind
            else {
                return self.unit_val();
            };
            let ir_ty = self.map_base_type(ty.base);
            return Val::memory(Value::Global(global), ir_ty);
        }
        self.unit_val()
    }

    // # Conversions

    fn apply_conversion(&mut self, node: NodeId, val: Val) -> Val {
        let Some(applied) = self.analysis.conversions.get(&node).copied()
        else {
            return val;
        };
        let mut val = val;
        // Reference adaptation first.
        match applied.conversion.ref_conv {
            RefConversion::None | RefConversion::Dereference => {}
            RefConversion::MaterializeTemporary => {
                let address = self.address_of(val);
                let mut materialized = Val::memory(address, val.ir_ty);
                materialized.array_size = val.array_size;
                val = materialized;
            }
        }
        let to_ir = self.map_base_type(applied.to.base);
        use ObjectConversion::*;
        let op = match applied.conversion.obj_conv {
            None => return val,
            ArrayFixedToDynamic => {
                // The storage address becomes the data pointer; the count
                // rides in the side channel.
                let count = match self
                    .sym
                    .entity(applied.from.base)
                    .kind
                    .clone()
                {
                    EntityKind::ArrayType { count: Some(count), .. } => count,
                    _ => 0,
                };
                let address = self.address_of(val);
                let ptr = self.ctx.ptr_type();
                let i64t = self.ctx.int_type(64);
                return Val::register(address, ptr).with_size(
                    Value::IntConst { value: count, ty: i64t },
                );
            }
            ReinterpretArrayToByte | ReinterpretArrayFromByte
            | ReinterpretValue => {
                // Same bits, possibly a rescaled count.
                return self.reinterpret_array(val, applied.from, applied.to);
            }
            SsTrunc | SuTrunc | UsTrunc | UuTrunc => ConversionOp::Trunc,
            SsWiden | SuWiden => ConversionOp::Sext,
            UsWiden | UuWiden => ConversionOp::Zext,
            FloatTrunc => ConversionOp::Ftrunc,
            FloatWiden => ConversionOp::Fext,
            SignedToFloat => ConversionOp::StoF,
            UnsignedToFloat => ConversionOp::UtoF,
            FloatToSigned => ConversionOp::FtoS,
            FloatToUnsigned => ConversionOp::FtoU,
        };
        let value = self.to_register(val);
        let converted = self.emit(
            InstKind::Conversion(op),
            to_ir,
            vec![value],
            "conv",
        );
        Val::register(converted, to_ir)
    }

    fn reinterpret_array(
        &mut self,
        val: Val,
        from: QualType,
        to: QualType,
    ) -> Val {
        let (from_elem, to_elem) = match (
            &self.sym.entity(from.base).kind,
            &self.sym.entity(to.base).kind,
        ) {
            (
                EntityKind::ArrayType { elem: f, .. },
                EntityKind::ArrayType { elem: t, .. },
            ) => (*f, *t),
            _ => return val,
        };
        let from_size = self.sym.size_of(from_elem).unwrap_or(1).max(1);
        let to_size = self.sym.size_of(to_elem).unwrap_or(1).max(1);
        let Some(size) = val.array_size else { return val };
        if from_size == to_size {
            return val;
        }
        let i64t = self.ctx.int_type(64);
        let scaled = if from_size > to_size {
            self.emit(
                InstKind::Arithmetic(ArithmeticOp::Mul),
                i64t,
                vec![
                    size,
                    Value::IntConst { value: from_size / to_size, ty: i64t },
                ],
                "count",
            )
        } else {
            self.emit(
                InstKind::Arithmetic(ArithmeticOp::UDiv),
                i64t,
                vec![
                    size,
                    Value::IntConst { value: to_size / from_size, ty: i64t },
                ],
                "count",
            )
        };
        let mut out = val;
        out.array_size = Some(scaled);
        out
    }

    // # Operators

    fn lower_binary(&mut self, node: NodeId, op: BinaryOp) -> Val {
        let lhs = self.ast.child(node, 0);
        let rhs = self.ast.child(node, 1);
        if op == BinaryOp::Assign {
            let target = self.lower_expr(lhs);
            let value = self.lower_expr(rhs);
            let base = self.sema_type(lhs).base;
            let address = self.address_of(target);
            self.store_val(address, value, base);
            return self.unit_val();
        }
        if let Some(arith) = op.arithmetic_part() {
            let target = self.lower_expr(lhs);
            let value = self.lower_expr(rhs);
            let base = self.sema_type(lhs).base;
            let address = self.address_of(target);
            let current = self.emit_load(target.ir_ty, address, "load");
            let rhs_value = self.to_register(value);
            let ir_op = self.map_arithmetic(arith, base);
            let result = self.emit(
                InstKind::Arithmetic(ir_op),
                target.ir_ty,
                vec![current, rhs_value],
                "cmpd",
            );
            self.emit_store(address, result);
            return self.unit_val();
        }
        if op.is_logical() {
            return self.lower_short_circuit(node, op, lhs, rhs);
        }
        if op == BinaryOp::Comma {
            self.lower_expr(lhs);
            return self.lower_expr(rhs);
        }
        let lhs_val = self.lower_expr(lhs);
        let rhs_val = self.lower_expr(rhs);
        let base = self.operand_base(lhs);
        let a = self.to_register(lhs_val);
        let b = self.to_register(rhs_val);
        if op.is_comparison() {
            let mode = self.compare_mode(base);
            let cmp_op = match op {
                BinaryOp::Less => CompareOp::Less,
                BinaryOp::LessEq => CompareOp::LessEq,
                BinaryOp::Greater => CompareOp::Greater,
                BinaryOp::GreaterEq => CompareOp::GreaterEq,
                BinaryOp::Equal => CompareOp::Equal,
                _ => CompareOp::NotEqual,
            };
            let b1 = self.ctx.bool_type();
            let value = self.emit(
                InstKind::Compare { mode, op: cmp_op },
                b1,
                vec![a, b],
                "cmp",
            );
            return Val::register(value, b1);
        }
        let ir_op = self.map_arithmetic(op, base);
        let value = self.emit(
            InstKind::Arithmetic(ir_op),
            lhs_val.ir_ty,
            vec![a, b],
            "expr",
        );
        Val::register(value, lhs_val.ir_ty)
    }

    /// Type the operands were converted to, for signedness decisions.
    fn operand_base(&self, operand: NodeId) -> EntityId {
        match self.analysis.conversions.get(&operand) {
            Some(applied) => applied.to.base,
            None => self.sema_type(operand).base,
        }
    }

    fn compare_mode(&self, base: EntityId) -> CompareMode {
        if self.sym.is_float(base) {
            CompareMode::Float
        } else if matches!(self.sym.int_width(base), Some((_, true))) {
            CompareMode::Signed
        } else {
            CompareMode::Unsigned
        }
    }

    fn map_arithmetic(&self, op: BinaryOp, base: EntityId) -> ArithmeticOp {
        let float = self.sym.is_float(base);
        let signed = matches!(self.sym.int_width(base), Some((_, true)));
        match op {
            BinaryOp::Add if float => ArithmeticOp::FAdd,
            BinaryOp::Sub if float => ArithmeticOp::FSub,
            BinaryOp::Mul if float => ArithmeticOp::FMul,
            BinaryOp::Div if float => ArithmeticOp::FDiv,
            BinaryOp::Add => ArithmeticOp::Add,
            BinaryOp::Sub => ArithmeticOp::Sub,
            BinaryOp::Mul => ArithmeticOp::Mul,
            BinaryOp::Div if signed => ArithmeticOp::SDiv,
            BinaryOp::Div => ArithmeticOp::UDiv,
            BinaryOp::Rem if signed => ArithmeticOp::SRem,
            BinaryOp::Rem => ArithmeticOp::URem,
            BinaryOp::BitAnd => ArithmeticOp::And,
            BinaryOp::BitOr => ArithmeticOp::Or,
            BinaryOp::BitXor => ArithmeticOp::XOr,
            BinaryOp::LeftShift => ArithmeticOp::LShL,
            BinaryOp::RightShift if signed => ArithmeticOp::AShR,
            BinaryOp::RightShift => ArithmeticOp::LShR,
            _ => ArithmeticOp::Add,
        }
    }

    /// `&&` and `||` lower to explicit branches with a two-input phi at the
    /// join.
    fn lower_short_circuit(
        &mut self,
        _node: NodeId,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    ) -> Val {
        let b1 = self.ctx.bool_type();
        let lhs_val = self.lower_expr(lhs);
        let lhs_value = self.to_register(lhs_val);
        let lhs_block = self.state().block;
        let rhs_block = self.add_block("logical.rhs");
        let end_block = self.add_block("logical.end");
        if op == BinaryOp::LogicalAnd {
            self.emit_branch(lhs_value, rhs_block, end_block);
        } else {
            self.emit_branch(lhs_value, end_block, rhs_block);
        }
        self.switch_to(rhs_block);
        let rhs_val = self.lower_expr(rhs);
        let rhs_value = self.to_register(rhs_val);
        // The rhs may itself branch; the phi joins from the current block.
        let rhs_end = self.state().block;
        self.emit_goto(end_block);
        self.switch_to(end_block);
        let short_value = Value::IntConst {
            value: (op == BinaryOp::LogicalOr) as u64,
            ty: b1,
        };
        let state = self.state();
        let (func, block) = (state.func, state.block);
        let function = self.module.function_mut(func);
        let phi = function.new_inst(
            InstKind::Phi { preds: vec![lhs_block, rhs_end] },
            b1,
            vec![short_value, rhs_value],
            "logical",
        );
        function.insert_inst(block, 0, phi);
        Val::register(Value::Inst(phi), b1)
    }

    fn lower_unary(&mut self, node: NodeId, op: UnaryOp) -> Val {
        let operand = self.ast.child(node, 0);
        match op {
            UnaryOp::Promote => self.lower_expr(operand),
            UnaryOp::Negate => {
                let val = self.lower_expr(operand);
                let value = self.to_register(val);
                let base = self.sema_type(operand).base;
                if self.sym.is_float(base) {
                    let zero =
                        Value::FloatConst { bits: 0, ty: val.ir_ty };
                    let negated = self.emit(
                        InstKind::Arithmetic(ArithmeticOp::FSub),
                        val.ir_ty,
                        vec![zero, value],
                        "neg",
                    );
                    Val::register(negated, val.ir_ty)
                } else {
                    let negated = self.emit(
                        InstKind::UnaryArithmetic(IrUnaryOp::Neg),
                        val.ir_ty,
                        vec![value],
                        "neg",
                    );
                    Val::register(negated, val.ir_ty)
                }
            }
            UnaryOp::BitNot => {
                let val = self.lower_expr(operand);
                let value = self.to_register(val);
                let negated = self.emit(
                    InstKind::UnaryArithmetic(IrUnaryOp::BitNot),
                    val.ir_ty,
                    vec![value],
                    "bnt",
                );
                Val::register(negated, val.ir_ty)
            }
            UnaryOp::LogicalNot => {
                let val = self.lower_expr(operand);
                let value = self.to_register(val);
                let negated = self.emit(
                    InstKind::UnaryArithmetic(IrUnaryOp::LogNot),
                    val.ir_ty,
                    vec![value],
                    "lnt",
                );
                Val::register(negated, val.ir_ty)
            }
            UnaryOp::AddressOf => {
                let val = self.lower_expr(operand);
                let address = self.address_of(val);
                let ptr = self.ctx.ptr_type();
                Val::register(address, ptr)
            }
            UnaryOp::Deref => {
                let val = self.lower_expr(operand);
                let pointer = self.to_register(val);
                let pointee = self.sema_type(node);
                let ir_ty = self.map_base_type(pointee.base);
                Val::memory(pointer, ir_ty)
            }
        }
    }

    // # Calls

    fn lower_call(&mut self, node: NodeId) -> Val {
        let children = self.ast.children(node).to_vec();
        let callee = children[0];
        let args = &children[1..];
        let Some(target) = self.ast.entity(node).map(|e| EntityId(e.0))
        else {
            // Trivial construction: the value is the converted argument.
            if let Some(arg) = args.first() {
                return self.lower_expr(*arg);
            }
            return self.unit_val();
        };
        let EntityKind::Function { kind, smf, signature, .. } =
            &self.sym.entity(target).kind
        else {
            return self.unit_val();
        };
        let kind = *kind;
        let is_ctor = smf == &Some(scatha_sema::SpecialMemberFunction::New)
            && matches!(self.ast.kind(callee), NodeKind::Identifier { .. })
            && self.ast.is_decorated(callee)
            && self.ast.entity_category(callee)
                == scatha_ast::EntityCategory::Type;
        let signature = signature.clone();
        if is_ctor {
            // Construct into a fresh temporary.
            let struct_ty = signature.argument_types[0].base;
            let ir_ty = self.map_base_type(struct_ty);
            let slot = self.new_alloca(ir_ty, "ctor.tmp");
            let mut call_args = vec![slot];
            for (arg, param_ty) in
                args.iter().zip(&signature.argument_types[1..])
            {
                let val = self.lower_expr(*arg);
                call_args.push(self.lower_call_argument(val, *param_ty));
            }
            self.emit_native_call(target, call_args, None);
            return Val::memory(slot, ir_ty);
        }
        if kind == FunctionKind::Foreign {
            let mut call_args = Vec::new();
            for arg in args {
                let val = self.lower_expr(*arg);
                call_args.push(self.to_register(val));
            }
            let index = self.foreign.get(&target).copied().unwrap_or(0);
            let ret_ty = signature
                .return_type
                .map(|ty| self.map_qual_type(ty))
                .unwrap_or(TypeId::VOID);
            let mut operands = vec![Value::ForeignFunction(index)];
            operands.extend(call_args);
            let value =
                self.emit(InstKind::Call, ret_ty, operands, "ffi");
            return Val::register(value, ret_ty);
        }
        // Method calls receive the object as the leading argument.
        let mut lowered_args = Vec::new();
        let mut param_index = 0;
        if let NodeKind::MemberAccess { .. } = self.ast.kind(callee) {
            let object = self.ast.child(callee, 0);
            let val = self.lower_expr(object);
            let address = self.address_of(val);
            lowered_args.push(LoweredArg::Single(address));
            param_index = 1;
        }
        for arg in args {
            let val = self.lower_expr(*arg);
            let param_ty = signature.argument_types[param_index];
            let info =
                self.functions.get(&target).expect("declared").clone();
            match info.cc.params[param_index] {
                ParamCc::ArrayFat => {
                    let data = self.to_register(val);
                    let i64t = self.ctx.int_type(64);
                    let size = val.array_size.unwrap_or(Value::IntConst {
                        value: 0,
                        ty: i64t,
                    });
                    lowered_args.push(LoweredArg::Pair(data, size));
                }
                _ => {
                    lowered_args
                        .push(LoweredArg::Single(
                            self.lower_call_argument(val, param_ty),
                        ));
                }
            }
            param_index += 1;
        }
        let flat: Vec<Value> = lowered_args
            .into_iter()
            .flat_map(|arg| match arg {
                LoweredArg::Single(v) => vec![v],
                LoweredArg::Pair(a, b) => vec![a, b],
            })
            .collect();
        let result_ty = signature.return_type;
        self.emit_native_call(target, flat, result_ty)
    }

    /// Adapt one argument value to its parameter location.
    fn lower_call_argument(
        &mut self,
        val: Val,
        param_ty: QualType,
    ) -> Value {
        if param_ty.is_reference() {
            return self.address_of(val);
        }
        if self.is_dynamic_array(param_ty.base) {
            return self.to_register(val);
        }
        if self.scalar_register_type(param_ty.base) {
            return self.to_register(val);
        }
        // By-value class argument: the caller provides a copy.
        let ir_ty = self.map_base_type(param_ty.base);
        let tmp = self.new_alloca(ir_ty, "arg");
        let src = self.address_of(val);
        self.copy_object(tmp, src, param_ty);
        tmp
    }

    fn emit_native_call(
        &mut self,
        target: EntityId,
        args: Vec<Value>,
        result_ty: Option<QualType>,
    ) -> Val {
        let Some(info) = self.functions.get(&target).cloned() else {
            return self.unit_val();
        };
        let mut operands = vec![Value::Function(info.func)];
        match info.cc.ret {
            RetCc::Memory => {
                let ret_ty =
                    result_ty.or(info.signature.return_type).expect("sret");
                let ir_ty = self.map_base_type(ret_ty.base);
                let slot = self.new_alloca(ir_ty, "ret");
                operands.push(slot);
                operands.extend(args);
                self.emit(InstKind::Call, TypeId::VOID, operands, "");
                Val::memory(slot, ir_ty)
            }
            RetCc::Register => {
                operands.extend(args);
                let ret_ty =
                    result_ty.or(info.signature.return_type).expect("typed");
                let ir_ty = self.map_qual_type(ret_ty);
                let value =
                    self.emit(InstKind::Call, ir_ty, operands, "call");
                if ret_ty.is_reference() {
                    let pointee = self.map_base_type(ret_ty.base);
                    Val::memory(value, pointee)
                } else {
                    Val::register(value, ir_ty)
                }
            }
            RetCc::Void => {
                operands.extend(args);
                self.emit(InstKind::Call, TypeId::VOID, operands, "");
                self.unit_val()
            }
        }
    }

    // # Aggregates

    fn lower_member_access(&mut self, node: NodeId, member: &str) -> Val {
        let object = self.ast.child(node, 0);
        let object_ty = self.sema_type(object);
        // Array properties read the side channel.
        if let EntityKind::ArrayType { count, .. } =
            self.sym.entity(object_ty.base).kind
        {
            let val = self.lower_expr(object);
            let i64t = self.ctx.int_type(64);
            let size = val.array_size.unwrap_or(Value::IntConst {
                value: count.unwrap_or(0),
                ty: i64t,
            });
            return match member {
                "count" => Val::register(size, i64t),
                _ => {
                    let b1 = self.ctx.bool_type();
                    let zero = Value::IntConst { value: 0, ty: i64t };
                    let empty = self.emit(
                        InstKind::Compare {
                            mode: CompareMode::Signed,
                            op: CompareOp::Equal,
                        },
                        b1,
                        vec![size, zero],
                        "empty",
                    );
                    Val::register(empty, b1)
                }
            };
        }
        let val = self.lower_expr(object);
        let Some(entity) = self.ast.entity(node).map(|e| EntityId(e.0))
        else {
            return self.unit_val();
        };
        let EntityKind::Variable { ty, index, .. } =
            self.sym.entity(entity).kind
        else {
            return self.unit_val();
        };
        let member_ir = self.map_base_type(ty.base);
        match val.loc {
            Loc::Memory => {
                let struct_ir = val.ir_ty;
                let address = self.member_address(
                    struct_ir,
                    val.v,
                    index as usize,
                );
                Val::memory(address, member_ir)
            }
            Loc::Register => {
                let value = self.emit(
                    InstKind::ExtractValue { indices: vec![index as usize] },
                    member_ir,
                    vec![val.v],
                    member,
                );
                Val::register(value, member_ir)
            }
        }
    }

    fn lower_subscript(&mut self, node: NodeId) -> Val {
        let object = self.ast.child(node, 0);
        let index = self.ast.child(node, 1);
        let object_ty = self.sema_type(object);
        let val = self.lower_expr(object);
        let index_val = self.lower_expr(index);
        let index_value = self.to_register(index_val);
        let EntityKind::ArrayType { elem, count } =
            self.sym.entity(object_ty.base).kind
        else {
            return self.unit_val();
        };
        let elem_ir = self.map_base_type(elem);
        let ptr = self.ctx.ptr_type();
        let base = match count {
            // Fixed arrays index their storage directly.
            Some(_) => self.address_of(val),
            // Dynamic arrays index through the data pointer.
            None => self.to_register(val),
        };
        let address = self.emit(
            InstKind::GetElementPtr {
                elem_ty: elem_ir,
                member_indices: vec![],
            },
            ptr,
            vec![base, index_value],
            "elem",
        );
        Val::memory(address, elem_ir)
    }

    fn lower_conditional(&mut self, node: NodeId) -> Val {
        let children = self.ast.children(node).to_vec();
        let cond = self.lower_expr(children[0]);
        let cond_value = self.to_register(cond);
        let then_block = self.add_block("cond.then");
        let else_block = self.add_block("cond.else");
        let end_block = self.add_block("cond.end");
        self.emit_branch(cond_value, then_block, else_block);
        self.switch_to(then_block);
        let then_val = self.lower_expr(children[1]);
        let then_value = self.to_register(then_val);
        let then_end = self.state().block;
        self.emit_goto(end_block);
        self.switch_to(else_block);
        let else_val = self.lower_expr(children[2]);
        let else_value = self.to_register(else_val);
        let else_end = self.state().block;
        self.emit_goto(end_block);
        self.switch_to(end_block);
        let state = self.state();
        let (func, block) = (state.func, state.block);
        let function = self.module.function_mut(func);
        let phi = function.new_inst(
            InstKind::Phi { preds: vec![then_end, else_end] },
            then_val.ir_ty,
            vec![then_value, else_value],
            "cond",
        );
        function.insert_inst(block, 0, phi);
        Val::register(Value::Inst(phi), then_val.ir_ty)
    }

    fn lower_list(&mut self, node: NodeId) -> Val {
        let children = self.ast.children(node).to_vec();
        let array_ty = self.sema_type(node);
        let EntityKind::ArrayType { elem, .. } =
            self.sym.entity(array_ty.base).kind
        else {
            return self.unit_val();
        };
        let elem_ir = self.map_base_type(elem);
        let array_ir = self.map_base_type(array_ty.base);
        let slot = self.new_alloca(array_ir, "list");
        let ptr = self.ctx.ptr_type();
        let i64t = self.ctx.int_type(64);
        for (index, child) in children.iter().enumerate() {
            let val = self.lower_expr(*child);
            let address = self.emit(
                InstKind::GetElementPtr {
                    elem_ty: elem_ir,
                    member_indices: vec![],
                },
                ptr,
                vec![
                    slot,
                    Value::IntConst { value: index as u64, ty: i64t },
                ],
                "elem",
            );
            self.store_val(address, val, elem);
        }
        Val::memory(slot, array_ir)
    }
}

enum LoweredArg {
    Single(Value),
    Pair(Value, Value),
}

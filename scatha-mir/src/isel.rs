//! Instruction selection.
//!
//! For every IR basic block a selection DAG is built and traversed in
//! reverse topological order; each node expands into a short sequence of
//! MIR instructions appended to the target block. Allocas anywhere in the
//! function are folded into one stack-frame prologue (`lincsp`) with
//! per-alloca offsets; phi nodes become staged register copies in the
//! predecessor blocks.

use std::collections::HashMap;

use scatha_asm::{
    ArithmeticOperation, CompareOperation, Conversion, ScalarType,
    UnaryArithmeticOperation, Width,
};
use scatha_ir::{
    ArithmeticOp, BlockId, CompareMode, CompareOp, Context, ConversionOp,
    Function, InstId, InstKind, Module, TypeData, TypeId, UnaryOp, Value,
};

use crate::dag::SelectionDag;
use crate::mir::{
    MirAddr, MirBlock, MirBlockId, MirCallee, MirFunction, MirInst, Operand,
    Reg, SsaReg,
};
use crate::LowerError;

pub(crate) struct FnSelector<'a> {
    ctx: &'a Context,
    module: &'a Module,
    function: &'a Function,
    pub(crate) mir: MirFunction,
    value_regs: HashMap<InstId, SsaReg>,
    alloca_map: HashMap<InstId, u64>,
    frame_reg: Option<SsaReg>,
    block_map: HashMap<BlockId, MirBlockId>,
    current: usize,
}

impl<'a> FnSelector<'a> {
    pub(crate) fn run(
        ctx: &'a Context,
        module: &'a Module,
        function: &'a Function,
    ) -> Result<MirFunction, LowerError> {
        let mut mir = MirFunction {
            name: function.name.clone(),
            ..MirFunction::default()
        };
        mir.param_regs = function.params.len() as u16;
        // Parameters occupy the first SSA registers.
        for _ in &function.params {
            mir.new_ssa();
        }
        let mut selector = FnSelector {
            ctx,
            module,
            function,
            mir,
            value_regs: HashMap::new(),
            alloca_map: HashMap::new(),
            frame_reg: None,
            block_map: HashMap::new(),
            current: 0,
        };
        selector.select_function()?;
        Ok(selector.mir)
    }

    fn select_function(&mut self) -> Result<(), LowerError> {
        for block in self.function.block_ids() {
            let id = MirBlockId(self.mir.blocks.len() as u32);
            self.mir.blocks.push(MirBlock {
                name: self.function.block_name(block).to_owned(),
                insts: Vec::new(),
            });
            self.block_map.insert(block, id);
        }
        self.build_frame();
        for block in self.function.block_ids().collect::<Vec<_>>() {
            self.current = self.block_map[&block].0 as usize;
            let dag = SelectionDag::build(self.function, block);
            for inst in dag.schedule() {
                self.select_inst(inst)?;
            }
        }
        self.destroy_phis();
        Ok(())
    }

    /// Combine every static alloca into one frame prologue and materialize
    /// the per-alloca addresses.
    fn build_frame(&mut self) {
        let mut offset = 0u64;
        let mut allocas = Vec::new();
        for inst in self.function.inst_ids() {
            let InstKind::Alloca { allocated_ty } =
                self.function.inst(inst).kind
            else {
                continue;
            };
            let layout = self.ctx.layout(allocated_ty);
            let align = layout.align.max(1);
            offset = offset.div_ceil(align) * align;
            self.alloca_map.insert(inst, offset);
            allocas.push(inst);
            offset += layout.size;
        }
        if allocas.is_empty() {
            return;
        }
        let frame_bytes = offset.div_ceil(8) * 8;
        let frame = self.mir.new_ssa();
        self.frame_reg = Some(frame);
        self.current = 0;
        self.push(MirInst::LIncSp {
            dest: Operand::Reg(Reg::Ssa(frame)),
            bytes: frame_bytes as u16,
        });
        for inst in allocas {
            let dest = self.mir.new_ssa();
            self.value_regs.insert(inst, dest);
            let offset = self.alloca_map[&inst];
            self.emit_address_of(
                Reg::Ssa(dest),
                Reg::Ssa(frame),
                offset,
            );
        }
    }

    /// `dest = base + offset`, through `lea` when the offset fits.
    fn emit_address_of(&mut self, dest: Reg, base: Reg, offset: u64) {
        if offset <= u8::MAX as u64 {
            self.push(MirInst::Lea {
                dest: Operand::Reg(dest),
                addr: MirAddr::offset(base, offset as u8),
            });
        } else {
            self.push(MirInst::Mov {
                dest: Operand::Reg(dest),
                src: Operand::Reg(base),
                width: Width::W64,
            });
            self.push(MirInst::Arith {
                op: ArithmeticOperation::Add,
                width: Width::W64,
                dest: Operand::Reg(dest),
                src: Operand::Const(offset, Width::W64),
            });
        }
    }

    fn push(&mut self, inst: MirInst) {
        self.mir.blocks[self.current].insts.push(inst);
    }

    // # Operand mapping

    fn int_bits(&self, ty: TypeId) -> u32 {
        match self.ctx.type_data(ty) {
            TypeData::Int { bits } => *bits,
            _ => 64,
        }
    }

    /// Width of loads, stores and compares of a type.
    fn access_width(&self, ty: TypeId) -> Width {
        let size = self.ctx.size_of(ty).clamp(1, 8);
        Width::from_bytes(size.next_power_of_two() as usize)
            .unwrap_or(Width::W64)
    }

    /// Width of arithmetic on a type: the VM has 32 and 64 bit ALU ops,
    /// narrower integers compute in 64 bits on zero-extended cells.
    fn alu_width(&self, ty: TypeId) -> Width {
        match self.ctx.type_data(ty) {
            TypeData::Int { bits: 32 } => Width::W32,
            TypeData::Float { bits: 32 } => Width::W32,
            _ => Width::W64,
        }
    }

    fn reg_of(&mut self, inst: InstId) -> SsaReg {
        if let Some(reg) = self.value_regs.get(&inst) {
            return *reg;
        }
        let reg = self.mir.new_ssa();
        self.value_regs.insert(inst, reg);
        reg
    }

    /// Operand for a value; constants stay immediates, addresses
    /// materialize lazily.
    fn operand(&mut self, value: Value) -> Operand {
        match value {
            Value::Inst(inst) => Operand::Reg(Reg::Ssa(self.reg_of(inst))),
            Value::Param(index) => {
                Operand::Reg(Reg::Ssa(SsaReg(index)))
            }
            Value::IntConst { value, .. } => Operand::Const(value, Width::W64),
            Value::FloatConst { bits, .. } => {
                Operand::Const(bits, Width::W64)
            }
            Value::Undef(_) => Operand::Undef,
            Value::Function(func) => Operand::FuncAddr(func),
            Value::ConstData(data) => Operand::DataAddr(data),
            Value::Global(global) => Operand::GlobalAddr(global),
            Value::Builtin(_) | Value::ForeignFunction(_) => Operand::Undef,
        }
    }

    /// Force a value into a register.
    fn reg_operand(&mut self, value: Value) -> Reg {
        match self.operand(value) {
            Operand::Reg(reg) => reg,
            other => {
                let dest = Reg::Ssa(self.mir.new_ssa());
                self.push(MirInst::Mov {
                    dest: Operand::Reg(dest),
                    src: other,
                    width: Width::W64,
                });
                dest
            }
        }
    }

    /// Copy a value into a fresh register that may be clobbered in place.
    fn scratch_copy(&mut self, value: Value) -> Reg {
        let dest = Reg::Ssa(self.mir.new_ssa());
        let src = self.operand(value);
        self.push(MirInst::Mov {
            dest: Operand::Reg(dest),
            src,
            width: Width::W64,
        });
        dest
    }

    // # Selection

    fn select_inst(&mut self, inst: InstId) -> Result<(), LowerError> {
        let data = self.function.inst(inst);
        match data.kind.clone() {
            // Folded into the frame prologue.
            InstKind::Alloca { .. } => Ok(()),
            // Becomes copies in the predecessors.
            InstKind::Phi { .. } => {
                self.reg_of(inst);
                Ok(())
            }
            InstKind::Load => self.select_load(inst),
            InstKind::Store => self.select_store(inst),
            InstKind::Arithmetic(op) => self.select_arithmetic(inst, op),
            InstKind::UnaryArithmetic(op) => self.select_unary(inst, op),
            InstKind::Compare { mode, op } => {
                self.select_compare(inst, mode, op)
            }
            InstKind::Conversion(op) => self.select_conversion(inst, op),
            InstKind::GetElementPtr { elem_ty, member_indices } => {
                self.select_gep(inst, elem_ty, &member_indices)
            }
            InstKind::ExtractValue { indices } => {
                self.select_extract(inst, &indices)
            }
            InstKind::InsertValue { indices } => {
                self.select_insert(inst, &indices)
            }
            InstKind::Select => self.select_select(inst),
            InstKind::Call => self.select_call(inst),
            InstKind::Goto { target } => {
                let target = self.block_map[&target];
                self.push(MirInst::Jump { cond: None, target });
                Ok(())
            }
            InstKind::Branch { then_target, else_target } => {
                let cond = self.function.inst(inst).operands[0];
                let operand = self.operand(cond);
                self.push(MirInst::Test {
                    ty: ScalarType::Unsigned,
                    width: Width::W8,
                    operand,
                });
                let then_target = self.block_map[&then_target];
                let else_target = self.block_map[&else_target];
                self.push(MirInst::Jump {
                    cond: Some(CompareOperation::NotEq),
                    target: then_target,
                });
                self.push(MirInst::Jump { cond: None, target: else_target });
                Ok(())
            }
            InstKind::Return => {
                let value = self
                    .function
                    .inst(inst)
                    .operands
                    .first()
                    .map(|v| self.operand(*v));
                self.push(MirInst::Return { value });
                Ok(())
            }
        }
    }

    fn select_load(&mut self, inst: InstId) -> Result<(), LowerError> {
        let data = self.function.inst(inst);
        let ty = data.ty;
        let address = data.operands[0];
        let width = self.access_width(ty);
        let base = self.reg_operand(address);
        let dest = Reg::Ssa(self.reg_of(inst));
        self.push(MirInst::Mov {
            dest: Operand::Reg(dest),
            src: Operand::Mem(MirAddr::base(base)),
            width,
        });
        Ok(())
    }

    fn select_store(&mut self, inst: InstId) -> Result<(), LowerError> {
        let data = self.function.inst(inst);
        let address = data.operands[0];
        let value = data.operands[1];
        let ty = match value {
            Value::Inst(def) => self.function.inst(def).ty,
            Value::Param(index) => {
                self.function.params[index as usize].ty
            }
            Value::IntConst { ty, .. }
            | Value::FloatConst { ty, .. }
            | Value::Undef(ty) => ty,
            _ => TypeId::VOID,
        };
        let width = self.access_width(ty);
        let base = self.reg_operand(address);
        let src = self.reg_operand(value);
        self.push(MirInst::Mov {
            dest: Operand::Mem(MirAddr::base(base)),
            src: Operand::Reg(src),
            width,
        });
        Ok(())
    }

    fn select_arithmetic(
        &mut self,
        inst: InstId,
        op: ArithmeticOp,
    ) -> Result<(), LowerError> {
        let data = self.function.inst(inst);
        let ty = data.ty;
        let (lhs, rhs) = (data.operands[0], data.operands[1]);
        let bits = self.int_bits(ty);
        let signed_narrow = matches!(
            op,
            ArithmeticOp::SDiv | ArithmeticOp::SRem | ArithmeticOp::AShR
        ) && bits < 32;
        let width = self.alu_width(ty);
        let dest = Reg::Ssa(self.reg_of(inst));
        let src_op = self.operand(lhs);
        self.push(MirInst::Mov {
            dest: Operand::Reg(dest),
            src: src_op,
            width: Width::W64,
        });
        let mut src = self.operand(rhs);
        if signed_narrow {
            // Sign-extend copies so 64 bit signed ops see proper values.
            self.push(MirInst::Convert {
                conv: sext_conversion(bits),
                operand: Operand::Reg(dest),
            });
            let tmp = self.scratch_copy(rhs);
            self.push(MirInst::Convert {
                conv: sext_conversion(bits),
                operand: Operand::Reg(tmp),
            });
            src = Operand::Reg(tmp);
        }
        // Shift immediates encode in one byte.
        if let (true, Operand::Const(value, _)) =
            (is_shift(op), src)
        {
            src = Operand::Const(value & 0xFF, Width::W8);
        }
        self.push(MirInst::Arith {
            op: map_arithmetic(op),
            width,
            dest: Operand::Reg(dest),
            src,
        });
        Ok(())
    }

    fn select_unary(
        &mut self,
        inst: InstId,
        op: UnaryOp,
    ) -> Result<(), LowerError> {
        let data = self.function.inst(inst);
        let ty = data.ty;
        let operand = data.operands[0];
        let dest = Reg::Ssa(self.reg_of(inst));
        let src = self.operand(operand);
        self.push(MirInst::Mov {
            dest: Operand::Reg(dest),
            src,
            width: Width::W64,
        });
        let (op, width) = match op {
            UnaryOp::LogNot => {
                (UnaryArithmeticOperation::LogicalNot, Width::W64)
            }
            UnaryOp::BitNot => {
                (UnaryArithmeticOperation::BitwiseNot, Width::W64)
            }
            UnaryOp::Neg => {
                (UnaryArithmeticOperation::Negate, self.access_width(ty))
            }
        };
        self.push(MirInst::Unary {
            op,
            width,
            operand: Operand::Reg(dest),
        });
        Ok(())
    }

    fn select_compare(
        &mut self,
        inst: InstId,
        mode: CompareMode,
        op: CompareOp,
    ) -> Result<(), LowerError> {
        let data = self.function.inst(inst);
        let (lhs, rhs) = (data.operands[0], data.operands[1]);
        let operand_ty = match lhs {
            Value::Inst(def) => self.function.inst(def).ty,
            Value::Param(index) => self.function.params[index as usize].ty,
            Value::IntConst { ty, .. }
            | Value::FloatConst { ty, .. }
            | Value::Undef(ty) => ty,
            _ => TypeId::VOID,
        };
        let ty = match mode {
            CompareMode::Signed => ScalarType::Signed,
            CompareMode::Unsigned => ScalarType::Unsigned,
            CompareMode::Float => ScalarType::Float,
        };
        let width = self.access_width(operand_ty);
        let lhs = self.reg_operand(lhs);
        let rhs = match self.operand(rhs) {
            Operand::Const(value, _) => Operand::Const(value, width),
            Operand::Reg(reg) => Operand::Reg(reg),
            other => {
                let reg = Reg::Ssa(self.mir.new_ssa());
                self.push(MirInst::Mov {
                    dest: Operand::Reg(reg),
                    src: other,
                    width: Width::W64,
                });
                Operand::Reg(reg)
            }
        };
        self.push(MirInst::Compare {
            ty,
            width,
            lhs: Operand::Reg(lhs),
            rhs,
        });
        let dest = Reg::Ssa(self.reg_of(inst));
        self.push(MirInst::Set {
            dest: Operand::Reg(dest),
            op: map_compare(op),
        });
        Ok(())
    }

    fn select_conversion(
        &mut self,
        inst: InstId,
        op: ConversionOp,
    ) -> Result<(), LowerError> {
        let data = self.function.inst(inst);
        let operand = data.operands[0];
        let to_ty = data.ty;
        let from_ty = match operand {
            Value::Inst(def) => self.function.inst(def).ty,
            Value::Param(index) => self.function.params[index as usize].ty,
            Value::IntConst { ty, .. }
            | Value::FloatConst { ty, .. }
            | Value::Undef(ty) => ty,
            _ => TypeId::VOID,
        };
        let dest = Reg::Ssa(self.reg_of(inst));
        let src = self.operand(operand);
        self.push(MirInst::Mov {
            dest: Operand::Reg(dest),
            src,
            width: Width::W64,
        });
        let from_bits = self.int_bits(from_ty);
        let to_bits = self.int_bits(to_ty);
        match op {
            // Cells are zero-extended, so a zero extension is the copy.
            ConversionOp::Zext | ConversionOp::Bitcast => {}
            ConversionOp::Trunc => {
                if to_bits < 64 {
                    let mask = (1u128 << to_bits) - 1;
                    self.push(MirInst::Arith {
                        op: ArithmeticOperation::And,
                        width: Width::W64,
                        dest: Operand::Reg(dest),
                        src: Operand::Const(mask as u64, Width::W64),
                    });
                }
            }
            ConversionOp::Sext => {
                self.push(MirInst::Convert {
                    conv: sext_conversion(from_bits),
                    operand: Operand::Reg(dest),
                });
            }
            ConversionOp::Fext => self.push(MirInst::Convert {
                conv: Conversion::FExt,
                operand: Operand::Reg(dest),
            }),
            ConversionOp::Ftrunc => self.push(MirInst::Convert {
                conv: Conversion::FTrunc,
                operand: Operand::Reg(dest),
            }),
            ConversionOp::StoF => self.push(MirInst::Convert {
                conv: Conversion::SignedToFloat {
                    from: int_width(from_bits),
                    to: float_width(self.ctx, to_ty),
                },
                operand: Operand::Reg(dest),
            }),
            ConversionOp::UtoF => self.push(MirInst::Convert {
                conv: Conversion::UnsignedToFloat {
                    from: int_width(from_bits),
                    to: float_width(self.ctx, to_ty),
                },
                operand: Operand::Reg(dest),
            }),
            ConversionOp::FtoS => self.push(MirInst::Convert {
                conv: Conversion::FloatToSigned {
                    from: float_width(self.ctx, from_ty),
                    to: int_width(to_bits),
                },
                operand: Operand::Reg(dest),
            }),
            ConversionOp::FtoU => self.push(MirInst::Convert {
                conv: Conversion::FloatToUnsigned {
                    from: float_width(self.ctx, from_ty),
                    to: int_width(to_bits),
                },
                operand: Operand::Reg(dest),
            }),
        }
        Ok(())
    }

    fn select_gep(
        &mut self,
        inst: InstId,
        elem_ty: TypeId,
        member_indices: &[usize],
    ) -> Result<(), LowerError> {
        let data = self.function.inst(inst);
        let (base, index) = (data.operands[0], data.operands[1]);
        let elem_size = self.ctx.size_of(elem_ty);
        // Accumulated byte offset of the member chain.
        let mut member_offset = 0;
        let mut current = elem_ty;
        for member in member_indices {
            member_offset += self.ctx.offset_of(current, *member);
            current = self.ctx.member_type(current, *member);
        }
        let dest = Reg::Ssa(self.reg_of(inst));
        let base = self.reg_operand(base);
        match self.operand(index) {
            Operand::Const(value, _) => {
                let offset = member_offset + value * elem_size;
                self.emit_address_of(dest, base, offset);
            }
            index_op => {
                let index_reg = match index_op {
                    Operand::Reg(reg) => reg,
                    other => {
                        let reg = Reg::Ssa(self.mir.new_ssa());
                        self.push(MirInst::Mov {
                            dest: Operand::Reg(reg),
                            src: other,
                            width: Width::W64,
                        });
                        reg
                    }
                };
                if elem_size <= u8::MAX as u64
                    && member_offset <= u8::MAX as u64
                {
                    self.push(MirInst::Lea {
                        dest: Operand::Reg(dest),
                        addr: MirAddr {
                            base,
                            index: Some(index_reg),
                            multiplier: elem_size as u8,
                            inner_offset: member_offset as u8,
                        },
                    });
                } else {
                    let tmp = Reg::Ssa(self.mir.new_ssa());
                    self.push(MirInst::Mov {
                        dest: Operand::Reg(tmp),
                        src: Operand::Reg(index_reg),
                        width: Width::W64,
                    });
                    self.push(MirInst::Arith {
                        op: ArithmeticOperation::Mul,
                        width: Width::W64,
                        dest: Operand::Reg(tmp),
                        src: Operand::Const(elem_size, Width::W64),
                    });
                    self.push(MirInst::Mov {
                        dest: Operand::Reg(dest),
                        src: Operand::Reg(base),
                        width: Width::W64,
                    });
                    self.push(MirInst::Arith {
                        op: ArithmeticOperation::Add,
                        width: Width::W64,
                        dest: Operand::Reg(dest),
                        src: Operand::Reg(tmp),
                    });
                    if member_offset != 0 {
                        self.push(MirInst::Arith {
                            op: ArithmeticOperation::Add,
                            width: Width::W64,
                            dest: Operand::Reg(dest),
                            src: Operand::Const(member_offset, Width::W64),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn aggregate_field(
        &self,
        inst: InstId,
        indices: &[usize],
    ) -> (u64, u64) {
        let aggregate_ty = match self.function.inst(inst).operands[0] {
            Value::Inst(def) => self.function.inst(def).ty,
            Value::Param(index) => self.function.params[index as usize].ty,
            Value::Undef(ty) => ty,
            _ => TypeId::VOID,
        };
        let mut offset = 0;
        let mut current = aggregate_ty;
        for index in indices {
            offset += self.ctx.offset_of(current, *index);
            current = self.ctx.member_type(current, *index);
        }
        (offset, self.ctx.size_of(current))
    }

    fn select_extract(
        &mut self,
        inst: InstId,
        indices: &[usize],
    ) -> Result<(), LowerError> {
        let (offset, size) = self.aggregate_field(inst, indices);
        let aggregate = self.function.inst(inst).operands[0];
        let dest = Reg::Ssa(self.reg_of(inst));
        let src = self.operand(aggregate);
        self.push(MirInst::Mov {
            dest: Operand::Reg(dest),
            src,
            width: Width::W64,
        });
        if offset > 0 {
            self.push(MirInst::Arith {
                op: ArithmeticOperation::LShR,
                width: Width::W64,
                dest: Operand::Reg(dest),
                src: Operand::Const(offset * 8, Width::W8),
            });
        }
        if size < 8 {
            let mask = (1u128 << (size * 8)) - 1;
            self.push(MirInst::Arith {
                op: ArithmeticOperation::And,
                width: Width::W64,
                dest: Operand::Reg(dest),
                src: Operand::Const(mask as u64, Width::W64),
            });
        }
        Ok(())
    }

    fn select_insert(
        &mut self,
        inst: InstId,
        indices: &[usize],
    ) -> Result<(), LowerError> {
        let (offset, size) = self.aggregate_field(inst, indices);
        let data = self.function.inst(inst);
        let (aggregate, value) = (data.operands[0], data.operands[1]);
        let dest = Reg::Ssa(self.reg_of(inst));
        let src = self.operand(aggregate);
        self.push(MirInst::Mov {
            dest: Operand::Reg(dest),
            src,
            width: Width::W64,
        });
        let field_mask = if size >= 8 {
            u64::MAX
        } else {
            ((1u128 << (size * 8)) - 1) as u64
        };
        let hole = !(field_mask << (offset * 8).min(63));
        self.push(MirInst::Arith {
            op: ArithmeticOperation::And,
            width: Width::W64,
            dest: Operand::Reg(dest),
            src: Operand::Const(hole, Width::W64),
        });
        let tmp = self.scratch_copy(value);
        if size < 8 {
            self.push(MirInst::Arith {
                op: ArithmeticOperation::And,
                width: Width::W64,
                dest: Operand::Reg(tmp),
                src: Operand::Const(field_mask, Width::W64),
            });
        }
        if offset > 0 {
            self.push(MirInst::Arith {
                op: ArithmeticOperation::LShL,
                width: Width::W64,
                dest: Operand::Reg(tmp),
                src: Operand::Const(offset * 8, Width::W8),
            });
        }
        self.push(MirInst::Arith {
            op: ArithmeticOperation::Or,
            width: Width::W64,
            dest: Operand::Reg(dest),
            src: Operand::Reg(tmp),
        });
        Ok(())
    }

    fn select_select(&mut self, inst: InstId) -> Result<(), LowerError> {
        let data = self.function.inst(inst);
        let (cond, then_value, else_value) =
            (data.operands[0], data.operands[1], data.operands[2]);
        let dest = Reg::Ssa(self.reg_of(inst));
        let src = self.operand(else_value);
        self.push(MirInst::Mov {
            dest: Operand::Reg(dest),
            src,
            width: Width::W64,
        });
        let cond = self.operand(cond);
        self.push(MirInst::Test {
            ty: ScalarType::Unsigned,
            width: Width::W8,
            operand: cond,
        });
        let then_src = self.operand(then_value);
        self.push(MirInst::CMov {
            cond: CompareOperation::NotEq,
            dest: Operand::Reg(dest),
            src: then_src,
            width: Width::W64,
        });
        Ok(())
    }

    fn select_call(&mut self, inst: InstId) -> Result<(), LowerError> {
        let data = self.function.inst(inst);
        let callee = data.operands[0];
        let arg_values = data.operands[1..].to_vec();
        let has_result = self.ctx.type_data(data.ty) != &TypeData::Void;
        let dest = has_result
            .then(|| Operand::Reg(Reg::Ssa(self.reg_of(inst))));
        let mut args = Vec::with_capacity(arg_values.len());
        for value in arg_values {
            args.push(self.operand(value));
        }
        match callee {
            Value::Function(func) => self.push(MirInst::Call {
                callee: MirCallee::Function(func),
                args,
                dest,
            }),
            Value::Builtin(index) => self.push(MirInst::CallExt {
                foreign: false,
                index,
                args,
                dest,
            }),
            Value::ForeignFunction(decl) => {
                let index = self
                    .module
                    .foreign_functions
                    .get(decl as usize)
                    .map(|d| d.index as u16)
                    .unwrap_or(decl as u16);
                self.push(MirInst::CallExt {
                    foreign: true,
                    index,
                    args,
                    dest,
                });
            }
            other => {
                let reg = self.reg_operand(other);
                self.push(MirInst::Call {
                    callee: MirCallee::Register(reg),
                    args,
                    dest,
                });
            }
        }
        Ok(())
    }

    /// Phi nodes become staged copies in the predecessors: every incoming
    /// value is copied into a fresh temporary, then the temporaries are
    /// copied into the phi registers. The staging makes simultaneous phi
    /// swaps safe.
    fn destroy_phis(&mut self) {
        for block in self.function.block_ids().collect::<Vec<_>>() {
            let phis = self.function.phis(block);
            if phis.is_empty() {
                continue;
            }
            for pred in self.function.preds(block).to_vec() {
                let mut temps = Vec::new();
                for phi in &phis {
                    let value = self
                        .function
                        .phi_value_for(*phi, pred)
                        .unwrap_or(Value::Undef(TypeId::VOID));
                    let phi_reg = self.reg_of(*phi);
                    let tmp = self.mir.new_ssa();
                    temps.push((tmp, phi_reg, value));
                }
                let mir_pred = self.block_map[&pred].0 as usize;
                self.current = mir_pred;
                // Insert before the first jump at the block end; moves do
                // not disturb compare flags.
                let insert_at = self.mir.blocks[mir_pred]
                    .insts
                    .iter()
                    .position(|inst| matches!(inst, MirInst::Jump { .. }))
                    .unwrap_or(self.mir.blocks[mir_pred].insts.len());
                let mut copies = Vec::new();
                let mut staged = Vec::new();
                for (tmp, phi_reg, value) in temps {
                    let src = self.operand_pure(value);
                    copies.push(MirInst::Mov {
                        dest: Operand::Reg(Reg::Ssa(tmp)),
                        src,
                        width: Width::W64,
                    });
                    staged.push(MirInst::Mov {
                        dest: Operand::Reg(Reg::Ssa(phi_reg)),
                        src: Operand::Reg(Reg::Ssa(tmp)),
                        width: Width::W64,
                    });
                }
                copies.extend(staged);
                let block_insts = &mut self.mir.blocks[mir_pred].insts;
                for (offset, copy) in copies.into_iter().enumerate() {
                    block_insts.insert(insert_at + offset, copy);
                }
            }
        }
    }

    /// Operand lookup that must not emit instructions (used when splicing
    /// into already selected blocks).
    fn operand_pure(&mut self, value: Value) -> Operand {
        match value {
            Value::Inst(inst) => Operand::Reg(Reg::Ssa(self.reg_of(inst))),
            Value::Param(index) => Operand::Reg(Reg::Ssa(SsaReg(index))),
            Value::IntConst { value, .. } => Operand::Const(value, Width::W64),
            Value::FloatConst { bits, .. } => Operand::Const(bits, Width::W64),
            Value::Function(func) => Operand::FuncAddr(func),
            Value::ConstData(data) => Operand::DataAddr(data),
            Value::Global(global) => Operand::GlobalAddr(global),
            _ => Operand::Undef,
        }
    }
}

fn is_shift(op: ArithmeticOp) -> bool {
    matches!(
        op,
        ArithmeticOp::LShL
            | ArithmeticOp::LShR
            | ArithmeticOp::AShL
            | ArithmeticOp::AShR
    )
}

fn map_arithmetic(op: ArithmeticOp) -> ArithmeticOperation {
    match op {
        ArithmeticOp::Add => ArithmeticOperation::Add,
        ArithmeticOp::Sub => ArithmeticOperation::Sub,
        ArithmeticOp::Mul => ArithmeticOperation::Mul,
        ArithmeticOp::SDiv => ArithmeticOperation::SDiv,
        ArithmeticOp::UDiv => ArithmeticOperation::UDiv,
        ArithmeticOp::SRem => ArithmeticOperation::SRem,
        ArithmeticOp::URem => ArithmeticOperation::URem,
        ArithmeticOp::FAdd => ArithmeticOperation::FAdd,
        ArithmeticOp::FSub => ArithmeticOperation::FSub,
        ArithmeticOp::FMul => ArithmeticOperation::FMul,
        ArithmeticOp::FDiv => ArithmeticOperation::FDiv,
        ArithmeticOp::LShL => ArithmeticOperation::LShL,
        ArithmeticOp::LShR => ArithmeticOperation::LShR,
        ArithmeticOp::AShL => ArithmeticOperation::AShL,
        ArithmeticOp::AShR => ArithmeticOperation::AShR,
        ArithmeticOp::And => ArithmeticOperation::And,
        ArithmeticOp::Or => ArithmeticOperation::Or,
        ArithmeticOp::XOr => ArithmeticOperation::XOr,
    }
}

fn map_compare(op: CompareOp) -> CompareOperation {
    match op {
        CompareOp::Equal => CompareOperation::Eq,
        CompareOp::NotEqual => CompareOperation::NotEq,
        CompareOp::Less => CompareOperation::Less,
        CompareOp::LessEq => CompareOperation::LessEq,
        CompareOp::Greater => CompareOperation::Greater,
        CompareOp::GreaterEq => CompareOperation::GreaterEq,
    }
}

fn sext_conversion(from_bits: u32) -> Conversion {
    match from_bits {
        1 => Conversion::Sext1,
        8 => Conversion::Sext8,
        16 => Conversion::Sext16,
        _ => Conversion::Sext32,
    }
}

fn int_width(bits: u32) -> Width {
    match bits {
        0..=8 => Width::W8,
        9..=16 => Width::W16,
        17..=32 => Width::W32,
        _ => Width::W64,
    }
}

fn float_width(ctx: &Context, ty: TypeId) -> Width {
    match ctx.type_data(ty) {
        TypeData::Float { bits: 32 } => Width::W32,
        _ => Width::W64,
    }
}

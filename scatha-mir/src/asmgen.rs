//! MIR to assembly element stream.
//!
//! One label per basic block (function entry labels are tagged), one
//! element per MIR instruction translated through the opcode map tables.
//! Call pseudo instructions expand into argument staging moves, the call
//! itself with the register window offset, and a result copy.

use std::collections::HashMap;

use itertools::Itertools;
use scatha_asm::{
    AssemblyStream, Callee, DataBlock, Element, ExtFunctionKind, FfiFuncDecl,
    FfiLibDecl, FfiType, Instruction, Label, LabelId, MemoryAddress,
    MoveDest, RegisterIndex, Value, ValueOperand, Width,
};
use scatha_ir::{Context, Module, TypeData};

use crate::mir::{
    MirAddr, MirCallee, MirFunction, MirInst, MirModule, Operand, Reg,
};
use crate::LowerError;

/// Register slots between caller and callee windows for the saved stack
/// pointer, the register offset and the return address.
const CALL_METADATA_SIZE: u16 = 3;

pub(crate) fn emit_module(
    ctx: &Context,
    ir: &Module,
    mir: &MirModule,
) -> Result<AssemblyStream, LowerError> {
    let mut gen = AsmGen {
        stream: AssemblyStream::new(),
        next_label: 0,
        func_labels: Vec::new(),
        data_labels: Vec::new(),
        global_labels: Vec::new(),
    };
    // Labels for every function, constant data block and global.
    for function in &mir.functions {
        let label = gen.fresh_label();
        gen.func_labels.push((label, function.name.clone()));
    }
    for data in &ir.constant_data {
        let label = gen.fresh_label();
        gen.data_labels.push(label);
        let align = ctx.layout(data.ty).align.max(1) as usize;
        gen.stream.add_data(DataBlock {
            label,
            align,
            bytes: data.bytes.clone(),
        });
    }
    for global in &ir.globals {
        let label = gen.fresh_label();
        gen.global_labels.push(label);
        let align = ctx.layout(global.ty).align.max(8) as usize;
        gen.stream.add_data(DataBlock {
            label,
            align,
            bytes: global.initializer.clone(),
        });
    }
    gen.stream.ffi_decls = collect_ffi_decls(ctx, ir);
    for (index, function) in mir.functions.iter().enumerate() {
        gen.emit_function(index, function)?;
    }
    // The program entry is the function named `main`.
    gen.stream.entry = gen
        .func_labels
        .iter()
        .find(|(_, name)| name == "main")
        .map(|(label, _)| *label);
    Ok(gen.stream)
}

fn ffi_type_of(ctx: &Context, ty: scatha_ir::TypeId) -> FfiType {
    match ctx.type_data(ty) {
        TypeData::Void => FfiType::Void,
        TypeData::Int { bits: 0..=8 } => FfiType::Int8,
        TypeData::Int { bits: 9..=16 } => FfiType::Int16,
        TypeData::Int { bits: 17..=32 } => FfiType::Int32,
        TypeData::Int { .. } => FfiType::Int64,
        TypeData::Float { bits: 32 } => FfiType::Float,
        TypeData::Float { .. } => FfiType::Double,
        _ => FfiType::Pointer,
    }
}

fn collect_ffi_decls(ctx: &Context, ir: &Module) -> Vec<FfiLibDecl> {
    let mut by_library: HashMap<String, Vec<FfiFuncDecl>> = HashMap::new();
    for decl in &ir.foreign_functions {
        by_library.entry(decl.library.clone()).or_default().push(
            FfiFuncDecl {
                slot: 2,
                index: decl.index,
                name: decl.name.clone(),
                arg_types: decl
                    .param_types
                    .iter()
                    .map(|ty| ffi_type_of(ctx, *ty))
                    .collect(),
                return_type: ffi_type_of(ctx, decl.return_ty),
            },
        );
    }
    by_library
        .into_iter()
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .map(|(name, functions)| FfiLibDecl { name, functions })
        .collect()
}

struct AsmGen {
    stream: AssemblyStream,
    next_label: u64,
    func_labels: Vec<(LabelId, String)>,
    data_labels: Vec<LabelId>,
    global_labels: Vec<LabelId>,
}

impl AsmGen {
    fn fresh_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    fn emit_function(
        &mut self,
        index: usize,
        function: &MirFunction,
    ) -> Result<(), LowerError> {
        let delta = function.phys_regs + CALL_METADATA_SIZE;
        let (label, name) = self.func_labels[index].clone();
        self.stream.push_label(Label::function(label, name));
        // Block labels are local to the function.
        let block_labels: Vec<LabelId> = function
            .blocks
            .iter()
            .map(|_| self.fresh_label())
            .collect();
        for (block_index, block) in function.blocks.iter().enumerate() {
            self.stream.push_label(Label::new(
                block_labels[block_index],
                block.name.clone(),
            ));
            for inst in &block.insts {
                self.emit_inst(inst, delta, &block_labels)?;
            }
        }
        Ok(())
    }

    fn reg(&self, reg: Reg) -> RegisterIndex {
        match reg {
            Reg::Phys(phys) => RegisterIndex(phys.0 as u8),
            Reg::Ssa(_) => unreachable!("unallocated register"),
        }
    }

    fn addr(&self, addr: &MirAddr) -> MemoryAddress {
        match addr.index {
            Some(index) => MemoryAddress::indexed(
                self.reg(addr.base),
                self.reg(index),
                addr.multiplier,
                addr.inner_offset,
            ),
            None => {
                MemoryAddress::simple(self.reg(addr.base), addr.inner_offset)
            }
        }
    }

    fn constant(&self, value: u64, width: Width) -> Value {
        match width {
            Width::W8 => Value::V8(value as u8),
            Width::W16 => Value::V16(value as u16),
            Width::W32 => Value::V32(value as u32),
            Width::W64 => Value::V64(value),
        }
    }

    fn value_operand(&self, operand: &Operand) -> ValueOperand {
        match operand {
            Operand::Reg(reg) => ValueOperand::Register(self.reg(*reg)),
            Operand::Const(value, width) => {
                ValueOperand::Constant(self.constant(*value, *width))
            }
            Operand::Mem(addr) => ValueOperand::Memory(self.addr(addr)),
            Operand::FuncAddr(func) => ValueOperand::Constant(
                Value::LabelPosition(self.func_labels[func.0 as usize].0),
            ),
            Operand::DataAddr(data) => ValueOperand::Constant(
                Value::LabelPosition(self.data_labels[data.0 as usize]),
            ),
            Operand::GlobalAddr(global) => ValueOperand::Constant(
                Value::LabelPosition(self.global_labels[global.0 as usize]),
            ),
            Operand::Undef => ValueOperand::Constant(Value::V64(0)),
        }
    }

    fn move_dest(&self, operand: &Operand) -> MoveDest {
        match operand {
            Operand::Reg(reg) => MoveDest::Register(self.reg(*reg)),
            Operand::Mem(addr) => MoveDest::Memory(self.addr(addr)),
            _ => unreachable!("invalid move destination"),
        }
    }

    fn push(&mut self, inst: Instruction) {
        self.stream.push(Element::Inst(inst));
    }

    fn emit_inst(
        &mut self,
        inst: &MirInst,
        delta: u16,
        block_labels: &[LabelId],
    ) -> Result<(), LowerError> {
        match inst {
            MirInst::Mov { dest, src, width } => {
                self.push(Instruction::Move {
                    dest: self.move_dest(dest),
                    src: self.value_operand(src),
                    width: *width,
                });
            }
            MirInst::CMov { cond, dest, src, width } => {
                self.push(Instruction::CMove {
                    cond: *cond,
                    dest: self.reg_of(dest),
                    src: self.value_operand(src),
                    width: *width,
                });
            }
            MirInst::Lea { dest, addr } => {
                self.push(Instruction::Lea {
                    dest: self.reg_of(dest),
                    address: self.addr(addr),
                });
            }
            MirInst::LIncSp { dest, bytes } => {
                self.push(Instruction::LIncSP {
                    dest: self.reg_of(dest),
                    offset: *bytes,
                });
            }
            MirInst::Jump { cond, target } => {
                self.push(Instruction::Jump {
                    cond: *cond,
                    target: block_labels[target.0 as usize],
                });
            }
            MirInst::Compare { ty, width, lhs, rhs } => {
                self.push(Instruction::Compare {
                    ty: *ty,
                    width: *width,
                    lhs: self.reg_of(lhs),
                    rhs: self.value_operand(rhs),
                });
            }
            MirInst::Test { ty, width, operand } => {
                self.push(Instruction::Test {
                    ty: *ty,
                    width: *width,
                    operand: self.reg_of(operand),
                });
            }
            MirInst::Set { dest, op } => {
                self.push(Instruction::Set {
                    dest: self.reg_of(dest),
                    operation: *op,
                });
            }
            MirInst::Arith { op, width, dest, src } => {
                self.push(Instruction::Arithmetic {
                    op: *op,
                    width: *width,
                    dest: self.reg_of(dest),
                    src: self.value_operand(src),
                });
            }
            MirInst::Unary { op, width, operand } => {
                self.push(Instruction::UnaryArithmetic {
                    op: *op,
                    width: *width,
                    operand: self.reg_of(operand),
                });
            }
            MirInst::Convert { conv, operand } => {
                self.push(Instruction::Convert {
                    conv: *conv,
                    operand: self.reg_of(operand),
                });
            }
            MirInst::Call { callee, args, dest } => {
                self.stage_arguments(delta, args)?;
                let callee = match callee {
                    MirCallee::Function(func) => {
                        Callee::Label(self.func_labels[func.0 as usize].0)
                    }
                    MirCallee::Register(reg) => {
                        Callee::Register(self.reg(*reg))
                    }
                };
                self.push(Instruction::Call {
                    callee,
                    reg_offset: delta as u8,
                });
                if let Some(dest) = dest {
                    self.push(Instruction::Move {
                        dest: self.move_dest(dest),
                        src: ValueOperand::Register(RegisterIndex(
                            delta as u8,
                        )),
                        width: Width::W64,
                    });
                }
            }
            MirInst::CallExt { foreign, index, args, dest } => {
                self.stage_arguments(delta, args)?;
                self.push(Instruction::CallExt {
                    kind: if *foreign {
                        ExtFunctionKind::Foreign
                    } else {
                        ExtFunctionKind::Builtin
                    },
                    reg_offset: delta as u8,
                    index: *index,
                });
                if let Some(dest) = dest {
                    self.push(Instruction::Move {
                        dest: self.move_dest(dest),
                        src: ValueOperand::Register(RegisterIndex(
                            delta as u8,
                        )),
                        width: Width::W64,
                    });
                }
            }
            MirInst::Return { value } => {
                if let Some(value) = value {
                    // The caller reads the return value from the callee's
                    // window base.
                    if *value != Operand::Reg(Reg::Phys(crate::mir::PhysReg(0)))
                    {
                        self.push(Instruction::Move {
                            dest: MoveDest::Register(RegisterIndex(0)),
                            src: self.value_operand(value),
                            width: Width::W64,
                        });
                    }
                }
                self.push(Instruction::Return);
            }
            MirInst::Terminate => self.push(Instruction::Terminate),
        }
        Ok(())
    }

    fn reg_of(&self, operand: &Operand) -> RegisterIndex {
        match operand {
            Operand::Reg(reg) => self.reg(*reg),
            _ => unreachable!("register operand required"),
        }
    }

    /// Copy call arguments into the callee's register window.
    fn stage_arguments(
        &mut self,
        delta: u16,
        args: &[Operand],
    ) -> Result<(), LowerError> {
        if delta as usize + args.len() > u8::MAX as usize {
            return Err(LowerError::RegisterOverflow {
                function: String::new(),
                registers: delta as u32 + args.len() as u32,
            });
        }
        for (index, arg) in args.iter().enumerate() {
            self.push(Instruction::Move {
                dest: MoveDest::Register(RegisterIndex(
                    delta as u8 + index as u8,
                )),
                src: self.value_operand(arg),
                width: Width::W64,
            });
        }
        Ok(())
    }
}

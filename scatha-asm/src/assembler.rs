//! Two-pass assembler: emit, then patch.
//!
//! The emit pass walks the element stream in order and writes raw bytes. For
//! every label it records `(labelId, currentOffset)`; for every jump, call or
//! label-position immediate it writes a placeholder and logs the site. The
//! patch pass resolves each logged site against the label table. Jump sites
//! receive a signed 32 bit offset relative to the byte after the opcode, call
//! sites an absolute 32 bit text offset, and label-position immediates a
//! 64 bit value (function labels resolve to their text offset, data labels to
//! a static-data pointer).

use std::collections::HashMap;

use thiserror::Error;

use crate::element::{
    AssemblyStream, Callee, Element, Instruction, LabelId, MemoryAddress,
    MoveDest, Value, ValueOperand, Width,
};
use crate::map;
use crate::opcode::Opcode;
use crate::program::Program;
use crate::vptr::VirtualPointer;

/// Fatal assembler failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("unknown label id {0}")]
    UnknownLabel(u64),
    #[error("label id {0} defined twice")]
    DuplicateLabel(u64),
    #[error("no instruction encoding for {0}")]
    NoMatchingInstruction(String),
    #[error("jump offset out of range at text offset {0}")]
    JumpOffsetOutOfRange(usize),
    #[error("no entry label defined")]
    MissingEntry,
}

#[derive(Debug, Clone, Copy)]
enum PatchKind {
    /// 4 byte signed offset relative to the byte after the opcode.
    Rel32,
    /// 4 byte absolute text offset.
    Text32,
    /// 8 byte label position value.
    Position64,
}

#[derive(Debug, Clone, Copy)]
struct JumpSite {
    /// Offset of the placeholder bytes.
    placeholder: usize,
    /// Offset of the instruction's opcode byte.
    opcode_pos: usize,
    target: LabelId,
    kind: PatchKind,
}

#[derive(Debug, Clone, Copy)]
struct LabelInfo {
    offset: usize,
    is_data: bool,
}

/// Translate an assembly stream into a program image.
pub fn assemble(stream: &AssemblyStream) -> Result<Program, AssemblerError> {
    let mut ctx = Context::default();
    for element in stream.iter() {
        match element {
            Element::Label(label) => ctx.define_label(label.id, false)?,
            Element::Inst(inst) => ctx.translate(inst)?,
        }
    }
    let text_size = ctx.out.len();
    for block in &stream.data {
        let align = block.align.max(1);
        while ctx.out.len() % align != 0 {
            ctx.out.push(0);
        }
        ctx.define_label(block.label, true)?;
        ctx.out.extend_from_slice(&block.bytes);
    }
    ctx.patch()?;
    let start_address = match stream.entry {
        Some(entry) => {
            ctx.labels
                .get(&entry)
                .ok_or(AssemblerError::UnknownLabel(entry.0))?
                .offset as u64
        }
        None => 0,
    };
    Ok(Program {
        binary: ctx.out,
        text_size,
        start_address,
        ffi_decls: stream.ffi_decls.clone(),
    })
}

#[derive(Default)]
struct Context {
    out: Vec<u8>,
    labels: HashMap<LabelId, LabelInfo>,
    jump_sites: Vec<JumpSite>,
}

impl Context {
    fn define_label(
        &mut self,
        id: LabelId,
        is_data: bool,
    ) -> Result<(), AssemblerError> {
        let info = LabelInfo { offset: self.out.len(), is_data };
        if self.labels.insert(id, info).is_some() {
            return Err(AssemblerError::DuplicateLabel(id.0));
        }
        Ok(())
    }

    fn put_opcode(&mut self, opcode: Opcode) -> usize {
        let pos = self.out.len();
        self.out.push(opcode as u8);
        pos
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    fn put_address(&mut self, addr: &MemoryAddress) {
        self.out.extend_from_slice(&[
            addr.base.0,
            addr.offset_count,
            addr.offset_multiplier,
            addr.inner_offset,
        ]);
    }

    /// Write an immediate of `width` bytes; label positions log a patch site.
    fn put_value(
        &mut self,
        value: &Value,
        width: Width,
        opcode_pos: usize,
    ) -> Result<(), AssemblerError> {
        match value {
            Value::LabelPosition(target) => {
                debug_assert_eq!(width, Width::W64);
                self.jump_sites.push(JumpSite {
                    placeholder: self.out.len(),
                    opcode_pos,
                    target: *target,
                    kind: PatchKind::Position64,
                });
                self.put_bytes(&u64::MAX.to_le_bytes());
            }
            _ => {
                let bits = value.bits().expect("concrete value");
                self.put_bytes(&bits.to_le_bytes()[..width.bytes()]);
            }
        }
        Ok(())
    }

    fn put_label_placeholder(
        &mut self,
        target: LabelId,
        opcode_pos: usize,
        kind: PatchKind,
    ) {
        self.jump_sites.push(JumpSite {
            placeholder: self.out.len(),
            opcode_pos,
            target,
            kind,
        });
        self.put_bytes(&u32::MAX.to_le_bytes());
    }

    fn translate(&mut self, inst: &Instruction) -> Result<(), AssemblerError> {
        match inst {
            Instruction::Move { dest, src, width } => {
                let mapped = map::map_move(*dest, *src, *width).ok_or_else(
                    || AssemblerError::NoMatchingInstruction(format!("{inst:?}")),
                )?;
                let pos = self.put_opcode(mapped.opcode);
                match dest {
                    MoveDest::Register(reg) => self.put_bytes(&[reg.0]),
                    MoveDest::Memory(addr) => self.put_address(addr),
                }
                self.put_operand(src, mapped.access_width, pos)?;
            }
            Instruction::CMove { cond, dest, src, width } => {
                let mapped =
                    map::map_cmove(*cond, *src, *width).ok_or_else(|| {
                        AssemblerError::NoMatchingInstruction(format!("{inst:?}"))
                    })?;
                let pos = self.put_opcode(mapped.opcode);
                self.put_bytes(&[dest.0]);
                self.put_operand(src, mapped.access_width, pos)?;
            }
            Instruction::Jump { cond, target } => {
                let pos = self.put_opcode(map::map_jump(*cond));
                self.put_label_placeholder(*target, pos, PatchKind::Rel32);
            }
            Instruction::Call { callee, reg_offset } => {
                let pos = self.put_opcode(map::map_call(*callee));
                match callee {
                    Callee::Label(target) => {
                        self.put_label_placeholder(*target, pos, PatchKind::Text32);
                    }
                    Callee::Register(reg) => self.put_bytes(&[reg.0]),
                    Callee::Memory(addr) => self.put_address(addr),
                }
                self.put_bytes(&[*reg_offset]);
            }
            Instruction::CallExt { kind, reg_offset, index } => {
                self.put_opcode(map::map_call_ext(*kind));
                self.put_bytes(&[*reg_offset]);
                self.put_bytes(&index.to_le_bytes());
            }
            Instruction::Return => {
                self.put_opcode(Opcode::Ret);
            }
            Instruction::Terminate => {
                self.put_opcode(Opcode::Terminate);
            }
            Instruction::LIncSP { dest, offset } => {
                self.put_opcode(Opcode::LIncSP);
                self.put_bytes(&[dest.0]);
                self.put_bytes(&offset.to_le_bytes());
            }
            Instruction::Lea { dest, address } => {
                self.put_opcode(Opcode::Lea);
                self.put_bytes(&[dest.0]);
                self.put_address(address);
            }
            Instruction::Compare { ty, width, lhs, rhs } => {
                let opcode =
                    map::map_compare(*ty, *rhs, *width).ok_or_else(|| {
                        AssemblerError::NoMatchingInstruction(format!("{inst:?}"))
                    })?;
                let pos = self.put_opcode(opcode);
                self.put_bytes(&[lhs.0]);
                self.put_operand(rhs, *width, pos)?;
            }
            Instruction::Test { ty, width, operand } => {
                let opcode = map::map_test(*ty, *width).ok_or_else(|| {
                    AssemblerError::NoMatchingInstruction(format!("{inst:?}"))
                })?;
                self.put_opcode(opcode);
                self.put_bytes(&[operand.0]);
            }
            Instruction::Set { dest, operation } => {
                self.put_opcode(map::map_set(*operation));
                self.put_bytes(&[dest.0]);
            }
            Instruction::Arithmetic { op, width, dest, src } => {
                let opcode =
                    map::map_arithmetic(*op, *width, src).ok_or_else(|| {
                        AssemblerError::NoMatchingInstruction(format!("{inst:?}"))
                    })?;
                let pos = self.put_opcode(opcode);
                self.put_bytes(&[dest.0]);
                let imm_width = if op.is_shift() { Width::W8 } else { *width };
                self.put_operand(src, imm_width, pos)?;
            }
            Instruction::UnaryArithmetic { op, width, operand } => {
                let opcode =
                    map::map_unary_arithmetic(*op, *width).ok_or_else(|| {
                        AssemblerError::NoMatchingInstruction(format!("{inst:?}"))
                    })?;
                self.put_opcode(opcode);
                self.put_bytes(&[operand.0]);
            }
            Instruction::Convert { conv, operand } => {
                let opcode = map::map_conversion(*conv).ok_or_else(|| {
                    AssemblerError::NoMatchingInstruction(format!("{inst:?}"))
                })?;
                self.put_opcode(opcode);
                self.put_bytes(&[operand.0]);
            }
        }
        Ok(())
    }

    fn put_operand(
        &mut self,
        operand: &ValueOperand,
        width: Width,
        opcode_pos: usize,
    ) -> Result<(), AssemblerError> {
        match operand {
            ValueOperand::Register(reg) => self.put_bytes(&[reg.0]),
            ValueOperand::Memory(addr) => self.put_address(addr),
            ValueOperand::Constant(value) => {
                self.put_value(value, width, opcode_pos)?
            }
        }
        Ok(())
    }

    fn patch(&mut self) -> Result<(), AssemblerError> {
        for site in &self.jump_sites {
            let info = self
                .labels
                .get(&site.target)
                .ok_or(AssemblerError::UnknownLabel(site.target.0))?;
            match site.kind {
                PatchKind::Rel32 => {
                    let offset = info.offset as i64 - (site.opcode_pos as i64 + 1);
                    let offset = i32::try_from(offset).map_err(|_| {
                        AssemblerError::JumpOffsetOutOfRange(site.opcode_pos)
                    })?;
                    self.out[site.placeholder..site.placeholder + 4]
                        .copy_from_slice(&offset.to_le_bytes());
                }
                PatchKind::Text32 => {
                    let offset = u32::try_from(info.offset).map_err(|_| {
                        AssemblerError::JumpOffsetOutOfRange(site.opcode_pos)
                    })?;
                    self.out[site.placeholder..site.placeholder + 4]
                        .copy_from_slice(&offset.to_le_bytes());
                }
                PatchKind::Position64 => {
                    let bits = if info.is_data {
                        VirtualPointer::static_data(info.offset as u64).to_bits()
                    } else {
                        info.offset as u64
                    };
                    self.out[site.placeholder..site.placeholder + 8]
                        .copy_from_slice(&bits.to_le_bytes());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{
        ArithmeticOperation, DataBlock, Label, RegisterIndex, ScalarType,
    };

    fn reg(index: u8) -> RegisterIndex {
        RegisterIndex(index)
    }

    #[test]
    fn emits_simple_instruction_sequence() {
        let mut stream = AssemblyStream::new();
        stream.push_label(Label::function(LabelId(0), "main"));
        stream.push_inst(Instruction::Move {
            dest: MoveDest::Register(reg(0)),
            src: ValueOperand::Constant(Value::V64(42)),
            width: Width::W64,
        });
        stream.push_inst(Instruction::Terminate);
        stream.entry = Some(LabelId(0));
        let program = assemble(&stream).unwrap();
        assert_eq!(program.start_address, 0);
        assert_eq!(program.binary[0], Opcode::Mov64RV as u8);
        assert_eq!(program.binary[1], 0);
        assert_eq!(
            u64::from_le_bytes(program.binary[2..10].try_into().unwrap()),
            42
        );
        assert_eq!(program.binary[10], Opcode::Terminate as u8);
    }

    #[test]
    fn patches_backward_jump_relative_to_operand_start() {
        let mut stream = AssemblyStream::new();
        stream.push_label(Label::new(LabelId(1), "loop"));
        stream.push_inst(Instruction::Arithmetic {
            op: ArithmeticOperation::Add,
            width: Width::W64,
            dest: reg(0),
            src: ValueOperand::Constant(Value::V64(1)),
        });
        stream.push_inst(Instruction::Compare {
            ty: ScalarType::Signed,
            width: Width::W64,
            lhs: reg(0),
            rhs: ValueOperand::Constant(Value::V64(10)),
        });
        stream.push_inst(Instruction::Jump {
            cond: Some(crate::element::CompareOperation::Less),
            target: LabelId(1),
        });
        stream.push_inst(Instruction::Terminate);
        let program = assemble(&stream).unwrap();
        // add64RV is 10 bytes, scmp64RV is 10 bytes, the jl opcode sits at 20.
        assert_eq!(program.binary[20], Opcode::JL as u8);
        let rel =
            i32::from_le_bytes(program.binary[21..25].try_into().unwrap());
        assert_eq!(rel, 0 - 21);
    }

    #[test]
    fn resolves_data_labels_to_static_pointers() {
        let mut stream = AssemblyStream::new();
        stream.push_inst(Instruction::Move {
            dest: MoveDest::Register(reg(2)),
            src: ValueOperand::Constant(Value::LabelPosition(LabelId(7))),
            width: Width::W64,
        });
        stream.push_inst(Instruction::Terminate);
        stream.add_data(DataBlock {
            label: LabelId(7),
            align: 8,
            bytes: b"hello".to_vec(),
        });
        let program = assemble(&stream).unwrap();
        let bits = u64::from_le_bytes(program.binary[2..10].try_into().unwrap());
        let ptr = VirtualPointer::from_bits(bits);
        assert_eq!(ptr.slot, crate::vptr::STATIC_DATA_SLOT);
        assert_eq!(ptr.offset as usize, 16); // text is 11 bytes, padded to 16
        assert_eq!(&program.binary[16..21], b"hello");
    }

    #[test]
    fn unknown_label_is_fatal() {
        let mut stream = AssemblyStream::new();
        stream.push_inst(Instruction::Jump { cond: None, target: LabelId(9) });
        assert!(matches!(
            assemble(&stream),
            Err(AssemblerError::UnknownLabel(9))
        ));
    }
}

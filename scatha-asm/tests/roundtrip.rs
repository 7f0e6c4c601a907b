//! Assembler round-trip: `disassemble(assemble(stream))` preserves the
//! opcode sequence and operand encodings bit-exactly.

use rstest::rstest;
use scatha_asm::{
    assemble, disassemble, ArithmeticOperation, AssemblyStream,
    CompareOperation, Conversion, ExtFunctionKind, Instruction, Label,
    LabelId, MemoryAddress, MoveDest, Opcode, RegisterIndex, ScalarType,
    UnaryArithmeticOperation, Value, ValueOperand, Width,
};

fn reg(index: u8) -> RegisterIndex {
    RegisterIndex(index)
}

fn roundtrip(stream: &AssemblyStream) -> Vec<Opcode> {
    let program = assemble(stream).unwrap();
    let text = &program.binary[..program.text_size];
    let decoded = disassemble(text).unwrap();
    let mut reencoded = Vec::new();
    for inst in &decoded {
        inst.encode(&mut reencoded);
    }
    assert_eq!(&reencoded, text, "re-encoding must be bit-exact");
    decoded.iter().map(|inst| inst.opcode).collect()
}

#[test]
fn full_function_roundtrips() {
    let mut stream = AssemblyStream::new();
    stream.push_label(Label::function(LabelId(0), "main"));
    stream.push_inst(Instruction::LIncSP { dest: reg(2), offset: 16 });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(3)),
        src: ValueOperand::Constant(Value::V64(7)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Memory(MemoryAddress::simple(reg(2), 8)),
        src: ValueOperand::Register(reg(3)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Compare {
        ty: ScalarType::Signed,
        width: Width::W64,
        lhs: reg(3),
        rhs: ValueOperand::Constant(Value::V64(10)),
    });
    stream.push_inst(Instruction::Jump {
        cond: Some(CompareOperation::Less),
        target: LabelId(1),
    });
    stream.push_inst(Instruction::Set {
        dest: reg(4),
        operation: CompareOperation::GreaterEq,
    });
    stream.push_label(Label::new(LabelId(1), "exit"));
    stream.push_inst(Instruction::Return);
    stream.entry = Some(LabelId(0));

    let opcodes = roundtrip(&stream);
    assert_eq!(
        opcodes,
        vec![
            Opcode::LIncSP,
            Opcode::Mov64RV,
            Opcode::Mov64MR,
            Opcode::SCmp64RV,
            Opcode::JL,
            Opcode::SetGE,
            Opcode::Ret,
        ]
    );
}

#[rstest]
#[case(ArithmeticOperation::Add, Width::W64, Opcode::Add64RR)]
#[case(ArithmeticOperation::Sub, Width::W32, Opcode::Sub32RR)]
#[case(ArithmeticOperation::SDiv, Width::W64, Opcode::SDiv64RR)]
#[case(ArithmeticOperation::URem, Width::W32, Opcode::URem32RR)]
#[case(ArithmeticOperation::FMul, Width::W64, Opcode::FMul64RR)]
#[case(ArithmeticOperation::FDiv, Width::W32, Opcode::FDiv32RR)]
#[case(ArithmeticOperation::And, Width::W64, Opcode::And64RR)]
#[case(ArithmeticOperation::XOr, Width::W32, Opcode::XOr32RR)]
fn arithmetic_register_forms(
    #[case] op: ArithmeticOperation,
    #[case] width: Width,
    #[case] expected: Opcode,
) {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Arithmetic {
        op,
        width,
        dest: reg(1),
        src: ValueOperand::Register(reg(2)),
    });
    assert_eq!(roundtrip(&stream), vec![expected]);
}

#[rstest]
#[case(ArithmeticOperation::LShL, Opcode::LSL64RV)]
#[case(ArithmeticOperation::AShR, Opcode::ASR64RV)]
fn shift_immediates_are_one_byte(
    #[case] op: ArithmeticOperation,
    #[case] expected: Opcode,
) {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Arithmetic {
        op,
        width: Width::W64,
        dest: reg(0),
        src: ValueOperand::Constant(Value::V8(3)),
    });
    let program = assemble(&stream).unwrap();
    assert_eq!(program.binary.len(), 3);
    assert_eq!(program.binary[0], expected as u8);
    assert_eq!(program.binary[2], 3);
    roundtrip(&stream);
}

#[rstest]
#[case(Conversion::Sext8, Opcode::Sext8)]
#[case(Conversion::FExt, Opcode::FExt)]
#[case(
    Conversion::SignedToFloat { from: Width::W64, to: Width::W64 },
    Opcode::S64ToF64
)]
#[case(
    Conversion::FloatToUnsigned { from: Width::W32, to: Width::W16 },
    Opcode::F32ToU16
)]
fn conversions(#[case] conv: Conversion, #[case] expected: Opcode) {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Convert { conv, operand: reg(5) });
    assert_eq!(roundtrip(&stream), vec![expected]);
}

#[test]
fn conditional_moves_and_calls() {
    let mut stream = AssemblyStream::new();
    stream.push_label(Label::function(LabelId(3), "f"));
    stream.push_inst(Instruction::CMove {
        cond: CompareOperation::NotEq,
        dest: reg(1),
        src: ValueOperand::Memory(MemoryAddress::indexed(reg(2), reg(3), 8, 0)),
        width: Width::W32,
    });
    stream.push_inst(Instruction::Call {
        callee: scatha_asm::Callee::Label(LabelId(3)),
        reg_offset: 8,
    });
    stream.push_inst(Instruction::CallExt {
        kind: ExtFunctionKind::Builtin,
        reg_offset: 8,
        index: 17,
    });
    stream.push_inst(Instruction::UnaryArithmetic {
        op: UnaryArithmeticOperation::Negate,
        width: Width::W64,
        operand: reg(1),
    });
    stream.push_inst(Instruction::Terminate);
    let opcodes = roundtrip(&stream);
    assert_eq!(
        opcodes,
        vec![
            Opcode::CMovNE32RM,
            Opcode::Call,
            Opcode::CBltn,
            Opcode::Neg64,
            Opcode::Terminate,
        ]
    );
}

#[test]
fn call_target_is_absolute_text_offset() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Jump { cond: None, target: LabelId(0) });
    stream.push_label(Label::function(LabelId(0), "f"));
    stream.push_inst(Instruction::Call {
        callee: scatha_asm::Callee::Label(LabelId(0)),
        reg_offset: 5,
    });
    let program = assemble(&stream).unwrap();
    // jmp is 5 bytes, so the function label sits at offset 5.
    let dest = u32::from_le_bytes(program.binary[6..10].try_into().unwrap());
    assert_eq!(dest, 5);
    let rel = i32::from_le_bytes(program.binary[1..5].try_into().unwrap());
    assert_eq!(rel, 4);
}

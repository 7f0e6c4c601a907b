//! End-to-end interpreter behavior over assembled programs.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use scatha_asm::{
    assemble, ArithmeticOperation, AssemblyStream, Callee, CompareOperation,
    DataBlock, ExtFunctionKind, Instruction, Label, LabelId, MemoryAddress,
    MoveDest, RegisterIndex, ScalarType, Value, ValueOperand, Width,
};
use scatha_vm::{Builtin, MemoryAccessKind, VirtualMachine, VmError};

fn reg(index: u8) -> RegisterIndex {
    RegisterIndex(index)
}

fn run(stream: &AssemblyStream, args: &[u64]) -> Vec<u64> {
    let program = assemble(stream).unwrap();
    let mut vm = VirtualMachine::new();
    vm.load_binary(&program.to_bytes()).unwrap();
    let registers = vm.execute(args).unwrap();
    registers[..8].to_vec()
}

#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[rstest::rstest]
#[case(ArithmeticOperation::Add, 40, 2, 42)]
#[case(ArithmeticOperation::Sub, 50, 8, 42)]
#[case(ArithmeticOperation::Mul, 6, 7, 42)]
#[case(ArithmeticOperation::SDiv, 84, 2, 42)]
#[case(ArithmeticOperation::URem, 142, 100, 42)]
#[case(ArithmeticOperation::And, 0xFF, 0x2A, 42)]
#[case(ArithmeticOperation::LShL, 21, 1, 42)]
fn binary_arithmetic_register_register(
    #[case] op: ArithmeticOperation,
    #[case] a: u64,
    #[case] b: u64,
    #[case] expected: u64,
) {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Arithmetic {
        op,
        width: Width::W64,
        dest: reg(0),
        src: ValueOperand::Register(reg(1)),
    });
    stream.push_inst(Instruction::Terminate);
    assert_eq!(run(&stream, &[a, b])[0], expected);
}

#[test]
fn computes_arithmetic_into_register_zero() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(0)),
        src: ValueOperand::Constant(Value::V64(3)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Arithmetic {
        op: ArithmeticOperation::Mul,
        width: Width::W64,
        dest: reg(0),
        src: ValueOperand::Constant(Value::V64(4)),
    });
    stream.push_inst(Instruction::Arithmetic {
        op: ArithmeticOperation::Add,
        width: Width::W64,
        dest: reg(0),
        src: ValueOperand::Constant(Value::V64(2)),
    });
    stream.push_inst(Instruction::Terminate);
    assert_eq!(run(&stream, &[])[0], 14);
}

#[test]
fn loops_with_compare_and_jump() {
    // s = 0; for i in 0..5 { s += i }
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(0)),
        src: ValueOperand::Constant(Value::V64(0)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(1)),
        src: ValueOperand::Constant(Value::V64(0)),
        width: Width::W64,
    });
    stream.push_label(Label::new(LabelId(1), "loop"));
    stream.push_inst(Instruction::Arithmetic {
        op: ArithmeticOperation::Add,
        width: Width::W64,
        dest: reg(0),
        src: ValueOperand::Register(reg(1)),
    });
    stream.push_inst(Instruction::Arithmetic {
        op: ArithmeticOperation::Add,
        width: Width::W64,
        dest: reg(1),
        src: ValueOperand::Constant(Value::V64(1)),
    });
    stream.push_inst(Instruction::Compare {
        ty: ScalarType::Signed,
        width: Width::W64,
        lhs: reg(1),
        rhs: ValueOperand::Constant(Value::V64(5)),
    });
    stream.push_inst(Instruction::Jump {
        cond: Some(CompareOperation::Less),
        target: LabelId(1),
    });
    stream.push_inst(Instruction::Terminate);
    assert_eq!(run(&stream, &[])[0], 10);
}

#[test]
fn call_passes_arguments_and_returns() {
    // main: r0 = 20, r1 = 22; call add; result lands in the callee window.
    let mut stream = AssemblyStream::new();
    stream.push_label(Label::function(LabelId(0), "main"));
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(3)),
        src: ValueOperand::Constant(Value::V64(20)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(4)),
        src: ValueOperand::Constant(Value::V64(22)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Call {
        callee: Callee::Label(LabelId(1)),
        reg_offset: 3,
    });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(0)),
        src: ValueOperand::Register(reg(3)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Terminate);
    // add(a, b): r0 += r1; ret. Arguments arrive at the new window base.
    stream.push_label(Label::function(LabelId(1), "add"));
    stream.push_inst(Instruction::Arithmetic {
        op: ArithmeticOperation::Add,
        width: Width::W64,
        dest: reg(0),
        src: ValueOperand::Register(reg(1)),
    });
    stream.push_inst(Instruction::Return);
    stream.entry = Some(LabelId(0));
    assert_eq!(run(&stream, &[])[0], 42);
}

#[test]
fn ret_at_root_frame_terminates() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(0)),
        src: ValueOperand::Constant(Value::V64(7)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Return);
    assert_eq!(run(&stream, &[])[0], 7);
}

#[test]
fn stack_allocation_and_memory_round_trip() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::LIncSP { dest: reg(1), offset: 16 });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(2)),
        src: ValueOperand::Constant(Value::V64(0xdead)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Memory(MemoryAddress::simple(reg(1), 8)),
        src: ValueOperand::Register(reg(2)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(0)),
        src: ValueOperand::Memory(MemoryAddress::simple(reg(1), 8)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Terminate);
    assert_eq!(run(&stream, &[])[0], 0xdead);
}

#[test]
fn lincsp_rejects_unaligned_sizes() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::LIncSP { dest: reg(0), offset: 12 });
    stream.push_inst(Instruction::Terminate);
    let program = assemble(&stream).unwrap();
    let mut vm = VirtualMachine::new();
    vm.load_binary(&program.to_bytes()).unwrap();
    assert!(matches!(
        vm.execute(&[]),
        Err(VmError::InvalidStackAllocation(12))
    ));
}

#[test]
fn misaligned_store_is_an_error() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::LIncSP { dest: reg(1), offset: 16 });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Memory(MemoryAddress::simple(reg(1), 3)),
        src: ValueOperand::Register(reg(1)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Terminate);
    let program = assemble(&stream).unwrap();
    let mut vm = VirtualMachine::new();
    vm.load_binary(&program.to_bytes()).unwrap();
    assert!(matches!(
        vm.execute(&[]),
        Err(VmError::MemoryAccess {
            kind: MemoryAccessKind::MisalignedStore,
            ..
        })
    ));
}

#[test]
fn division_by_zero_raises() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(0)),
        src: ValueOperand::Constant(Value::V64(10)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Arithmetic {
        op: ArithmeticOperation::SDiv,
        width: Width::W64,
        dest: reg(0),
        src: ValueOperand::Constant(Value::V64(0)),
    });
    stream.push_inst(Instruction::Terminate);
    let program = assemble(&stream).unwrap();
    let mut vm = VirtualMachine::new();
    vm.load_binary(&program.to_bytes()).unwrap();
    assert!(matches!(vm.execute(&[]), Err(VmError::Arithmetic)));
}

#[test]
fn trap_builtin_aborts_execution() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::CallExt {
        kind: ExtFunctionKind::Builtin,
        reg_offset: 8,
        index: Builtin::Trap.index(),
    });
    stream.push_inst(Instruction::Terminate);
    let program = assemble(&stream).unwrap();
    let mut vm = VirtualMachine::new();
    vm.load_binary(&program.to_bytes()).unwrap();
    assert!(matches!(vm.execute(&[]), Err(VmError::Trap)));
}

#[test]
fn putstr_builtin_writes_constant_data() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(8)),
        src: ValueOperand::Constant(Value::LabelPosition(LabelId(5))),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(9)),
        src: ValueOperand::Constant(Value::V64(5)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::CallExt {
        kind: ExtFunctionKind::Builtin,
        reg_offset: 8,
        index: Builtin::Putstr.index(),
    });
    stream.push_inst(Instruction::Terminate);
    stream.add_data(DataBlock {
        label: LabelId(5),
        align: 8,
        bytes: b"hello".to_vec(),
    });
    let program = assemble(&stream).unwrap();
    let mut vm = VirtualMachine::new();
    vm.load_binary(&program.to_bytes()).unwrap();
    let buffer = SharedBuffer::default();
    vm.set_io(
        Box::new(io::BufReader::new(io::empty())),
        Box::new(buffer.clone()),
    );
    vm.execute(&[]).unwrap();
    assert_eq!(buffer.0.borrow().as_slice(), b"hello");
}

#[test]
fn alloc_and_memcpy_builtins() {
    let mut stream = AssemblyStream::new();
    // r8 = size, r9 = align -> alloc -> r8 = ptr
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(8)),
        src: ValueOperand::Constant(Value::V64(8)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(9)),
        src: ValueOperand::Constant(Value::V64(8)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::CallExt {
        kind: ExtFunctionKind::Builtin,
        reg_offset: 8,
        index: Builtin::Alloc.index(),
    });
    // Store 99 through the pointer, read it back.
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(2)),
        src: ValueOperand::Constant(Value::V64(99)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Memory(MemoryAddress::simple(reg(8), 0)),
        src: ValueOperand::Register(reg(2)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(0)),
        src: ValueOperand::Memory(MemoryAddress::simple(reg(8), 0)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Terminate);
    assert_eq!(run(&stream, &[])[0], 99);
}

#[test]
fn conditional_move_follows_flags() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(0)),
        src: ValueOperand::Constant(Value::V64(1)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Compare {
        ty: ScalarType::Signed,
        width: Width::W64,
        lhs: reg(0),
        rhs: ValueOperand::Constant(Value::V64(5)),
    });
    stream.push_inst(Instruction::CMove {
        cond: CompareOperation::Less,
        dest: reg(0),
        src: ValueOperand::Constant(Value::V64(77)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::CMove {
        cond: CompareOperation::Greater,
        dest: reg(0),
        src: ValueOperand::Constant(Value::V64(88)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Terminate);
    assert_eq!(run(&stream, &[])[0], 77);
}

#[test]
fn signed_compare_and_set_materialize_flags() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(1)),
        src: ValueOperand::Constant(Value::from_i64(-3)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Test {
        ty: ScalarType::Signed,
        width: Width::W64,
        operand: reg(1),
    });
    stream.push_inst(Instruction::Set {
        dest: reg(0),
        operation: CompareOperation::Less,
    });
    stream.push_inst(Instruction::Terminate);
    assert_eq!(run(&stream, &[])[0], 1);
}

#[test]
fn conversions_and_float_arithmetic() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(0)),
        src: ValueOperand::Constant(Value::from_i64(3)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Convert {
        conv: scatha_asm::Conversion::SignedToFloat {
            from: Width::W64,
            to: Width::W64,
        },
        operand: reg(0),
    });
    stream.push_inst(Instruction::Arithmetic {
        op: ArithmeticOperation::FMul,
        width: Width::W64,
        dest: reg(0),
        src: ValueOperand::Constant(Value::from_f64(1.5)),
    });
    stream.push_inst(Instruction::Convert {
        conv: scatha_asm::Conversion::FloatToSigned {
            from: Width::W64,
            to: Width::W64,
        },
        operand: reg(0),
    });
    stream.push_inst(Instruction::Terminate);
    assert_eq!(run(&stream, &[])[0], 4);
}

#[test]
fn arguments_arrive_in_the_register_window() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Arithmetic {
        op: ArithmeticOperation::Add,
        width: Width::W64,
        dest: reg(0),
        src: ValueOperand::Register(reg(1)),
    });
    stream.push_inst(Instruction::Terminate);
    assert_eq!(run(&stream, &[40, 2])[0], 42);
}

#[test]
fn stats_count_executed_instructions() {
    let mut stream = AssemblyStream::new();
    stream.push_inst(Instruction::Move {
        dest: MoveDest::Register(reg(0)),
        src: ValueOperand::Constant(Value::V64(0)),
        width: Width::W64,
    });
    stream.push_inst(Instruction::Terminate);
    let program = assemble(&stream).unwrap();
    let mut vm = VirtualMachine::new();
    vm.load_binary(&program.to_bytes()).unwrap();
    vm.execute(&[]).unwrap();
    assert_eq!(vm.stats().executed_instructions, 2);
}

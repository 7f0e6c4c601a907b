//! Instruction selection down to executable bytecode.
//!
//! Every test lowers hand-built IR through the whole back end and runs the
//! result on the VM.

use scatha_asm::assemble;
use scatha_ir::{
    ArithmeticOp, Builder, CompareMode, CompareOp, Context, Function,
    Module, Parameter, TypeId, Value,
};
use scatha_mir::lower_module;
use scatha_vm::VirtualMachine;

fn run_main(ctx: &Context, module: &Module) -> u64 {
    let stream = lower_module(ctx, module).unwrap();
    let program = assemble(&stream).unwrap();
    let mut vm = VirtualMachine::new();
    vm.load_binary(&program.to_bytes()).unwrap();
    vm.execute(&[]).unwrap()[0]
}

#[test]
fn constant_arithmetic_executes() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let mut module = Module::new();
    let mut main = Function::new("main", vec![], i64t);
    {
        let mut b = Builder::new(&mut ctx, &mut main);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let mul = b.arithmetic(
            ArithmeticOp::Mul,
            i64t,
            Value::int(3, i64t),
            Value::int(4, i64t),
            "mul",
        );
        let sum =
            b.arithmetic(ArithmeticOp::Add, i64t, Value::int(2, i64t), mul, "sum");
        b.ret(Some(sum));
    }
    module.add_function(main);
    assert_eq!(run_main(&ctx, &module), 14);
}

#[test]
fn loop_with_phis_executes() {
    // s = 0; for i in 0..5 { s += i }; return s
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let mut module = Module::new();
    let mut main = Function::new("main", vec![], i64t);
    {
        let mut b = Builder::new(&mut ctx, &mut main);
        let entry = b.add_block("entry");
        let header = b.add_block("header");
        let body = b.add_block("body");
        let exit = b.add_block("exit");
        b.set_insert_point(entry);
        b.goto(header);
        b.set_insert_point(header);
        let i = b.phi(i64t, vec![(entry, Value::int(0, i64t))], "i");
        let s = b.phi(i64t, vec![(entry, Value::int(0, i64t))], "s");
        let cond = b.compare(
            CompareMode::Signed,
            CompareOp::Less,
            i,
            Value::int(5, i64t),
            "cond",
        );
        b.branch(cond, body, exit);
        b.set_insert_point(body);
        let s_next = b.arithmetic(ArithmeticOp::Add, i64t, s, i, "s.next");
        let i_next = b.arithmetic(
            ArithmeticOp::Add,
            i64t,
            i,
            Value::int(1, i64t),
            "i.next",
        );
        b.goto(header);
        b.function.add_phi_arg(i.as_inst().unwrap(), body, i_next);
        b.function.add_phi_arg(s.as_inst().unwrap(), body, s_next);
        b.set_insert_point(exit);
        b.ret(Some(s));
    }
    module.add_function(main);
    assert_eq!(run_main(&ctx, &module), 10);
}

#[test]
fn calls_pass_arguments_through_the_register_window() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let mut module = Module::new();
    let mut add = Function::new(
        "add",
        vec![
            Parameter { ty: i64t, name: "a".into() },
            Parameter { ty: i64t, name: "b".into() },
        ],
        i64t,
    );
    {
        let mut b = Builder::new(&mut ctx, &mut add);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let sum = b.arithmetic(
            ArithmeticOp::Add,
            i64t,
            Value::Param(0),
            Value::Param(1),
            "sum",
        );
        b.ret(Some(sum));
    }
    let add = module.add_function(add);
    let mut main = Function::new("main", vec![], i64t);
    {
        let mut b = Builder::new(&mut ctx, &mut main);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let result = b.call(
            i64t,
            Value::Function(add),
            vec![Value::int(20, i64t), Value::int(22, i64t)],
            "result",
        );
        b.ret(Some(result));
    }
    module.add_function(main);
    assert_eq!(run_main(&ctx, &module), 42);
}

#[test]
fn allocas_fold_into_one_frame_prologue() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let mut module = Module::new();
    let mut main = Function::new("main", vec![], i64t);
    {
        let mut b = Builder::new(&mut ctx, &mut main);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let slot_a = b.alloca(i64t, "a");
        let slot_b = b.alloca(i64t, "b");
        b.store(slot_a, Value::int(30, i64t));
        b.store(slot_b, Value::int(12, i64t));
        let a = b.load(i64t, slot_a, "a.val");
        let bv = b.load(i64t, slot_b, "b.val");
        let sum = b.arithmetic(ArithmeticOp::Add, i64t, a, bv, "sum");
        b.ret(Some(sum));
    }
    let main_ref = module.add_function(main);
    let mir = scatha_mir::lower_to_mir(&ctx, &module).unwrap();
    let main_mir = &mir.functions[main_ref.0 as usize];
    let lincsp_count: usize = main_mir
        .blocks
        .iter()
        .flat_map(|block| &block.insts)
        .filter(|inst| matches!(inst, scatha_mir::MirInst::LIncSp { .. }))
        .count();
    assert_eq!(lincsp_count, 1);
    assert_eq!(run_main(&ctx, &module), 42);
}

#[test]
fn select_lowers_to_conditional_moves() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let b1 = ctx.bool_type();
    let mut module = Module::new();
    let mut main = Function::new("main", vec![], i64t);
    {
        let mut b = Builder::new(&mut ctx, &mut main);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let result = b.select(
            i64t,
            Value::IntConst { value: 1, ty: b1 },
            Value::int(7, i64t),
            Value::int(9, i64t),
            "picked",
        );
        b.ret(Some(result));
    }
    module.add_function(main);
    assert_eq!(run_main(&ctx, &module), 7);
}

#[test]
fn struct_fields_address_through_gep() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let pair = ctx.struct_type(vec![i64t, i64t]);
    let mut module = Module::new();
    let mut main = Function::new("main", vec![], i64t);
    {
        let mut b = Builder::new(&mut ctx, &mut main);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let slot = b.alloca(pair, "pair");
        let zero = Value::int(0, i64t);
        let first = b.gep(pair, slot, zero, vec![0], "first");
        let second = b.gep(pair, slot, zero, vec![1], "second");
        b.store(first, Value::int(40, i64t));
        b.store(second, Value::int(2, i64t));
        let a = b.load(i64t, first, "a");
        let bv = b.load(i64t, second, "b");
        let sum = b.arithmetic(ArithmeticOp::Add, i64t, a, bv, "sum");
        b.ret(Some(sum));
    }
    module.add_function(main);
    assert_eq!(run_main(&ctx, &module), 42);
}

#[test]
fn void_functions_return_without_value() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let mut module = Module::new();
    let mut noop = Function::new("noop", vec![], TypeId::VOID);
    {
        let mut b = Builder::new(&mut ctx, &mut noop);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        b.ret(None);
    }
    let noop = module.add_function(noop);
    let mut main = Function::new("main", vec![], i64t);
    {
        let mut b = Builder::new(&mut ctx, &mut main);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        b.call(TypeId::VOID, Value::Function(noop), vec![], "");
        b.ret(Some(Value::int(1, i64t)));
    }
    module.add_function(main);
    assert_eq!(run_main(&ctx, &module), 1);
}

#[test]
fn constant_data_loads_through_static_pointers() {
    let mut ctx = Context::new();
    let i64t = ctx.int_type(64);
    let i8t = ctx.int_type(8);
    let bytes_ty = ctx.array_type(i8t, 3);
    let mut module = Module::new();
    let data = module.add_constant_data(scatha_ir::ConstantData {
        name: "greeting".into(),
        ty: bytes_ty,
        bytes: vec![7, 8, 9],
    });
    let mut main = Function::new("main", vec![], i64t);
    {
        let mut b = Builder::new(&mut ctx, &mut main);
        let entry = b.add_block("entry");
        b.set_insert_point(entry);
        let second = b.gep(
            i8t,
            Value::ConstData(data),
            Value::int(1, i64t),
            vec![],
            "second",
        );
        let loaded = b.load(i8t, second, "loaded");
        let widened = b.convert(
            scatha_ir::ConversionOp::Zext,
            i64t,
            loaded,
            "wide",
        );
        b.ret(Some(widened));
    }
    module.add_function(main);
    assert_eq!(run_main(&ctx, &module), 8);
}

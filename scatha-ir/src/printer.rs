//! Textual SSA printer.
//!
//! The printout is deterministic: two structurally identical functions with
//! identical names print byte-for-byte equal, which the pass idempotence
//! tests rely on.

use std::fmt::Write;

use crate::context::Context;
use crate::function::Function;
use crate::module::Module;
use crate::types::{TypeData, TypeId};
use crate::value::{CompareMode, InstKind, Value};

pub fn print_type(ctx: &Context, ty: TypeId) -> String {
    match ctx.type_data(ty) {
        TypeData::Void => "void".to_owned(),
        TypeData::Int { bits } => format!("i{bits}"),
        TypeData::Float { bits } => format!("f{bits}"),
        TypeData::Ptr => "ptr".to_owned(),
        TypeData::Array { elem, count } => {
            format!("[{} x {count}]", print_type(ctx, *elem))
        }
        TypeData::Struct { fields } => {
            let fields: Vec<String> =
                fields.iter().map(|f| print_type(ctx, *f)).collect();
            format!("{{ {} }}", fields.join(", "))
        }
    }
}

fn print_value(ctx: &Context, module: Option<&Module>, function: &Function, value: Value) -> String {
    match value {
        Value::Inst(id) => format!("%{}", function.inst(id).name),
        Value::Param(index) => {
            format!("%{}", function.params[index as usize].name)
        }
        Value::IntConst { value, ty } => {
            format!("{} {}", print_type(ctx, ty), value as i64)
        }
        Value::FloatConst { bits, ty } => {
            let text = match ctx.type_data(ty) {
                TypeData::Float { bits: 32 } => {
                    format!("{:?}", f32::from_bits(bits as u32))
                }
                _ => format!("{:?}", f64::from_bits(bits)),
            };
            format!("{} {}", print_type(ctx, ty), text)
        }
        Value::Undef(ty) => format!("{} undef", print_type(ctx, ty)),
        Value::Function(id) => match module {
            Some(module) => format!("@{}", module.function(id).name),
            None => format!("@fn.{}", id.0),
        },
        Value::Builtin(index) => format!("@__builtin.{index}"),
        Value::ForeignFunction(index) => match module {
            Some(module) => {
                format!("@{}", module.foreign_functions[index as usize].name)
            }
            None => format!("@ffi.{index}"),
        },
        Value::ConstData(id) => match module {
            Some(module) => {
                format!("@{}", module.constant_data[id.0 as usize].name)
            }
            None => format!("@data.{}", id.0),
        },
        Value::Global(id) => match module {
            Some(module) => format!("@{}", module.globals[id.0 as usize].name),
            None => format!("@global.{}", id.0),
        },
    }
}

fn typed(ctx: &Context, module: Option<&Module>, function: &Function, value: Value) -> String {
    match value {
        Value::Inst(id) => format!(
            "{} %{}",
            print_type(ctx, function.inst(id).ty),
            function.inst(id).name
        ),
        Value::Param(index) => {
            let param = &function.params[index as usize];
            format!("{} %{}", print_type(ctx, param.ty), param.name)
        }
        _ => print_value(ctx, module, function, value),
    }
}

pub fn print_function(ctx: &Context, function: &Function) -> String {
    print_function_in(ctx, None, function)
}

fn print_function_in(
    ctx: &Context,
    module: Option<&Module>,
    function: &Function,
) -> String {
    let mut out = String::new();
    let params: Vec<String> = function
        .params
        .iter()
        .map(|p| format!("{} %{}", print_type(ctx, p.ty), p.name))
        .collect();
    let _ = writeln!(
        out,
        "func {} @{}({}) {{",
        print_type(ctx, function.return_ty),
        function.name,
        params.join(", ")
    );
    for block in function.block_ids() {
        let _ = writeln!(out, "  %{}:", function.block_name(block));
        for inst in function.block_insts(block) {
            let _ = writeln!(
                out,
                "    {}",
                print_inst(ctx, module, function, *inst)
            );
        }
    }
    out.push_str("}\n");
    out
}

fn print_inst(
    ctx: &Context,
    module: Option<&Module>,
    function: &Function,
    id: crate::value::InstId,
) -> String {
    let inst = function.inst(id);
    let val = |value: Value| typed(ctx, module, function, value);
    let name = &inst.name;
    match &inst.kind {
        InstKind::Alloca { allocated_ty } => {
            format!("%{name} = alloca {}", print_type(ctx, *allocated_ty))
        }
        InstKind::Load => format!(
            "%{name} = load {}, {}",
            print_type(ctx, inst.ty),
            val(inst.operands[0])
        ),
        InstKind::Store => format!(
            "store {}, {}",
            val(inst.operands[0]),
            val(inst.operands[1])
        ),
        InstKind::Arithmetic(op) => format!(
            "%{name} = {} {}, {}",
            op.mnemonic(),
            val(inst.operands[0]),
            val(inst.operands[1])
        ),
        InstKind::UnaryArithmetic(op) => {
            format!("%{name} = {} {}", op.mnemonic(), val(inst.operands[0]))
        }
        InstKind::Compare { mode, op } => {
            let mode = match mode {
                CompareMode::Signed => "scmp",
                CompareMode::Unsigned => "ucmp",
                CompareMode::Float => "fcmp",
            };
            format!(
                "%{name} = {mode} {} {}, {}",
                op.mnemonic(),
                val(inst.operands[0]),
                val(inst.operands[1])
            )
        }
        InstKind::Conversion(op) => format!(
            "%{name} = {} {} to {}",
            op.mnemonic(),
            val(inst.operands[0]),
            print_type(ctx, inst.ty)
        ),
        InstKind::GetElementPtr { elem_ty, member_indices } => {
            let mut text = format!(
                "%{name} = getelementptr inbounds {}, {}, {}",
                print_type(ctx, *elem_ty),
                val(inst.operands[0]),
                val(inst.operands[1])
            );
            for index in member_indices {
                let _ = write!(text, ", {index}");
            }
            text
        }
        InstKind::ExtractValue { indices } => {
            let mut text =
                format!("%{name} = extract_value {}", val(inst.operands[0]));
            for index in indices {
                let _ = write!(text, ", {index}");
            }
            text
        }
        InstKind::InsertValue { indices } => {
            let mut text = format!(
                "%{name} = insert_value {}, {}",
                val(inst.operands[0]),
                val(inst.operands[1])
            );
            for index in indices {
                let _ = write!(text, ", {index}");
            }
            text
        }
        InstKind::Select => format!(
            "%{name} = select {}, {}, {}",
            val(inst.operands[0]),
            val(inst.operands[1]),
            val(inst.operands[2])
        ),
        InstKind::Call => {
            let args: Vec<String> =
                inst.operands[1..].iter().map(|v| val(*v)).collect();
            let callee = print_value(ctx, module, function, inst.operands[0]);
            let prefix = if ctx.type_data(inst.ty) == &TypeData::Void {
                "call".to_owned()
            } else {
                format!("%{name} = call {}", print_type(ctx, inst.ty))
            };
            if args.is_empty() {
                format!("{prefix} {callee}")
            } else {
                format!("{prefix} {callee}, {}", args.join(", "))
            }
        }
        InstKind::Phi { preds } => {
            let args: Vec<String> = preds
                .iter()
                .zip(&inst.operands)
                .map(|(pred, value)| {
                    format!(
                        "[label %{} : {}]",
                        function.block_name(*pred),
                        print_value(ctx, module, function, *value)
                    )
                })
                .collect();
            format!(
                "%{name} = phi {} {}",
                print_type(ctx, inst.ty),
                args.join(", ")
            )
        }
        InstKind::Goto { target } => {
            format!("goto label %{}", function.block_name(*target))
        }
        InstKind::Branch { then_target, else_target } => format!(
            "branch {}, label %{}, label %{}",
            val(inst.operands[0]),
            function.block_name(*then_target),
            function.block_name(*else_target)
        ),
        InstKind::Return => match inst.operands.first() {
            Some(value) => format!("return {}", val(*value)),
            None => "return".to_owned(),
        },
    }
}

pub fn print_module(ctx: &Context, module: &Module) -> String {
    let mut out = String::new();
    for data in &module.constant_data {
        let _ = writeln!(
            out,
            "@{} = constant {} {:?}",
            data.name,
            print_type(ctx, data.ty),
            data.bytes
        );
    }
    for global in &module.globals {
        let _ = writeln!(
            out,
            "@{} = global {} {:?}",
            global.name,
            print_type(ctx, global.ty),
            global.initializer
        );
    }
    for decl in &module.foreign_functions {
        let params: Vec<String> = decl
            .param_types
            .iter()
            .map(|ty| print_type(ctx, *ty))
            .collect();
        let _ = writeln!(
            out,
            "ext func {} @{}({}) : {}",
            print_type(ctx, decl.return_ty),
            decl.name,
            params.join(", "),
            decl.index
        );
    }
    if !out.is_empty() {
        out.push('\n');
    }
    let functions: Vec<String> = module
        .functions()
        .map(|f| print_function_in(ctx, Some(module), f))
        .collect();
    out.push_str(&functions.join("\n"));
    out
}

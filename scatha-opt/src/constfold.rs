//! Constant folding.
//!
//! Evaluates instructions whose operands are all constants and replaces
//! their uses with the result. Folding runs to a fixpoint within each
//! function; branch folding on constant conditions is `simplifycfg`'s job.

use scatha_ir::{
    ArithmeticOp, CompareMode, CompareOp, Context, ConversionOp, Function,
    InstId, InstKind, TypeData, UnaryOp, Value,
};

use crate::registry::PassArgs;

pub fn constfold(
    ctx: &mut Context,
    function: &mut Function,
    _args: &PassArgs,
) -> bool {
    let mut modified = false;
    loop {
        let mut folded_any = false;
        for inst in function.inst_ids().collect::<Vec<_>>() {
            if let Some(result) = fold_inst(ctx, function, inst) {
                function.replace_all_uses(inst, result);
                function.erase_inst(inst);
                folded_any = true;
            }
        }
        modified |= folded_any;
        if !folded_any {
            break;
        }
    }
    modified
}

fn fold_inst(
    ctx: &Context,
    function: &Function,
    inst: InstId,
) -> Option<Value> {
    let data = function.inst(inst);
    match &data.kind {
        InstKind::Arithmetic(op) => {
            let (a, b) = (data.operands[0], data.operands[1]);
            fold_arithmetic(ctx, *op, a, b, data.ty)
        }
        InstKind::UnaryArithmetic(op) => {
            fold_unary(ctx, *op, data.operands[0], data.ty)
        }
        InstKind::Compare { mode, op } => {
            let result = fold_compare(ctx, *mode, *op, data.operands[0], data.operands[1])?;
            Some(Value::IntConst { value: result as u64, ty: data.ty })
        }
        InstKind::Conversion(op) => {
            fold_conversion(ctx, *op, data.operands[0], data.ty)
        }
        InstKind::Select => match data.operands[0] {
            Value::IntConst { value, .. } => Some(if value != 0 {
                data.operands[1]
            } else {
                data.operands[2]
            }),
            _ => None,
        },
        // A phi whose arguments all agree folds to that value.
        InstKind::Phi { .. } => {
            let mut values = data
                .operands
                .iter()
                .filter(|v| **v != Value::Inst(inst));
            let first = *values.next()?;
            values.all(|v| *v == first).then_some(first)
        }
        _ => None,
    }
}

fn int_bits(ctx: &Context, ty: scatha_ir::TypeId) -> Option<u32> {
    match ctx.type_data(ty) {
        TypeData::Int { bits } => Some(*bits),
        _ => None,
    }
}

fn truncate(value: u64, bits: u32) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

fn to_signed(value: u64, bits: u32) -> i64 {
    if bits >= 64 {
        value as i64
    } else {
        let shift = 64 - bits;
        ((value << shift) as i64) >> shift
    }
}

fn as_int(value: Value) -> Option<u64> {
    match value {
        Value::IntConst { value, .. } => Some(value),
        _ => None,
    }
}

fn as_float(ctx: &Context, value: Value) -> Option<f64> {
    match value {
        Value::FloatConst { bits, ty } => match ctx.type_data(ty) {
            TypeData::Float { bits: 32 } => {
                Some(f32::from_bits(bits as u32) as f64)
            }
            _ => Some(f64::from_bits(bits)),
        },
        _ => None,
    }
}

fn make_float(ctx: &Context, value: f64, ty: scatha_ir::TypeId) -> Value {
    let bits = match ctx.type_data(ty) {
        TypeData::Float { bits: 32 } => (value as f32).to_bits() as u64,
        _ => value.to_bits(),
    };
    Value::FloatConst { bits, ty }
}

fn fold_arithmetic(
    ctx: &Context,
    op: ArithmeticOp,
    a: Value,
    b: Value,
    ty: scatha_ir::TypeId,
) -> Option<Value> {
    if op.is_float() {
        let (x, y) = (as_float(ctx, a)?, as_float(ctx, b)?);
        let result = match op {
            ArithmeticOp::FAdd => x + y,
            ArithmeticOp::FSub => x - y,
            ArithmeticOp::FMul => x * y,
            ArithmeticOp::FDiv => x / y,
            _ => unreachable!(),
        };
        return Some(make_float(ctx, result, ty));
    }
    let bits = int_bits(ctx, ty)?;
    let (x, y) = (as_int(a)?, as_int(b)?);
    let (sx, sy) = (to_signed(x, bits), to_signed(y, bits));
    let result = match op {
        ArithmeticOp::Add => x.wrapping_add(y),
        ArithmeticOp::Sub => x.wrapping_sub(y),
        ArithmeticOp::Mul => x.wrapping_mul(y),
        ArithmeticOp::UDiv => x.checked_div(y)?,
        ArithmeticOp::SDiv => sx.checked_div(sy)? as u64,
        ArithmeticOp::URem => x.checked_rem(y)?,
        ArithmeticOp::SRem => sx.checked_rem(sy)? as u64,
        ArithmeticOp::LShL | ArithmeticOp::AShL => {
            x.wrapping_shl(y as u32 % 64)
        }
        ArithmeticOp::LShR => truncate(x, bits).wrapping_shr(y as u32 % 64),
        ArithmeticOp::AShR => (sx >> (y as u32 % 64).min(63)) as u64,
        ArithmeticOp::And => x & y,
        ArithmeticOp::Or => x | y,
        ArithmeticOp::XOr => x ^ y,
        _ => unreachable!(),
    };
    Some(Value::IntConst { value: truncate(result, bits), ty })
}

fn fold_unary(
    ctx: &Context,
    op: UnaryOp,
    operand: Value,
    ty: scatha_ir::TypeId,
) -> Option<Value> {
    let bits = int_bits(ctx, ty)?;
    let x = as_int(operand)?;
    let result = match op {
        UnaryOp::Neg => (to_signed(x, bits).wrapping_neg()) as u64,
        UnaryOp::BitNot => !x,
        UnaryOp::LogNot => (truncate(x, bits) == 0) as u64,
    };
    Some(Value::IntConst { value: truncate(result, bits), ty })
}

fn fold_compare(
    ctx: &Context,
    mode: CompareMode,
    op: CompareOp,
    a: Value,
    b: Value,
) -> Option<bool> {
    let ordering = match mode {
        CompareMode::Float => {
            let (x, y) = (as_float(ctx, a)?, as_float(ctx, b)?);
            x.partial_cmp(&y)?
        }
        CompareMode::Signed => {
            let ty = match a {
                Value::IntConst { ty, .. } => ty,
                _ => return None,
            };
            let bits = int_bits(ctx, ty)?;
            to_signed(as_int(a)?, bits).cmp(&to_signed(as_int(b)?, bits))
        }
        CompareMode::Unsigned => {
            let ty = match a {
                Value::IntConst { ty, .. } => ty,
                _ => return None,
            };
            let bits = int_bits(ctx, ty)?;
            truncate(as_int(a)?, bits).cmp(&truncate(as_int(b)?, bits))
        }
    };
    Some(match op {
        CompareOp::Equal => ordering.is_eq(),
        CompareOp::NotEqual => !ordering.is_eq(),
        CompareOp::Less => ordering.is_lt(),
        CompareOp::LessEq => ordering.is_le(),
        CompareOp::Greater => ordering.is_gt(),
        CompareOp::GreaterEq => ordering.is_ge(),
    })
}

fn fold_conversion(
    ctx: &Context,
    op: ConversionOp,
    operand: Value,
    to: scatha_ir::TypeId,
) -> Option<Value> {
    match op {
        ConversionOp::Zext | ConversionOp::Trunc | ConversionOp::Bitcast => {
            let bits = int_bits(ctx, to)?;
            let from_ty = match operand {
                Value::IntConst { ty, .. } => ty,
                _ => return None,
            };
            let from_bits = int_bits(ctx, from_ty)?;
            let value = truncate(as_int(operand)?, from_bits.min(bits));
            Some(Value::IntConst { value, ty: to })
        }
        ConversionOp::Sext => {
            let bits = int_bits(ctx, to)?;
            let from_ty = match operand {
                Value::IntConst { ty, .. } => ty,
                _ => return None,
            };
            let from_bits = int_bits(ctx, from_ty)?;
            let value = to_signed(as_int(operand)?, from_bits) as u64;
            Some(Value::IntConst { value: truncate(value, bits), ty: to })
        }
        ConversionOp::Fext | ConversionOp::Ftrunc => {
            let value = as_float(ctx, operand)?;
            Some(make_float(ctx, value, to))
        }
        ConversionOp::StoF => {
            let from_ty = match operand {
                Value::IntConst { ty, .. } => ty,
                _ => return None,
            };
            let bits = int_bits(ctx, from_ty)?;
            let value = to_signed(as_int(operand)?, bits) as f64;
            Some(make_float(ctx, value, to))
        }
        ConversionOp::UtoF => {
            let value = as_int(operand)? as f64;
            Some(make_float(ctx, value, to))
        }
        ConversionOp::FtoS | ConversionOp::FtoU => {
            let bits = int_bits(ctx, to)?;
            let value = as_float(ctx, operand)?;
            let result = if op == ConversionOp::FtoS {
                value as i64 as u64
            } else {
                value as u64
            };
            Some(Value::IntConst { value: truncate(result, bits), ty: to })
        }
    }
}

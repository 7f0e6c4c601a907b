//! Value conversions.
//!
//! A conversion is a pair of a reference conversion and an object
//! conversion. A conversion is implicit iff it never loses information and
//! does not weaken mutability; explicit conversions additionally cover the
//! narrowing and reinterpreting cases.

use crate::entity::{EntityId, EntityKind, QualType, Refness};
use crate::symbol_table::SymbolTable;

/// How the reference-ness of the source adapts to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefConversion {
    #[default]
    None,
    /// Reference to value: read through.
    Dereference,
    /// Value to reference: bind a temporary.
    MaterializeTemporary,
}

/// Object representation change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectConversion {
    #[default]
    None,
    ArrayFixedToDynamic,
    ReinterpretArrayToByte,
    ReinterpretArrayFromByte,
    ReinterpretValue,
    SsTrunc,
    SsWiden,
    SuTrunc,
    SuWiden,
    UsTrunc,
    UsWiden,
    UuTrunc,
    UuWiden,
    FloatTrunc,
    FloatWiden,
    SignedToFloat,
    UnsignedToFloat,
    FloatToSigned,
    FloatToUnsigned,
}

/// A full conversion from one qualified type to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Conversion {
    pub ref_conv: RefConversion,
    pub obj_conv: ObjectConversion,
}

impl Conversion {
    pub fn is_identity(&self) -> bool {
        *self == Conversion::default()
    }

    /// Cost rank used by overload resolution: identity beats widening beats
    /// everything else.
    pub fn rank(&self) -> u32 {
        let obj = match self.obj_conv {
            ObjectConversion::None => 0,
            ObjectConversion::SsWiden
            | ObjectConversion::UuWiden
            | ObjectConversion::UsWiden
            | ObjectConversion::FloatWiden
            | ObjectConversion::ArrayFixedToDynamic => 1,
            _ => 2,
        };
        let ref_ = match self.ref_conv {
            RefConversion::None => 0,
            _ => 1,
        };
        obj * 2 + ref_
    }
}

/// Compute the conversion from `from` to `to`, or `None` if the types are
/// unrelated.
pub fn compute_conversion(
    sym: &SymbolTable,
    from: QualType,
    to: QualType,
) -> Option<Conversion> {
    let ref_conv = match (from.refness, to.refness) {
        (Refness::None, Refness::None) => RefConversion::None,
        (Refness::None, _) => RefConversion::MaterializeTemporary,
        (_, Refness::None) => RefConversion::Dereference,
        _ => RefConversion::None,
    };
    // Binding a mutable reference needs a mutable source.
    if to.refness == Refness::MutReference
        && from.refness != Refness::MutReference
        && !from.mutable
    {
        return None;
    }
    let obj_conv = object_conversion(sym, from.base, to.base)?;
    Some(Conversion { ref_conv, obj_conv })
}

fn object_conversion(
    sym: &SymbolTable,
    from: EntityId,
    to: EntityId,
) -> Option<ObjectConversion> {
    if from == to {
        return Some(ObjectConversion::None);
    }
    // Null pointer literal converts to any pointer.
    if from == sym.builtins().null_ptr
        && matches!(
            sym.entity(to).kind,
            EntityKind::RawPtrType { .. } | EntityKind::UniquePtrType { .. }
        )
    {
        return Some(ObjectConversion::ReinterpretValue);
    }
    // Arrays: fixed to dynamic of the same element type.
    if let (
        EntityKind::ArrayType { elem: from_elem, count: Some(_) },
        EntityKind::ArrayType { elem: to_elem, count: None },
    ) = (&sym.entity(from).kind, &sym.entity(to).kind)
    {
        if from_elem == to_elem {
            return Some(ObjectConversion::ArrayFixedToDynamic);
        }
    }
    // Arrays reinterpreted as byte arrays and back.
    if let (
        EntityKind::ArrayType { .. },
        EntityKind::ArrayType { elem: to_elem, .. },
    ) = (&sym.entity(from).kind, &sym.entity(to).kind)
    {
        if *to_elem == sym.builtins().byte {
            return Some(ObjectConversion::ReinterpretArrayToByte);
        }
    }
    if let (
        EntityKind::ArrayType { elem: from_elem, .. },
        EntityKind::ArrayType { .. },
    ) = (&sym.entity(from).kind, &sym.entity(to).kind)
    {
        if *from_elem == sym.builtins().byte {
            return Some(ObjectConversion::ReinterpretArrayFromByte);
        }
    }
    // Scalar conversions.
    let from_int = sym.int_width(from);
    let to_int = sym.int_width(to);
    let from_float = sym.is_float(from);
    let to_float = sym.is_float(to);
    match (from_int, to_int, from_float, to_float) {
        (Some((fw, fs)), Some((tw, ts)), _, _) => {
            let widen = tw > fw;
            Some(match (fs, ts, widen) {
                (true, true, true) => ObjectConversion::SsWiden,
                (true, true, false) => ObjectConversion::SsTrunc,
                (true, false, true) => ObjectConversion::SuWiden,
                (true, false, false) => ObjectConversion::SuTrunc,
                (false, true, true) => ObjectConversion::UsWiden,
                (false, true, false) => ObjectConversion::UsTrunc,
                (false, false, true) => ObjectConversion::UuWiden,
                (false, false, false) => ObjectConversion::UuTrunc,
            })
        }
        (None, None, true, true) => {
            let fw = float_width(sym, from);
            let tw = float_width(sym, to);
            Some(if tw > fw {
                ObjectConversion::FloatWiden
            } else {
                ObjectConversion::FloatTrunc
            })
        }
        (Some((_, signed)), None, _, true) => Some(if signed {
            ObjectConversion::SignedToFloat
        } else {
            ObjectConversion::UnsignedToFloat
        }),
        (None, Some((_, signed)), true, _) => Some(if signed {
            ObjectConversion::FloatToSigned
        } else {
            ObjectConversion::FloatToUnsigned
        }),
        _ => None,
    }
}

fn float_width(sym: &SymbolTable, ty: EntityId) -> u32 {
    match sym.entity(ty).kind {
        EntityKind::BuiltinType(
            crate::entity::BuiltinTypeKind::Float { width },
        ) => width,
        _ => 0,
    }
}

/// A conversion is implicit iff it never loses information and does not
/// weaken mutability.
pub fn is_implicit(
    conv: &Conversion,
    from: QualType,
    to: QualType,
) -> bool {
    if to.refness != Refness::None && to.mutable && !from.mutable {
        return false;
    }
    matches!(
        conv.obj_conv,
        ObjectConversion::None
            | ObjectConversion::SsWiden
            | ObjectConversion::UuWiden
            | ObjectConversion::UsWiden
            | ObjectConversion::FloatWiden
            | ObjectConversion::ArrayFixedToDynamic
    ) || (conv.obj_conv == ObjectConversion::ReinterpretValue
        && from.base != to.base
        && conv.ref_conv == RefConversion::None)
}

/// Convenience: the implicit conversion from `from` to `to`, if one exists.
pub fn implicit_conversion(
    sym: &SymbolTable,
    from: QualType,
    to: QualType,
) -> Option<Conversion> {
    let conv = compute_conversion(sym, from, to)?;
    is_implicit(&conv, from, to).then_some(conv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widening_is_implicit_narrowing_is_not() {
        let sym = SymbolTable::new();
        let b = sym.builtins();
        let widen = implicit_conversion(
            &sym,
            QualType::new(b.s32),
            QualType::new(b.s64),
        );
        assert_eq!(
            widen.map(|c| c.obj_conv),
            Some(ObjectConversion::SsWiden)
        );
        assert!(implicit_conversion(
            &sym,
            QualType::new(b.s64),
            QualType::new(b.s32)
        )
        .is_none());
        let narrowing =
            compute_conversion(&sym, QualType::new(b.s64), QualType::new(b.s32))
                .unwrap();
        assert_eq!(narrowing.obj_conv, ObjectConversion::SsTrunc);
    }

    #[test]
    fn unsigned_to_wider_signed_is_implicit() {
        let sym = SymbolTable::new();
        let b = sym.builtins();
        assert!(implicit_conversion(
            &sym,
            QualType::new(b.u8),
            QualType::new(b.s64)
        )
        .is_some());
        assert!(implicit_conversion(
            &sym,
            QualType::new(b.s8),
            QualType::new(b.u64)
        )
        .is_none());
    }

    #[test]
    fn int_to_float_is_explicit() {
        let sym = SymbolTable::new();
        let b = sym.builtins();
        let conv = compute_conversion(
            &sym,
            QualType::new(b.s64),
            QualType::new(b.f64),
        )
        .unwrap();
        assert_eq!(conv.obj_conv, ObjectConversion::SignedToFloat);
        assert!(!is_implicit(
            &conv,
            QualType::new(b.s64),
            QualType::new(b.f64)
        ));
    }

    #[test]
    fn fixed_array_decays_to_dynamic() {
        let mut sym = SymbolTable::new();
        let s64 = sym.builtins().s64;
        let fixed = sym.array_type(s64, Some(3));
        let dynamic = sym.array_type(s64, None);
        let conv = implicit_conversion(
            &sym,
            QualType::new(fixed),
            QualType::new(dynamic),
        )
        .unwrap();
        assert_eq!(conv.obj_conv, ObjectConversion::ArrayFixedToDynamic);
    }
}

//! Lifetime function synthesis.
//!
//! For every struct type the analyzer synthesizes the special lifetime
//! functions the user did not define, subject to member triviality: a
//! default constructor if all members are default-constructible, copy and
//! move constructors, and a destructor whenever any member needs one. A
//! struct whose members are all trivial and which defines none of
//! copy/move/destructor has trivial lifetime.

use crate::entity::{
    EntityId, EntityKind, FunctionAttributes, FunctionKind,
    FunctionSignature, LifetimeMetadata, QualType, SpecialLifetimeFunction,
    SpecialMemberFunction,
};
use crate::symbol_table::SymbolTable;

/// User-defined special member functions found in the struct body.
#[derive(Debug, Clone, Default)]
pub struct UserLifetimeFunctions {
    pub new: Vec<EntityId>,
    pub delete: Option<EntityId>,
    pub move_: Option<EntityId>,
}

/// Compute and attach the lifetime metadata of `struct_ty`.
pub fn synthesize_lifetime(
    sym: &mut SymbolTable,
    struct_ty: EntityId,
    user: &UserLifetimeFunctions,
) {
    let members = match &sym.entity(struct_ty).kind {
        EntityKind::StructType { members, .. } => members.clone(),
        _ => return,
    };
    let member_types: Vec<QualType> = members
        .iter()
        .filter_map(|member| match &sym.entity(*member).kind {
            EntityKind::Variable { ty, .. } => Some(*ty),
            _ => None,
        })
        .collect();
    let members_trivial = member_types
        .iter()
        .all(|ty| sym.has_trivial_lifetime(ty.base));
    let has_user_lifetime = user.delete.is_some()
        || user.move_.is_some()
        || user_copy_ctor(sym, struct_ty, user).is_some();
    let trivial = members_trivial && !has_user_lifetime;

    // A struct defaults to default-constructible iff all members are.
    let all_default_constructible = member_types.iter().all(|ty| {
        default_constructible(sym, ty.base)
    });
    let user_default = user.new.iter().copied().find(|ctor| {
        match &sym.entity(*ctor).kind {
            EntityKind::Function { signature, .. } => {
                signature.argument_types.len() == 1
            }
            _ => false,
        }
    });
    let default_constructor = user_default.or_else(|| {
        all_default_constructible.then(|| {
            synthesize(
                sym,
                struct_ty,
                SpecialLifetimeFunction::DefaultConstructor,
                vec![this_param(struct_ty, true)],
            )
        })
    });
    let copy_constructor = user_copy_ctor(sym, struct_ty, user).or_else(|| {
        (!trivial).then(|| {
            let this = this_param(struct_ty, true);
            let other = this_param(struct_ty, false);
            synthesize(
                sym,
                struct_ty,
                SpecialLifetimeFunction::CopyConstructor,
                vec![this, other],
            )
        })
    });
    let move_constructor = user.move_.or_else(|| {
        (!trivial).then(|| {
            let this = this_param(struct_ty, true);
            let other = this_param(struct_ty, true);
            synthesize(
                sym,
                struct_ty,
                SpecialLifetimeFunction::MoveConstructor,
                vec![this, other],
            )
        })
    });
    let destructor = user.delete.or_else(|| {
        (!trivial).then(|| {
            synthesize(
                sym,
                struct_ty,
                SpecialLifetimeFunction::Destructor,
                vec![this_param(struct_ty, true)],
            )
        })
    });
    let lifetime = LifetimeMetadata {
        default_constructor,
        copy_constructor,
        move_constructor,
        destructor,
        trivial,
    };
    if let EntityKind::StructType { lifetime: slot, .. } =
        &mut sym.entity_mut(struct_ty).kind
    {
        *slot = lifetime;
    }
}

fn user_copy_ctor(
    sym: &SymbolTable,
    struct_ty: EntityId,
    user: &UserLifetimeFunctions,
) -> Option<EntityId> {
    user.new.iter().copied().find(|ctor| {
        match &sym.entity(*ctor).kind {
            EntityKind::Function { signature, .. } => {
                signature.argument_types.len() == 2
                    && signature.argument_types[1].base == struct_ty
            }
            _ => false,
        }
    })
}

fn default_constructible(sym: &SymbolTable, ty: EntityId) -> bool {
    match &sym.entity(ty).kind {
        EntityKind::StructType { lifetime, .. } => {
            lifetime.trivial || lifetime.default_constructor.is_some()
        }
        _ => true,
    }
}

fn this_param(struct_ty: EntityId, mutable: bool) -> QualType {
    QualType::reference(struct_ty, mutable)
}

fn synthesize(
    sym: &mut SymbolTable,
    struct_ty: EntityId,
    slf: SpecialLifetimeFunction,
    argument_types: Vec<QualType>,
) -> EntityId {
    let name = match slf {
        SpecialLifetimeFunction::Destructor => "delete",
        _ => "new",
    };
    let smf = match slf {
        SpecialLifetimeFunction::Destructor => SpecialMemberFunction::Delete,
        SpecialLifetimeFunction::MoveConstructor => {
            SpecialMemberFunction::Move
        }
        _ => SpecialMemberFunction::New,
    };
    let void = sym.builtins().void;
    let saved = sym.current_scope();
    sym.push_scope(struct_ty);
    let function = sym.declare_function(
        name,
        EntityKind::Function {
            signature: FunctionSignature {
                argument_types,
                return_type: Some(QualType::new(void)),
            },
            kind: FunctionKind::Generated,
            attributes: FunctionAttributes::empty(),
            smf: Some(smf),
            slf: Some(slf),
            foreign_index: None,
            binary_address: None,
            params: Vec::new(),
        },
        None,
    );
    sym.push_scope(saved);
    function
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_struct(
        sym: &mut SymbolTable,
        name: &str,
        member_types: &[QualType],
    ) -> EntityId {
        let struct_ty = sym
            .declare(
                name,
                EntityKind::StructType {
                    members: Vec::new(),
                    lifetime: LifetimeMetadata::default(),
                    complete: true,
                },
                None,
            )
            .unwrap();
        let members: Vec<EntityId> = member_types
            .iter()
            .enumerate()
            .map(|(index, ty)| {
                sym.push_scope(struct_ty);
                let member = sym
                    .declare(
                        &format!("m{index}"),
                        EntityKind::Variable {
                            ty: *ty,
                            mutable: true,
                            index: index as u32,
                            is_parameter: false,
                        },
                        None,
                    )
                    .unwrap();
                sym.pop_scope();
                member
            })
            .collect();
        if let EntityKind::StructType { members: slot, .. } =
            &mut sym.entity_mut(struct_ty).kind
        {
            *slot = members;
        }
        struct_ty
    }

    #[test]
    fn all_trivial_members_make_a_trivial_struct() {
        let mut sym = SymbolTable::new();
        let s64 = QualType::new(sym.builtins().s64);
        let ty = make_struct(&mut sym, "P", &[s64, s64]);
        synthesize_lifetime(&mut sym, ty, &UserLifetimeFunctions::default());
        let lifetime = sym.struct_lifetime(ty).unwrap();
        assert!(lifetime.trivial);
        assert!(lifetime.default_constructor.is_some());
        assert!(lifetime.destructor.is_none());
        assert!(sym.has_trivial_lifetime(ty));
    }

    #[test]
    fn user_destructor_breaks_triviality_and_synthesizes_the_rest() {
        let mut sym = SymbolTable::new();
        let s64 = QualType::new(sym.builtins().s64);
        let ty = make_struct(&mut sym, "R", &[s64]);
        sym.push_scope(ty);
        let dtor = sym.declare_function(
            "delete",
            EntityKind::Function {
                signature: FunctionSignature {
                    argument_types: vec![QualType::reference(ty, true)],
                    return_type: Some(QualType::new(sym.builtins().void)),
                },
                kind: FunctionKind::Native,
                attributes: FunctionAttributes::empty(),
                smf: Some(SpecialMemberFunction::Delete),
                slf: Some(SpecialLifetimeFunction::Destructor),
                foreign_index: None,
                binary_address: None,
                params: Vec::new(),
            },
            None,
        );
        sym.pop_scope();
        let user = UserLifetimeFunctions {
            new: Vec::new(),
            delete: Some(dtor),
            move_: None,
        };
        synthesize_lifetime(&mut sym, ty, &user);
        let lifetime = sym.struct_lifetime(ty).unwrap();
        assert!(!lifetime.trivial);
        assert_eq!(lifetime.destructor, Some(dtor));
        assert!(lifetime.copy_constructor.is_some());
        assert!(lifetime.move_constructor.is_some());
        assert!(!sym.has_trivial_lifetime(ty));
    }

    #[test]
    fn member_with_nontrivial_lifetime_propagates() {
        let mut sym = SymbolTable::new();
        let s64 = QualType::new(sym.builtins().s64);
        let inner = make_struct(&mut sym, "Inner", &[s64]);
        sym.push_scope(inner);
        sym.pop_scope();
        // Give the inner struct a user destructor.
        sym.push_scope(inner);
        let dtor = sym.declare_function(
            "delete",
            EntityKind::Function {
                signature: FunctionSignature {
                    argument_types: vec![QualType::reference(inner, true)],
                    return_type: Some(QualType::new(sym.builtins().void)),
                },
                kind: FunctionKind::Native,
                attributes: FunctionAttributes::empty(),
                smf: Some(SpecialMemberFunction::Delete),
                slf: Some(SpecialLifetimeFunction::Destructor),
                foreign_index: None,
                binary_address: None,
                params: Vec::new(),
            },
            None,
        );
        sym.pop_scope();
        synthesize_lifetime(&mut sym, inner, &UserLifetimeFunctions {
            new: Vec::new(),
            delete: Some(dtor),
            move_: None,
        });
        let outer =
            make_struct(&mut sym, "Outer", &[QualType::new(inner)]);
        synthesize_lifetime(
            &mut sym,
            outer,
            &UserLifetimeFunctions::default(),
        );
        let lifetime = sym.struct_lifetime(outer).unwrap();
        assert!(!lifetime.trivial);
        assert!(lifetime.destructor.is_some());
    }
}

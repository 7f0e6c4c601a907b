//! The symbol table: entity arena, scope stack and type interning.

use std::collections::HashMap;

use scatha_ast::NodeId;

use crate::entity::{
    AccessControl, BuiltinTypeKind, Entity, EntityId, EntityKind,
    LifetimeMetadata, QualType,
};

/// Cached handles to the builtin types.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinTypes {
    pub void: EntityId,
    pub bool_: EntityId,
    pub byte: EntityId,
    pub s8: EntityId,
    pub s16: EntityId,
    pub s32: EntityId,
    pub s64: EntityId,
    pub u8: EntityId,
    pub u16: EntityId,
    pub u32: EntityId,
    pub u64: EntityId,
    pub f32: EntityId,
    pub f64: EntityId,
    pub null_ptr: EntityId,
}

/// Owns all entities of a compilation.
#[derive(Debug)]
pub struct SymbolTable {
    entities: Vec<Entity>,
    global_scope: EntityId,
    current_scope: EntityId,
    builtins: BuiltinTypes,
    array_types: HashMap<(EntityId, Option<u64>), EntityId>,
    ptr_types: HashMap<(QualType, bool), EntityId>,
    /// Shared poison sentinel.
    poison: EntityId,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = SymbolTable {
            entities: Vec::new(),
            global_scope: EntityId(0),
            current_scope: EntityId(0),
            builtins: BuiltinTypes {
                void: EntityId(0),
                bool_: EntityId(0),
                byte: EntityId(0),
                s8: EntityId(0),
                s16: EntityId(0),
                s32: EntityId(0),
                s64: EntityId(0),
                u8: EntityId(0),
                u16: EntityId(0),
                u32: EntityId(0),
                u64: EntityId(0),
                f32: EntityId(0),
                f64: EntityId(0),
                null_ptr: EntityId(0),
            },
            array_types: HashMap::new(),
            ptr_types: HashMap::new(),
            poison: EntityId(0),
        };
        let global = table.push(Entity {
            name: String::new(),
            mangled_name: String::new(),
            parent_scope: None,
            kind: EntityKind::GlobalScope,
            access: AccessControl::Public,
            ast_node: None,
            names: HashMap::new(),
            child_scopes: Vec::new(),
        });
        table.global_scope = global;
        table.current_scope = global;
        table.builtins = BuiltinTypes {
            void: table.declare_builtin("void", BuiltinTypeKind::Void),
            bool_: table.declare_builtin("bool", BuiltinTypeKind::Bool),
            byte: table.declare_builtin("byte", BuiltinTypeKind::Byte),
            s8: table.declare_int("s8", 8, true),
            s16: table.declare_int("s16", 16, true),
            s32: table.declare_int("s32", 32, true),
            s64: table.declare_int("s64", 64, true),
            u8: table.declare_int("u8", 8, false),
            u16: table.declare_int("u16", 16, false),
            u32: table.declare_int("u32", 32, false),
            u64: table.declare_int("u64", 64, false),
            f32: table
                .declare_builtin("f32", BuiltinTypeKind::Float { width: 32 }),
            f64: table
                .declare_builtin("f64", BuiltinTypeKind::Float { width: 64 }),
            null_ptr: table.declare_builtin("<null>", BuiltinTypeKind::NullPtr),
        };
        let double = table.builtins.f64;
        table.add_alias("double", double);
        let int = table.builtins.s64;
        table.add_alias("int", int);
        table.poison = table.push(Entity {
            name: "<poison>".to_owned(),
            mangled_name: String::new(),
            parent_scope: Some(global),
            kind: EntityKind::Poison,
            access: AccessControl::Public,
            ast_node: None,
            names: HashMap::new(),
            child_scopes: Vec::new(),
        });
        table
    }

    fn declare_builtin(
        &mut self,
        name: &str,
        kind: BuiltinTypeKind,
    ) -> EntityId {
        let id = self.push(Entity {
            name: name.to_owned(),
            mangled_name: name.to_owned(),
            parent_scope: Some(self.global_scope),
            kind: EntityKind::BuiltinType(kind),
            access: AccessControl::Public,
            ast_node: None,
            names: HashMap::new(),
            child_scopes: Vec::new(),
        });
        self.entities[self.global_scope.index()]
            .names
            .insert(name.to_owned(), id);
        id
    }

    fn declare_int(&mut self, name: &str, width: u32, signed: bool) -> EntityId {
        self.declare_builtin(name, BuiltinTypeKind::Int { width, signed })
    }

    fn add_alias(&mut self, name: &str, entity: EntityId) {
        self.entities[self.global_scope.index()]
            .names
            .insert(name.to_owned(), entity);
    }

    fn push(&mut self, entity: Entity) -> EntityId {
        let id = EntityId(self.entities.len() as u32);
        self.entities.push(entity);
        id
    }

    // # Access

    pub fn entity(&self, id: EntityId) -> &Entity {
        &self.entities[id.index()]
    }

    pub fn entity_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.index()]
    }

    pub fn builtins(&self) -> &BuiltinTypes {
        &self.builtins
    }

    pub fn poison(&self) -> EntityId {
        self.poison
    }

    pub fn global_scope(&self) -> EntityId {
        self.global_scope
    }

    pub fn current_scope(&self) -> EntityId {
        self.current_scope
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> {
        (0..self.entities.len() as u32).map(EntityId)
    }

    // # Scopes

    pub fn push_anonymous_scope(&mut self) -> EntityId {
        let scope = self.push(Entity {
            name: String::new(),
            mangled_name: String::new(),
            parent_scope: Some(self.current_scope),
            kind: EntityKind::AnonymousScope,
            access: AccessControl::Public,
            ast_node: None,
            names: HashMap::new(),
            child_scopes: Vec::new(),
        });
        self.entities[self.current_scope.index()].child_scopes.push(scope);
        self.current_scope = scope;
        scope
    }

    /// Enter an existing scope entity (function or struct).
    pub fn push_scope(&mut self, scope: EntityId) {
        debug_assert!(self.entity(scope).is_scope());
        self.current_scope = scope;
    }

    pub fn pop_scope(&mut self) {
        let parent = self.entity(self.current_scope).parent_scope;
        self.current_scope = parent.expect("popping the global scope");
    }

    // # Declaration and lookup

    /// Declare a new entity in the current scope. Returns `None` if the
    /// name is already taken by a non-function entity.
    pub fn declare(
        &mut self,
        name: &str,
        kind: EntityKind,
        ast_node: Option<NodeId>,
    ) -> Option<EntityId> {
        if let Some(existing) =
            self.entities[self.current_scope.index()].names.get(name)
        {
            let existing = *existing;
            if !self.entity(existing).is_poison() {
                return None;
            }
        }
        let scope = self.current_scope;
        let mangled = if self.entity(scope).name.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{}", self.entity(scope).mangled_name, name)
        };
        let id = self.push(Entity {
            name: name.to_owned(),
            mangled_name: mangled,
            parent_scope: Some(scope),
            kind,
            access: AccessControl::Public,
            ast_node,
            names: HashMap::new(),
            child_scopes: Vec::new(),
        });
        self.entities[scope.index()].names.insert(name.to_owned(), id);
        if self.entity(id).is_scope() {
            self.entities[scope.index()].child_scopes.push(id);
        }
        Some(id)
    }

    /// Declare a function, adding it to the overload set of its name.
    pub fn declare_function(
        &mut self,
        name: &str,
        kind: EntityKind,
        ast_node: Option<NodeId>,
    ) -> EntityId {
        debug_assert!(matches!(kind, EntityKind::Function { .. }));
        let scope = self.current_scope;
        let mangled = if self.entity(scope).mangled_name.is_empty() {
            name.to_owned()
        } else {
            format!("{}.{}", self.entity(scope).mangled_name, name)
        };
        let function = self.push(Entity {
            name: name.to_owned(),
            mangled_name: mangled,
            parent_scope: Some(scope),
            kind,
            access: AccessControl::Public,
            ast_node,
            names: HashMap::new(),
            child_scopes: Vec::new(),
        });
        self.entities[scope.index()].child_scopes.push(function);
        match self.entities[scope.index()].names.get(name).copied() {
            Some(existing)
                if matches!(
                    self.entity(existing).kind,
                    EntityKind::OverloadSet { .. }
                ) =>
            {
                if let EntityKind::OverloadSet { functions } =
                    &mut self.entities[existing.index()].kind
                {
                    functions.push(function);
                }
            }
            _ => {
                let set = self.push(Entity {
                    name: name.to_owned(),
                    mangled_name: String::new(),
                    parent_scope: Some(scope),
                    kind: EntityKind::OverloadSet {
                        functions: vec![function],
                    },
                    access: AccessControl::Public,
                    ast_node: None,
                    names: HashMap::new(),
                    child_scopes: Vec::new(),
                });
                self.entities[scope.index()]
                    .names
                    .insert(name.to_owned(), set);
            }
        }
        function
    }

    /// Mark a name in the current scope as poisoned.
    pub fn poison_name(&mut self, name: &str) {
        let poison = self.poison;
        self.entities[self.current_scope.index()]
            .names
            .insert(name.to_owned(), poison);
    }

    /// Unqualified lookup following the lexical parent chain.
    pub fn lookup(&self, name: &str) -> Option<EntityId> {
        let mut scope = Some(self.current_scope);
        while let Some(current) = scope {
            if let Some(entity) = self.entity(current).names.get(name) {
                return Some(*entity);
            }
            scope = self.entity(current).parent_scope;
        }
        None
    }

    /// Lookup restricted to one scope, e.g. member access.
    pub fn lookup_in(&self, scope: EntityId, name: &str) -> Option<EntityId> {
        self.entity(scope).names.get(name).copied()
    }

    /// Find a function in an overload set by exact parameter type list.
    pub fn find_by_signature(
        &self,
        overload_set: EntityId,
        argument_types: &[QualType],
    ) -> Option<EntityId> {
        let EntityKind::OverloadSet { functions } =
            &self.entity(overload_set).kind
        else {
            return None;
        };
        functions.iter().copied().find(|function| {
            match &self.entity(*function).kind {
                EntityKind::Function { signature, .. } => {
                    signature.argument_types == argument_types
                }
                _ => false,
            }
        })
    }

    // # Types

    pub fn array_type(
        &mut self,
        elem: EntityId,
        count: Option<u64>,
    ) -> EntityId {
        if let Some(id) = self.array_types.get(&(elem, count)) {
            return *id;
        }
        let name = match count {
            Some(count) => format!("[{}, {count}]", self.entity(elem).name),
            None => format!("[{}]", self.entity(elem).name),
        };
        let id = self.push(Entity {
            name,
            mangled_name: String::new(),
            parent_scope: Some(self.global_scope),
            kind: EntityKind::ArrayType { elem, count },
            access: AccessControl::Public,
            ast_node: None,
            names: HashMap::new(),
            child_scopes: Vec::new(),
        });
        self.array_types.insert((elem, count), id);
        id
    }

    pub fn ptr_type(&mut self, pointee: QualType, unique: bool) -> EntityId {
        if let Some(id) = self.ptr_types.get(&(pointee, unique)) {
            return *id;
        }
        let base_name = &self.entity(pointee.base).name;
        let name = if unique {
            format!("*unique {base_name}")
        } else {
            format!("*{base_name}")
        };
        let kind = if unique {
            EntityKind::UniquePtrType { pointee }
        } else {
            EntityKind::RawPtrType { pointee }
        };
        let id = self.push(Entity {
            name,
            mangled_name: String::new(),
            parent_scope: Some(self.global_scope),
            kind,
            access: AccessControl::Public,
            ast_node: None,
            names: HashMap::new(),
            child_scopes: Vec::new(),
        });
        self.ptr_types.insert((pointee, unique), id);
        id
    }

    // # Type queries

    pub fn is_integral(&self, ty: EntityId) -> bool {
        matches!(
            self.entity(ty).kind,
            EntityKind::BuiltinType(
                BuiltinTypeKind::Int { .. }
                    | BuiltinTypeKind::Bool
                    | BuiltinTypeKind::Byte
            )
        )
    }

    pub fn is_float(&self, ty: EntityId) -> bool {
        matches!(
            self.entity(ty).kind,
            EntityKind::BuiltinType(BuiltinTypeKind::Float { .. })
        )
    }

    pub fn int_width(&self, ty: EntityId) -> Option<(u32, bool)> {
        match self.entity(ty).kind {
            EntityKind::BuiltinType(BuiltinTypeKind::Int { width, signed }) => {
                Some((width, signed))
            }
            EntityKind::BuiltinType(BuiltinTypeKind::Bool) => Some((1, false)),
            EntityKind::BuiltinType(BuiltinTypeKind::Byte) => Some((8, false)),
            _ => None,
        }
    }

    /// Byte size of an object of this type; `None` for incomplete types
    /// (dynamic arrays, unresolved structs).
    pub fn size_of(&self, ty: EntityId) -> Option<u64> {
        match &self.entity(ty).kind {
            EntityKind::BuiltinType(kind) => Some(match kind {
                BuiltinTypeKind::Void => 0,
                BuiltinTypeKind::Bool | BuiltinTypeKind::Byte => 1,
                BuiltinTypeKind::Int { width, .. } => u64::from(*width) / 8,
                BuiltinTypeKind::Float { width } => u64::from(*width) / 8,
                BuiltinTypeKind::NullPtr => 8,
            }),
            EntityKind::RawPtrType { .. }
            | EntityKind::UniquePtrType { .. } => Some(8),
            EntityKind::ArrayType { elem, count } => {
                let count = (*count)?;
                Some(self.size_of(*elem)? * count)
            }
            EntityKind::StructType { members, complete, .. } => {
                if !complete {
                    return None;
                }
                let mut size = 0u64;
                let mut align = 1u64;
                for member in members {
                    let ty = self.variable_type(*member)?;
                    let member_size = self.size_of(ty.base)?;
                    let member_align = self.align_of(ty.base)?;
                    size = size.div_ceil(member_align) * member_align
                        + member_size;
                    align = align.max(member_align);
                }
                Some(size.div_ceil(align) * align)
            }
            _ => None,
        }
    }

    pub fn align_of(&self, ty: EntityId) -> Option<u64> {
        match &self.entity(ty).kind {
            EntityKind::ArrayType { elem, .. } => self.align_of(*elem),
            EntityKind::StructType { members, complete, .. } => {
                if !complete {
                    return None;
                }
                let mut align = 1;
                for member in members {
                    let ty = self.variable_type(*member)?;
                    align = align.max(self.align_of(ty.base)?);
                }
                Some(align)
            }
            _ => self.size_of(ty).map(|size| size.max(1)),
        }
    }

    /// A type is complete if its size is known.
    pub fn is_complete(&self, ty: EntityId) -> bool {
        self.size_of(ty).is_some()
    }

    fn variable_type(&self, entity: EntityId) -> Option<QualType> {
        match &self.entity(entity).kind {
            EntityKind::Variable { ty, .. } => Some(*ty),
            _ => None,
        }
    }

    /// A struct has trivial lifetime iff no user-defined copy/move/destructor
    /// exists and every member has trivial lifetime. Non-struct object types
    /// are trivial, unique pointers are not.
    pub fn has_trivial_lifetime(&self, ty: EntityId) -> bool {
        match &self.entity(ty).kind {
            EntityKind::StructType { lifetime, .. } => lifetime.trivial,
            EntityKind::UniquePtrType { .. } => false,
            EntityKind::ArrayType { elem, .. } => {
                self.has_trivial_lifetime(*elem)
            }
            _ => true,
        }
    }

    pub fn struct_lifetime(&self, ty: EntityId) -> Option<&LifetimeMetadata> {
        match &self.entity(ty).kind {
            EntityKind::StructType { lifetime, .. } => Some(lifetime),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_types_resolve_by_name() {
        let sym = SymbolTable::new();
        let s64 = sym.lookup("s64").unwrap();
        assert_eq!(s64, sym.builtins().s64);
        assert_eq!(sym.int_width(s64), Some((64, true)));
        assert_eq!(sym.size_of(s64), Some(8));
        assert_eq!(sym.lookup("int"), Some(sym.builtins().s64));
    }

    #[test]
    fn lookup_walks_parent_scopes() {
        let mut sym = SymbolTable::new();
        let s64 = sym.builtins().s64;
        let var = sym
            .declare(
                "x",
                EntityKind::Variable {
                    ty: QualType::new(s64),
                    mutable: false,
                    index: 0,
                    is_parameter: false,
                },
                None,
            )
            .unwrap();
        sym.push_anonymous_scope();
        assert_eq!(sym.lookup("x"), Some(var));
        sym.pop_scope();
        assert_eq!(sym.lookup("x"), Some(var));
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let mut sym = SymbolTable::new();
        let s64 = sym.builtins().s64;
        let kind = EntityKind::Variable {
            ty: QualType::new(s64),
            mutable: false,
            index: 0,
            is_parameter: false,
        };
        assert!(sym.declare("x", kind.clone(), None).is_some());
        assert!(sym.declare("x", kind, None).is_none());
    }

    #[test]
    fn array_types_are_interned() {
        let mut sym = SymbolTable::new();
        let s64 = sym.builtins().s64;
        let a = sym.array_type(s64, Some(4));
        let b = sym.array_type(s64, Some(4));
        assert_eq!(a, b);
        assert_ne!(a, sym.array_type(s64, None));
        assert_eq!(sym.size_of(a), Some(32));
        // Dynamic arrays are incomplete.
        let dynamic = sym.array_type(s64, None);
        assert!(!sym.is_complete(dynamic));
    }
}

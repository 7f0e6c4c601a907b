//! The entity hierarchy.
//!
//! Every named semantic object is an [`Entity`] in one arena owned by the
//! symbol table: objects (variables, properties, temporaries), scopes,
//! types, functions and overload sets. Entities reference each other by
//! [`EntityId`]; ownership never cycles.

use bitflags::bitflags;
use scatha_ast::NodeId;

/// Handle into the entity arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Reference or pointer indirection of a qualified type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Refness {
    #[default]
    None,
    Reference,
    MutReference,
}

/// A type qualified by mutability and reference-ness. Equality is
/// structural: base types are interned, so id equality is type equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QualType {
    pub base: EntityId,
    pub mutable: bool,
    pub refness: Refness,
}

impl QualType {
    pub fn new(base: EntityId) -> Self {
        Self { base, mutable: false, refness: Refness::None }
    }

    pub fn mutable(base: EntityId) -> Self {
        Self { base, mutable: true, refness: Refness::None }
    }

    pub fn reference(base: EntityId, mutable: bool) -> Self {
        Self {
            base,
            mutable,
            refness: if mutable {
                Refness::MutReference
            } else {
                Refness::Reference
            },
        }
    }

    pub fn is_reference(&self) -> bool {
        self.refness != Refness::None
    }

    /// The same type with reference-ness stripped.
    pub fn stripped(&self) -> QualType {
        QualType { base: self.base, mutable: self.mutable, refness: Refness::None }
    }
}

/// Visibility of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessControl {
    #[default]
    Public,
    Internal,
    Private,
}

/// Linkage kind of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Defined in source.
    Native,
    /// Synthesized by the compiler, e.g. lifetime functions.
    Generated,
    /// Imported through the FFI.
    Foreign,
}

bitflags! {
    /// Function attributes.
    pub struct FunctionAttributes: u16 {
        const PURE  = 0b0001;
        const CONST = 0b0010;
    }
}

/// Special member function kinds, keyed by operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialMemberFunction {
    New,
    Delete,
    Move,
}

/// Special lifetime function kinds, keyed by shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialLifetimeFunction {
    DefaultConstructor,
    CopyConstructor,
    MoveConstructor,
    Destructor,
}

/// Signature of a function; the return type stays `None` until deduced.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub argument_types: Vec<QualType>,
    pub return_type: Option<QualType>,
}

/// Lifetime metadata of a struct type.
#[derive(Debug, Clone, Default)]
pub struct LifetimeMetadata {
    pub default_constructor: Option<EntityId>,
    pub copy_constructor: Option<EntityId>,
    pub move_constructor: Option<EntityId>,
    pub destructor: Option<EntityId>,
    /// No user-defined copy/move/destructor and all members trivial.
    pub trivial: bool,
}

/// Builtin scalar type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTypeKind {
    Void,
    Bool,
    Byte,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    NullPtr,
}

/// Entity payload.
#[derive(Debug, Clone)]
pub enum EntityKind {
    // # Scopes
    GlobalScope,
    AnonymousScope,

    // # Objects
    Variable {
        ty: QualType,
        mutable: bool,
        /// Parameter index for parameters, declaration ordinal otherwise.
        index: u32,
        is_parameter: bool,
    },
    /// Computed member, e.g. the `count` of an array.
    Property { ty: QualType },
    Temporary { ty: QualType },

    // # Types
    BuiltinType(BuiltinTypeKind),
    /// Raw pointer to the pointee type.
    RawPtrType { pointee: QualType },
    /// Owning pointer to the pointee type.
    UniquePtrType { pointee: QualType },
    StructType {
        members: Vec<EntityId>,
        lifetime: LifetimeMetadata,
        /// `false` until the body has been resolved.
        complete: bool,
    },
    ArrayType {
        elem: EntityId,
        /// `None` is the dynamic count.
        count: Option<u64>,
    },

    // # Functions
    Function {
        signature: FunctionSignature,
        kind: FunctionKind,
        attributes: FunctionAttributes,
        smf: Option<SpecialMemberFunction>,
        slf: Option<SpecialLifetimeFunction>,
        /// Foreign function table slot and index.
        foreign_index: Option<(u32, u32)>,
        /// Offset in the compiled binary, patched after codegen.
        binary_address: Option<u64>,
        params: Vec<EntityId>,
    },
    OverloadSet {
        functions: Vec<EntityId>,
    },

    /// Placeholder for generic entities; instantiation is out of scope.
    Generic,

    /// Sentinel produced by failed lookups to suppress cascading errors.
    Poison,
}

/// One entity: names, scope links and payload.
#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub mangled_name: String,
    pub parent_scope: Option<EntityId>,
    pub kind: EntityKind,
    pub access: AccessControl,
    /// Defining AST node, if any.
    pub ast_node: Option<NodeId>,
    /// Name lookup table of scope entities.
    pub(crate) names: std::collections::HashMap<String, EntityId>,
    /// Child scopes of scope entities.
    pub(crate) child_scopes: Vec<EntityId>,
}

impl Entity {
    pub fn is_scope(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::GlobalScope
                | EntityKind::AnonymousScope
                | EntityKind::Function { .. }
                | EntityKind::StructType { .. }
        )
    }

    pub fn is_type(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::BuiltinType(_)
                | EntityKind::RawPtrType { .. }
                | EntityKind::UniquePtrType { .. }
                | EntityKind::StructType { .. }
                | EntityKind::ArrayType { .. }
        )
    }

    pub fn is_poison(&self) -> bool {
        matches!(self.kind, EntityKind::Poison)
    }
}
